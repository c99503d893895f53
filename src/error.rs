// Copyright (c) 2025 Chetan Conikee <conikee@gmail.com>
// Licensed under the MIT License

//! Error handling for the forest engine.
//!
//! This module provides a single error type covering every failure mode of
//! the message model, the store, the forest, and the generation driver.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for forest engine operations.
pub type Result<T> = std::result::Result<T, ForestError>;

/// Comprehensive error type for all forest engine operations.
#[derive(Error, Debug)]
pub enum ForestError {
    /// A node or root id does not resolve to a stored record.
    #[error("node not found: {id}")]
    NodeNotFound {
        /// The id that failed to resolve.
        id: String,
    },

    /// An operation that requires a node (not a root) was given a root id,
    /// or the id resolved to neither.
    #[error("node not found or is a root: {id}")]
    NodeNotFoundOrRoot {
        /// The id that was rejected.
        id: String,
    },

    /// Walking `parent_id` links revisited an id, indicating a corrupt tree.
    #[error("circular reference detected at node {id}")]
    CircularReference {
        /// The id at which the cycle was detected.
        id: String,
    },

    /// Attempted to edit the text of an assistant message that carries tool-use blocks.
    #[error("cannot edit a message that contains tool-use content: {id}")]
    CannotEditToolUseMessage {
        /// The node that was rejected.
        id: String,
    },

    /// A split offset fell outside the valid interior range of the text.
    #[error("invalid split position {position} for text of length {len}")]
    InvalidSplitPosition {
        /// The requested offset.
        position: usize,
        /// The length of the text being split.
        len: usize,
    },

    /// A message normalized to no usable content.
    #[error("message content is empty in {context}")]
    EmptyContent {
        /// Where the empty content was encountered.
        context: String,
    },

    /// A legacy tool call's `arguments` string did not parse to a plain JSON object.
    #[error("failed to parse arguments for tool call {tool_call_id} ({tool_name}): {source}")]
    ToolArgumentParse {
        /// The tool call id the arguments belonged to.
        tool_call_id: String,
        /// The tool name the arguments belonged to.
        tool_name: String,
        /// The raw arguments string that failed to parse.
        raw_arguments: String,
        /// The underlying JSON error.
        #[source]
        source: serde_json::Error,
    },

    /// The requested provider has no registered implementation.
    #[error("unsupported provider: {provider}")]
    UnsupportedProvider {
        /// The provider name that was requested.
        provider: String,
    },

    /// A tool's `parameters_schema` was not a JSON object.
    #[error("invalid tool schema for '{name}': {reason}")]
    InvalidToolSchema {
        /// The tool name the schema was registered under.
        name: String,
        /// Why the schema was rejected.
        reason: String,
    },

    /// A tool execution was requested under a name with no registration.
    #[error("tool not found: {name}")]
    ToolNotFound {
        /// The unregistered tool name.
        name: String,
    },

    /// `n > 1` was requested alongside active tools.
    #[error("generation with active tools only supports n=1, got {n}")]
    ToolsOnlySupportNSingleton {
        /// The requested completion count.
        n: usize,
    },

    /// The tool-use loop exceeded its configured iteration cap.
    #[error("tool iteration limit of {limit} exceeded")]
    ToolIterationLimitExceeded {
        /// The configured cap.
        limit: usize,
    },

    /// The generation session was cancelled via `abort`.
    #[error("generation aborted{}", reason.as_ref().map(|r| format!(": {r}")).unwrap_or_default())]
    GenerationAborted {
        /// The caller-supplied cancellation reason, if any.
        reason: Option<String>,
    },

    /// The provider call itself failed.
    #[error("provider error: {reason}")]
    Provider {
        /// A description of the provider failure.
        reason: String,
        /// The underlying cause, if any.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A persisted record failed its digest check or otherwise violated an
    /// expected structural invariant.
    #[error("consistency violation for '{context}': {reason}")]
    Consistency {
        /// What was being read or checked.
        context: String,
        /// The reason the record was rejected.
        reason: String,
    },

    /// Error occurred during file system operations.
    #[error("I/O error for path '{path}': {source}")]
    Io {
        /// The file path that caused the error.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Error occurred (de)serializing JSON.
    #[error("JSON error in {context}: {source}")]
    Json {
        /// Where the JSON error occurred.
        context: String,
        /// The underlying JSON error.
        #[source]
        source: serde_json::Error,
    },

    /// Error occurred parsing the optional TOML config file.
    #[error("failed to parse config at '{path}': {source}")]
    ConfigParse {
        /// The config file path.
        path: PathBuf,
        /// The underlying TOML error.
        #[source]
        source: toml::de::Error,
    },
}

impl ForestError {
    /// Creates a new node-not-found error.
    pub fn node_not_found(id: impl Into<String>) -> Self {
        Self::NodeNotFound { id: id.into() }
    }

    /// Creates a new node-not-found-or-root error.
    pub fn node_not_found_or_root(id: impl Into<String>) -> Self {
        Self::NodeNotFoundOrRoot { id: id.into() }
    }

    /// Creates a new circular-reference error.
    pub fn circular_reference(id: impl Into<String>) -> Self {
        Self::CircularReference { id: id.into() }
    }

    /// Creates a new cannot-edit-tool-use-message error.
    pub fn cannot_edit_tool_use_message(id: impl Into<String>) -> Self {
        Self::CannotEditToolUseMessage { id: id.into() }
    }

    /// Creates a new invalid-split-position error.
    pub fn invalid_split_position(position: usize, len: usize) -> Self {
        Self::InvalidSplitPosition { position, len }
    }

    /// Creates a new empty-content error.
    pub fn empty_content(context: impl Into<String>) -> Self {
        Self::EmptyContent {
            context: context.into(),
        }
    }

    /// Creates a new tool-argument-parse error.
    pub fn tool_argument_parse(
        tool_call_id: impl Into<String>,
        tool_name: impl Into<String>,
        raw_arguments: impl Into<String>,
        source: serde_json::Error,
    ) -> Self {
        Self::ToolArgumentParse {
            tool_call_id: tool_call_id.into(),
            tool_name: tool_name.into(),
            raw_arguments: raw_arguments.into(),
            source,
        }
    }

    /// Creates a new unsupported-provider error.
    pub fn unsupported_provider(provider: impl Into<String>) -> Self {
        Self::UnsupportedProvider {
            provider: provider.into(),
        }
    }

    /// Creates a new invalid-tool-schema error.
    pub fn invalid_tool_schema(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidToolSchema {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Creates a new tool-not-found error.
    pub fn tool_not_found(name: impl Into<String>) -> Self {
        Self::ToolNotFound { name: name.into() }
    }

    /// Creates a new tools-only-support-n-singleton error.
    pub fn tools_only_support_n_singleton(n: usize) -> Self {
        Self::ToolsOnlySupportNSingleton { n }
    }

    /// Creates a new tool-iteration-limit-exceeded error.
    pub fn tool_iteration_limit_exceeded(limit: usize) -> Self {
        Self::ToolIterationLimitExceeded { limit }
    }

    /// Creates a new generation-aborted error.
    pub fn generation_aborted(reason: Option<String>) -> Self {
        Self::GenerationAborted { reason }
    }

    /// Creates a new provider error.
    pub fn provider(
        reason: impl Into<String>,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self::Provider {
            reason: reason.into(),
            source,
        }
    }

    /// Creates a new consistency-violation error.
    pub fn consistency(context: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Consistency {
            context: context.into(),
            reason: reason.into(),
        }
    }

    /// Creates a new I/O error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Creates a new JSON error.
    pub fn json(context: impl Into<String>, source: serde_json::Error) -> Self {
        Self::Json {
            context: context.into(),
            source,
        }
    }

    /// Creates a new config-parse error.
    pub fn config_parse(path: impl Into<PathBuf>, source: toml::de::Error) -> Self {
        Self::ConfigParse {
            path: path.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_error_creation() {
        let not_found = ForestError::node_not_found("root-1/node-2");
        assert!(matches!(not_found, ForestError::NodeNotFound { .. }));

        let io_error = ForestError::io(
            "/tmp/test",
            io::Error::new(io::ErrorKind::NotFound, "file not found"),
        );
        assert!(matches!(io_error, ForestError::Io { .. }));

        let aborted = ForestError::generation_aborted(Some("user cancelled".into()));
        assert!(matches!(aborted, ForestError::GenerationAborted { .. }));
    }

    #[test]
    fn test_error_display() {
        let error = ForestError::invalid_split_position(0, 5);
        let msg = error.to_string();
        assert!(msg.contains("invalid split position 0"));
        assert!(msg.contains("length 5"));
    }

    #[test]
    fn test_generation_aborted_without_reason() {
        let error = ForestError::generation_aborted(None);
        assert_eq!(error.to_string(), "generation aborted");
    }
}
