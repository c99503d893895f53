// Copyright (c) 2025 Chetan Conikee <conikee@gmail.com>
// Licensed under the MIT License

//! The abstract provider contract the Generation Driver invokes.
//!
//! Wire formats for concrete providers (OpenAI, Anthropic, ...) are out of
//! scope for the core; this module only defines the request/response shape
//! and the async trait an embedding application implements once per
//! provider.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;
use crate::message::Message;

/// Per-model token limits used by clamping (§4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelCapabilities {
    /// Maximum tokens the model will accept across system + messages.
    pub max_input_tokens: u64,
    /// Maximum tokens the model will emit in one completion.
    pub max_output_tokens: u64,
    /// Maximum tokens across input and output combined, if the provider
    /// enforces a combined budget distinct from the sum of the two above.
    pub max_total_tokens: u64,
}

impl ModelCapabilities {
    /// Fallback bounds used when a model's capabilities are not known.
    pub const FALLBACK: Self = Self {
        max_input_tokens: 8192,
        max_output_tokens: 8192,
        max_total_tokens: 16384,
    };
}

/// A JSON-Schema tool specification offered to the provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    /// The tool's registered name.
    pub name: String,
    /// A human-readable description.
    pub description: String,
    /// The tool's parameters, as a JSON-Schema object.
    pub parameters_schema: Value,
}

/// A request to a provider for one completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderRequest {
    /// The root's system prompt, if any.
    pub system_message: Option<String>,
    /// The coalesced context the model should see.
    pub messages: Vec<Message>,
    /// The model to invoke.
    pub model: String,
    /// Sampling / length parameters, forwarded verbatim to the provider.
    pub parameters: BTreeMap<String, Value>,
    /// The tools offered, if any are active for this request.
    pub tools: Option<Vec<ToolSpec>>,
    /// The tool-choice mode, if tools are offered (`"auto"` per §4.4).
    pub tool_choice: Option<String>,
}

/// A provider's response to one completion request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderResponse {
    /// The assistant message the provider produced.
    pub message: Message,
    /// Token usage, if the provider reports it.
    pub usage: Option<Value>,
    /// The provider's reported stop reason.
    pub finish_reason: Option<String>,
}

/// A pluggable completion backend.
///
/// An embedding application implements this once per provider (OpenAI,
/// Anthropic, a local model server, ...); the Generation Driver depends
/// only on this trait, never on a concrete provider's wire format.
#[async_trait]
pub trait Provider: Send + Sync {
    /// This provider's name, as registered with the driver (e.g.
    /// `"openai"`).
    fn name(&self) -> &str;

    /// Issues one completion request.
    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse>;

    /// Returns known capabilities for `model`, or `None` to fall back to
    /// [`ModelCapabilities::FALLBACK`].
    fn capabilities(&self, _model: &str) -> Option<ModelCapabilities> {
        None
    }
}

/// A registry of providers keyed by name, used to resolve the
/// `providerName` argument of `generate`/`generateStream`.
#[derive(Default)]
pub struct ProviderRegistry {
    providers: std::collections::HashMap<String, std::sync::Arc<dyn Provider>>,
}

impl ProviderRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a provider under its own `name()`, replacing any existing
    /// registration of the same name.
    pub fn register(&mut self, provider: std::sync::Arc<dyn Provider>) {
        self.providers.insert(provider.name().to_string(), provider);
    }

    /// Looks up a provider by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<std::sync::Arc<dyn Provider>> {
        self.providers.get(name).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::ContentBlock;
    use std::sync::Arc;

    struct EchoProvider;

    #[async_trait]
    impl Provider for EchoProvider {
        fn name(&self) -> &str {
            "echo"
        }

        async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse> {
            let text = request
                .messages
                .last()
                .and_then(|m| m.content().first())
                .and_then(ContentBlock::as_text)
                .unwrap_or("")
                .to_string();
            Ok(ProviderResponse {
                message: Message::Assistant {
                    content: vec![ContentBlock::Text { text }],
                },
                usage: None,
                finish_reason: Some("stop".into()),
            })
        }
    }

    #[tokio::test]
    async fn registry_resolves_by_name() {
        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(EchoProvider));
        assert!(registry.get("echo").is_some());
        assert!(registry.get("missing").is_none());
    }

    #[test]
    fn fallback_capabilities_are_symmetric_defaults() {
        assert_eq!(ModelCapabilities::FALLBACK.max_input_tokens, 8192);
        assert_eq!(ModelCapabilities::FALLBACK.max_output_tokens, 8192);
    }
}
