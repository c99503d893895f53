// Copyright (c) 2025 Chetan Conikee <conikee@gmail.com>
// Licensed under the MIT License

//! forest-engine - a content-addressable forest of branching LLM conversations.
//!
//! This library provides the core tree algebra, message normalization, and
//! generation driver for applications that let a conversation branch: a
//! message node may have any number of children, editing re-bases content
//! onto a new branch rather than mutating history, and tool-use loops
//! persist every step as they happen.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod bookmark;
pub mod config;
pub mod error;
pub mod forest;
pub mod generate;
pub mod hash;
pub mod ids;
pub mod message;
pub mod provider;
pub mod store;
pub mod tools;
pub mod types;

// Re-export commonly used types
pub use bookmark::{BookmarkStore, FileBookmarkStore};
pub use config::Config;
pub use error::{ForestError, Result};
pub use forest::{Forest, MetadataSeed, SerializedNode};
pub use generate::{coalesce_text_only_adjacent, AbortHandle, GenerateOptions, GenerateSession, GenerationDriver, GenerationEvent};
pub use ids::{NodeId, RootId};
pub use message::{compare_normal, normalize, ContentBlock, Message, RawMessage};
pub use provider::{ModelCapabilities, Provider, ProviderRegistry, ProviderRequest, ProviderResponse, ToolSpec};
pub use store::{FileStore, Store};
pub use tools::{ToolHandler, ToolRegistry};
pub use types::{Bookmark, Node, NodeData, NodeMetadata, RootConfig, RootData, SourceInfo};
