// Copyright (c) 2025 Chetan Conikee <conikee@gmail.com>
// Licensed under the MIT License

//! Core data types for the forest's tree model: roots, nodes, metadata, and
//! the bookmark shape the Config collaborator persists on the Forest's
//! behalf.
//!
//! [`Message`](crate::message::Message) and [`ContentBlock`](crate::message::ContentBlock)
//! live in [`crate::message`]; this module covers everything the Store
//! persists *around* a message — the tree edges, provenance, and the
//! per-node digest convenience.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::hash::Blake3Hash;
use crate::ids::{NodeId, RootId};
use crate::message::Message;

/// Per-root configuration. Two roots are "the same" iff their configs are
/// structurally equal, which is what [`crate::forest::Forest::get_or_create_root`]
/// relies on for dedup.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootConfig {
    /// The system prompt anchoring this conversation tree, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
}

/// A conversation root: the anchor of a tree, never itself a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RootData {
    /// This root's identifier.
    pub id: RootId,
    /// When this root was created.
    pub created_at: DateTime<Utc>,
    /// The direct children of this root, in creation order.
    pub child_ids: Vec<NodeId>,
    /// This root's configuration.
    pub config: RootConfig,
    /// Soft-delete marker; the core recognizes it but never sets it itself.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub deleted: bool,
}

impl RootData {
    /// Creates a new, non-deleted root with no children.
    #[must_use]
    pub fn new(id: RootId, config: RootConfig, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            created_at,
            child_ids: Vec::new(),
            config,
            deleted: false,
        }
    }
}

/// The provenance of a node: who/what produced the message it carries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SourceInfo {
    /// Produced directly from user input (including the text half of an
    /// `editNodeContent` branch).
    User,
    /// Produced by a provider completion.
    Model {
        /// The provider name (e.g. `"openai"`).
        provider: String,
        /// The model name (e.g. `"gpt-4"`).
        model_name: String,
        /// The generation parameters used for this request.
        parameters: BTreeMap<String, Value>,
        /// The tool specs offered to the model, if any were active.
        #[serde(skip_serializing_if = "Option::is_none")]
        tools: Option<Vec<String>>,
        /// The tool-choice mode sent with the request, if tools were active.
        #[serde(skip_serializing_if = "Option::is_none")]
        tool_choice: Option<String>,
        /// The provider's reported stop reason, if any.
        #[serde(skip_serializing_if = "Option::is_none")]
        finish_reason: Option<String>,
        /// The provider's reported token usage, if any.
        #[serde(skip_serializing_if = "Option::is_none")]
        usage: Option<Value>,
    },
    /// Produced by executing a tool the model requested.
    ToolResult {
        /// The name of the tool that was executed.
        tool_name: String,
    },
    /// Produced by `splitNode` (the left-hand half of a split).
    Split,
}

/// Metadata carried alongside every node's message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeMetadata {
    /// When this node was created.
    pub timestamp: DateTime<Utc>,
    /// The root this node was originally created under.
    ///
    /// Distinct from the node's current `root_id` only in designs that
    /// support moving subtrees across roots; the core does not do this, so
    /// the two values coincide, but the field is carried per the persisted
    /// schema in case an embedding application wants to track provenance
    /// across a future cross-tree operation.
    pub original_root_id: RootId,
    /// Provenance of this node's message.
    pub source_info: SourceInfo,
    /// Free-form labels an embedding application may attach.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    /// Free-form structured data an embedding application may attach.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_data: Option<Value>,
    /// The node this one was produced from by `splitNode`, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub split_source: Option<NodeId>,
}

impl NodeMetadata {
    /// Builds metadata for a freshly created node.
    #[must_use]
    pub fn new(timestamp: DateTime<Utc>, original_root_id: RootId, source_info: SourceInfo) -> Self {
        Self {
            timestamp,
            original_root_id,
            source_info,
            tags: Vec::new(),
            custom_data: None,
            split_source: None,
        }
    }
}

/// A non-root node: always has exactly one parent, in the same root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeData {
    /// This node's identifier.
    pub id: NodeId,
    /// The root this node belongs to.
    pub root_id: RootId,
    /// The parent node or root this node hangs off.
    pub parent_id: NodeId,
    /// The direct children of this node, in creation order.
    pub child_ids: Vec<NodeId>,
    /// This node's canonical message.
    pub message: Message,
    /// This node's metadata.
    pub metadata: NodeMetadata,
}

/// Either a root or a node, as returned by a generic `Store::load_node` call
/// on an id that might name either.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    /// A conversation root.
    Root(RootData),
    /// A non-root node.
    Node(NodeData),
}

impl Node {
    /// Returns the id of this node or root as a string, for error messages.
    #[must_use]
    pub fn id_string(&self) -> String {
        match self {
            Self::Root(r) => r.id.to_string(),
            Self::Node(n) => n.id.to_string(),
        }
    }

    /// Returns the underlying [`NodeData`], if this is not a root.
    #[must_use]
    pub fn as_node_data(&self) -> Option<&NodeData> {
        match self {
            Self::Root(_) => None,
            Self::Node(n) => Some(n),
        }
    }
}

/// A content-free view of a node, used for cheap graph rendering without
/// loading every message body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeStructure {
    /// This node's (or root's) id, stringified.
    pub id: String,
    /// The parent's id, or `None` for a root.
    pub parent_id: Option<String>,
    /// The direct children's ids, stringified.
    pub child_ids: Vec<String>,
    /// The owning root's id, stringified.
    pub root_id: String,
    /// When this node (or root) was created.
    pub timestamp: DateTime<Utc>,
    /// The role of the underlying message, or `"system"` for a root.
    pub role: String,
}

/// A persisted on-disk node record: [`NodeData`] plus an integrity digest.
///
/// The digest is a read-time corruption smoke-check (see
/// [`crate::store::content_digest`]), not an identity or replication
/// mechanism — [`NodeId`] allocation never depends on it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeRecord {
    /// The node this record carries.
    #[serde(flatten)]
    pub node: NodeData,
    /// The BLAKE3 digest of `node.message`'s canonical JSON encoding.
    pub digest: Blake3Hash,
}

/// A user-visible bookmark onto a node, owned by the Config collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bookmark {
    /// The caller-supplied title.
    pub title: String,
    /// The root the bookmarked node lives in.
    pub root_id: RootId,
    /// The bookmarked node.
    pub node_id: NodeId,
    /// When the bookmark was first created.
    pub created_at: DateTime<Utc>,
    /// When the bookmark last moved (e.g. via edit-coupling).
    pub updated_at: DateTime<Utc>,
}
