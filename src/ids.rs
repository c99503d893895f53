// Copyright (c) 2025 Chetan Conikee <conikee@gmail.com>
// Licensed under the MIT License

//! Opaque identifiers for roots and nodes.
//!
//! A [`NodeId`] always encodes its owning [`RootId`] as a prefix
//! (`root-{seq}/node-{seq}`), so the root of any node id is derivable
//! without a store lookup.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Identifier of a conversation root, of the form `root-{seq}`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RootId(String);

impl RootId {
    /// Builds a `RootId` from a raw sequence number.
    #[must_use]
    pub fn from_seq(seq: u64) -> Self {
        Self(format!("root-{seq}"))
    }

    /// Wraps an already-formatted id without validating its shape.
    ///
    /// Used when reading a persisted record back off disk.
    #[must_use]
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Returns the id as a plain string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RootId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of a node within a root, of the form `{root}/node-{seq}`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    /// Builds a `NodeId` from its owning root and a raw sequence number.
    #[must_use]
    pub fn from_seq(root: &RootId, seq: u64) -> Self {
        Self(format!("{root}/node-{seq}"))
    }

    /// Wraps an already-formatted id without validating its shape.
    #[must_use]
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Returns the id as a plain string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns `true` if this id has the `{root}/node-{seq}` shape rather
    /// than a bare root id wrapped in a `NodeId` (used for a node's
    /// `parent_id` field when the parent is the root itself).
    #[must_use]
    pub fn is_node_shaped(&self) -> bool {
        self.0.contains('/')
    }

    /// Derives the owning [`RootId`] from this node id's prefix.
    ///
    /// # Panics
    ///
    /// Panics if the id was not constructed via [`NodeId::from_seq`] and
    /// does not contain a `/` separator; this indicates a corrupt store
    /// record and callers should have already rejected it via
    /// [`crate::error::ForestError::Consistency`] before reaching here.
    #[must_use]
    pub fn root_id(&self) -> RootId {
        let (root, _) = self
            .0
            .split_once('/')
            .expect("NodeId must contain a root prefix");
        RootId::from_raw(root)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Either a root or a node id, used where an operation may target either.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AnyId {
    /// A root identifier.
    Root(RootId),
    /// A node identifier.
    Node(NodeId),
}

impl fmt::Display for AnyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Root(id) => write!(f, "{id}"),
            Self::Node(id) => write!(f, "{id}"),
        }
    }
}

/// Monotonic, in-process id allocator.
///
/// The store seeds this from the highest sequence number observed on disk
/// at open time, then hands out strictly increasing values so a generated
/// id never collides with an existing on-disk artifact.
#[derive(Debug, Default)]
pub struct IdSequencer {
    next: AtomicU64,
}

impl IdSequencer {
    /// Creates a sequencer that will hand out `start` as its first value.
    #[must_use]
    pub fn starting_at(start: u64) -> Self {
        Self {
            next: AtomicU64::new(start),
        }
    }

    /// Atomically allocates and returns the next sequence number.
    pub fn next_seq(&self) -> u64 {
        self.next.fetch_add(1, Ordering::SeqCst)
    }

    /// Observes an existing sequence number, bumping the allocator past it
    /// so future allocations never reuse it.
    pub fn observe(&self, seq: u64) {
        self.next.fetch_max(seq + 1, Ordering::SeqCst);
    }
}
