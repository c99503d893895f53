// Copyright (c) 2025 Chetan Conikee <conikee@gmail.com>
// Licensed under the MIT License

//! Durable persistence of roots and nodes.
//!
//! [`FileStore`] is the reference implementation: one JSON file per node
//! under `<base>/<root>/nodes/node-<seq>.json`, and a single aggregated
//! `<base>/roots.json` for the root index, matching §6's persisted-state
//! layout. A cached, content-free topology view ([`NodeStructure`]) is
//! invalidated on every mutating call.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::error::{ForestError, Result};
use crate::hash::digest_json;
use crate::ids::{IdSequencer, NodeId, RootId};
use crate::types::{Node, NodeData, NodeRecord, NodeStructure, RootData};

/// Durable persistence of roots and nodes, plus monotonic id allocation.
///
/// Implementations must never hand out an id whose on-disk record already
/// exists, must normalize any persisted message on read (forward
/// migration), and must only ever write canonical messages.
#[async_trait]
pub trait Store: Send + Sync {
    /// Allocates a fresh, never-before-used root id.
    async fn generate_root_id(&self) -> RootId;

    /// Allocates a fresh, never-before-used node id under `root`.
    async fn generate_node_id(&self, root: &RootId) -> NodeId;

    /// Persists a root record, creating or overwriting it.
    async fn save_root(&self, root: &RootData) -> Result<()>;

    /// Loads a root by id, or `None` if it does not exist.
    async fn load_root(&self, id: &RootId) -> Result<Option<RootData>>;

    /// Lists every persisted root, in no particular order.
    async fn list_roots(&self) -> Result<Vec<RootData>>;

    /// Persists a node record, creating or overwriting it.
    ///
    /// # Errors
    ///
    /// Returns an error if `node.message` is not canonical (see
    /// [`crate::message::Message::validate`]) — the write path rejects a
    /// non-canonical message rather than let it reach disk.
    async fn save_node(&self, node: &NodeData) -> Result<()>;

    /// Loads a node by id, or `None` if it does not exist.
    async fn load_node(&self, id: &NodeId) -> Result<Option<NodeData>>;

    /// Loads whichever of a root or a node `id` names, trying the node
    /// shape first (ids of the form `root-N/node-M`) and falling back to
    /// the root shape otherwise.
    async fn load_any(&self, id: &str) -> Result<Option<Node>>;

    /// Removes a node's persisted record. A no-op if it does not exist.
    async fn delete_node(&self, id: &NodeId) -> Result<()>;

    /// Finds every node in `root_id`, optionally filtered to direct
    /// children of `parent_id`.
    async fn find_nodes(&self, root_id: &RootId, parent_id: Option<&NodeId>) -> Result<Vec<NodeData>>;

    /// Returns a cached, content-free view of every node for graph
    /// rendering.
    async fn list_all_node_structures(&self) -> Result<Vec<NodeStructure>>;
}

/// File-per-node JSON persistence under a base directory.
pub struct FileStore {
    base_dir: PathBuf,
    root_sequencer: IdSequencer,
    node_sequencers: RwLock<HashMap<RootId, Arc<IdSequencer>>>,
    roots_cache: RwLock<Option<Vec<RootData>>>,
    topology_cache: RwLock<Option<Vec<NodeStructure>>>,
}

impl FileStore {
    /// Opens (creating if absent) a file store rooted at `base_dir`,
    /// seeding id sequencers from whatever is already on disk so a freshly
    /// allocated id never collides with an existing artifact.
    pub async fn open(base_dir: impl Into<PathBuf>) -> Result<Self> {
        let base_dir = base_dir.into();
        tokio::fs::create_dir_all(&base_dir)
            .await
            .map_err(|e| ForestError::io(base_dir.clone(), e))?;

        let roots = Self::read_roots_file(&base_dir).await?;
        let root_sequencer = IdSequencer::default();
        let mut node_sequencers = HashMap::new();
        for root in &roots {
            if let Some(seq) = root.id.as_str().strip_prefix("root-").and_then(|s| s.parse::<u64>().ok()) {
                root_sequencer.observe(seq);
            }
            let node_dir = Self::nodes_dir(&base_dir, &root.id);
            let sequencer = IdSequencer::default();
            if let Ok(mut entries) = tokio::fs::read_dir(&node_dir).await {
                while let Ok(Some(entry)) = entries.next_entry().await {
                    if let Some(seq) = Self::seq_from_node_filename(&entry.file_name()) {
                        sequencer.observe(seq);
                    }
                }
            }
            node_sequencers.insert(root.id.clone(), Arc::new(sequencer));
        }

        debug!(base = %base_dir.display(), roots = roots.len(), "opened file store");
        Ok(Self {
            base_dir,
            root_sequencer,
            node_sequencers: RwLock::new(node_sequencers),
            roots_cache: RwLock::new(Some(roots)),
            topology_cache: RwLock::new(None),
        })
    }

    fn nodes_dir(base_dir: &Path, root: &RootId) -> PathBuf {
        base_dir.join(root.as_str()).join("nodes")
    }

    fn node_path(base_dir: &Path, root: &RootId, id: &NodeId) -> PathBuf {
        let file_name = id
            .as_str()
            .rsplit('/')
            .next()
            .unwrap_or(id.as_str());
        Self::nodes_dir(base_dir, root).join(format!("{file_name}.json"))
    }

    fn roots_path(base_dir: &Path) -> PathBuf {
        base_dir.join("roots.json")
    }

    fn seq_from_node_filename(name: &std::ffi::OsStr) -> Option<u64> {
        let name = name.to_str()?;
        let stem = name.strip_suffix(".json")?;
        stem.strip_prefix("node-")?.parse().ok()
    }

    async fn read_roots_file(base_dir: &Path) -> Result<Vec<RootData>> {
        let path = Self::roots_path(base_dir);
        match tokio::fs::read(&path).await {
            Ok(bytes) if bytes.is_empty() => Ok(Vec::new()),
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| ForestError::json(path.display().to_string(), e)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(ForestError::io(path, e)),
        }
    }

    async fn write_roots_file(&self, roots: &[RootData]) -> Result<()> {
        let path = Self::roots_path(&self.base_dir);
        let bytes = serde_json::to_vec_pretty(roots).map_err(|e| ForestError::json(path.display().to_string(), e))?;
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| ForestError::io(path, e))
    }

    async fn node_sequencer(&self, root: &RootId) -> Arc<IdSequencer> {
        if let Some(seq) = self.node_sequencers.read().await.get(root) {
            return Arc::clone(seq);
        }
        let mut guard = self.node_sequencers.write().await;
        Arc::clone(
            guard
                .entry(root.clone())
                .or_insert_with(|| Arc::new(IdSequencer::default())),
        )
    }

    async fn invalidate_topology(&self) {
        *self.topology_cache.write().await = None;
    }

    fn to_record(node: &NodeData) -> Result<NodeRecord> {
        let digest = digest_json(&node.message)?;
        Ok(NodeRecord {
            node: node.clone(),
            digest,
        })
    }

    async fn read_node_file(&self, path: &Path) -> Result<Option<NodeData>> {
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(ForestError::io(path.to_path_buf(), e)),
        };
        let record: NodeRecord = serde_json::from_slice(&bytes)
            .map_err(|e| ForestError::json(path.display().to_string(), e))?;
        let expected = digest_json(&record.node.message)?;
        if expected != record.digest {
            warn!(path = %path.display(), "node digest mismatch on load");
            return Err(ForestError::consistency(
                record.node.id.to_string(),
                "stored digest does not match recomputed content digest",
            ));
        }
        record.node.message.validate()?;
        Ok(Some(record.node))
    }
}

#[async_trait]
impl Store for FileStore {
    async fn generate_root_id(&self) -> RootId {
        loop {
            let candidate = RootId::from_seq(self.root_sequencer.next_seq());
            if !self.base_dir.join(candidate.as_str()).exists() {
                return candidate;
            }
        }
    }

    async fn generate_node_id(&self, root: &RootId) -> NodeId {
        let sequencer = self.node_sequencer(root).await;
        loop {
            let candidate = NodeId::from_seq(root, sequencer.next_seq());
            let path = Self::node_path(&self.base_dir, root, &candidate);
            if !path.exists() {
                return candidate;
            }
        }
    }

    async fn save_root(&self, root: &RootData) -> Result<()> {
        let mut cache = self.roots_cache.write().await;
        let roots = match cache.as_mut() {
            Some(roots) => roots,
            None => {
                *cache = Some(Self::read_roots_file(&self.base_dir).await?);
                cache.as_mut().expect("just populated")
            }
        };
        if let Some(existing) = roots.iter_mut().find(|r| r.id == root.id) {
            *existing = root.clone();
        } else {
            roots.push(root.clone());
        }
        self.write_roots_file(roots).await?;
        tokio::fs::create_dir_all(Self::nodes_dir(&self.base_dir, &root.id))
            .await
            .map_err(|e| ForestError::io(self.base_dir.clone(), e))?;
        drop(cache);
        self.invalidate_topology().await;
        debug!(root = %root.id, "saved root");
        Ok(())
    }

    async fn load_root(&self, id: &RootId) -> Result<Option<RootData>> {
        if self.roots_cache.read().await.is_none() {
            let roots = Self::read_roots_file(&self.base_dir).await?;
            *self.roots_cache.write().await = Some(roots);
        }
        Ok(self
            .roots_cache
            .read()
            .await
            .as_ref()
            .expect("populated above")
            .iter()
            .find(|r| &r.id == id)
            .cloned())
    }

    async fn list_roots(&self) -> Result<Vec<RootData>> {
        if self.roots_cache.read().await.is_none() {
            let roots = Self::read_roots_file(&self.base_dir).await?;
            *self.roots_cache.write().await = Some(roots);
        }
        Ok(self
            .roots_cache
            .read()
            .await
            .as_ref()
            .expect("populated above")
            .clone())
    }

    async fn save_node(&self, node: &NodeData) -> Result<()> {
        node.message.validate()?;
        let path = Self::node_path(&self.base_dir, &node.root_id, &node.id);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| ForestError::io(parent.to_path_buf(), e))?;
        }
        let record = Self::to_record(node)?;
        let bytes = serde_json::to_vec_pretty(&record).map_err(|e| ForestError::json(path.display().to_string(), e))?;
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| ForestError::io(path, e))?;
        self.invalidate_topology().await;
        debug!(node = %node.id, "saved node");
        Ok(())
    }

    async fn load_node(&self, id: &NodeId) -> Result<Option<NodeData>> {
        let path = Self::node_path(&self.base_dir, &id.root_id(), id);
        self.read_node_file(&path).await
    }

    async fn load_any(&self, id: &str) -> Result<Option<Node>> {
        if id.contains('/') {
            let node_id = NodeId::from_raw(id.to_string());
            return Ok(self.load_node(&node_id).await?.map(Node::Node));
        }
        let root_id = RootId::from_raw(id.to_string());
        Ok(self.load_root(&root_id).await?.map(Node::Root))
    }

    async fn delete_node(&self, id: &NodeId) -> Result<()> {
        let path = Self::node_path(&self.base_dir, &id.root_id(), id);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(ForestError::io(path, e)),
        }
        self.invalidate_topology().await;
        debug!(node = %id, "deleted node");
        Ok(())
    }

    async fn find_nodes(&self, root_id: &RootId, parent_id: Option<&NodeId>) -> Result<Vec<NodeData>> {
        let dir = Self::nodes_dir(&self.base_dir, root_id);
        let mut out = Vec::new();
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(out),
            Err(e) => return Err(ForestError::io(dir, e)),
        };
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| ForestError::io(dir.clone(), e))?
        {
            if let Some(node) = self.read_node_file(&entry.path()).await? {
                if parent_id.map_or(true, |p| &node.parent_id == p) {
                    out.push(node);
                }
            }
        }
        Ok(out)
    }

    async fn list_all_node_structures(&self) -> Result<Vec<NodeStructure>> {
        if let Some(cached) = self.topology_cache.read().await.as_ref() {
            return Ok(cached.clone());
        }
        let mut out = Vec::new();
        for root in self.list_roots().await? {
            out.push(NodeStructure {
                id: root.id.to_string(),
                parent_id: None,
                child_ids: root.child_ids.iter().map(ToString::to_string).collect(),
                root_id: root.id.to_string(),
                timestamp: root.created_at,
                role: "system".to_string(),
            });
            for node in self.find_nodes(&root.id, None).await? {
                out.push(NodeStructure {
                    id: node.id.to_string(),
                    parent_id: Some(node.parent_id.to_string()),
                    child_ids: node.child_ids.iter().map(ToString::to_string).collect(),
                    root_id: node.root_id.to_string(),
                    timestamp: node.metadata.timestamp,
                    role: role_label(&node).to_string(),
                });
            }
        }
        *self.topology_cache.write().await = Some(out.clone());
        Ok(out)
    }
}

fn role_label(node: &NodeData) -> &'static str {
    match &node.message {
        crate::message::Message::User { .. } => "user",
        crate::message::Message::Assistant { .. } => "assistant",
        crate::message::Message::Tool { .. } => "tool",
    }
}

/// Convenience for creating a [`RootData`] with a fresh id and timestamp.
#[must_use]
pub fn new_root_data(id: RootId, config: crate::types::RootConfig) -> RootData {
    RootData::new(id, config, Utc::now())
}
