// Copyright (c) 2025 Chetan Conikee <conikee@gmail.com>
// Licensed under the MIT License

//! The Forest: the sole writer to the Store for tree operations.
//!
//! Every mutating operation is serialized through a single held
//! [`tokio::sync::Mutex`], giving each logical operation read-your-own-writes
//! semantics and FIFO ordering across concurrent callers. `edit_node_content`
//! calls `split_node` and `append` internally; those calls go through
//! `*_locked` inner variants that assume the guard is already held, so the
//! public entry points never deadlock against themselves.

use std::collections::{BTreeMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{debug, instrument};

use crate::bookmark::BookmarkStore;
use crate::error::{ForestError, Result};
use crate::ids::{NodeId, RootId};
use crate::message::{compare_normal, normal_forms_equal, ContentBlock, Message};
use crate::store::Store;
use crate::types::{Node, NodeData, NodeMetadata, RootConfig, RootData, SourceInfo};

/// A boxed, pinned future, used to give recursive tree-walking methods a
/// finite-sized stack frame.
type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Metadata supplied by a caller of [`Forest::append`], before the Forest
/// fills in `timestamp` and `original_root_id`.
#[derive(Debug, Clone)]
pub struct MetadataSeed {
    /// The provenance of the messages being appended.
    pub source_info: SourceInfo,
    /// Free-form labels to attach to every node this call creates.
    pub tags: Vec<String>,
    /// Free-form structured data to attach to every node this call creates.
    pub custom_data: Option<serde_json::Value>,
}

impl MetadataSeed {
    /// Builds a seed carrying only `source_info`, no tags or custom data.
    #[must_use]
    pub fn new(source_info: SourceInfo) -> Self {
        Self {
            source_info,
            tags: Vec::new(),
            custom_data: None,
        }
    }
}

/// A rendered subtree, as returned by [`Forest::get_subtree`] and used by
/// [`Forest::serialize`].
#[derive(Debug, Clone, serde::Serialize)]
pub struct SerializedNode {
    /// This node's (or root's) id.
    pub id: String,
    /// The role of the underlying message, or `"system"` for a root.
    pub role: String,
    /// The node's message, absent for a root.
    pub message: Option<Message>,
    /// This node's children, recursively rendered.
    pub children: Vec<SerializedNode>,
}

/// The tree algebra over a [`Store`] and a [`BookmarkStore`].
///
/// Cloning a `Forest` is cheap and shares the same underlying mutex, store,
/// and bookmark store — intended usage is one `Forest` per process, cloned
/// into whatever tasks need it.
#[derive(Clone)]
pub struct Forest {
    store: Arc<dyn Store>,
    bookmarks: Arc<dyn BookmarkStore>,
    lock: Arc<Mutex<()>>,
}

impl Forest {
    /// Builds a Forest over the given store and bookmark collaborator.
    #[must_use]
    pub fn new(store: Arc<dyn Store>, bookmarks: Arc<dyn BookmarkStore>) -> Self {
        Self {
            store,
            bookmarks,
            lock: Arc::new(Mutex::new(())),
        }
    }

    /// Returns the first non-deleted root whose config is structurally
    /// equal to `config`, or creates and persists a new one.
    #[instrument(skip(self, config))]
    pub async fn get_or_create_root(&self, config: RootConfig) -> Result<RootData> {
        let _guard = self.lock.lock().await;
        for root in self.store.list_roots().await? {
            if !root.deleted && root.config == config {
                return Ok(root);
            }
        }
        let id = self.store.generate_root_id().await;
        let root = RootData::new(id, config, Utc::now());
        self.store.save_root(&root).await?;
        debug!(root = %root.id, "created root");
        Ok(root)
    }

    /// Loads a node by id.
    pub async fn get_node(&self, id: &NodeId) -> Result<NodeData> {
        self.store
            .load_node(id)
            .await?
            .ok_or_else(|| ForestError::node_not_found(id.to_string()))
    }

    /// Loads a root by id.
    pub async fn get_root(&self, id: &RootId) -> Result<RootData> {
        self.store
            .load_root(id)
            .await?
            .ok_or_else(|| ForestError::node_not_found(id.to_string()))
    }

    /// Walks from `to` upward via `parent_id` until `from` is reached
    /// (inclusive) or the root is hit. Returns the root and the path of
    /// nodes in root-to-leaf order (the root itself is not in the path).
    pub async fn get_path(&self, from: Option<&NodeId>, to: &NodeId) -> Result<(RootData, Vec<NodeData>)> {
        let mut path = Vec::new();
        let mut visited: HashSet<String> = HashSet::new();
        let mut current = self.get_node(to).await?;

        loop {
            if !visited.insert(current.id.to_string()) {
                return Err(ForestError::circular_reference(current.id.to_string()));
            }
            path.push(current.clone());

            if let Some(boundary) = from {
                if &current.id == boundary {
                    break;
                }
            }

            if !current.parent_id.is_node_shaped() {
                let root_id = RootId::from_raw(current.parent_id.as_str());
                let root = self.get_root(&root_id).await?;
                path.reverse();
                return Ok((root, path));
            }

            let parent_id = current.parent_id.clone();
            current = self.get_node(&parent_id).await?;
        }

        let root_id = current.root_id.clone();
        let root = self.get_root(&root_id).await?;
        path.reverse();
        Ok((root, path))
    }

    /// Convenience over `get_path({from: None, to: node_id})`: the root and
    /// the messages along the path to `node_id`.
    pub async fn get_messages(&self, node_id: &NodeId) -> Result<(RootData, Vec<Message>)> {
        let (root, path) = self.get_path(None, node_id).await?;
        Ok((root, path.into_iter().map(|n| n.message).collect()))
    }

    /// Returns the direct children of `id` within its root. `id` may name
    /// either a node or a root.
    pub async fn get_children(&self, id: &NodeId) -> Result<Vec<NodeData>> {
        self.store.find_nodes(&self.resolve_root_id(id), Some(id)).await
    }

    /// Returns the siblings of `id`: the children of its parent, minus `id`
    /// itself.
    pub async fn get_siblings(&self, id: &NodeId) -> Result<Vec<NodeData>> {
        let node = self.get_node(id).await?;
        let mut siblings = self.store.find_nodes(&node.root_id, Some(&node.parent_id)).await?;
        siblings.retain(|n| n.id != *id);
        Ok(siblings)
    }

    /// Deduplicating tail-extension of the tree: appends `messages` under
    /// `parent_id`, reusing any existing child chain that already matches
    /// under [`compare_normal`] equality.
    #[instrument(skip(self, messages, seed))]
    pub async fn append(&self, parent_id: &NodeId, messages: Vec<Message>, seed: MetadataSeed) -> Result<Node> {
        let _guard = self.lock.lock().await;
        self.append_locked(parent_id, messages, seed).await
    }

    async fn append_locked(&self, parent_id: &NodeId, messages: Vec<Message>, seed: MetadataSeed) -> Result<Node> {
        let filtered: Vec<Message> = messages
            .into_iter()
            .filter(|m| compare_normal(m).is_some())
            .collect();

        if filtered.is_empty() {
            return self.load_any_or_not_found(parent_id.as_str()).await;
        }

        let mut current_parent_id = parent_id.clone();
        let root_id = self.resolve_root_id(parent_id);
        let mut index = 0;

        while index < filtered.len() {
            let children = self.store.find_nodes(&root_id, Some(&current_parent_id)).await?;
            let candidate_normal = compare_normal(&filtered[index]);
            let matched = children.into_iter().find(|child| {
                match (compare_normal(&child.message), &candidate_normal) {
                    (Some(a), Some(b)) => normal_forms_equal(&a, b),
                    (None, None) => true,
                    _ => false,
                }
            });
            match matched {
                Some(child) => {
                    current_parent_id = child.id;
                    index += 1;
                }
                None => break,
            }
        }

        if index == filtered.len() {
            return self.load_any_or_not_found(current_parent_id.as_str()).await;
        }

        let mut last_created = current_parent_id.clone();
        for message in &filtered[index..] {
            message.validate()?;
            let node_id = self.store.generate_node_id(&root_id).await;
            let metadata = NodeMetadata {
                timestamp: Utc::now(),
                original_root_id: root_id.clone(),
                source_info: seed.source_info.clone(),
                tags: seed.tags.clone(),
                custom_data: seed.custom_data.clone(),
                split_source: None,
            };
            let node = NodeData {
                id: node_id.clone(),
                root_id: root_id.clone(),
                parent_id: last_created.clone(),
                child_ids: Vec::new(),
                message: message.clone(),
                metadata,
            };
            self.store.save_node(&node).await?;
            self.link_child(&root_id, &last_created, &node_id).await?;
            last_created = node_id;
        }

        debug!(parent = %parent_id, tail = %last_created, "appended");
        self.load_any_or_not_found(last_created.as_str()).await
    }

    fn resolve_root_id(&self, id: &NodeId) -> RootId {
        if id.is_node_shaped() {
            id.root_id()
        } else {
            RootId::from_raw(id.as_str())
        }
    }

    async fn link_child(&self, root_id: &RootId, parent_id: &NodeId, child_id: &NodeId) -> Result<()> {
        if parent_id.is_node_shaped() {
            let mut parent = self.get_node(parent_id).await?;
            parent.child_ids.push(child_id.clone());
            self.store.save_node(&parent).await
        } else {
            let mut root = self
                .store
                .load_root(root_id)
                .await?
                .ok_or_else(|| ForestError::node_not_found(root_id.to_string()))?;
            root.child_ids.push(child_id.clone());
            self.store.save_root(&root).await
        }
    }

    async fn load_any_or_not_found(&self, id: &str) -> Result<Node> {
        self.store
            .load_any(id)
            .await?
            .ok_or_else(|| ForestError::node_not_found(id.to_string()))
    }

    /// Splits a node's single-text-block message at character offset
    /// `position`, inserting a new "left" predecessor that takes the text
    /// prefix. Returns the new left node.
    #[instrument(skip(self))]
    pub async fn split_node(&self, node_id: &NodeId, position: usize) -> Result<NodeData> {
        let _guard = self.lock.lock().await;
        self.split_node_locked(node_id, position).await
    }

    async fn split_node_locked(&self, node_id: &NodeId, position: usize) -> Result<NodeData> {
        let node = self.get_node(node_id).await?;
        let text = single_text_block(&node.message)?;
        let len = text.chars().count();
        if position == 0 || position >= len {
            return Err(ForestError::invalid_split_position(position, len));
        }
        let (prefix, suffix) = split_text_at(text, position);

        let left_id = self.store.generate_node_id(&node.root_id).await;
        let left_message = replace_text(&node.message, prefix);
        let left_metadata = NodeMetadata {
            timestamp: Utc::now(),
            original_root_id: node.metadata.original_root_id.clone(),
            source_info: node.metadata.source_info.clone(),
            tags: node.metadata.tags.clone(),
            custom_data: node.metadata.custom_data.clone(),
            split_source: Some(node.id.clone()),
        };
        let left = NodeData {
            id: left_id.clone(),
            root_id: node.root_id.clone(),
            parent_id: node.parent_id.clone(),
            child_ids: vec![node.id.clone()],
            message: left_message,
            metadata: left_metadata,
        };
        self.store.save_node(&left).await?;

        self.link_child(&node.root_id, &node.parent_id, &left_id).await?;
        self.unlink_child(&node.root_id, &node.parent_id, &node.id).await?;

        let mut updated = node.clone();
        updated.parent_id = left_id.clone();
        updated.message = replace_text(&node.message, suffix);
        self.store.save_node(&updated).await?;

        debug!(node = %node_id, left = %left_id, "split node");
        Ok(left)
    }

    async fn unlink_child(&self, root_id: &RootId, parent_id: &NodeId, child_id: &NodeId) -> Result<()> {
        if parent_id.is_node_shaped() {
            let mut parent = self.get_node(parent_id).await?;
            parent.child_ids.retain(|id| id != child_id);
            self.store.save_node(&parent).await
        } else {
            let mut root = self
                .store
                .load_root(root_id)
                .await?
                .ok_or_else(|| ForestError::node_not_found(root_id.to_string()))?;
            root.child_ids.retain(|id| id != child_id);
            self.store.save_root(&root).await
        }
    }

    /// Edits a node's text content, branching through `split_node`/`append`
    /// as needed to preserve sibling content, and moving any bookmark that
    /// pointed at the old node.
    #[instrument(skip(self, new_text))]
    pub async fn edit_node_content(&self, node_id: &NodeId, new_text: &str) -> Result<NodeData> {
        let _guard = self.lock.lock().await;

        let node = match self.store.load_any(node_id.as_str()).await? {
            Some(Node::Node(n)) => n,
            _ => return Err(ForestError::node_not_found_or_root(node_id.to_string())),
        };
        let old_text = single_text_block(&node.message)?;
        if let Message::Assistant { content } = &node.message {
            if content.iter().any(ContentBlock::is_tool_use) {
                return Err(ForestError::cannot_edit_tool_use_message(node_id.to_string()));
            }
        }

        let lcp = common_prefix_len(old_text, new_text);
        let old_len = old_text.chars().count();

        if node.child_ids.is_empty() {
            let mut updated = node.clone();
            updated.message = replace_text(&node.message, new_text);
            updated.metadata.source_info = SourceInfo::User;
            self.store.save_node(&updated).await?;
            return Ok(updated);
        }

        let base_id: NodeId;
        if lcp == 0 {
            base_id = node.parent_id.clone();
        } else if lcp < old_len {
            let left = self.split_node_locked(node_id, lcp).await?;
            base_id = left.id;
        } else {
            base_id = node.id.clone();
        }

        let new_chars: Vec<char> = new_text.chars().collect();
        let suffix: String = new_chars[lcp.min(new_chars.len())..].iter().collect();

        if suffix.is_empty() {
            return match self.load_any_or_not_found(base_id.as_str()).await? {
                Node::Node(n) => Ok(n),
                Node::Root(r) => Err(ForestError::node_not_found_or_root(r.id.to_string())),
            };
        }

        let branch_message = replace_text(&node.message, &suffix);
        let result = self
            .append_locked(&base_id, vec![branch_message], MetadataSeed::new(SourceInfo::User))
            .await?;
        let result_id = match &result {
            Node::Node(n) => n.id.clone(),
            Node::Root(r) => NodeId::from_raw(r.id.to_string()),
        };
        if &result_id != node_id {
            self.bookmarks.rename_node(node_id, &result_id).await?;
        }
        match result {
            Node::Node(n) => Ok(n),
            Node::Root(_) => Err(ForestError::node_not_found_or_root(result_id.to_string())),
        }
    }

    /// Deletes `node_id`. With `reparent=true` the node's children are
    /// re-attached to its grandparent; otherwise the whole subtree rooted
    /// at `node_id` is deleted. Returns the (former) parent, or `None` if
    /// `node_id` did not exist.
    #[instrument(skip(self))]
    pub async fn delete_node(&self, node_id: &NodeId, reparent: bool) -> Result<Option<Node>> {
        let _guard = self.lock.lock().await;
        self.delete_node_locked(node_id, reparent).await
    }

    async fn delete_node_locked(&self, node_id: &NodeId, reparent: bool) -> Result<Option<Node>> {
        let node = match self.store.load_node(node_id).await? {
            Some(n) => n,
            None => return Ok(None),
        };
        let root_id = node.root_id.clone();
        let parent_id = node.parent_id.clone();

        if reparent {
            for child_id in &node.child_ids {
                let mut child = self.get_node(child_id).await?;
                child.parent_id = parent_id.clone();
                self.store.save_node(&child).await?;
            }
            self.unlink_child(&root_id, &parent_id, node_id).await?;
            if parent_id.is_node_shaped() {
                let mut parent = self.get_node(&parent_id).await?;
                for child_id in &node.child_ids {
                    if !parent.child_ids.contains(child_id) {
                        parent.child_ids.push(child_id.clone());
                    }
                }
                self.store.save_node(&parent).await?;
            } else {
                let mut root = self
                    .store
                    .load_root(&root_id)
                    .await?
                    .ok_or_else(|| ForestError::node_not_found(root_id.to_string()))?;
                for child_id in &node.child_ids {
                    if !root.child_ids.contains(child_id) {
                        root.child_ids.push(child_id.clone());
                    }
                }
                self.store.save_root(&root).await?;
            }
            self.store.delete_node(node_id).await?;
            self.bookmarks.remove(node_id).await?;
        } else {
            let mut descendants = Vec::new();
            self.collect_descendants(node_id, &mut descendants).await?;
            for id in &descendants {
                self.store.delete_node(id).await?;
                self.bookmarks.remove(id).await?;
            }
            self.store.delete_node(node_id).await?;
            self.bookmarks.remove(node_id).await?;
            self.unlink_child(&root_id, &parent_id, node_id).await?;
        }

        debug!(node = %node_id, reparent, "deleted node");
        self.load_any_or_not_found(parent_id.as_str()).await.map(Some)
    }

    fn collect_descendants<'a>(&'a self, node_id: &'a NodeId, out: &'a mut Vec<NodeId>) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let node = self.get_node(node_id).await?;
            for child_id in node.child_ids.clone() {
                out.push(child_id.clone());
                self.collect_descendants(&child_id, out).await?;
            }
            Ok(())
        })
    }

    /// Deletes each id in `ids` serially, without reparenting.
    pub async fn delete_nodes(&self, ids: &[NodeId]) -> Result<()> {
        let _guard = self.lock.lock().await;
        for id in ids {
            self.delete_node_locked(id, false).await?;
        }
        Ok(())
    }

    /// Replaces the metadata of an existing non-root node.
    pub async fn update_node_metadata(&self, node_id: &NodeId, metadata: NodeMetadata) -> Result<NodeData> {
        let _guard = self.lock.lock().await;
        let mut node = self.get_node(node_id).await?;
        node.metadata = metadata;
        self.store.save_node(&node).await?;
        Ok(node)
    }

    /// Read-only diagnostic dump: every root's tree, rendered recursively.
    pub async fn serialize(&self) -> Result<BTreeMap<String, SerializedNode>> {
        let mut out = BTreeMap::new();
        for root in self.store.list_roots().await? {
            let rendered = self.render_subtree(&root.id, &NodeId::from_raw(root.id.to_string())).await?;
            out.insert(root.id.to_string(), rendered);
        }
        Ok(out)
    }

    /// Returns the subtree rooted at `id`, optionally bounded to `depth`
    /// levels.
    pub async fn get_subtree(&self, id: &NodeId, depth: Option<usize>) -> Result<SerializedNode> {
        let root_id = if id.is_node_shaped() {
            id.root_id()
        } else {
            RootId::from_raw(id.as_str())
        };
        self.render_subtree_bounded(&root_id, id, depth).await
    }

    async fn render_subtree(&self, root_id: &RootId, id: &NodeId) -> Result<SerializedNode> {
        self.render_subtree_bounded(root_id, id, None).await
    }

    fn render_subtree_bounded<'a>(
        &'a self,
        root_id: &'a RootId,
        id: &'a NodeId,
        depth: Option<usize>,
    ) -> BoxFuture<'a, Result<SerializedNode>> {
        Box::pin(async move {
            let (role, message, child_ids) = if id.is_node_shaped() {
                let node = self.get_node(id).await?;
                (role_of(&node.message), Some(node.message), node.child_ids)
            } else {
                let root = self.get_root(root_id).await?;
                ("system".to_string(), None, root.child_ids)
            };

            let mut children = Vec::new();
            if depth != Some(0) {
                let next_depth = depth.map(|d| d - 1);
                for child_id in &child_ids {
                    children.push(self.render_subtree_bounded(root_id, child_id, next_depth).await?);
                }
            }

            Ok(SerializedNode {
                id: id.to_string(),
                role,
                message,
                children,
            })
        })
    }

    /// Returns the `k` most recently created leaf nodes (nodes with no
    /// children) across every root, newest first.
    pub async fn list_recent_leaves(&self, k: usize) -> Result<Vec<NodeData>> {
        let mut leaves = Vec::new();
        for root in self.store.list_roots().await? {
            for node in self.store.find_nodes(&root.id, None).await? {
                if node.child_ids.is_empty() {
                    leaves.push(node);
                }
            }
        }
        leaves.sort_by(|a, b| b.metadata.timestamp.cmp(&a.metadata.timestamp));
        leaves.truncate(k);
        Ok(leaves)
    }
}

fn role_of(message: &Message) -> String {
    match message {
        Message::User { .. } => "user".to_string(),
        Message::Assistant { .. } => "assistant".to_string(),
        Message::Tool { .. } => "tool".to_string(),
    }
}

fn single_text_block(message: &Message) -> Result<&str> {
    match message.content() {
        [ContentBlock::Text { text }] => Ok(text.as_str()),
        _ => Err(ForestError::empty_content(
            "split/edit requires a single-text-block message",
        )),
    }
}

fn replace_text(message: &Message, text: &str) -> Message {
    let block = ContentBlock::Text { text: text.to_string() };
    match message {
        Message::User { .. } => Message::User { content: vec![block] },
        Message::Assistant { .. } => Message::Assistant { content: vec![block] },
        Message::Tool { tool_call_id, .. } => Message::Tool {
            tool_call_id: tool_call_id.clone(),
            content: vec![block],
        },
    }
}

fn split_text_at(text: &str, position: usize) -> (&str, &str) {
    let byte_offset = text
        .char_indices()
        .nth(position)
        .map_or(text.len(), |(idx, _)| idx);
    text.split_at(byte_offset)
}

fn common_prefix_len(a: &str, b: &str) -> usize {
    a.chars().zip(b.chars()).take_while(|(x, y)| x == y).count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bookmark::FileBookmarkStore;
    use crate::store::FileStore;
    use tempfile::TempDir;

    async fn new_forest() -> (TempDir, Forest) {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(FileStore::open(dir.path().join("store")).await.unwrap());
        let bookmarks = Arc::new(
            FileBookmarkStore::open(dir.path().join("bookmarks.json"))
                .await
                .unwrap(),
        );
        (dir, Forest::new(store, bookmarks))
    }

    fn user(text: &str) -> Message {
        Message::User {
            content: vec![ContentBlock::Text { text: text.to_string() }],
        }
    }

    fn assistant(text: &str) -> Message {
        Message::Assistant {
            content: vec![ContentBlock::Text { text: text.to_string() }],
        }
    }

    #[tokio::test]
    async fn get_or_create_root_dedupes_by_config() {
        let (_dir, forest) = new_forest().await;
        let a = forest
            .get_or_create_root(RootConfig { system_prompt: Some("be brief".into()) })
            .await
            .unwrap();
        let b = forest
            .get_or_create_root(RootConfig { system_prompt: Some("be brief".into()) })
            .await
            .unwrap();
        assert_eq!(a.id, b.id);
    }

    #[tokio::test]
    async fn append_empty_returns_parent() {
        let (_dir, forest) = new_forest().await;
        let root = forest.get_or_create_root(RootConfig::default()).await.unwrap();
        let parent_ref = NodeId::from_raw(root.id.to_string());
        let result = forest
            .append(&parent_ref, vec![], MetadataSeed::new(SourceInfo::User))
            .await
            .unwrap();
        assert_eq!(result.id_string(), root.id.to_string());
    }

    #[tokio::test]
    async fn append_prefix_match_reuses_existing_chain() {
        let (_dir, forest) = new_forest().await;
        let root = forest.get_or_create_root(RootConfig::default()).await.unwrap();
        let parent_ref = NodeId::from_raw(root.id.to_string());

        let first = forest
            .append(
                &parent_ref,
                vec![user("hi"), assistant("world")],
                MetadataSeed::new(SourceInfo::User),
            )
            .await
            .unwrap();
        let second = forest
            .append(
                &parent_ref,
                vec![user("hi"), assistant("world")],
                MetadataSeed::new(SourceInfo::User),
            )
            .await
            .unwrap();
        assert_eq!(first.id_string(), second.id_string());
    }

    #[tokio::test]
    async fn append_tool_param_key_order_is_irrelevant() {
        let (_dir, forest) = new_forest().await;
        let root = forest.get_or_create_root(RootConfig::default()).await.unwrap();
        let parent_ref = NodeId::from_raw(root.id.to_string());

        let mut params_a = serde_json::Map::new();
        params_a.insert("a".into(), serde_json::json!(1));
        params_a.insert("b".into(), serde_json::json!(2));
        let msg_a = Message::Assistant {
            content: vec![ContentBlock::ToolUse {
                id: "c1".into(),
                name: "sum".into(),
                parameters: params_a,
            }],
        };
        let first = forest
            .append(&parent_ref, vec![msg_a], MetadataSeed::new(SourceInfo::User))
            .await
            .unwrap();

        let mut params_b = serde_json::Map::new();
        params_b.insert("b".into(), serde_json::json!(2));
        params_b.insert("a".into(), serde_json::json!(1));
        let msg_b = Message::Assistant {
            content: vec![ContentBlock::ToolUse {
                id: "c1".into(),
                name: "sum".into(),
                parameters: params_b,
            }],
        };
        let second = forest
            .append(&parent_ref, vec![msg_b], MetadataSeed::new(SourceInfo::User))
            .await
            .unwrap();
        assert_eq!(first.id_string(), second.id_string());
    }

    #[tokio::test]
    async fn split_node_preserves_concatenated_text() {
        let (_dir, forest) = new_forest().await;
        let root = forest.get_or_create_root(RootConfig::default()).await.unwrap();
        let parent_ref = NodeId::from_raw(root.id.to_string());
        let node = forest
            .append(
                &parent_ref,
                vec![user("This is a long message")],
                MetadataSeed::new(SourceInfo::User),
            )
            .await
            .unwrap();
        let node_id = match node {
            Node::Node(n) => n.id,
            Node::Root(_) => panic!("expected node"),
        };

        let left = forest.split_node(&node_id, 15).await.unwrap();
        let suffix_node = forest.get_node(&node_id).await.unwrap();

        let left_text = single_text_block(&left.message).unwrap();
        let suffix_text = single_text_block(&suffix_node.message).unwrap();
        assert_eq!(format!("{left_text}{suffix_text}"), "This is a long message");
        assert_eq!(left.child_ids, vec![node_id.clone()]);
        assert_eq!(suffix_node.parent_id, left.id);
        assert_eq!(left.metadata.split_source, Some(node_id));
    }

    #[tokio::test]
    async fn edit_node_with_no_children_mutates_in_place() {
        let (_dir, forest) = new_forest().await;
        let root = forest.get_or_create_root(RootConfig::default()).await.unwrap();
        let parent_ref = NodeId::from_raw(root.id.to_string());
        let node = forest
            .append(&parent_ref, vec![user("hello")], MetadataSeed::new(SourceInfo::User))
            .await
            .unwrap();
        let node_id = match node {
            Node::Node(n) => n.id,
            Node::Root(_) => panic!("expected node"),
        };

        let edited = forest.edit_node_content(&node_id, "goodbye").await.unwrap();
        assert_eq!(edited.id, node_id);
        assert_eq!(single_text_block(&edited.message).unwrap(), "goodbye");
    }

    #[tokio::test]
    async fn edit_node_with_children_creates_branch_and_moves_bookmark() {
        let (_dir, forest) = new_forest().await;
        let root = forest.get_or_create_root(RootConfig::default()).await.unwrap();
        let parent_ref = NodeId::from_raw(root.id.to_string());

        let n1 = forest
            .append(
                &parent_ref,
                vec![user("Original message content")],
                MetadataSeed::new(SourceInfo::User),
            )
            .await
            .unwrap();
        let n1_id = match n1 {
            Node::Node(n) => n.id,
            Node::Root(_) => panic!("expected node"),
        };
        forest
            .append(&n1_id, vec![assistant("response")], MetadataSeed::new(SourceInfo::User))
            .await
            .unwrap();

        let bookmark = forest
            .bookmarks
            .add("checkpoint".into(), root.id.clone(), n1_id.clone())
            .await
            .unwrap();

        let edited = forest
            .edit_node_content(&n1_id, "Original message with new ending")
            .await
            .unwrap();

        assert_eq!(single_text_block(&edited.message).unwrap(), "with new ending");
        assert_ne!(edited.id, n1_id);

        let moved = forest.bookmarks.find_by_node(&edited.id).await.unwrap().unwrap();
        assert_eq!(moved.title, "checkpoint");
        assert_eq!(moved.created_at, bookmark.created_at);
        assert!(forest.bookmarks.find_by_node(&n1_id).await.unwrap().is_none());

        let original = forest.get_node(&n1_id).await.unwrap();
        assert_eq!(single_text_block(&original.message).unwrap(), "content");
    }

    #[tokio::test]
    async fn get_path_detects_circular_reference() {
        let (_dir, forest) = new_forest().await;
        let root = forest.get_or_create_root(RootConfig::default()).await.unwrap();
        let parent_ref = NodeId::from_raw(root.id.to_string());
        let node = forest
            .append(&parent_ref, vec![user("hi")], MetadataSeed::new(SourceInfo::User))
            .await
            .unwrap();
        let node_id = match node {
            Node::Node(n) => n.id,
            Node::Root(_) => panic!("expected node"),
        };

        let mut corrupted = forest.get_node(&node_id).await.unwrap();
        corrupted.parent_id = node_id.clone();
        forest.store.save_node(&corrupted).await.unwrap();

        let err = forest.get_path(None, &node_id).await.unwrap_err();
        assert!(matches!(err, ForestError::CircularReference { .. }));
    }

    #[tokio::test]
    async fn delete_node_without_reparent_removes_whole_subtree() {
        let (_dir, forest) = new_forest().await;
        let root = forest.get_or_create_root(RootConfig::default()).await.unwrap();
        let parent_ref = NodeId::from_raw(root.id.to_string());
        let n1 = forest
            .append(&parent_ref, vec![user("hi")], MetadataSeed::new(SourceInfo::User))
            .await
            .unwrap();
        let n1_id = match n1 {
            Node::Node(n) => n.id,
            Node::Root(_) => panic!("expected node"),
        };
        let n2 = forest
            .append(&n1_id, vec![assistant("there")], MetadataSeed::new(SourceInfo::User))
            .await
            .unwrap();
        let n2_id = match n2 {
            Node::Node(n) => n.id,
            Node::Root(_) => panic!("expected node"),
        };

        forest.delete_node(&n1_id, false).await.unwrap();
        assert!(forest.store.load_node(&n1_id).await.unwrap().is_none());
        assert!(forest.store.load_node(&n2_id).await.unwrap().is_none());
        let reloaded_root = forest.get_root(&root.id).await.unwrap();
        assert!(!reloaded_root.child_ids.contains(&n1_id));
    }

    #[tokio::test]
    async fn delete_node_with_reparent_promotes_children() {
        let (_dir, forest) = new_forest().await;
        let root = forest.get_or_create_root(RootConfig::default()).await.unwrap();
        let parent_ref = NodeId::from_raw(root.id.to_string());
        let n1 = forest
            .append(&parent_ref, vec![user("hi")], MetadataSeed::new(SourceInfo::User))
            .await
            .unwrap();
        let n1_id = match n1 {
            Node::Node(n) => n.id,
            Node::Root(_) => panic!("expected node"),
        };
        let n2 = forest
            .append(&n1_id, vec![assistant("there")], MetadataSeed::new(SourceInfo::User))
            .await
            .unwrap();
        let n2_id = match n2 {
            Node::Node(n) => n.id,
            Node::Root(_) => panic!("expected node"),
        };

        forest.delete_node(&n1_id, true).await.unwrap();
        let promoted = forest.get_node(&n2_id).await.unwrap();
        assert_eq!(promoted.parent_id, parent_ref);
        let reloaded_root = forest.get_root(&root.id).await.unwrap();
        assert!(reloaded_root.child_ids.contains(&n2_id));
        assert!(!reloaded_root.child_ids.contains(&n1_id));
    }

    #[tokio::test]
    async fn tree_soundness_and_child_parent_consistency() {
        let (_dir, forest) = new_forest().await;
        let root = forest.get_or_create_root(RootConfig::default()).await.unwrap();
        let parent_ref = NodeId::from_raw(root.id.to_string());
        let node = forest
            .append(
                &parent_ref,
                vec![user("hi"), assistant("there")],
                MetadataSeed::new(SourceInfo::User),
            )
            .await
            .unwrap();
        let leaf_id = match node {
            Node::Node(n) => n.id,
            Node::Root(_) => panic!("expected node"),
        };

        let (resolved_root, path) = forest.get_path(None, &leaf_id).await.unwrap();
        assert_eq!(resolved_root.id, root.id);
        assert_eq!(path.len(), 2);

        for node in &path {
            if node.parent_id.is_node_shaped() {
                let parent = forest.get_node(&node.parent_id).await.unwrap();
                assert!(parent.child_ids.contains(&node.id));
            } else {
                let parent_root = forest.get_root(&RootId::from_raw(node.parent_id.as_str())).await.unwrap();
                assert!(parent_root.child_ids.contains(&node.id));
            }
        }
    }
}
