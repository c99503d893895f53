// Copyright (c) 2025 Chetan Conikee <conikee@gmail.com>
// Licensed under the MIT License

//! The bookmark list: a user-visible set of named pointers onto nodes,
//! owned by the Config collaborator but mutated by the Forest under its
//! edit/delete coupling rules (§4.3).

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use crate::error::{ForestError, Result};
use crate::ids::{NodeId, RootId};
use crate::types::Bookmark;

/// Storage for the bookmark list.
///
/// Implementations must be `Send + Sync`: the Forest calls into a
/// `BookmarkStore` from inside its own serialized section, so any
/// implementation is shared across whatever concurrency the embedding
/// application has.
#[async_trait]
pub trait BookmarkStore: Send + Sync {
    /// Lists every bookmark, in no particular order.
    async fn list(&self) -> Result<Vec<Bookmark>>;

    /// Creates a new bookmark at `node_id` titled `title`.
    async fn add(&self, title: String, root_id: RootId, node_id: NodeId) -> Result<Bookmark>;

    /// Removes any bookmark pointing at `node_id`. A no-op if none exists.
    async fn remove(&self, node_id: &NodeId) -> Result<()>;

    /// Finds the bookmark pointing at `node_id`, if any.
    async fn find_by_node(&self, node_id: &NodeId) -> Result<Option<Bookmark>>;

    /// Moves any bookmark pointing at `old` to point at `new`, bumping
    /// `updated_at` and preserving `created_at` and `title`. A no-op if no
    /// bookmark pointed at `old`.
    async fn rename_node(&self, old: &NodeId, new: &NodeId) -> Result<()>;
}

/// The reference `BookmarkStore`: a flat `bookmarks.json` file beside the
/// store root. Deliberately the simplest correct implementation — bookmark
/// persistence is an external collaborator's concern, not a tuned database.
pub struct FileBookmarkStore {
    path: PathBuf,
    bookmarks: RwLock<Vec<Bookmark>>,
}

impl FileBookmarkStore {
    /// Opens (or lazily creates on first write) a bookmark store backed by
    /// `path`. A missing or unparsable file starts from an empty list.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let bookmarks = Self::read_file(&path).await;
        Ok(Self {
            path,
            bookmarks: RwLock::new(bookmarks),
        })
    }

    async fn read_file(path: &Path) -> Vec<Bookmark> {
        let Ok(bytes) = tokio::fs::read(path).await else {
            return Vec::new();
        };
        serde_json::from_slice(&bytes).unwrap_or_default()
    }

    async fn persist(&self, bookmarks: &[Bookmark]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| ForestError::io(parent.to_path_buf(), e))?;
        }
        let bytes = serde_json::to_vec_pretty(bookmarks)
            .map_err(|e| ForestError::json(self.path.display().to_string(), e))?;
        tokio::fs::write(&self.path, bytes)
            .await
            .map_err(|e| ForestError::io(self.path.clone(), e))
    }
}

#[async_trait]
impl BookmarkStore for FileBookmarkStore {
    async fn list(&self) -> Result<Vec<Bookmark>> {
        Ok(self.bookmarks.read().await.clone())
    }

    async fn add(&self, title: String, root_id: RootId, node_id: NodeId) -> Result<Bookmark> {
        let now = Utc::now();
        let bookmark = Bookmark {
            title,
            root_id,
            node_id,
            created_at: now,
            updated_at: now,
        };
        let mut guard = self.bookmarks.write().await;
        guard.push(bookmark.clone());
        self.persist(&guard).await?;
        Ok(bookmark)
    }

    async fn remove(&self, node_id: &NodeId) -> Result<()> {
        let mut guard = self.bookmarks.write().await;
        let before = guard.len();
        guard.retain(|b| &b.node_id != node_id);
        if guard.len() != before {
            self.persist(&guard).await?;
        }
        Ok(())
    }

    async fn find_by_node(&self, node_id: &NodeId) -> Result<Option<Bookmark>> {
        Ok(self
            .bookmarks
            .read()
            .await
            .iter()
            .find(|b| &b.node_id == node_id)
            .cloned())
    }

    async fn rename_node(&self, old: &NodeId, new: &NodeId) -> Result<()> {
        let mut guard = self.bookmarks.write().await;
        let mut changed = false;
        for bookmark in guard.iter_mut() {
            if &bookmark.node_id == old {
                bookmark.node_id = new.clone();
                bookmark.updated_at = Utc::now();
                changed = true;
            }
        }
        if changed {
            self.persist(&guard).await?;
        }
        Ok(())
    }
}
