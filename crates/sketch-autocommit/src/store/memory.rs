//! In-process store with the same compare-and-swap rules as the hosted one.
//!
//! Revision tokens are blake3 digests over a global write sequence and the
//! content, so rewriting identical content still issues a new token.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use super::{CommitInfo, RevisionToken, SourceStore, StoredSource};
use crate::errors::StoreError;

#[derive(Debug, Clone)]
struct Entry {
    content: String,
    revision: RevisionToken,
}

/// A single commit as recorded by `MemoryStore`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryCommit {
    pub path: String,
    pub message: String,
    pub revision: RevisionToken,
}

#[derive(Debug, Default)]
struct Inner {
    docs: HashMap<String, Entry>,
    history: Vec<MemoryCommit>,
    sequence: u64,
}

impl Inner {
    fn write(&mut self, path: &str, message: &str, content: &str) -> CommitInfo {
        self.sequence += 1;
        let mut hasher = blake3::Hasher::new();
        hasher.update(&self.sequence.to_le_bytes());
        hasher.update(path.as_bytes());
        hasher.update(content.as_bytes());
        let revision = RevisionToken::new(hasher.finalize().to_hex().to_string());

        self.docs.insert(
            path.to_string(),
            Entry {
                content: content.to_string(),
                revision: revision.clone(),
            },
        );
        self.history.push(MemoryCommit {
            path: path.to_string(),
            message: message.to_string(),
            revision: revision.clone(),
        });
        CommitInfo {
            commit_id: Some(format!("mem-{}", self.sequence)),
            revision,
        }
    }
}

/// Thread-safe in-memory `SourceStore`.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a document, returning its revision token.
    pub fn seed(&self, path: &str, content: &str) -> RevisionToken {
        let mut inner = self.lock();
        inner.write(path, "seed", content).revision
    }

    /// Current content at `path`, bypassing the async API.
    pub fn content(&self, path: &str) -> Option<String> {
        self.lock().docs.get(path).map(|e| e.content.clone())
    }

    /// Every successful write, oldest first (seeds included).
    pub fn history(&self) -> Vec<MemoryCommit> {
        self.lock().history.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // Every write completes under the lock, so a poisoned map is intact.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl SourceStore for MemoryStore {
    async fn get(&self, path: &str) -> Result<Option<StoredSource>, StoreError> {
        Ok(self.lock().docs.get(path).map(|e| StoredSource {
            content: e.content.clone(),
            revision: e.revision.clone(),
        }))
    }

    async fn update(
        &self,
        path: &str,
        message: &str,
        content: &str,
        expected: &RevisionToken,
    ) -> Result<CommitInfo, StoreError> {
        let mut inner = self.lock();
        let current = inner
            .docs
            .get(path)
            .is_some_and(|entry| entry.revision == *expected);
        if !current {
            return Err(StoreError::Conflict {
                path: path.to_string(),
                expected: expected.to_string(),
            });
        }
        Ok(inner.write(path, message, content))
    }

    async fn create(
        &self,
        path: &str,
        message: &str,
        content: &str,
    ) -> Result<CommitInfo, StoreError> {
        let mut inner = self.lock();
        if inner.docs.contains_key(path) {
            return Err(StoreError::AlreadyExists {
                path: path.to_string(),
            });
        }
        Ok(inner.write(path, message, content))
    }
}
