//! Source-hosting store seam.
//!
//! The store is an opaque versioned blob store. Every document has a revision
//! token issued by the store; `update` is a compare-and-swap on that token and
//! `create` refuses to overwrite. Those two rules are the only protection
//! against two runs clobbering each other.
//!
//! ## Implementations
//!
//! | Type          | Backing                         |
//! |---------------|---------------------------------|
//! | `GitHubStore` | GitHub contents API over HTTPS  |
//! | `MemoryStore` | in-process map, blake3 revisions |

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::errors::StoreError;

pub mod github;
pub mod memory;

pub use github::GitHubStore;
pub use memory::MemoryStore;

/// Opaque revision token issued by the store.
///
/// Never derived or edited locally: it is carried from `get` to `update`
/// exactly as received.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RevisionToken(String);

impl RevisionToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RevisionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A document as currently held by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredSource {
    pub content: String,
    pub revision: RevisionToken,
}

/// What a successful write produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitInfo {
    /// Revision token of the newly written document.
    pub revision: RevisionToken,
    /// Commit identifier, when the store has one.
    pub commit_id: Option<String>,
}

/// Versioned document store.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SourceStore: Send + Sync {
    /// Current document at `path`, or `None` if there is none.
    async fn get(&self, path: &str) -> Result<Option<StoredSource>, StoreError>;

    /// Replace the document at `path` if its revision is still `expected`.
    ///
    /// # Errors
    ///
    /// `StoreError::Conflict` when `expected` is stale.
    async fn update(
        &self,
        path: &str,
        message: &str,
        content: &str,
        expected: &RevisionToken,
    ) -> Result<CommitInfo, StoreError>;

    /// Create the document at `path`.
    ///
    /// # Errors
    ///
    /// `StoreError::AlreadyExists` when something is already there.
    async fn create(&self, path: &str, message: &str, content: &str)
        -> Result<CommitInfo, StoreError>;
}

/// Lets several pipelines share one store.
#[async_trait]
impl<T: SourceStore + ?Sized> SourceStore for Arc<T> {
    async fn get(&self, path: &str) -> Result<Option<StoredSource>, StoreError> {
        (**self).get(path).await
    }

    async fn update(
        &self,
        path: &str,
        message: &str,
        content: &str,
        expected: &RevisionToken,
    ) -> Result<CommitInfo, StoreError> {
        (**self).update(path, message, content, expected).await
    }

    async fn create(
        &self,
        path: &str,
        message: &str,
        content: &str,
    ) -> Result<CommitInfo, StoreError> {
        (**self).create(path, message, content).await
    }
}
