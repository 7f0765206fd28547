//! Realtime document store
//!
//! Votes, the voting-period status and the remote allowlist all live as
//! JSON documents addressed by slash-separated paths. Stores push the full
//! current state of a watched document or collection on subscribe and after
//! every change.

mod memory;

pub use memory::MemoryStore;

use async_trait::async_trait;
use futures::stream::{self, Stream};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tokio::sync::broadcast::{
    self,
    error::{RecvError, TryRecvError},
};

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur when talking to the document store
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Document store unavailable: {0}")]
    Unavailable(String),

    #[error("Document serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Path of a single document, e.g. `artifacts/app/public_votes/uid`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DocPath(String);

impl DocPath {
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Last path segment
    pub fn id(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }

    /// Collection containing this document
    pub fn parent(&self) -> CollectionPath {
        match self.0.rsplit_once('/') {
            Some((parent, _)) => CollectionPath::new(parent),
            None => CollectionPath::new(""),
        }
    }
}

impl fmt::Display for DocPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Path of a collection, e.g. `artifacts/app/public_votes`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CollectionPath(String);

impl CollectionPath {
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn doc(&self, id: &str) -> DocPath {
        DocPath::new(format!("{}/{}", self.0, id))
    }
}

impl fmt::Display for CollectionPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A document as returned by collection reads
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: String,
    pub data: Value,
}

/// Every document of a collection at one point in time, ordered by id
pub type CollectionSnapshot = Arc<Vec<Document>>;

/// Live feed of snapshots. Dropping the handle unsubscribes.
pub struct Subscription<T> {
    initial: Option<T>,
    rx: broadcast::Receiver<T>,
    label: String,
}

impl<T: Clone + Send + 'static> Subscription<T> {
    pub fn new(initial: T, rx: broadcast::Receiver<T>, label: impl Into<String>) -> Self {
        Self {
            initial: Some(initial),
            rx,
            label: label.into(),
        }
    }

    /// Wait for the next snapshot. The first call yields the state at
    /// subscribe time. Returns None once the store side is gone.
    ///
    /// A subscriber that falls behind skips ahead to newer snapshots; each
    /// snapshot is complete, so nothing is lost but intermediate states.
    pub async fn next(&mut self) -> Option<T> {
        if let Some(initial) = self.initial.take() {
            return Some(initial);
        }
        loop {
            match self.rx.recv().await {
                Ok(snapshot) => return Some(snapshot),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(
                        "Subscription to {} lagged, skipped {} snapshots",
                        self.label,
                        skipped
                    );
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Most recent pending snapshot without waiting, None if nothing changed
    pub fn try_latest(&mut self) -> Option<T> {
        let mut latest = self.initial.take();
        loop {
            match self.rx.try_recv() {
                Ok(snapshot) => latest = Some(snapshot),
                Err(TryRecvError::Lagged(skipped)) => {
                    tracing::debug!(
                        "Subscription to {} skipped {} stale snapshots",
                        self.label,
                        skipped
                    );
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return latest,
            }
        }
    }

    pub fn into_stream(self) -> impl Stream<Item = T> {
        stream::unfold(self, |mut sub| async move {
            let snapshot = sub.next().await?;
            Some((snapshot, sub))
        })
    }
}

/// Trait that all document store backends must implement
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get(&self, path: &DocPath) -> StoreResult<Option<Value>>;

    /// Create or replace the document at `path`
    async fn set(&self, path: &DocPath, data: Value) -> StoreResult<()>;

    /// Remove the document at `path`; missing documents are not an error
    async fn delete(&self, path: &DocPath) -> StoreResult<()>;

    /// Direct children of a collection, ordered by id
    async fn list(&self, collection: &CollectionPath) -> StoreResult<Vec<Document>>;

    /// Write only if nothing exists at `path`. Returns whether it wrote.
    ///
    /// The default is a read followed by a write and is not atomic.
    async fn create_if_absent(&self, path: &DocPath, data: Value) -> StoreResult<bool> {
        if self.get(path).await?.is_some() {
            return Ok(false);
        }
        self.set(path, data).await?;
        Ok(true)
    }

    async fn subscribe_collection(
        &self,
        collection: &CollectionPath,
    ) -> StoreResult<Subscription<CollectionSnapshot>>;

    async fn subscribe_document(&self, path: &DocPath) -> StoreResult<Subscription<Option<Value>>>;
}

/// Read and decode a document
pub async fn read_doc<T: DeserializeOwned>(
    store: &dyn DocumentStore,
    path: &DocPath,
) -> StoreResult<Option<T>> {
    match store.get(path).await? {
        Some(value) => Ok(Some(serde_json::from_value(value)?)),
        None => Ok(None),
    }
}

/// Encode and write a document
pub async fn write_doc<T: Serialize + ?Sized>(
    store: &dyn DocumentStore,
    path: &DocPath,
    data: &T,
) -> StoreResult<()> {
    store.set(path, serde_json::to_value(data)?).await
}

/// Document layout of one application instance
#[derive(Debug, Clone)]
pub struct StorePaths {
    root: String,
}

impl StorePaths {
    pub fn new(app_id: &str) -> Self {
        Self {
            root: format!("artifacts/{}", app_id),
        }
    }

    pub fn votes(&self) -> CollectionPath {
        CollectionPath::new(format!("{}/public_votes", self.root))
    }

    pub fn vote(&self, voter_id: &str) -> DocPath {
        self.votes().doc(voter_id)
    }

    pub fn voting_status(&self) -> DocPath {
        DocPath::new(format!("{}/config/voting_status", self.root))
    }

    /// Metadata document; its presence switches the allowlist to remote mode
    pub fn allowlist_meta(&self) -> DocPath {
        DocPath::new(format!("{}/config/allowed_emails", self.root))
    }

    pub fn allowlist(&self) -> CollectionPath {
        CollectionPath::new(format!("{}/config/allowed_emails/list", self.root))
    }

    pub fn allowlist_entry(&self, email: &str) -> DocPath {
        self.allowlist().doc(&email_doc_id(email))
    }
}

/// Path-safe document id for an email address
pub fn email_doc_id(email: &str) -> String {
    email.replace('@', "_at_").replace('.', "_dot_")
}
