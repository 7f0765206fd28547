use super::*;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::RwLock;

/// Buffered snapshots per watcher before it starts skipping
const CHANNEL_CAPACITY: usize = 100;

#[derive(Default)]
struct Inner {
    docs: BTreeMap<String, Value>,
    collection_watchers: HashMap<String, broadcast::Sender<CollectionSnapshot>>,
    document_watchers: HashMap<String, broadcast::Sender<Option<Value>>>,
}

impl Inner {
    fn collection_snapshot(&self, collection: &str) -> Vec<Document> {
        let prefix = format!("{}/", collection);
        self.docs
            .range(prefix.clone()..)
            .take_while(|(key, _)| key.starts_with(&prefix))
            .filter_map(|(key, data)| {
                let id = &key[prefix.len()..];
                (!id.contains('/')).then(|| Document {
                    id: id.to_string(),
                    data: data.clone(),
                })
            })
            .collect()
    }

    /// Push the new state of `path` and its collection to watchers.
    /// Called with the write lock held, so watchers see writes in order.
    fn notify(&mut self, path: &DocPath) {
        let key = path.as_str();
        let stale = match self.document_watchers.get(key) {
            Some(tx) => tx.send(self.docs.get(key).cloned()).is_err(),
            None => false,
        };
        if stale {
            self.document_watchers.remove(key);
        }

        let collection = path.parent();
        let key = collection.as_str();
        let stale = match self.collection_watchers.get(key) {
            Some(tx) => tx.send(Arc::new(self.collection_snapshot(key))).is_err(),
            None => false,
        };
        if stale {
            self.collection_watchers.remove(key);
        }
    }
}

/// In-process realtime document store.
///
/// Used by the server when no external store is wired in, and by tests.
/// `set_available(false)` simulates an outage and `fail_writes_after`
/// one that starts partway through a batch of writes.
pub struct MemoryStore {
    inner: RwLock<Inner>,
    available: AtomicBool,
    /// Writes left before writes start failing; `usize::MAX` is unlimited
    write_budget: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            available: AtomicBool::new(true),
            write_budget: AtomicUsize::new(usize::MAX),
        }
    }

    /// Toggle simulated availability; while unavailable every call fails
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
        if available {
            self.write_budget.store(usize::MAX, Ordering::SeqCst);
            tracing::info!("Memory store back online");
        } else {
            tracing::warn!("Memory store set unavailable");
        }
    }

    /// Let `writes` more writes succeed, then fail every write until
    /// `set_available(true)`; reads keep working
    pub fn fail_writes_after(&self, writes: usize) {
        self.write_budget.store(writes, Ordering::SeqCst);
        tracing::warn!("Memory store writes fail after {} more", writes);
    }

    fn check_writable(&self) -> StoreResult<()> {
        self.check_available()?;
        let spent = self
            .write_budget
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| match left {
                usize::MAX => Some(usize::MAX),
                0 => None,
                n => Some(n - 1),
            });
        match spent {
            Ok(_) => Ok(()),
            Err(_) => Err(StoreError::Unavailable("store rejected the write".to_string())),
        }
    }

    fn check_available(&self) -> StoreResult<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable("store is offline".to_string()))
        }
    }

    /// Number of live watcher channels (released once all handles drop)
    pub async fn watcher_count(&self) -> usize {
        let inner = self.inner.read().await;
        let collections = inner
            .collection_watchers
            .values()
            .filter(|tx| tx.receiver_count() > 0)
            .count();
        let documents = inner
            .document_watchers
            .values()
            .filter(|tx| tx.receiver_count() > 0)
            .count();
        collections + documents
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get(&self, path: &DocPath) -> StoreResult<Option<Value>> {
        self.check_available()?;
        Ok(self.inner.read().await.docs.get(path.as_str()).cloned())
    }

    async fn set(&self, path: &DocPath, data: Value) -> StoreResult<()> {
        self.check_writable()?;
        let mut inner = self.inner.write().await;
        inner.docs.insert(path.as_str().to_string(), data);
        inner.notify(path);
        Ok(())
    }

    async fn delete(&self, path: &DocPath) -> StoreResult<()> {
        self.check_writable()?;
        let mut inner = self.inner.write().await;
        if inner.docs.remove(path.as_str()).is_some() {
            inner.notify(path);
        }
        Ok(())
    }

    async fn list(&self, collection: &CollectionPath) -> StoreResult<Vec<Document>> {
        self.check_available()?;
        Ok(self
            .inner
            .read()
            .await
            .collection_snapshot(collection.as_str()))
    }

    async fn create_if_absent(&self, path: &DocPath, data: Value) -> StoreResult<bool> {
        self.check_writable()?;
        let mut inner = self.inner.write().await;
        if inner.docs.contains_key(path.as_str()) {
            return Ok(false);
        }
        inner.docs.insert(path.as_str().to_string(), data);
        inner.notify(path);
        Ok(true)
    }

    async fn subscribe_collection(
        &self,
        collection: &CollectionPath,
    ) -> StoreResult<Subscription<CollectionSnapshot>> {
        self.check_available()?;
        let mut inner = self.inner.write().await;
        let initial = Arc::new(inner.collection_snapshot(collection.as_str()));
        let rx = inner
            .collection_watchers
            .entry(collection.as_str().to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe();
        Ok(Subscription::new(initial, rx, collection.as_str()))
    }

    async fn subscribe_document(&self, path: &DocPath) -> StoreResult<Subscription<Option<Value>>> {
        self.check_available()?;
        let mut inner = self.inner.write().await;
        let initial = inner.docs.get(path.as_str()).cloned();
        let rx = inner
            .document_watchers
            .entry(path.as_str().to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe();
        Ok(Subscription::new(initial, rx, path.as_str()))
    }
}
