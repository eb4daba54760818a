//! In-process document store with live watches and fault injection.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use log::debug;
use tokio::sync::{mpsc, watch};
use uuid::Uuid;
use xpenza_core::sync::{
    matches_all, BatchOp, Document, DocumentStore, Fields, Filter, WatchStream,
};
use xpenza_core::{Error, Result};

/// Store operations, used to target injected faults and count calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    Create,
    Query,
    Update,
    Delete,
    Batch,
    Watch,
}

impl StoreOp {
    fn is_write(self) -> bool {
        matches!(self, Self::Create | Self::Update | Self::Delete | Self::Batch)
    }
}

struct Watcher {
    collection: String,
    filters: Vec<Filter>,
    tx: mpsc::UnboundedSender<Vec<Document>>,
}

#[derive(Default)]
struct Inner {
    collections: HashMap<String, BTreeMap<String, Fields>>,
    watchers: Vec<Watcher>,
    fail_next: HashMap<StoreOp, usize>,
    fail_always: HashSet<StoreOp>,
    calls: HashMap<StoreOp, usize>,
}

impl Inner {
    fn take_fault(&mut self, op: StoreOp) -> Result<()> {
        if self.fail_always.contains(&op) {
            return Err(Error::remote(format!("injected {:?} failure", op)));
        }
        if let Some(remaining) = self.fail_next.get_mut(&op) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(Error::remote(format!("injected {:?} failure", op)));
            }
        }
        Ok(())
    }

    fn select(&self, collection: &str, filters: &[Filter]) -> Vec<Document> {
        self.collections
            .get(collection)
            .map(|docs| {
                docs.iter()
                    .filter(|(_, fields)| matches_all(filters, fields))
                    .map(|(id, fields)| Document::new(id.clone(), fields.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Pushes the current result to every live watch on `collection`,
    /// dropping watches whose receiver is gone.
    fn notify(&mut self, collection: &str) {
        let watchers = std::mem::take(&mut self.watchers);
        let mut alive = Vec::with_capacity(watchers.len());
        for watcher in watchers {
            if watcher.collection == collection {
                let snapshot = self.select(collection, &watcher.filters);
                if watcher.tx.send(snapshot).is_err() {
                    continue;
                }
            } else if watcher.tx.is_closed() {
                continue;
            }
            alive.push(watcher);
        }
        self.watchers = alive;
    }
}

/// Document store living entirely in memory.
///
/// Writes can be held with [`MemoryDocumentStore::pause_writes`] to observe
/// optimistic state before the remote call completes, and any operation can be
/// made to fail on demand.
pub struct MemoryDocumentStore {
    inner: Mutex<Inner>,
    paused: watch::Sender<bool>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        let (paused, _) = watch::channel(false);
        Self {
            inner: Mutex::new(Inner::default()),
            paused,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Holds every write until [`Self::resume_writes`] is called.
    pub fn pause_writes(&self) {
        self.paused.send_replace(true);
    }

    pub fn resume_writes(&self) {
        self.paused.send_replace(false);
    }

    /// Makes the next `count` calls of `op` fail.
    pub fn fail_next(&self, op: StoreOp, count: usize) {
        *self.lock().fail_next.entry(op).or_default() += count;
    }

    /// Makes every call of `op` fail until turned off.
    pub fn fail_always(&self, op: StoreOp, enabled: bool) {
        let mut inner = self.lock();
        if enabled {
            inner.fail_always.insert(op);
        } else {
            inner.fail_always.remove(&op);
        }
    }

    /// Number of calls of `op` that reached the store, failed ones included.
    pub fn call_count(&self, op: StoreOp) -> usize {
        self.lock().calls.get(&op).copied().unwrap_or(0)
    }

    /// Writes a document directly, as another client would.
    pub fn seed(&self, collection: &str, id: &str, fields: Fields) {
        let mut inner = self.lock();
        inner
            .collections
            .entry(collection.to_string())
            .or_default()
            .insert(id.to_string(), fields);
        inner.notify(collection);
    }

    /// Removes a document directly, as another client would.
    pub fn remove(&self, collection: &str, id: &str) {
        let mut inner = self.lock();
        if let Some(docs) = inner.collections.get_mut(collection) {
            docs.remove(id);
        }
        inner.notify(collection);
    }

    pub fn document(&self, collection: &str, id: &str) -> Option<Fields> {
        self.lock()
            .collections
            .get(collection)
            .and_then(|docs| docs.get(id))
            .cloned()
    }

    pub fn documents(&self, collection: &str) -> Vec<Document> {
        self.lock().select(collection, &[])
    }

    /// Number of watches whose receiver is still alive.
    pub fn active_watchers(&self) -> usize {
        let mut inner = self.lock();
        inner.watchers.retain(|watcher| !watcher.tx.is_closed());
        inner.watchers.len()
    }

    async fn begin(&self, op: StoreOp) -> Result<()> {
        if op.is_write() {
            let mut paused = self.paused.subscribe();
            if paused.wait_for(|held| !*held).await.is_err() {
                return Err(Error::remote("store shut down"));
            }
        }
        let mut inner = self.lock();
        *inner.calls.entry(op).or_default() += 1;
        inner.take_fault(op)
    }
}

impl Default for MemoryDocumentStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn create(&self, collection: &str, fields: Fields) -> Result<String> {
        self.begin(StoreOp::Create).await?;
        let id = Uuid::new_v4().simple().to_string()[..20].to_string();
        let mut inner = self.lock();
        inner
            .collections
            .entry(collection.to_string())
            .or_default()
            .insert(id.clone(), fields);
        inner.notify(collection);
        debug!("[MemoryStore] Created {}/{}", collection, id);
        Ok(id)
    }

    async fn query(&self, collection: &str, filters: &[Filter]) -> Result<Vec<Document>> {
        self.begin(StoreOp::Query).await?;
        Ok(self.lock().select(collection, filters))
    }

    async fn update(&self, collection: &str, id: &str, fields: Fields) -> Result<()> {
        self.begin(StoreOp::Update).await?;
        let mut inner = self.lock();
        let existing = inner
            .collections
            .get_mut(collection)
            .and_then(|docs| docs.get_mut(id))
            .ok_or_else(|| Error::not_found(collection, id))?;
        existing.extend(fields);
        inner.notify(collection);
        Ok(())
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<()> {
        self.begin(StoreOp::Delete).await?;
        let mut inner = self.lock();
        if let Some(docs) = inner.collections.get_mut(collection) {
            docs.remove(id);
        }
        inner.notify(collection);
        Ok(())
    }

    async fn commit_batch(&self, ops: Vec<BatchOp>) -> Result<()> {
        self.begin(StoreOp::Batch).await?;
        let mut inner = self.lock();
        let mut staged = inner.collections.clone();
        let mut touched = HashSet::new();

        for op in ops {
            match op {
                BatchOp::Update {
                    collection,
                    id,
                    fields,
                } => {
                    let existing = staged
                        .get_mut(&collection)
                        .and_then(|docs| docs.get_mut(&id))
                        .ok_or_else(|| Error::not_found(&collection, &id))?;
                    existing.extend(fields);
                    touched.insert(collection);
                }
                BatchOp::Delete { collection, id } => {
                    if let Some(docs) = staged.get_mut(&collection) {
                        docs.remove(&id);
                    }
                    touched.insert(collection);
                }
            }
        }

        inner.collections = staged;
        for collection in touched {
            inner.notify(&collection);
        }
        Ok(())
    }

    async fn watch(&self, collection: &str, filters: Vec<Filter>) -> Result<WatchStream> {
        self.begin(StoreOp::Watch).await?;
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.lock();
        let initial = inner.select(collection, &filters);
        // Receiver is held right here, so the first send cannot fail.
        let _ = tx.send(initial);
        inner.watchers.push(Watcher {
            collection: collection.to_string(),
            filters,
            tx,
        });
        Ok(rx)
    }
}
