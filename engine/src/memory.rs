//! In-memory canonical record log.
//!
//! Any number of repositories (one per store) can attach to the same
//! [`MemoryLog`]. Every durable append is broadcast, as the complete record
//! list, to every attached listener. This is how a backend acknowledging
//! writes or another writer appending records looks to a store.

use crate::{
    error::BoxError, CommandRecord, NewRecord, RecordId, RecordListener, RecordRepository,
    SaveHandle,
};
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// A durable write the log refused.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("memory log rejected write of record {id}")]
pub struct WriteRejected {
    pub id: RecordId,
}

struct Shared<C, R> {
    /// Canonical history, in append order
    records: Mutex<Vec<CommandRecord<C, R>>>,
    /// Last reserved id
    next_id: AtomicU64,
    /// Attached listeners, keyed by watcher id
    watchers: DashMap<String, RecordListener<C, R>>,
    /// Reject the next append
    fail_next: AtomicBool,
}

/// Shared, cloneable in-memory log.
pub struct MemoryLog<C, R> {
    shared: Arc<Shared<C, R>>,
}

impl<C, R> Clone for MemoryLog<C, R> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<C, R> Default for MemoryLog<C, R>
where
    C: Clone + Send + Sync + 'static,
    R: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<C, R> MemoryLog<C, R>
where
    C: Clone + Send + Sync + 'static,
    R: Clone + Send + Sync + 'static,
{
    /// Create an empty log.
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                records: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(0),
                watchers: DashMap::new(),
                fail_next: AtomicBool::new(false),
            }),
        }
    }

    /// Attach a listener and return a repository writing to this log.
    ///
    /// A non-empty history is delivered to the listener right away.
    pub fn repository(&self, listener: RecordListener<C, R>) -> MemoryRepository<C, R> {
        let watcher = uuid::Uuid::new_v4().to_string();

        let records = self.lock();
        self.shared
            .watchers
            .insert(watcher.clone(), listener.clone());
        if !records.is_empty() {
            listener.notify(records.clone());
        }
        drop(records);

        tracing::debug!(watcher = %watcher, "record listener attached");

        MemoryRepository {
            log: self.clone(),
            watcher,
        }
    }

    /// Repository factory suitable for [`Store::new`](crate::Store::new).
    pub fn factory(&self) -> impl FnOnce(RecordListener<C, R>) -> MemoryRepository<C, R> {
        let log = self.clone();
        move |listener| log.repository(listener)
    }

    /// Copy of the canonical history.
    pub fn records(&self) -> Vec<CommandRecord<C, R>> {
        self.lock().clone()
    }

    /// Number of durable records.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Check if nothing has been appended yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of attached listeners.
    pub fn watcher_count(&self) -> usize {
        self.shared.watchers.len()
    }

    /// Append a record written by some other party and broadcast it.
    pub fn append_remote(&self, command: C, result: R) -> RecordId {
        let id = self.reserve();
        let mut records = self.lock();
        records.push(CommandRecord::new(id.clone(), command, result));
        self.broadcast(&records);
        id
    }

    /// Re-deliver the current history to every listener.
    pub fn publish(&self) {
        let records = self.lock();
        self.broadcast(&records);
    }

    /// Make the next durable write fail without appending.
    pub fn fail_next_exec(&self) {
        self.shared.fail_next.store(true, Ordering::SeqCst);
    }

    fn reserve(&self) -> RecordId {
        (self.shared.next_id.fetch_add(1, Ordering::SeqCst) + 1).to_string()
    }

    fn append(&self, record: CommandRecord<C, R>) -> Result<(), WriteRejected> {
        let mut records = self.lock();
        if self.shared.fail_next.swap(false, Ordering::SeqCst) {
            tracing::debug!(record_id = %record.id, "memory log rejected write");
            return Err(WriteRejected { id: record.id });
        }
        records.push(record);
        self.broadcast(&records);
        Ok(())
    }

    /// Deliver to one watcher, if it is still attached.
    fn deliver_to(&self, watcher: &str) {
        let records = self.lock();
        let listener = self
            .shared
            .watchers
            .get(watcher)
            .map(|entry| entry.value().clone());
        if let Some(listener) = listener {
            listener.notify(records.clone());
        }
    }

    // Callers hold the records lock so every listener sees lists in append order.
    fn broadcast(&self, records: &[CommandRecord<C, R>]) {
        let listeners: Vec<RecordListener<C, R>> = self
            .shared
            .watchers
            .iter()
            .map(|entry| entry.value().clone())
            .collect();

        for listener in &listeners {
            listener.notify(records.to_vec());
        }

        tracing::trace!(
            records = records.len(),
            recipients = listeners.len(),
            "broadcast canonical records"
        );
    }

    fn lock(&self) -> MutexGuard<'_, Vec<CommandRecord<C, R>>> {
        self.shared
            .records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// A store's connection to a [`MemoryLog`].
pub struct MemoryRepository<C, R> {
    log: MemoryLog<C, R>,
    watcher: String,
}

impl<C, R> MemoryRepository<C, R> {
    /// The log this repository writes to.
    pub fn log(&self) -> &MemoryLog<C, R> {
        &self.log
    }
}

impl<C, R> RecordRepository<C, R> for MemoryRepository<C, R>
where
    C: Clone + Send + Sync + 'static,
    R: Clone + Send + Sync + 'static,
{
    fn save(&self, record: NewRecord<C, R>) -> SaveHandle {
        let id = self.log.reserve();
        let record = record.with_id(id.clone());
        let log = self.log.clone();

        SaveHandle::new(id, async move {
            log.append(record).map_err(BoxError::from)
        })
    }

    fn unwatch(&self) {
        if self.log.shared.watchers.remove(&self.watcher).is_some() {
            tracing::debug!(watcher = %self.watcher, "record listener detached");
        }
    }

    fn resync(&self) {
        self.log.deliver_to(&self.watcher);
    }
}
