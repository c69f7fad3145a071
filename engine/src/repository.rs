//! Contract between a store and the authoritative record log.
//!
//! The store never implements any of this. Applications supply a factory
//! `FnOnce(RecordListener) -> impl RecordRepository`, which the store calls
//! exactly once while it is being constructed.

use crate::{error::BoxError, CommandRecord, NewRecord, RecordId};
use futures::future::BoxFuture;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// A reserved record id plus the pending durable write.
///
/// The id is valid as soon as [`RecordRepository::save`] returns. The write
/// happens when the store awaits [`SaveHandle::exec`].
pub struct SaveHandle {
    id: RecordId,
    exec: BoxFuture<'static, Result<(), BoxError>>,
}

impl SaveHandle {
    /// Create a handle from an id and the future performing the write.
    pub fn new<F>(id: impl Into<RecordId>, exec: F) -> Self
    where
        F: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        Self {
            id: id.into(),
            exec: Box::pin(exec),
        }
    }

    /// Handle for a record that is already durable.
    pub fn committed(id: impl Into<RecordId>) -> Self {
        Self::new(id, async { Ok(()) })
    }

    /// The reserved id.
    pub fn id(&self) -> &RecordId {
        &self.id
    }

    /// Split into the id and the pending write.
    pub fn into_parts(self) -> (RecordId, BoxFuture<'static, Result<(), BoxError>>) {
        (self.id, self.exec)
    }

    /// Perform the durable write.
    pub async fn exec(self) -> Result<(), BoxError> {
        self.exec.await
    }
}

impl fmt::Debug for SaveHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SaveHandle")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

/// Append-only log of command records.
pub trait RecordRepository<C, R>: Send + Sync + 'static {
    /// Reserve an id for `record` and return the pending durable write.
    ///
    /// Must not wait for durability. Ids must be unique for the lifetime of
    /// the log. The returned write may be deferred, batched or retried, but
    /// must eventually succeed or fail for good.
    fn save(&self, record: NewRecord<C, R>) -> SaveHandle;

    /// Release the listener subscription. Idempotent.
    fn unwatch(&self);

    /// Called after a durable write failed. Repositories that can should
    /// deliver the canonical list to the listener again.
    fn resync(&self) {}
}

/// Callback a repository uses to deliver the canonical record list.
///
/// Cheap to clone, callable from any thread at any time, including from
/// inside a pending write or the repository factory itself.
pub struct RecordListener<C, R> {
    notify: Arc<dyn Fn(Vec<CommandRecord<C, R>>) + Send + Sync>,
}

impl<C, R> RecordListener<C, R> {
    /// Wrap a callback.
    pub fn new<F>(notify: F) -> Self
    where
        F: Fn(Vec<CommandRecord<C, R>>) + Send + Sync + 'static,
    {
        Self {
            notify: Arc::new(notify),
        }
    }

    /// Deliver the complete, ordered canonical history.
    pub fn notify(&self, records: Vec<CommandRecord<C, R>>) {
        (self.notify)(records)
    }
}

impl<C, R> Clone for RecordListener<C, R> {
    fn clone(&self) -> Self {
        Self {
            notify: Arc::clone(&self.notify),
        }
    }
}

impl<C, R> fmt::Debug for RecordListener<C, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordListener").finish_non_exhaustive()
    }
}
