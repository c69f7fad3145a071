//! FIFO admission queue feeding a store's worker task.
//!
//! Operations are pushed synchronously, so the order in which callers invoke
//! store methods is the order in which the worker sees them, regardless of
//! when the returned futures are first polled.

use crate::error::{Error, Result};
use std::future::Future;
use tokio::sync::{mpsc, oneshot};

/// Sending half of the queue.
pub(crate) struct Queue<T> {
    tx: mpsc::UnboundedSender<T>,
}

impl<T: Send + 'static> Queue<T> {
    /// Create a queue and the receiver the worker drains.
    pub(crate) fn channel() -> (Self, mpsc::UnboundedReceiver<T>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Admit an operation. Fails once the worker has stopped.
    pub(crate) fn push(&self, op: T) -> Result<()> {
        self.tx.send(op).map_err(|_| Error::Closed)
    }

    /// Admit an operation carrying a reply slot and wait for the reply.
    ///
    /// Admission happens before this returns. Dropping the future only
    /// discards the reply.
    pub(crate) fn call<R, F>(&self, make: F) -> impl Future<Output = Result<R>> + Send + 'static
    where
        R: Send + 'static,
        F: FnOnce(oneshot::Sender<R>) -> T,
    {
        let (reply, rx) = oneshot::channel();
        let admitted = self.push(make(reply));
        async move {
            admitted?;
            rx.await.map_err(|_| Error::Closed)
        }
    }
}

impl<T> Clone for Queue<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}
