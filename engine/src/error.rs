//! Error types for the store.

use crate::RecordId;
use thiserror::Error;

/// Boxed error produced by scripts and durable writes.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// All possible errors from a store.
#[derive(Debug, Error)]
pub enum Error {
    /// The script phase failed. Nothing was saved and state is unchanged.
    #[error("script failed: {0}")]
    Script(#[source] BoxError),

    /// The durable write failed after the record was applied optimistically.
    #[error("failed to persist record {id}: {source}")]
    Persist {
        id: RecordId,
        #[source]
        source: BoxError,
    },

    /// The store worker is gone and no longer accepts operations.
    #[error("store is closed")]
    Closed,

    /// The store worker stopped on a fatal error before it was closed.
    #[error("store halted after a fatal error")]
    Halted,
}

impl Error {
    /// Whether the command was applied to state even though the call failed.
    pub fn is_applied(&self) -> bool {
        matches!(self, Error::Persist { .. })
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, Error>;
