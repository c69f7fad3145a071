//! Point-in-time view of a store.
//!
//! Snapshots are read out of the store worker through the same queue as every
//! other operation, so a snapshot always reflects every dispatch and
//! reconciliation admitted before it.

use crate::{CommandRecord, RecordId};
use serde::{Deserialize, Serialize};

/// Version of the snapshot format for future compatibility.
pub const SNAPSHOT_FORMAT_VERSION: u32 = 1;

/// State, ledger and divergence status of a store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreSnapshot<S, C, R> {
    /// Snapshot format version
    pub format_version: u32,
    /// Current state
    pub state: S,
    /// Records the state was derived from, in application order
    pub ledger: Vec<CommandRecord<C, R>>,
    /// Ids whose durable write failed since the last reconciliation
    pub divergent: Vec<RecordId>,
}

impl<S, C, R> StoreSnapshot<S, C, R> {
    /// Create a snapshot.
    pub fn new(state: S, ledger: Vec<CommandRecord<C, R>>, divergent: Vec<RecordId>) -> Self {
        Self {
            format_version: SNAPSHOT_FORMAT_VERSION,
            state,
            ledger,
            divergent,
        }
    }

    /// Whether a durable write failed since the last reconciliation.
    pub fn is_diverged(&self) -> bool {
        !self.divergent.is_empty()
    }

    /// Id of the last applied record.
    pub fn head(&self) -> Option<&RecordId> {
        self.ledger.last().map(|r| &r.id)
    }
}

impl<S, C, R> StoreSnapshot<S, C, R>
where
    S: Serialize,
    C: Serialize,
    R: Serialize,
{
    /// Serialize to pretty-printed JSON.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
