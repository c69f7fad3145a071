//! Record types for the command log.

use crate::RecordId;
use serde::{Deserialize, Serialize};

/// A command paired with the outcome its script produced, before the
/// repository has assigned it an id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewRecord<C, R> {
    /// The dispatched command
    pub command: C,
    /// The outcome of the script phase
    pub result: R,
}

impl<C, R> NewRecord<C, R> {
    /// Create a new unsaved record.
    pub fn new(command: C, result: R) -> Self {
        Self { command, result }
    }

    /// Attach a repository-assigned id.
    pub fn with_id(self, id: impl Into<RecordId>) -> CommandRecord<C, R> {
        CommandRecord {
            id: id.into(),
            command: self.command,
            result: self.result,
        }
    }
}

/// An immutable entry of the command log.
///
/// The position of a record within an ordered sequence defines application
/// order. The id only identifies it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandRecord<C, R> {
    /// Unique identifier within the log
    pub id: RecordId,
    /// The dispatched command
    pub command: C,
    /// The outcome folded into state
    pub result: R,
}

impl<C, R> CommandRecord<C, R> {
    /// Create a new record.
    pub fn new(id: impl Into<RecordId>, command: C, result: R) -> Self {
        Self {
            id: id.into(),
            command,
            result,
        }
    }
}
