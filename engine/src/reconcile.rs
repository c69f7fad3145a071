//! Reconciliation of the local ledger with the canonical record list.
//!
//! The store never diffs its optimistic history against the canonical one.
//! A canonical list may already contain the records the store applied
//! locally, so applying only the "new" tail on top of the current state would
//! count those records twice. Instead:
//!
//! # Algorithm
//!
//! 1. Drop records whose id already appeared earlier in the list
//! 2. Fold the reducer from the initial state over the remaining records
//! 3. Replace the ledger with the list and the state with the fold result
//!
//! Only the reducer runs during replay. Scripts are never re-executed.

use crate::{CommandRecord, Logic, LogicRecord, RecordId};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Fold `reduce` from the initial state over `records`, in order.
pub fn replay<L: Logic>(logic: &L, records: &[LogicRecord<L>]) -> L::State {
    records
        .iter()
        .fold(logic.initial(), |state, record| logic.reduce(&state, &record.result))
}

/// Remove records whose id already occurred earlier in the list.
///
/// Returns the cleaned list and the ids that were dropped.
pub(crate) fn dedupe<C, R>(
    records: Vec<CommandRecord<C, R>>,
) -> (Vec<CommandRecord<C, R>>, Vec<RecordId>) {
    let mut seen = HashSet::with_capacity(records.len());
    let mut dropped = Vec::new();
    let mut kept = Vec::with_capacity(records.len());

    for record in records {
        if seen.insert(record.id.clone()) {
            kept.push(record);
        } else {
            dropped.push(record.id);
        }
    }

    (kept, dropped)
}

/// How a canonical list relates to the ledger it replaces.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayReport {
    /// Records folded into the new state
    pub replayed: usize,
    /// Ledger ids the canonical list confirmed
    pub confirmed: usize,
    /// Ledger ids missing from the canonical list
    pub superseded: Vec<RecordId>,
    /// Canonical ids the ledger did not know about
    pub introduced: usize,
    /// Duplicate canonical ids that were dropped
    pub duplicates: Vec<RecordId>,
}

impl ReplayReport {
    /// Compare the previous ledger with the (deduplicated) canonical list.
    pub fn compare<C, R>(
        ledger: &[CommandRecord<C, R>],
        canonical: &[CommandRecord<C, R>],
    ) -> Self {
        let canonical_ids: HashSet<&str> = canonical.iter().map(|r| r.id.as_str()).collect();
        let ledger_ids: HashSet<&str> = ledger.iter().map(|r| r.id.as_str()).collect();

        let superseded: Vec<RecordId> = ledger
            .iter()
            .filter(|r| !canonical_ids.contains(r.id.as_str()))
            .map(|r| r.id.clone())
            .collect();

        Self {
            replayed: canonical.len(),
            confirmed: ledger.len() - superseded.len(),
            superseded,
            introduced: canonical
                .iter()
                .filter(|r| !ledger_ids.contains(r.id.as_str()))
                .count(),
            duplicates: Vec::new(),
        }
    }

    /// Whether the canonical list only extended the ledger.
    pub fn is_fast_forward(&self) -> bool {
        self.superseded.is_empty() && self.duplicates.is_empty()
    }
}
