//! # Foldstore Engine
//!
//! An in-process state container that derives application state from an
//! ordered sequence of commands, kept consistent with an external,
//! append-only record log.
//!
//! Every command goes through two phases:
//!
//! - **Script**: effectful and asynchronous (I/O, randomness, clock reads).
//!   Turns the current state and a command into an outcome.
//! - **Reduce**: pure and synchronous. Folds the outcome into the previous
//!   state.
//!
//! The outcome, not the command, is what gets recorded. Replaying recorded
//! outcomes through the reducer therefore reproduces state without running
//! any script twice.
//!
//! ## Core Concepts
//!
//! ### Logic
//!
//! A [`Logic`] supplies the initial state, the script and the reducer.
//!
//! ### Records
//!
//! Every applied command becomes a [`CommandRecord`] `{id, command, result}`.
//! Ids are assigned by the repository the moment a record is saved, before
//! the durable write completes.
//!
//! ### Repository
//!
//! A [`RecordRepository`] is the authoritative log. It is built by a factory
//! that receives a [`RecordListener`]; the repository calls the listener with
//! the complete canonical record list whenever its history changes.
//!
//! ### Reconciliation
//!
//! On every canonical list the [`Store`] throws away its optimistic state,
//! replays the list from the initial state and replaces its ledger. Records
//! that were already applied locally are therefore counted exactly once.
//!
//! ## Quick Start
//!
//! ```rust
//! use async_trait::async_trait;
//! use foldstore_engine::{BoxError, Logic, MemoryLog, Store};
//!
//! #[derive(Clone, Debug)]
//! enum Command {
//!     Add(i64),
//! }
//!
//! #[derive(Clone, Debug)]
//! enum Outcome {
//!     Added(i64),
//! }
//!
//! struct Counter;
//!
//! #[async_trait]
//! impl Logic for Counter {
//!     type State = i64;
//!     type Command = Command;
//!     type Outcome = Outcome;
//!
//!     fn initial(&self) -> i64 {
//!         0
//!     }
//!
//!     async fn script(&self, _state: &i64, command: &Command) -> Result<Outcome, BoxError> {
//!         match command {
//!             Command::Add(n) => Ok(Outcome::Added(*n)),
//!         }
//!     }
//!
//!     fn reduce(&self, state: &i64, outcome: &Outcome) -> i64 {
//!         match outcome {
//!             Outcome::Added(n) => state + n,
//!         }
//!     }
//! }
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> foldstore_engine::error::Result<()> {
//! let log = MemoryLog::new();
//! let store = Store::new(Counter, |_, _| {}, log.factory());
//!
//! let id = store.dispatch(Command::Add(2)).await?;
//! assert_eq!(id, "1");
//! assert_eq!(store.state().await?, 2);
//! assert_eq!(log.len(), 1);
//!
//! store.close().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Concurrency
//!
//! Each store owns a single worker task. Dispatches, reconciliations and
//! reads are admitted to its queue in call order and run one at a time, so
//! the state is never touched by two operations at once. A store must be
//! created inside a tokio runtime.

pub mod error;
pub mod logic;
pub mod memory;
pub mod options;
mod queue;
pub mod reconcile;
pub mod record;
pub mod repository;
pub mod snapshot;
pub mod store;

// Re-export main types at crate root
pub use error::{BoxError, Error};
pub use logic::{Logic, LogicRecord};
pub use memory::{MemoryLog, MemoryRepository, WriteRejected};
pub use options::StoreOptions;
pub use reconcile::{replay, ReplayReport};
pub use record::{CommandRecord, NewRecord};
pub use repository::{RecordListener, RecordRepository, SaveHandle};
pub use snapshot::{StoreSnapshot, SNAPSHOT_FORMAT_VERSION};
pub use store::Store;

/// Repository-assigned record identifier.
pub type RecordId = String;
