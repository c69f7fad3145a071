//! The application logic a store runs.

use crate::{error::BoxError, CommandRecord};
use async_trait::async_trait;

/// Record type produced by a given [`Logic`].
pub type LogicRecord<L> = CommandRecord<<L as Logic>::Command, <L as Logic>::Outcome>;

/// Initial state, script and reducer of an application.
///
/// `script` may do anything: read clocks, draw random numbers, call a
/// backend. It runs exactly once for every dispatch that reaches it and never
/// during replay. Anything it needs from the outside world has to be captured
/// by the implementing value at construction time.
///
/// `reduce` must be pure, deterministic and total over every outcome variant,
/// including whatever variant the application uses for "nothing happened".
/// Reconciliation folds it from [`Logic::initial`] over arbitrary canonical
/// record sequences.
#[async_trait]
pub trait Logic: Send + Sync + 'static {
    type State: Clone + Send + Sync + 'static;
    type Command: Clone + Send + Sync + 'static;
    type Outcome: Clone + Send + Sync + 'static;

    /// State before any record has been applied.
    fn initial(&self) -> Self::State;

    /// Turn a command into an outcome, given the state it is dispatched on.
    async fn script(
        &self,
        state: &Self::State,
        command: &Self::Command,
    ) -> Result<Self::Outcome, BoxError>;

    /// Fold an outcome into the previous state.
    fn reduce(&self, state: &Self::State, outcome: &Self::Outcome) -> Self::State;
}
