//! End-to-end tests for dispatch and reconciliation.
//!
//! The counter logic here mirrors a typical application: commands are
//! symbolic, the script draws the amount from an injected source, and the
//! reducer only ever sees outcomes.

use async_trait::async_trait;
use foldstore_engine::{
    BoxError, CommandRecord, Error, Logic, MemoryLog, NewRecord, RecordListener, RecordRepository,
    SaveHandle, Store, StoreOptions,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
enum Command {
    Add,
    Subtract,
    ResetNegative,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
enum Outcome {
    Add { value: i64 },
    Subtract { value: i64 },
    Replace { value: i64 },
    Nothing,
}

struct Counter<F> {
    amount: F,
    /// When set, `Add` scripts wait for a permit before finishing
    gate: Option<Arc<Notify>>,
}

fn counter(amount: i64) -> Counter<impl Fn() -> i64 + Send + Sync + 'static> {
    Counter {
        amount: move || amount,
        gate: None,
    }
}

#[async_trait]
impl<F> Logic for Counter<F>
where
    F: Fn() -> i64 + Send + Sync + 'static,
{
    type State = i64;
    type Command = Command;
    type Outcome = Outcome;

    fn initial(&self) -> i64 {
        0
    }

    async fn script(&self, state: &i64, command: &Command) -> Result<Outcome, BoxError> {
        Ok(match command {
            Command::Add => {
                if let Some(gate) = &self.gate {
                    gate.notified().await;
                }
                Outcome::Add {
                    value: (self.amount)(),
                }
            }
            Command::Subtract => Outcome::Subtract {
                value: (self.amount)(),
            },
            Command::ResetNegative if *state < 0 => Outcome::Replace { value: 0 },
            Command::ResetNegative => Outcome::Nothing,
        })
    }

    fn reduce(&self, state: &i64, outcome: &Outcome) -> i64 {
        match outcome {
            Outcome::Add { value } => state + value,
            Outcome::Subtract { value } => state - value,
            Outcome::Replace { value } => *value,
            Outcome::Nothing => *state,
        }
    }
}

type Changes = Arc<Mutex<Vec<(Option<Command>, i64)>>>;

fn recording() -> (Changes, impl Fn(Option<&Command>, &i64) + Send + 'static) {
    let changes: Changes = Arc::default();
    let sink = Arc::clone(&changes);
    (changes, move |command: Option<&Command>, state: &i64| {
        sink.lock().unwrap().push((command.copied(), *state));
    })
}

fn rec(id: &str, command: Command, result: Outcome) -> CommandRecord<Command, Outcome> {
    CommandRecord::new(id, command, result)
}

/// Repository that stores records on exec and never notifies on its own.
/// The captured listener lets a test play the backend.
#[derive(Clone, Default)]
struct ManualRepository {
    next_id: Arc<AtomicUsize>,
    storage: Arc<Mutex<Vec<CommandRecord<Command, Outcome>>>>,
    listener: Arc<Mutex<Option<RecordListener<Command, Outcome>>>>,
    unwatched: Arc<AtomicUsize>,
    resyncs: Arc<AtomicUsize>,
    fail_exec: Arc<AtomicUsize>,
}

impl ManualRepository {
    fn factory(&self) -> impl FnOnce(RecordListener<Command, Outcome>) -> ManualRepository {
        let repo = self.clone();
        move |listener| {
            *repo.listener.lock().unwrap() = Some(listener);
            repo
        }
    }

    fn push_canonical(&self, records: Vec<CommandRecord<Command, Outcome>>) {
        let listener = self.listener.lock().unwrap().clone().unwrap();
        listener.notify(records);
    }

    fn stored(&self) -> Vec<CommandRecord<Command, Outcome>> {
        self.storage.lock().unwrap().clone()
    }
}

impl RecordRepository<Command, Outcome> for ManualRepository {
    fn save(&self, record: NewRecord<Command, Outcome>) -> SaveHandle {
        let id = (self.next_id.fetch_add(1, Ordering::SeqCst) + 1).to_string();
        let storage = Arc::clone(&self.storage);
        let fail = self.fail_exec.load(Ordering::SeqCst) > 0;
        if fail {
            self.fail_exec.fetch_sub(1, Ordering::SeqCst);
        }
        let record = record.with_id(id.clone());

        SaveHandle::new(id, async move {
            if fail {
                return Err::<(), BoxError>("backend unavailable".into());
            }
            storage.lock().unwrap().push(record);
            Ok(())
        })
    }

    fn unwatch(&self) {
        self.unwatched.fetch_add(1, Ordering::SeqCst);
    }

    fn resync(&self) {
        self.resyncs.fetch_add(1, Ordering::SeqCst);
    }
}

// ============================================================================
// Dispatch
// ============================================================================

#[tokio::test]
async fn dispatch_sequence_computes_state_and_saves_records() {
    let repo = ManualRepository::default();
    let (changes, on_change) = recording();
    let store = Store::new(counter(1), on_change, repo.factory());

    store.dispatch(Command::Add).await.unwrap();
    store.dispatch(Command::Add).await.unwrap();
    store.dispatch(Command::Subtract).await.unwrap();
    store.dispatch(Command::Add).await.unwrap();

    assert_eq!(store.state().await.unwrap(), 2);
    assert_eq!(changes.lock().unwrap().last(), Some(&(Some(Command::Add), 2)));
    assert_eq!(
        serde_json::to_value(repo.stored()).unwrap(),
        json!([
            {"id": "1", "result": {"type": "ADD", "value": 1}, "command": "ADD"},
            {"id": "2", "result": {"type": "ADD", "value": 1}, "command": "ADD"},
            {"id": "3", "result": {"type": "SUBTRACT", "value": 1}, "command": "SUBTRACT"},
            {"id": "4", "result": {"type": "ADD", "value": 1}, "command": "ADD"}
        ])
    );
}

#[tokio::test]
async fn noop_outcome_keeps_state_but_records() {
    let repo = ManualRepository::default();
    let store = Store::new(counter(3), |_, _| {}, repo.factory());

    store.dispatch(Command::Add).await.unwrap();
    store.dispatch(Command::ResetNegative).await.unwrap();

    assert_eq!(store.state().await.unwrap(), 3);
    let ledger = store.ledger().await.unwrap();
    assert_eq!(ledger.len(), 2);
    assert_eq!(ledger[1].result, Outcome::Nothing);
    assert_eq!(repo.stored().len(), 2);
}

#[tokio::test]
async fn reset_negative_replaces_state() {
    let repo = ManualRepository::default();
    let store = Store::new(counter(4), |_, _| {}, repo.factory());

    store.dispatch(Command::Subtract).await.unwrap();
    store.dispatch(Command::ResetNegative).await.unwrap();

    assert_eq!(store.state().await.unwrap(), 0);
    assert_eq!(repo.stored()[1].result, Outcome::Replace { value: 0 });
}

#[tokio::test]
async fn script_runs_once_per_dispatch_and_never_on_replay() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counted = Arc::clone(&calls);
    let logic = Counter {
        amount: move || {
            counted.fetch_add(1, Ordering::SeqCst);
            1i64
        },
        gate: None,
    };
    let repo = ManualRepository::default();
    let store = Store::new(logic, |_, _| {}, repo.factory());

    store.dispatch(Command::Add).await.unwrap();
    store.dispatch(Command::Add).await.unwrap();
    repo.push_canonical(repo.stored());
    repo.push_canonical(repo.stored());

    assert_eq!(store.state().await.unwrap(), 2);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn concurrent_dispatches_run_in_call_order() {
    let log = MemoryLog::new();
    let (changes, on_change) = recording();
    let store = Arc::new(Store::new(counter(1), on_change, log.factory()));

    let first = store.dispatch(Command::Add);
    let second = store.dispatch(Command::Subtract);
    let third = store.dispatch(Command::Add);

    // Await out of order: admission, not polling, decides.
    let (c, b, a) = tokio::join!(third, second, first);
    assert_eq!(a.unwrap(), "1");
    assert_eq!(b.unwrap(), "2");
    assert_eq!(c.unwrap(), "3");

    let optimistic: Vec<_> = changes
        .lock()
        .unwrap()
        .iter()
        .filter(|(command, _)| command.is_some())
        .cloned()
        .collect();
    assert_eq!(
        optimistic,
        vec![
            (Some(Command::Add), 1),
            (Some(Command::Subtract), 0),
            (Some(Command::Add), 1),
        ]
    );
}

#[tokio::test]
async fn dispatches_from_many_tasks_are_linearized() {
    let log = MemoryLog::new();
    let store = Arc::new(Store::new(counter(1), |_, _| {}, log.factory()));

    let tasks: Vec<_> = (0..50)
        .map(|_| {
            let store = Arc::clone(&store);
            tokio::spawn(async move { store.dispatch(Command::Add).await })
        })
        .collect();
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    assert_eq!(store.state().await.unwrap(), 50);
    assert_eq!(log.len(), 50);
    let ledger = store.ledger().await.unwrap();
    assert_eq!(ledger.len(), 50);
}

#[tokio::test]
async fn dropped_dispatch_future_still_runs() {
    let repo = ManualRepository::default();
    let store = Store::new(counter(2), |_, _| {}, repo.factory());

    drop(store.dispatch(Command::Add));

    assert_eq!(store.state().await.unwrap(), 2);
    assert_eq!(repo.stored().len(), 1);
}

// ============================================================================
// Reconciliation
// ============================================================================

#[tokio::test]
async fn reconcile_does_not_recount_local_records() {
    let repo = ManualRepository::default();
    let (changes, on_change) = recording();
    let store = Store::new(counter(1), on_change, repo.factory());

    store.dispatch(Command::Add).await.unwrap();
    store.dispatch(Command::Add).await.unwrap();
    repo.push_canonical(vec![
        rec("1", Command::Add, Outcome::Add { value: 1 }),
        rec("2", Command::Add, Outcome::Add { value: 1 }),
        rec("3", Command::Subtract, Outcome::Subtract { value: 1 }),
    ]);

    assert_eq!(store.state().await.unwrap(), 1);
    assert_eq!(changes.lock().unwrap().last(), Some(&(None, 1)));
}

#[tokio::test]
async fn reconcile_with_own_ledger_is_idempotent() {
    let repo = ManualRepository::default();
    let store = Store::new(counter(5), |_, _| {}, repo.factory());

    store.dispatch(Command::Add).await.unwrap();
    store.dispatch(Command::Subtract).await.unwrap();
    store.dispatch(Command::Add).await.unwrap();
    let before = store.snapshot().await.unwrap();

    repo.push_canonical(before.ledger.clone());

    let after = store.snapshot().await.unwrap();
    assert_eq!(after.state, before.state);
    assert_eq!(after.ledger, before.ledger);
}

#[tokio::test]
async fn canonical_order_wins_over_local_order() {
    let repo = ManualRepository::default();
    let store = Store::new(counter(2), |_, _| {}, repo.factory());

    store.dispatch(Command::Add).await.unwrap();
    repo.push_canonical(vec![
        rec("9", Command::Subtract, Outcome::Subtract { value: 7 }),
        rec("10", Command::ResetNegative, Outcome::Replace { value: 0 }),
        rec("1", Command::Add, Outcome::Add { value: 2 }),
    ]);

    assert_eq!(store.state().await.unwrap(), 2);
    let ids: Vec<_> = store
        .ledger()
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.id)
        .collect();
    assert_eq!(ids, vec!["9", "10", "1"]);
}

#[tokio::test]
async fn reconcile_can_drop_unconfirmed_local_records() {
    let repo = ManualRepository::default();
    let store = Store::new(counter(1), |_, _| {}, repo.factory());

    store.dispatch(Command::Add).await.unwrap();
    store.dispatch(Command::Add).await.unwrap();
    repo.push_canonical(vec![rec("1", Command::Add, Outcome::Add { value: 1 })]);

    assert_eq!(store.state().await.unwrap(), 1);
    assert_eq!(store.ledger().await.unwrap().len(), 1);
}

#[tokio::test]
async fn reconcile_waits_for_in_flight_dispatch() {
    let gate = Arc::new(Notify::new());
    let logic = Counter {
        amount: || 1i64,
        gate: Some(Arc::clone(&gate)),
    };
    let repo = ManualRepository::default();
    let (changes, on_change) = recording();
    let store = Store::new(logic, on_change, repo.factory());

    let pending = store.dispatch(Command::Add);
    repo.push_canonical(vec![rec("100", Command::Add, Outcome::Add { value: 10 })]);
    tokio::task::yield_now().await;
    assert!(changes.lock().unwrap().is_empty());

    gate.notify_one();
    assert_eq!(pending.await.unwrap(), "1");

    assert_eq!(store.state().await.unwrap(), 10);
    assert_eq!(
        *changes.lock().unwrap(),
        vec![(Some(Command::Add), 1), (None, 10)]
    );
}

#[tokio::test]
async fn history_present_at_construction_is_replayed() {
    let log = MemoryLog::new();
    log.append_remote(Command::Add, Outcome::Add { value: 4 });
    log.append_remote(Command::Subtract, Outcome::Subtract { value: 1 });

    let (changes, on_change) = recording();
    let store = Store::new(counter(1), on_change, log.factory());

    assert_eq!(store.state().await.unwrap(), 3);
    assert_eq!(*changes.lock().unwrap(), vec![(None, 3)]);

    // Next id continues after the existing history.
    assert_eq!(store.dispatch(Command::Add).await.unwrap(), "3");
}

#[tokio::test]
async fn stores_sharing_a_log_converge() {
    let log = MemoryLog::new();
    let left = Store::new(counter(2), |_, _| {}, log.factory());
    let right = Store::new(counter(5), |_, _| {}, log.factory());

    left.dispatch(Command::Add).await.unwrap();
    right.dispatch(Command::Subtract).await.unwrap();
    left.dispatch(Command::Add).await.unwrap();

    let left_snapshot = left.snapshot().await.unwrap();
    let right_snapshot = right.snapshot().await.unwrap();

    assert_eq!(left_snapshot.state, -1);
    assert_eq!(right_snapshot.state, -1);
    assert_eq!(left_snapshot.ledger, log.records());
    assert_eq!(right_snapshot.ledger, log.records());
}

// ============================================================================
// Failures
// ============================================================================

#[tokio::test]
async fn persist_failure_keeps_optimistic_state() {
    let repo = ManualRepository::default();
    repo.fail_exec.store(1, Ordering::SeqCst);
    let (changes, on_change) = recording();
    let store = Store::new(counter(1), on_change, repo.factory());

    let err = store.dispatch(Command::Add).await.unwrap_err();

    match &err {
        Error::Persist { id, source } => {
            assert_eq!(id, "1");
            assert_eq!(source.to_string(), "backend unavailable");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(err.is_applied());
    assert_eq!(store.state().await.unwrap(), 1);
    assert_eq!(*changes.lock().unwrap(), vec![(Some(Command::Add), 1)]);
    assert!(store.is_diverged().await.unwrap());
    assert_eq!(repo.resyncs.load(Ordering::SeqCst), 1);
    assert!(repo.stored().is_empty());
}

#[tokio::test]
async fn reconciliation_clears_divergence() {
    let repo = ManualRepository::default();
    repo.fail_exec.store(1, Ordering::SeqCst);
    let store = Store::new(counter(1), |_, _| {}, repo.factory());

    assert!(store.dispatch(Command::Add).await.is_err());
    assert_eq!(store.snapshot().await.unwrap().divergent, vec!["1".to_string()]);

    repo.push_canonical(Vec::new());

    let snapshot = store.snapshot().await.unwrap();
    assert!(!snapshot.is_diverged());
    assert_eq!(snapshot.state, 0);
}

#[tokio::test]
async fn memory_log_resync_self_heals_after_failed_write() {
    let log = MemoryLog::new();
    let store = Store::new(counter(1), |_, _| {}, log.factory());

    store.dispatch(Command::Add).await.unwrap();
    log.fail_next_exec();
    assert!(matches!(
        store.dispatch(Command::Add).await,
        Err(Error::Persist { .. })
    ));

    // The resync queued behind the failed dispatch restores canonical state.
    assert_eq!(store.state().await.unwrap(), 1);
    assert!(!store.is_diverged().await.unwrap());
}

#[tokio::test]
async fn resync_can_be_disabled() {
    let repo = ManualRepository::default();
    repo.fail_exec.store(1, Ordering::SeqCst);
    let store = Store::with_options(
        counter(1),
        |_, _| {},
        repo.factory(),
        StoreOptions::named("no-resync").resync_on_persist_failure(false),
    );

    assert!(store.dispatch(Command::Add).await.is_err());
    assert!(store.is_diverged().await.unwrap());
    assert_eq!(repo.resyncs.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn script_failure_saves_nothing() {
    struct Failing;

    #[async_trait]
    impl Logic for Failing {
        type State = i64;
        type Command = Command;
        type Outcome = Outcome;

        fn initial(&self) -> i64 {
            0
        }

        async fn script(&self, _state: &i64, _command: &Command) -> Result<Outcome, BoxError> {
            Err("sensor offline".into())
        }

        fn reduce(&self, state: &i64, _outcome: &Outcome) -> i64 {
            *state
        }
    }

    let repo = ManualRepository::default();
    let (changes, on_change) = recording();
    let store = Store::new(Failing, on_change, repo.factory());

    let err = store.dispatch(Command::Add).await.unwrap_err();

    assert_eq!(err.to_string(), "script failed: sensor offline");
    assert_eq!(repo.next_id.load(Ordering::SeqCst), 0);
    assert!(store.ledger().await.unwrap().is_empty());
    assert!(changes.lock().unwrap().is_empty());
}

#[tokio::test]
async fn replay_panic_halts_store() {
    struct Picky;

    #[async_trait]
    impl Logic for Picky {
        type State = i64;
        type Command = Command;
        type Outcome = Outcome;

        fn initial(&self) -> i64 {
            0
        }

        async fn script(&self, _state: &i64, _command: &Command) -> Result<Outcome, BoxError> {
            Ok(Outcome::Nothing)
        }

        fn reduce(&self, state: &i64, outcome: &Outcome) -> i64 {
            match outcome {
                Outcome::Replace { .. } => panic!("replace is not supported"),
                _ => *state,
            }
        }
    }

    let repo = ManualRepository::default();
    let store = Store::new(Picky, |_, _| {}, repo.factory());

    repo.push_canonical(vec![rec("1", Command::ResetNegative, Outcome::Replace { value: 0 })]);

    assert!(matches!(store.dispatch(Command::Add).await, Err(Error::Closed)));
    assert!(matches!(store.close().await, Err(Error::Halted)));
    assert_eq!(repo.unwatched.load(Ordering::SeqCst), 1);
}

// ============================================================================
// Teardown
// ============================================================================

#[tokio::test]
async fn close_unwatches_exactly_once() {
    let repo = ManualRepository::default();
    let store = Store::new(counter(1), |_, _| {}, repo.factory());

    store.dispatch(Command::Add).await.unwrap();
    store.close().await.unwrap();

    assert_eq!(repo.unwatched.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn canonical_records_after_close_are_ignored() {
    let repo = ManualRepository::default();
    let store = Store::new(counter(1), |_, _| {}, repo.factory());
    store.close().await.unwrap();

    repo.push_canonical(vec![rec("1", Command::Add, Outcome::Add { value: 1 })]);
    assert_eq!(repo.unwatched.load(Ordering::SeqCst), 1);
}
