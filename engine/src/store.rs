//! Store - the state container.
//!
//! A store owns the current state and the ledger of records that produced
//! it. Both live inside a single worker task; every dispatch, reconciliation
//! and read is an operation on that task's queue, so at most one of them
//! touches the state at any time.

use crate::{
    error::{Error, Result},
    queue::Queue,
    reconcile::{self, ReplayReport},
    Logic, LogicRecord, NewRecord, RecordId, RecordListener, RecordRepository, StoreOptions,
    StoreSnapshot,
};
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::Instrument;

type Repository<L> = Arc<dyn RecordRepository<<L as Logic>::Command, <L as Logic>::Outcome>>;
type OnChange<L> = Box<dyn Fn(Option<&<L as Logic>::Command>, &<L as Logic>::State) + Send>;
type Read<L> = Box<dyn FnOnce(&Core<L>) + Send>;

/// An operation admitted to the worker queue.
enum Op<L: Logic> {
    Dispatch {
        command: L::Command,
        reply: oneshot::Sender<Result<RecordId>>,
    },
    Reconcile(Vec<LogicRecord<L>>),
    Read(Read<L>),
    Shutdown,
}

/// Why the worker stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Exit {
    Shutdown,
    Failed,
}

/// State owned by the worker task.
struct Core<L: Logic> {
    logic: L,
    state: L::State,
    ledger: Vec<LogicRecord<L>>,
    repository: Repository<L>,
    on_change: OnChange<L>,
    /// Ids whose durable write failed since the last reconciliation
    divergent: Vec<RecordId>,
    resync_on_persist_failure: bool,
}

impl<L: Logic> Core<L> {
    async fn run(mut self, mut rx: tokio::sync::mpsc::UnboundedReceiver<Op<L>>) -> Exit {
        tracing::debug!("store worker started");

        while let Some(op) = rx.recv().await {
            match op {
                Op::Dispatch { command, reply } => {
                    let result = self.dispatch(command).await;
                    let _ = reply.send(result);
                }
                Op::Reconcile(records) => {
                    let count = records.len();
                    let replayed =
                        panic::catch_unwind(AssertUnwindSafe(|| self.reconcile(records)));
                    if replayed.is_err() {
                        tracing::error!(
                            records = count,
                            "replaying canonical records panicked, halting store"
                        );
                        return Exit::Failed;
                    }
                }
                Op::Read(read) => read(&self),
                Op::Shutdown => break,
            }
        }

        tracing::debug!(ledger = self.ledger.len(), "store worker stopped");
        Exit::Shutdown
    }

    /// Script, reserve, apply optimistically, then commit.
    async fn dispatch(&mut self, command: L::Command) -> Result<RecordId> {
        let outcome = self
            .logic
            .script(&self.state, &command)
            .await
            .map_err(|source| {
                tracing::debug!(error = %source, "script failed, nothing recorded");
                Error::Script(source)
            })?;

        let handle = self
            .repository
            .save(NewRecord::new(command.clone(), outcome.clone()));
        let (id, exec) = handle.into_parts();

        let state = self.logic.reduce(&self.state, &outcome);
        let record = NewRecord::new(command, outcome).with_id(id.clone());
        self.state = state;
        (self.on_change)(Some(&record.command), &self.state);
        self.ledger.push(record);

        tracing::debug!(record_id = %id, ledger = self.ledger.len(), "applied optimistically");

        if let Err(source) = exec.await {
            // Optimistic state stays; the next reconciliation corrects it.
            tracing::warn!(
                record_id = %id,
                error = %source,
                "durable write failed after optimistic apply"
            );
            self.divergent.push(id.clone());
            if self.resync_on_persist_failure {
                self.repository.resync();
            }
            return Err(Error::Persist { id, source });
        }

        tracing::trace!(record_id = %id, "record committed");
        Ok(id)
    }

    /// Replace the ledger with the canonical list and replay from scratch.
    fn reconcile(&mut self, canonical: Vec<LogicRecord<L>>) {
        let (canonical, duplicates) = reconcile::dedupe(canonical);
        if !duplicates.is_empty() {
            tracing::warn!(
                duplicates = ?duplicates,
                "canonical list repeats record ids, keeping first occurrences"
            );
        }

        let mut report = ReplayReport::compare(&self.ledger, &canonical);
        report.duplicates = duplicates;

        self.state = reconcile::replay(&self.logic, &canonical);
        self.ledger = canonical;
        self.divergent.clear();

        tracing::debug!(
            replayed = report.replayed,
            confirmed = report.confirmed,
            superseded = report.superseded.len(),
            introduced = report.introduced,
            "reconciled with canonical records"
        );

        (self.on_change)(None, &self.state);
    }

    fn snapshot(&self) -> StoreSnapshot<L::State, L::Command, L::Outcome> {
        StoreSnapshot::new(
            self.state.clone(),
            self.ledger.clone(),
            self.divergent.clone(),
        )
    }
}

/// The state container.
///
/// Every method admits its operation to the store's queue before returning,
/// so concurrent callers are served in call order. Wrap the store in an
/// `Arc` to dispatch from several tasks.
pub struct Store<L: Logic> {
    queue: Queue<Op<L>>,
    repository: Repository<L>,
    worker: Option<JoinHandle<Exit>>,
    unwatched: bool,
}

impl<L: Logic> Store<L> {
    /// Create a store with default options.
    ///
    /// `create_repository` is called exactly once, before this returns, with
    /// the listener that feeds canonical record lists into reconciliation.
    /// `on_change` is called with the dispatched command after every
    /// optimistic apply and with `None` after every reconciliation.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new<F, Repo, Factory>(logic: L, on_change: F, create_repository: Factory) -> Self
    where
        F: Fn(Option<&L::Command>, &L::State) + Send + 'static,
        Repo: RecordRepository<L::Command, L::Outcome>,
        Factory: FnOnce(RecordListener<L::Command, L::Outcome>) -> Repo,
    {
        Self::with_options(logic, on_change, create_repository, StoreOptions::default())
    }

    /// Create a store with explicit options.
    pub fn with_options<F, Repo, Factory>(
        logic: L,
        on_change: F,
        create_repository: Factory,
        options: StoreOptions,
    ) -> Self
    where
        F: Fn(Option<&L::Command>, &L::State) + Send + 'static,
        Repo: RecordRepository<L::Command, L::Outcome>,
        Factory: FnOnce(RecordListener<L::Command, L::Outcome>) -> Repo,
    {
        let (queue, rx) = Queue::channel();

        let inbox = queue.clone();
        let listener = RecordListener::<L::Command, L::Outcome>::new(move |records| {
            if inbox.push(Op::Reconcile(records)).is_err() {
                tracing::trace!("canonical records arrived after store shutdown");
            }
        });

        let repository: Repository<L> = Arc::new(create_repository(listener));

        let core = Core {
            state: logic.initial(),
            logic,
            ledger: Vec::new(),
            repository: Arc::clone(&repository),
            on_change: Box::new(on_change),
            divergent: Vec::new(),
            resync_on_persist_failure: options.resync_on_persist_failure,
        };

        let span = tracing::info_span!("store", name = %options.name);
        let worker = tokio::spawn(core.run(rx).instrument(span));

        Self {
            queue,
            repository,
            worker: Some(worker),
            unwatched: false,
        }
    }

    /// Run `command` through script, save, optimistic apply and commit.
    ///
    /// Resolves to the record id once the durable write completed. On
    /// [`Error::Persist`] the command has still been applied to state.
    /// Dropping the future does not cancel the dispatch.
    pub fn dispatch(
        &self,
        command: L::Command,
    ) -> impl Future<Output = Result<RecordId>> + Send + 'static {
        let reply = self.queue.call(|reply| Op::Dispatch { command, reply });
        async move { reply.await? }
    }

    /// Current state.
    pub fn state(&self) -> impl Future<Output = Result<L::State>> + Send + 'static {
        self.read(|core| core.state.clone())
    }

    /// Records the current state was derived from.
    pub fn ledger(&self) -> impl Future<Output = Result<Vec<LogicRecord<L>>>> + Send + 'static {
        self.read(|core| core.ledger.clone())
    }

    /// State, ledger and divergence status in one read.
    pub fn snapshot(
        &self,
    ) -> impl Future<Output = Result<StoreSnapshot<L::State, L::Command, L::Outcome>>> + Send + 'static
    {
        self.read(|core| core.snapshot())
    }

    /// Whether a durable write failed since the last reconciliation.
    pub fn is_diverged(&self) -> impl Future<Output = Result<bool>> + Send + 'static {
        self.read(|core| !core.divergent.is_empty())
    }

    /// Finish every queued operation, stop the worker and unwatch.
    ///
    /// Fails with [`Error::Halted`] if the worker had already stopped on a
    /// fatal error.
    pub async fn close(mut self) -> Result<()> {
        let exit = match self.worker.take() {
            Some(worker) => {
                let _ = self.queue.push(Op::Shutdown);
                worker.await
            }
            None => Ok(Exit::Shutdown),
        };
        self.release();

        match exit {
            Ok(Exit::Shutdown) => Ok(()),
            Ok(Exit::Failed) => Err(Error::Halted),
            Err(err) => {
                tracing::error!(error = %err, "store worker panicked");
                Err(Error::Halted)
            }
        }
    }

    fn read<T, F>(&self, read: F) -> impl Future<Output = Result<T>> + Send + 'static
    where
        T: Send + 'static,
        F: FnOnce(&Core<L>) -> T + Send + 'static,
    {
        self.queue.call(|reply| {
            Op::Read(Box::new(move |core: &Core<L>| {
                let _ = reply.send(read(core));
            }))
        })
    }

    fn release(&mut self) {
        if !self.unwatched {
            self.unwatched = true;
            self.repository.unwatch();
        }
    }
}

impl<L: Logic> Drop for Store<L> {
    fn drop(&mut self) {
        if self.worker.take().is_some() {
            let _ = self.queue.push(Op::Shutdown);
        }
        self.release();
    }
}
