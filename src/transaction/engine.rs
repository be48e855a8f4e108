use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use tracing::{debug, trace};

use super::commit_log::{CommitInfo, CommitLog};
use super::snapshot::Snapshot;
use crate::durability::{DurabilitySink, NullSink, StateDelta};
use crate::types::{CommandId, MvccError, Result, TxId};

/// A running transaction.
///
/// Handed out by [`Engine::begin`] as an `Arc`; the engine drops its own
/// reference when the transaction commits or aborts.
pub struct Transaction {
    id: TxId,
    command_id: AtomicU32,
    snapshot: Snapshot,
}

impl Transaction {
    fn new(id: TxId, snapshot: Snapshot) -> Self {
        Self {
            id,
            command_id: AtomicU32::new(CommandId::FIRST.0),
            snapshot,
        }
    }

    /// Transaction id.
    pub fn id(&self) -> TxId {
        self.id
    }

    /// Current command id.
    pub fn command_id(&self) -> CommandId {
        CommandId(self.command_id.load(Ordering::Acquire))
    }

    /// Ids that were active when the transaction began.
    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    #[cfg(test)]
    pub(crate) fn force_command_id(&self, cmd: CommandId) {
        self.command_id.store(cmd.0, Ordering::Release);
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id.0)
            .field("command_id", &self.command_id().0)
            .field("snapshot", &self.snapshot)
            .finish()
    }
}

/// Terminal outcome reported to [`TransactionListener`]s.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TxOutcome {
    /// The transaction committed.
    Committed,
    /// The transaction aborted.
    Aborted,
}

/// Observer of transaction completion, for coordinators that track
/// transactions across workers.
///
/// Called after the engine released its lock, on the thread that finished
/// the transaction.
pub trait TransactionListener: Send + Sync {
    /// `tx` reached a terminal state.
    fn on_finished(&self, tx: TxId, outcome: TxOutcome);
}

#[derive(Default)]
struct EngineState {
    counter: u64,
    active: Snapshot,
    store: FxHashMap<TxId, Arc<Transaction>>,
}

/// Single-node transaction engine.
///
/// Issues ids, tracks the active set and records outcomes in the
/// [`CommitLog`]. Every mutation of the counter, the active set and the
/// commit log happens under one mutex; [`Engine::info`] reads the commit log
/// without taking it.
pub struct Engine {
    state: Mutex<EngineState>,
    clog: CommitLog,
    sink: Arc<dyn DurabilitySink>,
    listeners: RwLock<Vec<Arc<dyn TransactionListener>>>,
}

impl Engine {
    /// Creates an engine that emits transaction markers to `sink`.
    pub fn new(sink: Arc<dyn DurabilitySink>) -> Self {
        Self {
            state: Mutex::new(EngineState::default()),
            clog: CommitLog::new(),
            sink,
            listeners: RwLock::new(Vec::new()),
        }
    }

    /// Starts a transaction whose snapshot is the current active set.
    pub fn begin(&self) -> Arc<Transaction> {
        let mut state = self.state.lock();
        state.counter += 1;
        let id = TxId(state.counter);
        let tx = Arc::new(Transaction::new(id, state.active.clone()));
        state.active.insert(id);
        state.store.insert(id, Arc::clone(&tx));
        self.sink.emplace(StateDelta::TxBegin { tx: id });
        trace!(tx = id.0, active = state.active.len(), "mvcc.engine.begin");
        tx
    }

    /// Moves `id` to its next command and returns the new command id.
    ///
    /// At [`CommandId::MAX`] the counter is left unchanged and
    /// [`MvccError::CommandOverflow`] is returned; the transaction can still
    /// be committed or aborted.
    pub fn advance(&self, id: TxId) -> Result<CommandId> {
        let state = self.state.lock();
        let tx = state
            .store
            .get(&id)
            .ok_or(MvccError::InvalidTransactionState { tx: id })?;
        let current = tx.command_id.load(Ordering::Acquire);
        if current == CommandId::MAX.0 {
            debug!(tx = id.0, "mvcc.engine.command_overflow");
            return Err(MvccError::CommandOverflow { tx: id });
        }
        let next = current + 1;
        tx.command_id.store(next, Ordering::Release);
        Ok(CommandId(next))
    }

    /// Current command id of an active transaction.
    pub fn command_id(&self, id: TxId) -> Result<CommandId> {
        self.state
            .lock()
            .store
            .get(&id)
            .map(|tx| tx.command_id())
            .ok_or(MvccError::InvalidTransactionState { tx: id })
    }

    /// Commits `tx`.
    pub fn commit(&self, tx: &Transaction) -> Result<()> {
        self.finish(tx.id, TxOutcome::Committed)
    }

    /// Aborts `tx`.
    pub fn abort(&self, tx: &Transaction) -> Result<()> {
        self.finish(tx.id, TxOutcome::Aborted)
    }

    fn finish(&self, id: TxId, outcome: TxOutcome) -> Result<()> {
        {
            let mut state = self.state.lock();
            if !state.active.remove(id) {
                return Err(MvccError::InvalidTransactionState { tx: id });
            }
            state.store.remove(&id);
            match outcome {
                TxOutcome::Committed => {
                    self.clog.set_committed(id);
                    self.sink.emplace(StateDelta::TxCommit { tx: id });
                }
                TxOutcome::Aborted => {
                    self.clog.set_aborted(id);
                    self.sink.emplace(StateDelta::TxAbort { tx: id });
                }
            }
            trace!(tx = id.0, ?outcome, active = state.active.len(), "mvcc.engine.finish");
        }
        let listeners = self.listeners.read().clone();
        for listener in listeners {
            listener.on_finished(id, outcome);
        }
        Ok(())
    }

    /// Recorded outcome of `id`. Never blocks.
    pub fn info(&self, id: TxId) -> CommitInfo {
        self.clog.fetch_info(id)
    }

    /// Commit log backing [`Engine::info`].
    pub fn commit_log(&self) -> &CommitLog {
        &self.clog
    }

    /// Copy of the current active set.
    pub fn global_active_transactions(&self) -> Snapshot {
        self.state.lock().active.clone()
    }

    /// Returns `true` while `id` is active.
    pub fn global_is_active(&self, id: TxId) -> bool {
        self.state.lock().active.contains(id)
    }

    /// Reclaim boundary for garbage collection.
    ///
    /// With nothing active this is `{last issued id + 1}`. Otherwise it is
    /// the oldest active transaction's snapshot plus that transaction's id,
    /// so every version such a transaction could still read is protected.
    pub fn global_gc_snapshot(&self) -> Snapshot {
        let state = self.state.lock();
        let Some(oldest) = state.active.front() else {
            return Snapshot::from_ids([TxId(state.counter + 1)]);
        };
        let mut boundary = state
            .store
            .get(&oldest)
            .map(|tx| tx.snapshot.clone())
            .unwrap_or_default();
        boundary.insert(oldest);
        boundary
    }

    /// Last issued transaction id, or [`TxId::NONE`] before the first begin.
    pub fn local_last(&self) -> TxId {
        TxId(self.state.lock().counter)
    }

    /// Visits every active transaction while holding the engine lock.
    ///
    /// `f` must not call back into the engine.
    pub fn local_for_each_active_transaction(&self, mut f: impl FnMut(&Transaction)) {
        let state = self.state.lock();
        for id in state.active.iter() {
            if let Some(tx) = state.store.get(&id) {
                f(tx);
            }
        }
    }

    /// Handle of an active transaction.
    pub fn running_transaction(&self, id: TxId) -> Option<Arc<Transaction>> {
        self.state.lock().store.get(&id).cloned()
    }

    /// Adds a completion listener.
    pub fn register_listener(&self, listener: Arc<dyn TransactionListener>) {
        self.listeners.write().push(listener);
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(Arc::new(NullSink))
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Engine")
            .field("last", &state.counter)
            .field("active", &state.active)
            .finish()
    }
}
