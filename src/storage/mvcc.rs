//! Version records and the visibility rules evaluated against them.

use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam_epoch::Atomic;
use serde::{Deserialize, Serialize};

use crate::transaction::{CommitLog, Transaction};
use crate::types::{CommandId, TxId};

/// Which state of the store a read observes.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Default)]
pub enum ReadMode {
    /// State as of the start of the transaction's current command: the
    /// transaction's earlier commands are visible, its current one is not.
    #[default]
    Snapshot,
    /// Like [`ReadMode::Snapshot`] but the transaction's own writes from every
    /// command are applied, including the current one.
    CurrentState,
}

/// One immutable snapshot of a record plus its MVCC stamps.
///
/// Creation stamps never change. The expiry stamp is written by the chain's
/// lock holder: command first, then the transaction id with release ordering,
/// so a reader that observes the id also observes the matching command.
pub struct Version<T> {
    seq: u64,
    created_by: TxId,
    created_cmd: CommandId,
    expired_by: AtomicU64,
    expired_cmd: AtomicU32,
    payload: Arc<T>,
    pub(crate) next: Atomic<Version<T>>,
}

impl<T> Version<T> {
    pub(crate) fn new(seq: u64, tx: &Transaction, payload: Arc<T>) -> Self {
        Self {
            seq,
            created_by: tx.id(),
            created_cmd: tx.command_id(),
            expired_by: AtomicU64::new(TxId::NONE.0),
            expired_cmd: AtomicU32::new(0),
            payload,
            next: Atomic::null(),
        }
    }

    /// Position of the version within its chain; older versions have
    /// smaller numbers.
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Creating transaction.
    pub fn created_by(&self) -> TxId {
        self.created_by
    }

    /// Command of the creating transaction.
    pub fn created_cmd(&self) -> CommandId {
        self.created_cmd
    }

    /// Expiring transaction, if any.
    pub fn expired_by(&self) -> Option<TxId> {
        let raw = self.expired_by.load(Ordering::Acquire);
        (raw != TxId::NONE.0).then_some(TxId(raw))
    }

    /// Command of the expiring transaction, if any.
    pub fn expired_cmd(&self) -> Option<CommandId> {
        self.expired_by()
            .map(|_| CommandId(self.expired_cmd.load(Ordering::Relaxed)))
    }

    /// Record contents.
    pub fn payload(&self) -> &Arc<T> {
        &self.payload
    }

    pub(crate) fn mark_expired(&self, tx: TxId, cmd: CommandId) {
        self.expired_cmd.store(cmd.0, Ordering::Relaxed);
        self.expired_by.store(tx.0, Ordering::Release);
    }

    /// Returns `true` if `tx` observes this version under `mode`.
    pub fn visible(&self, tx: &Transaction, clog: &CommitLog, mode: ReadMode) -> bool {
        self.created_visible(tx, clog, mode) && !self.expired_for(tx, clog, mode)
    }

    pub(crate) fn created_visible(&self, tx: &Transaction, clog: &CommitLog, mode: ReadMode) -> bool {
        if self.created_by == tx.id() {
            match mode {
                ReadMode::Snapshot => self.created_cmd < tx.command_id(),
                ReadMode::CurrentState => true,
            }
        } else {
            committed_before(self.created_by, tx, clog)
        }
    }

    fn expired_for(&self, tx: &Transaction, clog: &CommitLog, mode: ReadMode) -> bool {
        let Some(expirer) = self.expired_by() else {
            return false;
        };
        if expirer == tx.id() {
            match mode {
                ReadMode::Snapshot => self
                    .expired_cmd()
                    .is_some_and(|cmd| cmd < tx.command_id()),
                ReadMode::CurrentState => true,
            }
        } else {
            committed_before(expirer, tx, clog)
        }
    }

    /// Returns `true` when `tx` wrote this version in its current command and
    /// nothing expired it since.
    pub(crate) fn written_in_current_command(&self, tx: &Transaction) -> bool {
        self.created_by == tx.id()
            && self.created_cmd == tx.command_id()
            && self.expired_by().is_none()
    }

    /// Returns `true` when no transaction at or after the reclaim boundary
    /// can observe this version. `oldest` is the boundary's largest id.
    pub(crate) fn not_visible_from(
        &self,
        boundary: &crate::transaction::Snapshot,
        oldest: TxId,
        clog: &CommitLog,
    ) -> bool {
        let expired_for_all = self.expired_by().is_some_and(|expirer| {
            expirer < oldest && !boundary.contains(expirer) && clog.fetch_info(expirer).is_committed()
        });
        let aborted_creation =
            self.created_by < oldest && clog.fetch_info(self.created_by).is_aborted();
        expired_for_all || aborted_creation
    }

    /// Diagnostic copy of the stamps.
    pub fn info(&self) -> VersionInfo {
        VersionInfo {
            seq: self.seq,
            created_by: self.created_by,
            created_cmd: self.created_cmd,
            expired_by: self.expired_by(),
            expired_cmd: self.expired_cmd(),
        }
    }
}

impl<T> fmt::Debug for Version<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.info(), f)
    }
}

/// "`x` committed before `tx` began": `x` is older, was not running when
/// `tx` took its snapshot, and is committed now.
pub(crate) fn committed_before(x: TxId, tx: &Transaction, clog: &CommitLog) -> bool {
    x < tx.id() && !tx.snapshot().contains(x) && clog.fetch_info(x).is_committed()
}

/// Stamps of one version, newest first when returned by a chain.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct VersionInfo {
    /// Order of creation within the chain.
    pub seq: u64,
    /// Creating transaction.
    pub created_by: TxId,
    /// Creating command.
    pub created_cmd: CommandId,
    /// Expiring transaction.
    pub expired_by: Option<TxId>,
    /// Expiring command.
    pub expired_cmd: Option<CommandId>,
}
