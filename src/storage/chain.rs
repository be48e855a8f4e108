//! Per-record version chain.
//!
//! Versions are linked newest first through epoch-managed pointers. Readers
//! pin an epoch and walk the chain without locking; writers and the garbage
//! collector serialize on the chain's mutex. Nodes unlinked by the collector
//! are handed to `crossbeam-epoch` and freed only once every reader that may
//! still hold them has unpinned.

#![allow(unsafe_code)]

use std::fmt;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use crossbeam_epoch::{self as epoch, Atomic, Guard, Owned, Shared};
use parking_lot::Mutex;
use tracing::error;

use super::mvcc::{ReadMode, Version, VersionInfo};
use crate::transaction::{CommitLog, Snapshot, Transaction};
use crate::types::{Gid, MvccError, Result};

/// Result of one collection pass over a chain.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ChainGcOutcome {
    /// Versions unlinked and scheduled for destruction.
    pub reclaimed: usize,
    /// The whole chain is unreachable and should be dropped by its owner.
    pub dead: bool,
}

struct ChainMeta {
    next_seq: u64,
}

/// History of one vertex or edge.
pub struct VersionChain<T> {
    gid: Gid,
    head: Atomic<Version<T>>,
    lock: Mutex<ChainMeta>,
}

impl<T: Send + Sync> VersionChain<T> {
    /// Creates a chain whose only version is written by `tx`.
    pub fn new(gid: Gid, tx: &Transaction, payload: T) -> Self {
        let first = Version::new(0, tx, Arc::new(payload));
        Self {
            gid,
            head: Atomic::new(first),
            lock: Mutex::new(ChainMeta { next_seq: 1 }),
        }
    }

    /// Record id.
    pub fn gid(&self) -> Gid {
        self.gid
    }

    /// Payload of the version `tx` observes under `mode`.
    pub fn find(&self, tx: &Transaction, clog: &CommitLog, mode: ReadMode) -> Option<Arc<T>> {
        let guard = epoch::pin();
        let found = self
            .iter(&guard)
            .find(|version| version.visible(tx, clog, mode))
            .map(|version| Arc::clone(version.payload()));
        found
    }

    /// Returns `true` when some version is visible to `tx` under `mode`.
    pub fn is_visible(&self, tx: &Transaction, clog: &CommitLog, mode: ReadMode) -> bool {
        let guard = epoch::pin();
        let visible = self.iter(&guard).any(|version| version.visible(tx, clog, mode));
        visible
    }

    /// Writes a new version derived from the one `tx` may modify.
    ///
    /// Fails with [`MvccError::Serialization`] when another transaction that
    /// is still running or already committed expired the target, and with
    /// [`MvccError::EntityNotFound`] when nothing is visible or `tx` itself
    /// deleted the record.
    pub fn update<F>(&self, tx: &Transaction, clog: &CommitLog, f: F) -> Result<Arc<T>>
    where
        F: FnOnce(&T) -> T,
    {
        let mut meta = self.lock.lock();
        let guard = epoch::pin();
        let target = self
            .writable_target(tx, clog, &guard)
            .ok_or(MvccError::EntityNotFound { gid: self.gid })?;
        if !self.check_expirer(target, tx, clog)? {
            return Err(MvccError::EntityNotFound { gid: self.gid });
        }
        let payload = Arc::new(f(target.payload()));
        target.mark_expired(tx.id(), tx.command_id());

        let version = Version::new(meta.next_seq, tx, Arc::clone(&payload));
        meta.next_seq += 1;
        let head = self.head.load(Ordering::Acquire, &guard);
        version.next.store(head, Ordering::Relaxed);
        self.head.store(Owned::new(version), Ordering::Release);
        Ok(payload)
    }

    /// Marks the version `tx` may modify as deleted.
    ///
    /// Returns `Ok(false)` when `tx` already deleted the record, and the same
    /// errors as [`VersionChain::update`] otherwise.
    pub fn remove(&self, tx: &Transaction, clog: &CommitLog) -> Result<bool> {
        let _meta = self.lock.lock();
        let guard = epoch::pin();
        let target = self
            .writable_target(tx, clog, &guard)
            .ok_or(MvccError::EntityNotFound { gid: self.gid })?;
        if !self.check_expirer(target, tx, clog)? {
            return Ok(false);
        }
        target.mark_expired(tx.id(), tx.command_id());
        Ok(true)
    }

    /// Unlinks every version that no transaction at or after `boundary` can
    /// observe.
    ///
    /// When nothing in the chain can be observed the head itself is
    /// unlinked and the outcome is marked dead.
    pub fn gc_deleted(&self, boundary: &Snapshot, clog: &CommitLog) -> ChainGcOutcome {
        let Some(oldest) = boundary.back() else {
            return ChainGcOutcome::default();
        };
        let _meta = self.lock.lock();
        let guard = epoch::pin();

        let mut oldest_visible: Option<&Version<T>> = None;
        for version in self.iter(&guard) {
            if let Some(expirer) = version.expired_by() {
                if expirer < version.created_by() {
                    error!(
                        gid = self.gid.0,
                        created_by = version.created_by().0,
                        expired_by = expirer.0,
                        "mvcc.gc.expired_before_created"
                    );
                    panic!(
                        "version of record {} expired by {} before its creator {}",
                        self.gid,
                        expirer,
                        version.created_by()
                    );
                }
            }
            if !version.not_visible_from(boundary, oldest, clog) {
                oldest_visible = Some(version);
            }
        }

        match oldest_visible {
            Some(version) => {
                let tail = version.next.swap(Shared::null(), Ordering::AcqRel, &guard);
                ChainGcOutcome {
                    reclaimed: Self::retire(tail, &guard),
                    dead: false,
                }
            }
            None => {
                let tail = self.head.swap(Shared::null(), Ordering::AcqRel, &guard);
                ChainGcOutcome {
                    reclaimed: Self::retire(tail, &guard),
                    dead: true,
                }
            }
        }
    }

    /// Stamps of every linked version, newest first.
    pub fn history(&self) -> Vec<VersionInfo> {
        let guard = epoch::pin();
        let history = self.iter(&guard).map(Version::info).collect();
        history
    }

    /// Number of linked versions.
    pub fn len(&self) -> usize {
        let guard = epoch::pin();
        let len = self.iter(&guard).count();
        len
    }

    /// Returns `true` once the collector unlinked the whole chain.
    pub fn is_empty(&self) -> bool {
        let guard = epoch::pin();
        let empty = self.head.load(Ordering::Acquire, &guard).is_null();
        empty
    }

    fn iter<'g>(&self, guard: &'g Guard) -> ChainIter<'g, T> {
        ChainIter {
            cursor: self.head.load(Ordering::Acquire, guard),
            guard,
        }
    }

    /// The writer's own version from its current command if there is one,
    /// otherwise the version it observes, otherwise the version it deleted
    /// in an earlier command.
    fn writable_target<'g>(
        &self,
        tx: &Transaction,
        clog: &CommitLog,
        guard: &'g Guard,
    ) -> Option<&'g Version<T>> {
        self.iter(guard).find(|version| {
            version.written_in_current_command(tx)
                || version.visible(tx, clog, ReadMode::Snapshot)
                || (version.expired_by() == Some(tx.id())
                    && version.created_visible(tx, clog, ReadMode::Snapshot))
        })
    }

    /// `Ok(true)` if `tx` may expire `target`, `Ok(false)` if `tx` already did.
    fn check_expirer(&self, target: &Version<T>, tx: &Transaction, clog: &CommitLog) -> Result<bool> {
        match target.expired_by() {
            None => Ok(true),
            Some(expirer) if expirer == tx.id() => Ok(false),
            Some(expirer) if clog.fetch_info(expirer).is_aborted() => Ok(true),
            Some(_) => Err(MvccError::Serialization { gid: self.gid }),
        }
    }

    fn retire<'g>(mut cursor: Shared<'g, Version<T>>, guard: &'g Guard) -> usize {
        let mut reclaimed = 0;
        while !cursor.is_null() {
            // SAFETY: the node was reachable until the swap above and is now
            // unlinked; the guard keeps it alive while we read `next`.
            let next = unsafe { cursor.deref() }.next.load(Ordering::Acquire, guard);
            // SAFETY: unlinked under the chain lock, so no new reader can reach
            // it and current readers are covered by their own guards.
            unsafe { guard.defer_destroy(cursor) };
            reclaimed += 1;
            cursor = next;
        }
        reclaimed
    }
}

impl<T> Drop for VersionChain<T> {
    fn drop(&mut self) {
        // SAFETY: `&mut self` means no reader or writer holds the chain.
        unsafe {
            let guard = epoch::unprotected();
            let mut cursor = self.head.load(Ordering::Relaxed, guard);
            while !cursor.is_null() {
                let owned = cursor.into_owned();
                cursor = owned.next.load(Ordering::Relaxed, guard);
                drop(owned);
            }
        }
    }
}

impl<T: Send + Sync> fmt::Debug for VersionChain<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VersionChain")
            .field("gid", &self.gid.0)
            .field("history", &self.history())
            .finish()
    }
}

struct ChainIter<'g, T> {
    cursor: Shared<'g, Version<T>>,
    guard: &'g Guard,
}

impl<'g, T> Iterator for ChainIter<'g, T> {
    type Item = &'g Version<T>;

    fn next(&mut self) -> Option<Self::Item> {
        // SAFETY: every node reachable from the head is alive for the guard's
        // lifetime; unlinked nodes are only destroyed after it unpins.
        let version = unsafe { self.cursor.as_ref() }?;
        self.cursor = version.next.load(Ordering::Acquire, self.guard);
        Some(version)
    }
}
