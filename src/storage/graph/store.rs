use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use crate::storage::chain::VersionChain;
use crate::storage::record::Record;
use crate::transaction::Transaction;
use crate::types::{Gid, MvccError, Result};

/// Collection of version chains keyed by record id.
pub struct ChainStore<T> {
    chains: RwLock<FxHashMap<Gid, Arc<VersionChain<T>>>>,
    next_gid: AtomicU64,
}

impl<T: Record> ChainStore<T> {
    pub(crate) fn new() -> Self {
        Self {
            chains: RwLock::new(FxHashMap::default()),
            next_gid: AtomicU64::new(0),
        }
    }

    /// Creates a chain for a record inserted by `tx`. Without an explicit id
    /// the next free one is used, skipping ids taken explicitly; explicit ids
    /// move the generator past them.
    pub(crate) fn insert(
        &self,
        gid: Option<Gid>,
        tx: &Transaction,
        payload: T,
    ) -> Result<Arc<VersionChain<T>>> {
        let mut chains = self.chains.write();
        let gid = match gid {
            Some(gid) => {
                if chains.contains_key(&gid) {
                    return Err(MvccError::Invalid("record id already in use"));
                }
                self.next_gid
                    .fetch_max(gid.0.saturating_add(1), Ordering::AcqRel);
                gid
            }
            None => loop {
                let candidate = Gid(self.next_gid.fetch_add(1, Ordering::AcqRel));
                if !chains.contains_key(&candidate) {
                    break candidate;
                }
            },
        };
        let chain = Arc::new(VersionChain::new(gid, tx, payload));
        chains.insert(gid, Arc::clone(&chain));
        Ok(chain)
    }

    /// Chain for `gid`, visible or not.
    pub fn get(&self, gid: Gid) -> Option<Arc<VersionChain<T>>> {
        self.chains.read().get(&gid).cloned()
    }

    /// Every chain, ordered by id.
    pub fn chains(&self) -> Vec<Arc<VersionChain<T>>> {
        let mut all: Vec<_> = self.chains.read().values().cloned().collect();
        all.sort_unstable_by_key(|chain| chain.gid());
        all
    }

    /// Drops `chain` from the collection if it is still the one stored
    /// under its id.
    pub(crate) fn unlink(&self, chain: &Arc<VersionChain<T>>) -> bool {
        let mut chains = self.chains.write();
        match chains.get(&chain.gid()) {
            Some(current) if Arc::ptr_eq(current, chain) => {
                chains.remove(&chain.gid());
                true
            }
            _ => false,
        }
    }

    /// Number of chains, regardless of visibility.
    pub fn len(&self) -> usize {
        self.chains.read().len()
    }

    /// Returns `true` when the collection holds no chains.
    pub fn is_empty(&self) -> bool {
        self.chains.read().is_empty()
    }
}

impl<T> fmt::Debug for ChainStore<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChainStore")
            .field("len", &self.chains.read().len())
            .field("next_gid", &self.next_gid.load(Ordering::Relaxed))
            .finish()
    }
}
