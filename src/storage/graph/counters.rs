//! Named atomic counters.
//!
//! Counters sit outside the version chains: a bump is visible to every
//! transaction at once and survives an abort of the transaction that made it.

use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use tracing::trace;

use crate::types::Result;

use super::GraphAccessor;

/// Set of named counters shared by all transactions of a graph.
#[derive(Default)]
pub struct Counters {
    counters: RwLock<FxHashMap<String, Arc<AtomicI64>>>,
}

impl Counters {
    /// Returns the current value of `name` and increments it. A missing
    /// counter starts at zero.
    pub fn get(&self, name: &str) -> i64 {
        self.slot(name).fetch_add(1, Ordering::AcqRel)
    }

    /// Sets `name` to `value`, creating the counter if needed.
    pub fn set(&self, name: &str, value: i64) {
        self.slot(name).store(value, Ordering::Release);
    }

    fn slot(&self, name: &str) -> Arc<AtomicI64> {
        if let Some(slot) = self.counters.read().get(name) {
            return Arc::clone(slot);
        }
        let mut counters = self.counters.write();
        Arc::clone(counters.entry(name.to_owned()).or_default())
    }
}

impl fmt::Debug for Counters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Counters")
            .field("len", &self.counters.read().len())
            .finish()
    }
}

impl GraphAccessor {
    /// Returns the current value of counter `name` and increments it.
    pub fn counter(&self, name: &str) -> Result<i64> {
        self.check_active()?;
        let value = self.graph.counters().get(name);
        trace!(tx = self.tx.id().0, counter = name, value, "graph.counter.get");
        Ok(value)
    }

    /// Sets counter `name` to `value`.
    pub fn counter_set(&self, name: &str, value: i64) -> Result<()> {
        self.check_active()?;
        self.graph.counters().set(name, value);
        trace!(tx = self.tx.id().0, counter = name, value, "graph.counter.set");
        Ok(())
    }
}
