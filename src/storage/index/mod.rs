//! Secondary index hooks.
//!
//! The store does not implement index data structures. Callers register an
//! [`IndexHook`] per label/property key and the graph layer tells it about
//! every vertex version that starts matching the key, either from a write or
//! from the bulk scan performed by an index build.

use std::fmt;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};

use crate::storage::chain::VersionChain;
use crate::storage::record::Vertex;
use crate::transaction::Transaction;
use crate::types::{LabelId, MvccError, PropId, Result, TxId};

/// Label/property pair identifying an index.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct IndexKey {
    /// Indexed label.
    pub label: LabelId,
    /// Indexed property.
    pub prop: PropId,
}

impl IndexKey {
    /// Creates a key.
    pub fn new(label: impl Into<LabelId>, prop: impl Into<PropId>) -> Self {
        Self {
            label: label.into(),
            prop: prop.into(),
        }
    }

    /// Returns `true` when `vertex` carries the label and a non-null value
    /// for the property.
    pub fn matches(&self, vertex: &Vertex) -> bool {
        vertex.has_label(self.label)
            && vertex
                .props
                .get(&self.prop)
                .is_some_and(|value| !value.is_null())
    }
}

impl fmt::Display for IndexKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(label {}, prop {})", self.label, self.prop)
    }
}

/// Receiver of index entries.
///
/// `insert` runs synchronously inside the write that produced `vertex`, on
/// the writer's thread. The entry is only meaningful to readers for which
/// `vertex` is visible, so implementations re-check visibility through
/// `chain` when answering lookups.
pub trait IndexHook: Send + Sync {
    /// `vertex`, a version of `chain` written or observed by `tx`, matches
    /// `key`.
    fn insert(&self, key: IndexKey, chain: &Arc<VersionChain<Vertex>>, vertex: &Vertex, tx: &Transaction);
}

/// Registered keys and their hooks.
#[derive(Default)]
pub(crate) struct IndexRegistry {
    hooks: RwLock<Vec<(IndexKey, Arc<dyn IndexHook>)>>,
}

impl IndexRegistry {
    pub(crate) fn register(&self, key: IndexKey, hook: Arc<dyn IndexHook>) -> Result<()> {
        let mut hooks = self.hooks.write();
        if hooks.iter().any(|(existing, _)| *existing == key) {
            return Err(MvccError::IndexExists {
                label: key.label,
                prop: key.prop,
            });
        }
        hooks.push((key, hook));
        Ok(())
    }

    pub(crate) fn unregister(&self, key: IndexKey) {
        self.hooks.write().retain(|(existing, _)| *existing != key);
    }

    pub(crate) fn keys(&self) -> Vec<IndexKey> {
        self.hooks.read().iter().map(|(key, _)| *key).collect()
    }

    pub(crate) fn hook(&self, key: IndexKey) -> Option<Arc<dyn IndexHook>> {
        self.hooks
            .read()
            .iter()
            .find(|(existing, _)| *existing == key)
            .map(|(_, hook)| Arc::clone(hook))
    }

    /// Feeds hooks whose key has `label` after a label was added.
    pub(crate) fn on_label(
        &self,
        label: LabelId,
        chain: &Arc<VersionChain<Vertex>>,
        vertex: &Vertex,
        tx: &Transaction,
    ) {
        self.dispatch(|key| key.label == label, chain, vertex, tx);
    }

    /// Feeds hooks whose key has `prop` after a property was set.
    pub(crate) fn on_property(
        &self,
        prop: PropId,
        chain: &Arc<VersionChain<Vertex>>,
        vertex: &Vertex,
        tx: &Transaction,
    ) {
        self.dispatch(|key| key.prop == prop, chain, vertex, tx);
    }

    fn dispatch(
        &self,
        wanted: impl Fn(&IndexKey) -> bool,
        chain: &Arc<VersionChain<Vertex>>,
        vertex: &Vertex,
        tx: &Transaction,
    ) {
        let targets: Vec<(IndexKey, Arc<dyn IndexHook>)> = self
            .hooks
            .read()
            .iter()
            .filter(|(key, _)| wanted(key) && key.matches(vertex))
            .map(|(key, hook)| (*key, Arc::clone(hook)))
            .collect();
        for (key, hook) in targets {
            hook.insert(key, chain, vertex, tx);
        }
    }
}

/// Transactions currently building an index. Builders never wait for each
/// other.
#[derive(Default)]
pub(crate) struct IndexBuilders {
    ids: Mutex<FxHashSet<TxId>>,
}

impl IndexBuilders {
    pub(crate) fn contains(&self, id: TxId) -> bool {
        self.ids.lock().contains(&id)
    }

    /// Marks `id` as a builder until the returned guard drops.
    pub(crate) fn mark(&self, id: TxId) -> BuilderMark<'_> {
        self.ids.lock().insert(id);
        BuilderMark { builders: self, id }
    }
}

pub(crate) struct BuilderMark<'a> {
    builders: &'a IndexBuilders,
    id: TxId,
}

impl Drop for BuilderMark<'_> {
    fn drop(&mut self) {
        self.builders.ids.lock().remove(&self.id);
    }
}
