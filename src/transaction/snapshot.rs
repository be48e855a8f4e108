use std::fmt;

use crate::types::TxId;

/// Sorted set of transaction ids.
///
/// Used for per-transaction snapshots (the ids that were active when the
/// transaction began), the engine's active set, and the garbage collection
/// boundary. Ids are appended in increasing order by the engine, so the
/// underlying vector stays sorted without re-sorting.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    ids: Vec<TxId>,
}

impl Snapshot {
    /// Creates an empty snapshot.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a snapshot from arbitrary ids.
    pub fn from_ids(ids: impl IntoIterator<Item = TxId>) -> Self {
        let mut ids: Vec<TxId> = ids.into_iter().collect();
        ids.sort_unstable();
        ids.dedup();
        Self { ids }
    }

    /// Returns `true` if `id` is part of the snapshot.
    pub fn contains(&self, id: TxId) -> bool {
        self.ids.binary_search(&id).is_ok()
    }

    /// Inserts `id`, keeping the set sorted. Appending a larger id is O(1).
    pub fn insert(&mut self, id: TxId) {
        match self.ids.last() {
            Some(last) if *last < id => self.ids.push(id),
            None => self.ids.push(id),
            _ => {
                if let Err(pos) = self.ids.binary_search(&id) {
                    self.ids.insert(pos, id);
                }
            }
        }
    }

    /// Removes `id`; returns whether it was present.
    pub fn remove(&mut self, id: TxId) -> bool {
        match self.ids.binary_search(&id) {
            Ok(pos) => {
                self.ids.remove(pos);
                true
            }
            Err(_) => false,
        }
    }

    /// Smallest id in the set.
    pub fn front(&self) -> Option<TxId> {
        self.ids.first().copied()
    }

    /// Largest id in the set.
    pub fn back(&self) -> Option<TxId> {
        self.ids.last().copied()
    }

    /// Number of ids.
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Returns `true` when the set holds no ids.
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Iterates ids in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = TxId> + '_ {
        self.ids.iter().copied()
    }

    /// Borrows the sorted ids.
    pub fn as_slice(&self) -> &[TxId] {
        &self.ids
    }
}

impl fmt::Debug for Snapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.ids.iter().map(|id| id.0)).finish()
    }
}

impl FromIterator<TxId> for Snapshot {
    fn from_iter<I: IntoIterator<Item = TxId>>(iter: I) -> Self {
        Self::from_ids(iter)
    }
}
