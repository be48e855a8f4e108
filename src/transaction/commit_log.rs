use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};
use tracing::error;

use crate::types::TxId;

/// Outcome of a transaction as recorded in the [`CommitLog`].
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum CommitInfo {
    /// Still running, or never started.
    Active,
    /// Committed; its writes are visible to transactions that begin later.
    Committed,
    /// Aborted; its writes are never visible to anyone else.
    Aborted,
}

impl CommitInfo {
    /// Returns `true` for [`CommitInfo::Active`].
    pub fn is_active(self) -> bool {
        matches!(self, CommitInfo::Active)
    }

    /// Returns `true` for [`CommitInfo::Committed`].
    pub fn is_committed(self) -> bool {
        matches!(self, CommitInfo::Committed)
    }

    /// Returns `true` for [`CommitInfo::Aborted`].
    pub fn is_aborted(self) -> bool {
        matches!(self, CommitInfo::Aborted)
    }
}

const STATUS_BITS: u64 = 2;
const COMMITTED_BIT: u64 = 0b01;
const ABORTED_BIT: u64 = 0b10;

const TXS_PER_WORD_BITS: u32 = 5;
const WORD_BITS: u32 = 10;
const BLOCK_BITS: u32 = 10;
const TOP_BITS: u32 = 10;

const WORDS_PER_BLOCK: usize = 1 << WORD_BITS;
const BLOCKS_PER_MID: usize = 1 << BLOCK_BITS;
const TOP_LEN: usize = 1 << TOP_BITS;

/// Number of transaction ids the log can address.
pub const COMMIT_LOG_CAPACITY: u64 = 1 << (TXS_PER_WORD_BITS + WORD_BITS + BLOCK_BITS + TOP_BITS);

type Block = Box<[AtomicU64]>;
type Mid = Box<[OnceLock<Block>]>;

/// Sparse transaction-outcome table.
///
/// Every transaction owns two status bits inside a 64-bit atomic word. Words
/// live in blocks, blocks in mid tables, mid tables in a fixed top table; each
/// tier is allocated lazily on first write and never freed. Readers therefore
/// never lock: a missing tier simply means "no outcome recorded yet". Each id
/// is written at most once, by the engine, while it holds its own mutex.
pub struct CommitLog {
    top: Box<[OnceLock<Mid>]>,
}

struct Slot {
    top: usize,
    block: usize,
    word: usize,
    shift: u64,
}

impl CommitLog {
    /// Creates an empty log.
    pub fn new() -> Self {
        Self {
            top: (0..TOP_LEN).map(|_| OnceLock::new()).collect(),
        }
    }

    /// Records `id` as committed.
    pub fn set_committed(&self, id: TxId) {
        self.set(id, COMMITTED_BIT);
    }

    /// Records `id` as aborted.
    pub fn set_aborted(&self, id: TxId) {
        self.set(id, ABORTED_BIT);
    }

    /// Returns the recorded outcome for `id`.
    pub fn fetch_info(&self, id: TxId) -> CommitInfo {
        let Some(slot) = Self::slot(id) else {
            return CommitInfo::Active;
        };
        let Some(mid) = self.top[slot.top].get() else {
            return CommitInfo::Active;
        };
        let Some(block) = mid[slot.block].get() else {
            return CommitInfo::Active;
        };
        let bits = (block[slot.word].load(Ordering::Acquire) >> slot.shift) & 0b11;
        match bits {
            0 => CommitInfo::Active,
            COMMITTED_BIT => CommitInfo::Committed,
            _ => CommitInfo::Aborted,
        }
    }

    fn set(&self, id: TxId, bit: u64) {
        let Some(slot) = Self::slot(id) else {
            error!(tx = id.0, capacity = COMMIT_LOG_CAPACITY, "mvcc.commit_log.exhausted");
            panic!("commit log capacity exhausted at transaction {id}");
        };
        let mid = self.top[slot.top]
            .get_or_init(|| (0..BLOCKS_PER_MID).map(|_| OnceLock::new()).collect());
        let block = mid[slot.block]
            .get_or_init(|| (0..WORDS_PER_BLOCK).map(|_| AtomicU64::new(0)).collect());
        block[slot.word].fetch_or(bit << slot.shift, Ordering::Release);
    }

    fn slot(id: TxId) -> Option<Slot> {
        let raw = id.0;
        if raw >= COMMIT_LOG_CAPACITY {
            return None;
        }
        let shift = (raw & ((1 << TXS_PER_WORD_BITS) - 1)) * STATUS_BITS;
        let word_index = raw >> TXS_PER_WORD_BITS;
        let word = (word_index as usize) & (WORDS_PER_BLOCK - 1);
        let block = ((word_index >> WORD_BITS) as usize) & (BLOCKS_PER_MID - 1);
        let top = (word_index >> (WORD_BITS + BLOCK_BITS)) as usize;
        Some(Slot {
            top,
            block,
            word,
            shift,
        })
    }
}

impl Default for CommitLog {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CommitLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let allocated = self.top.iter().filter(|mid| mid.get().is_some()).count();
        f.debug_struct("CommitLog")
            .field("allocated_mid_tables", &allocated)
            .finish()
    }
}
