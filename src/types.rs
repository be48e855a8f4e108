//! Identifiers and the crate-wide error type.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Transaction identifier handed out by the engine. Zero is never issued.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Serialize, Deserialize)]
pub struct TxId(pub u64);

/// Per-transaction command counter. Starts at one for every transaction.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Serialize, Deserialize)]
pub struct CommandId(pub u32);

/// Global identifier of a vertex or edge.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Serialize, Deserialize)]
pub struct Gid(pub u64);

/// Vertex label identifier.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Serialize, Deserialize)]
pub struct LabelId(pub u32);

/// Edge type identifier.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Serialize, Deserialize)]
pub struct TypeId(pub u32);

/// Property key identifier.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Serialize, Deserialize)]
pub struct PropId(pub u32);

impl TxId {
    /// Sentinel meaning "no transaction".
    pub const NONE: TxId = TxId(0);

    /// Returns `true` for the sentinel value.
    pub const fn is_none(self) -> bool {
        self.0 == 0
    }
}

impl CommandId {
    /// First command of every transaction.
    pub const FIRST: CommandId = CommandId(1);
    /// Largest representable command id.
    pub const MAX: CommandId = CommandId(u32::MAX);
}

impl fmt::Display for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for CommandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for Gid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for LabelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for TypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for PropId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for LabelId {
    fn from(value: u32) -> Self {
        LabelId(value)
    }
}

impl From<u32> for TypeId {
    fn from(value: u32) -> Self {
        TypeId(value)
    }
}

impl From<u32> for PropId {
    fn from(value: u32) -> Self {
        PropId(value)
    }
}

/// Errors surfaced by the transaction engine and the record store.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum MvccError {
    /// A write raced with a concurrent, unresolved or newer committed write of
    /// the same record. The caller should abort and retry the transaction.
    #[error("serialization conflict on record {gid}")]
    Serialization {
        /// Record that could not be written.
        gid: Gid,
    },
    /// The transaction issued more commands than a [`CommandId`] can count.
    #[error("transaction {tx} reached the maximum number of commands")]
    CommandOverflow {
        /// Transaction whose counter is exhausted.
        tx: TxId,
    },
    /// The transaction is not active (already committed, aborted or unknown).
    #[error("transaction {tx} is not active")]
    InvalidTransactionState {
        /// Offending transaction.
        tx: TxId,
    },
    /// No version of the record is visible to the writing transaction.
    #[error("record {gid} not found")]
    EntityNotFound {
        /// Requested record.
        gid: Gid,
    },
    /// A secondary index for the key exists or is being built.
    #[error("index on label {label} property {prop} already exists")]
    IndexExists {
        /// Indexed label.
        label: LabelId,
        /// Indexed property.
        prop: PropId,
    },
    /// Invalid argument.
    #[error("invalid argument: {0}")]
    Invalid(&'static str),
    /// The durability stream could not be replayed.
    #[error("replay failed: {0}")]
    Replay(String),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, MvccError>;

impl MvccError {
    /// Returns `true` when aborting and retrying the transaction may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, MvccError::Serialization { .. })
    }
}
