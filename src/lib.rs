//! Penumbra: an in-memory MVCC transaction engine and versioned graph
//! record store.
//!
//! Transactions get snapshot isolation and fail fast on write-write
//! conflicts. The [`transaction`] module issues transactions and records
//! their outcomes; the [`storage`] module keeps per-record version chains
//! and evaluates visibility against them; [`durability`] receives the
//! ordered stream of changes and can replay it.

#![warn(missing_docs)]

pub mod durability;
pub mod storage;
pub mod transaction;
pub mod types;

pub use storage::{
    EdgeAccessor, Graph, GraphAccessor, GraphOptions, PropValue, ReadMode, VertexAccessor,
};
pub use transaction::{CommitInfo, Engine, Snapshot, Transaction};
pub use types::{CommandId, Gid, LabelId, MvccError, PropId, Result, TxId, TypeId};
