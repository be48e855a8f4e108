//! Transaction engine: id issuance, snapshots, the active set and the commit
//! log that records every transaction's outcome.

mod commit_log;
mod engine;
mod snapshot;

pub use commit_log::{CommitInfo, CommitLog, COMMIT_LOG_CAPACITY};
pub use engine::{Engine, Transaction, TransactionListener, TxOutcome};
pub use snapshot::Snapshot;
