//! Concurrency layer for Tally
//!
//! This crate implements pessimistic per-registry serialization with:
//! - LockTable: execution latches, one per registry, bounded waits
//! - TransactionManager: attempt ids and the global commit version
//! - TransactionContext: mutation buffer, event buffer, state machine
//!
//! A transaction attempt claims each registry it touches and keeps the
//! claim until commit or rollback. Attempts over disjoint registries run
//! in parallel; overlapping ones serialize. A latch wait that expires
//! surfaces as a retryable `Conflict`.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod latch;
pub mod manager;
pub mod transaction;

pub use latch::LockTable;
pub use manager::TransactionManager;
pub use transaction::{
    CommitOutcome, ExecutionEnv, PendingOperations, PendingWrite, TransactionContext,
    TransactionStatus,
};
