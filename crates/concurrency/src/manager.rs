//! Transaction manager: attempt ids and the commit clock
//!
//! Every execution attempt (including each retry of the same transaction)
//! gets a fresh attempt id, which is what latches are owned by. Every
//! commit, whether a transaction flush or a direct registry mutation,
//! advances the global commit version by exactly one.

use std::sync::atomic::{AtomicU64, Ordering};

/// Allocates attempt ids and commit versions
#[derive(Debug)]
pub struct TransactionManager {
    /// Global commit version; monotonically increasing
    version: AtomicU64,
    /// Next attempt id
    next_attempt: AtomicU64,
}

impl TransactionManager {
    /// Create a manager starting at version 0
    pub fn new() -> Self {
        Self::with_version(0)
    }

    /// Create a manager starting at a given version
    pub fn with_version(initial_version: u64) -> Self {
        TransactionManager {
            version: AtomicU64::new(initial_version),
            next_attempt: AtomicU64::new(1),
        }
    }

    /// Current commit version
    pub fn current_version(&self) -> u64 {
        self.version.load(Ordering::SeqCst)
    }

    /// Allocate the next attempt id
    pub fn next_attempt_id(&self) -> u64 {
        self.next_attempt.fetch_add(1, Ordering::SeqCst)
    }

    /// Allocate the next commit version
    pub fn allocate_version(&self) -> u64 {
        self.version.fetch_add(1, Ordering::SeqCst) + 1
    }
}

impl Default for TransactionManager {
    fn default() -> Self {
        Self::new()
    }
}
