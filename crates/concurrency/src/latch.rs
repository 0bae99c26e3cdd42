//! Per-registry execution latches
//!
//! A latch is an exclusive claim on one registry held by one executing
//! transaction attempt. A transaction takes the latch the first time it
//! reads or writes the registry and keeps it until it commits or rolls
//! back, so two transactions touching the same registry never interleave.
//! Transactions over disjoint registries never wait on each other.
//!
//! Acquisition is bounded: a waiter gives up after `wait` and receives a
//! `Conflict`, which the executor treats as retryable. Latches are
//! re-entrant for their owner.

use dashmap::DashMap;
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tally_core::{RegistryKey, TallyError, TallyResult};
use tracing::{trace, warn};

#[derive(Debug, Default)]
struct RegistryLatch {
    owner: Mutex<Option<u64>>,
    released: Condvar,
}

/// Latches for every registry that was ever claimed
#[derive(Debug, Default)]
pub struct LockTable {
    latches: DashMap<RegistryKey, Arc<RegistryLatch>>,
}

impl LockTable {
    /// Create an empty lock table
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim a registry for an attempt
    ///
    /// Returns `true` if the latch was newly taken, `false` if the attempt
    /// already held it.
    ///
    /// # Errors
    /// `Conflict` if another attempt still holds the latch after `wait`
    pub fn acquire(&self, key: &RegistryKey, attempt: u64, wait: Duration) -> TallyResult<bool> {
        let latch = self.latch(key);
        let mut owner = latch.owner.lock();
        if *owner == Some(attempt) {
            return Ok(false);
        }

        let deadline = Instant::now() + wait;
        while let Some(holder) = *owner {
            if latch.released.wait_until(&mut owner, deadline).timed_out() && owner.is_some() {
                warn!(registry = %key, attempt, holder, "latch wait expired");
                return Err(TallyError::Conflict {
                    reason: format!("registry {} is held by another transaction", key),
                });
            }
        }

        *owner = Some(attempt);
        trace!(registry = %key, attempt, "latch acquired");
        Ok(true)
    }

    /// Release a latch if `attempt` holds it
    pub fn release(&self, key: &RegistryKey, attempt: u64) {
        let Some(latch) = self.latches.get(key).map(|l| Arc::clone(l.value())) else {
            return;
        };
        let mut owner = latch.owner.lock();
        if *owner == Some(attempt) {
            *owner = None;
            latch.released.notify_one();
            trace!(registry = %key, attempt, "latch released");
        }
    }

    /// Current holder of a registry's latch
    pub fn holder(&self, key: &RegistryKey) -> Option<u64> {
        self.latches.get(key).and_then(|l| *l.value().owner.lock())
    }

    fn latch(&self, key: &RegistryKey) -> Arc<RegistryLatch> {
        if let Some(latch) = self.latches.get(key) {
            return Arc::clone(latch.value());
        }
        Arc::clone(self.latches.entry(key.clone()).or_default().value())
    }
}
