//! Transaction lifecycle accounting
//!
//! The TransactionCoordinator owns the TransactionManager shared by every
//! execution attempt and keeps lifecycle counters:
//! - Active submissions
//! - Submissions started, committed, rolled back, rejected
//! - Conflict retries

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tally_concurrency::TransactionManager;

/// Transaction coordinator for the ledger
///
/// # Memory Ordering
///
/// The counters use Relaxed ordering. They are observational only and
/// synchronize nothing else.
#[derive(Debug)]
pub struct TransactionCoordinator {
    manager: Arc<TransactionManager>,
    active_count: AtomicU64,
    total_started: AtomicU64,
    total_committed: AtomicU64,
    total_rolled_back: AtomicU64,
    total_rejected: AtomicU64,
    total_retries: AtomicU64,
}

impl TransactionCoordinator {
    /// Create a coordinator starting at version 0
    pub fn new() -> Self {
        Self::with_manager(Arc::new(TransactionManager::new()))
    }

    /// Create a coordinator over an existing manager
    pub fn with_manager(manager: Arc<TransactionManager>) -> Self {
        Self {
            manager,
            active_count: AtomicU64::new(0),
            total_started: AtomicU64::new(0),
            total_committed: AtomicU64::new(0),
            total_rolled_back: AtomicU64::new(0),
            total_rejected: AtomicU64::new(0),
            total_retries: AtomicU64::new(0),
        }
    }

    /// Shared version and attempt-id source
    pub fn manager(&self) -> &Arc<TransactionManager> {
        &self.manager
    }

    /// Current global commit version
    pub fn current_version(&self) -> u64 {
        self.manager.current_version()
    }

    /// Record a submission entering the executor
    pub fn record_start(&self) {
        self.active_count.fetch_add(1, Ordering::Relaxed);
        self.total_started.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a commit
    pub fn record_commit(&self) {
        self.finish_one();
        self.total_committed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a submission that ended rolled back
    pub fn record_rollback(&self) {
        self.finish_one();
        self.total_rolled_back.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a submission rejected before execution
    pub fn record_reject(&self) {
        self.finish_one();
        self.total_rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an attempt retried after a conflict
    pub fn record_retry(&self) {
        self.total_retries.fetch_add(1, Ordering::Relaxed);
    }

    fn finish_one(&self) {
        // Saturating: never underflow even on unbalanced calls
        let _ = self
            .active_count
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |x| {
                Some(x.saturating_sub(1))
            });
    }

    /// Snapshot of the counters
    pub fn metrics(&self) -> TransactionMetrics {
        let started = self.total_started.load(Ordering::Relaxed);
        let committed = self.total_committed.load(Ordering::Relaxed);

        TransactionMetrics {
            active_count: self.active_count.load(Ordering::Relaxed),
            total_started: started,
            total_committed: committed,
            total_rolled_back: self.total_rolled_back.load(Ordering::Relaxed),
            total_rejected: self.total_rejected.load(Ordering::Relaxed),
            total_retries: self.total_retries.load(Ordering::Relaxed),
            commit_version: self.manager.current_version(),
            commit_rate: if started > 0 {
                committed as f64 / started as f64
            } else {
                0.0
            },
        }
    }

    /// Submissions currently executing
    pub fn active_count(&self) -> u64 {
        self.active_count.load(Ordering::SeqCst)
    }

    /// Wait for every active submission to finish
    ///
    /// Returns false if `timeout` expired first.
    pub fn wait_for_idle(&self, timeout: Duration) -> bool {
        let start = Instant::now();
        while self.active_count.load(Ordering::SeqCst) > 0 {
            if start.elapsed() > timeout {
                return false;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        true
    }
}

impl Default for TransactionCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

/// Transaction metrics
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionMetrics {
    /// Submissions currently executing
    pub active_count: u64,
    /// Submissions started
    pub total_started: u64,
    /// Submissions committed
    pub total_committed: u64,
    /// Submissions rolled back (logic error, timeout, conflicts exhausted)
    pub total_rolled_back: u64,
    /// Submissions rejected during validation
    pub total_rejected: u64,
    /// Attempts retried after a latch conflict
    pub total_retries: u64,
    /// Global commit version at snapshot time
    pub commit_version: u64,
    /// committed / started
    pub commit_rate: f64,
}

impl TransactionMetrics {
    /// Submissions that reached a terminal state
    pub fn total_completed(&self) -> u64 {
        self.total_committed + self.total_rolled_back + self.total_rejected
    }

    /// Failure rate (rolled back + rejected) / started
    pub fn failure_rate(&self) -> f64 {
        if self.total_started > 0 {
            (self.total_rolled_back + self.total_rejected) as f64 / self.total_started as f64
        } else {
            0.0
        }
    }
}
