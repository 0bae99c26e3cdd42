//! Transaction executor
//!
//! Runs a submitted transaction through its lifecycle:
//!
//! ```text
//! Received → Validating → Executing → Committed
//!                ↓            ↓
//!            Rejected     RolledBack
//! ```
//!
//! Each attempt gets a fresh [`TransactionContext`]. An attempt that loses a
//! latch wait rolls back with `Conflict` and is retried with exponential
//! backoff; every other failure is final. Events of a committed attempt are
//! handed to the event bus before its latches are released.

use crate::coordinator::TransactionCoordinator;
use crate::event_bus::EventBus;
use crate::network::TransactionProcessor;
use crate::retry::RetryPolicy;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::any::Any;
use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tally_concurrency::{ExecutionEnv, TransactionContext};
use tally_core::{Event, FqName, RegistryKey, TallyError, TallyResult, Transaction, TypeKind};
use tracing::{debug, warn};

/// Result of a committed transaction
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionReceipt {
    /// System-generated transaction identifier
    pub transaction_id: String,
    /// Transaction type
    pub transaction_type: FqName,
    /// Transaction timestamp
    pub timestamp: DateTime<Utc>,
    /// Opaque submitter identity, echoed back
    pub submitted_by: String,
    /// Global version assigned at commit
    pub commit_version: u64,
    /// Registries written
    pub registries: Vec<RegistryKey>,
    /// Events emitted, in emission order
    pub events: Vec<Event>,
    /// Attempts made, including the committing one
    pub attempts: usize,
}

enum AttemptError {
    /// Failed validation; never executed
    Rejected(TallyError),
    /// Executed and rolled back
    RolledBack(TallyError),
}

/// Executes transactions against the shared state
pub struct TransactionExecutor {
    env: ExecutionEnv,
    processors: RwLock<BTreeMap<FqName, Arc<dyn TransactionProcessor>>>,
    coordinator: Arc<TransactionCoordinator>,
    events: Arc<EventBus>,
    retry: RetryPolicy,
}

impl TransactionExecutor {
    /// Create an executor with no bound logic
    pub fn new(
        env: ExecutionEnv,
        coordinator: Arc<TransactionCoordinator>,
        events: Arc<EventBus>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            env,
            processors: RwLock::new(BTreeMap::new()),
            coordinator,
            events,
            retry,
        }
    }

    /// Bind logic to a transaction type, replacing any earlier binding
    ///
    /// # Errors
    /// `UnknownType` if the type is not a registered transaction type
    pub fn bind(
        &self,
        transaction_type: FqName,
        processor: Arc<dyn TransactionProcessor>,
    ) -> TallyResult<()> {
        let definition = self.env.model.resolve_fq(&transaction_type)?;
        if definition.kind != TypeKind::Transaction {
            return Err(TallyError::UnknownType {
                name: format!("{} (not a transaction)", transaction_type),
            });
        }
        debug!(txn_type = %transaction_type, "logic bound");
        self.processors.write().insert(transaction_type, processor);
        Ok(())
    }

    /// Check if logic is bound to a transaction type
    pub fn is_bound(&self, transaction_type: &FqName) -> bool {
        self.processors.read().contains_key(transaction_type)
    }

    /// Run a transaction to a terminal state
    ///
    /// Errors the routine returns reach the caller as they are: a lookup
    /// through the context that fails keeps its `NotFound`, a duplicate add
    /// keeps its `DuplicateIdentifier`, and a routine's own failure arrives as
    /// the `DomainLogic` it built. Only a panic is converted, into
    /// `DomainLogic`.
    ///
    /// # Errors
    /// - `Validation`, `UnknownType`, `NoLogicBound` if rejected
    /// - the routine's error, `ExecutionTimeout`, or `Conflict` (retries
    ///   exhausted) if rolled back
    pub fn submit(
        &self,
        transaction: &Transaction,
        submitted_by: &str,
    ) -> TallyResult<TransactionReceipt> {
        self.coordinator.record_start();
        debug!(
            txn_id = transaction.transaction_id(),
            txn_type = %transaction.type_name(),
            submitted_by,
            "transaction received"
        );

        let mut retries = 0;
        loop {
            match self.attempt(transaction, submitted_by) {
                Ok(mut receipt) => {
                    receipt.attempts = retries + 1;
                    self.coordinator.record_commit();
                    return Ok(receipt);
                }
                Err(AttemptError::RolledBack(e)) => {
                    let Some(delay) = self.retry.retry_after(&e, retries) else {
                        self.coordinator.record_rollback();
                        return Err(e);
                    };
                    self.coordinator.record_retry();
                    warn!(
                        txn_id = transaction.transaction_id(),
                        retry = retries,
                        delay_ms = delay.as_millis() as u64,
                        "conflict, retrying"
                    );
                    std::thread::sleep(delay);
                    retries += 1;
                }
                Err(AttemptError::Rejected(e)) => {
                    self.coordinator.record_reject();
                    return Err(e);
                }
            }
        }
    }

    fn attempt(
        &self,
        transaction: &Transaction,
        submitted_by: &str,
    ) -> Result<TransactionReceipt, AttemptError> {
        let mut ctx = TransactionContext::new(transaction, self.env.clone());

        // Validating
        ctx.mark_validating().map_err(AttemptError::Rejected)?;
        let transaction = match self.env.model.finalize_transaction(transaction.clone()) {
            Ok(transaction) => transaction,
            Err(e) => return Err(reject(&mut ctx, e)),
        };
        let processor = self.processors.read().get(transaction.type_name()).cloned();
        let Some(processor) = processor else {
            let e = TallyError::NoLogicBound {
                name: transaction.type_name().to_string(),
            };
            return Err(reject(&mut ctx, e));
        };

        // Executing
        ctx.mark_executing().map_err(AttemptError::Rejected)?;
        let result = match catch_unwind(AssertUnwindSafe(|| processor.execute(&transaction, &mut ctx))) {
            Ok(result) => result,
            Err(panic) => Err(TallyError::domain(format!(
                "transaction logic panicked: {}",
                panic_message(panic.as_ref())
            ))),
        };
        let result = result.and_then(|()| {
            if ctx.is_expired() {
                Err(ctx.timeout_error())
            } else {
                Ok(())
            }
        });
        if let Err(e) = result {
            return Err(roll_back(&mut ctx, e));
        }

        // Committed
        let outcome = match ctx.commit() {
            Ok(outcome) => outcome,
            Err(e) => return Err(roll_back(&mut ctx, e)),
        };
        self.events.publish(outcome.events.clone());
        ctx.finish();

        Ok(TransactionReceipt {
            transaction_id: transaction.transaction_id().to_string(),
            transaction_type: transaction.type_name().clone(),
            timestamp: transaction.timestamp(),
            submitted_by: submitted_by.to_string(),
            commit_version: outcome.commit_version,
            registries: outcome.registries,
            events: outcome.events,
            attempts: 1,
        })
    }
}

impl std::fmt::Debug for TransactionExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionExecutor")
            .field("env", &self.env)
            .field("bound", &self.processors.read().keys().collect::<Vec<_>>())
            .field("retry", &self.retry)
            .finish()
    }
}

fn reject(ctx: &mut TransactionContext, error: TallyError) -> AttemptError {
    debug!(txn_id = ctx.transaction_id(), error = %error, "transaction rejected");
    if let Err(e) = ctx.mark_rejected(error.to_string()) {
        warn!(txn_id = ctx.transaction_id(), error = %e, "reject transition failed");
    }
    AttemptError::Rejected(error)
}

fn roll_back(ctx: &mut TransactionContext, error: TallyError) -> AttemptError {
    if let Err(e) = ctx.rollback(error.to_string()) {
        warn!(txn_id = ctx.transaction_id(), error = %e, "rollback transition failed");
    }
    AttemptError::RolledBack(error)
}

/// Best-effort text of a panic payload
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("(non-string panic)")
}
