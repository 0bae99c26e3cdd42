//! Transaction context: the mutation handle given to business logic
//!
//! A `TransactionContext` belongs to one execution attempt. It buffers every
//! mutation and emitted event until commit, so a routine that fails leaves
//! no trace: rolling back only has to drop the buffer.
//!
//! # Isolation
//!
//! The context claims a registry's execution latch (see [`crate::LockTable`])
//! the first time the routine reads or writes it, and holds every latch
//! until the attempt reaches a terminal state. While the latch is held no
//! other transaction can change the registry, so reading committed data
//! directly is safe and no commit-time validation is needed.
//!
//! Reads see the attempt's own buffered writes (read-your-writes).
//!
//! # Lifecycle
//!
//! ```text
//! Received → Validating → Executing → Committed
//!                │             └──→ RolledBack
//!                └──→ Rejected
//! ```
//!
//! Latches are released on commit, rollback, rejection, or drop.

use crate::latch::LockTable;
use crate::manager::TransactionManager;
use chrono::Utc;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tally_core::{
    Event, Factory, FqName, ModelRegistry, QueryParams, QueryRunner, RegistryKey, Relationship,
    Resource, ResourceType, ResourceView, TallyError, TallyResult, Transaction,
};
use tally_storage::{lock_all, StateStore};
use tracing::{debug, trace};

/// Status of a transaction attempt in its lifecycle
///
/// Terminal states: `Committed`, `Rejected`, `RolledBack`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionStatus {
    /// Submitted, nothing checked yet
    Received,
    /// Transaction instance is being checked against the model
    Validating,
    /// Business logic is running
    Executing,
    /// Buffer flushed to the registries
    Committed,
    /// Transaction instance failed validation; logic never ran
    Rejected {
        /// Why the transaction was rejected
        reason: String,
    },
    /// Execution failed; buffer discarded
    RolledBack {
        /// Why the attempt was rolled back
        reason: String,
    },
}

impl TransactionStatus {
    /// Check if no further transition is possible
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransactionStatus::Committed
                | TransactionStatus::Rejected { .. }
                | TransactionStatus::RolledBack { .. }
        )
    }
}

/// Buffered change to one resource
#[derive(Debug, Clone, PartialEq)]
pub enum PendingWrite {
    /// Insert or replace
    Put(Resource),
    /// Delete
    Delete,
}

/// Summary of buffered operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingOperations {
    /// Buffered inserts and replacements
    pub puts: usize,
    /// Buffered deletes
    pub deletes: usize,
    /// Buffered events
    pub events: usize,
}

impl PendingOperations {
    /// Total number of buffered operations
    pub fn total(&self) -> usize {
        self.puts + self.deletes + self.events
    }

    /// Check if nothing is buffered
    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }
}

/// Result of flushing an attempt to the registries
#[derive(Debug, Clone)]
pub struct CommitOutcome {
    /// Global commit version assigned to the flush
    pub commit_version: u64,
    /// Registries written, ascending
    pub registries: Vec<RegistryKey>,
    /// Emitted events, in emission order
    pub events: Vec<Event>,
}

/// Shared services an attempt runs against
#[derive(Clone)]
pub struct ExecutionEnv {
    /// Type definitions
    pub model: Arc<ModelRegistry>,
    /// Committed state
    pub store: Arc<StateStore>,
    /// Execution latches
    pub locks: Arc<LockTable>,
    /// Attempt ids and commit versions
    pub manager: Arc<TransactionManager>,
    /// Named queries, if any are deployed
    pub queries: Option<Arc<dyn QueryRunner>>,
    /// Longest wait for one latch
    pub lock_wait: Duration,
    /// Execution budget measured from attempt start
    pub timeout: Option<Duration>,
}

impl std::fmt::Debug for ExecutionEnv {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionEnv")
            .field("lock_wait", &self.lock_wait)
            .field("timeout", &self.timeout)
            .field("has_queries", &self.queries.is_some())
            .finish()
    }
}

/// Mutation handle for one execution attempt
pub struct TransactionContext {
    // Identity
    attempt: u64,
    transaction_id: String,
    transaction_type: FqName,

    env: ExecutionEnv,
    factory: Factory,

    // Operation tracking
    held: BTreeSet<RegistryKey>,
    writes: BTreeMap<RegistryKey, BTreeMap<String, PendingWrite>>,
    events: Vec<Event>,

    status: TransactionStatus,
    start_time: Instant,
}

impl TransactionContext {
    /// Create a context for a new attempt at `transaction`
    pub fn new(transaction: &Transaction, env: ExecutionEnv) -> Self {
        let attempt = env.manager.next_attempt_id();
        let factory = Factory::new(Arc::clone(&env.model));
        TransactionContext {
            attempt,
            transaction_id: transaction.transaction_id().to_string(),
            transaction_type: transaction.type_name().clone(),
            env,
            factory,
            held: BTreeSet::new(),
            writes: BTreeMap::new(),
            events: Vec::new(),
            status: TransactionStatus::Received,
            start_time: Instant::now(),
        }
    }

    /// Attempt id owning this context's latches
    pub fn attempt(&self) -> u64 {
        self.attempt
    }

    /// Identifier of the transaction being executed
    pub fn transaction_id(&self) -> &str {
        &self.transaction_id
    }

    /// Type of the transaction being executed
    pub fn transaction_type(&self) -> &FqName {
        &self.transaction_type
    }

    /// Factory over the deployed model, for building resources and events
    pub fn factory(&self) -> &Factory {
        &self.factory
    }

    /// Current status
    pub fn status(&self) -> &TransactionStatus {
        &self.status
    }

    /// Registries claimed so far, ascending
    pub fn claimed_registries(&self) -> impl Iterator<Item = &RegistryKey> {
        self.held.iter()
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Get a resource by type and identifier
    ///
    /// # Errors
    /// `NotFound` if absent from the attempt's view
    pub fn get(&mut self, type_name: &FqName, identifier: &str) -> TallyResult<Resource> {
        let key = self.env.model.registry_key(type_name)?;
        self.get_resource(&key, identifier)?
            .ok_or_else(|| not_found(&key, identifier))
    }

    /// Get a resource by type and identifier, None if absent
    pub fn find(&mut self, type_name: &FqName, identifier: &str) -> TallyResult<Option<Resource>> {
        let key = self.env.model.registry_key(type_name)?;
        self.get_resource(&key, identifier)
    }

    /// Check if a resource exists in the attempt's view
    pub fn exists(&mut self, type_name: &FqName, identifier: &str) -> TallyResult<bool> {
        Ok(self.find(type_name, identifier)?.is_some())
    }

    /// All resources of a type, ascending by identifier
    pub fn get_all(&mut self, type_name: &FqName) -> TallyResult<Vec<Resource>> {
        let key = self.env.model.registry_key(type_name)?;
        self.scan(&key)
    }

    /// Dereference a relationship
    ///
    /// # Errors
    /// `NotFound` if the target does not exist
    pub fn resolve(&mut self, relationship: &Relationship) -> TallyResult<Resource> {
        self.get(&relationship.type_name, relationship.identifier())
    }

    /// Get a resource as a typed value
    pub fn load<T: ResourceType>(&mut self, identifier: &str) -> TallyResult<T> {
        let resource = self.get(&T::fq_name(), identifier)?;
        T::from_resource(&resource)
    }

    /// Run a named query against the attempt's view
    ///
    /// Every registry the query reads is claimed first.
    pub fn query(&mut self, name: &str, params: &QueryParams) -> TallyResult<Vec<Resource>> {
        self.ensure_executing()?;
        let runner = self
            .env
            .queries
            .clone()
            .ok_or_else(|| TallyError::UnknownQuery {
                name: name.to_string(),
            })?;
        for key in runner.registries_read(name)? {
            self.claim(&key)?;
        }
        runner.run(self, name, params)
    }

    // ========================================================================
    // Writes
    // ========================================================================

    /// Buffer a new resource
    ///
    /// # Errors
    /// `Validation` if the resource does not conform to its type,
    /// `DuplicateIdentifier` if the identifier is already visible
    pub fn add(&mut self, resource: Resource) -> TallyResult<()> {
        self.ensure_executing()?;
        let resource = self.env.model.finalize_resource(resource)?;
        let key = RegistryKey::new(resource.kind(), resource.type_name().clone());
        self.claim(&key)?;
        if self.visible(&key, resource.identifier()).is_some() {
            return Err(TallyError::DuplicateIdentifier {
                registry: key.to_string(),
                identifier: resource.identifier().to_string(),
            });
        }
        self.buffer(key, resource);
        Ok(())
    }

    /// Buffer a replacement for an existing resource
    ///
    /// # Errors
    /// `Validation` if the resource does not conform to its type,
    /// `NotFound` if the identifier is not visible
    pub fn update(&mut self, resource: Resource) -> TallyResult<()> {
        self.ensure_executing()?;
        let resource = self.env.model.finalize_resource(resource)?;
        let key = RegistryKey::new(resource.kind(), resource.type_name().clone());
        self.claim(&key)?;
        if self.visible(&key, resource.identifier()).is_none() {
            return Err(not_found(&key, resource.identifier()));
        }
        self.buffer(key, resource);
        Ok(())
    }

    /// Buffer removal of a resource
    ///
    /// # Errors
    /// `NotFound` if the identifier is not visible
    pub fn remove(&mut self, type_name: &FqName, identifier: &str) -> TallyResult<()> {
        self.ensure_executing()?;
        let key = self.env.model.registry_key(type_name)?;
        self.claim(&key)?;
        if self.visible(&key, identifier).is_none() {
            return Err(not_found(&key, identifier));
        }
        trace!(txn_id = %self.transaction_id, registry = %key, identifier, "buffered delete");
        self.writes
            .entry(key)
            .or_default()
            .insert(identifier.to_string(), PendingWrite::Delete);
        Ok(())
    }

    /// Buffer removal of several resources of one type
    pub fn remove_all(&mut self, type_name: &FqName, identifiers: &[String]) -> TallyResult<()> {
        for identifier in identifiers {
            self.remove(type_name, identifier)?;
        }
        Ok(())
    }

    /// Buffer an event for publication at commit
    ///
    /// The event is validated against its type, then stamped with
    /// `<transaction id>#<emission index>` and the current time.
    pub fn emit(&mut self, event: Event) -> TallyResult<()> {
        self.ensure_executing()?;
        let mut event = self.env.model.finalize_event(event)?;
        let event_id = format!("{}#{}", self.transaction_id, self.events.len());
        event.stamp(event_id, Utc::now());
        trace!(txn_id = %self.transaction_id, event_id = %event.event_id(), "buffered event");
        self.events.push(event);
        Ok(())
    }

    fn buffer(&mut self, key: RegistryKey, resource: Resource) {
        trace!(txn_id = %self.transaction_id, registry = %key, identifier = resource.identifier(), "buffered put");
        self.writes
            .entry(key)
            .or_default()
            .insert(resource.identifier().to_string(), PendingWrite::Put(resource));
    }

    fn visible(&self, key: &RegistryKey, identifier: &str) -> Option<Resource> {
        match self.writes.get(key).and_then(|w| w.get(identifier)) {
            Some(PendingWrite::Put(resource)) => Some(resource.clone()),
            Some(PendingWrite::Delete) => None,
            None => self.env.store.registry(key).find(identifier),
        }
    }

    // ========================================================================
    // Latches and timing
    // ========================================================================

    fn claim(&mut self, key: &RegistryKey) -> TallyResult<()> {
        if self.held.contains(key) {
            return Ok(());
        }
        self.env.locks.acquire(key, self.attempt, self.env.lock_wait)?;
        self.held.insert(key.clone());
        Ok(())
    }

    fn release_latches(&mut self) {
        for key in std::mem::take(&mut self.held) {
            self.env.locks.release(&key, self.attempt);
        }
    }

    /// Time since the attempt started
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Check if the execution budget is spent
    pub fn is_expired(&self) -> bool {
        self.env
            .timeout
            .map_or(false, |timeout| self.start_time.elapsed() > timeout)
    }

    /// Error reported when the execution budget is spent
    pub fn timeout_error(&self) -> TallyError {
        TallyError::ExecutionTimeout {
            transaction_id: self.transaction_id.clone(),
            timeout_ms: self
                .env
                .timeout
                .map_or(0, |t| u64::try_from(t.as_millis()).unwrap_or(u64::MAX)),
        }
    }

    /// Check that the attempt can accept operations
    ///
    /// # Errors
    /// `ExecutionTimeout` once the budget is spent, `Internal` outside the
    /// `Executing` state
    pub fn ensure_executing(&self) -> TallyResult<()> {
        if self.status != TransactionStatus::Executing {
            return Err(TallyError::internal(format!(
                "transaction {} is not executing: {:?}",
                self.transaction_id, self.status
            )));
        }
        if self.is_expired() {
            return Err(self.timeout_error());
        }
        Ok(())
    }

    // ========================================================================
    // State transitions
    // ========================================================================

    /// `Received` → `Validating`
    pub fn mark_validating(&mut self) -> TallyResult<()> {
        self.transition(TransactionStatus::Received, TransactionStatus::Validating)
    }

    /// `Validating` → `Executing`
    pub fn mark_executing(&mut self) -> TallyResult<()> {
        self.transition(TransactionStatus::Validating, TransactionStatus::Executing)
    }

    /// `Validating` → `Rejected`
    pub fn mark_rejected(&mut self, reason: impl Into<String>) -> TallyResult<()> {
        self.transition(
            TransactionStatus::Validating,
            TransactionStatus::Rejected {
                reason: reason.into(),
            },
        )?;
        self.release_latches();
        Ok(())
    }

    /// `Executing` → `RolledBack`, discarding every buffered write and event
    pub fn rollback(&mut self, reason: impl Into<String>) -> TallyResult<()> {
        let reason = reason.into();
        self.transition(
            TransactionStatus::Executing,
            TransactionStatus::RolledBack {
                reason: reason.clone(),
            },
        )?;
        let pending = self.pending_operations();
        self.writes.clear();
        self.events.clear();
        self.release_latches();
        debug!(
            txn_id = %self.transaction_id,
            attempt = self.attempt,
            discarded = pending.total(),
            reason = %reason,
            "rolled back"
        );
        Ok(())
    }

    /// `Executing` → `Committed`: flush the buffer to the registries
    ///
    /// Registry write locks are taken in key order and held for the whole
    /// flush, so snapshot readers see all of it or none of it. Latches stay
    /// held so the caller can publish events before any later transaction
    /// over the same registries commits; call [`Self::finish`] afterwards.
    ///
    /// # Errors
    /// `ExecutionTimeout` if the budget ran out; the attempt is still
    /// `Executing` and must be rolled back by the caller
    pub fn commit(&mut self) -> TallyResult<CommitOutcome> {
        self.ensure_executing()?;

        let registries = self.env.store.registries_for_commit(self.writes.keys());
        let commit_version = {
            let mut writers = lock_all(&registries);
            for writer in writers.iter_mut() {
                let Some(pending) = self.writes.remove(writer.key()) else {
                    continue;
                };
                for (identifier, write) in pending {
                    match write {
                        PendingWrite::Put(resource) => {
                            writer.put(resource);
                        }
                        PendingWrite::Delete => {
                            writer.delete(&identifier);
                        }
                    }
                }
            }
            self.env.manager.allocate_version()
        };

        self.status = TransactionStatus::Committed;
        let outcome = CommitOutcome {
            commit_version,
            registries: registries.iter().map(|r| r.key().clone()).collect(),
            events: std::mem::take(&mut self.events),
        };
        debug!(
            txn_id = %self.transaction_id,
            txn_type = %self.transaction_type,
            commit_version,
            registries = outcome.registries.len(),
            events = outcome.events.len(),
            "committed"
        );
        Ok(outcome)
    }

    /// Release every latch after a commit has been published
    pub fn finish(&mut self) {
        self.release_latches();
    }

    fn transition(&mut self, from: TransactionStatus, to: TransactionStatus) -> TallyResult<()> {
        if self.status != from {
            return Err(TallyError::internal(format!(
                "transaction {} cannot move from {:?} to {:?}",
                self.transaction_id, self.status, to
            )));
        }
        self.status = to;
        Ok(())
    }

    /// Counts of buffered operations
    pub fn pending_operations(&self) -> PendingOperations {
        let (puts, deletes) = self
            .writes
            .values()
            .flat_map(|w| w.values())
            .fold((0, 0), |(puts, deletes), write| match write {
                PendingWrite::Put(_) => (puts + 1, deletes),
                PendingWrite::Delete => (puts, deletes + 1),
            });
        PendingOperations {
            puts,
            deletes,
            events: self.events.len(),
        }
    }
}

impl ResourceView for TransactionContext {
    fn get_resource(&mut self, key: &RegistryKey, identifier: &str) -> TallyResult<Option<Resource>> {
        self.ensure_executing()?;
        self.claim(key)?;
        Ok(self.visible(key, identifier))
    }

    fn scan(&mut self, key: &RegistryKey) -> TallyResult<Vec<Resource>> {
        self.ensure_executing()?;
        self.claim(key)?;
        let registry = self.env.store.registry(key);
        let Some(pending) = self.writes.get(key) else {
            return Ok(registry.get_all());
        };

        let mut merged: BTreeMap<String, Resource> = registry
            .get_all()
            .into_iter()
            .map(|r| (r.identifier().to_string(), r))
            .collect();
        for (identifier, write) in pending {
            match write {
                PendingWrite::Put(resource) => {
                    merged.insert(identifier.clone(), resource.clone());
                }
                PendingWrite::Delete => {
                    merged.remove(identifier);
                }
            }
        }
        Ok(merged.into_values().collect())
    }
}

impl Drop for TransactionContext {
    fn drop(&mut self) {
        self.release_latches();
    }
}

impl std::fmt::Debug for TransactionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionContext")
            .field("attempt", &self.attempt)
            .field("transaction_id", &self.transaction_id)
            .field("transaction_type", &self.transaction_type)
            .field("status", &self.status)
            .field("held", &self.held)
            .field("pending", &self.pending_operations())
            .finish()
    }
}

fn not_found(key: &RegistryKey, identifier: &str) -> TallyError {
    TallyError::NotFound {
        registry: key.to_string(),
        identifier: identifier.to_string(),
    }
}
