//! Ledger: the deployed business network
//!
//! The ledger wires the model, state store, latch table, executor, query
//! registry and event bus together and is the entry point callers use:
//!
//! ```ignore
//! let ledger = Ledger::deploy(network, LedgerConfig::default())?;
//! let factory = ledger.factory();
//!
//! let trader = factory.new_resource(NS, "Trader", "simon@email.com")?.with("firstName", "Simon");
//! ledger.participant_registry(NS, "Trader")?.add(trader)?;
//!
//! let trade = factory.new_transaction(NS, "Trade")?.with("newOwner", ...);
//! let receipt = ledger.submit_transaction(&trade, "admin")?;
//! ```
//!
//! Registry handles validate every resource against the model before it
//! reaches the store, and take the registry's execution latch so explicit
//! registry calls never interleave with a transaction over the same
//! registry.

use crate::config::LedgerConfig;
use crate::coordinator::{TransactionCoordinator, TransactionMetrics};
use crate::event_bus::{EventBus, EventBusStats, SubscriptionId};
use crate::executor::{TransactionExecutor, TransactionReceipt};
use crate::network::{BusinessNetwork, TransactionProcessor};
use crate::query::{QueryDefinition, QueryRegistry};
use crate::retry::RetryPolicy;
use std::sync::Arc;
use std::time::Duration;
use tally_concurrency::{ExecutionEnv, LockTable, TransactionContext};
use tally_core::{
    Event, Factory, FqName, ModelRegistry, QueryParams, QueryRunner, RegistryKey, Resource,
    ResourceKind, TallyError, TallyResult, Transaction, TypeDefinition,
};
use tally_storage::{Registry, StateStore};
use tracing::{debug, info, warn};

/// How long `shutdown` waits for in-flight submissions
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// A deployed business network
pub struct Ledger {
    name: String,
    config: LedgerConfig,
    model: Arc<ModelRegistry>,
    factory: Factory,
    store: Arc<StateStore>,
    locks: Arc<LockTable>,
    coordinator: Arc<TransactionCoordinator>,
    queries: Arc<QueryRegistry>,
    events: Arc<EventBus>,
    executor: TransactionExecutor,
}

impl Ledger {
    /// Deploy a business network
    ///
    /// # Errors
    /// - `Config` if the configuration is out of range
    /// - `InvalidQuery` / `DuplicateQuery` for a bad query definition
    /// - `UnknownType` if logic is bound to something that is not a
    ///   transaction type
    pub fn deploy(network: BusinessNetwork, config: LedgerConfig) -> TallyResult<Self> {
        config.validate()?;
        let (name, model, query_definitions, processors) = network.into_parts();

        let store = Arc::new(StateStore::new());
        let locks = Arc::new(LockTable::new());
        let coordinator = Arc::new(TransactionCoordinator::new());
        let queries = Arc::new(QueryRegistry::new(Arc::clone(&model)));
        for definition in query_definitions {
            queries.define(definition)?;
        }
        let events = Arc::new(EventBus::new(config.event_channel_capacity)?);
        let runner: Arc<dyn QueryRunner> = queries.clone();

        let env = ExecutionEnv {
            model: Arc::clone(&model),
            store: Arc::clone(&store),
            locks: Arc::clone(&locks),
            manager: Arc::clone(coordinator.manager()),
            queries: Some(runner),
            lock_wait: config.lock_wait(),
            timeout: config.execution_timeout(),
        };
        let executor = TransactionExecutor::new(
            env,
            Arc::clone(&coordinator),
            Arc::clone(&events),
            config.retry(),
        );
        let bound = processors.len();
        for (transaction_type, processor) in processors {
            executor.bind(transaction_type, processor)?;
        }

        info!(
            network = %name,
            types = model.len(),
            queries = queries.len(),
            processors = bound,
            "business network deployed"
        );

        Ok(Self {
            name,
            config,
            factory: Factory::new(Arc::clone(&model)),
            model,
            store,
            locks,
            coordinator,
            queries,
            events,
            executor,
        })
    }

    /// Deploy an empty network; types, queries and logic are added later
    pub fn new(config: LedgerConfig) -> TallyResult<Self> {
        Self::deploy(BusinessNetwork::new("default", ModelRegistry::new()), config)
    }

    /// Network name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Active configuration
    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    /// Type model
    pub fn model(&self) -> &Arc<ModelRegistry> {
        &self.model
    }

    /// Instance factory
    pub fn factory(&self) -> &Factory {
        &self.factory
    }

    // ========================================================================
    // Definitions
    // ========================================================================

    /// Register a type
    pub fn define_type(&self, definition: TypeDefinition) -> TallyResult<()> {
        self.model.define(definition).map(|_| ())
    }

    /// Register a named query
    pub fn define_query(&self, definition: QueryDefinition) -> TallyResult<()> {
        self.queries.define(definition)
    }

    /// Bind a routine to a transaction type
    pub fn bind<F>(&self, transaction_type: FqName, logic: F) -> TallyResult<()>
    where
        F: Fn(&Transaction, &mut TransactionContext) -> TallyResult<()> + Send + Sync + 'static,
    {
        self.executor.bind(transaction_type, Arc::new(logic))
    }

    /// Bind a processor to a transaction type
    pub fn bind_processor(
        &self,
        transaction_type: FqName,
        processor: Arc<dyn TransactionProcessor>,
    ) -> TallyResult<()> {
        self.executor.bind(transaction_type, processor)
    }

    // ========================================================================
    // Registries
    // ========================================================================

    /// Registry of an asset type
    ///
    /// # Errors
    /// `UnknownType` if the type is not a registered asset type
    pub fn asset_registry(&self, namespace: &str, name: &str) -> TallyResult<RegistryHandle<'_>> {
        self.registry_of_kind(&FqName::new(namespace, name), Some(ResourceKind::Asset))
    }

    /// Registry of a participant type
    ///
    /// # Errors
    /// `UnknownType` if the type is not a registered participant type
    pub fn participant_registry(
        &self,
        namespace: &str,
        name: &str,
    ) -> TallyResult<RegistryHandle<'_>> {
        self.registry_of_kind(&FqName::new(namespace, name), Some(ResourceKind::Participant))
    }

    /// Registry of any asset or participant type
    pub fn registry(&self, type_name: &FqName) -> TallyResult<RegistryHandle<'_>> {
        self.registry_of_kind(type_name, None)
    }

    fn registry_of_kind(
        &self,
        type_name: &FqName,
        kind: Option<ResourceKind>,
    ) -> TallyResult<RegistryHandle<'_>> {
        let key = self.model.registry_key(type_name)?;
        if let Some(kind) = kind {
            if key.kind != kind {
                return Err(TallyError::UnknownType {
                    name: format!("{} (not a {})", type_name, kind),
                });
            }
        }
        Ok(RegistryHandle {
            ledger: self,
            registry: self.store.registry(&key),
            key,
        })
    }

    /// Registries created so far, in key order
    pub fn registry_keys(&self) -> Vec<RegistryKey> {
        self.store.registry_keys()
    }

    // ========================================================================
    // Transactions and queries
    // ========================================================================

    /// Execute a transaction to a terminal state
    ///
    /// # Errors
    /// Rejection (`Validation`, `UnknownType`, `NoLogicBound`) or the error
    /// that rolled the transaction back. Errors raised inside the routine
    /// keep their type (a failed lookup is still `NotFound`); see
    /// [`TransactionExecutor::submit`](crate::TransactionExecutor::submit).
    pub fn submit_transaction(
        &self,
        transaction: &Transaction,
        submitted_by: &str,
    ) -> TallyResult<TransactionReceipt> {
        self.executor.submit(transaction, submitted_by)
    }

    /// Run a named query against committed state
    ///
    /// Every registry the query reads is share-locked for the duration, so
    /// the result never reflects a partially applied commit.
    ///
    /// # Errors
    /// `UnknownQuery`, `MissingParameter`
    pub fn query(&self, name: &str, params: &QueryParams) -> TallyResult<Vec<Resource>> {
        let plan = self.queries.get(name)?;
        let mut snapshot = self.store.snapshot(plan.registries_read());
        let result = plan.evaluate(&mut snapshot, params)?;
        debug!(query = name, results = result.len(), "query evaluated");
        Ok(result)
    }

    /// Registered query names
    pub fn query_names(&self) -> Vec<String> {
        self.queries.names()
    }

    // ========================================================================
    // Events
    // ========================================================================

    /// Subscribe to an event type
    pub fn on<F>(&self, event_type: FqName, handler: F) -> SubscriptionId
    where
        F: Fn(&Event) -> TallyResult<()> + Send + Sync + 'static,
    {
        self.events.on(event_type, handler)
    }

    /// Subscribe to every event
    pub fn on_any<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&Event) -> TallyResult<()> + Send + Sync + 'static,
    {
        self.events.on_any(handler)
    }

    /// Cancel a subscription
    pub fn off(&self, id: SubscriptionId) -> bool {
        self.events.off(id)
    }

    /// Block until every event of committed transactions has been delivered
    pub fn flush_events(&self) {
        self.events.flush();
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Transaction counters
    pub fn metrics(&self) -> TransactionMetrics {
        self.coordinator.metrics()
    }

    /// Event bus counters
    pub fn event_stats(&self) -> EventBusStats {
        self.events.stats()
    }

    /// Wait for in-flight submissions, deliver queued events, stop the
    /// dispatcher
    pub fn shutdown(&self) {
        if !self.coordinator.wait_for_idle(SHUTDOWN_GRACE) {
            warn!(
                network = %self.name,
                active = self.coordinator.active_count(),
                "shutting down with transactions in flight"
            );
        }
        self.events.shutdown();
        info!(network = %self.name, "ledger shut down");
    }

    fn retry(&self) -> RetryPolicy {
        self.config.retry()
    }
}

impl std::fmt::Debug for Ledger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ledger")
            .field("name", &self.name)
            .field("types", &self.model.len())
            .field("registries", &self.store.len())
            .field("queries", &self.queries.len())
            .field("executor", &self.executor)
            .finish()
    }
}

// ============================================================================
// Registry handle
// ============================================================================

/// Model-validating access to one registry
///
/// Mutations take the registry's execution latch (waiting at most the
/// configured `lock_wait`, retried on conflict) and are atomic.
pub struct RegistryHandle<'a> {
    ledger: &'a Ledger,
    key: RegistryKey,
    registry: Arc<Registry>,
}

impl<'a> RegistryHandle<'a> {
    /// Key of the registry
    pub fn key(&self) -> &RegistryKey {
        &self.key
    }

    /// Registry version, bumped once per committed mutation
    pub fn version(&self) -> u64 {
        self.registry.version()
    }

    /// Number of resources
    pub fn len(&self) -> usize {
        self.registry.len()
    }

    /// Check if the registry is empty
    pub fn is_empty(&self) -> bool {
        self.registry.is_empty()
    }

    /// Get a resource
    ///
    /// # Errors
    /// `NotFound` if absent
    pub fn get(&self, identifier: &str) -> TallyResult<Resource> {
        self.registry.get(identifier)
    }

    /// Check if a resource exists
    pub fn exists(&self, identifier: &str) -> bool {
        self.registry.exists(identifier)
    }

    /// Every resource, ascending identifier
    pub fn get_all(&self) -> Vec<Resource> {
        self.registry.get_all()
    }

    /// Validate and add a resource
    ///
    /// # Errors
    /// `Validation` / `UnknownType` if the resource does not fit the model,
    /// `DuplicateIdentifier` if the identifier is taken
    pub fn add(&self, resource: Resource) -> TallyResult<()> {
        self.add_all(vec![resource])
    }

    /// Validate and add resources; nothing is added unless all are
    pub fn add_all(&self, resources: Vec<Resource>) -> TallyResult<()> {
        let resources = self.finalize(resources)?;
        self.exclusive("add", || self.registry.add_all(resources))
    }

    /// Validate and replace an existing resource
    ///
    /// # Errors
    /// `NotFound` if absent
    pub fn update(&self, resource: Resource) -> TallyResult<()> {
        self.update_all(vec![resource])
    }

    /// Validate and replace existing resources; nothing changes unless all
    /// are present
    pub fn update_all(&self, resources: Vec<Resource>) -> TallyResult<()> {
        let resources = self.finalize(resources)?;
        self.exclusive("update", || self.registry.update_all(resources))
    }

    /// Remove a resource, returning it
    ///
    /// # Errors
    /// `NotFound` if absent
    pub fn remove(&self, identifier: &str) -> TallyResult<Resource> {
        self.exclusive("remove", || self.registry.remove(identifier))
    }

    /// Remove resources; nothing is removed unless all are present
    pub fn remove_all(&self, identifiers: &[String]) -> TallyResult<()> {
        self.exclusive("remove", || self.registry.remove_all(identifiers))
    }

    fn finalize(&self, resources: Vec<Resource>) -> TallyResult<Vec<Resource>> {
        resources
            .into_iter()
            .map(|resource| {
                if resource.type_name() != &self.key.type_name || resource.kind() != self.key.kind {
                    return Err(TallyError::UnknownType {
                        name: format!(
                            "{} does not belong in registry {}",
                            resource.fully_qualified_identifier(),
                            self.key
                        ),
                    });
                }
                self.ledger.model.finalize_resource(resource)
            })
            .collect()
    }

    /// Run a mutation under this registry's execution latch
    fn exclusive<T>(&self, op: &str, mutation: impl FnOnce() -> TallyResult<T>) -> TallyResult<T> {
        let ledger = self.ledger;
        let retry = ledger.retry();
        let attempt_id = ledger.coordinator.manager().next_attempt_id();

        let mut retries = 0;
        while let Err(e) = ledger.locks.acquire(&self.key, attempt_id, ledger.config.lock_wait()) {
            let Some(delay) = retry.retry_after(&e, retries) else {
                return Err(e);
            };
            std::thread::sleep(delay);
            retries += 1;
        }

        let result = mutation();
        if result.is_ok() {
            let version = ledger.coordinator.manager().allocate_version();
            debug!(registry = %self.key, op, version, "registry mutated");
        }
        ledger.locks.release(&self.key, attempt_id);
        result
    }
}

impl std::fmt::Debug for RegistryHandle<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryHandle")
            .field("key", &self.key)
            .field("len", &self.registry.len())
            .finish()
    }
}
