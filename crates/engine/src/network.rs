//! Business network bundle
//!
//! A business network is what gets deployed onto a ledger: the type model,
//! the named queries, and the logic bound to each transaction type.
//!
//! ```ignore
//! let network = BusinessNetwork::new("trade-network", model)
//!     .with_query(select_commodities)
//!     .with_logic(FqName::new(NS, "Trade"), |tx, ctx| {
//!         let mut commodity = ctx.resolve(tx.require_relationship("commodity")?)?;
//!         commodity.set("owner", tx.require_relationship("newOwner")?.clone());
//!         ctx.update(commodity)
//!     });
//! let ledger = Ledger::deploy(network, LedgerConfig::default())?;
//! ```

use crate::query::QueryDefinition;
use std::collections::BTreeMap;
use std::sync::Arc;
use tally_concurrency::TransactionContext;
use tally_core::{FqName, ModelRegistry, TallyResult, Transaction};

/// Business logic bound to one transaction type
///
/// The routine reads and writes only through the context; everything it
/// buffers is discarded if it returns an error.
pub trait TransactionProcessor: Send + Sync {
    /// Run the logic for one submitted transaction
    fn execute(&self, transaction: &Transaction, ctx: &mut TransactionContext) -> TallyResult<()>;
}

impl<F> TransactionProcessor for F
where
    F: Fn(&Transaction, &mut TransactionContext) -> TallyResult<()> + Send + Sync,
{
    fn execute(&self, transaction: &Transaction, ctx: &mut TransactionContext) -> TallyResult<()> {
        self(transaction, ctx)
    }
}

/// Model, queries and transaction logic deployed together
pub struct BusinessNetwork {
    name: String,
    model: Arc<ModelRegistry>,
    queries: Vec<QueryDefinition>,
    processors: BTreeMap<FqName, Arc<dyn TransactionProcessor>>,
}

impl BusinessNetwork {
    /// Create a network over a model
    pub fn new(name: impl Into<String>, model: ModelRegistry) -> Self {
        Self::with_model(name, Arc::new(model))
    }

    /// Create a network over a shared model
    pub fn with_model(name: impl Into<String>, model: Arc<ModelRegistry>) -> Self {
        Self {
            name: name.into(),
            model,
            queries: Vec::new(),
            processors: BTreeMap::new(),
        }
    }

    /// Add a named query
    pub fn with_query(mut self, query: QueryDefinition) -> Self {
        self.queries.push(query);
        self
    }

    /// Add several named queries
    pub fn with_queries(mut self, queries: impl IntoIterator<Item = QueryDefinition>) -> Self {
        self.queries.extend(queries);
        self
    }

    /// Bind a routine to a transaction type, replacing any earlier binding
    pub fn with_logic<F>(self, transaction_type: FqName, logic: F) -> Self
    where
        F: Fn(&Transaction, &mut TransactionContext) -> TallyResult<()> + Send + Sync + 'static,
    {
        self.with_processor(transaction_type, Arc::new(logic))
    }

    /// Bind a processor to a transaction type, replacing any earlier binding
    pub fn with_processor(
        mut self,
        transaction_type: FqName,
        processor: Arc<dyn TransactionProcessor>,
    ) -> Self {
        self.processors.insert(transaction_type, processor);
        self
    }

    /// Network name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Type model
    pub fn model(&self) -> &Arc<ModelRegistry> {
        &self.model
    }

    /// Query definitions, in the order added
    pub fn queries(&self) -> &[QueryDefinition] {
        &self.queries
    }

    /// Transaction types with bound logic
    pub fn transaction_types(&self) -> impl Iterator<Item = &FqName> {
        self.processors.keys()
    }

    pub(crate) fn into_parts(
        self,
    ) -> (
        String,
        Arc<ModelRegistry>,
        Vec<QueryDefinition>,
        BTreeMap<FqName, Arc<dyn TransactionProcessor>>,
    ) {
        (self.name, self.model, self.queries, self.processors)
    }
}

impl std::fmt::Debug for BusinessNetwork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BusinessNetwork")
            .field("name", &self.name)
            .field("types", &self.model.len())
            .field("queries", &self.queries.len())
            .field("processors", &self.processors.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tally_core::TypeDefinition;

    #[test]
    fn test_builder_collects_parts() {
        let model = ModelRegistry::new();
        model
            .define(TypeDefinition::asset("org.example", "Widget", "widgetId"))
            .unwrap();
        model
            .define(TypeDefinition::transaction("org.example", "Touch"))
            .unwrap();

        let network = BusinessNetwork::new("widgets", model)
            .with_query(QueryDefinition::new(
                "all",
                "every widget",
                FqName::new("org.example", "Widget"),
            ))
            .with_logic(FqName::new("org.example", "Touch"), |_, _| Ok(()));

        assert_eq!(network.name(), "widgets");
        assert_eq!(network.queries().len(), 1);
        assert_eq!(
            network.transaction_types().collect::<Vec<_>>(),
            vec![&FqName::new("org.example", "Touch")]
        );
    }
}
