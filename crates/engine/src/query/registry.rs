//! Named query registry
//!
//! Queries are compiled against the model when registered, so a bad query
//! fails at deployment rather than on first use. The registry is the
//! engine's [`QueryRunner`], which is how transaction logic runs queries
//! against its own view.

use super::definition::QueryDefinition;
use super::plan::CompiledQuery;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;
use tally_core::{
    ModelRegistry, QueryParams, QueryRunner, RegistryKey, Resource, ResourceView, TallyError,
    TallyResult,
};
use tracing::debug;

/// Compiled queries by name
#[derive(Debug)]
pub struct QueryRegistry {
    model: Arc<ModelRegistry>,
    queries: RwLock<BTreeMap<String, Arc<CompiledQuery>>>,
}

impl QueryRegistry {
    /// Create an empty registry over a model
    pub fn new(model: Arc<ModelRegistry>) -> Self {
        Self {
            model,
            queries: RwLock::new(BTreeMap::new()),
        }
    }

    /// Compile and register a query
    ///
    /// # Errors
    /// `DuplicateQuery` if the name is taken, `InvalidQuery` if the
    /// definition does not resolve against the model
    pub fn define(&self, definition: QueryDefinition) -> TallyResult<()> {
        let plan = CompiledQuery::compile(&self.model, definition)?;
        let mut queries = self.queries.write();
        if queries.contains_key(plan.name()) {
            return Err(TallyError::DuplicateQuery {
                name: plan.name().to_string(),
            });
        }
        debug!(query = plan.name(), registries = plan.registries_read().len(), "query defined");
        queries.insert(plan.name().to_string(), Arc::new(plan));
        Ok(())
    }

    /// Look up a compiled query
    ///
    /// # Errors
    /// `UnknownQuery` if absent
    pub fn get(&self, name: &str) -> TallyResult<Arc<CompiledQuery>> {
        self.queries
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| TallyError::UnknownQuery {
                name: name.to_string(),
            })
    }

    /// Check if a query is registered
    pub fn contains(&self, name: &str) -> bool {
        self.queries.read().contains_key(name)
    }

    /// Registered names, ascending
    pub fn names(&self) -> Vec<String> {
        self.queries.read().keys().cloned().collect()
    }

    /// Number of registered queries
    pub fn len(&self) -> usize {
        self.queries.read().len()
    }

    /// Check if no query is registered
    pub fn is_empty(&self) -> bool {
        self.queries.read().is_empty()
    }
}

impl QueryRunner for QueryRegistry {
    fn registries_read(&self, name: &str) -> TallyResult<Vec<RegistryKey>> {
        Ok(self.get(name)?.registries_read().to_vec())
    }

    fn run(
        &self,
        view: &mut dyn ResourceView,
        name: &str,
        params: &QueryParams,
    ) -> TallyResult<Vec<Resource>> {
        self.get(name)?.evaluate(view, params)
    }
}
