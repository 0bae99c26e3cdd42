//! Core read traits shared by snapshots, transactions and queries
//!
//! The query engine and relationship resolution are written against
//! [`ResourceView`], so the same code reads committed snapshots and the
//! in-flight view of a transaction (committed state overlaid with its
//! buffered writes).

use crate::error::TallyResult;
use crate::instance::Resource;
use crate::types::RegistryKey;
use crate::value::Value;
use std::collections::BTreeMap;

/// Read access to resources across registries
///
/// Methods take `&mut self` because a transaction records every registry it
/// reads.
pub trait ResourceView {
    /// Get a resource by identifier, None if absent
    ///
    /// # Errors
    ///
    /// Returns an error if the view cannot read the registry (for a
    /// transaction: the registry is claimed by another transaction).
    fn get_resource(&mut self, key: &RegistryKey, identifier: &str) -> TallyResult<Option<Resource>>;

    /// All resources of a registry, ascending by identifier
    fn scan(&mut self, key: &RegistryKey) -> TallyResult<Vec<Resource>>;
}

/// Named query parameters, keyed without the leading `$`
pub type QueryParams = BTreeMap<String, Value>;

/// Named-query evaluation, as seen from code that only holds a view
///
/// Implemented by the engine's query registry so that a transaction context
/// (which lives below the engine) can run queries against its own view.
pub trait QueryRunner: Send + Sync {
    /// Registries the query reads, ascending
    ///
    /// # Errors
    /// `UnknownQuery` if no query is registered under this name
    fn registries_read(&self, name: &str) -> TallyResult<Vec<RegistryKey>>;

    /// Evaluate the query against a view
    ///
    /// # Errors
    /// `UnknownQuery`, `MissingParameter`, or any error raised by the view
    fn run(
        &self,
        view: &mut dyn ResourceView,
        name: &str,
        params: &QueryParams,
    ) -> TallyResult<Vec<Resource>>;
}
