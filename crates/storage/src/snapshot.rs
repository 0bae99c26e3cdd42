//! StoreSnapshot: point-in-time view over a set of registries
//!
//! A snapshot holds a shared lock on every registry it covers, acquired in
//! key order by [`crate::StateStore::snapshot`]. While it is alive no commit
//! can flush into those registries, so every read sees the same committed
//! state. Other readers are never blocked.
//!
//! Snapshots are meant to be short-lived (one query evaluation). Reading a
//! registry the snapshot does not cover is an error rather than a lazy lock,
//! since taking a lock out of order could deadlock against a commit.

use crate::registry::RegistryReadGuard;
use std::collections::BTreeMap;
use tally_core::{RegistryKey, Resource, ResourceView, TallyError, TallyResult};

/// Consistent read view over several registries
pub struct StoreSnapshot {
    guards: BTreeMap<RegistryKey, RegistryReadGuard>,
}

impl StoreSnapshot {
    pub(crate) fn new(guards: BTreeMap<RegistryKey, RegistryReadGuard>) -> Self {
        Self { guards }
    }

    /// Registries covered by this snapshot, ascending
    pub fn keys(&self) -> impl Iterator<Item = &RegistryKey> {
        self.guards.keys()
    }

    /// Check if a registry is covered
    pub fn covers(&self, key: &RegistryKey) -> bool {
        self.guards.contains_key(key)
    }

    /// Borrow a resource without cloning
    pub fn peek(&self, key: &RegistryKey, identifier: &str) -> TallyResult<Option<&Resource>> {
        Ok(self.guard(key)?.get(identifier))
    }

    /// Number of resources in a covered registry
    pub fn count(&self, key: &RegistryKey) -> TallyResult<usize> {
        Ok(self.guard(key)?.len())
    }

    fn guard(&self, key: &RegistryKey) -> TallyResult<&RegistryReadGuard> {
        self.guards.get(key).ok_or_else(|| {
            TallyError::internal(format!("registry {} is not covered by the snapshot", key))
        })
    }
}

impl ResourceView for StoreSnapshot {
    fn get_resource(&mut self, key: &RegistryKey, identifier: &str) -> TallyResult<Option<Resource>> {
        Ok(self.guard(key)?.get(identifier).cloned())
    }

    fn scan(&mut self, key: &RegistryKey) -> TallyResult<Vec<Resource>> {
        Ok(self.guard(key)?.values().cloned().collect())
    }
}

impl std::fmt::Debug for StoreSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreSnapshot")
            .field("registries", &self.guards.keys().collect::<Vec<_>>())
            .finish()
    }
}
