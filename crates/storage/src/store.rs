//! State store: the set of registries of a deployed network
//!
//! Registries are created lazily on first access and live as long as the
//! store. The map is a `DashMap` so that lookups from concurrent
//! transactions only contend on the shard holding the key.
//!
//! # Lock ordering
//!
//! Whenever more than one registry lock is held at a time (snapshots,
//! commit flushes), locks are taken in ascending [`RegistryKey`] order.
//! Readers and writers agreeing on one order is what rules out deadlock.

use crate::registry::{Registry, RegistryWriter};
use crate::snapshot::StoreSnapshot;
use dashmap::DashMap;
use std::collections::BTreeSet;
use std::sync::Arc;
use tally_core::RegistryKey;
use tracing::debug;

/// All registries of a ledger
#[derive(Debug, Default)]
pub struct StateStore {
    registries: DashMap<RegistryKey, Arc<Registry>>,
}

impl StateStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the registry for a key, creating it if needed
    pub fn registry(&self, key: &RegistryKey) -> Arc<Registry> {
        if let Some(existing) = self.registries.get(key) {
            return Arc::clone(existing.value());
        }
        let entry = self.registries.entry(key.clone()).or_insert_with(|| {
            debug!(registry = %key, "creating registry");
            Arc::new(Registry::new(key.clone()))
        });
        Arc::clone(entry.value())
    }

    /// Get the registry for a key if it was ever created
    pub fn existing_registry(&self, key: &RegistryKey) -> Option<Arc<Registry>> {
        self.registries.get(key).map(|r| Arc::clone(r.value()))
    }

    /// Keys of all created registries, ascending
    pub fn registry_keys(&self) -> Vec<RegistryKey> {
        let mut keys: Vec<RegistryKey> = self.registries.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        keys
    }

    /// Number of created registries
    pub fn len(&self) -> usize {
        self.registries.len()
    }

    /// Check if no registry was created yet
    pub fn is_empty(&self) -> bool {
        self.registries.is_empty()
    }

    /// Consistent read view over the given registries
    ///
    /// Shared locks are taken in key order and held until the snapshot is
    /// dropped, so the view never observes a half-flushed commit.
    pub fn snapshot<'k>(&self, keys: impl IntoIterator<Item = &'k RegistryKey>) -> StoreSnapshot {
        let ordered: BTreeSet<&RegistryKey> = keys.into_iter().collect();
        let guards = ordered
            .into_iter()
            .map(|key| (key.clone(), self.registry(key).read_arc()))
            .collect();
        StoreSnapshot::new(guards)
    }

    /// Registries to flush a commit into, ordered by key
    ///
    /// The caller takes each registry's writer in the returned order.
    pub fn registries_for_commit<'k>(
        &self,
        keys: impl IntoIterator<Item = &'k RegistryKey>,
    ) -> Vec<Arc<Registry>> {
        let ordered: BTreeSet<&RegistryKey> = keys.into_iter().collect();
        ordered.into_iter().map(|key| self.registry(key)).collect()
    }
}

/// Take writers on already-ordered registries
pub fn lock_all(registries: &[Arc<Registry>]) -> Vec<RegistryWriter<'_>> {
    registries.iter().map(|r| r.writer()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_created_lazily_and_shared() {
        let store = StateStore::new();
        assert!(store.is_empty());
        let key = RegistryKey::asset("org.acme", "Marble");
        let a = store.registry(&key);
        let b = store.registry(&key);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(store.len(), 1);
        assert!(store
            .existing_registry(&RegistryKey::participant("org.acme", "Player"))
            .is_none());
    }

    #[test]
    fn test_registry_keys_sorted() {
        let store = StateStore::new();
        store.registry(&RegistryKey::participant("b", "P"));
        store.registry(&RegistryKey::asset("z", "A"));
        store.registry(&RegistryKey::asset("a", "A"));
        assert_eq!(
            store.registry_keys(),
            vec![
                RegistryKey::asset("a", "A"),
                RegistryKey::asset("z", "A"),
                RegistryKey::participant("b", "P"),
            ]
        );
    }

    #[test]
    fn test_registries_for_commit_ordered_and_deduplicated() {
        let store = StateStore::new();
        let p = RegistryKey::participant("a", "P");
        let a = RegistryKey::asset("a", "A");
        let regs = store.registries_for_commit([&p, &a, &p]);
        let keys: Vec<&RegistryKey> = regs.iter().map(|r| r.key()).collect();
        assert_eq!(keys, vec![&a, &p]);
        let writers = lock_all(&regs);
        assert_eq!(writers.len(), 2);
    }
}
