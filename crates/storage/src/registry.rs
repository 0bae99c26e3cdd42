//! Registry: committed resources of one type
//!
//! A registry maps identifiers to resources. It is backed by a `BTreeMap`
//! so that iteration is always in ascending identifier order, which is what
//! makes query output deterministic.
//!
//! ## Locking
//!
//! Data lives behind an `Arc<RwLock<..>>`:
//! - Readers (`get`, `get_all`, snapshots) take the shared lock
//! - Single-call mutations (`add`, `update`, ...) take the exclusive lock
//!   for the duration of the call, so each one is atomic
//! - Transaction commits take the exclusive lock through
//!   [`Registry::writer`] and hold it while the whole buffer is flushed
//!
//! The registry does not know about the model. Callers validate resources
//! before handing them over; the registry only checks that a resource
//! belongs here and enforces identifier uniqueness.

use parking_lot::{RawRwLock, RwLock, RwLockWriteGuard};
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tally_core::{RegistryKey, Resource, TallyError, TallyResult};

/// Map type held by a registry
pub type RegistryData = BTreeMap<String, Resource>;

/// Shared read guard over a registry's data, independent of the registry's lifetime
pub type RegistryReadGuard = parking_lot::lock_api::ArcRwLockReadGuard<RawRwLock, RegistryData>;

/// Committed resources of one (kind, type) pair
#[derive(Debug)]
pub struct Registry {
    key: RegistryKey,
    data: Arc<RwLock<RegistryData>>,
    /// Bumped once per committed mutation (single call or transaction flush)
    version: AtomicU64,
}

impl Registry {
    /// Create an empty registry
    pub fn new(key: RegistryKey) -> Self {
        Self {
            key,
            data: Arc::new(RwLock::new(BTreeMap::new())),
            version: AtomicU64::new(0),
        }
    }

    /// Key of this registry
    pub fn key(&self) -> &RegistryKey {
        &self.key
    }

    /// Current version
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Get a resource by identifier
    ///
    /// # Errors
    /// `NotFound` if absent
    pub fn get(&self, identifier: &str) -> TallyResult<Resource> {
        self.find(identifier)
            .ok_or_else(|| self.not_found(identifier))
    }

    /// Get a resource by identifier, None if absent
    pub fn find(&self, identifier: &str) -> Option<Resource> {
        self.data.read().get(identifier).cloned()
    }

    /// Check if an identifier is present
    pub fn exists(&self, identifier: &str) -> bool {
        self.data.read().contains_key(identifier)
    }

    /// All resources, ascending by identifier
    pub fn get_all(&self) -> Vec<Resource> {
        self.data.read().values().cloned().collect()
    }

    /// All identifiers, ascending
    pub fn identifiers(&self) -> Vec<String> {
        self.data.read().keys().cloned().collect()
    }

    /// Number of resources
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    /// Check if the registry is empty
    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }

    /// Shared lock on the data that outlives the borrow of `self`
    ///
    /// Used by snapshots, which hold guards over several registries at once.
    pub fn read_arc(&self) -> RegistryReadGuard {
        self.data.read_arc()
    }

    // ========================================================================
    // Single-call mutations
    // ========================================================================

    /// Add a resource
    ///
    /// # Errors
    /// `DuplicateIdentifier` if the identifier is present; nothing changes
    pub fn add(&self, resource: Resource) -> TallyResult<()> {
        self.add_all(vec![resource])
    }

    /// Add resources atomically
    ///
    /// Either every resource is added or none is. Fails on the first
    /// resource of the wrong type, or whose identifier is already present
    /// in the registry or earlier in the batch.
    pub fn add_all(&self, resources: Vec<Resource>) -> TallyResult<()> {
        let mut writer = self.writer();
        let mut batch = HashSet::with_capacity(resources.len());
        for resource in &resources {
            self.check_belongs(resource)?;
            if writer.contains(resource.identifier()) || !batch.insert(resource.identifier()) {
                return Err(TallyError::DuplicateIdentifier {
                    registry: self.key.to_string(),
                    identifier: resource.identifier().to_string(),
                });
            }
        }
        for resource in resources {
            writer.put(resource);
        }
        Ok(())
    }

    /// Replace an existing resource
    ///
    /// # Errors
    /// `NotFound` if the identifier is absent
    pub fn update(&self, resource: Resource) -> TallyResult<()> {
        self.update_all(vec![resource])
    }

    /// Replace existing resources atomically
    pub fn update_all(&self, resources: Vec<Resource>) -> TallyResult<()> {
        let mut writer = self.writer();
        for resource in &resources {
            self.check_belongs(resource)?;
            if !writer.contains(resource.identifier()) {
                return Err(self.not_found(resource.identifier()));
            }
        }
        for resource in resources {
            writer.put(resource);
        }
        Ok(())
    }

    /// Remove a resource by identifier, returning it
    ///
    /// # Errors
    /// `NotFound` if absent
    pub fn remove(&self, identifier: &str) -> TallyResult<Resource> {
        let mut writer = self.writer();
        writer
            .delete(identifier)
            .ok_or_else(|| self.not_found(identifier))
    }

    /// Remove resources atomically
    pub fn remove_all(&self, identifiers: &[String]) -> TallyResult<()> {
        let mut writer = self.writer();
        if let Some(missing) = identifiers.iter().find(|id| !writer.contains(id)) {
            return Err(self.not_found(missing));
        }
        for identifier in identifiers {
            writer.delete(identifier);
        }
        Ok(())
    }

    // ========================================================================
    // Commit path
    // ========================================================================

    /// Exclusive lock on the data for a batch of writes
    ///
    /// The version is bumped once when the writer is dropped, if anything
    /// was written.
    pub fn writer(&self) -> RegistryWriter<'_> {
        RegistryWriter {
            key: &self.key,
            data: self.data.write(),
            version: &self.version,
            dirty: false,
        }
    }

    fn check_belongs(&self, resource: &Resource) -> TallyResult<()> {
        if resource.type_name() != &self.key.type_name || resource.kind() != self.key.kind {
            return Err(TallyError::validation(
                resource.type_name().to_string(),
                resource.identifier_field(),
                format!("resource does not belong in registry {}", self.key),
            ));
        }
        Ok(())
    }

    fn not_found(&self, identifier: &str) -> TallyError {
        TallyError::NotFound {
            registry: self.key.to_string(),
            identifier: identifier.to_string(),
        }
    }
}

/// Exclusive write access to one registry
pub struct RegistryWriter<'a> {
    key: &'a RegistryKey,
    data: RwLockWriteGuard<'a, RegistryData>,
    version: &'a AtomicU64,
    dirty: bool,
}

impl<'a> RegistryWriter<'a> {
    /// Key of the registry being written
    pub fn key(&self) -> &RegistryKey {
        self.key
    }

    /// Check if an identifier is present
    pub fn contains(&self, identifier: &str) -> bool {
        self.data.contains_key(identifier)
    }

    /// Insert or replace a resource
    pub fn put(&mut self, resource: Resource) -> Option<Resource> {
        self.dirty = true;
        self.data.insert(resource.identifier().to_string(), resource)
    }

    /// Remove a resource
    pub fn delete(&mut self, identifier: &str) -> Option<Resource> {
        let removed = self.data.remove(identifier);
        if removed.is_some() {
            self.dirty = true;
        }
        removed
    }
}

impl Drop for RegistryWriter<'_> {
    fn drop(&mut self) {
        if self.dirty {
            self.version.fetch_add(1, Ordering::AcqRel);
        }
    }
}
