//! Storage layer for Tally
//!
//! This crate holds committed ledger state:
//! - Registry: BTreeMap-based resource map per (kind, type) with RwLock
//! - RegistryWriter: exclusive batch writer used by transaction commits
//! - StateStore: DashMap of lazily created registries
//! - StoreSnapshot: consistent multi-registry read view
//!
//! # Lock ordering
//!
//! Anything holding several registry locks takes them in ascending
//! `RegistryKey` order. Snapshots and commit flushes both follow it.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod registry;
pub mod snapshot;
pub mod store;

pub use registry::{Registry, RegistryData, RegistryReadGuard, RegistryWriter};
pub use snapshot::StoreSnapshot;
pub use store::{lock_all, StateStore};
