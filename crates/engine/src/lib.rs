//! Ledger engine for Tally
//!
//! This crate orchestrates the lower layers into a deployable ledger:
//! - Ledger: deploys a business network, exposes registries, submission,
//!   queries and event subscriptions
//! - BusinessNetwork: model, queries and transaction logic bundled together
//! - TransactionExecutor: lifecycle, rollback, conflict retry
//! - Query engine: named declarative queries over committed or in-flight state
//! - EventBus: ordered delivery of committed events on a dispatcher thread
//! - LedgerConfig: `tally.toml` settings
//!
//! The engine is the only component that knows about:
//! - Binding logic to transaction types
//! - Publishing events after commit
//! - Retry policy

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod coordinator;
pub mod event_bus;
pub mod executor;
pub mod ledger;
pub mod logging;
pub mod network;
pub mod query;
pub mod retry;

pub use config::{LedgerConfig, CONFIG_FILE_NAME};
pub use coordinator::{TransactionCoordinator, TransactionMetrics};
pub use event_bus::{EventBus, EventBusStats, SubscriptionId};
pub use executor::{TransactionExecutor, TransactionReceipt};
pub use ledger::{Ledger, RegistryHandle};
pub use logging::init_tracing;
pub use network::{BusinessNetwork, TransactionProcessor};
pub use query::{
    compare_values, CompareOp, CompiledQuery, FieldPath, Operand, OrderBy, Predicate,
    QueryDefinition, QueryRegistry, SortOrder,
};
pub use retry::RetryPolicy;

pub use tally_concurrency::{TransactionContext, TransactionStatus};
pub use tally_core::{
    Concept, Event, Factory, FieldDef, FieldType, FqName, ModelRegistry, QueryParams, RegistryKey,
    Relationship, Resource, ResourceKind, ResourceType, TallyError, TallyResult, Transaction,
    TypeDefinition, TypeKind, Value,
};
