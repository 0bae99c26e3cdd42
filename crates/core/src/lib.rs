//! Core types for Tally
//!
//! This crate defines the foundational types used throughout the system:
//! - FqName, RegistryKey, Relationship: naming and references
//! - Value: Unified value enum for all field types
//! - Resource, Concept, Transaction, Event: instance containers
//! - ModelRegistry: type definitions and deferred instance validation
//! - Factory: typed instance construction
//! - TallyError: Error type hierarchy
//! - ResourceView, QueryRunner: read traits shared by snapshots and transactions

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod factory;
pub mod instance;
pub mod model;
pub mod traits;
pub mod types;
pub mod value;

pub use error::{TallyError, TallyResult};
pub use factory::Factory;
pub use instance::{Concept, Event, Fields, Resource, ResourceType, Transaction};
pub use model::{FieldDef, FieldType, ModelRegistry, TypeDefinition, TypeKind};
pub use traits::{QueryParams, QueryRunner, ResourceView};
pub use types::{FqName, RegistryKey, Relationship, ResourceKind, RESOURCE_URI_PREFIX};
pub use value::Value;
