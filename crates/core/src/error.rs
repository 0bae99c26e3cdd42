//! Error types for the ledger engine
//!
//! Every crate in the workspace reports failures through [`TallyError`].
//! We use `thiserror` for the `Display` and `Error` implementations.
//!
//! # Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Model | `UnknownType`, `DuplicateType`, `InvalidSchema` |
//! | Instance | `InvalidIdentifier`, `Validation` |
//! | Registry | `DuplicateIdentifier`, `NotFound` |
//! | Query | `UnknownQuery`, `DuplicateQuery`, `InvalidQuery`, `MissingParameter` |
//! | Execution | `ExecutionTimeout`, `Conflict`, `NoLogicBound`, `DomainLogic` |
//! | System | `Config`, `Internal` |

use thiserror::Error;

/// Result type alias for ledger operations
pub type TallyResult<T> = std::result::Result<T, TallyError>;

/// Error types for the ledger engine
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TallyError {
    // ==================== Model ====================
    /// No type is registered under this fully-qualified name
    #[error("unknown type: {name}")]
    UnknownType {
        /// Fully-qualified type name
        name: String,
    },

    /// A type is already registered under this fully-qualified name
    #[error("duplicate type: {name}")]
    DuplicateType {
        /// Fully-qualified type name
        name: String,
    },

    /// A type definition was rejected at definition time
    #[error("invalid schema for {name}: {reason}")]
    InvalidSchema {
        /// Fully-qualified type name
        name: String,
        /// What is wrong with the definition
        reason: String,
    },

    // ==================== Instance ====================
    /// Identifier is empty or malformed
    #[error("invalid identifier '{identifier}' for {type_name}: {reason}")]
    InvalidIdentifier {
        /// Fully-qualified type name
        type_name: String,
        /// Offending identifier
        identifier: String,
        /// Why it was rejected
        reason: String,
    },

    /// Instance does not conform to its type definition
    #[error("validation failed for {type_name}.{field}: {reason}")]
    Validation {
        /// Fully-qualified type name
        type_name: String,
        /// Offending field
        field: String,
        /// Why it was rejected
        reason: String,
    },

    // ==================== Registry ====================
    /// Identifier already present in the registry
    #[error("duplicate identifier '{identifier}' in registry {registry}")]
    DuplicateIdentifier {
        /// Registry name (`Asset:ns.Type`)
        registry: String,
        /// Offending identifier
        identifier: String,
    },

    /// Identifier absent from the registry
    #[error("'{identifier}' not found in registry {registry}")]
    NotFound {
        /// Registry name (`Asset:ns.Type`)
        registry: String,
        /// Missing identifier
        identifier: String,
    },

    // ==================== Query ====================
    /// No query registered under this name
    #[error("unknown query: {name}")]
    UnknownQuery {
        /// Query name
        name: String,
    },

    /// A query is already registered under this name
    #[error("duplicate query: {name}")]
    DuplicateQuery {
        /// Query name
        name: String,
    },

    /// Query definition refers to unknown types or fields
    #[error("invalid query {name}: {reason}")]
    InvalidQuery {
        /// Query name
        name: String,
        /// What is wrong with the definition
        reason: String,
    },

    /// A named parameter required by the query was not supplied
    #[error("query {query} is missing parameter '{parameter}'")]
    MissingParameter {
        /// Query name
        query: String,
        /// Parameter name
        parameter: String,
    },

    // ==================== Execution ====================
    /// Transaction ran past the configured execution timeout
    #[error("transaction {transaction_id} exceeded execution timeout of {timeout_ms}ms")]
    ExecutionTimeout {
        /// Transaction identifier
        transaction_id: String,
        /// Configured timeout
        timeout_ms: u64,
    },

    /// Transaction could not acquire a registry within the lock wait
    #[error("conflict: {reason}")]
    Conflict {
        /// Which registry was contended
        reason: String,
    },

    /// Transaction type has no business logic bound to it
    #[error("no business logic bound to transaction type {name}")]
    NoLogicBound {
        /// Fully-qualified transaction type name
        name: String,
    },

    /// Business logic raised an error
    #[error("business logic failed: {message}")]
    DomainLogic {
        /// Error raised by the routine
        message: String,
    },

    // ==================== System ====================
    /// Configuration could not be parsed or is out of range
    #[error("configuration error: {reason}")]
    Config {
        /// What is wrong with the configuration
        reason: String,
    },

    /// Invariant violation inside the engine
    #[error("internal error: {reason}")]
    Internal {
        /// Description of the violated invariant
        reason: String,
    },
}

impl TallyError {
    /// Build a `DomainLogic` error from anything displayable
    pub fn domain(message: impl Into<String>) -> Self {
        TallyError::DomainLogic {
            message: message.into(),
        }
    }

    /// Build an `Internal` error
    pub fn internal(reason: impl Into<String>) -> Self {
        TallyError::Internal {
            reason: reason.into(),
        }
    }

    /// Build a `Validation` error
    pub fn validation(
        type_name: impl Into<String>,
        field: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        TallyError::Validation {
            type_name: type_name.into(),
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// True for `NotFound`
    pub fn is_not_found(&self) -> bool {
        matches!(self, TallyError::NotFound { .. })
    }

    /// True for `Conflict`, the only retryable failure
    pub fn is_conflict(&self) -> bool {
        matches!(self, TallyError::Conflict { .. })
    }

    /// True for `Validation`
    pub fn is_validation(&self) -> bool {
        matches!(self, TallyError::Validation { .. })
    }
}
