//! Instance types: resources, concepts, transactions and events
//!
//! Instances are plain field containers. Setting a field never validates
//! anything; validation happens once, against the model, when the instance is
//! inserted into a registry, submitted, or emitted
//! (see [`crate::model::ModelRegistry`]).
//!
//! Fields are kept in a `BTreeMap` so that two instances with the same
//! content compare and print identically.

use crate::error::{TallyError, TallyResult};
use crate::types::{FqName, Relationship, ResourceKind};
use crate::value::Value;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Field storage shared by every instance type
pub type Fields = BTreeMap<String, Value>;

/// Field accessors shared by all instance types.
macro_rules! impl_field_access {
    ($ty:ident) => {
        impl $ty {
            /// Fully-qualified type of this instance
            pub fn type_name(&self) -> &FqName {
                &self.type_name
            }

            /// Set a field, replacing any previous value
            pub fn set(&mut self, field: impl Into<String>, value: impl Into<Value>) -> &mut Self {
                self.fields.insert(field.into(), value.into());
                self
            }

            /// Builder-style [`Self::set`]
            pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
                self.fields.insert(field.into(), value.into());
                self
            }

            /// Remove a field, returning its previous value
            pub fn unset(&mut self, field: &str) -> Option<Value> {
                self.fields.remove(field)
            }

            /// Get a field value
            pub fn get(&self, field: &str) -> Option<&Value> {
                self.fields.get(field)
            }

            /// All fields, ordered by name
            pub fn fields(&self) -> &Fields {
                &self.fields
            }

            /// Mutable access to all fields
            pub fn fields_mut(&mut self) -> &mut Fields {
                &mut self.fields
            }

            /// Get a required string (or enum) field
            pub fn require_str(&self, field: &str) -> TallyResult<&str> {
                self.require(field)?
                    .as_str()
                    .ok_or_else(|| self.wrong_type(field, "String"))
            }

            /// Get a required integer field
            pub fn require_integer(&self, field: &str) -> TallyResult<i64> {
                self.require(field)?
                    .as_integer()
                    .ok_or_else(|| self.wrong_type(field, "Integer"))
            }

            /// Get a required numeric field as f64
            pub fn require_double(&self, field: &str) -> TallyResult<f64> {
                self.require(field)?
                    .as_double()
                    .ok_or_else(|| self.wrong_type(field, "Double"))
            }

            /// Get a required relationship field
            pub fn require_relationship(&self, field: &str) -> TallyResult<&Relationship> {
                self.require(field)?
                    .as_relationship()
                    .ok_or_else(|| self.wrong_type(field, "Relationship"))
            }

            /// Get a required concept field
            pub fn require_concept(&self, field: &str) -> TallyResult<&Concept> {
                self.require(field)?
                    .as_concept()
                    .ok_or_else(|| self.wrong_type(field, "Concept"))
            }

            fn require(&self, field: &str) -> TallyResult<&Value> {
                match self.fields.get(field) {
                    Some(value) if !value.is_null() => Ok(value),
                    _ => Err(TallyError::validation(
                        self.type_name.to_string(),
                        field,
                        "required field is missing",
                    )),
                }
            }

            fn wrong_type(&self, field: &str, expected: &str) -> TallyError {
                let actual = self
                    .fields
                    .get(field)
                    .map(Value::type_name)
                    .unwrap_or("Null");
                TallyError::validation(
                    self.type_name.to_string(),
                    field,
                    format!("expected {}, got {}", expected, actual),
                )
            }
        }
    };
}

/// An asset or participant instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    type_name: FqName,
    kind: ResourceKind,
    identifier_field: String,
    identifier: String,
    fields: Fields,
}

impl Resource {
    /// Create a resource whose identifying field is already populated
    ///
    /// Prefer [`crate::factory::Factory::new_resource`], which checks the
    /// type and identifier against the model.
    pub fn new(
        type_name: FqName,
        kind: ResourceKind,
        identifier_field: impl Into<String>,
        identifier: impl Into<String>,
    ) -> Self {
        let identifier_field = identifier_field.into();
        let identifier = identifier.into();
        let mut fields = Fields::new();
        fields.insert(identifier_field.clone(), Value::String(identifier.clone()));
        Self {
            type_name,
            kind,
            identifier_field,
            identifier,
            fields,
        }
    }

    /// Asset or participant
    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    /// Unique identifier within the registry
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// Name of the identifying field
    pub fn identifier_field(&self) -> &str {
        &self.identifier_field
    }

    /// `ns.Type#identifier`
    pub fn fully_qualified_identifier(&self) -> String {
        format!("{}#{}", self.type_name, self.identifier)
    }

    /// A relationship pointing at this resource
    pub fn to_relationship(&self) -> Relationship {
        Relationship::new(self.type_name.clone(), self.identifier.clone())
    }
}

impl_field_access!(Resource);

/// An identity-less value object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Concept {
    type_name: FqName,
    fields: Fields,
}

impl Concept {
    /// Create an empty concept
    pub fn new(type_name: FqName) -> Self {
        Self {
            type_name,
            fields: Fields::new(),
        }
    }
}

impl_field_access!(Concept);

/// A submitted transaction
///
/// Carries a system-generated identifier and timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    type_name: FqName,
    transaction_id: String,
    timestamp: DateTime<Utc>,
    fields: Fields,
}

impl Transaction {
    /// Create a transaction with an explicit identifier and timestamp
    pub fn new(
        type_name: FqName,
        transaction_id: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            type_name,
            transaction_id: transaction_id.into(),
            timestamp,
            fields: Fields::new(),
        }
    }

    /// System-generated identifier
    pub fn transaction_id(&self) -> &str {
        &self.transaction_id
    }

    /// Creation timestamp
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

impl_field_access!(Transaction);

/// An event emitted by business logic
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    type_name: FqName,
    event_id: String,
    timestamp: DateTime<Utc>,
    fields: Fields,
}

impl Event {
    /// Create an unstamped event; the executor assigns its id on emit
    pub fn new(type_name: FqName) -> Self {
        Self {
            type_name,
            event_id: String::new(),
            timestamp: Utc::now(),
            fields: Fields::new(),
        }
    }

    /// `<transaction id>#<emission index>`, empty until emitted
    pub fn event_id(&self) -> &str {
        &self.event_id
    }

    /// Emission timestamp
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// `ns.Type#<event id>`
    pub fn fully_qualified_identifier(&self) -> String {
        format!("{}#{}", self.type_name, self.event_id)
    }

    /// Stamp the event with its identity at emission time
    pub fn stamp(&mut self, event_id: String, timestamp: DateTime<Utc>) {
        self.event_id = event_id;
        self.timestamp = timestamp;
    }
}

impl_field_access!(Event);

/// Mapping between a Rust struct and a resource type
///
/// Lets callers build and read resources with compile-time field checks
/// instead of setting fields by name.
///
/// ```ignore
/// impl ResourceType for Commodity {
///     const NAMESPACE: &'static str = "org.acme.trading";
///     const NAME: &'static str = "Commodity";
///     const KIND: ResourceKind = ResourceKind::Asset;
///     const IDENTIFIER_FIELD: &'static str = "tradingSymbol";
///
///     fn identifier(&self) -> &str { &self.trading_symbol }
///     fn write_fields(&self, r: &mut Resource) { r.set("quantity", self.quantity); }
///     fn read_fields(r: &Resource) -> TallyResult<Self> { ... }
/// }
/// ```
pub trait ResourceType: Sized {
    /// Namespace of the type
    const NAMESPACE: &'static str;
    /// Short name of the type
    const NAME: &'static str;
    /// Asset or participant
    const KIND: ResourceKind;
    /// Name of the identifying field
    const IDENTIFIER_FIELD: &'static str;

    /// Identifier of this value
    fn identifier(&self) -> &str;

    /// Copy every non-identifier field into the resource
    fn write_fields(&self, resource: &mut Resource);

    /// Rebuild the value from a resource of this type
    fn read_fields(resource: &Resource) -> TallyResult<Self>;

    /// Fully-qualified type name
    fn fq_name() -> FqName {
        FqName::new(Self::NAMESPACE, Self::NAME)
    }

    /// Relationship to the resource with this identifier
    fn relationship(identifier: impl Into<String>) -> Relationship {
        Relationship::new(Self::fq_name(), identifier)
    }

    /// Convert into an untyped resource
    fn to_resource(&self) -> Resource {
        let mut resource = Resource::new(
            Self::fq_name(),
            Self::KIND,
            Self::IDENTIFIER_FIELD,
            self.identifier(),
        );
        self.write_fields(&mut resource);
        resource
    }

    /// Convert from an untyped resource, checking its type
    fn from_resource(resource: &Resource) -> TallyResult<Self> {
        if resource.type_name() != &Self::fq_name() {
            return Err(TallyError::validation(
                Self::fq_name().to_string(),
                resource.identifier_field(),
                format!("resource has type {}", resource.type_name()),
            ));
        }
        Self::read_fields(resource)
    }
}
