//! Factory for typed instances
//!
//! Checks that the requested type exists and has the right kind, and that
//! caller-supplied identifiers are well formed. Field values are not checked
//! here; see [`ModelRegistry`] for deferred validation.

use crate::error::{TallyError, TallyResult};
use crate::instance::{Concept, Event, Resource, Transaction};
use crate::model::{ModelRegistry, TypeDefinition, TypeKind};
use crate::types::{FqName, Relationship};
use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

/// Creates resources, concepts, transactions, events and relationships
#[derive(Debug, Clone)]
pub struct Factory {
    model: Arc<ModelRegistry>,
}

impl Factory {
    /// Create a factory over a model
    pub fn new(model: Arc<ModelRegistry>) -> Self {
        Self { model }
    }

    /// The model this factory resolves types against
    pub fn model(&self) -> &Arc<ModelRegistry> {
        &self.model
    }

    /// New asset or participant with the given identifier
    ///
    /// # Errors
    /// - `UnknownType` if the type is unregistered or not a resource type
    /// - `InvalidIdentifier` if the identifier is empty or malformed
    pub fn new_resource(
        &self,
        namespace: &str,
        type_name: &str,
        identifier: &str,
    ) -> TallyResult<Resource> {
        let definition = self.model.resolve(namespace, type_name)?;
        let (kind, identifier_field) =
            match (definition.kind.resource_kind(), &definition.identifier_field) {
                (Some(kind), Some(field)) => (kind, field.clone()),
                _ => return Err(wrong_kind(&definition, "asset or participant")),
            };
        check_identifier(&definition.name, identifier)?;
        Ok(Resource::new(
            definition.name.clone(),
            kind,
            identifier_field,
            identifier,
        ))
    }

    /// New empty concept
    pub fn new_concept(&self, namespace: &str, type_name: &str) -> TallyResult<Concept> {
        let definition = self.expect(namespace, type_name, TypeKind::Concept)?;
        Ok(Concept::new(definition.name.clone()))
    }

    /// New transaction with a generated identifier and the current timestamp
    pub fn new_transaction(&self, namespace: &str, type_name: &str) -> TallyResult<Transaction> {
        let definition = self.expect(namespace, type_name, TypeKind::Transaction)?;
        Ok(Transaction::new(
            definition.name.clone(),
            Uuid::new_v4().to_string(),
            Utc::now(),
        ))
    }

    /// New event; it receives its identifier when emitted
    pub fn new_event(&self, namespace: &str, type_name: &str) -> TallyResult<Event> {
        let definition = self.expect(namespace, type_name, TypeKind::Event)?;
        Ok(Event::new(definition.name.clone()))
    }

    /// New relationship to a resource of the given type
    ///
    /// The target does not have to exist yet.
    pub fn new_relationship(
        &self,
        namespace: &str,
        type_name: &str,
        identifier: &str,
    ) -> TallyResult<Relationship> {
        let definition = self.model.resolve(namespace, type_name)?;
        if definition.kind.resource_kind().is_none() {
            return Err(wrong_kind(&definition, "asset or participant"));
        }
        check_identifier(&definition.name, identifier)?;
        Ok(Relationship::new(definition.name.clone(), identifier))
    }

    fn expect(
        &self,
        namespace: &str,
        type_name: &str,
        kind: TypeKind,
    ) -> TallyResult<Arc<TypeDefinition>> {
        let definition = self.model.resolve(namespace, type_name)?;
        if definition.kind != kind {
            return Err(wrong_kind(&definition, kind.as_str()));
        }
        Ok(definition)
    }
}

fn wrong_kind(definition: &TypeDefinition, wanted: &str) -> TallyError {
    TallyError::UnknownType {
        name: format!(
            "{} (is a {}, not a {})",
            definition.name,
            definition.kind.as_str(),
            wanted
        ),
    }
}

/// Identifiers must be non-empty, free of whitespace and free of `#`
pub fn check_identifier(type_name: &FqName, identifier: &str) -> TallyResult<()> {
    let reason = if identifier.is_empty() {
        Some("identifier is empty")
    } else if identifier.chars().any(char::is_whitespace) {
        Some("identifier contains whitespace")
    } else if identifier.contains('#') {
        Some("identifier contains '#'")
    } else {
        None
    };
    match reason {
        Some(reason) => Err(TallyError::InvalidIdentifier {
            type_name: type_name.to_string(),
            identifier: identifier.to_string(),
            reason: reason.to_string(),
        }),
        None => Ok(()),
    }
}
