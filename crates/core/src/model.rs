//! Model registry: type definitions for a business network
//!
//! Type definitions are registered once, when a network is deployed, and are
//! immutable afterwards. Schemas are checked when they are defined so that a
//! malformed definition is rejected before any instance exists.
//!
//! The registry is also where instances are validated. Validation is
//! deferred: the factory hands out unchecked field containers, and the
//! `finalize_*` methods run at registry insertion, transaction submission and
//! event emission. Finalizing fills defaults and normalizes values
//! (`String` into a listed `Enum`, `Integer` into `Double`), so the stored
//! instance always matches its declared types exactly.

use crate::error::{TallyError, TallyResult};
use crate::instance::{Concept, Event, Fields, Resource, Transaction};
use crate::types::{FqName, RegistryKey, ResourceKind};
use crate::value::Value;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

// ============================================================================
// Type Definitions
// ============================================================================

/// Kind of a type definition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeKind {
    /// Asset, held in an asset registry
    Asset,
    /// Participant, held in a participant registry
    Participant,
    /// Transaction, executed once and discarded
    Transaction,
    /// Identity-less value object
    Concept,
    /// Emitted by business logic
    Event,
}

impl TypeKind {
    /// Registry kind for assets and participants
    pub fn resource_kind(&self) -> Option<ResourceKind> {
        match self {
            TypeKind::Asset => Some(ResourceKind::Asset),
            TypeKind::Participant => Some(ResourceKind::Participant),
            _ => None,
        }
    }

    /// Get the kind name as a string
    pub fn as_str(&self) -> &'static str {
        match self {
            TypeKind::Asset => "asset",
            TypeKind::Participant => "participant",
            TypeKind::Transaction => "transaction",
            TypeKind::Concept => "concept",
            TypeKind::Event => "event",
        }
    }
}

impl From<ResourceKind> for TypeKind {
    fn from(kind: ResourceKind) -> Self {
        match kind {
            ResourceKind::Asset => TypeKind::Asset,
            ResourceKind::Participant => TypeKind::Participant,
        }
    }
}

/// Declared type of a field (element type when the field is an array)
#[derive(Debug, Clone, PartialEq)]
pub enum FieldType {
    /// UTF-8 string
    String,
    /// 64-bit integer
    Integer,
    /// 64-bit float
    Double,
    /// Boolean
    Boolean,
    /// UTC timestamp
    DateTime,
    /// One of a fixed list of values
    Enum(Vec<String>),
    /// Embedded concept of the given type
    Concept(FqName),
    /// Relationship to a resource of the given type
    Relationship(FqName),
}

impl FieldType {
    fn describe(&self) -> String {
        match self {
            FieldType::String => "String".to_string(),
            FieldType::Integer => "Integer".to_string(),
            FieldType::Double => "Double".to_string(),
            FieldType::Boolean => "Boolean".to_string(),
            FieldType::DateTime => "DateTime".to_string(),
            FieldType::Enum(values) => format!("Enum[{}]", values.join("|")),
            FieldType::Concept(fq) => format!("Concept<{}>", fq),
            FieldType::Relationship(fq) => format!("Relationship<{}>", fq),
        }
    }
}

/// One field of a type definition
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDef {
    /// Field name
    pub name: String,
    /// Declared type
    pub field_type: FieldType,
    /// Field may be absent
    pub optional: bool,
    /// Field holds an array of `field_type`
    pub array: bool,
    /// Value used when the field is absent
    pub default: Option<Value>,
}

impl FieldDef {
    /// Required scalar field of the given type
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            optional: false,
            array: false,
            default: None,
        }
    }

    /// `String` field
    pub fn string(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::String)
    }

    /// `Integer` field
    pub fn integer(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::Integer)
    }

    /// `Double` field
    pub fn double(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::Double)
    }

    /// `Boolean` field
    pub fn boolean(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::Boolean)
    }

    /// `DateTime` field
    pub fn datetime(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::DateTime)
    }

    /// Enum field listing its allowed values
    pub fn enumeration<S: Into<String>>(
        name: impl Into<String>,
        values: impl IntoIterator<Item = S>,
    ) -> Self {
        Self::new(
            name,
            FieldType::Enum(values.into_iter().map(Into::into).collect()),
        )
    }

    /// Embedded concept field
    pub fn concept(name: impl Into<String>, namespace: &str, type_name: &str) -> Self {
        Self::new(name, FieldType::Concept(FqName::new(namespace, type_name)))
    }

    /// Relationship field
    pub fn relationship(name: impl Into<String>, namespace: &str, type_name: &str) -> Self {
        Self::new(
            name,
            FieldType::Relationship(FqName::new(namespace, type_name)),
        )
    }

    /// Mark the field optional
    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    /// Mark the field as an array of its type
    pub fn array(mut self) -> Self {
        self.array = true;
        self
    }

    /// Set a default value
    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }
}

/// A registered type: name, kind, fields and (for resources) identifying field
#[derive(Debug, Clone, PartialEq)]
pub struct TypeDefinition {
    /// Fully-qualified name
    pub name: FqName,
    /// Kind of the type
    pub kind: TypeKind,
    /// Identifying field, assets and participants only
    pub identifier_field: Option<String>,
    /// Declared fields, in declaration order
    pub fields: Vec<FieldDef>,
}

impl TypeDefinition {
    fn with_kind(namespace: &str, name: &str, kind: TypeKind, id: Option<&str>) -> Self {
        let mut fields = Vec::new();
        if let Some(id) = id {
            fields.push(FieldDef::string(id));
        }
        Self {
            name: FqName::new(namespace, name),
            kind,
            identifier_field: id.map(str::to_string),
            fields,
        }
    }

    /// Asset type identified by `identifier_field` (declared as a `String`)
    pub fn asset(namespace: &str, name: &str, identifier_field: &str) -> Self {
        Self::with_kind(namespace, name, TypeKind::Asset, Some(identifier_field))
    }

    /// Participant type identified by `identifier_field` (declared as a `String`)
    pub fn participant(namespace: &str, name: &str, identifier_field: &str) -> Self {
        Self::with_kind(namespace, name, TypeKind::Participant, Some(identifier_field))
    }

    /// Transaction type
    pub fn transaction(namespace: &str, name: &str) -> Self {
        Self::with_kind(namespace, name, TypeKind::Transaction, None)
    }

    /// Concept type
    pub fn concept(namespace: &str, name: &str) -> Self {
        Self::with_kind(namespace, name, TypeKind::Concept, None)
    }

    /// Event type
    pub fn event(namespace: &str, name: &str) -> Self {
        Self::with_kind(namespace, name, TypeKind::Event, None)
    }

    /// Append a field
    pub fn field(mut self, field: FieldDef) -> Self {
        self.fields.push(field);
        self
    }

    /// Look up a field by name
    pub fn get_field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Registry holding instances of this type, if it is a resource type
    pub fn registry_key(&self) -> Option<RegistryKey> {
        self.kind
            .resource_kind()
            .map(|kind| RegistryKey::new(kind, self.name.clone()))
    }
}

// ============================================================================
// Model Registry
// ============================================================================

/// Registry of type definitions
///
/// Thread-safe; definitions are shared as `Arc<TypeDefinition>`.
#[derive(Debug, Default)]
pub struct ModelRegistry {
    types: RwLock<BTreeMap<FqName, Arc<TypeDefinition>>>,
}

impl ModelRegistry {
    /// Create an empty model
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a type definition
    ///
    /// # Errors
    /// - `DuplicateType` if the name is already registered
    /// - `InvalidSchema` if the definition is malformed
    pub fn define(&self, definition: TypeDefinition) -> TallyResult<Arc<TypeDefinition>> {
        let mut types = self.types.write();
        if types.contains_key(&definition.name) {
            return Err(TallyError::DuplicateType {
                name: definition.name.to_string(),
            });
        }
        check_definition(&types, &definition)?;
        let definition = Arc::new(definition);
        types.insert(definition.name.clone(), Arc::clone(&definition));
        Ok(definition)
    }

    /// Register several definitions in order, stopping at the first failure
    pub fn define_all(
        &self,
        definitions: impl IntoIterator<Item = TypeDefinition>,
    ) -> TallyResult<()> {
        for definition in definitions {
            self.define(definition)?;
        }
        Ok(())
    }

    /// Look up a type by namespace and name
    ///
    /// # Errors
    /// `UnknownType` if absent
    pub fn resolve(&self, namespace: &str, name: &str) -> TallyResult<Arc<TypeDefinition>> {
        self.resolve_fq(&FqName::new(namespace, name))
    }

    /// Look up a type by fully-qualified name
    pub fn resolve_fq(&self, name: &FqName) -> TallyResult<Arc<TypeDefinition>> {
        self.types
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| TallyError::UnknownType {
                name: name.to_string(),
            })
    }

    /// Registry key for a resource type
    ///
    /// # Errors
    /// `UnknownType` if absent or not an asset/participant type
    pub fn registry_key(&self, name: &FqName) -> TallyResult<RegistryKey> {
        self.resolve_fq(name)?
            .registry_key()
            .ok_or_else(|| TallyError::UnknownType {
                name: format!("{} (not an asset or participant)", name),
            })
    }

    /// Check if a type is registered
    pub fn contains(&self, name: &FqName) -> bool {
        self.types.read().contains_key(name)
    }

    /// Number of registered types
    pub fn len(&self) -> usize {
        self.types.read().len()
    }

    /// Check if no type is registered
    pub fn is_empty(&self) -> bool {
        self.types.read().is_empty()
    }

    /// All registered type names, ordered
    pub fn type_names(&self) -> Vec<FqName> {
        self.types.read().keys().cloned().collect()
    }

    // ========================================================================
    // Instance validation
    // ========================================================================

    /// Validate a resource and fill its defaults
    ///
    /// # Errors
    /// `UnknownType` for an unregistered type, `Validation` naming the
    /// offending field otherwise
    pub fn finalize_resource(&self, mut resource: Resource) -> TallyResult<Resource> {
        let definition = self.resolve_fq(resource.type_name())?;
        let expected = definition.kind.resource_kind();
        if expected != Some(resource.kind()) {
            return Err(TallyError::UnknownType {
                name: format!("{} (not a {})", definition.name, resource.kind()),
            });
        }
        let identifier_field = definition.identifier_field.as_deref().unwrap_or_default();
        if resource.identifier_field() != identifier_field {
            return Err(TallyError::validation(
                definition.name.to_string(),
                resource.identifier_field(),
                format!("identifying field is '{}'", identifier_field),
            ));
        }
        let identifier = resource.identifier().to_string();
        self.normalize_fields(&definition, resource.fields_mut())?;
        if resource.get(identifier_field).and_then(Value::as_str) != Some(identifier.as_str()) {
            return Err(TallyError::validation(
                definition.name.to_string(),
                identifier_field,
                "identifying field does not match the resource identifier",
            ));
        }
        Ok(resource)
    }

    /// Validate a transaction and fill its defaults
    pub fn finalize_transaction(&self, mut transaction: Transaction) -> TallyResult<Transaction> {
        let definition = self.expect_kind(transaction.type_name(), TypeKind::Transaction)?;
        self.normalize_fields(&definition, transaction.fields_mut())?;
        Ok(transaction)
    }

    /// Validate an event and fill its defaults
    pub fn finalize_event(&self, mut event: Event) -> TallyResult<Event> {
        let definition = self.expect_kind(event.type_name(), TypeKind::Event)?;
        self.normalize_fields(&definition, event.fields_mut())?;
        Ok(event)
    }

    /// Validate a concept and fill its defaults
    pub fn finalize_concept(&self, mut concept: Concept) -> TallyResult<Concept> {
        let definition = self.expect_kind(concept.type_name(), TypeKind::Concept)?;
        self.normalize_fields(&definition, concept.fields_mut())?;
        Ok(concept)
    }

    fn expect_kind(&self, name: &FqName, kind: TypeKind) -> TallyResult<Arc<TypeDefinition>> {
        let definition = self.resolve_fq(name)?;
        if definition.kind != kind {
            return Err(TallyError::UnknownType {
                name: format!("{} (not a {})", name, kind.as_str()),
            });
        }
        Ok(definition)
    }

    fn normalize_fields(&self, definition: &TypeDefinition, fields: &mut Fields) -> TallyResult<()> {
        let owner = definition.name.to_string();

        if let Some(unknown) = fields
            .keys()
            .find(|name| definition.get_field(name).is_none())
        {
            return Err(TallyError::validation(
                owner,
                unknown.as_str(),
                "field is not declared by the type",
            ));
        }

        for field in &definition.fields {
            let present = fields.get(&field.name).map_or(false, |v| !v.is_null());
            if !present {
                if let Some(default) = &field.default {
                    fields.insert(field.name.clone(), default.clone());
                } else if field.optional {
                    fields.remove(&field.name);
                    continue;
                } else {
                    return Err(TallyError::validation(
                        owner,
                        field.name.as_str(),
                        "required field is missing",
                    ));
                }
            }
            if let Some(value) = fields.get_mut(&field.name) {
                self.normalize_value(&owner, field, value)?;
            }
        }
        Ok(())
    }

    fn normalize_value(&self, owner: &str, field: &FieldDef, value: &mut Value) -> TallyResult<()> {
        if field.array {
            match value {
                Value::Array(items) => {
                    for item in items.iter_mut() {
                        self.normalize_scalar(owner, field, item)?;
                    }
                    Ok(())
                }
                other => Err(type_mismatch(owner, field, other)),
            }
        } else {
            self.normalize_scalar(owner, field, value)
        }
    }

    fn normalize_scalar(&self, owner: &str, field: &FieldDef, value: &mut Value) -> TallyResult<()> {
        let normalized = match (&field.field_type, &*value) {
            (FieldType::String, Value::String(_))
            | (FieldType::Integer, Value::Integer(_))
            | (FieldType::Double, Value::Double(_))
            | (FieldType::Boolean, Value::Bool(_))
            | (FieldType::DateTime, Value::DateTime(_)) => None,
            (FieldType::Double, Value::Integer(i)) => Some(Value::Double(*i as f64)),
            (FieldType::Enum(values), Value::Enum(s)) | (FieldType::Enum(values), Value::String(s)) => {
                if !values.iter().any(|v| v == s) {
                    return Err(TallyError::validation(
                        owner,
                        field.name.as_str(),
                        format!("'{}' is not one of {}", s, values.join(", ")),
                    ));
                }
                Some(Value::Enum(s.clone()))
            }
            (FieldType::Relationship(target), Value::Relationship(rel)) => {
                if &rel.type_name != target {
                    return Err(TallyError::validation(
                        owner,
                        field.name.as_str(),
                        format!("relationship targets {}, expected {}", rel.type_name, target),
                    ));
                }
                None
            }
            (FieldType::Concept(target), Value::Concept(concept)) => {
                if concept.type_name() != target {
                    return Err(TallyError::validation(
                        owner,
                        field.name.as_str(),
                        format!("concept has type {}, expected {}", concept.type_name(), target),
                    ));
                }
                let finalized = self.finalize_concept((**concept).clone())?;
                Some(Value::Concept(Box::new(finalized)))
            }
            (_, other) => return Err(type_mismatch(owner, field, other)),
        };
        if let Some(normalized) = normalized {
            *value = normalized;
        }
        Ok(())
    }
}

fn type_mismatch(owner: &str, field: &FieldDef, value: &Value) -> TallyError {
    let expected = if field.array {
        format!("{}[]", field.field_type.describe())
    } else {
        field.field_type.describe()
    };
    TallyError::validation(
        owner,
        field.name.as_str(),
        format!("expected {}, got {}", expected, value.type_name()),
    )
}

// ============================================================================
// Definition-time schema checks
// ============================================================================

fn check_definition(
    types: &BTreeMap<FqName, Arc<TypeDefinition>>,
    definition: &TypeDefinition,
) -> TallyResult<()> {
    let invalid = |reason: String| TallyError::InvalidSchema {
        name: definition.name.to_string(),
        reason,
    };

    if definition.name.namespace.is_empty() || definition.name.name.is_empty() {
        return Err(invalid("namespace and name must be non-empty".to_string()));
    }
    if definition.name.name.contains(['.', '#']) {
        return Err(invalid("type name must not contain '.' or '#'".to_string()));
    }

    let mut seen = HashSet::new();
    for field in &definition.fields {
        if field.name.is_empty() || field.name.starts_with('$') {
            return Err(invalid(format!("invalid field name '{}'", field.name)));
        }
        if !seen.insert(field.name.as_str()) {
            return Err(invalid(format!("duplicate field '{}'", field.name)));
        }
        check_field_type(types, definition, field).map_err(invalid)?;
    }

    match (definition.kind.resource_kind(), &definition.identifier_field) {
        (Some(_), Some(id)) => {
            let field = definition
                .get_field(id)
                .ok_or_else(|| invalid(format!("identifying field '{}' is not declared", id)))?;
            if field.field_type != FieldType::String || field.optional || field.array {
                return Err(invalid(format!(
                    "identifying field '{}' must be a required String",
                    id
                )));
            }
        }
        (Some(_), None) => {
            return Err(invalid(format!(
                "{} types need an identifying field",
                definition.kind.as_str()
            )))
        }
        (None, Some(_)) => {
            return Err(invalid(format!(
                "{} types have system identifiers",
                definition.kind.as_str()
            )))
        }
        (None, None) => {}
    }

    // Defaults are checked against a scratch registry that already holds the
    // new type, so self-referencing concepts resolve.
    let scratch = ModelRegistry::new();
    {
        let mut scratch_types = scratch.types.write();
        scratch_types.extend(types.iter().map(|(k, v)| (k.clone(), Arc::clone(v))));
        scratch_types.insert(definition.name.clone(), Arc::new(definition.clone()));
    }
    for field in &definition.fields {
        if let Some(default) = &field.default {
            let mut value = default.clone();
            scratch
                .normalize_value(&definition.name.to_string(), field, &mut value)
                .map_err(|e| invalid(format!("bad default for '{}': {}", field.name, e)))?;
        }
    }
    Ok(())
}

fn check_field_type(
    types: &BTreeMap<FqName, Arc<TypeDefinition>>,
    definition: &TypeDefinition,
    field: &FieldDef,
) -> Result<(), String> {
    let kind_of = |fq: &FqName| -> Option<TypeKind> {
        if fq == &definition.name {
            Some(definition.kind)
        } else {
            types.get(fq).map(|t| t.kind)
        }
    };

    match &field.field_type {
        FieldType::Enum(values) => {
            if values.is_empty() {
                return Err(format!("enum field '{}' lists no values", field.name));
            }
            let unique: HashSet<&String> = values.iter().collect();
            if unique.len() != values.len() {
                return Err(format!("enum field '{}' repeats a value", field.name));
            }
        }
        FieldType::Concept(target) => match kind_of(target) {
            Some(TypeKind::Concept) => {}
            Some(other) => {
                return Err(format!(
                    "field '{}' embeds {} which is a {}",
                    field.name,
                    target,
                    other.as_str()
                ))
            }
            None => return Err(format!("field '{}' embeds unknown type {}", field.name, target)),
        },
        FieldType::Relationship(target) => match kind_of(target) {
            Some(TypeKind::Asset) | Some(TypeKind::Participant) => {}
            Some(other) => {
                return Err(format!(
                    "field '{}' relates to {} which is a {}",
                    field.name,
                    target,
                    other.as_str()
                ))
            }
            None => {
                return Err(format!(
                    "field '{}' relates to unknown type {}",
                    field.name, target
                ))
            }
        },
        _ => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Relationship;

    const NS: &str = "org.acme.trading";

    fn trading_model() -> ModelRegistry {
        let model = ModelRegistry::new();
        model
            .define(
                TypeDefinition::participant(NS, "Trader", "tradeId")
                    .field(FieldDef::string("firstName"))
                    .field(FieldDef::string("lastName")),
            )
            .unwrap();
        model
            .define(
                TypeDefinition::asset(NS, "Commodity", "tradingSymbol")
                    .field(FieldDef::string("description"))
                    .field(FieldDef::string("mainExchange"))
                    .field(FieldDef::double("quantity"))
                    .field(FieldDef::relationship("owner", NS, "Trader")),
            )
            .unwrap();
        model
    }

    fn commodity(id: &str) -> Resource {
        Resource::new(
            FqName::new(NS, "Commodity"),
            ResourceKind::Asset,
            "tradingSymbol",
            id,
        )
        .with("description", "Corn")
        .with("mainExchange", "Euronext")
        .with("quantity", 100)
        .with(
            "owner",
            Relationship::new(FqName::new(NS, "Trader"), "dan@email.com"),
        )
    }

    #[test]
    fn test_define_and_resolve() {
        let model = trading_model();
        let def = model.resolve(NS, "Commodity").unwrap();
        assert_eq!(def.kind, TypeKind::Asset);
        assert_eq!(def.identifier_field.as_deref(), Some("tradingSymbol"));
        assert_eq!(model.len(), 2);
    }

    #[test]
    fn test_define_duplicate_fails() {
        let model = trading_model();
        let err = model
            .define(TypeDefinition::participant(NS, "Trader", "tradeId"))
            .unwrap_err();
        assert!(matches!(err, TallyError::DuplicateType { .. }));
    }

    #[test]
    fn test_resolve_unknown_fails() {
        let model = trading_model();
        assert!(matches!(
            model.resolve(NS, "Bond"),
            Err(TallyError::UnknownType { .. })
        ));
    }

    #[test]
    fn test_schema_rejects_duplicate_field() {
        let model = ModelRegistry::new();
        let err = model
            .define(
                TypeDefinition::concept(NS, "Address")
                    .field(FieldDef::string("city"))
                    .field(FieldDef::string("city")),
            )
            .unwrap_err();
        assert!(matches!(err, TallyError::InvalidSchema { .. }));
    }

    #[test]
    fn test_schema_rejects_unknown_relationship_target() {
        let model = ModelRegistry::new();
        let err = model
            .define(
                TypeDefinition::asset(NS, "Commodity", "tradingSymbol")
                    .field(FieldDef::relationship("owner", NS, "Trader")),
            )
            .unwrap_err();
        assert!(err.to_string().contains("unknown type"));
    }

    #[test]
    fn test_schema_rejects_relationship_to_concept() {
        let model = ModelRegistry::new();
        model.define(TypeDefinition::concept(NS, "Address")).unwrap();
        let err = model
            .define(
                TypeDefinition::asset(NS, "House", "id")
                    .field(FieldDef::relationship("address", NS, "Address")),
            )
            .unwrap_err();
        assert!(matches!(err, TallyError::InvalidSchema { .. }));
    }

    #[test]
    fn test_schema_rejects_bad_identifier_field() {
        let model = ModelRegistry::new();
        let mut def = TypeDefinition::asset(NS, "Thing", "id");
        def.fields[0] = FieldDef::integer("id");
        assert!(matches!(
            model.define(def),
            Err(TallyError::InvalidSchema { .. })
        ));

        let mut concept = TypeDefinition::concept(NS, "Value");
        concept.identifier_field = Some("id".into());
        assert!(model.define(concept).is_err());
    }

    #[test]
    fn test_schema_rejects_empty_enum_and_bad_default() {
        let model = ModelRegistry::new();
        let empty: Vec<String> = vec![];
        assert!(model
            .define(TypeDefinition::concept(NS, "A").field(FieldDef::enumeration("e", empty)))
            .is_err());
        assert!(model
            .define(
                TypeDefinition::concept(NS, "B")
                    .field(FieldDef::integer("n").default_value("ten"))
            )
            .is_err());
    }

    #[test]
    fn test_self_relationship_allowed() {
        let model = ModelRegistry::new();
        model
            .define(
                TypeDefinition::participant(NS, "Person", "id")
                    .field(FieldDef::relationship("manager", NS, "Person").optional()),
            )
            .unwrap();
    }

    #[test]
    fn test_finalize_resource_normalizes_integer_to_double() {
        let model = trading_model();
        let finalized = model.finalize_resource(commodity("EMA")).unwrap();
        assert_eq!(finalized.get("quantity"), Some(&Value::Double(100.0)));
    }

    #[test]
    fn test_finalize_resource_missing_required_field() {
        let model = trading_model();
        let mut r = commodity("EMA");
        r.unset("owner");
        match model.finalize_resource(r) {
            Err(TallyError::Validation { field, .. }) => assert_eq!(field, "owner"),
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_finalize_resource_rejects_undeclared_field() {
        let model = trading_model();
        let r = commodity("EMA").with("color", "RED");
        let err = model.finalize_resource(r).unwrap_err();
        assert!(err.to_string().contains("color"));
    }

    #[test]
    fn test_finalize_resource_rejects_wrong_relationship_type() {
        let model = trading_model();
        let r = commodity("EMA").with(
            "owner",
            Relationship::new(FqName::new(NS, "Commodity"), "XYZ"),
        );
        assert!(model.finalize_resource(r).unwrap_err().is_validation());
    }

    #[test]
    fn test_finalize_resource_rejects_tampered_identifier() {
        let model = trading_model();
        let r = commodity("EMA").with("tradingSymbol", "XYZ");
        assert!(model.finalize_resource(r).unwrap_err().is_validation());
    }

    #[test]
    fn test_defaults_and_optional_fields() {
        let model = ModelRegistry::new();
        model
            .define(
                TypeDefinition::concept(NS, "PaymentFrequency")
                    .field(FieldDef::integer("periodMultiplier").default_value(1))
                    .field(FieldDef::enumeration("period", ["DAY", "WEEK", "MONTH", "YEAR"]))
                    .field(FieldDef::string("note").optional()),
            )
            .unwrap();
        let concept = Concept::new(FqName::new(NS, "PaymentFrequency")).with("period", "MONTH");
        let finalized = model.finalize_concept(concept).unwrap();
        assert_eq!(finalized.get("periodMultiplier"), Some(&Value::Integer(1)));
        assert_eq!(finalized.get("period"), Some(&Value::Enum("MONTH".into())));
        assert!(finalized.get("note").is_none());

        let bad = Concept::new(FqName::new(NS, "PaymentFrequency")).with("period", "FORTNIGHT");
        assert!(model.finalize_concept(bad).is_err());
    }

    #[test]
    fn test_array_fields_checked_elementwise() {
        let model = ModelRegistry::new();
        model
            .define(TypeDefinition::concept(NS, "Bond").field(FieldDef::string("exchangeId").array()))
            .unwrap();
        let ok = Concept::new(FqName::new(NS, "Bond")).with("exchangeId", vec!["NYSE"]);
        assert!(model.finalize_concept(ok).is_ok());
        let scalar = Concept::new(FqName::new(NS, "Bond")).with("exchangeId", "NYSE");
        assert!(model.finalize_concept(scalar).is_err());
        let mixed = Concept::new(FqName::new(NS, "Bond"))
            .with("exchangeId", Value::Array(vec![Value::from("NYSE"), Value::Integer(1)]));
        assert!(model.finalize_concept(mixed).is_err());
    }

    #[test]
    fn test_nested_concepts_validated() {
        let model = ModelRegistry::new();
        model
            .define(TypeDefinition::concept(NS, "Inner").field(FieldDef::integer("n")))
            .unwrap();
        model
            .define(TypeDefinition::transaction(NS, "Outer").field(FieldDef::concept("inner", NS, "Inner")))
            .unwrap();
        let txn = Transaction::new(FqName::new(NS, "Outer"), "t1", chrono::Utc::now())
            .with("inner", Concept::new(FqName::new(NS, "Inner")));
        match model.finalize_transaction(txn) {
            Err(TallyError::Validation { type_name, field, .. }) => {
                assert_eq!(type_name, "org.acme.trading.Inner");
                assert_eq!(field, "n");
            }
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_registry_key_only_for_resources() {
        let model = trading_model();
        model.define(TypeDefinition::transaction(NS, "Trade")).unwrap();
        assert_eq!(
            model.registry_key(&FqName::new(NS, "Trader")).unwrap(),
            RegistryKey::participant(NS, "Trader")
        );
        assert!(model.registry_key(&FqName::new(NS, "Trade")).is_err());
    }
}
