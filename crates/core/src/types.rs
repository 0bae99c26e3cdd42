//! Core naming types for the ledger
//!
//! This module defines the foundational types:
//! - FqName: Fully-qualified type name (namespace + name)
//! - ResourceKind: Asset or participant, the two kinds held in registries
//! - RegistryKey: (kind, type) pair that identifies one registry
//! - Relationship: Typed reference to a resource by identifier

use serde::{Deserialize, Serialize};
use std::fmt;

/// Prefix of the URI form of a relationship
pub const RESOURCE_URI_PREFIX: &str = "resource:";

/// Fully-qualified type name: `namespace.Name`
///
/// Ordering is lexicographic by namespace, then name. Registry locks are
/// always taken in this order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FqName {
    /// Dotted namespace, e.g. `org.acme.trading`
    pub namespace: String,
    /// Short type name, e.g. `Commodity`
    pub name: String,
}

impl FqName {
    /// Create a fully-qualified name
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Parse `namespace.Name`, splitting at the last dot
    ///
    /// Returns None when there is no dot or either side is empty.
    pub fn parse(s: &str) -> Option<Self> {
        let (namespace, name) = s.rsplit_once('.')?;
        if namespace.is_empty() || name.is_empty() {
            return None;
        }
        Some(Self::new(namespace, name))
    }
}

impl fmt::Display for FqName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.namespace, self.name)
    }
}

/// Kind of resource held by a registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ResourceKind {
    /// Asset registry
    Asset,
    /// Participant registry
    Participant,
}

impl ResourceKind {
    /// Get the kind name as a string
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Asset => "Asset",
            ResourceKind::Participant => "Participant",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifies one registry: one per (kind, fully-qualified type)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RegistryKey {
    /// Asset or participant
    pub kind: ResourceKind,
    /// Type whose instances the registry holds
    pub type_name: FqName,
}

impl RegistryKey {
    /// Create a registry key
    pub fn new(kind: ResourceKind, type_name: FqName) -> Self {
        Self { kind, type_name }
    }

    /// Key of an asset registry
    pub fn asset(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(ResourceKind::Asset, FqName::new(namespace, name))
    }

    /// Key of a participant registry
    pub fn participant(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(ResourceKind::Participant, FqName::new(namespace, name))
    }
}

impl fmt::Display for RegistryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.type_name)
    }
}

/// A typed reference to a resource by identifier
///
/// Relationships are never embedded copies. The target is looked up in its
/// registry when dereferenced and need not exist when the relationship is
/// created.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Relationship {
    /// Declared type of the target
    pub type_name: FqName,
    /// Identifier of the target
    pub identifier: String,
}

impl Relationship {
    /// Create a relationship
    pub fn new(type_name: FqName, identifier: impl Into<String>) -> Self {
        Self {
            type_name,
            identifier: identifier.into(),
        }
    }

    /// Identifier of the target resource
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// `ns.Type#identifier`
    pub fn fully_qualified_identifier(&self) -> String {
        format!("{}#{}", self.type_name, self.identifier)
    }

    /// `resource:ns.Type#identifier`
    pub fn to_uri(&self) -> String {
        format!("{}{}", RESOURCE_URI_PREFIX, self.fully_qualified_identifier())
    }

    /// Parse the URI form produced by [`Relationship::to_uri`]
    pub fn parse_uri(uri: &str) -> Option<Self> {
        let rest = uri.strip_prefix(RESOURCE_URI_PREFIX)?;
        let (type_part, identifier) = rest.split_once('#')?;
        if identifier.is_empty() {
            return None;
        }
        Some(Self::new(FqName::parse(type_part)?, identifier))
    }
}

impl fmt::Display for Relationship {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_uri())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fq_name_display_and_parse() {
        let fq = FqName::new("org.acme.trading", "Commodity");
        assert_eq!(fq.to_string(), "org.acme.trading.Commodity");
        assert_eq!(FqName::parse("org.acme.trading.Commodity"), Some(fq));
    }

    #[test]
    fn test_fq_name_parse_rejects_bare_names() {
        assert_eq!(FqName::parse("Commodity"), None);
        assert_eq!(FqName::parse(".Commodity"), None);
        assert_eq!(FqName::parse("org.acme."), None);
    }

    #[test]
    fn test_registry_key_display() {
        let key = RegistryKey::participant("org.acme.trading", "Trader");
        assert_eq!(key.to_string(), "Participant:org.acme.trading.Trader");
    }

    #[test]
    fn test_registry_keys_order_by_kind_then_type() {
        let mut keys = vec![
            RegistryKey::participant("a", "Z"),
            RegistryKey::asset("b", "B"),
            RegistryKey::asset("a", "C"),
        ];
        keys.sort();
        assert_eq!(
            keys,
            vec![
                RegistryKey::asset("a", "C"),
                RegistryKey::asset("b", "B"),
                RegistryKey::participant("a", "Z"),
            ]
        );
    }

    #[test]
    fn test_relationship_uri() {
        let rel = Relationship::new(FqName::new("org.acme.trading", "Trader"), "simon@email.com");
        assert_eq!(rel.to_uri(), "resource:org.acme.trading.Trader#simon@email.com");
        assert_eq!(Relationship::parse_uri(&rel.to_uri()), Some(rel));
    }

    #[test]
    fn test_relationship_parse_uri_rejects_malformed() {
        assert_eq!(Relationship::parse_uri("org.acme.Trader#x"), None);
        assert_eq!(Relationship::parse_uri("resource:org.acme.Trader"), None);
        assert_eq!(Relationship::parse_uri("resource:org.acme.Trader#"), None);
        assert_eq!(Relationship::parse_uri("resource:Trader#x"), None);
    }
}
