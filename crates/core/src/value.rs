//! Value types for the ledger
//!
//! This module defines:
//! - Value: Unified enum for every field value an instance can carry
//!
//! ## Type Rules
//!
//! - No implicit coercions in equality: `Integer(1) != Double(1.0)`
//! - `Enum("MONTH") != String("MONTH")`
//! - Double uses IEEE-754 equality: `NaN != NaN`
//! - Ordering ([`Value::compare`]) is defined within a variant, and between
//!   `Integer` and `Double` numerically; everything else is unordered

use crate::instance::Concept;
use crate::types::Relationship;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Field value of a resource, concept, transaction or event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// Absent value
    Null,
    /// Boolean value
    Bool(bool),
    /// 64-bit signed integer
    Integer(i64),
    /// 64-bit floating point (IEEE-754)
    Double(f64),
    /// UTF-8 string
    String(String),
    /// UTC timestamp
    DateTime(DateTime<Utc>),
    /// One of the values listed by an enum field
    Enum(String),
    /// Array of values
    Array(Vec<Value>),
    /// Embedded value object
    Concept(Box<Concept>),
    /// Typed reference to a resource
    Relationship(Relationship),
}

impl Value {
    /// Get the type name as a string
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "Null",
            Value::Bool(_) => "Boolean",
            Value::Integer(_) => "Integer",
            Value::Double(_) => "Double",
            Value::String(_) => "String",
            Value::DateTime(_) => "DateTime",
            Value::Enum(_) => "Enum",
            Value::Array(_) => "Array",
            Value::Concept(_) => "Concept",
            Value::Relationship(_) => "Relationship",
        }
    }

    /// Check if this is a null value
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Get as bool if this is a Bool value
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Get as i64 if this is an Integer value
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Get as f64 if this is a Double or Integer value
    pub fn as_double(&self) -> Option<f64> {
        match self {
            Value::Double(d) => Some(*d),
            Value::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    /// Get as &str if this is a String or Enum value
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) | Value::Enum(s) => Some(s),
            _ => None,
        }
    }

    /// Get as DateTime if this is a DateTime value
    pub fn as_datetime(&self) -> Option<&DateTime<Utc>> {
        match self {
            Value::DateTime(dt) => Some(dt),
            _ => None,
        }
    }

    /// Get as slice if this is an Array value
    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    /// Get as Concept if this is a Concept value
    pub fn as_concept(&self) -> Option<&Concept> {
        match self {
            Value::Concept(c) => Some(c),
            _ => None,
        }
    }

    /// Get as Relationship if this is a Relationship value
    pub fn as_relationship(&self) -> Option<&Relationship> {
        match self {
            Value::Relationship(r) => Some(r),
            _ => None,
        }
    }

    /// Compare two values for ordering
    ///
    /// Returns None for incomparable pairs (different variants other than
    /// Integer/Double, arrays, concepts, NaN).
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Integer(a), Value::Integer(b)) => Some(a.cmp(b)),
            (Value::Integer(_), Value::Double(_))
            | (Value::Double(_), Value::Integer(_))
            | (Value::Double(_), Value::Double(_)) => {
                self.as_double()?.partial_cmp(&other.as_double()?)
            }
            (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
            (Value::Enum(a), Value::Enum(b)) => Some(a.cmp(b)),
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            (Value::DateTime(a), Value::DateTime(b)) => Some(a.cmp(b)),
            (Value::Relationship(a), Value::Relationship(b)) => Some(a.cmp(b)),
            (Value::Null, Value::Null) => Some(Ordering::Equal),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Integer(i as i64)
    }
}

impl From<f64> for Value {
    fn from(d: f64) -> Self {
        Value::Double(d)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(dt: DateTime<Utc>) -> Self {
        Value::DateTime(dt)
    }
}

impl From<Relationship> for Value {
    fn from(r: Relationship) -> Self {
        Value::Relationship(r)
    }
}

impl From<Concept> for Value {
    fn from(c: Concept) -> Self {
        Value::Concept(Box::new(c))
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Value::Array(items.into_iter().map(Into::into).collect())
    }
}
