//! Query definitions
//!
//! A query names one resource type and selects from its registry with an
//! optional predicate, ordering, and paging. Operands are literals or named
//! parameters supplied at call time.
//!
//! ```ignore
//! QueryDefinition::new("selectCommoditiesByOwner", "Commodities of an owner", commodity)
//!     .filter(Predicate::eq("owner", Operand::param("owner")));
//! ```

use std::fmt;
use tally_core::{FqName, Value};

/// Dotted field path, e.g. `owner.lastName`
///
/// Each segment but the last must name a relationship or concept field;
/// relationships are dereferenced into their target registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldPath(Vec<String>);

impl FieldPath {
    /// Parse a dotted path
    pub fn parse(path: &str) -> Self {
        FieldPath(path.split('.').map(str::to_string).collect())
    }

    /// Path segments
    pub fn segments(&self) -> &[String] {
        &self.0
    }
}

impl From<&str> for FieldPath {
    fn from(path: &str) -> Self {
        FieldPath::parse(path)
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join("."))
    }
}

/// Right-hand side of a comparison
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    /// Fixed value
    Literal(Value),
    /// Named parameter (written `$name` in query text)
    Param(String),
}

impl Operand {
    /// Literal operand
    pub fn value(value: impl Into<Value>) -> Self {
        Operand::Literal(value.into())
    }

    /// Parameter operand; a leading `$` is accepted and stripped
    pub fn param(name: &str) -> Self {
        Operand::Param(name.trim_start_matches('$').to_string())
    }
}

/// Comparison operator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    /// `==`
    Eq,
    /// `!=`
    Ne,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
}

impl CompareOp {
    /// Check whether an ordering satisfies the operator
    pub fn accepts(self, ordering: std::cmp::Ordering) -> bool {
        use std::cmp::Ordering::*;
        match self {
            CompareOp::Eq => ordering == Equal,
            CompareOp::Ne => ordering != Equal,
            CompareOp::Lt => ordering == Less,
            CompareOp::Le => ordering != Greater,
            CompareOp::Gt => ordering == Greater,
            CompareOp::Ge => ordering != Less,
        }
    }
}

/// Selection predicate
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    /// Compare a field with an operand
    Compare {
        /// Field to read
        path: FieldPath,
        /// Operator
        op: CompareOp,
        /// Value or parameter to compare with
        operand: Operand,
    },
    /// All must hold
    And(Vec<Predicate>),
    /// Any must hold
    Or(Vec<Predicate>),
    /// Negation
    Not(Box<Predicate>),
}

macro_rules! comparison {
    ($fn_name:ident, $op:ident, $doc:literal) => {
        #[doc = $doc]
        pub fn $fn_name(path: impl Into<FieldPath>, operand: Operand) -> Self {
            Predicate::Compare {
                path: path.into(),
                op: CompareOp::$op,
                operand,
            }
        }
    };
}

impl Predicate {
    comparison!(eq, Eq, "`path == operand`");
    comparison!(ne, Ne, "`path != operand`");
    comparison!(lt, Lt, "`path < operand`");
    comparison!(le, Le, "`path <= operand`");
    comparison!(gt, Gt, "`path > operand`");
    comparison!(ge, Ge, "`path >= operand`");

    /// Conjunction with another predicate
    pub fn and(self, other: Predicate) -> Self {
        match self {
            Predicate::And(mut all) => {
                all.push(other);
                Predicate::And(all)
            }
            first => Predicate::And(vec![first, other]),
        }
    }

    /// Disjunction with another predicate
    pub fn or(self, other: Predicate) -> Self {
        match self {
            Predicate::Or(mut any) => {
                any.push(other);
                Predicate::Or(any)
            }
            first => Predicate::Or(vec![first, other]),
        }
    }

    /// Negation of a predicate
    pub fn negate(predicate: Predicate) -> Self {
        Predicate::Not(Box::new(predicate))
    }

    /// Visit every comparison in the tree
    pub(crate) fn for_each_comparison<'a>(&'a self, f: &mut impl FnMut(&'a FieldPath, &'a Operand)) {
        match self {
            Predicate::Compare { path, operand, .. } => f(path, operand),
            Predicate::And(items) | Predicate::Or(items) => {
                for item in items {
                    item.for_each_comparison(f);
                }
            }
            Predicate::Not(inner) => inner.for_each_comparison(f),
        }
    }
}

/// Sort direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    /// Smallest first
    #[default]
    Ascending,
    /// Largest first
    Descending,
}

/// One sort key
#[derive(Debug, Clone, PartialEq)]
pub struct OrderBy {
    /// Field to sort by
    pub path: FieldPath,
    /// Direction
    pub order: SortOrder,
}

/// Named query over one resource type
#[derive(Debug, Clone, PartialEq)]
pub struct QueryDefinition {
    /// Unique name the query is invoked by
    pub name: String,
    /// Human-readable description
    pub description: String,
    /// Asset or participant type selected from
    pub resource: FqName,
    /// Selection; every resource matches when absent
    pub predicate: Option<Predicate>,
    /// Sort keys; ascending identifier when empty
    pub order_by: Vec<OrderBy>,
    /// Maximum number of results
    pub limit: Option<usize>,
    /// Number of leading results to drop
    pub skip: usize,
}

impl QueryDefinition {
    /// Query selecting every resource of a type
    pub fn new(name: impl Into<String>, description: impl Into<String>, resource: FqName) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            resource,
            predicate: None,
            order_by: Vec::new(),
            limit: None,
            skip: 0,
        }
    }

    /// Set the selection predicate
    pub fn filter(mut self, predicate: Predicate) -> Self {
        self.predicate = Some(predicate);
        self
    }

    /// Append a sort key
    pub fn order_by(mut self, path: impl Into<FieldPath>, order: SortOrder) -> Self {
        self.order_by.push(OrderBy {
            path: path.into(),
            order,
        });
        self
    }

    /// Cap the number of results
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Drop leading results
    pub fn skip(mut self, skip: usize) -> Self {
        self.skip = skip;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cmp::Ordering;

    #[test]
    fn test_field_path_parse() {
        let path = FieldPath::parse("owner.lastName");
        assert_eq!(path.segments(), &["owner".to_string(), "lastName".to_string()]);
        assert_eq!(path.to_string(), "owner.lastName");
    }

    #[test]
    fn test_param_strips_dollar() {
        assert_eq!(Operand::param("$exchange"), Operand::Param("exchange".into()));
        assert_eq!(Operand::param("exchange"), Operand::Param("exchange".into()));
    }

    #[test]
    fn test_and_flattens() {
        let p = Predicate::eq("a", Operand::value(1))
            .and(Predicate::eq("b", Operand::value(2)))
            .and(Predicate::eq("c", Operand::value(3)));
        match p {
            Predicate::And(items) => assert_eq!(items.len(), 3),
            other => panic!("expected And, got {:?}", other),
        }
    }

    #[test]
    fn test_compare_op_accepts() {
        assert!(CompareOp::Ge.accepts(Ordering::Equal));
        assert!(CompareOp::Gt.accepts(Ordering::Greater));
        assert!(!CompareOp::Lt.accepts(Ordering::Equal));
        assert!(CompareOp::Ne.accepts(Ordering::Less));
    }
}
