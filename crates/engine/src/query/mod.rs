//! Query engine
//!
//! - `definition`: query definitions, predicates, operands
//! - `plan`: definitions compiled against the model
//! - `eval`: evaluation against any `ResourceView`
//! - `registry`: named queries, the engine's `QueryRunner`

mod definition;
mod eval;
mod plan;
mod registry;

pub use definition::{
    CompareOp, FieldPath, Operand, OrderBy, Predicate, QueryDefinition, SortOrder,
};
pub use eval::compare_values;
pub use plan::CompiledQuery;
pub use registry::QueryRegistry;
