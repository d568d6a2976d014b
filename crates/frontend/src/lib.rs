//! SQL front-end for the query router: lowering into a closed AST,
//! optimizer rewrites, canonical text, feature extraction, and predicate
//! extraction.
//!
//! Architecture role:
//! - translates sqlparser output into the routed [`ast::QueryAst`] subset
//! - resolves names against catalog schemas ([`analyzer`])
//! - produces the [`AnalyzedQuery`] value every later pipeline stage reads
//!
//! Key modules:
//! - [`sql_frontend`]
//! - [`analyzer`]
//! - [`optimizer`]
//! - [`canonical`]
//! - [`features`]
//! - [`predicate`]

pub mod analyzer;
pub mod ast;
pub mod canonical;
pub mod features;
pub mod optimizer;
pub mod predicate;
pub mod sql_frontend;

pub use analyzer::{AnalyzedQuery, Analyzer, NoSchemas, SchemaProvider, TableBinding};
pub use ast::{
    ColumnRef, CompareOp, JoinClause, JoinType, OrderKey, QueryAst, ScalarExpr, SelectItem,
    TableRef,
};
pub use canonical::{canonical_text, expr_text};
pub use features::{extract_features, QueryFeatures};
pub use optimizer::optimize;
pub use predicate::extract_predicates;
pub use sql_frontend::lower_query;
