//! The orchestrating engine for the cost-based query router.
//!
//! Architecture role:
//! - public [`Router`] API: `execute`, `explain`, cache control
//! - sequences frontend analysis, partition pruning, cache lookup, backend
//!   selection, and executor dispatch
//! - defines the [`executor::Executor`] contract concrete engines implement
//!
//! Key modules:
//! - [`engine`]
//! - [`session`]
//! - [`executor`]
//! - [`explain`]
//! - [`repl`]

pub mod engine;
pub mod executor;
pub mod explain;
pub mod repl;
pub mod session;

pub use engine::{Explanation, QueryOptions, QueryResult, Router, ScanSummary};
pub use executor::{
    ExecutionLimits, ExecutionRequest, Executor, ExecutorOutput, ExecutorRegistry,
    ExecutorTimings,
};
pub use explain::render_explanation;
pub use session::{CachedResult, Session};
