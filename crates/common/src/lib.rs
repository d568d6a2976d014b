#![deny(missing_docs)]

//! Shared configuration, error types, value model, and observability
//! primitives for QRX crates.
//!
//! Architecture role:
//! - defines router configuration passed across layers
//! - provides common [`QrxError`] / [`Result`] contracts
//! - hosts the literal/predicate model shared by frontend and pruner
//! - hosts cancellation and metrics utilities
//!
//! Key modules:
//! - [`config`]
//! - [`error`]
//! - [`types`]
//! - [`cancel`]
//! - [`ids`]
//! - [`metrics`]

/// Cancellation token primitives.
pub mod cancel;
/// Shared router configuration types.
pub mod config;
/// Shared error taxonomy.
pub mod error;
/// Strongly-typed identifier wrappers.
pub mod ids;
/// Metrics registry and Prometheus rendering helpers.
pub mod metrics;
/// Shared literal, predicate, and backend types.
pub mod types;

pub use cancel::CancellationToken;
pub use config::{CacheConfig, PartitionScanConfig, RouterConfig, SelectorConfig, SqlDialect};
pub use error::{ExecutorError, ExecutorErrorKind, QrxError, Result};
pub use ids::QueryId;
pub use metrics::MetricsRegistry;
pub use types::{format_date, parse_date, BackendKind, Literal, LogicalType, Predicate};
