//! Catalog, partition index, and pruner for the query router.
//!
//! Architecture role:
//! - maps logical table names to partition-tree roots ([`catalog`])
//! - discovers and caches per-table partition layouts ([`partition`])
//! - computes the [`pruner::ScanPlan`] feeding the cost model and cache key
//!
//! The store never opens data files; it reads only paths, sizes, and
//! modification timestamps.

pub mod catalog;
pub mod partition;
pub mod pruner;

pub use catalog::{Catalog, TableDef};
pub use partition::{build_index, FileMeta, Partition, PartitionIndex, PartitionIndexCache};
pub use pruner::{prune, PruneOutcome, ScanPlan, TableScanPlan};
