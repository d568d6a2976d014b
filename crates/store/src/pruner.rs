//! Partition pruning: evaluate per-table predicates against partition key
//! values and assemble the [`ScanPlan`] the selector and cache key on.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

use qrx_common::{Literal, Predicate};

use crate::partition::{FileMeta, Partition, PartitionIndex};

/// Retained partitions and flattened file list for one table.
#[derive(Debug, Clone)]
pub struct TableScanPlan {
    pub table: String,
    pub partitions: Vec<Partition>,
    pub files: Vec<FileMeta>,
    pub bytes: u64,
    pub partitions_total: usize,
}

/// Result of pruning one table.
#[derive(Debug, Clone)]
pub struct PruneOutcome {
    pub plan: TableScanPlan,
    pub warnings: Vec<String>,
}

/// Scan plan across every referenced table.
#[derive(Debug, Clone, Default)]
pub struct ScanPlan {
    pub tables: BTreeMap<String, TableScanPlan>,
    pub total_bytes: u64,
    pub partitions_total: usize,
    pub partitions_scanned: usize,
    pub warnings: Vec<String>,
}

impl ScanPlan {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one table's pruning outcome into the plan.
    pub fn insert(&mut self, outcome: PruneOutcome) {
        self.total_bytes += outcome.plan.bytes;
        self.partitions_total += outcome.plan.partitions_total;
        self.partitions_scanned += outcome.plan.partitions.len();
        self.warnings.extend(outcome.warnings);
        self.tables.insert(outcome.plan.table.clone(), outcome.plan);
    }

    /// `1 - scanned/total`, or 0 for an empty layout.
    pub fn fraction_pruned(&self) -> f64 {
        if self.partitions_total == 0 {
            0.0
        } else {
            1.0 - self.partitions_scanned as f64 / self.partitions_total as f64
        }
    }

    /// Sorted file paths certifying a cached result built from this plan.
    pub fn witness_paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self
            .tables
            .values()
            .flat_map(|t| t.files.iter())
            .map(|f| f.path.to_string_lossy().into_owned())
            .collect();
        paths.sort();
        paths
    }

    /// Max mtime over every retained file.
    pub fn max_mtime_ns(&self) -> i64 {
        self.tables
            .values()
            .flat_map(|t| t.files.iter())
            .map(|f| f.mtime_ns)
            .max()
            .unwrap_or(0)
    }
}

/// Evaluate predicates against each partition of an index.
///
/// A partition is retained iff every predicate naming a partition key is
/// satisfiable against the key's value; predicates on non-key columns and
/// [`Predicate::Other`] are ignored here. Failed typed parses retain the
/// partition and record a `type_coercion_warning`.
pub fn prune(index: &PartitionIndex, predicates: &[Predicate]) -> PruneOutcome {
    let mut warnings = BTreeSet::new();
    let mut retained = Vec::new();
    for part in &index.partitions {
        if retain_partition(index, part, predicates, &mut warnings) {
            retained.push(part.clone());
        }
    }

    let files: Vec<FileMeta> = retained.iter().flat_map(|p| p.files.clone()).collect();
    let bytes = retained.iter().map(|p| p.size_bytes).sum();
    PruneOutcome {
        plan: TableScanPlan {
            table: index.table.clone(),
            partitions: retained,
            files,
            bytes,
            partitions_total: index.partitions.len(),
        },
        warnings: warnings.into_iter().collect(),
    }
}

fn retain_partition(
    index: &PartitionIndex,
    part: &Partition,
    predicates: &[Predicate],
    warnings: &mut BTreeSet<String>,
) -> bool {
    for pred in predicates {
        let Some(column) = pred.column() else {
            continue;
        };
        if !index.is_partition_key(column) {
            continue;
        }
        let Some(value) = part.key_value(column) else {
            continue;
        };
        let satisfiable = match pred {
            Predicate::Eq { value: want, .. } => {
                match typed(index, column, value, want, warnings) {
                    Some(have) => have.compare(want) == Some(Ordering::Equal),
                    None => true,
                }
            }
            Predicate::Neq { value: want, .. } => {
                match typed(index, column, value, want, warnings) {
                    Some(have) => have.compare(want) != Some(Ordering::Equal),
                    None => true,
                }
            }
            Predicate::Range {
                lo,
                hi,
                lo_inclusive,
                hi_inclusive,
                ..
            } => {
                let mut ok = true;
                if let Some(lo) = lo {
                    if let Some(have) = typed(index, column, value, lo, warnings) {
                        ok &= match have.compare(lo) {
                            Some(Ordering::Greater) => true,
                            Some(Ordering::Equal) => *lo_inclusive,
                            Some(Ordering::Less) => false,
                            None => true,
                        };
                    }
                }
                if ok {
                    if let Some(hi) = hi {
                        if let Some(have) = typed(index, column, value, hi, warnings) {
                            ok &= match have.compare(hi) {
                                Some(Ordering::Less) => true,
                                Some(Ordering::Equal) => *hi_inclusive,
                                Some(Ordering::Greater) => false,
                                None => true,
                            };
                        }
                    }
                }
                ok
            }
            Predicate::In { values, .. } => {
                let mut any_parse_failed = false;
                let mut any_match = false;
                for want in values {
                    match Literal::parse_as(want.logical_type(), value) {
                        Some(have) => {
                            any_match |= have.compare(want) == Some(Ordering::Equal);
                        }
                        None => any_parse_failed = true,
                    }
                }
                if any_parse_failed && !any_match {
                    warnings.insert(coercion_warning(index, column, value));
                }
                any_match || any_parse_failed
            }
            // Partition keys are never null.
            Predicate::IsNull { .. } => false,
            Predicate::IsNotNull { .. } => true,
            Predicate::Other { .. } => true,
        };
        if !satisfiable {
            return false;
        }
    }
    true
}

/// Parse a partition string value into the tag implied by the predicate
/// literal; `None` records a coercion warning and retains conservatively.
fn typed(
    index: &PartitionIndex,
    column: &str,
    value: &str,
    want: &Literal,
    warnings: &mut BTreeSet<String>,
) -> Option<Literal> {
    let parsed = Literal::parse_as(want.logical_type(), value);
    if parsed.is_none() {
        warnings.insert(coercion_warning(index, column, value));
    }
    parsed
}

fn coercion_warning(index: &PartitionIndex, column: &str, value: &str) -> String {
    format!(
        "type_coercion_warning: {}.{column}='{value}' did not parse; partition retained",
        index.table
    )
}
