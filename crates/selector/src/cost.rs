//! Per-backend cost estimation.
//!
//! `estimated_ms = startup_ms + bytes/throughput × complexity_multiplier ×
//! selectivity_factor`. A backend is infeasible when the query's working set
//! (`bytes × working_set_factor(score)`) exceeds its memory limit.

use qrx_common::{BackendKind, SelectorConfig};
use qrx_frontend::QueryFeatures;

const GB: f64 = 1e9;

/// Tunable parameters for one backend.
#[derive(Debug, Clone, Copy)]
pub struct CostParams {
    pub startup_ms: f64,
    pub throughput_mb_per_s: f64,
    /// Complexity multiplier slope: `1 + weight × score`.
    pub complexity_weight: f64,
    /// Device memory; `None` means unbounded.
    pub memory_limit_bytes: Option<u64>,
}

/// One ranked backend candidate.
#[derive(Debug, Clone)]
pub struct BackendCandidate {
    pub kind: BackendKind,
    pub estimated_ms: f64,
    pub feasible: bool,
    pub reason: String,
}

/// Memory multiplier applied to scanned bytes to approximate the working
/// set; complex plans hold more intermediate state.
pub fn working_set_factor(score: u32) -> f64 {
    2.0 + f64::from(score) / 4.0
}

/// Cost model over the three backend kinds.
#[derive(Debug, Clone)]
pub struct CostModel {
    vectorized: CostParams,
    parallel: CostParams,
    distributed: CostParams,
}

impl CostModel {
    pub fn new(cfg: &SelectorConfig) -> Self {
        Self {
            vectorized: CostParams {
                startup_ms: 100.0,
                throughput_mb_per_s: 2_000.0,
                complexity_weight: 0.10,
                memory_limit_bytes: Some(cfg.vectorized_memory_limit_bytes),
            },
            parallel: CostParams {
                startup_ms: 200.0,
                throughput_mb_per_s: 1_800.0,
                complexity_weight: 0.08,
                memory_limit_bytes: Some(cfg.parallel_memory_limit_bytes),
            },
            distributed: CostParams {
                startup_ms: 15_000.0,
                throughput_mb_per_s: 1_500.0 * f64::from(cfg.distributed_nodes.max(1)),
                complexity_weight: 0.05,
                memory_limit_bytes: None,
            },
        }
    }

    /// Estimate every backend, in tie-break order.
    pub fn candidates(&self, bytes_scanned: u64, features: &QueryFeatures) -> Vec<BackendCandidate> {
        vec![
            self.estimate(BackendKind::Vectorized, &self.vectorized, bytes_scanned, features),
            self.estimate(BackendKind::Parallel, &self.parallel, bytes_scanned, features),
            self.estimate(
                BackendKind::Distributed,
                &self.distributed,
                bytes_scanned,
                features,
            ),
        ]
    }

    fn estimate(
        &self,
        kind: BackendKind,
        params: &CostParams,
        bytes_scanned: u64,
        features: &QueryFeatures,
    ) -> BackendCandidate {
        let score = features.complexity_score();
        let multiplier = 1.0 + params.complexity_weight * f64::from(score);
        let selectivity_factor = features.selectivity.max(0.1);
        let throughput_bytes_per_ms = params.throughput_mb_per_s * 1_000.0;
        let scan_ms =
            bytes_scanned as f64 / throughput_bytes_per_ms * multiplier * selectivity_factor;
        let estimated_ms = params.startup_ms + scan_ms;

        let working_set = bytes_scanned as f64 * working_set_factor(score);
        if let Some(limit) = params.memory_limit_bytes {
            if working_set > limit as f64 {
                return BackendCandidate {
                    kind,
                    estimated_ms: f64::INFINITY,
                    feasible: false,
                    reason: format!(
                        "working set ~{:.1} GB (complexity {score}) exceeds memory limit {:.1} GB",
                        working_set / GB,
                        limit as f64 / GB
                    ),
                };
            }
        }

        let reason = match kind {
            BackendKind::Distributed => format!(
                "startup {:.0} ms amortized over {:.1} GB at {:.0} MB/s across the cluster",
                params.startup_ms,
                bytes_scanned as f64 / GB,
                params.throughput_mb_per_s
            ),
            _ => format!(
                "scan {:.2} GB at {:.0} MB/s in ~{scan_ms:.0} ms (complexity x{multiplier:.2}) after {:.0} ms startup",
                bytes_scanned as f64 / GB,
                params.throughput_mb_per_s,
                params.startup_ms
            ),
        };
        BackendCandidate {
            kind,
            estimated_ms,
            feasible: true,
            reason,
        }
    }
}
