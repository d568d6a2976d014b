//! Cost-based backend selection.
//!
//! The selector ranks the feasible [`cost::BackendCandidate`]s by estimated
//! time and returns the cheapest; ties break in declared order (vectorized,
//! parallel, distributed). Every decision carries a human-readable reason
//! naming the deciding factor.

pub mod cost;

use qrx_common::{BackendKind, QrxError, Result, SelectorConfig};
use qrx_frontend::QueryFeatures;

pub use cost::{working_set_factor, BackendCandidate, CostModel, CostParams};

/// One selection decision plus the full candidate ranking for explain output.
#[derive(Debug, Clone)]
pub struct Selection {
    pub backend: BackendKind,
    pub estimated_ms: f64,
    pub reason: String,
    pub candidates: Vec<BackendCandidate>,
}

/// Minimum-cost feasible backend selection over a [`CostModel`].
#[derive(Debug, Clone)]
pub struct BackendSelector {
    model: CostModel,
}

impl BackendSelector {
    pub fn new(cfg: &SelectorConfig) -> Self {
        Self {
            model: CostModel::new(cfg),
        }
    }

    /// Estimate every backend without choosing.
    pub fn candidates(&self, bytes_scanned: u64, features: &QueryFeatures) -> Vec<BackendCandidate> {
        self.model.candidates(bytes_scanned, features)
    }

    /// Pick the minimum-cost feasible backend.
    pub fn select(&self, bytes_scanned: u64, features: &QueryFeatures) -> Result<Selection> {
        self.select_excluding(bytes_scanned, features, &[])
    }

    /// Pick the minimum-cost feasible backend, skipping `excluded` kinds
    /// (used after an executor failure marks a backend unusable for the
    /// current call).
    pub fn select_excluding(
        &self,
        bytes_scanned: u64,
        features: &QueryFeatures,
        excluded: &[BackendKind],
    ) -> Result<Selection> {
        let candidates = self.model.candidates(bytes_scanned, features);

        let mut best: Option<&BackendCandidate> = None;
        for c in &candidates {
            if !c.feasible || excluded.contains(&c.kind) {
                continue;
            }
            // Strict comparison keeps the earlier kind on ties.
            if best.is_none_or(|b| c.estimated_ms < b.estimated_ms) {
                best = Some(c);
            }
        }

        let Some(best) = best else {
            let detail = candidates
                .iter()
                .map(|c| {
                    if excluded.contains(&c.kind) {
                        format!("{}: excluded after executor failure", c.kind)
                    } else {
                        format!("{}: {}", c.kind, c.reason)
                    }
                })
                .collect::<Vec<_>>()
                .join("; ");
            return Err(QrxError::NoFeasibleBackend(detail));
        };

        let reason = build_reason(best, &candidates, excluded);
        tracing::debug!(
            backend = %best.kind,
            estimated_ms = best.estimated_ms,
            bytes_scanned,
            "backend selected"
        );
        Ok(Selection {
            backend: best.kind,
            estimated_ms: best.estimated_ms,
            reason,
            candidates,
        })
    }
}

fn build_reason(
    selected: &BackendCandidate,
    all: &[BackendCandidate],
    excluded: &[BackendKind],
) -> String {
    let mut parts = vec![format!("{}: {}", selected.kind, selected.reason)];
    for c in all {
        if c.kind == selected.kind {
            continue;
        }
        if excluded.contains(&c.kind) {
            parts.push(format!("{} excluded after executor failure", c.kind));
        } else if !c.feasible {
            parts.push(format!("{} infeasible ({})", c.kind, c.reason));
        } else if selected.estimated_ms > 0.0 {
            parts.push(format!(
                "{:.1}x faster than {}",
                c.estimated_ms / selected.estimated_ms,
                c.kind
            ));
        }
    }
    parts.join("; ")
}
