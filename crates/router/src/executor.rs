//! Executor contract: the seam between the router and the concrete
//! execution engines, which live outside this repository.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use arrow::record_batch::RecordBatch;
use arrow_schema::SchemaRef;
use qrx_common::{BackendKind, CancellationToken, ExecutorError};
use qrx_frontend::AnalyzedQuery;
use qrx_store::ScanPlan;

/// Caller-supplied bounds enforced at the executor boundary.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExecutionLimits {
    /// Absolute deadline; expiry surfaces as `ExecutorError` with kind
    /// `Timeout`.
    pub deadline: Option<Instant>,
    /// Memory budget of the selected backend, when bounded.
    pub memory_limit_bytes: Option<u64>,
}

/// Everything an executor receives for one dispatch.
#[derive(Debug)]
pub struct ExecutionRequest<'a> {
    /// Analyzed query, including the optimized AST.
    pub query: &'a AnalyzedQuery,
    /// Files to scan, per table, as decided by the pruner.
    pub scan: &'a ScanPlan,
    /// Declared schemas by table name, where registered.
    pub schemas: &'a HashMap<String, SchemaRef>,
    /// Deadline and memory bounds.
    pub limits: ExecutionLimits,
    /// Cancellation token; executors should observe it at batch boundaries.
    pub cancel: &'a CancellationToken,
}

/// Timing breakdown reported back by an executor.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExecutorTimings {
    pub scan_ms: f64,
    pub compute_ms: f64,
}

/// Successful dispatch result.
#[derive(Debug)]
pub struct ExecutorOutput {
    pub batches: Vec<RecordBatch>,
    pub rows_processed: u64,
    pub timings: ExecutorTimings,
}

/// One execution engine. Implementations manage their own resources and are
/// not shared between backends.
pub trait Executor: Send + Sync {
    /// The backend this executor serves.
    fn kind(&self) -> BackendKind;

    /// Run the query over the given files. Blocking; the router holds no
    /// locks across this call.
    fn execute(&self, request: &ExecutionRequest<'_>)
        -> std::result::Result<ExecutorOutput, ExecutorError>;
}

/// Executors registered with the engine, one per backend kind.
#[derive(Default)]
pub struct ExecutorRegistry {
    by_kind: HashMap<BackendKind, Arc<dyn Executor>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the executor for its backend kind.
    pub fn register(&mut self, executor: Arc<dyn Executor>) {
        self.by_kind.insert(executor.kind(), executor);
    }

    pub fn get(&self, kind: BackendKind) -> Option<Arc<dyn Executor>> {
        self.by_kind.get(&kind).cloned()
    }

    /// Registered kinds, in selection order.
    pub fn kinds(&self) -> Vec<BackendKind> {
        BackendKind::ALL
            .into_iter()
            .filter(|k| self.by_kind.contains_key(k))
            .collect()
    }
}

impl std::fmt::Debug for ExecutorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutorRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}
