//! The orchestrating engine: analyze, prune, consult the cache, select a
//! backend, dispatch, and write the result back.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use arrow::record_batch::RecordBatch;
use arrow_schema::{Schema, SchemaRef};
use qrx_cache::{cache_key, CacheLookup, CacheStats};
use qrx_common::{
    BackendKind, CancellationToken, ExecutorError, ExecutorErrorKind, Result, RouterConfig,
};
use qrx_frontend::{AnalyzedQuery, Analyzer, QueryFeatures};
use qrx_selector::{BackendCandidate, Selection};
use qrx_store::{prune, ScanPlan, TableDef};
use tracing::{info, warn};

use crate::executor::{ExecutionLimits, ExecutionRequest, Executor};
use crate::explain::render_explanation;
use crate::session::{CachedResult, CatalogSchemas, Session};

/// Per-call options.
#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    /// Cancellation token observed at every pipeline boundary.
    pub cancel: CancellationToken,
    /// Absolute deadline enforced at the executor boundary.
    pub deadline: Option<Instant>,
    /// Bypass cost-based selection (testing and benchmarks).
    pub force_backend: Option<BackendKind>,
}

/// Pruning outcome attached to results and explain output.
#[derive(Debug, Clone)]
pub struct ScanSummary {
    pub partitions_total: usize,
    pub partitions_scanned: usize,
    pub fraction_pruned: f64,
    pub bytes_scanned: u64,
    pub warnings: Vec<String>,
}

impl From<&ScanPlan> for ScanSummary {
    fn from(plan: &ScanPlan) -> Self {
        Self {
            partitions_total: plan.partitions_total,
            partitions_scanned: plan.partitions_scanned,
            fraction_pruned: plan.fraction_pruned(),
            bytes_scanned: plan.total_bytes,
            warnings: plan.warnings.clone(),
        }
    }
}

/// Result of one `execute` call.
#[derive(Debug, Clone)]
pub struct QueryResult {
    pub batches: Vec<RecordBatch>,
    pub schema: SchemaRef,
    pub backend_used: BackendKind,
    pub execution_time_ms: f64,
    pub rows_processed: u64,
    pub scan: ScanSummary,
    pub from_cache: bool,
}

/// Result of one `explain` call: the full analysis and ranking, with no
/// dispatch and no cache interaction.
#[derive(Debug, Clone)]
pub struct Explanation {
    pub tables: Vec<String>,
    pub canonical_text: String,
    pub features: QueryFeatures,
    pub scan: ScanSummary,
    pub candidates: Vec<BackendCandidate>,
    pub backend: BackendKind,
    pub reason: String,
}

impl std::fmt::Display for Explanation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", render_explanation(self))
    }
}

/// The public engine handle. Cloning shares the session.
#[derive(Debug, Clone)]
pub struct Router {
    session: Arc<Session>,
}

impl Router {
    pub fn new(config: RouterConfig) -> Result<Self> {
        Ok(Self {
            session: Arc::new(Session::new(config)?),
        })
    }

    /// Register a table under a given name.
    /// The name overrides `table.name` to avoid ambiguity.
    pub fn register_table(&self, name: impl Into<String>, mut table: TableDef) {
        table.name = name.into();
        self.session
            .catalog
            .write()
            .expect("catalog lock poisoned")
            .register_table(table);
    }

    /// Register an executor for its backend kind.
    pub fn register_executor(&self, executor: Arc<dyn Executor>) {
        self.session
            .executors
            .write()
            .expect("executor registry lock poisoned")
            .register(executor);
    }

    pub fn list_tables(&self) -> Vec<String> {
        self.session
            .catalog
            .read()
            .expect("catalog lock poisoned")
            .tables()
            .into_iter()
            .map(|t| t.name)
            .collect()
    }

    /// Execute with default options.
    pub fn execute(&self, sql: &str) -> Result<QueryResult> {
        self.execute_with(sql, QueryOptions::default())
    }

    /// Full pipeline: analyze, prune, cache lookup, select, dispatch, cache
    /// store.
    pub fn execute_with(&self, sql: &str, opts: QueryOptions) -> Result<QueryResult> {
        let started = Instant::now();
        let query_id = self.session.next_query_id();

        opts.cancel.check()?;
        let analyzed = self.analyze(sql)?;
        info!(
            query_id = %query_id,
            tables = ?analyzed.tables.iter().map(|t| t.table.as_str()).collect::<Vec<_>>(),
            complexity = analyzed.features.complexity_score(),
            "query analyzed"
        );

        opts.cancel.check()?;
        let scan = self.build_scan_plan(&analyzed)?;

        opts.cancel.check()?;
        let witness = scan.witness_paths();
        let witness_mtime = scan.max_mtime_ns();
        let key = cache_key(&analyzed.canonical_text, &witness);
        let lookup = {
            let mut cache = self.session.cache.lock().expect("cache lock poisoned");
            cache.get(&key, witness_mtime)
        };
        match lookup {
            CacheLookup::Hit(cached) => {
                self.session.metrics.record_cache_hit();
                info!(query_id = %query_id, "served from cache");
                return Ok(QueryResult {
                    batches: cached.batches,
                    schema: cached.schema,
                    backend_used: cached.backend_used,
                    execution_time_ms: cached.execution_time_ms,
                    rows_processed: cached.rows_processed,
                    scan: cached.scan,
                    from_cache: true,
                });
            }
            CacheLookup::Miss => self.session.metrics.record_cache_miss(),
            CacheLookup::Stale => {
                self.session.metrics.record_cache_stale();
                info!(query_id = %query_id, "cache entry stale; re-executing");
            }
        }

        opts.cancel.check()?;
        let bytes = scan.total_bytes;
        let mut selection = match opts.force_backend {
            Some(kind) => self.forced_selection(kind, bytes, &analyzed.features),
            None => self.session.selector.select(bytes, &analyzed.features)?,
        };
        info!(
            query_id = %query_id,
            backend = %selection.backend,
            estimated_ms = selection.estimated_ms,
            bytes_scanned = bytes,
            "backend selected"
        );

        let schemas = self.table_schemas(&analyzed)?;
        let mut excluded: Vec<BackendKind> = Vec::new();
        let mut degraded_once = false;
        let (output, dispatch_elapsed) = loop {
            opts.cancel.check()?;
            if opts.deadline.is_some_and(|d| Instant::now() >= d) {
                return Err(ExecutorError::timeout("deadline elapsed before dispatch").into());
            }

            let executor = {
                let registry = self
                    .session
                    .executors
                    .read()
                    .expect("executor registry lock poisoned");
                registry.get(selection.backend)
            }
            .ok_or_else(|| {
                ExecutorError::permanent(format!(
                    "no executor registered for backend '{}'",
                    selection.backend
                ))
            })?;

            let request = ExecutionRequest {
                query: &analyzed,
                scan: &scan,
                schemas: &schemas,
                limits: ExecutionLimits {
                    deadline: opts.deadline,
                    memory_limit_bytes: self.memory_limit(selection.backend),
                },
                cancel: &opts.cancel,
            };
            let dispatch_started = Instant::now();
            match executor.execute(&request) {
                Ok(output) => break (output, dispatch_started.elapsed()),
                Err(e) if e.kind == ExecutorErrorKind::TransientResource && !degraded_once => {
                    degraded_once = true;
                    excluded.push(selection.backend);
                    warn!(
                        query_id = %query_id,
                        backend = %selection.backend,
                        error = %e,
                        "transient executor failure; degrading to next backend"
                    );
                    self.session.metrics.record_executor_retry("transient");
                    selection =
                        self.session
                            .selector
                            .select_excluding(bytes, &analyzed.features, &excluded)?;
                }
                Err(e) if e.kind == ExecutorErrorKind::OutOfMemory => {
                    excluded.push(selection.backend);
                    warn!(
                        query_id = %query_id,
                        backend = %selection.backend,
                        error = %e,
                        "backend out of memory; marked infeasible for this call"
                    );
                    self.session.metrics.record_executor_retry("oom");
                    selection =
                        self.session
                            .selector
                            .select_excluding(bytes, &analyzed.features, &excluded)?;
                }
                Err(e) => return Err(e.into()),
            }
        };

        // A cancelled call must leave the cache untouched.
        opts.cancel.check()?;

        let execution_time_ms = dispatch_elapsed.as_secs_f64() * 1000.0;
        let schema = output
            .batches
            .first()
            .map(RecordBatch::schema)
            .unwrap_or_else(|| Arc::new(Schema::empty()));
        let summary = ScanSummary::from(&scan);
        let byte_size_hint: usize = output
            .batches
            .iter()
            .map(RecordBatch::get_array_memory_size)
            .sum();
        let cached = CachedResult {
            batches: output.batches.clone(),
            schema: schema.clone(),
            rows_processed: output.rows_processed,
            backend_used: selection.backend,
            execution_time_ms,
            scan: summary.clone(),
        };
        {
            let mut cache = self.session.cache.lock().expect("cache lock poisoned");
            cache.put(&key, cached, witness, witness_mtime, byte_size_hint);
        }
        self.session
            .metrics
            .record_query(selection.backend.name(), started.elapsed().as_secs_f64());
        info!(
            query_id = %query_id,
            backend = %selection.backend,
            rows = output.rows_processed,
            execution_time_ms,
            "query completed"
        );

        Ok(QueryResult {
            batches: output.batches,
            schema,
            backend_used: selection.backend,
            execution_time_ms,
            rows_processed: output.rows_processed,
            scan: summary,
            from_cache: false,
        })
    }

    /// Same analysis and ranking as `execute`, with no dispatch, no cache
    /// interaction, and no filesystem writes.
    pub fn explain(&self, sql: &str) -> Result<Explanation> {
        let analyzed = self.analyze(sql)?;
        let scan = self.build_scan_plan(&analyzed)?;
        let selection = self
            .session
            .selector
            .select(scan.total_bytes, &analyzed.features)?;
        Ok(Explanation {
            tables: analyzed.tables.iter().map(|t| t.table.clone()).collect(),
            canonical_text: analyzed.canonical_text,
            features: analyzed.features,
            scan: ScanSummary::from(&scan),
            candidates: selection.candidates,
            backend: selection.backend,
            reason: selection.reason,
        })
    }

    /// Result cache counters.
    pub fn cache_stats(&self) -> CacheStats {
        self.session
            .cache
            .lock()
            .expect("cache lock poisoned")
            .stats()
    }

    /// Drop every cached result and reset cache counters.
    pub fn cache_clear(&self) {
        self.session
            .cache
            .lock()
            .expect("cache lock poisoned")
            .clear();
    }

    /// Drop cached state for one table: its partition index and every cache
    /// entry witnessing files under its root.
    pub fn invalidate_table(&self, name: &str) -> Result<usize> {
        self.session.partitions.invalidate(name);
        let root = {
            let catalog = self.session.catalog.read().expect("catalog lock poisoned");
            catalog.get(name)?.root.clone()
        };
        let removed = self
            .session
            .cache
            .lock()
            .expect("cache lock poisoned")
            .invalidate(|path| path.starts_with(&root));
        Ok(removed)
    }

    /// Prometheus text exposition of the engine's metrics.
    pub fn prometheus_metrics(&self) -> String {
        self.session.metrics.render()
    }

    fn analyze(&self, sql: &str) -> Result<AnalyzedQuery> {
        let catalog = self.session.catalog.read().expect("catalog lock poisoned");
        Analyzer::new(self.session.config.default_dialect)
            .analyze(sql, &CatalogSchemas(&catalog))
    }

    fn build_scan_plan(&self, analyzed: &AnalyzedQuery) -> Result<ScanPlan> {
        let roots: Vec<(String, PathBuf)> = {
            let catalog = self.session.catalog.read().expect("catalog lock poisoned");
            let mut seen = HashSet::new();
            let mut roots = Vec::new();
            for binding in &analyzed.tables {
                if seen.insert(binding.table.clone()) {
                    roots.push((binding.table.clone(), catalog.get(&binding.table)?.root_path()));
                }
            }
            roots
        };

        let mut plan = ScanPlan::new();
        for (table, root) in roots {
            let walk_started = Instant::now();
            let index = self.session.partitions.ensure(&table, &root)?;
            self.session
                .metrics
                .record_index_rebuild(walk_started.elapsed().as_secs_f64());

            let predicates = analyzed
                .predicates
                .get(&table)
                .map(Vec::as_slice)
                .unwrap_or(&[]);
            let outcome = prune(&index, predicates);
            self.session.metrics.record_prune(
                &table,
                outcome.plan.partitions.len() as u64,
                (outcome.plan.partitions_total - outcome.plan.partitions.len()) as u64,
            );
            plan.insert(outcome);
        }
        Ok(plan)
    }

    fn table_schemas(&self, analyzed: &AnalyzedQuery) -> Result<HashMap<String, SchemaRef>> {
        let catalog = self.session.catalog.read().expect("catalog lock poisoned");
        let mut out = HashMap::new();
        for binding in &analyzed.tables {
            if let Some(schema) = catalog.get(&binding.table)?.schema_ref() {
                out.insert(binding.table.clone(), schema);
            }
        }
        Ok(out)
    }

    fn forced_selection(
        &self,
        kind: BackendKind,
        bytes: u64,
        features: &QueryFeatures,
    ) -> Selection {
        let candidates = self.session.selector.candidates(bytes, features);
        let estimated_ms = candidates
            .iter()
            .find(|c| c.kind == kind)
            .map_or(f64::NAN, |c| c.estimated_ms);
        Selection {
            backend: kind,
            estimated_ms,
            reason: format!("forced to {kind}"),
            candidates,
        }
    }

    fn memory_limit(&self, kind: BackendKind) -> Option<u64> {
        match kind {
            BackendKind::Vectorized => {
                Some(self.session.config.selector.vectorized_memory_limit_bytes)
            }
            BackendKind::Parallel => Some(self.session.config.selector.parallel_memory_limit_bytes),
            BackendKind::Distributed => None,
        }
    }
}
