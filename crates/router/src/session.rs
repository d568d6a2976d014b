//! Shared engine state. The engine holds components; components never hold
//! the engine.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, RwLock};

use arrow::record_batch::RecordBatch;
use arrow_schema::SchemaRef;
use qrx_cache::QueryCache;
use qrx_common::{
    BackendKind, MetricsRegistry, QueryId, Result, RouterConfig,
};
use qrx_frontend::SchemaProvider;
use qrx_selector::BackendSelector;
use qrx_store::{Catalog, PartitionIndexCache};

use crate::engine::ScanSummary;
use crate::executor::ExecutorRegistry;

/// Payload stored in the result cache.
#[derive(Debug, Clone)]
pub struct CachedResult {
    pub batches: Vec<RecordBatch>,
    pub schema: SchemaRef,
    pub rows_processed: u64,
    pub backend_used: BackendKind,
    pub execution_time_ms: f64,
    pub scan: ScanSummary,
}

/// One engine instance's state, shareable across threads behind an `Arc`.
#[derive(Debug)]
pub struct Session {
    pub config: RouterConfig,
    pub catalog: RwLock<Catalog>,
    pub partitions: PartitionIndexCache,
    pub cache: Mutex<QueryCache<CachedResult>>,
    pub selector: BackendSelector,
    pub executors: RwLock<ExecutorRegistry>,
    pub metrics: MetricsRegistry,
    query_seq: AtomicU64,
}

impl Session {
    pub fn new(config: RouterConfig) -> Result<Self> {
        let catalog = match &config.catalog_path {
            Some(path) => Catalog::load(path)?,
            None => Catalog::new(),
        };
        Ok(Self {
            catalog: RwLock::new(catalog),
            partitions: PartitionIndexCache::new(config.partition_scan.parallelism),
            cache: Mutex::new(QueryCache::new(config.cache.max_entries, config.cache.ttl_ms)),
            selector: BackendSelector::new(&config.selector),
            executors: RwLock::new(ExecutorRegistry::new()),
            metrics: MetricsRegistry::new(),
            query_seq: AtomicU64::new(0),
            config,
        })
    }

    pub fn next_query_id(&self) -> QueryId {
        QueryId(self.query_seq.fetch_add(1, Ordering::Relaxed))
    }
}

/// Adapter exposing the catalog to the frontend analyzer.
pub struct CatalogSchemas<'a>(pub &'a Catalog);

impl SchemaProvider for CatalogSchemas<'_> {
    fn table_schema(&self, table: &str) -> Result<Option<SchemaRef>> {
        Ok(self.0.get(table)?.schema_ref())
    }
}
