//! Metrics registry and Prometheus rendering helpers.

use std::sync::Arc;

use prometheus::{
    Encoder, Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry,
    TextEncoder,
};

/// Router-level metrics. Cloning shares the underlying registry.
#[derive(Clone, Debug)]
pub struct MetricsRegistry {
    inner: Arc<MetricsInner>,
}

#[derive(Debug)]
struct MetricsInner {
    registry: Registry,
    queries_total: IntCounterVec,
    query_seconds: HistogramVec,
    cache_hits: IntCounter,
    cache_misses: IntCounter,
    cache_stale: IntCounter,
    partitions_scanned: IntCounterVec,
    partitions_pruned: IntCounterVec,
    executor_retries: IntCounterVec,
    index_rebuild_seconds: Histogram,
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsRegistry {
    /// Create a registry with all router metric families registered.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MetricsInner::new()),
        }
    }

    /// Record a completed query on the given backend.
    pub fn record_query(&self, backend: &str, secs: f64) {
        self.inner
            .queries_total
            .with_label_values(&[backend])
            .inc();
        self.inner
            .query_seconds
            .with_label_values(&[backend])
            .observe(secs.max(0.0));
    }

    /// Record a cache hit.
    pub fn record_cache_hit(&self) {
        self.inner.cache_hits.inc();
    }

    /// Record a cache miss.
    pub fn record_cache_miss(&self) {
        self.inner.cache_misses.inc();
    }

    /// Record a witness-mtime stale invalidation.
    pub fn record_cache_stale(&self) {
        self.inner.cache_stale.inc();
    }

    /// Record per-table pruning counts for one scan plan.
    pub fn record_prune(&self, table: &str, scanned: u64, pruned: u64) {
        self.inner
            .partitions_scanned
            .with_label_values(&[table])
            .inc_by(scanned);
        self.inner
            .partitions_pruned
            .with_label_values(&[table])
            .inc_by(pruned);
    }

    /// Record one executor degradation retry, labeled by cause.
    pub fn record_executor_retry(&self, cause: &str) {
        self.inner
            .executor_retries
            .with_label_values(&[cause])
            .inc();
    }

    /// Record one partition-index rebuild walk.
    pub fn record_index_rebuild(&self, secs: f64) {
        self.inner.index_rebuild_seconds.observe(secs.max(0.0));
    }

    /// Render all families in the Prometheus text exposition format.
    pub fn render(&self) -> String {
        let metric_families = self.inner.registry.gather();
        let mut buf = Vec::new();
        let encoder = TextEncoder::new();
        if encoder.encode(&metric_families, &mut buf).is_err() {
            return String::new();
        }
        String::from_utf8(buf).unwrap_or_default()
    }
}

impl MetricsInner {
    fn new() -> Self {
        let registry = Registry::new();

        let queries_total = IntCounterVec::new(
            Opts::new("qrx_queries_total", "Completed queries by backend"),
            &["backend"],
        )
        .expect("metric opts");
        let query_seconds = HistogramVec::new(
            HistogramOpts::new("qrx_query_seconds", "End-to-end query latency"),
            &["backend"],
        )
        .expect("metric opts");
        let cache_hits =
            IntCounter::new("qrx_cache_hits_total", "Result cache hits").expect("metric opts");
        let cache_misses =
            IntCounter::new("qrx_cache_misses_total", "Result cache misses").expect("metric opts");
        let cache_stale = IntCounter::new(
            "qrx_cache_stale_invalidations_total",
            "Entries dropped because a witness file changed",
        )
        .expect("metric opts");
        let partitions_scanned = IntCounterVec::new(
            Opts::new(
                "qrx_partitions_scanned_total",
                "Partitions retained after pruning",
            ),
            &["table"],
        )
        .expect("metric opts");
        let partitions_pruned = IntCounterVec::new(
            Opts::new("qrx_partitions_pruned_total", "Partitions skipped"),
            &["table"],
        )
        .expect("metric opts");
        let executor_retries = IntCounterVec::new(
            Opts::new(
                "qrx_executor_retries_total",
                "Backend degradation retries by cause",
            ),
            &["cause"],
        )
        .expect("metric opts");
        let index_rebuild_seconds = Histogram::with_opts(HistogramOpts::new(
            "qrx_index_rebuild_seconds",
            "Partition index walk duration",
        ))
        .expect("metric opts");

        for c in [
            Box::new(queries_total.clone()) as Box<dyn prometheus::core::Collector>,
            Box::new(query_seconds.clone()),
            Box::new(cache_hits.clone()),
            Box::new(cache_misses.clone()),
            Box::new(cache_stale.clone()),
            Box::new(partitions_scanned.clone()),
            Box::new(partitions_pruned.clone()),
            Box::new(executor_retries.clone()),
            Box::new(index_rebuild_seconds.clone()),
        ] {
            registry.register(c).expect("register metric");
        }

        Self {
            registry,
            queries_total,
            query_seconds,
            cache_hits,
            cache_misses,
            cache_stale,
            partitions_scanned,
            partitions_pruned,
            executor_retries,
            index_rebuild_seconds,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::MetricsRegistry;

    #[test]
    fn renders_recorded_counters() {
        let m = MetricsRegistry::new();
        m.record_query("vectorized", 0.120);
        m.record_cache_hit();
        m.record_prune("sales", 7, 23);
        let text = m.render();
        assert!(text.contains("qrx_queries_total"), "{text}");
        assert!(text.contains("qrx_cache_hits_total 1"), "{text}");
        assert!(text.contains("qrx_partitions_pruned_total"), "{text}");
    }
}
