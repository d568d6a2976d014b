//! End-to-end scenarios over a temp-dir partition tree and stub executors.

mod support;

use std::fs;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use qrx_common::{
    BackendKind, CancellationToken, ExecutorError, ExecutorErrorKind, QrxError, RouterConfig,
};
use qrx_router::{QueryOptions, Router};
use qrx_store::TableDef;

use support::{november_days, write_day_partitions, StubExecutor};

const WEEK_QUERY: &str = "SELECT region, SUM(amount) FROM sales \
     WHERE date >= '2024-11-01' AND date <= '2024-11-07' GROUP BY region";

struct Fixture {
    router: Router,
    vectorized: Arc<StubExecutor>,
    parallel: Arc<StubExecutor>,
    distributed: Arc<StubExecutor>,
    dir: tempfile::TempDir,
}

fn fixture_with(
    vectorized: Arc<StubExecutor>,
    parallel: Arc<StubExecutor>,
    distributed: Arc<StubExecutor>,
) -> Fixture {
    let dir = tempfile::tempdir().expect("tempdir");
    write_day_partitions(dir.path(), &november_days(), 1024 * 1024);

    let router = Router::new(RouterConfig::default()).expect("router");
    router.register_table(
        "sales",
        TableDef::new("sales", dir.path().to_string_lossy().into_owned()),
    );
    router.register_executor(vectorized.clone());
    router.register_executor(parallel.clone());
    router.register_executor(distributed.clone());
    Fixture {
        router,
        vectorized,
        parallel,
        distributed,
        dir,
    }
}

fn fixture() -> Fixture {
    fixture_with(
        StubExecutor::new(BackendKind::Vectorized),
        StubExecutor::new(BackendKind::Parallel),
        StubExecutor::new(BackendKind::Distributed),
    )
}

#[test]
fn s1_week_query_prunes_to_seven_partitions() {
    let fx = fixture();
    let result = fx.router.execute(WEEK_QUERY).expect("execute");

    assert_eq!(result.scan.partitions_scanned, 7);
    assert_eq!(result.scan.partitions_total, 30);
    assert!((result.scan.fraction_pruned - 23.0 / 30.0).abs() < 1e-4);
    assert_eq!(result.scan.bytes_scanned, 7 * 1024 * 1024);
    assert_eq!(result.backend_used, BackendKind::Vectorized);
    assert!(!result.from_cache);
    assert_eq!(fx.vectorized.call_count(), 1);
}

#[test]
fn s2_second_run_is_served_from_cache() {
    let fx = fixture();
    let first = fx.router.execute(WEEK_QUERY).expect("first run");
    let second = fx.router.execute(WEEK_QUERY).expect("second run");

    assert!(!first.from_cache);
    assert!(second.from_cache);
    assert_eq!(first.batches, second.batches);
    assert_eq!(fx.vectorized.call_count(), 1, "no second dispatch");

    let stats = fx.router.cache_stats();
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.misses, 1);
    assert!((stats.hit_rate - 0.5).abs() < 1e-12);
}

#[test]
fn s3_reordered_conjuncts_share_the_cache_entry() {
    let fx = fixture();
    fx.router.execute(WEEK_QUERY).expect("seed the cache");

    let reordered = "SELECT region, SUM(amount) FROM sales \
         WHERE date <= '2024-11-07' AND date >= '2024-11-01' GROUP BY region";
    let result = fx.router.execute(reordered).expect("reordered run");
    assert!(result.from_cache, "canonical-equivalent query must hit");
    assert_eq!(fx.vectorized.call_count(), 1);
    assert_eq!(fx.router.cache_stats().hits, 1);
}

#[test]
fn s4_touching_a_witness_file_invalidates_the_entry() {
    let fx = fixture();
    fx.router.execute(WEEK_QUERY).expect("seed the cache");

    let file = fx.dir.path().join("date=2024-11-03/part.bin");
    let handle = fs::File::options().write(true).open(&file).expect("open");
    handle
        .set_times(fs::FileTimes::new().set_modified(SystemTime::now() + Duration::from_secs(5)))
        .expect("advance mtime");

    let rerun = fx.router.execute(WEEK_QUERY).expect("rerun");
    assert!(!rerun.from_cache);
    assert_eq!(fx.vectorized.call_count(), 2, "re-execution required");
    assert_eq!(fx.router.cache_stats().stale_invalidations, 1);
}

#[test]
fn s6_explain_is_pure() {
    let fx = fixture();
    let explanation = fx.router.explain(WEEK_QUERY).expect("explain");

    assert_eq!(fx.vectorized.call_count(), 0);
    assert_eq!(fx.parallel.call_count(), 0);
    assert_eq!(fx.distributed.call_count(), 0);
    let stats = fx.router.cache_stats();
    assert_eq!(stats.size, 0);
    assert_eq!(stats.hits + stats.misses, 0, "no cache interaction");

    assert_eq!(explanation.scan.partitions_scanned, 7);
    assert_eq!(explanation.candidates.len(), 3);
    assert!(explanation
        .canonical_text
        .contains("sales.date >= '2024-11-01'"));
    let rendered = format!("{explanation}");
    assert!(rendered.contains("selected=vectorized"), "{rendered}");
    assert!(rendered.contains("estimated_ms"), "{rendered}");
}

#[test]
fn transient_failure_degrades_to_next_backend_once() {
    let fx = fixture_with(
        StubExecutor::with_failures(
            BackendKind::Vectorized,
            vec![ExecutorError::transient("worker pool exhausted")],
        ),
        StubExecutor::new(BackendKind::Parallel),
        StubExecutor::new(BackendKind::Distributed),
    );
    let result = fx.router.execute(WEEK_QUERY).expect("degraded run");
    assert_eq!(result.backend_used, BackendKind::Parallel);
    assert_eq!(fx.vectorized.call_count(), 1);
    assert_eq!(fx.parallel.call_count(), 1);
}

#[test]
fn oom_marks_backends_infeasible_until_one_fits() {
    let fx = fixture_with(
        StubExecutor::with_failures(
            BackendKind::Vectorized,
            vec![ExecutorError::out_of_memory("hash table")],
        ),
        StubExecutor::with_failures(
            BackendKind::Parallel,
            vec![ExecutorError::out_of_memory("sort spill")],
        ),
        StubExecutor::new(BackendKind::Distributed),
    );
    let result = fx.router.execute(WEEK_QUERY).expect("third backend");
    assert_eq!(result.backend_used, BackendKind::Distributed);
    assert_eq!(fx.distributed.call_count(), 1);
}

#[test]
fn permanent_failure_surfaces_without_retry() {
    let fx = fixture_with(
        StubExecutor::with_failures(
            BackendKind::Vectorized,
            vec![ExecutorError::permanent("corrupt file")],
        ),
        StubExecutor::new(BackendKind::Parallel),
        StubExecutor::new(BackendKind::Distributed),
    );
    let err = fx.router.execute(WEEK_QUERY).expect_err("permanent");
    assert!(
        matches!(&err, QrxError::Executor(e) if e.kind == ExecutorErrorKind::Permanent),
        "{err}"
    );
    assert_eq!(fx.parallel.call_count(), 0, "no degradation for permanent");
}

#[test]
fn cancelled_calls_touch_nothing() {
    let fx = fixture();
    let cancel = CancellationToken::new();
    cancel.cancel();
    let err = fx
        .router
        .execute_with(
            WEEK_QUERY,
            QueryOptions {
                cancel,
                ..QueryOptions::default()
            },
        )
        .expect_err("cancelled");
    assert!(matches!(err, QrxError::Cancelled), "{err}");
    assert_eq!(fx.vectorized.call_count(), 0);
    assert_eq!(fx.router.cache_stats().size, 0);
}

#[test]
fn forced_backend_bypasses_selection() {
    let fx = fixture();
    let result = fx
        .router
        .execute_with(
            WEEK_QUERY,
            QueryOptions {
                force_backend: Some(BackendKind::Distributed),
                ..QueryOptions::default()
            },
        )
        .expect("forced");
    assert_eq!(result.backend_used, BackendKind::Distributed);
    assert_eq!(fx.distributed.call_count(), 1);
    assert_eq!(fx.vectorized.call_count(), 0);
}

#[test]
fn missing_executor_is_a_permanent_executor_error() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_day_partitions(dir.path(), &november_days(), 1024);
    let router = Router::new(RouterConfig::default()).expect("router");
    router.register_table(
        "sales",
        TableDef::new("sales", dir.path().to_string_lossy().into_owned()),
    );
    let err = router.execute(WEEK_QUERY).expect_err("no executors");
    assert!(
        matches!(&err, QrxError::Executor(e)
            if e.kind == ExecutorErrorKind::Permanent && e.message.contains("no executor")),
        "{err}"
    );
}

#[test]
fn unknown_table_surfaces_from_analysis() {
    let fx = fixture();
    let err = fx
        .router
        .execute("SELECT a FROM missing")
        .expect_err("unknown table");
    assert!(matches!(err, QrxError::UnknownTable(ref t) if t == "missing"), "{err}");
}

#[test]
fn cache_clear_resets_counters_and_entries() {
    let fx = fixture();
    fx.router.execute(WEEK_QUERY).expect("seed");
    fx.router.execute(WEEK_QUERY).expect("hit");
    fx.router.cache_clear();
    let stats = fx.router.cache_stats();
    assert_eq!(stats.size, 0);
    assert_eq!(stats.hits + stats.misses, 0);

    let again = fx.router.execute(WEEK_QUERY).expect("after clear");
    assert!(!again.from_cache);
}

#[test]
fn invalidate_table_drops_entries_witnessing_its_files() {
    let fx = fixture();
    fx.router.execute(WEEK_QUERY).expect("seed");
    assert_eq!(fx.router.cache_stats().size, 1);
    let removed = fx.router.invalidate_table("sales").expect("invalidate");
    assert_eq!(removed, 1);
    assert_eq!(fx.router.cache_stats().size, 0);
}

#[test]
fn router_is_shareable_across_threads() {
    let fx = fixture();
    let results: Vec<bool> = std::thread::scope(|scope| {
        (0..4)
            .map(|_| {
                let router = fx.router.clone();
                scope.spawn(move || router.execute(WEEK_QUERY).expect("execute").from_cache)
            })
            .collect::<Vec<_>>()
            .into_iter()
            .map(|h| h.join().expect("thread"))
            .collect()
    });
    // Exactly one thread executed; the cache served the rest or they raced
    // to execute, but every result agrees on shape.
    assert_eq!(results.len(), 4);
    let stats = fx.router.cache_stats();
    assert_eq!(stats.size, 1);
}
