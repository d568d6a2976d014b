//! Shared helpers for router integration tests.

use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use arrow::array::{Float64Array, StringArray};
use arrow::record_batch::RecordBatch;
use arrow_schema::{DataType, Field, Schema};
use qrx_common::{BackendKind, ExecutorError};
use qrx_router::{ExecutionRequest, Executor, ExecutorOutput, ExecutorTimings};

/// Create `date=YYYY-MM-DD/part.bin` partitions under `root`, each file
/// `size_bytes` long (sparse, so large sizes stay cheap).
pub fn write_day_partitions(root: &Path, days: &[String], size_bytes: u64) {
    for day in days {
        let dir = root.join(format!("date={day}"));
        fs::create_dir_all(&dir).expect("create partition dir");
        let file = fs::File::create(dir.join("part.bin")).expect("create data file");
        file.set_len(size_bytes).expect("size data file");
    }
}

/// The 30 days of November 2024 used by the pruning scenarios.
pub fn november_days() -> Vec<String> {
    (1..=30).map(|d| format!("2024-11-{d:02}")).collect()
}

/// Scriptable executor: pops one scripted failure per call, then succeeds
/// with a canned two-row batch. Counts every dispatch.
pub struct StubExecutor {
    kind: BackendKind,
    calls: AtomicUsize,
    scripted_failures: Mutex<Vec<ExecutorError>>,
}

impl StubExecutor {
    pub fn new(kind: BackendKind) -> Arc<Self> {
        Self::with_failures(kind, Vec::new())
    }

    pub fn with_failures(kind: BackendKind, failures: Vec<ExecutorError>) -> Arc<Self> {
        Arc::new(Self {
            kind,
            calls: AtomicUsize::new(0),
            scripted_failures: Mutex::new(failures),
        })
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Executor for StubExecutor {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    fn execute(
        &self,
        request: &ExecutionRequest<'_>,
    ) -> std::result::Result<ExecutorOutput, ExecutorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(failure) = self.scripted_failures.lock().expect("script lock").pop() {
            return Err(failure);
        }
        if request.cancel.is_cancelled() {
            return Err(ExecutorError::permanent("cancelled mid-execution"));
        }

        let schema = Arc::new(Schema::new(vec![
            Field::new("region", DataType::Utf8, false),
            Field::new("total", DataType::Float64, false),
        ]));
        let batch = RecordBatch::try_new(
            schema,
            vec![
                Arc::new(StringArray::from(vec!["eu", "us"])),
                Arc::new(Float64Array::from(vec![1250.5, 2210.0])),
            ],
        )
        .expect("build stub batch");
        let rows = batch.num_rows() as u64;
        Ok(ExecutorOutput {
            batches: vec![batch],
            rows_processed: rows,
            timings: ExecutorTimings {
                scan_ms: 1.0,
                compute_ms: 1.0,
            },
        })
    }
}
