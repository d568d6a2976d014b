//! Partition discovery over `root/k1=v1/k2=v2/.../data.<ext>` trees.
//!
//! An index is a stat-only walk: file paths, sizes, and mtimes. It is built
//! lazily on first reference and replaced whenever the walk observes a newer
//! mtime or a changed file set. At most one build runs per table; concurrent
//! callers join the winner's result.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::UNIX_EPOCH;

use qrx_common::{QrxError, Result};

/// One data file: absolute path, size, and modification time in nanoseconds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMeta {
    pub path: PathBuf,
    pub size_bytes: u64,
    pub mtime_ns: i64,
}

/// One discovered partition: its `key=value` chain in directory order plus
/// the data files underneath. The file list is never empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partition {
    pub keys: Vec<(String, String)>,
    pub files: Vec<FileMeta>,
    pub size_bytes: u64,
    pub max_mtime_ns: i64,
}

impl Partition {
    /// Value for a partition key, if this partition carries it.
    pub fn key_value(&self, key: &str) -> Option<&str> {
        self.keys
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Everything the pruner needs to know about one table's on-disk layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionIndex {
    pub table: String,
    pub root: PathBuf,
    /// Partition key names in directory-nesting order.
    pub key_order: Vec<String>,
    pub partitions: Vec<Partition>,
    pub max_mtime_ns: i64,
    pub total_bytes: u64,
    pub file_count: usize,
}

impl PartitionIndex {
    /// Whether a column name is a partition key of this table.
    pub fn is_partition_key(&self, column: &str) -> bool {
        self.key_order.iter().any(|k| k == column)
    }

    fn same_contents(&self, other: &PartitionIndex) -> bool {
        self.max_mtime_ns == other.max_mtime_ns
            && self.file_count == other.file_count
            && self.total_bytes == other.total_bytes
    }
}

struct LeafDir {
    keys: Vec<(String, String)>,
    files: Vec<PathBuf>,
}

/// Walk a table root and build its index.
///
/// Layout contract (violations surface as `PartitionLayout`):
/// - every directory level uses the same `key=value` name at the same depth;
/// - a directory holds either data files or partition subdirectories, not both;
/// - hidden and staging entries (leading `.` or `_`) are ignored.
pub fn build_index(table: &str, root: &Path, parallelism: usize) -> Result<PartitionIndex> {
    if !root.is_dir() {
        return Err(QrxError::PartitionLayout {
            path: root.to_path_buf(),
            message: "table root is not a directory".to_string(),
        });
    }

    let mut key_order: Vec<String> = Vec::new();
    let mut leaves: Vec<LeafDir> = Vec::new();
    discover_leaves(root, 0, &mut Vec::new(), &mut key_order, &mut leaves)?;

    let mut partitions = stat_leaves(leaves, parallelism)?;
    partitions.sort_by(|a, b| a.keys.cmp(&b.keys));

    let max_mtime_ns = partitions.iter().map(|p| p.max_mtime_ns).max().unwrap_or(0);
    let total_bytes = partitions.iter().map(|p| p.size_bytes).sum();
    let file_count = partitions.iter().map(|p| p.files.len()).sum();

    Ok(PartitionIndex {
        table: table.to_string(),
        root: root.to_path_buf(),
        key_order,
        partitions,
        max_mtime_ns,
        total_bytes,
        file_count,
    })
}

fn discover_leaves(
    dir: &Path,
    depth: usize,
    keys: &mut Vec<(String, String)>,
    key_order: &mut Vec<String>,
    out: &mut Vec<LeafDir>,
) -> Result<()> {
    let mut files = Vec::new();
    let mut subdirs = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.starts_with('.') || name.starts_with('_') {
            continue;
        }
        let path = entry.path();
        if entry.file_type()?.is_dir() {
            subdirs.push(path);
        } else {
            files.push(path);
        }
    }
    subdirs.sort();
    files.sort();

    if !files.is_empty() && !subdirs.is_empty() {
        return Err(QrxError::PartitionLayout {
            path: dir.to_path_buf(),
            message: "directory mixes data files and partition subdirectories".to_string(),
        });
    }

    if !files.is_empty() {
        out.push(LeafDir {
            keys: keys.clone(),
            files,
        });
        return Ok(());
    }

    for sub in subdirs {
        let dir_name = sub
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let Some((key, value)) = dir_name.split_once('=') else {
            return Err(QrxError::PartitionLayout {
                path: sub,
                message: "expected a key=value partition directory".to_string(),
            });
        };
        if key.is_empty() {
            return Err(QrxError::PartitionLayout {
                path: sub,
                message: "partition key name is empty".to_string(),
            });
        }
        if depth == key_order.len() {
            key_order.push(key.to_string());
        } else if key_order[depth] != key {
            return Err(QrxError::PartitionLayout {
                path: sub,
                message: format!(
                    "partition key '{key}' does not match '{}' used by sibling directories",
                    key_order[depth]
                ),
            });
        }
        keys.push((key.to_string(), value.to_string()));
        discover_leaves(&sub, depth + 1, keys, key_order, out)?;
        keys.pop();
    }
    Ok(())
}

fn stat_leaves(leaves: Vec<LeafDir>, parallelism: usize) -> Result<Vec<Partition>> {
    if parallelism <= 1 || leaves.len() <= 1 {
        return leaves.into_iter().map(stat_leaf).collect();
    }
    let chunk = leaves.len().div_ceil(parallelism);
    let chunks: Vec<Vec<LeafDir>> = {
        let mut chunks = Vec::new();
        let mut iter = leaves.into_iter().peekable();
        while iter.peek().is_some() {
            chunks.push(iter.by_ref().take(chunk).collect());
        }
        chunks
    };
    let results: Vec<Result<Vec<Partition>>> = std::thread::scope(|scope| {
        let handles: Vec<_> = chunks
            .into_iter()
            .map(|chunk| {
                scope.spawn(move || chunk.into_iter().map(stat_leaf).collect::<Result<Vec<_>>>())
            })
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().expect("partition stat thread panicked"))
            .collect()
    });
    let mut out = Vec::new();
    for r in results {
        out.extend(r?);
    }
    Ok(out)
}

fn stat_leaf(leaf: LeafDir) -> Result<Partition> {
    let mut files = Vec::with_capacity(leaf.files.len());
    for path in leaf.files {
        let meta = fs::metadata(&path)?;
        files.push(FileMeta {
            mtime_ns: mtime_ns(&meta),
            size_bytes: meta.len(),
            path,
        });
    }
    let size_bytes = files.iter().map(|f| f.size_bytes).sum();
    let max_mtime_ns = files.iter().map(|f| f.mtime_ns).max().unwrap_or(0);
    Ok(Partition {
        keys: leaf.keys,
        files,
        size_bytes,
        max_mtime_ns,
    })
}

fn mtime_ns(meta: &fs::Metadata) -> i64 {
    meta.modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map_or(0, |d| i64::try_from(d.as_nanos()).unwrap_or(i64::MAX))
}

#[derive(Debug, Default)]
struct SlotState {
    cached: Option<Arc<PartitionIndex>>,
    /// A walk is in flight for this table.
    building: bool,
    /// Bumped each time a walk finishes, successful or not.
    epoch: u64,
}

#[derive(Debug, Default)]
struct TableSlot {
    state: Mutex<SlotState>,
    build_done: Condvar,
}

/// Per-table index cache with single-build-in-flight semantics.
#[derive(Debug)]
pub struct PartitionIndexCache {
    slots: Mutex<HashMap<String, Arc<TableSlot>>>,
    parallelism: usize,
    /// Walks actually performed; callers that join an in-flight build do not
    /// add to this.
    walks: AtomicU64,
}

impl PartitionIndexCache {
    pub fn new(parallelism: usize) -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            parallelism: parallelism.max(1),
            walks: AtomicU64::new(0),
        }
    }

    /// Return a fresh index for the table, rebuilding when the walk observes
    /// a newer mtime or a changed file set.
    ///
    /// At most one walk runs per table: callers that arrive while one is in
    /// flight block and adopt its result. Callers arriving between walks run
    /// their own, since the walk is also the staleness check.
    pub fn ensure(&self, table: &str, root: &Path) -> Result<Arc<PartitionIndex>> {
        let slot = {
            let mut slots = self.slots.lock().expect("index map lock poisoned");
            Arc::clone(slots.entry(table.to_string()).or_default())
        };

        let mut state = slot.state.lock().expect("index slot lock poisoned");
        let arrived_at = state.epoch;
        while state.building {
            state = slot
                .build_done
                .wait(state)
                .expect("index slot lock poisoned");
        }
        if state.epoch != arrived_at {
            // A walk finished after we arrived; its result is ours too.
            if let Some(index) = &state.cached {
                return Ok(Arc::clone(index));
            }
            // That walk failed; run our own.
        }

        state.building = true;
        drop(state);
        let built = build_index(table, root, self.parallelism);
        self.walks.fetch_add(1, Ordering::Relaxed);

        let mut state = slot.state.lock().expect("index slot lock poisoned");
        state.building = false;
        state.epoch += 1;
        let result = match built {
            Ok(fresh) => {
                let index = match state.cached.take() {
                    Some(cached) if cached.same_contents(&fresh) => cached,
                    previous => {
                        if previous.is_some() {
                            tracing::info!(
                                table,
                                partitions = fresh.partitions.len(),
                                max_mtime_ns = fresh.max_mtime_ns,
                                "partition index rebuilt"
                            );
                        }
                        Arc::new(fresh)
                    }
                };
                state.cached = Some(Arc::clone(&index));
                Ok(index)
            }
            Err(e) => {
                // A failed walk invalidates whatever we had.
                state.cached = None;
                Err(e)
            }
        };
        slot.build_done.notify_all();
        result
    }

    /// Drop the cached index for one table.
    pub fn invalidate(&self, table: &str) {
        self.slots
            .lock()
            .expect("index map lock poisoned")
            .remove(table);
    }

    /// Drop every cached index.
    pub fn clear(&self) {
        self.slots
            .lock()
            .expect("index map lock poisoned")
            .clear();
    }
}
