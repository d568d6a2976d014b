use std::path::PathBuf;

use thiserror::Error;

/// Canonical QRX error taxonomy used across crates.
///
/// Classification guidance:
/// - [`QrxError::Parse`] / [`QrxError::Unsupported`]: user error, surfaced unchanged
/// - [`QrxError::UnknownTable`] / [`QrxError::AmbiguousColumn`]: user error from name resolution
/// - [`QrxError::PartitionLayout`]: data error; the partition index is invalidated before surfacing
/// - [`QrxError::NoFeasibleBackend`]: every backend was excluded by the cost model
/// - [`QrxError::Executor`]: dispatch failure, classified by [`ExecutorErrorKind`]
/// - [`QrxError::Cancelled`]: the caller's cancellation token fired; nothing was cached
/// - [`QrxError::InvalidConfig`]: catalog/config/path contract violations
/// - [`QrxError::Io`]: raw filesystem IO failures from std APIs
#[derive(Debug, Error)]
pub enum QrxError {
    /// SQL text could not be parsed into a statement.
    #[error("parse error: {0}")]
    Parse(String),

    /// Syntactically valid input outside the supported single-SELECT subset.
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// Referenced table is not registered in the catalog.
    #[error("unknown table: {0}")]
    UnknownTable(String),

    /// Column resolves to more than one registered table schema.
    #[error("ambiguous column: {0}")]
    AmbiguousColumn(String),

    /// Partition directory tree violates the uniform `key=value` layout.
    #[error("partition layout error at {path}: {message}")]
    PartitionLayout {
        /// Offending directory or file path.
        path: PathBuf,
        /// What the walk expected to find there.
        message: String,
    },

    /// Every backend candidate was infeasible; carries per-backend reasons.
    #[error("no feasible backend: {0}")]
    NoFeasibleBackend(String),

    /// Failure reported by a dispatched executor.
    #[error(transparent)]
    Executor(#[from] ExecutorError),

    /// The call's cancellation token fired at a pipeline boundary.
    #[error("query cancelled")]
    Cancelled,

    /// Invalid or inconsistent configuration/catalog state.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Transparent std IO failures.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl QrxError {
    /// Process exit code for the `qrx` binary: 0 success, 2 user error,
    /// 3 data error, 4 executor error, 130 cancelled.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Parse(_)
            | Self::Unsupported(_)
            | Self::UnknownTable(_)
            | Self::AmbiguousColumn(_)
            | Self::InvalidConfig(_) => 2,
            Self::PartitionLayout { .. } | Self::Io(_) => 3,
            Self::NoFeasibleBackend(_) | Self::Executor(_) => 4,
            Self::Cancelled => 130,
        }
    }
}

/// Standard QRX result alias.
pub type Result<T> = std::result::Result<T, QrxError>;

/// Failure classification reported by an executor.
///
/// The engine reacts per kind: `TransientResource` triggers one degradation
/// retry on the next-best backend, `OutOfMemory` marks the attempted backend
/// infeasible for the current call and re-selects, `Permanent` and `Timeout`
/// surface unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutorErrorKind {
    /// Temporarily exhausted resource (connections, workers, file handles).
    TransientResource,
    /// Non-retryable failure.
    Permanent,
    /// The backend ran out of memory for this query's working set.
    OutOfMemory,
    /// The caller's deadline elapsed at the executor boundary.
    Timeout,
}

impl std::fmt::Display for ExecutorErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::TransientResource => "transient resource",
            Self::Permanent => "permanent",
            Self::OutOfMemory => "out of memory",
            Self::Timeout => "timeout",
        };
        write!(f, "{s}")
    }
}

/// Error returned by a dispatched executor, classified for retry handling.
#[derive(Debug, Clone, Error)]
#[error("executor error ({kind}): {message}")]
pub struct ExecutorError {
    /// Retry classification.
    pub kind: ExecutorErrorKind,
    /// Backend-provided detail.
    pub message: String,
}

impl ExecutorError {
    /// Build a `TransientResource` error.
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: ExecutorErrorKind::TransientResource,
            message: message.into(),
        }
    }

    /// Build a `Permanent` error.
    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            kind: ExecutorErrorKind::Permanent,
            message: message.into(),
        }
    }

    /// Build an `OutOfMemory` error.
    pub fn out_of_memory(message: impl Into<String>) -> Self {
        Self {
            kind: ExecutorErrorKind::OutOfMemory,
            message: message.into(),
        }
    }

    /// Build a `Timeout` error.
    pub fn timeout(message: impl Into<String>) -> Self {
        Self {
            kind: ExecutorErrorKind::Timeout,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{ExecutorError, QrxError};

    #[test]
    fn exit_codes_follow_error_class() {
        assert_eq!(QrxError::Parse("x".into()).exit_code(), 2);
        assert_eq!(QrxError::UnknownTable("t".into()).exit_code(), 2);
        assert_eq!(
            QrxError::PartitionLayout {
                path: "/d/bad".into(),
                message: "mixed keys".into()
            }
            .exit_code(),
            3
        );
        assert_eq!(
            QrxError::Executor(ExecutorError::permanent("boom")).exit_code(),
            4
        );
        assert_eq!(QrxError::Cancelled.exit_code(), 130);
    }

    #[test]
    fn executor_error_displays_kind() {
        let e = ExecutorError::out_of_memory("hash join spill failed");
        assert_eq!(
            format!("{e}"),
            "executor error (out of memory): hash join spill failed"
        );
    }
}
