//! Crate-wide error taxonomy.
//!
//! Every stage and component returns a typed error from this enum (or a
//! narrower per-stage error that gets folded into it at the pipeline
//! boundary).

use std::path::PathBuf;

use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    /// No project configuration file could be found for a source file.
    #[error("no configuration file found for {0}")]
    ConfigMissing(PathBuf),

    /// A configuration file was found but failed to parse.
    #[error("invalid configuration at {path}: {source}")]
    ConfigInvalid {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// A stage could not parse its input at all.
    #[error("{file}: parse error: {message}")]
    ParseError { file: PathBuf, message: String },

    /// Transpilation produced a critical (non-allow-listed) diagnostic.
    #[error("{file}: syntax error: {message}")]
    SyntaxError { file: PathBuf, message: String },

    /// The semantic type-check branch reported error-severity diagnostics.
    #[error("{file}: {count} type error(s)")]
    TypeError { file: PathBuf, count: usize },

    /// A transform stage failed for a reason other than a source defect —
    /// normally a bug in the stage itself.
    #[error("{file}: transform `{stage}` failed: {message}")]
    TransformError { file: PathBuf, stage: &'static str, message: String },

    /// The integrity validator rejected a produced artifact.
    #[error("{file}: integrity check failed: {reason}")]
    IntegrityFailure { file: PathBuf, reason: String },

    /// The cache's internal invariants were violated; callers should treat
    /// this as "clear everything and retry", never as a partial success.
    #[error("cache inconsistency detected, forcing a full clear: {0}")]
    CacheInconsistency(String),

    /// A worker process/thread terminated unexpectedly.
    #[error("worker {slot} crashed: {message}")]
    WorkerCrashed { slot: usize, message: String },

    /// A single task exceeded its wall-clock budget.
    #[error("task {task_id} timed out after {elapsed_ms}ms")]
    TaskTimeout { task_id: String, elapsed_ms: u64 },

    /// A task was rejected because its slot was mid-recycle.
    #[error("worker {slot} is recycling, task {task_id} rejected")]
    WorkerRecycling { slot: usize, task_id: String },

    /// The pool was (or is being) shut down.
    #[error("worker pool is shutting down")]
    PoolShutdown,

    /// An I/O operation failed, with the path that triggered it.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl Error {
    pub fn io(source: std::io::Error, path: impl Into<PathBuf>) -> Self {
        Self::Io { path: path.into(), source }
    }

    /// Whether this error is pool-domain and the caller is expected to retry
    /// once via the in-process fallback path.
    pub fn is_pool_domain(&self) -> bool {
        matches!(
            self,
            Self::WorkerCrashed { .. }
                | Self::TaskTimeout { .. }
                | Self::WorkerRecycling { .. }
                | Self::PoolShutdown
        )
    }

    /// Whether this error is fatal to the whole compilation request, as
    /// opposed to scoped to a single file within a batch.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::ConfigMissing(_) | Self::ConfigInvalid { .. })
    }

    /// Process exit code this error should map to at the CLI seam.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ConfigMissing(_) | Self::ConfigInvalid { .. } => 1,
            Self::CacheInconsistency(_) => 3,
            _ => 2,
        }
    }
}
