//! Async facade over [`Engine`] for embedders whose dev-server loop runs
//! on `tokio`. CPU-heavy work still runs on the worker pool's own threads
//! or `rayon`; this module only moves the blocking entry points off the
//! async executor's threads via `spawn_blocking`.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::interval;
use tracing::instrument;

use crate::pipeline::{CompileMode, CompileOutput};
use crate::watch::{BatchOutcome, ChangeAction};
use crate::{Engine, Error, Result};

/// Wraps an [`Engine`] so its (synchronous, potentially blocking) methods
/// can be awaited from async code without stalling the executor.
#[derive(Clone)]
pub struct AsyncEngine {
    inner: Arc<Engine>,
}

impl AsyncEngine {
    pub fn new(engine: Engine) -> Self {
        Self { inner: Arc::new(engine) }
    }

    pub fn engine(&self) -> &Engine {
        &self.inner
    }

    #[instrument(level = "info", skip(self))]
    pub async fn compile_path(&self, path: PathBuf) -> Result<CompileOutput> {
        let engine = self.inner.clone();
        tokio::task::spawn_blocking(move || engine.compile_path(&path))
            .await
            .map_err(|e| Error::TransformError { file: PathBuf::new(), stage: "spawn_blocking", message: e.to_string() })?
    }

    pub async fn compile_many_paths(&self, paths: Vec<PathBuf>, mode: CompileMode) -> Vec<(PathBuf, Result<CompileOutput>)> {
        let engine = self.inner.clone();
        tokio::task::spawn_blocking(move || engine.compile_many_paths(&paths, mode))
            .await
            .unwrap_or_default()
    }

    pub fn record_change(&self, path: PathBuf, action: ChangeAction) {
        self.inner.record_change(path, action);
    }

    async fn process_ready_batch(&self) -> (BatchOutcome, Vec<(PathBuf, Result<CompileOutput>)>) {
        let engine = self.inner.clone();
        tokio::task::spawn_blocking(move || engine.process_ready_batch())
            .await
            .unwrap_or_else(|_| (BatchOutcome::default(), Vec::new()))
    }

    /// Polls the watch dispatcher on a fixed cadence and invokes
    /// `on_batch` whenever a debounced batch produced results. The polling
    /// interval is independent of `DEBOUNCE_DELAY` itself; it only needs
    /// to be frequent enough not to add perceptible latency on top of it.
    pub async fn run_watch_loop(
        &self,
        poll_interval: Duration,
        mut on_batch: impl FnMut(BatchOutcome, Vec<(PathBuf, Result<CompileOutput>)>) + Send,
    ) {
        let mut ticker = interval(poll_interval);
        loop {
            ticker.tick().await;
            let (outcome, results) = self.process_ready_batch().await;
            if outcome.to_compile.is_empty() && outcome.deleted.is_empty() && outcome.reload_only.is_empty() {
                continue;
            }
            on_batch(outcome, results);
        }
    }
}

pub fn default_poll_interval() -> Duration {
    Duration::from_millis(50)
}
