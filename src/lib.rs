//! Incremental compilation pipeline and dev-server engine for SFC/TSX web
//! applications.
//!
//! The crate's load-bearing pieces are organized, leaves first, the same
//! way the rest of this codebase's module graph reads:
//!
//! - [`integrity`] and [`diagnostics`] are pure, dependency-free.
//! - [`worker`] executes type-check jobs in isolation.
//! - [`transform`] and [`config`] feed the pipeline.
//! - [`pipeline`] orchestrates everything above and consults [`cache`].
//! - [`hmr`] classifies changes; [`watch`] drives the whole thing from
//!   filesystem events.
//!
//! [`Engine`] is the single owning handle an embedder constructs once at
//! process startup and threads through its CLI/dev-server/watch loop,
//! in place of hidden global singletons.

pub mod cache;
pub mod config;
pub mod devserver;
pub mod diagnostics;
pub mod error;
pub mod hmr;
pub mod integrity;
pub mod pipeline;
#[cfg(not(target_arch = "wasm32"))]
pub mod runtime;
pub mod source;
#[cfg(feature = "project-util")]
pub mod testutil;
pub mod transform;
pub mod watch;
pub mod worker;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::instrument;

pub use error::{Error, Result};

use cache::CompilationCache;
use config::ConfigLoader;
use hmr::LibraryMap;
use integrity::IntegrityValidator;
use pipeline::{CompileMode, CompileOutput, CompilationPipeline};
use source::SourceFile;
use watch::{BatchOutcome, ChangeAction, WatchDispatcher};
use worker::{OperationMode, WorkerPool};

/// Builder for [`Engine`], mirroring the project-builder pattern this
/// crate's build-engine domain calls for: construct once, configure, then
/// finalize into the owning handle that lives for the process's lifetime.
pub struct EngineBuilder {
    project_root: PathBuf,
    output_root: PathBuf,
    cache_capacity: usize,
    mode: OperationMode,
    library_map: LibraryMap,
    additional_watch_globs: Vec<String>,
}

impl EngineBuilder {
    pub fn new(project_root: impl Into<PathBuf>) -> Self {
        let project_root = project_root.into();
        let output_root = project_root.join("dist");
        Self {
            project_root,
            output_root,
            cache_capacity: cache::DEFAULT_CAPACITY,
            mode: OperationMode::Individual,
            library_map: LibraryMap::new(),
            additional_watch_globs: Vec::new(),
        }
    }

    pub fn output_root(mut self, path: impl Into<PathBuf>) -> Self {
        self.output_root = path.into();
        self
    }

    pub fn cache_capacity(mut self, capacity: usize) -> Self {
        self.cache_capacity = capacity;
        self
    }

    pub fn mode(mut self, mode: OperationMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn library_map(mut self, library_map: LibraryMap) -> Self {
        self.library_map = library_map;
        self
    }

    pub fn additional_watch_globs(mut self, globs: Vec<String>) -> Self {
        self.additional_watch_globs = globs;
        self
    }

    pub fn build(self) -> Engine {
        let pool_size = worker::pool_size(num_cpus::get(), self.mode);
        let pool = Arc::new(WorkerPool::with_project_shim(pool_size, &self.project_root));
        let cache = Arc::new(CompilationCache::new(self.cache_capacity));
        let config = Arc::new(ConfigLoader::new(&self.project_root));
        let integrity = Arc::new(IntegrityValidator::new());

        let pipeline = CompilationPipeline::new(
            &self.project_root,
            &self.output_root,
            config,
            cache,
            pool,
            integrity,
            self.library_map,
        );

        Engine {
            project_root: self.project_root,
            pipeline,
            watch_dispatcher: WatchDispatcher::new(&self.additional_watch_globs),
        }
    }
}

/// The process-lifetime owning handle for the whole build engine: the
/// compilation pipeline (and everything it owns — cache, pool, config
/// loader, integrity validator, HMR engine) plus the watch dispatcher.
/// Construct exactly one per process via [`EngineBuilder`].
pub struct Engine {
    project_root: PathBuf,
    pipeline: CompilationPipeline,
    watch_dispatcher: WatchDispatcher,
}

impl Engine {
    pub fn builder(project_root: impl Into<PathBuf>) -> EngineBuilder {
        EngineBuilder::new(project_root)
    }

    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    /// Reads `path` and compiles it end to end.
    #[instrument(level = "info", skip(self))]
    pub fn compile_path(&self, path: &Path) -> Result<CompileOutput> {
        let content = std::fs::read_to_string(path).map_err(|e| Error::io(e, path))?;
        let file = SourceFile::new(path, content)
            .ok_or_else(|| Error::ParseError { file: path.to_path_buf(), message: "unrecognized source extension".to_string() })?;
        self.pipeline.compile(&file)
    }

    pub fn compile_many_paths(&self, paths: &[PathBuf], mode: CompileMode) -> Vec<(PathBuf, Result<CompileOutput>)> {
        let files: Vec<SourceFile> = paths
            .iter()
            .filter_map(|p| std::fs::read_to_string(p).ok().and_then(|content| SourceFile::new(p, content)))
            .collect();
        self.pipeline.compile_many(&files, mode)
    }

    /// Records a raw filesystem event for the watch dispatcher to debounce
    /// and batch.
    pub fn record_change(&self, path: PathBuf, action: ChangeAction) {
        self.watch_dispatcher.record_event(path, action);
    }

    /// Drains the watch dispatcher's current debounced batch. Unlinks are
    /// processed strictly before compiles: each deleted file's output
    /// artifact is removed from disk, its cache entries invalidated, and a
    /// full-reload directive queued onto the returned batch before any
    /// remaining file in the batch is compiled.
    pub fn process_ready_batch(&self) -> (BatchOutcome, Vec<(PathBuf, Result<CompileOutput>)>) {
        let mut outcome = self.watch_dispatcher.drain_batch();

        for deleted in &outcome.deleted {
            self.invalidate_cascade(deleted);
            if let Ok(output_path) = self.pipeline.output_path_for(deleted) {
                match std::fs::remove_file(&output_path) {
                    Ok(()) => {}
                    Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                    Err(err) => tracing::warn!(path = %output_path.display(), %err, "failed to remove stale artifact"),
                }
            }
            outcome.reload_only.push(hmr::HmrDirective::FullReload { reason: format!("{} was deleted", deleted.display()) });
        }

        let results = self.compile_many_paths(&outcome.to_compile, CompileMode::Watch);
        (outcome, results)
    }

    pub fn invalidate_cascade(&self, path: &Path) -> Vec<PathBuf> {
        self.cache().invalidate_cascade(path)
    }

    /// Exposed read access for embedders that want cache statistics or
    /// manual invalidation without routing everything through `Engine`.
    pub fn cache(&self) -> &CompilationCache {
        self.pipeline.cache_ref()
    }

    pub fn set_dependency_manifest_hash(&self, hash: u64) {
        self.pipeline.set_dependency_manifest_hash(hash);
    }
}
