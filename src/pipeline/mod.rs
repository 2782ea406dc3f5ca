//! Compilation Pipeline: orchestrates the per-file stage sequence, consults
//! the cache, and produces artifacts.
//!
//! Follows a `preprocess -> compile -> write_artifacts -> write_cache`
//! state machine, generalized into a per-file stage pipeline with an
//! independent parallel type-check branch.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use tracing::{instrument, warn};

use crate::cache::{hash_bytes, CacheKey, CompilationCache};
use crate::config::{ConfigLoader, EffectiveOptions};
use crate::diagnostics::Diagnostic;
use crate::error::{Error, Result};
use crate::hmr::{HmrDirective, HmrEngine, LibraryMap};
use crate::integrity::IntegrityValidator;
use crate::source::{SourceFile, SourceKind};
use crate::transform::{self, ParsedSfc};
use crate::worker::WorkerPool;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompileMode {
    Individual,
    Batch,
    Watch,
}

#[derive(Debug, Clone)]
pub struct CompileOutput {
    pub output_path: PathBuf,
    pub artifact: String,
    pub hmr_action: HmrDirective,
    pub diagnostics: Vec<Diagnostic>,
}

/// Per-key build-lock coalescing: the first caller for a given
/// [`CacheKey`] computes and publishes the result; concurrent callers for
/// the same key block on the same cell and receive the identical result
/// the same key block on the same cell and receive the identical result.
#[derive(Default)]
struct BuildLocks {
    cells: Mutex<std::collections::HashMap<CacheKey, Arc<OnceCell<Arc<std::result::Result<CompileOutput, Error>>>>>>,
}

impl BuildLocks {
    fn coalesce(
        &self,
        key: &CacheKey,
        compute: impl FnOnce() -> std::result::Result<CompileOutput, Error>,
    ) -> Arc<std::result::Result<CompileOutput, Error>> {
        let cell = {
            let mut cells = self.cells.lock();
            cells.entry(key.clone()).or_insert_with(|| Arc::new(OnceCell::new())).clone()
        };

        let result = cell.get_or_init(|| Arc::new(compute())).clone();

        // Best-effort cleanup: only drop the map entry if nobody else
        // installed a newer cell for the same key in the meantime.
        let mut cells = self.cells.lock();
        if let Some(current) = cells.get(key) {
            if Arc::ptr_eq(current, &cell) {
                cells.remove(key);
            }
        }
        result
    }
}

pub struct CompilationPipeline {
    project_root: PathBuf,
    output_root: PathBuf,
    config: Arc<ConfigLoader>,
    cache: Arc<CompilationCache>,
    pool: Arc<WorkerPool>,
    integrity: Arc<IntegrityValidator>,
    hmr: Arc<HmrEngine>,
    build_locks: BuildLocks,
    dep_manifest_hash: AtomicU64,
    /// Type-check results computed by a batch front-load, keyed by source
    /// path, consumed (and removed) by the next matching `compile` call
    /// instead of being recomputed.
    precomputed_type_checks: Mutex<std::collections::HashMap<PathBuf, std::result::Result<(), usize>>>,
}

impl CompilationPipeline {
    pub fn new(
        project_root: impl Into<PathBuf>,
        output_root: impl Into<PathBuf>,
        config: Arc<ConfigLoader>,
        cache: Arc<CompilationCache>,
        pool: Arc<WorkerPool>,
        integrity: Arc<IntegrityValidator>,
        library_map: LibraryMap,
    ) -> Self {
        Self {
            project_root: project_root.into(),
            output_root: output_root.into(),
            config,
            cache,
            pool,
            integrity,
            hmr: Arc::new(HmrEngine::new(library_map)),
            build_locks: BuildLocks::default(),
            dep_manifest_hash: AtomicU64::new(0),
            precomputed_type_checks: Mutex::new(std::collections::HashMap::new()),
        }
    }

    /// Borrows the underlying cache for embedders that want statistics or
    /// manual invalidation outside of a full `compile` call.
    pub fn cache_ref(&self) -> &CompilationCache {
        &self.cache
    }

    /// Updates the project's dependency-manifest digest. A change clears
    /// the whole cache.
    pub fn set_dependency_manifest_hash(&self, new_hash: u64) {
        let previous = self.dep_manifest_hash.swap(new_hash, Ordering::SeqCst);
        if previous != 0 && previous != new_hash {
            warn!("dependency manifest changed, clearing compilation cache");
            self.cache.clear();
        }
    }

    /// The `dist` path a given source path compiles to, for callers that
    /// need to locate (or remove) an artifact without a full `compile` call.
    pub fn output_path_for(&self, source_path: &Path) -> Result<PathBuf> {
        let rel = source_path
            .strip_prefix(&self.project_root)
            .map_err(|_| Error::io(std::io::Error::new(std::io::ErrorKind::InvalidInput, "source outside project root"), source_path))?;
        Ok(self.output_root.join(rel).with_extension("js"))
    }

    /// Compiles one file end to end.
    #[instrument(level = "info", skip(self, file), fields(path = %file.path.display()))]
    pub fn compile(&self, file: &SourceFile) -> Result<CompileOutput> {
        let options = self.config.effective_options(&file.path, file.kind)?;
        let content_hash = hash_bytes(file.content.as_bytes());
        let options_hash = options.stable_hash();
        let env_hash = crate::config::env_fingerprint_from_process();
        let dep_hash = self.dep_manifest_hash.load(Ordering::SeqCst);
        let normalized_path = file.path.strip_prefix(&self.project_root).unwrap_or(&file.path);
        let key = CacheKey::new(normalized_path, content_hash, options_hash, env_hash, dep_hash);

        if let Some(entry) = self.cache.get(&key) {
            let dependents = self.cache.dependents_of(&file.path);
            let hmr_action = self.hmr.classify(&file.path, file.kind, &module_id(&file.path), &entry.artifact, dependents);
            return Ok(CompileOutput {
                output_path: self.output_path_for(&file.path)?,
                artifact: entry.artifact,
                hmr_action,
                diagnostics: Vec::new(),
            });
        }

        let file = file.clone();
        let key_for_compute = key.clone();
        let result = self.build_locks.coalesce(&key, || self.compile_uncached(&file, &options, &key_for_compute));

        match Arc::try_unwrap(result) {
            Ok(inner) => inner,
            Err(shared) => match shared.as_ref() {
                Ok(output) => Ok(output.clone()),
                Err(err) => Err(clone_error(err)),
            },
        }
    }

    fn compile_uncached(&self, file: &SourceFile, options: &EffectiveOptions, key: &CacheKey) -> std::result::Result<CompileOutput, Error> {
        let (transform_result, type_check_result) = rayon::join(
            || self.run_transform_branch(file, options),
            || if options.type_check { self.run_type_check_branch(file, options) } else { Ok(()) },
        );
        let (final_code, declared_imports, diagnostics) = transform_result?;
        type_check_result?;

        let report = self.integrity.validate(&file.path.to_string_lossy(), &file.content, &final_code);
        if !report.valid {
            return Err(Error::IntegrityFailure { file: file.path.clone(), reason: report.errors.join("; ") });
        }

        let dep_paths: Vec<PathBuf> = declared_imports.iter().map(PathBuf::from).collect();
        self.cache.put(&file.path, key.clone(), final_code.clone(), dep_paths);

        let dependents = self.cache.dependents_of(&file.path);
        let hmr_action = self.hmr.classify(&file.path, file.kind, &module_id(&file.path), &final_code, dependents);

        Ok(CompileOutput { output_path: self.output_path_for(&file.path)?, artifact: final_code, hmr_action, diagnostics })
    }

    /// Runs the fast emission branch: `parse_sfc -> transpile_typed_script
    /// -> rewrite_imports -> (production) minify`.
    fn run_transform_branch(&self, file: &SourceFile, options: &EffectiveOptions) -> std::result::Result<(String, Vec<String>, Vec<Diagnostic>), Error> {
        let mut diagnostics = Vec::new();

        let (script_source, mut declared_imports) = match file.kind {
            SourceKind::Sfc => {
                let parsed: ParsedSfc = transform::parse_sfc(&file.content, &file.path)?;
                (parsed.script_source, Vec::new())
            }
            _ => (file.content.clone(), Vec::new()),
        };

        let plain_script = if file.kind.is_typed() {
            let out = transform::transpile_typed_script(&script_source, &file.path)?;
            out.code
        } else {
            script_source
        };

        let resolver = FilesystemResolver { project_root: &self.project_root, source_dir: file.path.parent().unwrap_or(&self.project_root) };
        let (rewritten, import_diags) = transform::rewrite_imports(&plain_script, &file.path, options, &|p| resolver.resolve(p));
        diagnostics.extend(import_diags);
        declared_imports.extend(extract_import_specifiers(&rewritten));

        let final_code = if options.production { transform::minify(&rewritten) } else { rewritten };

        Ok((final_code, declared_imports, diagnostics))
    }

    /// Runs type-checking as an independent branch off the *original*
    /// typed-script source; this is never sequenced after alias-rewriting
    /// (see DESIGN.md for why).
    fn run_type_check_branch(&self, file: &SourceFile, options: &EffectiveOptions) -> std::result::Result<(), Error> {
        if let Some(precomputed) = self.precomputed_type_checks.lock().remove(&file.path) {
            return precomputed.map_err(|count| Error::TypeError { file: file.path.clone(), count });
        }

        let outcome = self.pool.type_check(file.path.clone(), file.content.clone(), file.kind, options.clone());
        let result = match outcome {
            Ok(result) => result,
            Err(err) if err.is_pool_domain() => {
                warn!(error = %err, "pool-domain error during type-check, retrying in process");
                self.pool.run_in_process(&file.path, &file.content, file.kind, options)
            }
            Err(err) => return Err(err),
        };
        if result.has_errors {
            let count = result.diagnostics.iter().filter(|d| d.is_error()).count();
            return Err(Error::TypeError { file: file.path.clone(), count });
        }
        Ok(())
    }

    /// Batch variant: in batch mode, type-checking is
    /// front-loaded; in watch mode, files within one debounce window
    /// compile concurrently up to the configured batch bound.
    pub fn compile_many(&self, files: &[SourceFile], mode: CompileMode) -> Vec<(PathBuf, Result<CompileOutput>)> {
        use rayon::prelude::*;

        if mode == CompileMode::Batch {
            files
                .par_iter()
                .filter(|f| f.kind.is_typed())
                .for_each(|f| {
                    let Ok(options) = self.config.effective_options(&f.path, f.kind) else { return };
                    if !options.type_check {
                        return;
                    }
                    let outcome = match self.run_type_check_branch(f, &options) {
                        Ok(()) => Ok(()),
                        Err(Error::TypeError { count, .. }) => Err(count),
                        // Any other error (pool shutdown, worker crash after a
                        // failed in-process retry, ...) is left uncached so
                        // `compile` redoes the check and surfaces it there.
                        Err(_) => return,
                    };
                    self.precomputed_type_checks.lock().insert(f.path.clone(), outcome);
                });
        }

        files.par_iter().map(|f| (f.path.clone(), self.compile(f))).collect()
    }
}

fn module_id(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

fn clone_error(err: &Error) -> Error {
    // `Error` is not `Clone` (it wraps `std::io::Error`/`serde_json::Error`),
    // so coalesced callers that don't win the `Arc::try_unwrap` race get a
    // re-rendered equivalent carrying the same message.
    match err {
        Error::ConfigMissing(p) => Error::ConfigMissing(p.clone()),
        Error::ParseError { file, message } => Error::ParseError { file: file.clone(), message: message.clone() },
        Error::SyntaxError { file, message } => Error::SyntaxError { file: file.clone(), message: message.clone() },
        Error::TypeError { file, count } => Error::TypeError { file: file.clone(), count: *count },
        Error::TransformError { file, stage, message } => {
            Error::TransformError { file: file.clone(), stage, message: message.clone() }
        }
        Error::IntegrityFailure { file, reason } => Error::IntegrityFailure { file: file.clone(), reason: reason.clone() },
        Error::CacheInconsistency(m) => Error::CacheInconsistency(m.clone()),
        Error::WorkerCrashed { slot, message } => Error::WorkerCrashed { slot: *slot, message: message.clone() },
        Error::TaskTimeout { task_id, elapsed_ms } => Error::TaskTimeout { task_id: task_id.clone(), elapsed_ms: *elapsed_ms },
        Error::WorkerRecycling { slot, task_id } => Error::WorkerRecycling { slot: *slot, task_id: task_id.clone() },
        Error::PoolShutdown => Error::PoolShutdown,
        Error::ConfigInvalid { path, .. } => Error::CacheInconsistency(format!("config invalid at {}", path.display())),
        Error::Io { path, source } => Error::io(std::io::Error::new(source.kind(), source.to_string()), path.clone()),
    }
}

struct FilesystemResolver<'a> {
    project_root: &'a Path,
    source_dir: &'a Path,
}

impl FilesystemResolver<'_> {
    fn resolve(&self, specifier: &Path) -> Option<&'static str> {
        const EXTENSIONS: &[&str] = &["ts", "tsx", "js", "sfc"];
        let base = if specifier.is_absolute() { self.project_root.join(specifier.strip_prefix("/").unwrap_or(specifier)) } else { self.source_dir.join(specifier) };
        for ext in EXTENSIONS {
            if base.with_extension(ext).is_file() {
                return Some(ext);
            }
        }
        None
    }
}

fn extract_import_specifiers(code: &str) -> Vec<String> {
    use once_cell::sync::Lazy;
    use regex::Regex;
    static SPEC: Lazy<Regex> = Lazy::new(|| Regex::new(r#"from\s+['"]([^'"]+)['"]"#).unwrap());
    SPEC.captures_iter(code).map(|c| c[1].to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::WorkerPool;
    use std::io::Write;

    fn setup(dir: &Path) -> CompilationPipeline {
        let mut f = std::fs::File::create(dir.join("project.config.json")).unwrap();
        f.write_all(b"{}").unwrap();
        CompilationPipeline::new(
            dir,
            dir.join("dist"),
            Arc::new(ConfigLoader::new(dir)),
            Arc::new(CompilationCache::new(100)),
            Arc::new(WorkerPool::with_default_host(2)),
            Arc::new(IntegrityValidator::new()),
            LibraryMap::new(),
        )
    }

    #[test]
    fn compiles_simple_typed_script() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = setup(dir.path());
        let path = dir.path().join("a.ts");
        let file = SourceFile::new(&path, "export const x: number = 42; export default x;").unwrap();
        let output = pipeline.compile(&file).unwrap();
        assert!(output.artifact.contains("export const x = 42"));
        assert!(output.artifact.contains("export default x"));
    }

    #[test]
    fn second_compile_is_a_cache_hit_with_identical_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = setup(dir.path());
        let path = dir.path().join("a.ts");
        let file = SourceFile::new(&path, "export const x = 1;").unwrap();
        let first = pipeline.compile(&file).unwrap();
        let second = pipeline.compile(&file).unwrap();
        assert_eq!(first.artifact, second.artifact);
        assert_eq!(pipeline.cache.stats().hits, 1);
    }

    #[test]
    fn integrity_failure_prevents_caching() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = setup(dir.path());
        // A source so short with no export trips the lowered size floor.
        let path = dir.path().join("a.ts");
        let file = SourceFile::new(&path, ";").unwrap();
        let err = pipeline.compile(&file).unwrap_err();
        assert!(matches!(err, Error::IntegrityFailure { .. }));
        assert_eq!(pipeline.cache.stats().entries, 0);
    }
}
