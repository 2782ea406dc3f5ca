//! Config Loader & Env: resolves the effective compiler options for a
//! source file, with an mtime-keyed parse cache.
//!
//! Uses a `(path, mtime)`-sensitive cache-validity check, generalized from
//! "is this cache entry stale" to "has this config file changed on disk".

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{instrument, trace};
use walkdir::WalkDir;

use crate::cache::key::hash_bytes;
use crate::error::{Error, Result};
use crate::source::SourceKind;

/// Name of the project configuration file searched for at the project root
/// and then upward from a source file's directory.
pub const CONFIG_FILE_NAME: &str = "project.config.json";

/// The closed set of environment variables that influence compilation
/// Any other variable must never enter the fingerprint.
pub const ENV_KEYS: &[&str] = &["MODE", "TYPE_CHECK", "TARGET", "DEBUG", "VERBOSE"];

/// Glob-pattern alias map entry, ordered as declared so leftmost-longest
/// matching with declaration-order tiebreaks in `rewrite_imports` can be
/// applied deterministically.
pub type AliasMap = Vec<(String, String)>;

/// The raw, user-authored project configuration record.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProjectConfig {
    #[serde(default)]
    pub source_root: Option<PathBuf>,
    #[serde(default)]
    pub output_root: Option<PathBuf>,
    #[serde(default)]
    pub alias_map: AliasMap,
    #[serde(default)]
    pub additional_watch_globs: Vec<String>,
    #[serde(default)]
    pub production_library_urls: BTreeMap<String, String>,
    #[serde(default)]
    pub jsx_mode: Option<String>,
    #[serde(default)]
    pub module_resolution: Option<String>,
    #[serde(default)]
    pub lib: Vec<String>,
    #[serde(default)]
    pub production: bool,
    #[serde(default)]
    pub type_check: bool,
}

/// The merged record that actually governs a compilation: project
/// configuration plus the per-language technical overlays C10 applies.
/// Equality for cache-key purposes is the stable hash of its serialization
/// overlays.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EffectiveOptions {
    pub alias_map: AliasMap,
    pub production: bool,
    pub type_check: bool,
    pub jsx_mode: String,
    pub module_resolution: String,
    pub lib: Vec<String>,
    pub production_library_urls: BTreeMap<String, String>,
}

impl EffectiveOptions {
    /// A stable hash over the canonical JSON serialization, used as the
    /// `options_hash` component of the cache key.
    pub fn stable_hash(&self) -> u64 {
        let json = serde_json::to_vec(self).expect("EffectiveOptions is always serializable");
        hash_bytes(&json)
    }
}

/// Digest over the closed set of caching-relevant environment variables
/// compilation.
pub fn env_fingerprint(env: &impl Fn(&str) -> Option<String>) -> u64 {
    let mut buf = String::new();
    for key in ENV_KEYS {
        buf.push_str(key);
        buf.push('=');
        if let Some(value) = env(key) {
            buf.push_str(&value);
        }
        buf.push(';');
    }
    hash_bytes(buf.as_bytes())
}

/// Reads the live process environment for the closed set in [`ENV_KEYS`].
pub fn env_fingerprint_from_process() -> u64 {
    env_fingerprint(&|key| std::env::var(key).ok())
}

#[derive(Clone)]
struct CachedConfig {
    mtime: SystemTime,
    parsed: ProjectConfig,
}

/// Loads and caches project configuration, keyed by `(resolved path, mtime)`
/// exactly once per pair, using a check-then-insert-after-relock
/// protocol.
pub struct ConfigLoader {
    project_root: PathBuf,
    cache: RwLock<BTreeMap<PathBuf, CachedConfig>>,
}

impl ConfigLoader {
    pub fn new(project_root: impl Into<PathBuf>) -> Self {
        Self { project_root: project_root.into(), cache: RwLock::new(BTreeMap::new()) }
    }

    /// Searches for the configuration file: first at the project root, then
    /// walking upward from `source_dir`, implemented with `walkdir`'s
    /// ancestor idiom.
    fn find_config_path(&self, source_dir: &Path) -> Option<PathBuf> {
        let root_candidate = self.project_root.join(CONFIG_FILE_NAME);
        if root_candidate.is_file() {
            return Some(root_candidate);
        }

        for ancestor in source_dir.ancestors() {
            if !ancestor.starts_with(&self.project_root) && ancestor != self.project_root {
                break;
            }
            let candidate = ancestor.join(CONFIG_FILE_NAME);
            if candidate.is_file() {
                return Some(candidate);
            }
            if ancestor == self.project_root {
                break;
            }
        }
        None
    }

    /// Returns the effective options governing `source_path`, which must
    /// exist within `project_root`.
    #[instrument(level = "debug", skip(self))]
    pub fn effective_options(&self, source_path: &Path, kind: SourceKind) -> Result<EffectiveOptions> {
        let source_dir = source_path.parent().unwrap_or(&self.project_root);
        let config_path = self
            .find_config_path(source_dir)
            .ok_or_else(|| Error::ConfigMissing(source_path.to_path_buf()))?;

        let raw = self.load_parsed(&config_path)?;
        Ok(apply_overlay(raw, kind))
    }

    fn load_parsed(&self, path: &Path) -> Result<ProjectConfig> {
        let mtime = fs::metadata(path)
            .and_then(|m| m.modified())
            .map_err(|e| Error::io(e, path))?;

        if let Some(cached) = self.cache.read().get(path) {
            if cached.mtime == mtime {
                trace!(?path, "config cache hit");
                return Ok(cached.parsed.clone());
            }
        }

        // Check-then-insert-after-relock: re-check under the write lock in
        // case another thread already refreshed this entry while we were
        // reading the file.
        let mut cache = self.cache.write();
        if let Some(cached) = cache.get(path) {
            if cached.mtime == mtime {
                return Ok(cached.parsed.clone());
            }
        }

        let bytes = fs::read(path).map_err(|e| Error::io(e, path))?;
        let parsed: ProjectConfig = serde_json::from_slice(&bytes)
            .map_err(|source| Error::ConfigInvalid { path: path.to_path_buf(), source })?;

        cache.insert(path.to_path_buf(), CachedConfig { mtime, parsed: parsed.clone() });
        Ok(parsed)
    }

    /// Walks the project tree to confirm a configuration file exists
    /// somewhere reachable; used by callers that want to fail fast before
    /// starting a watch session.
    pub fn has_any_config(&self) -> bool {
        WalkDir::new(&self.project_root)
            .into_iter()
            .filter_map(|e| e.ok())
            .any(|e| e.file_name() == CONFIG_FILE_NAME)
    }
}

/// Applies the SFC-specific technical overlay: enables
/// template-compatible JSX mode, a default module-resolution strategy, and
/// DOM lib types, without overriding any value the user set explicitly.
fn apply_overlay(raw: ProjectConfig, kind: SourceKind) -> EffectiveOptions {
    let jsx_mode_was_unset = raw.jsx_mode.is_none();
    let module_resolution_was_unset = raw.module_resolution.is_none();
    let mut jsx_mode = raw.jsx_mode.unwrap_or_else(|| "preserve".to_string());
    let mut module_resolution = raw.module_resolution.unwrap_or_else(|| "node".to_string());
    let mut lib = raw.lib;

    if kind == SourceKind::Sfc {
        if jsx_mode_was_unset {
            jsx_mode = "template-compatible".to_string();
        }
        if module_resolution_was_unset {
            module_resolution = "bundler".to_string();
        }
        if !lib.iter().any(|l| l == "DOM") {
            lib.push("DOM".to_string());
        }
    }

    EffectiveOptions {
        alias_map: raw.alias_map,
        production: raw.production,
        type_check: raw.type_check,
        jsx_mode,
        module_resolution,
        lib,
        production_library_urls: raw.production_library_urls,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join(CONFIG_FILE_NAME);
        let mut f = fs::File::create(&path).unwrap();
        f.write_all(body.as_bytes()).unwrap();
        path
    }

    #[test]
    fn missing_config_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let loader = ConfigLoader::new(dir.path());
        let err = loader
            .effective_options(&dir.path().join("a.ts"), SourceKind::TypedScript)
            .unwrap_err();
        assert!(matches!(err, Error::ConfigMissing(_)));
    }

    #[test]
    fn invalid_config_reports_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        write_config(dir.path(), "{ not json");
        let loader = ConfigLoader::new(dir.path());
        let err = loader
            .effective_options(&dir.path().join("a.ts"), SourceKind::TypedScript)
            .unwrap_err();
        assert!(matches!(err, Error::ConfigInvalid { .. }));
    }

    #[test]
    fn sfc_overlay_adds_dom_lib_without_overriding_user_value() {
        let dir = tempfile::tempdir().unwrap();
        write_config(dir.path(), r#"{"lib": ["ES2020"]}"#);
        let loader = ConfigLoader::new(dir.path());
        let opts = loader
            .effective_options(&dir.path().join("a.sfc"), SourceKind::Sfc)
            .unwrap();
        assert!(opts.lib.contains(&"DOM".to_string()));
        assert!(opts.lib.contains(&"ES2020".to_string()));
        assert_eq!(opts.jsx_mode, "template-compatible");
    }

    #[test]
    fn user_set_jsx_mode_is_not_overridden() {
        let dir = tempfile::tempdir().unwrap();
        write_config(dir.path(), r#"{"jsx_mode": "react"}"#);
        let loader = ConfigLoader::new(dir.path());
        let opts = loader
            .effective_options(&dir.path().join("a.sfc"), SourceKind::Sfc)
            .unwrap();
        assert_eq!(opts.jsx_mode, "react");
    }

    #[test]
    fn explicit_default_value_is_not_reoverridden_by_sfc_overlay() {
        let dir = tempfile::tempdir().unwrap();
        write_config(dir.path(), r#"{"jsx_mode": "preserve", "module_resolution": "node"}"#);
        let loader = ConfigLoader::new(dir.path());
        let opts = loader
            .effective_options(&dir.path().join("a.sfc"), SourceKind::Sfc)
            .unwrap();
        assert_eq!(opts.jsx_mode, "preserve");
        assert_eq!(opts.module_resolution, "node");
    }

    #[test]
    fn unchanged_mtime_serves_from_cache() {
        let dir = tempfile::tempdir().unwrap();
        write_config(dir.path(), "{}");
        let loader = ConfigLoader::new(dir.path());
        let a = loader.effective_options(&dir.path().join("a.ts"), SourceKind::TypedScript).unwrap();
        let b = loader.effective_options(&dir.path().join("b.ts"), SourceKind::TypedScript).unwrap();
        assert_eq!(a.stable_hash(), b.stable_hash());
    }
}
