//! Compilation cache: a keyed artifact store with a dependency graph and
//! cascade invalidation. Generalized from per-version artifact sets to
//! single-artifact cache entries keyed by the tuple in
//! [`crate::cache::key::CacheKey`].

pub mod key;
pub mod graph;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Instant;

use parking_lot::Mutex;
use tracing::{debug, instrument, warn};

pub use graph::DependencyGraph;
pub use key::{hash_bytes, CacheKey};

use crate::error::{Error, Result};

/// Default bound on the number of resident cache entries.
pub const DEFAULT_CAPACITY: usize = 500;

#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: CacheKey,
    pub artifact: String,
    pub declared_dependencies: Vec<PathBuf>,
    pub created_at: Instant,
    pub last_hit_at: Instant,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub clears: u64,
    pub entries: usize,
}

struct Inner {
    entries: HashMap<CacheKey, CacheEntry>,
    /// Recency order, most-recently-used at the back. A key appears at most
    /// once; reinsertion moves it to the back.
    lru: Vec<CacheKey>,
    /// Maps a source file to the cache key it is currently stored under, so
    /// that cascade invalidation (keyed by path) can find the entry.
    by_path: HashMap<PathBuf, CacheKey>,
    graph: DependencyGraph,
    capacity: usize,
    stats: CacheStats,
}

impl Inner {
    fn touch_lru(&mut self, key: &CacheKey) {
        if let Some(pos) = self.lru.iter().position(|k| k == key) {
            self.lru.remove(pos);
        }
        self.lru.push(key.clone());
    }

    fn evict_one(&mut self) {
        if let Some(victim) = self.lru.first().cloned() {
            self.remove_entry(&victim);
            self.stats.evictions += 1;
        }
    }

    fn remove_entry(&mut self, key: &CacheKey) -> Option<CacheEntry> {
        if let Some(pos) = self.lru.iter().position(|k| k == key) {
            self.lru.remove(pos);
        }
        let entry = self.entries.remove(key);
        self.by_path.retain(|_, v| v != key);
        entry
    }
}

/// A content-addressed, dependency-aware artifact cache.
///
/// All mutation goes through a single mutex, matching the "single logical
/// critical section; readers may proceed lock-free against a consistent
/// snapshot, but writers serialize: every operation takes the lock, but
/// the lock is held only for the duration of one map operation, never
/// across an `.await`.
pub struct CompilationCache {
    inner: Mutex<Inner>,
}

impl CompilationCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                lru: Vec::new(),
                by_path: HashMap::new(),
                graph: DependencyGraph::new(),
                capacity: capacity.max(1),
                stats: CacheStats::default(),
            }),
        }
    }

    #[instrument(level = "debug", skip(self))]
    pub fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
        let mut inner = self.inner.lock();
        if let Some(entry) = inner.entries.get_mut(key) {
            entry.last_hit_at = Instant::now();
            let entry = entry.clone();
            inner.touch_lru(key);
            inner.stats.hits += 1;
            Some(entry)
        } else {
            inner.stats.misses += 1;
            None
        }
    }

    /// Stores a freshly compiled artifact along with the file's declared
    /// dependencies, updating the dependency graph atomically with the
    /// store, updated atomically whenever an artifact is stored.
    #[instrument(level = "debug", skip(self, artifact, deps))]
    pub fn put(&self, source_path: &Path, key: CacheKey, artifact: String, deps: Vec<PathBuf>) {
        let mut inner = self.inner.lock();

        if let Some(old_key) = inner.by_path.get(source_path).cloned() {
            if old_key != key {
                inner.remove_entry(&old_key);
            }
        }

        inner.graph.set_dependencies(source_path, deps.iter().cloned());
        inner.by_path.insert(source_path.to_path_buf(), key.clone());

        let now = Instant::now();
        inner.entries.insert(
            key.clone(),
            CacheEntry {
                key: key.clone(),
                artifact,
                declared_dependencies: deps,
                created_at: now,
                last_hit_at: now,
            },
        );
        inner.touch_lru(&key);
        inner.stats.entries = inner.entries.len();

        while inner.entries.len() > inner.capacity {
            inner.evict_one();
        }
        inner.stats.entries = inner.entries.len();
    }

    /// Evicts the cache entry stored for `path`, if any, without touching
    /// its dependents.
    #[instrument(level = "debug", skip(self))]
    pub fn invalidate(&self, path: &Path) {
        let mut inner = self.inner.lock();
        if let Some(key) = inner.by_path.get(path).cloned() {
            inner.remove_entry(&key);
        }
        inner.graph.remove(path);
        inner.stats.entries = inner.entries.len();
    }

    /// BFS cascade invalidation from `path` over the reverse-dependency
    /// graph. Returns the set of paths evicted.
    #[instrument(level = "debug", skip(self))]
    pub fn invalidate_cascade(&self, path: &Path) -> Vec<PathBuf> {
        let mut inner = self.inner.lock();
        let cascade = inner.graph.cascade(path);
        for file in &cascade {
            if let Some(key) = inner.by_path.get(file).cloned() {
                inner.remove_entry(&key);
            }
        }
        inner.stats.entries = inner.entries.len();
        debug!(count = cascade.len(), "cascade invalidation complete");
        cascade
    }

    /// Drops every entry. Triggered by a project-manifest or
    /// installed-dependency-root change, or by a detected
    /// `CacheInconsistency`.
    #[instrument(level = "debug", skip(self))]
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.lru.clear();
        inner.by_path.clear();
        inner.graph = DependencyGraph::new();
        inner.stats.clears += 1;
        inner.stats.entries = 0;
    }

    /// Clears the cache and logs at warn level, for use when an internal
    /// invariant is found to be violated.
    pub fn force_clear_inconsistent(&self, reason: &str) -> Error {
        warn!(reason, "cache inconsistency detected, clearing");
        self.clear();
        Error::CacheInconsistency(reason.to_string())
    }

    pub fn stats(&self) -> CacheStats {
        self.inner.lock().stats
    }

    pub fn dependents_of(&self, path: &Path) -> Vec<PathBuf> {
        self.inner.lock().graph.dependents_of(path).cloned().collect()
    }

    /// Returns a `Result` wrapper so callers that must propagate failure
    /// (rather than only observe it) can use `?` uniformly with other
    /// component operations.
    pub fn try_get(&self, key: &CacheKey) -> Result<Option<CacheEntry>> {
        Ok(self.get(key))
    }
}

impl Default for CompilationCache {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(name: &str) -> CacheKey {
        CacheKey::new(Path::new(name), 1, 2, 3, 4)
    }

    #[test]
    fn put_then_get_hits() {
        let cache = CompilationCache::new(10);
        let k = key("a.ts");
        cache.put(Path::new("a.ts"), k.clone(), "out".into(), vec![]);
        assert!(cache.get(&k).is_some());
        assert_eq!(cache.stats().hits, 1);
    }

    #[test]
    fn miss_is_recorded() {
        let cache = CompilationCache::new(10);
        assert!(cache.get(&key("missing.ts")).is_none());
        assert_eq!(cache.stats().misses, 1);
    }

    #[test]
    fn invalidating_a_dependency_evicts_dependent_entries() {
        let cache = CompilationCache::new(10);
        let k = key("a.ts");
        cache.put(Path::new("a.ts"), k.clone(), "out".into(), vec![PathBuf::from("b.ts")]);
        let evicted = cache.invalidate_cascade(Path::new("b.ts"));
        assert!(evicted.contains(&PathBuf::from("a.ts")));
        assert!(cache.get(&k).is_none());
    }

    #[test]
    fn eviction_respects_capacity_bound() {
        let cache = CompilationCache::new(2);
        for i in 0..5 {
            let name = format!("f{i}.ts");
            cache.put(Path::new(&name), key(&name), "out".into(), vec![]);
        }
        assert_eq!(cache.stats().entries, 2);
        assert!(cache.stats().evictions >= 3);
    }

    #[test]
    fn clear_resets_graph_and_entries() {
        let cache = CompilationCache::new(10);
        let k = key("a.ts");
        cache.put(Path::new("a.ts"), k.clone(), "out".into(), vec![PathBuf::from("b.ts")]);
        cache.clear();
        assert!(cache.get(&k).is_none());
        assert!(cache.dependents_of(Path::new("b.ts")).is_empty());
        assert_eq!(cache.stats().clears, 1);
    }
}
