//! Watch Dispatcher: turns filesystem events into debounced, batched
//! compilation jobs.
//!
//! Uses a debounce-map-plus-periodic-sweep pattern, extended with
//! compatible-action collapse rules beyond a simpler overwrite-by-latest-
//! event scheme.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use glob::Pattern;
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;
use tracing::{debug, instrument, warn};

use crate::hmr::HmrDirective;
use crate::source::normalize_path;

pub const DEBOUNCE_DELAY: Duration = Duration::from_millis(300);
pub const BATCH_SIZE: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeAction {
    Add,
    Change,
    Unlink,
}

#[derive(Debug, Clone)]
pub struct PendingChange {
    pub path: PathBuf,
    pub action: ChangeAction,
    pub enqueued_at: Instant,
}

/// Merges an incoming action into an existing queued one per the
/// compatibility rules: add/change collapse into the newer one, unlink
/// dominates, and add-after-unlink resets to add.
fn merge_action(existing: ChangeAction, incoming: ChangeAction) -> ChangeAction {
    use ChangeAction::*;
    match (existing, incoming) {
        (Unlink, Add) => Add,
        (Unlink, Change) => Unlink,
        (_, Unlink) => Unlink,
        (_, Add) => Add,
        (_, Change) => Change,
    }
}

struct PendingMap {
    changes: HashMap<PathBuf, PendingChange>,
}

impl PendingMap {
    fn new() -> Self {
        Self { changes: HashMap::new() }
    }

    fn record(&mut self, path: PathBuf, action: ChangeAction) {
        self.changes
            .entry(path.clone())
            .and_modify(|existing| {
                existing.action = merge_action(existing.action, action);
                existing.enqueued_at = Instant::now();
            })
            .or_insert(PendingChange { path, action, enqueued_at: Instant::now() });
    }

    fn take_ready(&mut self, debounce: Duration) -> Vec<PendingChange> {
        let now = Instant::now();
        let ready_paths: Vec<PathBuf> = self
            .changes
            .iter()
            .filter(|(_, change)| now.duration_since(change.enqueued_at) >= debounce)
            .map(|(path, _)| path.clone())
            .collect();

        ready_paths.into_iter().filter_map(|path| self.changes.remove(&path)).collect()
    }
}

/// The outcome of processing one debounced batch: per-file compile
/// outcomes are the caller's concern; the dispatcher's own job is to
/// decide *which* files to hand off and to emit a reload directive for
/// additional-watch-only files directly.
#[derive(Debug, Default)]
pub struct BatchOutcome {
    pub to_compile: Vec<PathBuf>,
    pub deleted: Vec<PathBuf>,
    pub reload_only: Vec<HmrDirective>,
}

pub struct WatchDispatcher {
    pending: Mutex<PendingMap>,
    additional_watch_globs: Vec<Pattern>,
    batch_in_flight: Mutex<bool>,
}

impl WatchDispatcher {
    pub fn new(additional_watch_globs: &[String]) -> Self {
        let additional_watch_globs = additional_watch_globs
            .iter()
            .filter_map(|g| Pattern::new(g).ok())
            .collect();
        Self { pending: Mutex::new(PendingMap::new()), additional_watch_globs, batch_in_flight: Mutex::new(false) }
    }

    /// Records one filesystem event into the pending-change map for
    /// debouncing. Never drops an event: a path already queued has its
    /// entry updated in place per the compatibility rules.
    pub fn record_event(&self, path: PathBuf, action: ChangeAction) {
        let path = normalize_path(path);
        self.pending.lock().record(path, action);
    }

    /// Drains every change that has been stable for at least
    /// [`DEBOUNCE_DELAY`], partitions unlinks out for sequential handling
    /// first, and chunks the remainder into [`BATCH_SIZE`]-sized groups
    /// New events recorded while this batch is in flight land in a fresh
    /// pending map.
    #[instrument(level = "debug", skip(self))]
    pub fn drain_batch(&self) -> BatchOutcome {
        *self.batch_in_flight.lock() = true;
        let ready = self.pending.lock().take_ready(DEBOUNCE_DELAY);
        *self.batch_in_flight.lock() = false;

        let mut outcome = BatchOutcome::default();
        for change in ready {
            if self.matches_additional_watch_only(&change.path) {
                outcome.reload_only.push(HmrDirective::FullReload { reason: "watched asset changed".to_string() });
                continue;
            }
            match change.action {
                ChangeAction::Unlink => outcome.deleted.push(change.path),
                ChangeAction::Add | ChangeAction::Change => outcome.to_compile.push(change.path),
            }
        }
        outcome
    }

    fn matches_additional_watch_only(&self, path: &Path) -> bool {
        self.additional_watch_globs.iter().any(|g| g.matches_path(path))
    }

    /// Splits a list of paths into `BATCH_SIZE`-bounded chunks for
    /// all-settled concurrent processing.
    pub fn chunk(paths: &[PathBuf]) -> impl Iterator<Item = &[PathBuf]> {
        paths.chunks(BATCH_SIZE)
    }
}

/// Thin wrapper over `notify`'s recommended watcher translating its event
/// kinds into [`ChangeAction`] and forwarding them into a
/// [`WatchDispatcher`]. The OS watch loop itself is started by the
/// embedder; this type only owns the `notify` handle and the translation
/// logic.
pub struct FsWatcher {
    _watcher: RecommendedWatcher,
}

impl FsWatcher {
    pub fn watch(roots: &[PathBuf], dispatcher: std::sync::Arc<WatchDispatcher>) -> notify::Result<Self> {
        let mut watcher = notify::recommended_watcher(move |event: notify::Result<notify::Event>| {
            let Ok(event) = event else {
                warn!(?event, "watch error");
                return;
            };
            let action = match event.kind {
                notify::EventKind::Create(_) => ChangeAction::Add,
                notify::EventKind::Remove(_) => ChangeAction::Unlink,
                notify::EventKind::Modify(_) => ChangeAction::Change,
                _ => return,
            };
            for path in event.paths {
                debug!(?path, ?action, "watch event");
                dispatcher.record_event(path, action);
            }
        })?;

        for root in roots {
            watcher.watch(root, RecursiveMode::Recursive)?;
        }

        Ok(Self { _watcher: watcher })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_and_change_collapse() {
        let mut map = PendingMap::new();
        map.record(PathBuf::from("a.ts"), ChangeAction::Add);
        map.record(PathBuf::from("a.ts"), ChangeAction::Change);
        assert_eq!(map.changes[&PathBuf::from("a.ts")].action, ChangeAction::Change);
    }

    #[test]
    fn unlink_dominates() {
        let mut map = PendingMap::new();
        map.record(PathBuf::from("a.ts"), ChangeAction::Change);
        map.record(PathBuf::from("a.ts"), ChangeAction::Unlink);
        assert_eq!(map.changes[&PathBuf::from("a.ts")].action, ChangeAction::Unlink);
    }

    #[test]
    fn add_after_unlink_resets_to_add() {
        let mut map = PendingMap::new();
        map.record(PathBuf::from("a.ts"), ChangeAction::Unlink);
        map.record(PathBuf::from("a.ts"), ChangeAction::Add);
        assert_eq!(map.changes[&PathBuf::from("a.ts")].action, ChangeAction::Add);
    }

    #[test]
    fn fifty_rapid_edits_collapse_to_one_pending_change() {
        let dispatcher = WatchDispatcher::new(&[]);
        for _ in 0..50 {
            dispatcher.record_event(PathBuf::from("a.ts"), ChangeAction::Change);
        }
        assert_eq!(dispatcher.pending.lock().changes.len(), 1);
    }

    #[test]
    fn additional_watch_glob_skips_compilation() {
        let dispatcher = WatchDispatcher::new(&["public/**/*.html".to_string()]);
        dispatcher.record_event(PathBuf::from("public/index.html"), ChangeAction::Change);
        std::thread::sleep(Duration::from_millis(1));
        // Force readiness for the test without waiting out the real debounce.
        let mut pending = dispatcher.pending.lock();
        if let Some(change) = pending.changes.get_mut(&PathBuf::from("public/index.html")) {
            change.enqueued_at = Instant::now() - DEBOUNCE_DELAY * 2;
        }
        drop(pending);
        let outcome = dispatcher.drain_batch();
        assert!(outcome.to_compile.is_empty());
        assert_eq!(outcome.reload_only.len(), 1);
    }
}
