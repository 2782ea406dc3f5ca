//! Worker Pool: a bounded pool dispatching type-check jobs to isolated
//! host instances, with first-fit scheduling, per-task timeouts,
//! recycling, and an in-process fallback.
//!
//! Built as a slot table with its own state machine so that, beyond plain
//! concurrency-capped dispatch, each slot can also be recycled and
//! time-bounded independently.

mod task;

pub use task::{AmbientShim, HeuristicTypeCheckHost, TypeCheckHost, TypeCheckResult, TypeCheckTask};

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use tracing::{debug, instrument, warn};

use crate::error::{Error, Result};

/// Default pool size bounds.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
pub const MAX_TIMEOUT: Duration = Duration::from_secs(60);
pub const MAX_TASKS_PER_WORKER: u32 = 50;
pub const RECYCLE_GRACE: Duration = Duration::from_secs(2);
pub const MAX_IN_FLIGHT_FOR_FALLBACK_AVOIDANCE: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationMode {
    Individual,
    Batch,
    Watch,
}

/// Pool size `N = clamp(cpu_count - 1, 2, 8)`, mode-adjusted per operation mode.
pub fn pool_size(cpu_count: usize, mode: OperationMode) -> usize {
    match mode {
        OperationMode::Batch => (cpu_count).clamp(1, 12),
        OperationMode::Watch => (cpu_count / 2).clamp(2, 6),
        OperationMode::Individual => (cpu_count.saturating_sub(1)).clamp(2, 8).min(4),
    }
}

/// Default-mode sizing (no operation-mode overlay): `clamp(cpu_count-1,2,8)`.
pub fn default_pool_size(cpu_count: usize) -> usize {
    cpu_count.saturating_sub(1).clamp(2, 8)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    Spawning,
    Idle,
    Busy,
    Recycling,
    Dead,
}

struct Slot {
    state: SlotState,
    in_flight: usize,
    served_task_count: u32,
    sender: Option<Sender<Job>>,
}

struct Job {
    task: TypeCheckTask,
    reply: Sender<TypeCheckResult>,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct PoolStats {
    pub slots: usize,
    pub idle: usize,
    pub busy: usize,
    pub recycling: usize,
    pub dead: usize,
    pub completed: u64,
    pub failed: u64,
    pub degraded: bool,
}

/// Bounded pool dispatching type-check tasks to worker threads, each
/// running a [`TypeCheckHost`] instance in isolation. The pool and its
/// workers share nothing mutable except the job/reply channels.
pub struct WorkerPool {
    slots: Vec<Mutex<Slot>>,
    host_factory: Arc<dyn Fn() -> Box<dyn TypeCheckHost> + Send + Sync>,
    task_counter: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    degraded: std::sync::atomic::AtomicBool,
}

impl WorkerPool {
    pub fn new(size: usize, host_factory: Arc<dyn Fn() -> Box<dyn TypeCheckHost> + Send + Sync>) -> Self {
        let size = size.max(1);
        let mut slots = Vec::with_capacity(size);
        for index in 0..size {
            let sender = spawn_worker(index, host_factory.clone());
            slots.push(Mutex::new(Slot { state: SlotState::Idle, in_flight: 0, served_task_count: 0, sender: Some(sender) }));
        }
        Self {
            slots,
            host_factory,
            task_counter: AtomicU64::new(0),
            completed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            degraded: std::sync::atomic::AtomicBool::new(false),
        }
    }

    pub fn with_default_host(size: usize) -> Self {
        Self::new(size, Arc::new(|| Box::new(HeuristicTypeCheckHost::default()) as Box<dyn TypeCheckHost>))
    }

    /// Like [`Self::with_default_host`], but discovers a project-supplied
    /// ambient shim once up front and shares it across every worker and the
    /// in-process fallback path.
    pub fn with_project_shim(size: usize, project_root: impl Into<std::path::PathBuf>) -> Self {
        let shim = AmbientShim::discover(&project_root.into());
        Self::new(size, Arc::new(move || Box::new(HeuristicTypeCheckHost::new(shim.clone())) as Box<dyn TypeCheckHost>))
    }

    fn next_task_id(&self, slot: usize) -> String {
        let n = self.task_counter.fetch_add(1, Ordering::Relaxed);
        let timestamp = n; // monotonic counter stands in for a wall-clock timestamp here
        format!("worker-{slot}-{n}-{timestamp}")
    }

    /// Dispatches a type-check task: first-fit over idle slots, else the
    /// least-loaded-but-not-overloaded slot, else a synchronous in-process
    /// fallback that must be semantically equivalent.
    #[instrument(level = "debug", skip(self, source, options), fields(file = %file.display()))]
    pub fn type_check(
        &self,
        file: std::path::PathBuf,
        source: String,
        kind: crate::source::SourceKind,
        options: crate::config::EffectiveOptions,
    ) -> Result<TypeCheckResult> {
        if self.degraded.load(Ordering::Relaxed) {
            return Ok(self.run_in_process(&file, &source, kind, &options));
        }

        let timeout = if source.len() > 200_000 { MAX_TIMEOUT } else { DEFAULT_TIMEOUT };

        if let Some(slot_index) = self.pick_idle_slot() {
            return self.dispatch_to_slot(slot_index, file, source, kind, options, timeout);
        }

        if let Some(slot_index) = self.pick_least_loaded_acceptable_slot() {
            return self.dispatch_to_slot(slot_index, file, source, kind, options, timeout);
        }

        debug!("no slot available, running type-check in process");
        Ok(self.run_in_process(&file, &source, kind, &options))
    }

    fn pick_idle_slot(&self) -> Option<usize> {
        self.slots.iter().position(|s| s.lock().state == SlotState::Idle)
    }

    fn pick_least_loaded_acceptable_slot(&self) -> Option<usize> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, s)| {
                let s = s.lock();
                s.state == SlotState::Busy && s.in_flight < MAX_IN_FLIGHT_FOR_FALLBACK_AVOIDANCE
            })
            .min_by_key(|(_, s)| s.lock().in_flight)
            .map(|(i, _)| i)
    }

    fn dispatch_to_slot(
        &self,
        slot_index: usize,
        file: std::path::PathBuf,
        source: String,
        kind: crate::source::SourceKind,
        options: crate::config::EffectiveOptions,
        timeout: Duration,
    ) -> Result<TypeCheckResult> {
        let task_id = self.next_task_id(slot_index);
        let task = TypeCheckTask { id: task_id.clone(), file: file.clone(), source, kind, options };

        let sender = {
            let mut slot = self.slots[slot_index].lock();
            if slot.state == SlotState::Recycling {
                return Err(Error::WorkerRecycling { slot: slot_index, task_id });
            }
            slot.state = SlotState::Busy;
            slot.in_flight += 1;
            slot.sender.clone()
        };

        let Some(sender) = sender else {
            return Err(Error::WorkerCrashed { slot: slot_index, message: "slot has no active handle".into() });
        };

        let (reply_tx, reply_rx) = bounded(1);
        if sender.send(Job { task, reply: reply_tx }).is_err() {
            self.mark_crashed(slot_index);
            return Err(Error::WorkerCrashed { slot: slot_index, message: "job channel closed".into() });
        }

        let result = match reply_rx.recv_timeout(timeout) {
            Ok(result) => {
                self.finish_task(slot_index);
                self.completed.fetch_add(1, Ordering::Relaxed);
                Ok(result)
            }
            Err(RecvTimeoutError::Timeout) => {
                self.finish_task(slot_index);
                self.failed.fetch_add(1, Ordering::Relaxed);
                Err(Error::TaskTimeout { task_id, elapsed_ms: timeout.as_millis() as u64 })
            }
            Err(RecvTimeoutError::Disconnected) => {
                self.mark_crashed(slot_index);
                self.failed.fetch_add(1, Ordering::Relaxed);
                Err(Error::WorkerCrashed { slot: slot_index, message: "worker dropped reply channel".into() })
            }
        };

        if result.is_ok() {
            self.maybe_recycle(slot_index, &file);
        }
        result
    }

    fn finish_task(&self, slot_index: usize) {
        let mut slot = self.slots[slot_index].lock();
        slot.in_flight = slot.in_flight.saturating_sub(1);
        slot.served_task_count += 1;
        if slot.in_flight == 0 && slot.state == SlotState::Busy {
            slot.state = SlotState::Idle;
        }
    }

    fn mark_crashed(&self, slot_index: usize) {
        let mut slot = self.slots[slot_index].lock();
        slot.in_flight = 0;
        slot.sender = None;
        slot.state = SlotState::Spawning;
        drop(slot);
        let sender = spawn_worker(slot_index, self.host_factory.clone());
        let mut slot = self.slots[slot_index].lock();
        slot.sender = Some(sender);
        slot.state = SlotState::Idle;
    }

    /// Recycles a slot after it has served `MAX_TASKS_PER_WORKER` tasks:
    /// waits for in-flight work to drain, then replaces the handle while
    /// preserving slot identity.
    fn maybe_recycle(&self, slot_index: usize, _file: &std::path::Path) {
        let should_recycle = {
            let slot = self.slots[slot_index].lock();
            slot.served_task_count >= MAX_TASKS_PER_WORKER && slot.state != SlotState::Recycling
        };
        if !should_recycle {
            return;
        }

        {
            let mut slot = self.slots[slot_index].lock();
            slot.state = SlotState::Recycling;
        }

        let deadline = Instant::now() + RECYCLE_GRACE;
        while Instant::now() < deadline {
            let drained = self.slots[slot_index].lock().in_flight == 0;
            if drained {
                break;
            }
            std::thread::sleep(Duration::from_millis(20));
        }

        let mut slot = self.slots[slot_index].lock();
        slot.sender = None;
        slot.state = SlotState::Spawning;
        drop(slot);

        let sender = spawn_worker(slot_index, self.host_factory.clone());
        let mut slot = self.slots[slot_index].lock();
        slot.sender = Some(sender);
        slot.served_task_count = 0;
        slot.state = SlotState::Idle;
    }

    /// Runs a type-check synchronously on the calling thread, bypassing the
    /// slot table entirely. Used for the pool's own fallback tiers and as
    /// the caller-side retry for pool-domain errors.
    pub(crate) fn run_in_process(
        &self,
        file: &std::path::Path,
        source: &str,
        kind: crate::source::SourceKind,
        options: &crate::config::EffectiveOptions,
    ) -> TypeCheckResult {
        let host = (self.host_factory)();
        let task = TypeCheckTask {
            id: "in-process".to_string(),
            file: file.to_path_buf(),
            source: source.to_string(),
            kind,
            options: options.clone(),
        };
        host.check(&task)
    }

    /// Enters permanent fallback mode: every subsequent call runs
    /// in-process, for use once the pool's own controller state is judged
    /// unrecoverable.
    pub fn enter_degraded_mode(&self) {
        warn!("worker pool entering degraded (in-process-only) mode");
        self.degraded.store(true, Ordering::Relaxed);
    }

    /// Cancels all timeouts, rejects pending tasks, terminates all worker
    /// handles, and clears internal state. Idempotent.
    pub fn terminate(&self) {
        for slot in &self.slots {
            let mut slot = slot.lock();
            slot.sender = None;
            slot.in_flight = 0;
            slot.state = SlotState::Dead;
        }
    }

    pub fn stats(&self) -> PoolStats {
        let mut stats = PoolStats {
            slots: self.slots.len(),
            degraded: self.degraded.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            ..Default::default()
        };
        for slot in &self.slots {
            match slot.lock().state {
                SlotState::Idle => stats.idle += 1,
                SlotState::Busy => stats.busy += 1,
                SlotState::Recycling => stats.recycling += 1,
                SlotState::Dead => stats.dead += 1,
                SlotState::Spawning => {}
            }
        }
        stats
    }
}

fn spawn_worker(slot_index: usize, host_factory: Arc<dyn Fn() -> Box<dyn TypeCheckHost> + Send + Sync>) -> Sender<Job> {
    let (tx, rx) = bounded::<Job>(4);
    std::thread::Builder::new()
        .name(format!("type-check-worker-{slot_index}"))
        .spawn(move || {
            let host = host_factory();
            while let Ok(job) = rx.recv() {
                let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| host.check(&job.task)))
                    .unwrap_or_default();
                let _ = job.reply.send(result);
            }
        })
        .expect("spawning a worker thread should not fail under normal OS resource limits");
    tx
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EffectiveOptions;
    use crate::source::SourceKind;

    fn opts() -> EffectiveOptions {
        EffectiveOptions {
            alias_map: vec![],
            production: false,
            type_check: true,
            jsx_mode: "preserve".into(),
            module_resolution: "node".into(),
            lib: vec![],
            production_library_urls: Default::default(),
        }
    }

    #[test]
    fn sizing_clamps_to_expected_bounds() {
        assert_eq!(default_pool_size(1), 2);
        assert_eq!(default_pool_size(16), 8);
        assert_eq!(pool_size(16, OperationMode::Batch), 12);
        assert_eq!(pool_size(1, OperationMode::Watch), 2);
    }

    #[test]
    fn dispatches_and_completes_a_task() {
        let pool = WorkerPool::with_default_host(2);
        let result = pool
            .type_check("a.ts".into(), "export const x = 1;".into(), SourceKind::TypedScript, opts())
            .unwrap();
        assert!(!result.has_errors);
        assert_eq!(pool.stats().completed, 1);
    }

    #[test]
    fn degraded_mode_runs_in_process() {
        let pool = WorkerPool::with_default_host(2);
        pool.enter_degraded_mode();
        let result = pool
            .type_check("a.ts".into(), "export const x = 1;".into(), SourceKind::TypedScript, opts())
            .unwrap();
        assert!(!result.has_errors);
        assert!(pool.stats().degraded);
    }

    #[test]
    fn terminate_marks_all_slots_dead() {
        let pool = WorkerPool::with_default_host(2);
        pool.terminate();
        assert_eq!(pool.stats().dead, 2);
    }
}
