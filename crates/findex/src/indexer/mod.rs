//! Incremental indexer.
//!
//! A worker pool drains the scan queue, stages entry writes through the
//! shared batcher, and a pump per root translates debounced watcher
//! messages into targeted index updates. All storage writes flow through
//! the batcher; nothing else mutates the store.

mod batch;
mod queue;
mod scan;

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::Receiver;
use parking_lot::{Mutex, RwLock};

pub use batch::{Batcher, Throttle};
pub use queue::ScanQueue;
pub use scan::{entry_from_fs, reconcile_missing, walk_subtree, ReconcileAction, MISS_LIMIT};

use crate::cancel::CancellationToken;
use crate::config::Config;
use crate::error::FindexError;
use crate::rules::RuleSet;
use crate::storage::{Predicate, QueryPlan, StorageAdapter};
use crate::types::{ChangeEvent, ChangeKind, EntryKind, RootId, ScanReason, ScanTask};
use crate::watcher::WatcherMessage;

/// Lifecycle of a watched root.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RootState {
    Uninitialized = 0,
    InitialScan = 1,
    SteadyState = 2,
    /// Watching or access is impaired; the index stays queryable.
    Degraded = 3,
    TornDown = 4,
}

impl RootState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Uninitialized => "uninitialized",
            Self::InitialScan => "initial-scan",
            Self::SteadyState => "steady-state",
            Self::Degraded => "degraded",
            Self::TornDown => "torn-down",
        }
    }

    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => Self::InitialScan,
            2 => Self::SteadyState,
            3 => Self::Degraded,
            4 => Self::TornDown,
            _ => Self::Uninitialized,
        }
    }
}

/// Per-root runtime shared between workers, the pump and the service.
pub struct RootRuntime {
    pub id: RootId,
    /// Canonical root path.
    pub path: String,
    pub rules: Arc<RuleSet>,
    state: AtomicU8,
    paused: AtomicBool,
    pending_events: AtomicUsize,
    last_error: Mutex<Option<String>>,
}

impl RootRuntime {
    fn new(id: RootId, path: String, rules: Arc<RuleSet>) -> Self {
        Self {
            id,
            path,
            rules,
            state: AtomicU8::new(RootState::Uninitialized as u8),
            paused: AtomicBool::new(false),
            pending_events: AtomicUsize::new(0),
            last_error: Mutex::new(None),
        }
    }

    pub fn state(&self) -> RootState {
        RootState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub fn set_state(&self, state: RootState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub fn last_error(&self) -> Option<String> {
        self.last_error.lock().clone()
    }

    fn record_error(&self, message: String) {
        log::warn!("root {:?} ({}): {message}", self.id, self.path);
        *self.last_error.lock() = Some(message);
    }
}

/// Health snapshot for one root.
#[derive(Debug, Clone)]
pub struct RootStatus {
    pub state: RootState,
    /// Queued scans plus change events not yet applied.
    pub lag: usize,
    pub last_error: Option<String>,
}

type RootMap = Arc<RwLock<HashMap<RootId, Arc<RootRuntime>>>>;

pub struct Indexer {
    config: Arc<Config>,
    store: Arc<dyn StorageAdapter>,
    queue: Arc<ScanQueue>,
    batcher: Arc<Batcher>,
    throttle: Arc<Throttle>,
    roots: RootMap,
    shutdown: Arc<AtomicBool>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl Indexer {
    /// Creates the indexer and starts its worker pool and flush timer.
    pub fn new(config: Arc<Config>, store: Arc<dyn StorageAdapter>) -> Arc<Self> {
        let queue = Arc::new(ScanQueue::new());
        let throttle = Arc::new(Throttle::new(config.worker_count, config.flush_throttle()));
        let roots: RootMap = Arc::new(RwLock::new(HashMap::new()));

        // A dropped batch demotes its paths to gap rescans; the data is
        // still on disk, so a rescan fully reconstructs it.
        let failure_queue = queue.clone();
        let failure_roots = roots.clone();
        let on_failure = Box::new(move |paths: &[String]| {
            let roots = failure_roots.read();
            for path in paths {
                let owner = roots
                    .values()
                    .find(|runtime| path_within(path, &runtime.path));
                if let Some(runtime) = owner {
                    failure_queue.push(ScanTask {
                        root: runtime.id,
                        path: PathBuf::from(path),
                        reason: ScanReason::RescanAfterGap,
                    });
                }
            }
        });

        let batcher = Arc::new(Batcher::new(
            store.clone(),
            &config,
            throttle.clone(),
            on_failure,
        ));

        let indexer = Arc::new(Self {
            config,
            store,
            queue,
            batcher,
            throttle,
            roots,
            shutdown: Arc::new(AtomicBool::new(false)),
            threads: Mutex::new(Vec::new()),
        });

        let mut threads = Vec::new();
        for index in 0..indexer.config.worker_count.max(1) {
            let worker = indexer.clone();
            threads.push(
                std::thread::Builder::new()
                    .name(format!("findex-worker-{index}"))
                    .spawn(move || worker.worker_loop(index))
                    .unwrap_or_else(|error| {
                        log::error!("worker spawn failed: {error}");
                        std::thread::spawn(|| {})
                    }),
            );
        }
        let flusher = indexer.clone();
        threads.push(
            std::thread::Builder::new()
                .name("findex-flush".to_string())
                .spawn(move || flusher.flush_loop())
                .unwrap_or_else(|error| {
                    log::error!("flush thread spawn failed: {error}");
                    std::thread::spawn(|| {})
                }),
        );
        *indexer.threads.lock() = threads;

        indexer
    }

    pub fn queue(&self) -> &Arc<ScanQueue> {
        &self.queue
    }

    pub fn throttle(&self) -> &Throttle {
        &self.throttle
    }

    /// Registers a root and enqueues its initial full scan.
    pub fn register_root(
        &self,
        id: RootId,
        path: String,
        rules: Arc<RuleSet>,
    ) -> Arc<RootRuntime> {
        let runtime = Arc::new(RootRuntime::new(id, path.clone(), rules));
        runtime.set_state(RootState::InitialScan);
        self.roots.write().insert(id, runtime.clone());
        self.queue.push(ScanTask {
            root: id,
            path: PathBuf::from(path),
            reason: ScanReason::Initial,
        });
        runtime
    }

    /// Tears a root down and purges its entries from storage.
    pub fn unregister_root(&self, id: RootId) {
        let Some(runtime) = self.roots.write().remove(&id) else {
            return;
        };
        runtime.set_state(RootState::TornDown);
        self.queue.discard_root(id);
        self.purge_subtree(&runtime.path);
        self.batcher.flush();
    }

    /// Pauses indexing for a root. Change events arriving while paused
    /// are discarded; resume repairs via a gap rescan.
    pub fn pause_root(&self, id: RootId) {
        if let Some(runtime) = self.roots.read().get(&id) {
            runtime.paused.store(true, Ordering::SeqCst);
        }
    }

    pub fn resume_root(&self, id: RootId) {
        let Some(runtime) = self.roots.read().get(&id).cloned() else {
            return;
        };
        runtime.paused.store(false, Ordering::SeqCst);
        self.queue.push(ScanTask {
            root: id,
            path: PathBuf::from(&runtime.path),
            reason: ScanReason::RescanAfterGap,
        });
    }

    /// Flips the stale marker on every entry under a root. Set when the
    /// root's access grant stops resolving, cleared on reacquisition.
    pub fn set_root_stale(&self, id: RootId, stale: bool) {
        let Some(runtime) = self.roots.read().get(&id).cloned() else {
            return;
        };
        runtime.set_state(if stale {
            RootState::Degraded
        } else {
            RootState::SteadyState
        });
        let plan =
            QueryPlan::scan_all().with_predicate(Predicate::PathPrefix(runtime.path.clone()));
        match self.store.execute(&plan, &CancellationToken::noop()) {
            Ok(Some(entries)) => {
                let updates: Vec<_> = entries
                    .into_iter()
                    .filter(|entry| entry.stale != stale)
                    .map(|mut entry| {
                        entry.stale = stale;
                        entry
                    })
                    .collect();
                if !updates.is_empty() {
                    self.batcher.stage_upserts(updates);
                    self.batcher.flush();
                }
            }
            Ok(None) => {}
            Err(error) => runtime.record_error(format!("stale sweep: {error}")),
        }
    }

    pub fn root_status(&self, id: RootId) -> Option<RootStatus> {
        let runtime = self.roots.read().get(&id).cloned()?;
        Some(RootStatus {
            state: runtime.state(),
            lag: self.queue.pending_for(id) + runtime.pending_events.load(Ordering::SeqCst),
            last_error: runtime.last_error(),
        })
    }

    /// Spawns the pump thread consuming one root's watcher output.
    pub fn spawn_pump(
        self: &Arc<Self>,
        id: RootId,
        messages: Receiver<WatcherMessage>,
    ) -> JoinHandle<()> {
        let indexer = self.clone();
        std::thread::Builder::new()
            .name("findex-pump".to_string())
            .spawn(move || {
                while let Ok(message) = messages.recv() {
                    indexer.handle_message(id, message);
                }
            })
            .unwrap_or_else(|error| {
                log::error!("pump spawn failed: {error}");
                std::thread::spawn(|| {})
            })
    }

    /// Applies one debounced watcher message to the index.
    pub fn handle_message(&self, id: RootId, message: WatcherMessage) {
        let Some(runtime) = self.roots.read().get(&id).cloned() else {
            return;
        };
        if runtime.state() == RootState::TornDown {
            return;
        }
        match message {
            WatcherMessage::Events(events) => {
                if runtime.is_paused() {
                    return;
                }
                runtime
                    .pending_events
                    .fetch_add(events.len(), Ordering::SeqCst);
                for event in events {
                    self.apply_change(&runtime, event);
                    runtime.pending_events.fetch_sub(1, Ordering::SeqCst);
                }
            }
            // Lost events mean unknown state under the root. Rescan and
            // reconcile; never infer deletions from the gap itself.
            WatcherMessage::OverflowGap => {
                runtime.record_error(
                    FindexError::OverflowGap(runtime.path.clone()).to_string(),
                );
                self.queue.push(ScanTask {
                    root: id,
                    path: PathBuf::from(&runtime.path),
                    reason: ScanReason::RescanAfterGap,
                });
            }
            WatcherMessage::Error(message) => {
                runtime.set_state(RootState::Degraded);
                runtime.record_error(message);
            }
        }
    }

    /// Blocks new work, drains the queue within the configured budget
    /// and commits the final batch. Tasks still queued when the budget
    /// runs out are abandoned; the next initial scan rediscovers them.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.queue.close();
        let deadline = Instant::now() + self.config.shutdown_drain();
        let threads = std::mem::take(&mut *self.threads.lock());
        let mut abandoned = false;
        for handle in threads {
            while !handle.is_finished() && Instant::now() < deadline {
                std::thread::sleep(Duration::from_millis(5));
            }
            if !handle.is_finished() && !abandoned {
                abandoned = true;
                let dropped = self.queue.clear();
                if dropped > 0 {
                    log::warn!("shutdown drain timed out; {dropped} queued scans abandoned");
                }
            }
            // The in-flight task still finishes and its batch commits.
            let _ = handle.join();
        }
        self.batcher.flush();
    }

    fn worker_loop(&self, index: usize) {
        loop {
            if !self.throttle.admits(index) {
                if self.shutdown.load(Ordering::SeqCst) {
                    break;
                }
                std::thread::sleep(Duration::from_millis(50));
                continue;
            }
            match self.queue.pop() {
                Some(task) => self.process_task(task),
                None => break,
            }
        }
    }

    fn flush_loop(&self) {
        let tick = self.config.batch_max_age().max(Duration::from_millis(50)) / 2;
        while !self.shutdown.load(Ordering::SeqCst) {
            std::thread::sleep(tick);
            self.batcher.flush_if_aged();
        }
    }

    fn process_task(&self, task: ScanTask) {
        let Some(runtime) = self.roots.read().get(&task.root).cloned() else {
            return;
        };
        if runtime.state() == RootState::TornDown || runtime.is_paused() {
            return;
        }

        let mut observed = HashSet::new();
        let mut staged: Vec<_> = Vec::with_capacity(128);
        walk_subtree(&task.path, &runtime.rules, &self.config, &mut |entry| {
            observed.insert(entry.path.clone());
            staged.push(entry);
        });
        self.batcher.stage_upserts(staged);

        // Full and gap scans also reconcile: stored entries the walk did
        // not observe accrue a miss, then get purged.
        if matches!(task.reason, ScanReason::Initial | ScanReason::RescanAfterGap) {
            let scan_root = task.path.to_string_lossy();
            match scan::reconcile_subtree(self.store.as_ref(), &scan_root, &observed) {
                Ok((updates, purges)) => {
                    self.batcher.stage_upserts(updates);
                    for path in purges {
                        self.batcher.stage_purge(path);
                    }
                }
                Err(error) => runtime.record_error(format!("reconcile: {error}")),
            }
        }

        if task.reason == ScanReason::Initial
            && runtime.state() == RootState::InitialScan
            && self.queue.pending_for(task.root) == 0
        {
            self.batcher.flush();
            runtime.set_state(RootState::SteadyState);
            log::info!(
                "initial scan complete for {:?} ({} entries indexed)",
                task.root,
                self.store.entry_count()
            );
        }
    }

    fn apply_change(&self, runtime: &RootRuntime, event: ChangeEvent) {
        match event.kind {
            ChangeKind::Created | ChangeKind::Modified | ChangeKind::MetadataOnly => {
                self.apply_upsert(runtime, &event.path, event.kind == ChangeKind::Created);
            }
            ChangeKind::Removed => self.purge_subtree(&event.path),
            ChangeKind::Renamed { from, to } => self.apply_rename(runtime, &from, &to),
        }
    }

    fn apply_upsert(&self, runtime: &RootRuntime, path: &str, created: bool) {
        match entry_from_fs(Path::new(path), &self.config) {
            Ok(entry) => {
                let new_directory = created
                    && entry.kind == EntryKind::Directory
                    && self.store.get(path).is_none();
                self.batcher.stage_upsert(entry);
                // A directory that appeared wholesale (moved in, unpacked)
                // needs its contents scanned, not just itself.
                if new_directory {
                    self.queue.push(ScanTask {
                        root: runtime.id,
                        path: PathBuf::from(path),
                        reason: ScanReason::Incremental,
                    });
                }
            }
            // Interrupted or timed-out stats are worth another attempt.
            Err(FindexError::TransientIo(reason)) => {
                log::debug!("transient stat failure for {path}: {reason}");
                self.queue.push(ScanTask {
                    root: runtime.id,
                    path: PathBuf::from(path),
                    reason: ScanReason::Incremental,
                });
            }
            // The path vanished between the event and the stat.
            Err(_) => self.purge_subtree(path),
        }
    }

    /// Tombstones everything under `path` and stages the purges. The
    /// tombstones keep the entries out of query results even when the
    /// purge lands in a later batch.
    fn purge_subtree(&self, path: &str) {
        // Creates for this subtree may still be sitting un-flushed in
        // the staging buffer; drop them before they can commit.
        for staged in self.batcher.retract_staged(path) {
            self.batcher.stage_purge(staged.path);
        }
        let plan = QueryPlan::scan_all().with_predicate(Predicate::PathPrefix(path.to_string()));
        let doomed = match self.store.execute(&plan, &CancellationToken::noop()) {
            Ok(Some(entries)) => entries,
            _ => Vec::new(),
        };
        let mut saw_anchor = false;
        for mut entry in doomed {
            saw_anchor |= entry.path == path;
            entry.tombstone = true;
            let target = entry.path.clone();
            self.batcher.stage_upsert(entry);
            self.batcher.stage_purge(target);
        }
        // The subtree query skips tombstoned entries; an anchor that was
        // already tombstoned still needs its purge staged.
        if !saw_anchor && self.store.get(path).is_some() {
            self.batcher.stage_purge(path.to_string());
        }
    }

    fn apply_rename(&self, runtime: &RootRuntime, from: &str, to: &str) {
        let existing = self.store.get(from);
        // Writes for the source still staged un-flushed must not commit
        // under the old path.
        let staged = self.batcher.retract_staged(from);
        let Some(existing) = existing else {
            // Source never committed; restage anything caught in the
            // buffer under the destination and index it fresh.
            for mut entry in staged {
                if entry.path == from {
                    continue;
                }
                if let Some(rest) = entry.path.strip_prefix(from) {
                    entry.path = format!("{to}{rest}");
                    self.batcher.stage_upsert(entry);
                }
            }
            self.apply_upsert(runtime, to, true);
            return;
        };

        match entry_from_fs(Path::new(to), &self.config) {
            Ok(mut fresh) => {
                // Carrying the id across the path change preserves entry
                // identity through the rename.
                fresh.id = existing.id;
                let was_directory = existing.kind == EntryKind::Directory;
                self.batcher.stage_upsert(fresh);
                for mut entry in staged {
                    if entry.path == from {
                        continue;
                    }
                    if let Some(rest) = entry.path.strip_prefix(from) {
                        entry.path = format!("{to}{rest}");
                        self.batcher.stage_upsert(entry);
                    }
                }

                if was_directory {
                    let plan = QueryPlan::scan_all()
                        .with_predicate(Predicate::PathPrefix(from.to_string()));
                    if let Ok(Some(descendants)) =
                        self.store.execute(&plan, &CancellationToken::noop())
                    {
                        for mut descendant in descendants {
                            if descendant.id == existing.id {
                                continue;
                            }
                            if let Some(rest) = descendant.path.strip_prefix(from) {
                                descendant.path = format!("{to}{rest}");
                                self.batcher.stage_upsert(descendant);
                            }
                        }
                    }
                }
            }
            Err(_) => self.purge_subtree(from),
        }
    }
}

/// True when `path` equals `root` or sits beneath it.
fn path_within(path: &str, root: &str) -> bool {
    path == root
        || path
            .strip_prefix(root)
            .is_some_and(|rest| rest.starts_with('/'))
}
