//! Priority queue of scan tasks.
//!
//! Incremental change-driven scans outrank gap rescans, which outrank
//! initial full scans, so a large onboarding backlog never starves live
//! updates. Within a priority class tasks run in arrival order.
//!
//! Re-pushing a (root, path) pair already queued at an equal or higher
//! priority is a no-op; a higher-priority push supersedes the queued one
//! lazily, the stale heap node is skipped on pop.

use std::collections::{BinaryHeap, HashMap};
use std::path::PathBuf;

use parking_lot::{Condvar, Mutex};

use crate::types::{RootId, ScanTask};

#[derive(Debug, PartialEq, Eq)]
struct QueuedTask {
    priority: u8,
    seq: u64,
    task: ScanTask,
}

impl Ord for QueuedTask {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Max-heap: higher priority first, then earlier sequence.
        self.priority
            .cmp(&other.priority)
            .then(other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for QueuedTask {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug, Default)]
struct QueueInner {
    heap: BinaryHeap<QueuedTask>,
    /// Best (priority, seq) currently queued per (root, path). Heap nodes
    /// not matching this map are stale and dropped on pop.
    best: HashMap<(RootId, PathBuf), (u8, u64)>,
    seq: u64,
    closed: bool,
}

#[derive(Debug, Default)]
pub struct ScanQueue {
    inner: Mutex<QueueInner>,
    available: Condvar,
}

impl ScanQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueues a task. Returns false when the task was absorbed by an
    /// already-queued equal-or-better one, or the queue is closed.
    pub fn push(&self, task: ScanTask) -> bool {
        let priority = task.reason.priority();
        let mut inner = self.inner.lock();
        if inner.closed {
            return false;
        }
        let key = (task.root, task.path.clone());
        if let Some(&(queued_priority, _)) = inner.best.get(&key) {
            if queued_priority >= priority {
                return false;
            }
        }
        inner.seq += 1;
        let seq = inner.seq;
        inner.best.insert(key, (priority, seq));
        inner.heap.push(QueuedTask {
            priority,
            seq,
            task,
        });
        self.available.notify_one();
        true
    }

    /// Blocks for the next task. Returns `None` once the queue is closed
    /// and drained.
    pub fn pop(&self) -> Option<ScanTask> {
        let mut inner = self.inner.lock();
        loop {
            while let Some(queued) = inner.heap.pop() {
                let key = (queued.task.root, queued.task.path.clone());
                match inner.best.get(&key) {
                    Some(&(priority, seq))
                        if priority == queued.priority && seq == queued.seq =>
                    {
                        inner.best.remove(&key);
                        return Some(queued.task);
                    }
                    // Superseded by a later push.
                    _ => continue,
                }
            }
            if inner.closed {
                return None;
            }
            self.available.wait(&mut inner);
        }
    }

    /// Number of distinct queued tasks.
    pub fn len(&self) -> usize {
        self.inner.lock().best.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Queued tasks for one root, for lag reporting.
    pub fn pending_for(&self, root: RootId) -> usize {
        self.inner
            .lock()
            .best
            .keys()
            .filter(|(task_root, _)| *task_root == root)
            .count()
    }

    /// Drops all queued tasks for a root. Used on teardown.
    pub fn discard_root(&self, root: RootId) {
        self.inner
            .lock()
            .best
            .retain(|(task_root, _), _| *task_root != root);
    }

    /// Drops every queued task, returning how many were dropped. Used
    /// when a shutdown drain exceeds its budget.
    pub fn clear(&self) -> usize {
        let mut inner = self.inner.lock();
        let dropped = inner.best.len();
        inner.best.clear();
        inner.heap.clear();
        self.available.notify_all();
        dropped
    }

    /// Closes the queue; blocked consumers drain and then observe `None`.
    pub fn close(&self) {
        self.inner.lock().closed = true;
        self.available.notify_all();
    }
}
