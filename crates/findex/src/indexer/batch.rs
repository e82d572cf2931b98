//! Write batching and adaptive throttling.
//!
//! Workers stage upserts and purges in a shared buffer; whichever of the
//! size or age cap is hit first commits the batch to storage. Commit
//! latency feeds back into the effective worker count so a slow storage
//! device sheds indexing pressure instead of queueing unboundedly.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::config::Config;
use crate::error::FindexError;
use crate::storage::StorageAdapter;
use crate::types::IndexedEntry;

/// Callback invoked with the affected paths when a batch is dropped
/// after exhausting its retries.
pub type FailureHandler = Box<dyn Fn(&[String]) + Send + Sync>;

/// Adaptive worker admission.
///
/// Slow flushes halve the effective worker count (never below one);
/// fast flushes restore it one worker at a time.
#[derive(Debug)]
pub struct Throttle {
    configured: usize,
    effective: AtomicUsize,
    threshold: Duration,
}

impl Throttle {
    pub fn new(configured: usize, threshold: Duration) -> Self {
        let configured = configured.max(1);
        Self {
            configured,
            effective: AtomicUsize::new(configured),
            threshold,
        }
    }

    /// Whether the worker with this index may take work right now.
    pub fn admits(&self, worker_index: usize) -> bool {
        worker_index < self.effective.load(Ordering::Relaxed)
    }

    pub fn effective(&self) -> usize {
        self.effective.load(Ordering::Relaxed)
    }

    pub fn record_flush(&self, latency: Duration) {
        let current = self.effective.load(Ordering::Relaxed);
        let next = if latency > self.threshold {
            (current / 2).max(1)
        } else {
            (current + 1).min(self.configured)
        };
        self.effective.store(next, Ordering::Relaxed);
    }
}

#[derive(Debug, Default)]
struct BatchBuffer {
    upserts: Vec<IndexedEntry>,
    purges: Vec<String>,
    opened_at: Option<Instant>,
}

impl BatchBuffer {
    fn len(&self) -> usize {
        self.upserts.len() + self.purges.len()
    }

    fn is_empty(&self) -> bool {
        self.upserts.is_empty() && self.purges.is_empty()
    }

    fn take(&mut self) -> BatchBuffer {
        std::mem::take(self)
    }
}

/// Shared staging buffer in front of the storage adapter.
pub struct Batcher {
    store: Arc<dyn StorageAdapter>,
    buffer: Mutex<BatchBuffer>,
    throttle: Arc<Throttle>,
    max_entries: usize,
    max_age: Duration,
    retry_attempts: u32,
    retry_base: Duration,
    on_failure: FailureHandler,
}

impl Batcher {
    pub fn new(
        store: Arc<dyn StorageAdapter>,
        config: &Config,
        throttle: Arc<Throttle>,
        on_failure: FailureHandler,
    ) -> Self {
        Self {
            store,
            buffer: Mutex::new(BatchBuffer::default()),
            throttle,
            max_entries: config.batch_max_entries.max(1),
            max_age: config.batch_max_age(),
            retry_attempts: config.batch_retry_attempts,
            retry_base: Duration::from_millis(config.batch_retry_base_ms),
            on_failure,
        }
    }

    pub fn stage_upsert(&self, entry: IndexedEntry) {
        let ready = {
            let mut buffer = self.buffer.lock();
            buffer.opened_at.get_or_insert_with(Instant::now);
            buffer.upserts.push(entry);
            buffer.len() >= self.max_entries
        };
        if ready {
            self.flush();
        }
    }

    pub fn stage_upserts(&self, entries: Vec<IndexedEntry>) {
        let ready = {
            let mut buffer = self.buffer.lock();
            buffer.opened_at.get_or_insert_with(Instant::now);
            buffer.upserts.extend(entries);
            buffer.len() >= self.max_entries
        };
        if ready {
            self.flush();
        }
    }

    pub fn stage_purge(&self, path: String) {
        let ready = {
            let mut buffer = self.buffer.lock();
            buffer.opened_at.get_or_insert_with(Instant::now);
            buffer.purges.push(path);
            buffer.len() >= self.max_entries
        };
        if ready {
            self.flush();
        }
    }

    /// Removes staged upserts at or under `path` from the open batch
    /// and returns them. A removal must retract any not-yet-flushed
    /// create for the same path, or the later flush would resurrect it.
    pub fn retract_staged(&self, path: &str) -> Vec<IndexedEntry> {
        let mut buffer = self.buffer.lock();
        let mut retracted = Vec::new();
        let mut kept = Vec::with_capacity(buffer.upserts.len());
        for entry in buffer.upserts.drain(..) {
            let within = entry.path == path
                || entry
                    .path
                    .strip_prefix(path)
                    .is_some_and(|rest| rest.starts_with('/'));
            if within {
                retracted.push(entry);
            } else {
                kept.push(entry);
            }
        }
        buffer.upserts = kept;
        retracted
    }

    /// Flushes if the open batch has exceeded the age cap.
    pub fn flush_if_aged(&self) {
        let aged = {
            let buffer = self.buffer.lock();
            buffer
                .opened_at
                .is_some_and(|at| at.elapsed() >= self.max_age)
        };
        if aged {
            self.flush();
        }
    }

    /// Commits the staged batch, retrying transient failures with
    /// exponential backoff. A batch that cannot commit is dropped and
    /// its paths are handed to the failure handler for rescanning; data
    /// is reconstructible from the filesystem, so losing the write is
    /// recoverable while blocking forever is not.
    pub fn flush(&self) {
        let batch = {
            let mut buffer = self.buffer.lock();
            if buffer.is_empty() {
                buffer.opened_at = None;
                return;
            }
            buffer.take()
        };

        let started = Instant::now();
        let mut attempt = 0u32;
        loop {
            match self.commit(&batch) {
                Ok(()) => break,
                Err(error) if attempt + 1 < self.retry_attempts => {
                    let backoff = self.retry_base * 2u32.saturating_pow(attempt);
                    log::warn!(
                        "batch commit failed (attempt {}): {error}; retrying in {backoff:?}",
                        attempt + 1
                    );
                    std::thread::sleep(backoff);
                    attempt += 1;
                }
                Err(error) => {
                    let error = FindexError::StorageUnavailable(error.to_string());
                    log::error!(
                        "batch of {} writes dropped after {} attempts: {error}",
                        batch.len(),
                        self.retry_attempts
                    );
                    let mut paths: Vec<String> =
                        batch.upserts.iter().map(|entry| entry.path.clone()).collect();
                    paths.extend(batch.purges.iter().cloned());
                    (self.on_failure)(&paths);
                    return;
                }
            }
        }
        self.throttle.record_flush(started.elapsed());
    }

    fn commit(&self, batch: &BatchBuffer) -> crate::error::Result<()> {
        if !batch.upserts.is_empty() {
            self.store.upsert_batch(&batch.upserts)?;
        }
        if !batch.purges.is_empty() {
            self.store.delete_batch(&batch.purges)?;
        }
        Ok(())
    }
}
