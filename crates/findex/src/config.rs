//! Tuning values for the indexing and search core.
//!
//! The debounce window, polling cadence, batch caps and throttle thresholds
//! are product tuning values, so they live here as configuration rather than
//! constants baked into call sites.

use std::time::Duration;

use serde::Deserialize;

/// Raw-event coalescing window.
pub const DEFAULT_DEBOUNCE_WINDOW_MS: u64 = 300;

/// Poll cadence when the native facility is unavailable.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 30_000;

/// Reconciliation poll cadence while the native strategy is active.
pub const DEFAULT_RECONCILE_INTERVAL_MS: u64 = 300_000;

/// Batch flush caps: whichever of size or age is hit first flushes.
pub const DEFAULT_BATCH_MAX_ENTRIES: usize = 512;
pub const DEFAULT_BATCH_MAX_AGE_MS: u64 = 200;

/// Indexing worker pool bound.
pub const DEFAULT_WORKER_COUNT: usize = 4;

/// Flush latency above this halves the effective worker count.
pub const DEFAULT_FLUSH_THROTTLE_MS: u64 = 250;

/// Failed batch commits retry with exponential backoff, then demote to rescan.
pub const DEFAULT_BATCH_RETRY_ATTEMPTS: u32 = 5;
pub const DEFAULT_BATCH_RETRY_BASE_MS: u64 = 50;

/// Ranking work is capped at this many candidates unless the caller pages past it.
pub const DEFAULT_RANK_CANDIDATE_CAP: usize = 1000;

pub const DEFAULT_PAGE_SIZE: usize = 50;

/// Graceful shutdown lets the in-flight batch finish within this bound.
pub const DEFAULT_SHUTDOWN_DRAIN_MS: u64 = 2_000;

/// A named cloud provider root. Entries under `prefix` carry the provider tag.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderRoot {
    pub name: String,
    pub prefix: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub debounce_window_ms: u64,
    pub poll_interval_ms: u64,
    pub reconcile_interval_ms: u64,
    pub batch_max_entries: usize,
    pub batch_max_age_ms: u64,
    pub worker_count: usize,
    pub flush_throttle_ms: u64,
    pub batch_retry_attempts: u32,
    pub batch_retry_base_ms: u64,
    pub rank_candidate_cap: usize,
    pub page_size: usize,
    pub shutdown_drain_ms: u64,
    /// Cloud provider roots for provider tagging.
    pub providers: Vec<ProviderRoot>,
    /// Files with this suffix are treated as online-only placeholders.
    pub placeholder_suffix: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            debounce_window_ms: DEFAULT_DEBOUNCE_WINDOW_MS,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            reconcile_interval_ms: DEFAULT_RECONCILE_INTERVAL_MS,
            batch_max_entries: DEFAULT_BATCH_MAX_ENTRIES,
            batch_max_age_ms: DEFAULT_BATCH_MAX_AGE_MS,
            worker_count: DEFAULT_WORKER_COUNT,
            flush_throttle_ms: DEFAULT_FLUSH_THROTTLE_MS,
            batch_retry_attempts: DEFAULT_BATCH_RETRY_ATTEMPTS,
            batch_retry_base_ms: DEFAULT_BATCH_RETRY_BASE_MS,
            rank_candidate_cap: DEFAULT_RANK_CANDIDATE_CAP,
            page_size: DEFAULT_PAGE_SIZE,
            shutdown_drain_ms: DEFAULT_SHUTDOWN_DRAIN_MS,
            providers: Vec::new(),
            placeholder_suffix: ".icloud".to_string(),
        }
    }
}

impl Config {
    pub fn debounce_window(&self) -> Duration {
        Duration::from_millis(self.debounce_window_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_millis(self.reconcile_interval_ms)
    }

    pub fn batch_max_age(&self) -> Duration {
        Duration::from_millis(self.batch_max_age_ms)
    }

    pub fn flush_throttle(&self) -> Duration {
        Duration::from_millis(self.flush_throttle_ms)
    }

    pub fn shutdown_drain(&self) -> Duration {
        Duration::from_millis(self.shutdown_drain_ms)
    }

    /// Looks up the provider tag for a path, if any configured root covers it.
    pub fn provider_for(&self, path: &str) -> Option<&str> {
        self.providers
            .iter()
            .find(|provider| {
                path == provider.prefix
                    || path
                        .strip_prefix(provider.prefix.as_str())
                        .is_some_and(|rest| rest.starts_with('/'))
            })
            .map(|provider| provider.name.as_str())
    }
}
