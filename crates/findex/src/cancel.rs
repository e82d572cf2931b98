//! Cancellation tokens for search execution.
//!
//! Each incremental search bumps a shared version counter; tokens created
//! for an older version report as cancelled the next time they are checked.
//! Long scan loops use `is_cancelled_sparse` so the atomic read happens only
//! every `CANCEL_CHECK_INTERVAL` iterations.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// How often tight loops check for cancellation. Power of 2 so the modulo
/// is a bitwise AND.
pub const CANCEL_CHECK_INTERVAL: usize = 0x10000;

/// Tracks the active search version.
///
/// Calling `next_version()` starts a new search generation and thereby
/// cancels every in-flight search holding a token for an older version.
#[derive(Debug, Default)]
pub struct SearchVersionTracker {
    active_version: Arc<AtomicU64>,
}

impl SearchVersionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Increments the active version and returns the new version number.
    pub fn next_version(&self) -> u64 {
        self.active_version.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Returns the current active version without incrementing.
    pub fn current_version(&self) -> u64 {
        self.active_version.load(Ordering::SeqCst)
    }

    /// Creates a cancellation token bound to the given version.
    pub fn token_for_version(&self, version: u64) -> CancellationToken {
        CancellationToken {
            active_version: self.active_version.clone(),
            version,
        }
    }
}

/// A cancellation token checked cooperatively between execution stages.
#[derive(Clone, Debug)]
pub struct CancellationToken {
    active_version: Arc<AtomicU64>,
    version: u64,
}

impl CancellationToken {
    /// A token that is never cancelled. Used for one-shot searches and tests.
    pub fn noop() -> Self {
        Self {
            active_version: Arc::new(AtomicU64::new(0)),
            version: 0,
        }
    }

    /// Explicitly cancels this token's search. A no-op when a newer
    /// search has already superseded it, so cancelling a finished
    /// handle never disturbs the current search.
    pub fn cancel(&self) {
        let _ = self.active_version.compare_exchange(
            self.version,
            self.version + 1,
            Ordering::SeqCst,
            Ordering::Relaxed,
        );
    }

    /// Returns `Some(())` while still active, `None` once cancelled.
    /// The `Option` shape enables `?`-style early returns in scan loops.
    #[inline]
    pub fn is_cancelled(&self) -> Option<()> {
        if self.version != self.active_version.load(Ordering::Relaxed) {
            None
        } else {
            Some(())
        }
    }

    /// Sparse check: reads the atomic only every `CANCEL_CHECK_INTERVAL`
    /// iterations of a tight loop.
    #[inline]
    pub fn is_cancelled_sparse(&self, counter: usize) -> Option<()> {
        if counter & (CANCEL_CHECK_INTERVAL - 1) == 0 {
            self.is_cancelled()
        } else {
            Some(())
        }
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::noop()
    }
}
