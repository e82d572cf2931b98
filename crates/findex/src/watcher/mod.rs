//! Change watching for indexed roots.
//!
//! Each watched root runs a capture source (native OS notifications when
//! available, snapshot polling otherwise) feeding raw signals into a
//! debouncer thread, which emits coalesced [`WatcherMessage`] batches for
//! the indexer. Native watching additionally runs a slow polling pass as
//! reconciliation, so missed native events are eventually repaired.

mod debounce;
mod native;
mod polling;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{unbounded, Sender};

use crate::config::Config;
use crate::error::Result;
use crate::rules::RuleSet;
use crate::types::{ChangeEvent, EventSource};

pub use debounce::{run_debouncer, Debouncer};

/// A single raw filesystem observation, before debouncing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEvent {
    pub path: String,
    pub kind: RawEventKind,
    /// Inode when cheaply available. Used to pair removals with
    /// creations as renames.
    pub inode: Option<u64>,
    pub source: EventSource,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawEventKind {
    Created,
    Modified,
    MetadataOnly,
    Removed,
    /// The backend reported the rename itself, source path included.
    RenamedTo { from: String },
}

/// What capture sources send to the debouncer.
#[derive(Debug)]
pub enum RawSignal {
    Event(RawEvent),
    /// The OS event queue overflowed; buffered events may be incomplete.
    Overflow,
    Error(String),
}

/// Debounced output consumed by the indexer, one receiver per root.
#[derive(Debug)]
pub enum WatcherMessage {
    /// A coalesced batch, at most one change per path.
    Events(Vec<ChangeEvent>),
    /// Events were lost. The consumer must rescan; it must never treat
    /// the gap as deletions.
    OverflowGap,
    Error(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchStrategy {
    Native,
    Polling,
}

/// A running watcher for one root. Dropping or stopping it tears down
/// the capture source, the debouncer drains and exits on its own.
pub struct RootWatcher {
    strategy: WatchStrategy,
    stop: Arc<AtomicBool>,
    // Held to keep the OS subscription alive.
    native: Option<notify::RecommendedWatcher>,
    threads: Vec<JoinHandle<()>>,
}

impl RootWatcher {
    /// Starts watching `root`, preferring native notifications and
    /// falling back to polling when the backend cannot start.
    pub fn spawn(
        root: PathBuf,
        rules: Arc<RuleSet>,
        config: &Config,
        out_tx: Sender<WatcherMessage>,
    ) -> Result<Self> {
        let (raw_tx, raw_rx) = unbounded::<RawSignal>();
        let stop = Arc::new(AtomicBool::new(false));
        let mut threads = Vec::new();

        let (strategy, native) = match native::start(&root, raw_tx.clone()) {
            Ok(watcher) => {
                // Slow polling pass alongside native, as reconciliation.
                threads.push(polling::spawn(
                    root.clone(),
                    rules.clone(),
                    raw_tx.clone(),
                    config.reconcile_interval(),
                    stop.clone(),
                ));
                (WatchStrategy::Native, Some(watcher))
            }
            Err(error) => {
                log::warn!(
                    "native watch failed for {}, falling back to polling: {error}",
                    root.display()
                );
                threads.push(polling::spawn(
                    root.clone(),
                    rules.clone(),
                    raw_tx.clone(),
                    config.poll_interval(),
                    stop.clone(),
                ));
                (WatchStrategy::Polling, None)
            }
        };
        drop(raw_tx);

        let window = config.debounce_window();
        threads.push(
            std::thread::Builder::new()
                .name("findex-debounce".to_string())
                .spawn(move || run_debouncer(raw_rx, out_tx, rules, window))?,
        );

        Ok(Self {
            strategy,
            stop,
            native,
            threads,
        })
    }

    pub fn strategy(&self) -> WatchStrategy {
        self.strategy
    }

    /// Stops capture and joins all watcher threads.
    pub fn stop(mut self) {
        self.stop.store(true, Ordering::SeqCst);
        // Dropping the subscription drops its raw sender, which lets the
        // debouncer drain and exit once polling stops too.
        self.native.take();
        for handle in self.threads.drain(..) {
            let _ = handle.join();
        }
    }
}

impl Drop for RootWatcher {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        self.native.take();
        for handle in self.threads.drain(..) {
            let _ = handle.join();
        }
    }
}
