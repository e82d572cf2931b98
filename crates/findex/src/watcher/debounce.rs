//! Event debouncing and coalescing.
//!
//! Raw watcher signals are absorbed into a pending set for one debounce
//! window, merged per path, then drained as a single batch. Rapid
//! create/modify/remove churn on the same path collapses to its net
//! effect, and a removal followed by a creation with the same inode
//! inside the window is reported as a rename.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};

use super::{RawEvent, RawEventKind, RawSignal, WatcherMessage};
use crate::rules::RuleSet;
use crate::types::{ChangeEvent, ChangeKind, EventSource, unix_now_secs};

#[derive(Debug)]
struct PendingChange {
    path: String,
    kind: ChangeKind,
    inode: Option<u64>,
    source: EventSource,
    dropped: bool,
}

/// Coalesces raw events over a debounce window.
///
/// Pure state machine; the channel loop in [`run_debouncer`] drives it.
#[derive(Debug)]
pub struct Debouncer {
    rules: Arc<RuleSet>,
    /// Pending changes in first-seen order. Entries cancelled by later
    /// events stay in place with `dropped` set so indices remain stable.
    pending: Vec<PendingChange>,
    by_path: HashMap<String, usize>,
    /// Inodes of pending removals, for rename pairing.
    removed_inodes: HashMap<u64, usize>,
}

impl Debouncer {
    pub fn new(rules: Arc<RuleSet>) -> Self {
        Self {
            rules,
            pending: Vec::new(),
            by_path: HashMap::new(),
            removed_inodes: HashMap::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.pending.iter().all(|p| p.dropped)
    }

    /// Absorbs one raw event into the pending set.
    pub fn absorb(&mut self, event: RawEvent) {
        // Exclusion is applied before anything is buffered, so excluded
        // paths never generate downstream work.
        if !matches!(event.kind, RawEventKind::Removed) && !self.rules.matches(&event.path) {
            return;
        }

        let incoming = match event.kind {
            RawEventKind::Created => ChangeKind::Created,
            RawEventKind::Modified => ChangeKind::Modified,
            RawEventKind::MetadataOnly => ChangeKind::MetadataOnly,
            RawEventKind::Removed => ChangeKind::Removed,
            RawEventKind::RenamedTo { from } => ChangeKind::Renamed {
                from,
                to: event.path.clone(),
            },
        };

        // A creation matching the inode of a pending removal is a rename
        // observed as two raw events.
        if matches!(incoming, ChangeKind::Created) {
            if let Some(inode) = event.inode {
                if let Some(&removed_idx) = self.removed_inodes.get(&inode) {
                    let from = self.pending[removed_idx].path.clone();
                    if from != event.path {
                        self.drop_at(removed_idx);
                        self.removed_inodes.remove(&inode);
                        self.insert(
                            event.path.clone(),
                            ChangeKind::Renamed {
                                from,
                                to: event.path,
                            },
                            Some(inode),
                            event.source,
                        );
                        return;
                    }
                }
            }
        }

        match self.by_path.get(&event.path).copied() {
            Some(idx) if !self.pending[idx].dropped => {
                let merged = merge(&self.pending[idx].kind, &incoming);
                match merged {
                    Some(kind) => {
                        if matches!(kind, ChangeKind::Removed) {
                            if let Some(inode) = self.pending[idx].inode.or(event.inode) {
                                self.removed_inodes.insert(inode, idx);
                            }
                        } else if matches!(self.pending[idx].kind, ChangeKind::Removed) {
                            // No longer a removal; withdraw it from
                            // rename pairing.
                            self.removed_inodes.retain(|_, i| *i != idx);
                        }
                        let slot = &mut self.pending[idx];
                        slot.kind = kind;
                        slot.inode = event.inode.or(slot.inode);
                        slot.source = event.source;
                    }
                    // Created then removed inside one window: net nothing.
                    None => self.drop_at(idx),
                }
            }
            _ => {
                let is_removal = matches!(incoming, ChangeKind::Removed);
                let idx = self.insert(event.path, incoming, event.inode, event.source);
                if is_removal {
                    if let Some(inode) = event.inode {
                        self.removed_inodes.insert(inode, idx);
                    }
                }
            }
        }
    }

    /// Drains the pending set as change events in first-seen order.
    pub fn drain(&mut self) -> Vec<ChangeEvent> {
        let now = unix_now_secs();
        let events = self
            .pending
            .drain(..)
            .filter(|p| !p.dropped)
            .map(|p| ChangeEvent {
                path: p.path,
                kind: p.kind,
                timestamp: now,
                source: p.source,
            })
            .collect();
        self.by_path.clear();
        self.removed_inodes.clear();
        events
    }

    /// Discards everything buffered. Used when an overflow supersedes
    /// the pending incremental work.
    pub fn clear(&mut self) {
        self.pending.clear();
        self.by_path.clear();
        self.removed_inodes.clear();
    }

    fn insert(
        &mut self,
        path: String,
        kind: ChangeKind,
        inode: Option<u64>,
        source: EventSource,
    ) -> usize {
        let idx = self.pending.len();
        self.by_path.insert(path.clone(), idx);
        self.pending.push(PendingChange {
            path,
            kind,
            inode,
            source,
            dropped: false,
        });
        idx
    }

    fn drop_at(&mut self, idx: usize) {
        let slot = &mut self.pending[idx];
        slot.dropped = true;
        self.by_path.remove(&slot.path);
    }
}

/// Merges a later change into an earlier pending one for the same path.
/// `None` means the pair cancels out entirely.
fn merge(earlier: &ChangeKind, later: &ChangeKind) -> Option<ChangeKind> {
    match (earlier, later) {
        (ChangeKind::Created, ChangeKind::Removed) => None,
        (ChangeKind::Created, _) => Some(ChangeKind::Created),
        // Removed then recreated at the same path is an in-place rewrite.
        (ChangeKind::Removed, ChangeKind::Created) => Some(ChangeKind::Modified),
        // A rename landing on a just-removed path wins: the renamed
        // entry replaces the removed one at the destination.
        (ChangeKind::Removed, ChangeKind::Renamed { from, to }) => Some(ChangeKind::Renamed {
            from: from.clone(),
            to: to.clone(),
        }),
        (ChangeKind::Removed, _) | (_, ChangeKind::Removed) => Some(ChangeKind::Removed),
        (_, ChangeKind::Renamed { from, to }) => Some(ChangeKind::Renamed {
            from: from.clone(),
            to: to.clone(),
        }),
        (ChangeKind::Renamed { .. }, _) => Some(earlier.clone()),
        (ChangeKind::Modified, _) => Some(ChangeKind::Modified),
        (ChangeKind::MetadataOnly, later) => Some(later.clone()),
    }
}

/// Channel loop driving a [`Debouncer`].
///
/// Buffers raw signals until `window` has elapsed since the first
/// buffered event, then emits one coalesced batch. Exits when every
/// raw sender has been dropped, flushing whatever is still pending.
pub fn run_debouncer(
    raw_rx: Receiver<RawSignal>,
    out_tx: Sender<WatcherMessage>,
    rules: Arc<RuleSet>,
    window: Duration,
) {
    let mut debouncer = Debouncer::new(rules);
    let mut deadline: Option<Instant> = None;

    loop {
        let timeout = match deadline {
            Some(at) => at.saturating_duration_since(Instant::now()),
            None => window,
        };
        match raw_rx.recv_timeout(timeout) {
            Ok(RawSignal::Event(event)) => {
                debouncer.absorb(event);
                if deadline.is_none() && !debouncer.is_empty() {
                    deadline = Some(Instant::now() + window);
                }
            }
            Ok(RawSignal::Overflow) => {
                debouncer.clear();
                deadline = None;
                let _ = out_tx.send(WatcherMessage::OverflowGap);
            }
            Ok(RawSignal::Error(message)) => {
                let _ = out_tx.send(WatcherMessage::Error(message));
            }
            Err(RecvTimeoutError::Timeout) => {
                if deadline.is_some_and(|at| Instant::now() >= at) {
                    deadline = None;
                    let events = debouncer.drain();
                    if !events.is_empty() {
                        let _ = out_tx.send(WatcherMessage::Events(events));
                    }
                }
            }
            Err(RecvTimeoutError::Disconnected) => {
                let events = debouncer.drain();
                if !events.is_empty() {
                    let _ = out_tx.send(WatcherMessage::Events(events));
                }
                break;
            }
        }
    }
}
