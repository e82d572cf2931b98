//! Polling change capture.
//!
//! Walks the root on an interval, keeps a signature snapshot per path,
//! and diffs consecutive snapshots into raw signals. Used as the primary
//! strategy where native watching is unavailable and as a slow
//! reconciliation pass alongside native watching.
//!
//! Removals carry the inode recorded in the previous snapshot, so the
//! debouncer can pair them with creations into renames.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::Sender;

use super::{RawEvent, RawEventKind, RawSignal};
use crate::rules::RuleSet;
use crate::types::EventSource;

/// Everything observable about a path without opening it.
#[derive(Debug, Clone, PartialEq, Eq)]
struct FileSig {
    is_dir: bool,
    size: u64,
    mtime: Option<u64>,
    mode: u32,
    inode: Option<u64>,
}

type TreeSnapshot = HashMap<String, FileSig>;

/// Spawns the polling thread. It sleeps in short slices so stop
/// requests are honored promptly even with long intervals.
pub fn spawn(
    root: PathBuf,
    rules: Arc<RuleSet>,
    raw_tx: Sender<RawSignal>,
    interval: Duration,
    stop: Arc<AtomicBool>,
) -> JoinHandle<()> {
    let error_tx = raw_tx.clone();
    std::thread::Builder::new()
        .name("findex-poll".to_string())
        .spawn(move || {
            let mut previous = take_snapshot(&root, &rules);
            while !stop.load(Ordering::SeqCst) {
                if !sleep_interruptible(interval, &stop) {
                    break;
                }
                let current = take_snapshot(&root, &rules);
                diff_snapshots(&previous, &current, &raw_tx);
                previous = current;
            }
        })
        .unwrap_or_else(|error| {
            let _ = error_tx.send(RawSignal::Error(format!("poll thread spawn: {error}")));
            std::thread::spawn(|| {})
        })
}

fn sleep_interruptible(interval: Duration, stop: &AtomicBool) -> bool {
    let slice = Duration::from_millis(200);
    let mut remaining = interval;
    while remaining > Duration::ZERO {
        if stop.load(Ordering::SeqCst) {
            return false;
        }
        let step = remaining.min(slice);
        std::thread::sleep(step);
        remaining -= step;
    }
    !stop.load(Ordering::SeqCst)
}

fn take_snapshot(root: &Path, rules: &RuleSet) -> TreeSnapshot {
    let mut snapshot = TreeSnapshot::new();
    walk(root, rules, &mut snapshot);
    snapshot
}

fn walk(dir: &Path, rules: &RuleSet, snapshot: &mut TreeSnapshot) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        let path_str = path.to_string_lossy().into_owned();
        let Ok(meta) = entry.metadata() else {
            continue;
        };
        if meta.is_dir() {
            if !rules.allows_descent(&path_str) {
                continue;
            }
            snapshot.insert(path_str, signature(&meta, true));
            walk(&path, rules, snapshot);
        } else {
            if !rules.matches(&path_str) {
                continue;
            }
            snapshot.insert(path_str, signature(&meta, false));
        }
    }
}

fn diff_snapshots(previous: &TreeSnapshot, current: &TreeSnapshot, raw_tx: &Sender<RawSignal>) {
    for (path, sig) in current {
        match previous.get(path) {
            None => emit(raw_tx, path, RawEventKind::Created, sig.inode),
            Some(old) if old == sig => {}
            Some(old) => {
                let kind = if old.size == sig.size && old.mtime == sig.mtime {
                    RawEventKind::MetadataOnly
                } else {
                    RawEventKind::Modified
                };
                emit(raw_tx, path, kind, sig.inode);
            }
        }
    }
    for (path, sig) in previous {
        if !current.contains_key(path) {
            emit(raw_tx, path, RawEventKind::Removed, sig.inode);
        }
    }
}

fn emit(raw_tx: &Sender<RawSignal>, path: &str, kind: RawEventKind, inode: Option<u64>) {
    let _ = raw_tx.send(RawSignal::Event(RawEvent {
        path: path.to_string(),
        kind,
        inode,
        source: EventSource::Polling,
    }));
}

#[cfg(unix)]
fn signature(meta: &std::fs::Metadata, is_dir: bool) -> FileSig {
    use std::os::unix::fs::MetadataExt;
    FileSig {
        is_dir,
        size: meta.len(),
        mtime: Some(meta.mtime().max(0) as u64),
        mode: meta.mode(),
        inode: Some(meta.ino()),
    }
}

#[cfg(not(unix))]
fn signature(meta: &std::fs::Metadata, is_dir: bool) -> FileSig {
    use std::time::UNIX_EPOCH;
    FileSig {
        is_dir,
        size: meta.len(),
        mtime: meta
            .modified()
            .ok()
            .and_then(|at| at.duration_since(UNIX_EPOCH).ok())
            .map(|since| since.as_secs()),
        mode: 0,
        inode: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::unbounded;

    fn sig(size: u64, mtime: u64, mode: u32) -> FileSig {
        FileSig {
            is_dir: false,
            size,
            mtime: Some(mtime),
            mode,
            inode: Some(1),
        }
    }

    fn drain_events(rx: &crossbeam_channel::Receiver<RawSignal>) -> Vec<RawEvent> {
        let mut events = Vec::new();
        while let Ok(signal) = rx.try_recv() {
            if let RawSignal::Event(event) = signal {
                events.push(event);
            }
        }
        events
    }

    #[test]
    fn diff_detects_create_modify_remove() {
        let mut before = TreeSnapshot::new();
        before.insert("/r/kept.txt".into(), sig(10, 100, 0o644));
        before.insert("/r/gone.txt".into(), sig(10, 100, 0o644));
        before.insert("/r/grew.txt".into(), sig(10, 100, 0o644));

        let mut after = TreeSnapshot::new();
        after.insert("/r/kept.txt".into(), sig(10, 100, 0o644));
        after.insert("/r/grew.txt".into(), sig(20, 200, 0o644));
        after.insert("/r/new.txt".into(), sig(5, 300, 0o644));

        let (tx, rx) = unbounded();
        diff_snapshots(&before, &after, &tx);
        let events = drain_events(&rx);

        let find = |p: &str| events.iter().find(|e| e.path == p);
        assert_eq!(find("/r/new.txt").map(|e| &e.kind), Some(&RawEventKind::Created));
        assert_eq!(find("/r/grew.txt").map(|e| &e.kind), Some(&RawEventKind::Modified));
        assert_eq!(find("/r/gone.txt").map(|e| &e.kind), Some(&RawEventKind::Removed));
        assert!(find("/r/kept.txt").is_none());
    }

    #[test]
    fn mode_only_change_is_metadata() {
        let mut before = TreeSnapshot::new();
        before.insert("/r/a.txt".into(), sig(10, 100, 0o644));
        let mut after = TreeSnapshot::new();
        after.insert("/r/a.txt".into(), sig(10, 100, 0o600));

        let (tx, rx) = unbounded();
        diff_snapshots(&before, &after, &tx);
        let events = drain_events(&rx);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, RawEventKind::MetadataOnly);
    }

    #[test]
    fn snapshot_walk_respects_rules() {
        use crate::rules::{PathRule, RuleEffect};
        let dir = tempfile::TempDir::new().unwrap();
        let root = dir.path();
        std::fs::create_dir(root.join("node_modules")).unwrap();
        std::fs::write(root.join("node_modules/dep.js"), b"x").unwrap();
        std::fs::write(root.join("app.js"), b"x").unwrap();

        let rules = RuleSet::new(vec![
            PathRule::glob("**/node_modules/**", RuleEffect::Exclude).unwrap(),
            PathRule::glob("**/node_modules", RuleEffect::Exclude).unwrap(),
        ]);
        let snapshot = take_snapshot(root, &rules);
        let keys: Vec<_> = snapshot.keys().collect();
        assert!(keys.iter().any(|k| k.ends_with("app.js")));
        assert!(!keys.iter().any(|k| k.contains("node_modules")));
    }
}
