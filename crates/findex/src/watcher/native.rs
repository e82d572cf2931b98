//! Native change capture via the `notify` backend.
//!
//! Translates backend events into raw signals for the debouncer. Access
//! events are dropped, rescan flags become overflow signals, and rename
//! pairs are forwarded with the source path when the backend reports it.

use std::path::{Path, PathBuf};

use crossbeam_channel::Sender;
use notify::event::{Flag, ModifyKind, RenameMode};
use notify::{recommended_watcher, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};

use super::{RawEvent, RawEventKind, RawSignal};
use crate::error::{FindexError, Result};
use crate::types::EventSource;

/// Starts a recursive native watch on `root`.
///
/// The returned watcher must be kept alive for the subscription to
/// stay active.
pub fn start(root: &Path, raw_tx: Sender<RawSignal>) -> Result<RecommendedWatcher> {
    // Pending rename source, for backends that split renames into
    // From/To event pairs.
    let mut rename_from: Option<String> = None;

    let mut watcher = recommended_watcher(move |outcome: notify::Result<Event>| match outcome {
        Ok(event) => translate(event, &mut rename_from, &raw_tx),
        Err(error) => {
            let _ = raw_tx.send(RawSignal::Error(error.to_string()));
        }
    })
    .map_err(|error| {
        FindexError::Internal(format!(
            "failed to create watcher for {}: {error}",
            root.display()
        ))
    })?;

    watcher
        .watch(root, RecursiveMode::Recursive)
        .map_err(|error| {
            FindexError::Internal(format!("failed to watch {}: {error}", root.display()))
        })?;

    Ok(watcher)
}

fn translate(event: Event, rename_from: &mut Option<String>, raw_tx: &Sender<RawSignal>) {
    if event.flag() == Some(Flag::Rescan) {
        let _ = raw_tx.send(RawSignal::Overflow);
        return;
    }
    if matches!(event.kind, EventKind::Access(_)) {
        return;
    }
    // A kind-less event with no paths means the backend lost track.
    if event.paths.is_empty() {
        if matches!(event.kind, EventKind::Any | EventKind::Other) {
            let _ = raw_tx.send(RawSignal::Overflow);
        }
        return;
    }

    match event.kind {
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
            if let Some(path) = event.paths.first() {
                *rename_from = Some(lossy(path));
            }
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
            if let Some(path) = event.paths.first() {
                let kind = match rename_from.take() {
                    Some(from) => RawEventKind::RenamedTo { from },
                    // Source never arrived; treat as a plain creation.
                    None => RawEventKind::Created,
                };
                send(raw_tx, path, kind);
            }
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            if let [from, to, ..] = event.paths.as_slice() {
                send(
                    raw_tx,
                    to,
                    RawEventKind::RenamedTo { from: lossy(from) },
                );
            } else if let Some(path) = event.paths.first() {
                send(raw_tx, path, RawEventKind::Modified);
            }
        }
        EventKind::Modify(ModifyKind::Metadata(_)) => {
            for path in &event.paths {
                send(raw_tx, path, RawEventKind::MetadataOnly);
            }
        }
        EventKind::Create(_) => {
            for path in &event.paths {
                send(raw_tx, path, RawEventKind::Created);
            }
        }
        EventKind::Remove(_) => {
            for path in &event.paths {
                send(raw_tx, path, RawEventKind::Removed);
            }
        }
        _ => {
            for path in &event.paths {
                send(raw_tx, path, RawEventKind::Modified);
            }
        }
    }
}

fn send(raw_tx: &Sender<RawSignal>, path: &PathBuf, kind: RawEventKind) {
    let inode = match kind {
        // Removed paths cannot be stat'd; renames carry identity already.
        RawEventKind::Removed | RawEventKind::RenamedTo { .. } => None,
        _ => stat_inode(path),
    };
    let _ = raw_tx.send(RawSignal::Event(RawEvent {
        path: lossy(path),
        kind,
        inode,
        source: EventSource::Native,
    }));
}

fn lossy(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

#[cfg(unix)]
fn stat_inode(path: &Path) -> Option<u64> {
    use std::os::unix::fs::MetadataExt;
    std::fs::symlink_metadata(path).ok().map(|meta| meta.ino())
}

#[cfg(not(unix))]
fn stat_inode(_path: &Path) -> Option<u64> {
    None
}
