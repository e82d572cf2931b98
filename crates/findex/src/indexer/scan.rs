//! Subtree scanning: filesystem metadata to index entries.
//!
//! Walks emit a directory before its contents, so the storage layer can
//! always resolve an entry's parent from an earlier upsert in the same
//! batch. Exclusion rules prune directories before descent; excluded
//! subtrees are never read at all.

use std::collections::{HashSet, VecDeque};
use std::fs::Metadata;
use std::path::Path;
use std::time::UNIX_EPOCH;

use crate::cancel::CancellationToken;
use crate::config::Config;
use crate::error::{FindexError, Result};
use crate::rules::RuleSet;
use crate::storage::{Predicate, QueryPlan, StorageAdapter};
use crate::types::{DownloadState, EntryId, EntryKind, Generation, IndexedEntry};

/// Consecutive rescan misses after which an entry is purged. The first
/// miss only marks the entry, so one torn rescan cannot delete it.
pub const MISS_LIMIT: u8 = 2;

/// Builds an index entry from on-disk metadata.
pub fn entry_from_fs(path: &Path, config: &Config) -> Result<IndexedEntry> {
    let meta = std::fs::symlink_metadata(path).map_err(|error| stat_error(path, error))?;
    Ok(entry_from_meta(path, &meta, config))
}

/// Classifies a failed stat: interruptions and timeouts are retryable,
/// everything else is terminal for the path.
fn stat_error(path: &Path, error: std::io::Error) -> FindexError {
    use std::io::ErrorKind;
    match error.kind() {
        ErrorKind::Interrupted | ErrorKind::TimedOut | ErrorKind::WouldBlock => {
            FindexError::TransientIo(format!("{}: {error}", path.display()))
        }
        _ => FindexError::Io(error),
    }
}

pub fn entry_from_meta(path: &Path, meta: &Metadata, config: &Config) -> IndexedEntry {
    let path_str = path.to_string_lossy().into_owned();
    let raw_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path_str.clone());

    let is_placeholder = !meta.is_dir() && raw_name.ends_with(&config.placeholder_suffix);
    let kind = if is_placeholder {
        EntryKind::CloudPlaceholder
    } else if meta.is_dir() {
        EntryKind::Directory
    } else if meta.file_type().is_symlink() {
        EntryKind::Symlink
    } else {
        EntryKind::File
    };

    IndexedEntry {
        id: EntryId::UNASSIGNED,
        name: if is_placeholder {
            display_name(&raw_name, &config.placeholder_suffix)
        } else {
            raw_name
        },
        parent: None,
        size: meta.len(),
        created_at: meta
            .created()
            .ok()
            .and_then(|at| at.duration_since(UNIX_EPOCH).ok())
            .map(|since| since.as_secs()),
        modified_at: meta
            .modified()
            .ok()
            .and_then(|at| at.duration_since(UNIX_EPOCH).ok())
            .map(|since| since.as_secs()),
        kind,
        provider: config.provider_for(&path_str).map(str::to_string),
        download_state: if is_placeholder {
            DownloadState::OnlineOnly
        } else {
            DownloadState::Resident
        },
        generation: Generation(0),
        stale: false,
        tombstone: false,
        miss_count: 0,
        path: path_str,
    }
}

/// Recovers the user-visible name from a placeholder file name, e.g.
/// ".report.pdf.icloud" becomes "report.pdf".
fn display_name(raw: &str, suffix: &str) -> String {
    let trimmed = raw.strip_suffix(suffix).unwrap_or(raw);
    trimmed.strip_prefix('.').unwrap_or(trimmed).to_string()
}

/// Walks `path` breadth-first, emitting each admitted entry through
/// `sink`. The scanned path itself comes first and every directory
/// before its contents; shallow entries land in the index ahead of deep
/// ones while a long scan is still running.
pub fn walk_subtree(
    path: &Path,
    rules: &RuleSet,
    config: &Config,
    sink: &mut dyn FnMut(IndexedEntry),
) {
    let Ok(meta) = std::fs::symlink_metadata(path) else {
        return;
    };
    let path_str = path.to_string_lossy();
    if !meta.is_dir() {
        if rules.matches(&path_str) {
            sink(entry_from_meta(path, &meta, config));
        }
        return;
    }
    if !rules.allows_descent(&path_str) {
        return;
    }
    sink(entry_from_meta(path, &meta, config));

    let mut frontier = VecDeque::new();
    frontier.push_back(path.to_path_buf());
    while let Some(dir) = frontier.pop_front() {
        let Ok(entries) = std::fs::read_dir(&dir) else {
            continue;
        };
        let mut children: Vec<_> = entries.filter_map(|e| e.ok()).map(|e| e.path()).collect();
        children.sort();
        for child in children {
            let Ok(child_meta) = std::fs::symlink_metadata(&child) else {
                continue;
            };
            let child_str = child.to_string_lossy();
            if child_meta.is_dir() {
                if !rules.allows_descent(&child_str) {
                    continue;
                }
                sink(entry_from_meta(&child, &child_meta, config));
                frontier.push_back(child);
            } else if rules.matches(&child_str) {
                sink(entry_from_meta(&child, &child_meta, config));
            }
        }
    }
}

/// Outcome of reconciling one stored entry against a completed scan.
#[derive(Debug, PartialEq, Eq)]
pub enum ReconcileAction {
    Keep,
    /// Missed once; write back the incremented miss count.
    MarkMissed(u8),
    Purge,
}

/// Decides what happens to a stored entry that a rescan did not observe.
/// Tombstoned entries are purged immediately; live ones survive one miss.
pub fn reconcile_missing(entry: &IndexedEntry) -> ReconcileAction {
    if entry.tombstone {
        return ReconcileAction::Purge;
    }
    let missed = entry.miss_count.saturating_add(1);
    if missed >= MISS_LIMIT {
        ReconcileAction::Purge
    } else {
        ReconcileAction::MarkMissed(missed)
    }
}

/// Collects stored entries under `scan_root` that the scan did not
/// observe, returning (miss updates, purge paths).
pub fn reconcile_subtree(
    store: &dyn StorageAdapter,
    scan_root: &str,
    observed: &HashSet<String>,
) -> Result<(Vec<IndexedEntry>, Vec<String>)> {
    let plan = QueryPlan::scan_all()
        .with_predicate(Predicate::PathPrefix(scan_root.to_string()));
    let stored = store
        .execute(&plan, &CancellationToken::noop())?
        .unwrap_or_default();

    let mut updates = Vec::new();
    let mut purges = Vec::new();
    for mut entry in stored {
        if observed.contains(&entry.path) {
            continue;
        }
        match reconcile_missing(&entry) {
            ReconcileAction::Keep => {}
            ReconcileAction::MarkMissed(count) => {
                entry.miss_count = count;
                updates.push(entry);
            }
            ReconcileAction::Purge => purges.push(entry.path),
        }
    }
    Ok((updates, purges))
}
