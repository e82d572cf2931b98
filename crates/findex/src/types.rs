//! Core data model: indexed entries, change events and scan tasks.

use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Identifier of a watch root.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RootId(pub u64);

/// Stable arena id of an indexed entry. Identity survives renames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntryId(pub u64);

impl EntryId {
    /// Sentinel for entries the storage layer has not assigned yet.
    pub const UNASSIGNED: EntryId = EntryId(0);

    pub fn is_assigned(self) -> bool {
        self != Self::UNASSIGNED
    }
}

/// Monotonic per-entry version, also tracked globally as a snapshot stamp.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Generation(pub u64);

/// Type classification of an indexed entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EntryKind {
    File,
    Directory,
    Symlink,
    CloudPlaceholder,
}

impl EntryKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::File => "file",
            Self::Directory => "directory",
            Self::Symlink => "symlink",
            Self::CloudPlaceholder => "cloud-placeholder",
        }
    }
}

/// Whether the bytes of a cloud-visible file are present locally.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DownloadState {
    #[default]
    Resident,
    OnlineOnly,
}

/// A single entry in the index.
///
/// Owned exclusively by the indexer; the search engine reads it through the
/// storage adapter's snapshot. The generation counter is bumped by the
/// storage layer on every observed change and never decreases.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexedEntry {
    pub id: EntryId,
    /// Canonical absolute path.
    pub path: String,
    pub name: String,
    pub parent: Option<EntryId>,
    pub size: u64,
    pub created_at: Option<u64>,
    pub modified_at: Option<u64>,
    pub kind: EntryKind,
    /// `None` for local entries, otherwise an opaque provider tag.
    pub provider: Option<String>,
    pub download_state: DownloadState,
    pub generation: Generation,
    /// Set when the owning root's access grant is no longer valid.
    pub stale: bool,
    /// Tombstoned entries never surface in queries and are purged with the
    /// next flushed batch.
    pub tombstone: bool,
    /// Consecutive rescans that failed to observe this path. Purged at two.
    pub miss_count: u8,
}

impl IndexedEntry {
    /// True when the observable attributes differ — the signal that an
    /// upsert must bump the generation counter.
    pub fn observably_differs(&self, other: &IndexedEntry) -> bool {
        self.path != other.path
            || self.name != other.name
            || self.size != other.size
            || self.modified_at != other.modified_at
            || self.created_at != other.created_at
            || self.kind != other.kind
            || self.provider != other.provider
            || self.download_state != other.download_state
            || self.stale != other.stale
            || self.tombstone != other.tombstone
    }
}

/// Kind of a coalesced filesystem change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeKind {
    Created,
    Modified,
    Removed,
    Renamed { from: String, to: String },
    MetadataOnly,
}

/// Where a change event was observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventSource {
    Native,
    Polling,
    ManualRescan,
}

/// A deduplicated, debounced filesystem change. Produced by the watcher,
/// consumed exactly once by the indexer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    /// For renames this is the destination path.
    pub path: String,
    pub kind: ChangeKind,
    pub timestamp: u64,
    pub source: EventSource,
}

/// Why a subtree scan was enqueued. Ordering doubles as queue priority:
/// live change-driven work is never starved by a large initial backlog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ScanReason {
    Initial = 0,
    RescanAfterGap = 1,
    Incremental = 2,
}

impl ScanReason {
    pub fn priority(self) -> u8 {
        self as u8
    }
}

/// A unit of indexing work over one subtree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanTask {
    pub root: RootId,
    pub path: PathBuf,
    pub reason: ScanReason,
}

/// Returns the current Unix timestamp in seconds.
pub fn unix_now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|value| value.as_secs())
        .unwrap_or(0)
}
