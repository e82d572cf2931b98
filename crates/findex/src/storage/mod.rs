//! Storage contract and the shipped in-memory implementation.
//!
//! The core is written against a narrow adapter surface: batched
//! upsert/delete, point lookup, and plan execution. Implementations must be
//! snapshot-isolated — a query never observes a partially-applied batch.
//! Crash durability is the external engine's concern; anything lost with
//! the last in-flight batch is re-derivable from a rescan-after-gap.

mod memory;
mod plan;

pub use memory::MemoryStore;
pub use plan::{NameProbe, Predicate, QueryPlan};

use crate::cancel::CancellationToken;
use crate::error::Result;
use crate::types::{Generation, IndexedEntry};

/// The storage contract consumed by the indexer (sole writer) and the
/// search engine (read-only).
pub trait StorageAdapter: Send + Sync {
    /// Applies a batch of entries atomically. The adapter owns id and
    /// generation assignment: an entry whose path (or pre-assigned id, for
    /// renames) is already known keeps its identity, and the generation is
    /// bumped only when observable attributes actually changed.
    fn upsert_batch(&self, entries: &[IndexedEntry]) -> Result<()>;

    /// Physically removes entries by path, atomically.
    fn delete_batch(&self, paths: &[String]) -> Result<()>;

    /// Point lookup by canonical path. Tombstoned entries are returned so
    /// the indexer can observe pending deletions; queries never see them.
    fn get(&self, path: &str) -> Option<IndexedEntry>;

    /// Executes a query plan. Returns `Ok(None)` if the cancellation token
    /// fired — a cancelled execution performs no further row access.
    fn execute(&self, plan: &QueryPlan, cancel: &CancellationToken)
        -> Result<Option<Vec<IndexedEntry>>>;

    /// Current global generation stamp (the highest generation ever
    /// assigned). Result sets carry this for staleness detection.
    fn generation(&self) -> Generation;

    /// Number of live (non-tombstoned) entries.
    fn entry_count(&self) -> usize;
}
