//! Live filename indexing and search library.
//!
//! This crate provides the core of a desktop file-search utility:
//! - Change watching with native notifications and polling fallback
//! - Incremental indexing through a prioritized scan queue
//! - A pluggable storage adapter with snapshot-isolated queries
//! - Ranked, cancellable, paged filename search with query filters

pub mod access;
pub mod cancel;
pub mod config;
pub mod delegate;
pub mod error;
pub mod indexer;
pub mod query;
pub mod rules;
pub mod search;
pub mod service;
pub mod storage;
pub mod types;
pub mod watcher;

// Re-export main types
pub use cancel::{CancellationToken, SearchVersionTracker};
pub use config::Config;
pub use error::{FindexError, Result};
pub use query::{SearchQuery, SortSpec};
pub use rules::{PathRule, RuleEffect, RuleSet};
pub use search::{SearchEngine, SearchOptions, SearchResults, SearchTask};
pub use service::FindexService;
pub use storage::{MemoryStore, StorageAdapter};
pub use types::{ChangeEvent, ChangeKind, EntryKind, IndexedEntry, RootId};
