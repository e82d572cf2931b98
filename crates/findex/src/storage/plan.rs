//! Query plans: what the search engine hands to the storage adapter.

use std::sync::Arc;

use crate::query::{
    fold, wildcard_match, DatePredicate, SizePredicate, StatusFilter,
};
use crate::rules::RuleSet;
use crate::types::{DownloadState, EntryId, IndexedEntry};

/// Candidate narrowing through the name index instead of a full row scan.
#[derive(Debug, Clone)]
pub enum NameProbe {
    /// Range scan over the sorted name index.
    Prefix(String),
    /// Scan over distinct names (cheaper than the full arena).
    Contains(String),
}

/// A row predicate applied after candidate narrowing.
#[derive(Debug, Clone)]
pub enum Predicate {
    /// Name contains the folded needle.
    NameContains(String),
    /// Name matches a `*`/`?` pattern.
    NameWildcard(String),
    /// Path equals the prefix or lies beneath it.
    PathPrefix(String),
    /// Provider tag equals; `None` matches untagged (local) entries.
    Provider(Option<String>),
    Status(StatusFilter),
    Size(SizePredicate),
    Date(DatePredicate),
    /// Entries under a governing root must be admitted by its rules. This
    /// is the implicit exclude filter: excluded paths never surface even
    /// while still physically present pending purge.
    AdmittedBy(Vec<(String, Arc<RuleSet>)>),
}

impl Predicate {
    pub fn matches(&self, entry: &IndexedEntry, case_sensitive: bool) -> bool {
        match self {
            Self::NameContains(needle) => fold(&entry.name, case_sensitive).contains(needle),
            Self::NameWildcard(pattern) => {
                wildcard_match(pattern, &fold(&entry.name, case_sensitive))
            }
            Self::PathPrefix(prefix) => {
                entry.path == *prefix
                    || entry
                        .path
                        .strip_prefix(prefix.as_str())
                        .is_some_and(|rest| rest.starts_with('/'))
            }
            Self::Provider(name) => entry.provider.as_deref() == name.as_deref(),
            Self::Status(status) => match status {
                StatusFilter::Resident => {
                    entry.download_state == DownloadState::Resident && !entry.stale
                }
                StatusFilter::OnlineOnly => entry.download_state == DownloadState::OnlineOnly,
                StatusFilter::Stale => entry.stale,
            },
            Self::Size(predicate) => predicate.matches(entry.size),
            Self::Date(predicate) => entry
                .modified_at
                .is_some_and(|modified| predicate.matches(modified)),
            Self::AdmittedBy(roots) => {
                let governing = roots.iter().find(|(root, _)| {
                    entry.path == *root
                        || entry
                            .path
                            .strip_prefix(root.as_str())
                            .is_some_and(|rest| rest.starts_with('/'))
                });
                match governing {
                    Some((_, rules)) => rules.matches(&entry.path),
                    None => true,
                }
            }
        }
    }
}

/// An execution plan: optional indexed probes plus row predicates.
#[derive(Debug, Clone)]
pub struct QueryPlan {
    pub probe: Option<NameProbe>,
    /// Directory-id probe: restrict to direct children of this entry.
    pub parent: Option<EntryId>,
    pub case_sensitive: bool,
    pub predicates: Vec<Predicate>,
    /// Stop collecting once this many rows matched; 0 means unbounded.
    pub candidate_cap: usize,
}

impl QueryPlan {
    /// A plan with no probes and no predicates; scans everything live.
    pub fn scan_all() -> Self {
        Self {
            probe: None,
            parent: None,
            case_sensitive: false,
            predicates: Vec::new(),
            candidate_cap: 0,
        }
    }

    pub fn with_predicate(mut self, predicate: Predicate) -> Self {
        self.predicates.push(predicate);
        self
    }
}
