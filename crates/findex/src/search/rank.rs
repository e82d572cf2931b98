//! Result ranking.
//!
//! Name-match quality dominates; ties break to the shorter path, then
//! the more recently modified entry, then the path itself so ordering
//! is total and stable across runs.

use std::cmp::Reverse;

use rayon::slice::ParallelSliceMut;

use crate::query::{fold, wildcard_match, Matcher, MatcherKind, SearchQuery, SortSpec};
use crate::types::IndexedEntry;

/// How well an entry name matched, best first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum MatchQuality {
    Exact = 0,
    Prefix = 1,
    Substring = 2,
    Wildcard = 3,
}

fn quality_for(matcher: &Matcher, folded_name: &str, case_sensitive: bool) -> Option<MatchQuality> {
    let needle = fold(&matcher.text, case_sensitive);
    match matcher.kind {
        MatcherKind::Word | MatcherKind::Phrase => {
            if folded_name == needle {
                Some(MatchQuality::Exact)
            } else if folded_name.starts_with(&needle) {
                Some(MatchQuality::Prefix)
            } else if folded_name.contains(&needle) {
                Some(MatchQuality::Substring)
            } else {
                None
            }
        }
        MatcherKind::Wildcard => {
            if wildcard_match(&needle, folded_name) {
                Some(MatchQuality::Wildcard)
            } else {
                None
            }
        }
    }
}

/// Best quality across the query's matchers. Queries with no text
/// matchers (pure filters) rank everything as a substring match.
pub fn match_quality(query: &SearchQuery, entry: &IndexedEntry) -> MatchQuality {
    if query.matchers.is_empty() {
        return MatchQuality::Substring;
    }
    let folded = fold(&entry.name, query.case_sensitive);
    query
        .matchers
        .iter()
        .filter_map(|matcher| quality_for(matcher, &folded, query.case_sensitive))
        .min()
        .unwrap_or(MatchQuality::Wildcard)
}

/// Sorts ranked hits in final presentation order.
pub fn sort_hits(hits: &mut [(MatchQuality, IndexedEntry)], sort: SortSpec, case_sensitive: bool) {
    match sort {
        SortSpec::Relevance => hits.par_sort_by(|a, b| {
            (a.0, a.1.path.len(), Reverse(a.1.modified_at), &a.1.path).cmp(&(
                b.0,
                b.1.path.len(),
                Reverse(b.1.modified_at),
                &b.1.path,
            ))
        }),
        SortSpec::Name => hits.par_sort_by(|a, b| {
            (fold(&a.1.name, case_sensitive), &a.1.path)
                .cmp(&(fold(&b.1.name, case_sensitive), &b.1.path))
        }),
        SortSpec::ModifiedDesc => hits.par_sort_by(|a, b| {
            (Reverse(a.1.modified_at), a.0, &a.1.path).cmp(&(
                Reverse(b.1.modified_at),
                b.0,
                &b.1.path,
            ))
        }),
        SortSpec::SizeDesc => hits.par_sort_by(|a, b| {
            (Reverse(a.1.size), a.0, &a.1.path).cmp(&(Reverse(b.1.size), b.0, &b.1.path))
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DownloadState, EntryId, EntryKind, Generation};

    fn entry(path: &str, name: &str, modified: u64) -> IndexedEntry {
        IndexedEntry {
            id: EntryId(1),
            path: path.to_string(),
            name: name.to_string(),
            parent: None,
            size: 1,
            created_at: None,
            modified_at: Some(modified),
            kind: EntryKind::File,
            provider: None,
            download_state: DownloadState::Resident,
            generation: Generation(1),
            stale: false,
            tombstone: false,
            miss_count: 0,
        }
    }

    fn ranked(query: &SearchQuery, entries: Vec<IndexedEntry>) -> Vec<String> {
        let mut hits: Vec<_> = entries
            .into_iter()
            .map(|e| (match_quality(query, &e), e))
            .collect();
        sort_hits(&mut hits, query.sort, query.case_sensitive);
        hits.into_iter().map(|(_, e)| e.name).collect()
    }

    #[test]
    fn exact_beats_prefix_beats_substring() {
        let query = SearchQuery::parse("report", false);
        let order = ranked(
            &query,
            vec![
                entry("/d/my-report.txt", "my-report.txt", 0),
                entry("/d/report", "report", 0),
                entry("/d/report.txt", "report.txt", 0),
            ],
        );
        assert_eq!(order, vec!["report", "report.txt", "my-report.txt"]);
    }

    #[test]
    fn ties_break_shorter_path_then_newer_mtime() {
        let query = SearchQuery::parse("notes", false);
        let mut hits: Vec<_> = vec![
            entry("/deeply/nested/dir/notes.txt", "notes.txt", 50),
            entry("/d/notes.txt", "notes.txt", 10),
            entry("/e/notes.txt", "notes.txt", 99),
        ]
        .into_iter()
        .map(|e| (match_quality(&query, &e), e))
        .collect();
        sort_hits(&mut hits, SortSpec::Relevance, false);
        let paths: Vec<_> = hits.into_iter().map(|(_, e)| e.path).collect();
        // Shorter paths first; equal lengths ordered newest first.
        assert_eq!(
            paths,
            vec!["/e/notes.txt", "/d/notes.txt", "/deeply/nested/dir/notes.txt"]
        );
    }

    #[test]
    fn wildcard_ranks_below_literal_matches() {
        let query = SearchQuery::parse("rep*", false);
        let entry_a = entry("/d/report.txt", "report.txt", 0);
        assert_eq!(match_quality(&query, &entry_a), MatchQuality::Wildcard);
    }

    #[test]
    fn modified_sort_overrides_relevance() {
        let mut query = SearchQuery::parse("report", false);
        query.sort = SortSpec::ModifiedDesc;
        let order = ranked(
            &query,
            vec![
                entry("/d/report", "report", 10),
                entry("/d/old-report.txt", "old-report.txt", 99),
            ],
        );
        assert_eq!(order, vec!["old-report.txt", "report"]);
    }
}
