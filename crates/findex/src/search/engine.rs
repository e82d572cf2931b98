//! Search execution.
//!
//! A query is parsed, planned against the name index, executed through
//! the storage adapter's snapshot, ranked, and materialized into a
//! paged result set. Incremental (keystroke) searches share a version
//! tracker so a new keystroke supersedes the in-flight one.

use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{bounded, Receiver};
use parking_lot::RwLock;

use super::rank::{match_quality, sort_hits, MatchQuality};
use crate::cancel::{CancellationToken, SearchVersionTracker};
use crate::config::Config;
use crate::error::Result;
use crate::query::{fold, MatcherKind, ParseWarning, SearchQuery, SortSpec};
use crate::rules::RuleSet;
use crate::storage::{NameProbe, Predicate, QueryPlan, StorageAdapter};
use crate::types::{Generation, IndexedEntry};

/// A fully materialized, ranked result snapshot.
///
/// Pages index into this snapshot, so paging stays consistent while the
/// live index keeps changing underneath; `generation` records which
/// index state produced it.
#[derive(Debug)]
pub struct SearchResults {
    hits: Vec<IndexedEntry>,
    page_size: usize,
    /// Storage generation at execution time.
    pub generation: Generation,
    /// True when ranking was capped; deeper pages need an uncapped search.
    pub truncated: bool,
    pub warnings: Vec<ParseWarning>,
}

impl SearchResults {
    pub fn len(&self) -> usize {
        self.hits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }

    pub fn hits(&self) -> &[IndexedEntry] {
        &self.hits
    }

    pub fn page_count(&self) -> usize {
        self.hits.len().div_ceil(self.page_size)
    }

    /// Returns page `index` (zero-based), empty past the end.
    pub fn page(&self, index: usize) -> &[IndexedEntry] {
        let start = index.saturating_mul(self.page_size).min(self.hits.len());
        let end = (start + self.page_size).min(self.hits.len());
        &self.hits[start..end]
    }

    /// True when the index has advanced past the snapshot this result
    /// set was taken from.
    pub fn is_stale(&self, store: &dyn StorageAdapter) -> bool {
        store.generation() != self.generation
    }
}

/// Caller-tunable knobs for one search invocation.
#[derive(Debug, Clone, Default)]
pub struct SearchOptions {
    pub case_sensitive: bool,
    /// Overrides the configured page size when set.
    pub page_size: Option<usize>,
    /// Overrides the sort order the query itself asked for.
    pub sort_override: Option<SortSpec>,
}

/// An in-flight streaming search.
///
/// Execution runs on a dedicated thread and delivers the ranked
/// snapshot over a bounded channel of size one. When the search is
/// cancelled or superseded by a newer keystroke, the channel closes
/// without delivering.
pub struct SearchTask {
    results: Receiver<SearchResults>,
    token: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl SearchTask {
    /// The channel the result snapshot arrives on.
    pub fn results(&self) -> &Receiver<SearchResults> {
        &self.results
    }

    /// Cancels this search. A no-op once a newer keystroke has already
    /// superseded it.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Blocks until execution finishes. `None` when the search was
    /// cancelled or superseded mid-run.
    pub fn wait(mut self) -> Option<SearchResults> {
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
        self.results.try_recv().ok()
    }
}

pub struct SearchEngine {
    store: Arc<dyn StorageAdapter>,
    config: Arc<Config>,
    tracker: SearchVersionTracker,
    /// Governing roots and their rule sets, for the implicit exclude
    /// filter on every query.
    roots: RwLock<Vec<(String, Arc<RuleSet>)>>,
}

impl SearchEngine {
    pub fn new(store: Arc<dyn StorageAdapter>, config: Arc<Config>) -> Self {
        Self {
            store,
            config,
            tracker: SearchVersionTracker::new(),
            roots: RwLock::new(Vec::new()),
        }
    }

    /// Replaces the set of governing roots.
    pub fn set_roots(&self, roots: Vec<(String, Arc<RuleSet>)>) {
        *self.roots.write() = roots;
    }

    /// One-shot search; runs to completion.
    pub fn search(&self, raw: &str, case_sensitive: bool) -> Result<SearchResults> {
        self.search_with(
            raw,
            &SearchOptions {
                case_sensitive,
                ..SearchOptions::default()
            },
        )
    }

    /// One-shot search with per-call paging and ordering options.
    pub fn search_with(&self, raw: &str, options: &SearchOptions) -> Result<SearchResults> {
        let mut query = SearchQuery::parse(raw, options.case_sensitive);
        if let Some(sort) = options.sort_override {
            query.sort = sort;
        }
        let mut results = match self.execute(&query, &CancellationToken::noop(), false)? {
            Some(results) => results,
            // A noop token never cancels.
            None => self.empty_results(query.warnings),
        };
        if let Some(page_size) = options.page_size {
            results.page_size = page_size.max(1);
        }
        Ok(results)
    }

    /// Keystroke search: supersedes any in-flight incremental search.
    /// Returns `None` when this search was itself superseded mid-run.
    pub fn search_incremental(
        &self,
        raw: &str,
        case_sensitive: bool,
    ) -> Result<Option<SearchResults>> {
        let token = self.tracker.token_for_version(self.tracker.next_version());
        let query = SearchQuery::parse(raw, case_sensitive);
        self.execute(&query, &token, false)
    }

    /// Keystroke search on a dedicated thread.
    ///
    /// Like [`search_incremental`](Self::search_incremental) but the
    /// caller's thread never blocks on execution; the result set
    /// arrives over the task's bounded channel.
    pub fn search_streaming(self: Arc<Self>, raw: &str, case_sensitive: bool) -> SearchTask {
        let token = self.tracker.token_for_version(self.tracker.next_version());
        let (tx, rx) = bounded(1);
        let engine = self;
        let query = SearchQuery::parse(raw, case_sensitive);
        let worker_token = token.clone();
        let handle = std::thread::Builder::new()
            .name("findex-search".to_string())
            .spawn(move || match engine.execute(&query, &worker_token, false) {
                Ok(Some(results)) => {
                    let _ = tx.send(results);
                }
                Ok(None) => {}
                Err(error) => log::warn!("streaming search failed: {error}"),
            })
            .map_err(|error| log::error!("search thread spawn failed: {error}"))
            .ok();
        SearchTask {
            results: rx,
            token,
            handle,
        }
    }

    /// Uncapped search for callers paging past the ranking cap.
    pub fn search_unbounded(&self, raw: &str, case_sensitive: bool) -> Result<SearchResults> {
        let query = SearchQuery::parse(raw, case_sensitive);
        match self.execute(&query, &CancellationToken::noop(), true)? {
            Some(results) => Ok(results),
            None => Ok(self.empty_results(query.warnings)),
        }
    }

    /// Runs a parsed query under a caller-managed cancellation token.
    pub fn execute(
        &self,
        query: &SearchQuery,
        token: &CancellationToken,
        unbounded: bool,
    ) -> Result<Option<SearchResults>> {
        let cap = if unbounded {
            0
        } else {
            self.config.rank_candidate_cap
        };
        let plan = self.build_plan(query, cap);
        let Some(candidates) = self.store.execute(&plan, token)? else {
            return Ok(None);
        };
        let truncated = cap > 0 && candidates.len() >= cap;

        let mut hits: Vec<(MatchQuality, IndexedEntry)> = Vec::with_capacity(candidates.len());
        for (i, entry) in candidates.into_iter().enumerate() {
            if token.is_cancelled_sparse(i).is_none() {
                return Ok(None);
            }
            hits.push((match_quality(query, &entry), entry));
        }
        sort_hits(&mut hits, query.sort, query.case_sensitive);
        if token.is_cancelled().is_none() {
            return Ok(None);
        }

        Ok(Some(SearchResults {
            hits: hits.into_iter().map(|(_, entry)| entry).collect(),
            page_size: self.config.page_size.max(1),
            generation: self.store.generation(),
            truncated,
            warnings: query.warnings.clone(),
        }))
    }

    fn build_plan(&self, query: &SearchQuery, cap: usize) -> QueryPlan {
        let mut predicates = Vec::new();

        let mut probe = None;
        for matcher in &query.matchers {
            let folded = fold(&matcher.text, query.case_sensitive);
            match matcher.kind {
                MatcherKind::Word | MatcherKind::Phrase => {
                    if probe.is_none() && !folded.is_empty() {
                        probe = Some(NameProbe::Contains(folded.clone()));
                    }
                    predicates.push(Predicate::NameContains(folded));
                }
                MatcherKind::Wildcard => {
                    // A literal prefix before the first wildcard still
                    // narrows through the sorted name index.
                    if probe.is_none() {
                        let literal: String = folded
                            .chars()
                            .take_while(|c| *c != '*' && *c != '?')
                            .collect();
                        if !literal.is_empty() {
                            probe = Some(NameProbe::Prefix(literal));
                        }
                    }
                    predicates.push(Predicate::NameWildcard(folded));
                }
            }
        }

        if let Some(provider) = &query.provider {
            predicates.push(Predicate::Provider(provider.name.clone()));
        }
        if let Some(status) = query.status {
            predicates.push(Predicate::Status(status));
        }
        if let Some(size) = query.size {
            predicates.push(Predicate::Size(size));
        }
        if let Some(date) = query.date {
            predicates.push(Predicate::Date(date));
        }
        let roots = self.roots.read().clone();
        if !roots.is_empty() {
            predicates.push(Predicate::AdmittedBy(roots));
        }

        QueryPlan {
            probe,
            parent: None,
            case_sensitive: query.case_sensitive,
            predicates,
            candidate_cap: cap,
        }
    }

    fn empty_results(&self, warnings: Vec<ParseWarning>) -> SearchResults {
        SearchResults {
            hits: Vec::new(),
            page_size: self.config.page_size.max(1),
            generation: self.store.generation(),
            truncated: false,
            warnings,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use crate::types::{DownloadState, EntryId, EntryKind, IndexedEntry};

    fn entry(path: &str, size: u64, modified: u64) -> IndexedEntry {
        IndexedEntry {
            id: EntryId::UNASSIGNED,
            path: path.to_string(),
            name: path.rsplit('/').next().unwrap_or(path).to_string(),
            parent: None,
            size,
            created_at: Some(modified),
            modified_at: Some(modified),
            kind: EntryKind::File,
            provider: None,
            download_state: DownloadState::Resident,
            generation: Generation(0),
            stale: false,
            tombstone: false,
            miss_count: 0,
        }
    }

    fn engine_with(entries: Vec<IndexedEntry>) -> (SearchEngine, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        store.upsert_batch(&entries).unwrap();
        let engine = SearchEngine::new(store.clone(), Arc::new(Config::default()));
        (engine, store)
    }

    #[test]
    fn ranked_search_finds_and_orders_matches() {
        let (engine, _) = engine_with(vec![
            entry("/d/report.txt", 1, 10),
            entry("/d/annual-report.txt", 1, 10),
            entry("/d/unrelated.txt", 1, 10),
        ]);
        let results = engine.search("report", false).unwrap();
        let names: Vec<_> = results.hits().iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["report.txt", "annual-report.txt"]);
    }

    #[test]
    fn case_folding_is_insensitive_by_default() {
        let (engine, _) = engine_with(vec![entry("/d/README.md", 1, 10)]);
        assert_eq!(engine.search("readme", false).unwrap().len(), 1);
        assert_eq!(engine.search("readme", true).unwrap().len(), 0);
    }

    #[test]
    fn filters_compose_with_text() {
        let mut big = entry("/d/report-big.txt", 5 * 1024 * 1024, 10);
        big.provider = Some("drive".to_string());
        let (engine, _) = engine_with(vec![entry("/d/report.txt", 100, 10), big]);

        let results = engine.search("report size:>1mb", false).unwrap();
        let names: Vec<_> = results.hits().iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["report-big.txt"]);

        let local = engine.search("report provider:local", false).unwrap();
        let names: Vec<_> = local.hits().iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["report.txt"]);
    }

    #[test]
    fn sort_override_and_page_size_options_apply() {
        let (engine, _) = engine_with(vec![
            entry("/d/report-small.txt", 10, 5),
            entry("/d/report-big.txt", 5000, 1),
            entry("/d/report-mid.txt", 700, 9),
        ]);
        let options = SearchOptions {
            case_sensitive: false,
            page_size: Some(1),
            sort_override: Some(SortSpec::SizeDesc),
        };
        let results = engine.search_with("report", &options).unwrap();
        let names: Vec<_> = results.hits().iter().map(|e| e.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["report-big.txt", "report-mid.txt", "report-small.txt"]
        );
        assert_eq!(results.page(0).len(), 1);
        assert_eq!(results.page_count(), 3);
    }

    #[test]
    fn malformed_filter_surfaces_warning_not_failure() {
        let (engine, _) = engine_with(vec![entry("/d/report.txt", 1, 10)]);
        let results = engine.search("report size:banana", false).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results.warnings.len(), 1);
    }

    #[test]
    fn paging_is_stable_across_index_updates() {
        let entries: Vec<_> = (0..120)
            .map(|i| entry(&format!("/d/file-{i:03}.txt"), 1, i))
            .collect();
        let (engine, store) = engine_with(entries);

        let results = engine.search("file-", false).unwrap();
        assert_eq!(results.len(), 120);
        let first_page: Vec<_> = results.page(0).iter().map(|e| e.path.clone()).collect();

        // Mutate the index between page reads.
        store
            .upsert_batch(&[entry("/d/file-999.txt", 1, 999)])
            .unwrap();
        assert_eq!(
            results.page(0).iter().map(|e| e.path.clone()).collect::<Vec<_>>(),
            first_page
        );
        assert!(results.is_stale(store.as_ref()));
        assert_eq!(results.page(2).len(), 20);
        assert!(results.page(3).is_empty());
    }

    #[test]
    fn superseded_incremental_search_returns_none() {
        let (engine, _) = engine_with(vec![entry("/d/report.txt", 1, 10)]);
        // Simulate the supersede: a token minted for an old version.
        let stale = engine
            .tracker
            .token_for_version(engine.tracker.next_version());
        engine.tracker.next_version();

        let query = SearchQuery::parse("report", false);
        assert!(engine.execute(&query, &stale, false).unwrap().is_none());

        // The newest keystroke still completes.
        let results = engine.search_incremental("report", false).unwrap();
        assert_eq!(results.map(|r| r.len()), Some(1));
    }

    /// Wraps a store so `execute` parks at a gate, letting tests order
    /// a supersede against an in-flight search.
    struct GatedStore {
        inner: Arc<MemoryStore>,
        entered: crossbeam_channel::Sender<()>,
        release: Receiver<()>,
    }

    impl StorageAdapter for GatedStore {
        fn upsert_batch(&self, entries: &[IndexedEntry]) -> crate::error::Result<()> {
            self.inner.upsert_batch(entries)
        }

        fn delete_batch(&self, paths: &[String]) -> crate::error::Result<()> {
            self.inner.delete_batch(paths)
        }

        fn get(&self, path: &str) -> Option<IndexedEntry> {
            self.inner.get(path)
        }

        fn execute(
            &self,
            plan: &QueryPlan,
            cancel: &CancellationToken,
        ) -> crate::error::Result<Option<Vec<IndexedEntry>>> {
            self.entered.send(()).unwrap();
            self.release.recv().unwrap();
            self.inner.execute(plan, cancel)
        }

        fn generation(&self) -> Generation {
            self.inner.generation()
        }

        fn entry_count(&self) -> usize {
            self.inner.entry_count()
        }
    }

    #[test]
    fn streaming_search_delivers_over_its_channel() {
        let (engine, _) = engine_with(vec![entry("/d/report.txt", 1, 10)]);
        let engine = Arc::new(engine);
        let task = engine.search_streaming("report", false);
        let results = task.wait().unwrap();
        assert_eq!(results.len(), 1);
    }

    #[test]
    fn superseding_keystroke_closes_the_older_stream_without_querying() {
        let inner = Arc::new(MemoryStore::new());
        inner
            .upsert_batch(&[entry("/d/doc.txt", 1, 10), entry("/d/doc.docx", 1, 10)])
            .unwrap();
        let (entered_tx, entered_rx) = crossbeam_channel::unbounded();
        let (release_tx, release_rx) = crossbeam_channel::unbounded();
        let store = Arc::new(GatedStore {
            inner,
            entered: entered_tx,
            release: release_rx,
        });
        let engine = Arc::new(SearchEngine::new(store, Arc::new(Config::default())));

        let first = engine.clone().search_streaming("doc", false);
        entered_rx.recv().unwrap();
        // Supersede while the first search is parked inside the store.
        let second = engine.clone().search_streaming("docx", false);
        entered_rx.recv().unwrap();
        release_tx.send(()).unwrap();
        release_tx.send(()).unwrap();

        assert!(first.wait().is_none());
        let results = second.wait().unwrap();
        assert_eq!(results.hits()[0].name, "doc.docx");
    }

    #[test]
    fn cancelled_task_closes_without_a_result() {
        let inner = Arc::new(MemoryStore::new());
        inner.upsert_batch(&[entry("/d/doc.txt", 1, 10)]).unwrap();
        let (entered_tx, entered_rx) = crossbeam_channel::unbounded();
        let (release_tx, release_rx) = crossbeam_channel::unbounded();
        let store = Arc::new(GatedStore {
            inner,
            entered: entered_tx,
            release: release_rx,
        });
        let engine = Arc::new(SearchEngine::new(store, Arc::new(Config::default())));

        let task = engine.search_streaming("doc", false);
        entered_rx.recv().unwrap();
        task.cancel();
        release_tx.send(()).unwrap();
        assert!(task.wait().is_none());
    }

    #[test]
    fn excluded_entries_never_surface_while_pending_purge() {
        use crate::rules::{PathRule, RuleEffect};
        let (engine, _) = engine_with(vec![
            entry("/r/src/report.txt", 1, 10),
            entry("/r/target/report.txt", 1, 10),
        ]);
        let rules = Arc::new(RuleSet::new(vec![
            PathRule::glob("**/target/**", RuleEffect::Exclude).unwrap(),
        ]));
        engine.set_roots(vec![("/r".to_string(), rules)]);

        let results = engine.search("report", false).unwrap();
        let paths: Vec<_> = results.hits().iter().map(|e| e.path.as_str()).collect();
        assert_eq!(paths, vec!["/r/src/report.txt"]);
    }
}
