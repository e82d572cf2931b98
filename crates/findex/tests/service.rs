//! End-to-end tests over the service facade: real directories, real
//! watchers, real scans.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use findex::access::JsonGrantStore;
use findex::indexer::RootState;
use findex::rules::{PathRule, RuleEffect};
use findex::service::FindexService;
use findex::Config;
use tempfile::TempDir;

fn fast_config() -> Config {
    Config {
        debounce_window_ms: 100,
        batch_max_entries: 8,
        batch_max_age_ms: 20,
        worker_count: 2,
        poll_interval_ms: 500,
        reconcile_interval_ms: 60_000,
        ..Config::default()
    }
}

fn service(grant_dir: &Path) -> FindexService {
    FindexService::new(
        fast_config(),
        Box::new(JsonGrantStore::new(grant_dir.join("grants.json"))),
    )
}

fn wait_for<F: Fn() -> bool>(what: &str, check: F) {
    for _ in 0..400 {
        if check() {
            return;
        }
        std::thread::sleep(Duration::from_millis(25));
    }
    panic!("timed out waiting for {what}");
}

#[test]
fn live_index_reflects_changes_within_the_debounce_budget() {
    let state = TempDir::new().unwrap();
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("existing.txt"), b"x").unwrap();

    let service = service(state.path());
    let root = service.add_root(dir.path(), Vec::new()).unwrap();
    wait_for("initial scan", || {
        service.status(root).is_some_and(|s| s.state == RootState::SteadyState)
    });
    assert_eq!(service.search("existing", false).unwrap().len(), 1);

    // A file created after the initial scan surfaces via the watcher.
    std::fs::write(dir.path().join("fresh-note.txt"), b"x").unwrap();
    wait_for("created file indexed", || {
        service.search("fresh-note", false).unwrap().len() == 1
    });

    // And its removal disappears from results.
    std::fs::remove_file(dir.path().join("fresh-note.txt")).unwrap();
    wait_for("removed file gone", || {
        service.search("fresh-note", false).unwrap().is_empty()
    });

    service.shutdown();
}

#[test]
fn excluded_paths_are_never_indexed() {
    let state = TempDir::new().unwrap();
    let dir = TempDir::new().unwrap();
    std::fs::create_dir(dir.path().join("node_modules")).unwrap();
    std::fs::write(dir.path().join("node_modules/dep.js"), b"x").unwrap();
    std::fs::write(dir.path().join("app.js"), b"x").unwrap();

    let service = service(state.path());
    let rules = vec![
        PathRule::glob("**/node_modules", RuleEffect::Exclude).unwrap(),
        PathRule::glob("**/node_modules/**", RuleEffect::Exclude).unwrap(),
    ];
    let root = service.add_root(dir.path(), rules).unwrap();
    wait_for("initial scan", || {
        service.status(root).is_some_and(|s| s.state == RootState::SteadyState)
    });

    assert_eq!(service.search("app.js", false).unwrap().len(), 1);
    assert!(service.search("dep.js", false).unwrap().is_empty());

    // Files appearing under the excluded subtree stay invisible too.
    std::fs::write(dir.path().join("node_modules/late.js"), b"x").unwrap();
    std::thread::sleep(Duration::from_millis(500));
    assert!(service.search("late.js", false).unwrap().is_empty());

    service.shutdown();
}

#[test]
fn paging_stays_consistent_while_the_index_moves() {
    let state = TempDir::new().unwrap();
    let dir = TempDir::new().unwrap();
    for i in 0..120 {
        std::fs::write(dir.path().join(format!("doc-{i:03}.txt")), b"x").unwrap();
    }

    let service = service(state.path());
    let root = service.add_root(dir.path(), Vec::new()).unwrap();
    wait_for("initial scan", || {
        service.status(root).is_some_and(|s| s.state == RootState::SteadyState)
    });

    let results = service.search("doc-", false).unwrap();
    assert_eq!(results.len(), 120);
    let first_page: Vec<_> = results.page(0).iter().map(|e| e.path.clone()).collect();
    assert_eq!(first_page.len(), 50);

    // Mutate the tree between page reads; the snapshot must not shift.
    std::fs::write(dir.path().join("doc-999.txt"), b"x").unwrap();
    wait_for("new doc indexed", || {
        service.search("doc-999", false).unwrap().len() == 1
    });
    let reread: Vec<_> = results.page(0).iter().map(|e| e.path.clone()).collect();
    assert_eq!(reread, first_page);
    assert!(results.is_stale(service.store().as_ref()));

    service.shutdown();
}

#[test]
fn open_page_survives_a_rename_underneath() {
    let state = TempDir::new().unwrap();
    let dir = TempDir::new().unwrap();
    for i in 0..60 {
        std::fs::write(dir.path().join(format!("doc-{i:03}.txt")), b"x").unwrap();
    }

    let service = service(state.path());
    let root = service.add_root(dir.path(), Vec::new()).unwrap();
    wait_for("initial scan", || {
        service.status(root).is_some_and(|s| s.state == RootState::SteadyState)
    });

    let results = service.search("doc-", false).unwrap();
    assert_eq!(results.len(), 60);
    let first_page: Vec<_> = results.page(0).iter().map(|e| e.path.clone()).collect();

    // Rename one of the docs while the cursor is open. The new name
    // still matches the query.
    std::fs::rename(
        dir.path().join("doc-010.txt"),
        dir.path().join("zz-doc-010.txt"),
    )
    .unwrap();
    wait_for("rename indexed", || {
        service.search("zz-doc-010", false).unwrap().len() == 1
    });

    // The open snapshot is unshifted, merely stale.
    let reread: Vec<_> = results.page(0).iter().map(|e| e.path.clone()).collect();
    assert_eq!(reread, first_page);
    assert!(results.is_stale(service.store().as_ref()));

    // A fresh search sees the renamed entry exactly once, with no
    // duplicate left at the old path.
    let fresh = service.search("doc-", false).unwrap();
    assert_eq!(fresh.len(), 60);
    let renamed: Vec<_> = fresh
        .hits()
        .iter()
        .filter(|e| e.name.starts_with("zz-doc-010"))
        .collect();
    assert_eq!(renamed.len(), 1);
    assert!(!fresh.hits().iter().any(|e| e.name == "doc-010.txt"));

    service.shutdown();
}

#[test]
fn revoked_grant_marks_entries_stale_but_queryable() {
    let state = TempDir::new().unwrap();
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("keep.txt"), b"x").unwrap();

    let service = service(state.path());
    let root = service.add_root(dir.path(), Vec::new()).unwrap();
    wait_for("initial scan", || {
        service.status(root).is_some_and(|s| s.state == RootState::SteadyState)
    });

    service.grant_revoked(root).unwrap();
    wait_for("degraded", || {
        service.status(root).is_some_and(|s| s.state == RootState::Degraded)
    });

    // Still findable, now flagged stale.
    let results = service.search("keep", false).unwrap();
    assert_eq!(results.len(), 1);
    assert!(results.hits()[0].stale);
    assert_eq!(service.search("keep status:stale", false).unwrap().len(), 1);

    // Reacquisition clears the marker and resumes indexing.
    service.reacquire(root).unwrap();
    wait_for("stale cleared", || {
        service
            .search("keep", false)
            .unwrap()
            .hits()
            .first()
            .is_some_and(|e| !e.stale)
    });
    std::fs::write(dir.path().join("after-reacquire.txt"), b"x").unwrap();
    wait_for("post-reacquire file indexed", || {
        service.search("after-reacquire", false).unwrap().len() == 1
    });

    service.shutdown();
}

#[test]
fn rename_keeps_identity_and_updates_results() {
    let state = TempDir::new().unwrap();
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("draft.txt"), b"x").unwrap();

    let service = service(state.path());
    let root = service.add_root(dir.path(), Vec::new()).unwrap();
    wait_for("initial scan", || {
        service.status(root).is_some_and(|s| s.state == RootState::SteadyState)
    });

    let before = service.search("draft", false).unwrap();
    let original_id = before.hits()[0].id;

    std::fs::rename(dir.path().join("draft.txt"), dir.path().join("final.txt")).unwrap();
    wait_for("rename indexed", || {
        service.search("final", false).unwrap().len() == 1
            && service.search("draft", false).unwrap().is_empty()
    });
    let after = service.search("final", false).unwrap();
    assert_eq!(after.hits()[0].id, original_id);

    service.shutdown();
}

#[test]
fn removed_root_disappears_from_search() {
    let state = TempDir::new().unwrap();
    let dir_a = TempDir::new().unwrap();
    let dir_b = TempDir::new().unwrap();
    std::fs::write(dir_a.path().join("alpha.txt"), b"x").unwrap();
    std::fs::write(dir_b.path().join("beta.txt"), b"x").unwrap();

    let service = service(state.path());
    let root_a = service.add_root(dir_a.path(), Vec::new()).unwrap();
    let root_b = service.add_root(dir_b.path(), Vec::new()).unwrap();
    wait_for("both scans", || {
        service.status(root_a).is_some_and(|s| s.state == RootState::SteadyState)
            && service.status(root_b).is_some_and(|s| s.state == RootState::SteadyState)
    });

    service.remove_root(root_a).unwrap();
    wait_for("alpha purged", || {
        service.search("alpha", false).unwrap().is_empty()
    });
    assert_eq!(service.search("beta", false).unwrap().len(), 1);
    assert!(service.status(root_a).is_none());

    service.shutdown();
}

#[test]
fn missing_root_is_rejected_without_side_effects() {
    let state = TempDir::new().unwrap();
    let service = service(state.path());
    let missing = state.path().join("does-not-exist");
    assert!(service.add_root(&missing, Vec::new()).is_err());
    assert!(service.search("anything", false).unwrap().is_empty());
    service.shutdown();
}
