//! In-memory storage adapter.
//!
//! Entries live in an arena keyed by stable id, with a path map, a sorted
//! folded-name index for prefix probes, and a parent-id index for
//! directory probes. Every adapter call takes the lock exactly once, so
//! readers always observe whole batches (snapshot isolation) and writers
//! never interleave inside one.

use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;

use parking_lot::RwLock;

use super::plan::{NameProbe, QueryPlan};
use super::StorageAdapter;
use crate::cancel::CancellationToken;
use crate::error::Result;
use crate::types::{EntryId, Generation, IndexedEntry};

#[derive(Debug, Default)]
struct StoreInner {
    arena: HashMap<EntryId, IndexedEntry>,
    by_path: HashMap<String, EntryId>,
    /// Folded (lowercased) name -> entry ids.
    name_index: BTreeMap<String, Vec<EntryId>>,
    /// Parent id -> direct children ids.
    children: HashMap<EntryId, Vec<EntryId>>,
    next_id: u64,
    max_generation: u64,
    live: usize,
}

impl StoreInner {
    fn allocate_id(&mut self) -> EntryId {
        self.next_id += 1;
        EntryId(self.next_id)
    }

    fn next_generation(&mut self) -> Generation {
        self.max_generation += 1;
        Generation(self.max_generation)
    }

    fn index_name(&mut self, name: &str, id: EntryId) {
        let ids = self.name_index.entry(name.to_ascii_lowercase()).or_default();
        if !ids.contains(&id) {
            ids.push(id);
        }
    }

    fn unindex_name(&mut self, name: &str, id: EntryId) {
        let key = name.to_ascii_lowercase();
        if let Some(ids) = self.name_index.get_mut(&key) {
            ids.retain(|existing| *existing != id);
            if ids.is_empty() {
                self.name_index.remove(&key);
            }
        }
    }

    fn parent_for_path(&self, path: &str) -> Option<EntryId> {
        let parent = std::path::Path::new(path).parent()?.to_str()?;
        self.by_path.get(parent).copied()
    }

    fn link_parent(&mut self, id: EntryId, parent: Option<EntryId>) {
        if let Some(parent) = parent {
            let siblings = self.children.entry(parent).or_default();
            if !siblings.contains(&id) {
                siblings.push(id);
            }
        }
    }

    fn unlink_parent(&mut self, id: EntryId, parent: Option<EntryId>) {
        if let Some(parent) = parent {
            if let Some(siblings) = self.children.get_mut(&parent) {
                siblings.retain(|child| *child != id);
            }
        }
    }

    fn apply_upsert(&mut self, incoming: &IndexedEntry) {
        let existing_id = if incoming.id.is_assigned() && self.arena.contains_key(&incoming.id) {
            Some(incoming.id)
        } else {
            self.by_path.get(&incoming.path).copied()
        };

        let Some(id) = existing_id else {
            let id = self.allocate_id();
            let mut fresh = incoming.clone();
            fresh.id = id;
            fresh.generation = self.next_generation();
            fresh.parent = self.parent_for_path(&fresh.path);
            self.by_path.insert(fresh.path.clone(), id);
            self.index_name(&fresh.name, id);
            self.link_parent(id, fresh.parent);
            if !fresh.tombstone {
                self.live += 1;
            }
            self.arena.insert(id, fresh);
            return;
        };

        let Some(existing) = self.arena.get(&id).cloned() else {
            return;
        };

        let mut updated = incoming.clone();
        updated.id = id;
        updated.parent = self.parent_for_path(&updated.path);
        // Generation increments exactly once per distinct observed change;
        // re-applying the same state is a no-op (idempotence).
        updated.generation = if existing.observably_differs(&updated) {
            self.next_generation()
        } else {
            existing.generation
        };

        if existing.path != updated.path {
            self.by_path.remove(&existing.path);
            // A rename onto an occupied path replaces whatever lived
            // there; the displaced entry must not linger in the arena.
            if let Some(displaced) = self.by_path.insert(updated.path.clone(), id) {
                if displaced != id {
                    self.remove_displaced(displaced);
                }
            }
            self.unlink_parent(id, existing.parent);
            self.link_parent(id, updated.parent);
        } else if existing.parent != updated.parent {
            self.unlink_parent(id, existing.parent);
            self.link_parent(id, updated.parent);
        }
        if !existing.name.eq_ignore_ascii_case(&updated.name) {
            self.unindex_name(&existing.name, id);
            self.index_name(&updated.name, id);
        }
        match (existing.tombstone, updated.tombstone) {
            (false, true) => self.live = self.live.saturating_sub(1),
            (true, false) => self.live += 1,
            _ => {}
        }
        self.arena.insert(id, updated);
    }

    /// Drops an entry whose path was taken over by a rename. Its
    /// `by_path` mapping has already been overwritten by the caller.
    fn remove_displaced(&mut self, id: EntryId) {
        let Some(entry) = self.arena.remove(&id) else {
            return;
        };
        self.unindex_name(&entry.name, id);
        self.unlink_parent(id, entry.parent);
        self.children.remove(&id);
        if !entry.tombstone {
            self.live = self.live.saturating_sub(1);
        }
    }

    fn apply_delete(&mut self, path: &str) {
        let Some(id) = self.by_path.remove(path) else {
            return;
        };
        let Some(entry) = self.arena.remove(&id) else {
            return;
        };
        self.unindex_name(&entry.name, id);
        self.unlink_parent(id, entry.parent);
        self.children.remove(&id);
        if !entry.tombstone {
            self.live = self.live.saturating_sub(1);
        }
    }

    /// Collects candidate ids for a plan, or `None` when cancelled mid-probe.
    fn candidates(&self, plan: &QueryPlan, cancel: &CancellationToken) -> Option<Vec<EntryId>> {
        if let Some(parent) = plan.parent {
            return Some(self.children.get(&parent).cloned().unwrap_or_default());
        }
        match &plan.probe {
            Some(NameProbe::Prefix(prefix)) => {
                let mut ids = Vec::new();
                let range = self
                    .name_index
                    .range::<String, _>((Bound::Included(prefix.clone()), Bound::Unbounded));
                for (name, name_ids) in range {
                    if !name.starts_with(prefix.as_str()) {
                        break;
                    }
                    ids.extend_from_slice(name_ids);
                }
                Some(ids)
            }
            Some(NameProbe::Contains(needle)) => {
                let mut ids = Vec::new();
                for (i, (name, name_ids)) in self.name_index.iter().enumerate() {
                    cancel.is_cancelled_sparse(i)?;
                    if name.contains(needle.as_str()) {
                        ids.extend_from_slice(name_ids);
                    }
                }
                Some(ids)
            }
            None => Some(self.arena.keys().copied().collect()),
        }
    }
}

/// The shipped `StorageAdapter` backed by process memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<StoreInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StorageAdapter for MemoryStore {
    fn upsert_batch(&self, entries: &[IndexedEntry]) -> Result<()> {
        let mut inner = self.inner.write();
        for entry in entries {
            inner.apply_upsert(entry);
        }
        Ok(())
    }

    fn delete_batch(&self, paths: &[String]) -> Result<()> {
        let mut inner = self.inner.write();
        for path in paths {
            inner.apply_delete(path);
        }
        Ok(())
    }

    fn get(&self, path: &str) -> Option<IndexedEntry> {
        let inner = self.inner.read();
        let id = inner.by_path.get(path)?;
        inner.arena.get(id).cloned()
    }

    fn execute(
        &self,
        plan: &QueryPlan,
        cancel: &CancellationToken,
    ) -> Result<Option<Vec<IndexedEntry>>> {
        if cancel.is_cancelled().is_none() {
            return Ok(None);
        }
        let inner = self.inner.read();
        let Some(candidates) = inner.candidates(plan, cancel) else {
            return Ok(None);
        };

        let mut results = Vec::new();
        for (i, id) in candidates.iter().enumerate() {
            if cancel.is_cancelled_sparse(i).is_none() {
                return Ok(None);
            }
            let Some(entry) = inner.arena.get(id) else {
                continue;
            };
            if entry.tombstone {
                continue;
            }
            if plan
                .predicates
                .iter()
                .all(|predicate| predicate.matches(entry, plan.case_sensitive))
            {
                results.push(entry.clone());
                if plan.candidate_cap > 0 && results.len() >= plan.candidate_cap {
                    break;
                }
            }
        }
        Ok(Some(results))
    }

    fn generation(&self) -> Generation {
        Generation(self.inner.read().max_generation)
    }

    fn entry_count(&self) -> usize {
        self.inner.read().live
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::SearchVersionTracker;
    use crate::storage::Predicate;
    use crate::types::{DownloadState, EntryKind};

    fn entry(path: &str) -> IndexedEntry {
        let name = path.rsplit('/').next().unwrap_or(path).to_string();
        IndexedEntry {
            id: EntryId::UNASSIGNED,
            path: path.to_string(),
            name,
            parent: None,
            size: 100,
            created_at: Some(10),
            modified_at: Some(20),
            kind: EntryKind::File,
            provider: None,
            download_state: DownloadState::Resident,
            generation: Generation(0),
            stale: false,
            tombstone: false,
            miss_count: 0,
        }
    }

    fn dir(path: &str) -> IndexedEntry {
        let mut e = entry(path);
        e.kind = EntryKind::Directory;
        e
    }

    #[test]
    fn upsert_assigns_ids_and_generations() {
        let store = MemoryStore::new();
        store
            .upsert_batch(&[dir("/data"), entry("/data/a.txt"), entry("/data/b.txt")])
            .unwrap();

        let a = store.get("/data/a.txt").unwrap();
        assert!(a.id.is_assigned());
        assert!(a.generation.0 > 0);
        assert_eq!(store.entry_count(), 3);
        // Parent resolution happens in the store.
        assert_eq!(a.parent, Some(store.get("/data").unwrap().id));
    }

    #[test]
    fn reapplying_identical_state_does_not_bump_generation() {
        let store = MemoryStore::new();
        store.upsert_batch(&[entry("/data/a.txt")]).unwrap();
        let first = store.get("/data/a.txt").unwrap();

        store.upsert_batch(&[entry("/data/a.txt")]).unwrap();
        let second = store.get("/data/a.txt").unwrap();
        assert_eq!(first.generation, second.generation);
        assert_eq!(first.id, second.id);

        let mut changed = entry("/data/a.txt");
        changed.size = 101;
        store.upsert_batch(&[changed]).unwrap();
        let third = store.get("/data/a.txt").unwrap();
        assert!(third.generation > second.generation);
    }

    #[test]
    fn rename_preserves_identity() {
        let store = MemoryStore::new();
        store.upsert_batch(&[entry("/data/a.txt")]).unwrap();
        let before = store.get("/data/a.txt").unwrap();

        let mut renamed = before.clone();
        renamed.path = "/data/b.txt".to_string();
        renamed.name = "b.txt".to_string();
        store.upsert_batch(&[renamed]).unwrap();

        assert!(store.get("/data/a.txt").is_none());
        let after = store.get("/data/b.txt").unwrap();
        assert_eq!(after.id, before.id);
        assert!(after.generation > before.generation);
    }

    #[test]
    fn rename_onto_an_occupied_path_replaces_the_displaced_entry() {
        let store = MemoryStore::new();
        store
            .upsert_batch(&[entry("/data/a.txt"), entry("/data/b.txt")])
            .unwrap();
        let source = store.get("/data/b.txt").unwrap();

        let mut moved = source.clone();
        moved.path = "/data/a.txt".to_string();
        moved.name = "a.txt".to_string();
        store.upsert_batch(&[moved]).unwrap();

        assert_eq!(store.get("/data/a.txt").unwrap().id, source.id);
        assert!(store.get("/data/b.txt").is_none());
        assert_eq!(store.entry_count(), 1);

        // The displaced entry is gone from the name index too.
        let results = store
            .execute(&QueryPlan::scan_all(), &CancellationToken::noop())
            .unwrap()
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, source.id);
    }

    #[test]
    fn tombstoned_entries_hidden_from_queries_but_visible_to_get() {
        let store = MemoryStore::new();
        store.upsert_batch(&[entry("/data/a.txt")]).unwrap();
        let mut dead = store.get("/data/a.txt").unwrap();
        dead.tombstone = true;
        store.upsert_batch(&[dead]).unwrap();

        let results = store
            .execute(&QueryPlan::scan_all(), &CancellationToken::noop())
            .unwrap()
            .unwrap();
        assert!(results.is_empty());
        assert!(store.get("/data/a.txt").unwrap().tombstone);
        assert_eq!(store.entry_count(), 0);

        store.delete_batch(&["/data/a.txt".to_string()]).unwrap();
        assert!(store.get("/data/a.txt").is_none());
    }

    #[test]
    fn prefix_probe_narrows_candidates() {
        let store = MemoryStore::new();
        store
            .upsert_batch(&[
                entry("/d/report.txt"),
                entry("/d/reply.txt"),
                entry("/d/zebra.txt"),
            ])
            .unwrap();

        let plan = QueryPlan {
            probe: Some(NameProbe::Prefix("rep".to_string())),
            parent: None,
            case_sensitive: false,
            predicates: vec![Predicate::NameContains("rep".to_string())],
            candidate_cap: 0,
        };
        let results = store
            .execute(&plan, &CancellationToken::noop())
            .unwrap()
            .unwrap();
        let mut names: Vec<_> = results.into_iter().map(|e| e.name).collect();
        names.sort();
        assert_eq!(names, vec!["reply.txt", "report.txt"]);
    }

    #[test]
    fn parent_probe_returns_direct_children() {
        let store = MemoryStore::new();
        store
            .upsert_batch(&[
                dir("/d"),
                dir("/d/sub"),
                entry("/d/a.txt"),
                entry("/d/sub/deep.txt"),
            ])
            .unwrap();

        let parent = store.get("/d").unwrap().id;
        let plan = QueryPlan {
            probe: None,
            parent: Some(parent),
            case_sensitive: false,
            predicates: Vec::new(),
            candidate_cap: 0,
        };
        let results = store
            .execute(&plan, &CancellationToken::noop())
            .unwrap()
            .unwrap();
        let mut names: Vec<_> = results.into_iter().map(|e| e.name).collect();
        names.sort();
        assert_eq!(names, vec!["a.txt", "sub"]);
    }

    #[test]
    fn cancelled_execution_returns_none() {
        let store = MemoryStore::new();
        store.upsert_batch(&[entry("/d/a.txt")]).unwrap();

        let tracker = SearchVersionTracker::new();
        let stale = tracker.token_for_version(tracker.next_version());
        tracker.next_version();

        let outcome = store.execute(&QueryPlan::scan_all(), &stale).unwrap();
        assert!(outcome.is_none());
    }

    #[test]
    fn candidate_cap_bounds_results() {
        let store = MemoryStore::new();
        let batch: Vec<_> = (0..10).map(|i| entry(&format!("/d/f{i}.txt"))).collect();
        store.upsert_batch(&batch).unwrap();

        let mut plan = QueryPlan::scan_all();
        plan.candidate_cap = 4;
        let results = store
            .execute(&plan, &CancellationToken::noop())
            .unwrap()
            .unwrap();
        assert_eq!(results.len(), 4);
    }
}
