//! The service facade: roots, indexing, search and delegation in one
//! handle.
//!
//! Hosts construct one `FindexService`, add watch roots, and issue
//! searches. Everything else (watching strategy, batching, grants)
//! stays internal.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::unbounded;
use parking_lot::RwLock;

use crate::access::{AccessTracker, GrantState, GrantStore};
use crate::config::Config;
use crate::delegate::{FileManagerDelegate, SystemFileManager};
use crate::error::{canonicalize_existing_path, FindexError, Result};
use crate::indexer::{Indexer, RootStatus};
use crate::rules::{PathRule, RuleSet};
use crate::search::{SearchEngine, SearchOptions, SearchResults, SearchTask};
use crate::storage::{MemoryStore, StorageAdapter};
use crate::types::{DownloadState, RootId};
use crate::watcher::{RootWatcher, WatchStrategy};

struct RootEntry {
    path: String,
    rules: Arc<RuleSet>,
    watcher: Option<RootWatcher>,
    pump: Option<JoinHandle<()>>,
}

pub struct FindexService {
    config: Arc<Config>,
    store: Arc<dyn StorageAdapter>,
    access: AccessTracker,
    indexer: Arc<Indexer>,
    engine: Arc<SearchEngine>,
    delegate: Box<dyn FileManagerDelegate>,
    roots: RwLock<HashMap<RootId, RootEntry>>,
    next_root: AtomicU64,
}

impl FindexService {
    /// Service over the in-memory store and system file manager.
    pub fn new(config: Config, grants: Box<dyn GrantStore>) -> Self {
        Self::with_store(config, Arc::new(MemoryStore::new()), grants)
    }

    pub fn with_store(
        config: Config,
        store: Arc<dyn StorageAdapter>,
        grants: Box<dyn GrantStore>,
    ) -> Self {
        let config = Arc::new(config);
        let indexer = Indexer::new(config.clone(), store.clone());
        let engine = Arc::new(SearchEngine::new(store.clone(), config.clone()));
        Self {
            config,
            store,
            access: AccessTracker::new(grants),
            indexer,
            engine,
            delegate: Box::new(SystemFileManager::new()),
            roots: RwLock::new(HashMap::new()),
            next_root: AtomicU64::new(1),
        }
    }

    pub fn set_delegate(&mut self, delegate: Box<dyn FileManagerDelegate>) {
        self.delegate = delegate;
    }

    pub fn store(&self) -> &Arc<dyn StorageAdapter> {
        &self.store
    }

    /// Adds a watch root: acquires its access grant, starts watching and
    /// enqueues the initial scan. Fails without side effects when the
    /// grant cannot be acquired.
    pub fn add_root(&self, path: &Path, rules: Vec<PathRule>) -> Result<RootId> {
        let canonical = canonicalize_existing_path(path.to_path_buf());
        let path_str = canonical.to_string_lossy().into_owned();
        if !canonical.is_dir() {
            return Err(FindexError::InvalidInput(format!(
                "watch root is not a directory: {path_str}"
            )));
        }

        let id = RootId(self.next_root.fetch_add(1, Ordering::SeqCst));
        self.access.acquire(id, &path_str)?;

        let rules = Arc::new(RuleSet::new(rules));
        let (message_tx, message_rx) = unbounded();
        let watcher = match RootWatcher::spawn(
            canonical,
            rules.clone(),
            &self.config,
            message_tx,
        ) {
            Ok(watcher) => watcher,
            Err(error) => {
                self.access.release(id, &path_str)?;
                return Err(error);
            }
        };
        log::info!(
            "watching {path_str} via {:?} as {id:?}",
            watcher.strategy()
        );

        self.indexer.register_root(id, path_str.clone(), rules.clone());
        let pump = self.indexer.spawn_pump(id, message_rx);

        self.roots.write().insert(
            id,
            RootEntry {
                path: path_str,
                rules,
                watcher: Some(watcher),
                pump: Some(pump),
            },
        );
        self.publish_roots();
        Ok(id)
    }

    /// Removes a root: stops watching, purges its entries and releases
    /// the grant.
    pub fn remove_root(&self, id: RootId) -> Result<()> {
        let Some(mut entry) = self.roots.write().remove(&id) else {
            return Err(FindexError::UnknownRoot(id));
        };
        if let Some(watcher) = entry.watcher.take() {
            watcher.stop();
        }
        // The watcher teardown closed the message channel; the pump
        // drains and exits.
        if let Some(pump) = entry.pump.take() {
            let _ = pump.join();
        }
        self.indexer.unregister_root(id);
        self.access.release(id, &entry.path)?;
        self.publish_roots();
        Ok(())
    }

    pub fn pause(&self, id: RootId) {
        self.indexer.pause_root(id);
    }

    pub fn resume(&self, id: RootId) {
        self.indexer.resume_root(id);
    }

    /// Handles the host reporting a revoked grant: indexed entries stay
    /// queryable but are marked stale, and watching is suspended.
    pub fn grant_revoked(&self, id: RootId) -> Result<()> {
        let mut roots = self.roots.write();
        let entry = roots.get_mut(&id).ok_or(FindexError::UnknownRoot(id))?;
        self.access.invalidate(id);
        if let Some(watcher) = entry.watcher.take() {
            watcher.stop();
        }
        drop(roots);
        self.indexer.set_root_stale(id, true);
        Ok(())
    }

    /// Revalidates a revoked root and brings it back to live indexing.
    pub fn reacquire(&self, id: RootId) -> Result<()> {
        let (path, rules) = {
            let roots = self.roots.read();
            let entry = roots.get(&id).ok_or(FindexError::UnknownRoot(id))?;
            (entry.path.clone(), entry.rules.clone())
        };
        self.access.mark_pending_reacquire(id);
        self.access.reacquire(id, &path)?;
        self.indexer.set_root_stale(id, false);

        let (message_tx, message_rx) = unbounded();
        let watcher =
            RootWatcher::spawn(PathBuf::from(&path), rules, &self.config, message_tx)?;
        let pump = self.indexer.spawn_pump(id, message_rx);
        {
            let mut roots = self.roots.write();
            if let Some(entry) = roots.get_mut(&id) {
                entry.watcher = Some(watcher);
                if let Some(old_pump) = entry.pump.replace(pump) {
                    let _ = old_pump.join();
                }
            }
        }
        // Catch up on everything missed while suspended.
        self.indexer.resume_root(id);
        Ok(())
    }

    pub fn grant_state(&self, id: RootId) -> Option<GrantState> {
        self.access.state(id)
    }

    pub fn status(&self, id: RootId) -> Option<RootStatus> {
        self.indexer.root_status(id)
    }

    pub fn watch_strategy(&self, id: RootId) -> Option<WatchStrategy> {
        self.roots
            .read()
            .get(&id)
            .and_then(|entry| entry.watcher.as_ref().map(|w| w.strategy()))
    }

    pub fn search(&self, raw: &str, case_sensitive: bool) -> Result<SearchResults> {
        self.engine.search(raw, case_sensitive)
    }

    pub fn search_with(&self, raw: &str, options: &SearchOptions) -> Result<SearchResults> {
        self.engine.search_with(raw, options)
    }

    pub fn search_incremental(
        &self,
        raw: &str,
        case_sensitive: bool,
    ) -> Result<Option<SearchResults>> {
        self.engine.search_incremental(raw, case_sensitive)
    }

    /// Keystroke search off the caller's thread; the result set arrives
    /// over the returned task's bounded channel.
    pub fn search_streaming(&self, raw: &str, case_sensitive: bool) -> SearchTask {
        self.engine.clone().search_streaming(raw, case_sensitive)
    }

    pub fn search_unbounded(&self, raw: &str, case_sensitive: bool) -> Result<SearchResults> {
        self.engine.search_unbounded(raw, case_sensitive)
    }

    /// Opens a result. Online-only entries get a download request
    /// instead; the provider materializes and the host reopens.
    pub fn open(&self, path: &str) -> Result<()> {
        match self.store.get(path) {
            Some(entry) if entry.download_state == DownloadState::OnlineOnly => {
                self.delegate.request_download(path)
            }
            Some(_) => self.delegate.open(path),
            None => Err(FindexError::InvalidInput(format!(
                "not an indexed path: {path}"
            ))),
        }
    }

    pub fn reveal(&self, path: &str) -> Result<()> {
        self.delegate.reveal(path)
    }

    /// Stops all watchers, drains the scan queue and commits the final
    /// batch.
    pub fn shutdown(&self) {
        let ids: Vec<_> = self.roots.read().keys().copied().collect();
        for id in ids {
            let entry = self.roots.write().remove(&id);
            if let Some(mut entry) = entry {
                if let Some(watcher) = entry.watcher.take() {
                    watcher.stop();
                }
                if let Some(pump) = entry.pump.take() {
                    let _ = pump.join();
                }
            }
        }
        self.indexer.shutdown();
    }

    /// Pushes the current root set into the search engine for the
    /// implicit exclude filter.
    fn publish_roots(&self) {
        let roots = self
            .roots
            .read()
            .values()
            .map(|entry| (entry.path.clone(), entry.rules.clone()))
            .collect();
        self.engine.set_roots(roots);
    }
}
