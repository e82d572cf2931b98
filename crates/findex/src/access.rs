//! Access grant tracking for watched roots.
//!
//! Sandboxed hosts hand out opaque persistence tokens when the user
//! picks a folder; those tokens must be stored and redeemed on restart
//! to regain access without prompting. The tracker owns the grant state
//! machine per root and a pluggable token store.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::{FindexError, Result};
use crate::types::RootId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GrantState {
    /// The grant resolves and the root is traversable.
    Valid,
    /// Redemption or traversal failed; the root needs user action.
    Invalid,
    /// The root came back after an invalid period and must be
    /// revalidated before indexing resumes.
    PendingReacquire,
}

#[derive(Debug, Clone)]
pub struct AccessGrant {
    pub root: RootId,
    pub token: String,
    pub state: GrantState,
}

/// Persistence for grant tokens, keyed by root path.
pub trait GrantStore: Send + Sync {
    fn load_token(&self, root_path: &str) -> Result<Option<String>>;
    fn save_token(&self, root_path: &str, token: &str) -> Result<()>;
    fn remove_token(&self, root_path: &str) -> Result<()>;
}

/// Token store backed by a single JSON file.
#[derive(Debug)]
pub struct JsonGrantStore {
    path: PathBuf,
}

impl JsonGrantStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    fn read_map(&self) -> Result<HashMap<String, String>> {
        match fs::read_to_string(&self.path) {
            Ok(raw) => serde_json::from_str(&raw)
                .map_err(|error| FindexError::Internal(format!("grant store parse: {error}"))),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(HashMap::new()),
            Err(error) => Err(error.into()),
        }
    }

    fn write_map(&self, map: &HashMap<String, String>) -> Result<()> {
        let raw = serde_json::to_string_pretty(map)
            .map_err(|error| FindexError::Internal(format!("grant store encode: {error}")))?;
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, raw)?;
        Ok(())
    }
}

impl GrantStore for JsonGrantStore {
    fn load_token(&self, root_path: &str) -> Result<Option<String>> {
        Ok(self.read_map()?.remove(root_path))
    }

    fn save_token(&self, root_path: &str, token: &str) -> Result<()> {
        let mut map = self.read_map()?;
        map.insert(root_path.to_string(), token.to_string());
        self.write_map(&map)
    }

    fn remove_token(&self, root_path: &str) -> Result<()> {
        let mut map = self.read_map()?;
        if map.remove(root_path).is_some() {
            self.write_map(&map)?;
        }
        Ok(())
    }
}

/// Tracks grant state per root.
pub struct AccessTracker {
    store: Box<dyn GrantStore>,
    grants: RwLock<HashMap<RootId, AccessGrant>>,
}

impl AccessTracker {
    pub fn new(store: Box<dyn GrantStore>) -> Self {
        Self {
            store,
            grants: RwLock::new(HashMap::new()),
        }
    }

    /// Acquires (or redeems) a grant for a root. On failure the grant is
    /// recorded as invalid and the root must not be indexed.
    pub fn acquire(&self, root: RootId, root_path: &str) -> Result<AccessGrant> {
        let token = match self.store.load_token(root_path)? {
            Some(token) => token,
            None => {
                let token = mint_token(root_path);
                self.store.save_token(root_path, &token)?;
                token
            }
        };

        match validate_traversable(Path::new(root_path)) {
            Ok(()) => {
                let grant = AccessGrant {
                    root,
                    token,
                    state: GrantState::Valid,
                };
                self.grants.write().insert(root, grant.clone());
                Ok(grant)
            }
            Err(reason) => {
                self.grants.write().insert(
                    root,
                    AccessGrant {
                        root,
                        token,
                        state: GrantState::Invalid,
                    },
                );
                Err(FindexError::AccessDenied {
                    root: root_path.to_string(),
                    reason,
                })
            }
        }
    }

    /// Drops the grant and its persisted token.
    pub fn release(&self, root: RootId, root_path: &str) -> Result<()> {
        self.grants.write().remove(&root);
        self.store.remove_token(root_path)
    }

    pub fn state(&self, root: RootId) -> Option<GrantState> {
        self.grants.read().get(&root).map(|grant| grant.state)
    }

    pub fn is_valid(&self, root: RootId) -> bool {
        self.state(root) == Some(GrantState::Valid)
    }

    /// Records a grant as no longer resolving, e.g. the host reported
    /// the permission revoked or the volume unmounted.
    pub fn invalidate(&self, root: RootId) {
        if let Some(grant) = self.grants.write().get_mut(&root) {
            grant.state = GrantState::Invalid;
        }
    }

    /// Marks a previously invalid root as needing revalidation, e.g.
    /// after its volume remounts.
    pub fn mark_pending_reacquire(&self, root: RootId) {
        if let Some(grant) = self.grants.write().get_mut(&root) {
            if grant.state == GrantState::Invalid {
                grant.state = GrantState::PendingReacquire;
            }
        }
    }

    /// Attempts to move a pending root back to valid.
    pub fn reacquire(&self, root: RootId, root_path: &str) -> Result<()> {
        match validate_traversable(Path::new(root_path)) {
            Ok(()) => {
                if let Some(grant) = self.grants.write().get_mut(&root) {
                    grant.state = GrantState::Valid;
                }
                Ok(())
            }
            Err(reason) => {
                if let Some(grant) = self.grants.write().get_mut(&root) {
                    grant.state = GrantState::Invalid;
                }
                Err(FindexError::AccessDenied {
                    root: root_path.to_string(),
                    reason,
                })
            }
        }
    }

    /// Revalidates every tracked grant against the filesystem. Returns
    /// the roots whose state changed.
    pub fn revalidate_all(&self, paths: &HashMap<RootId, String>) -> Vec<(RootId, GrantState)> {
        let mut changed = Vec::new();
        let mut grants = self.grants.write();
        for (root, grant) in grants.iter_mut() {
            let Some(path) = paths.get(root) else {
                continue;
            };
            let next = match validate_traversable(Path::new(path)) {
                Ok(()) => GrantState::Valid,
                Err(_) if grant.state == GrantState::Valid => GrantState::Invalid,
                Err(_) => grant.state,
            };
            if next != grant.state {
                grant.state = next;
                changed.push((*root, next));
            }
        }
        changed
    }
}

/// A grant is only as good as the ability to list the root.
fn validate_traversable(path: &Path) -> std::result::Result<(), String> {
    match fs::read_dir(path) {
        Ok(_) => Ok(()),
        Err(error) => Err(error.to_string()),
    }
}

/// Tokens are opaque to us; outside a sandbox broker a stable
/// path-derived marker is sufficient.
fn mint_token(root_path: &str) -> String {
    format!("grant:{root_path}")
}
