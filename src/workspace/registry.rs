//! Shared registry of live workspaces.
//!
//! The registry is the single owner of workspace identity. Request handlers
//! call [`WorkspaceRegistry::create_or_get`]; the expiry sweeper calls
//! [`WorkspaceRegistry::expired_since`] and [`WorkspaceRegistry::remove`].
//!
//! # Locking
//!
//! All map mutations happen inside a short `RwLock` critical section. The
//! lock is never held across an `.await`, a factory call, or any external
//! operation. Queries return cloned snapshots so callers can act on them
//! (close sessions, delete directories) with the lock released.
//!
//! Concurrent `create_or_get` calls for the same key serialize on a per-key
//! async guard: the first caller runs the factory, later callers wait and
//! then observe the registered result.

use anyhow::Result;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::RwLock;
use std::time::Duration;

use super::{Source, Workspace, WorkspaceKey};
use crate::keyed::KeyedLocks;

type PrIndexKey = (String, u64);

#[derive(Debug, Default)]
struct RegistryState {
    by_key: HashMap<WorkspaceKey, Workspace>,
    by_pr: HashMap<PrIndexKey, HashSet<WorkspaceKey>>,
}

impl RegistryState {
    fn lookup(&self, key: &WorkspaceKey) -> Option<Workspace> {
        if let Some(ws) = self.by_key.get(key) {
            return Some(ws.clone());
        }
        // A PR key also matches an issue-rooted workspace later linked to that PR.
        let Source::PullRequest(pr) = key.source else {
            return None;
        };
        self.by_pr
            .get(&(key.repo.clone(), pr))?
            .iter()
            .filter_map(|k| self.by_key.get(k))
            .find(|ws| ws.key.ai_model == key.ai_model)
            .cloned()
    }

    fn unindex_pr(&mut self, key: &WorkspaceKey, pr: u64) {
        let index_key = (key.repo.clone(), pr);
        if let Some(keys) = self.by_pr.get_mut(&index_key) {
            keys.remove(key);
            if keys.is_empty() {
                self.by_pr.remove(&index_key);
            }
        }
    }

    fn insert(&mut self, ws: Workspace) {
        if let Some(previous) = self.by_key.get(&ws.key).and_then(|old| old.pr_number) {
            if ws.pr_number != Some(previous) {
                let key = ws.key.clone();
                self.unindex_pr(&key, previous);
            }
        }
        if let Some(pr) = ws.pr_number {
            self.by_pr
                .entry((ws.key.repo.clone(), pr))
                .or_default()
                .insert(ws.key.clone());
        }
        self.by_key.insert(ws.key.clone(), ws);
    }
}

/// Thread-safe map from identity key to [`Workspace`].
#[derive(Debug, Default)]
pub struct WorkspaceRegistry {
    state: RwLock<RegistryState>,
    creating: KeyedLocks<WorkspaceKey>,
}

impl WorkspaceRegistry {
    /// Create a new empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the workspace for `key`, or builds one with `factory`.
    ///
    /// At most one factory runs per key at a time. A caller that loses the
    /// race waits for the winner and reuses its workspace. A failing factory
    /// registers nothing and its error is returned to that caller only.
    ///
    /// The factory's workspace is stored under `key`, whatever key it carries.
    pub async fn create_or_get<F, Fut>(&self, key: &WorkspaceKey, factory: F) -> Result<Workspace>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Workspace>>,
    {
        if let Some(ws) = self.get(key) {
            return Ok(ws);
        }

        self.creating
            .run(key, async {
                if let Some(ws) = self.get(key) {
                    log::debug!("Reusing workspace created concurrently for {}", key);
                    return Ok(ws);
                }
                let mut ws = factory().await?;
                ws.key = key.clone();
                if let Ok(mut state) = self.state.write() {
                    state.insert(ws.clone());
                }
                log::info!("Registered workspace {} at {}", key, ws.path.display());
                Ok(ws)
            })
            .await
    }

    /// Look up a workspace by key without creating one.
    ///
    /// PR keys also match issue-rooted workspaces linked to that PR.
    #[must_use]
    pub fn get(&self, key: &WorkspaceKey) -> Option<Workspace> {
        self.state.read().ok()?.lookup(key)
    }

    /// Binds `workspace` to `pr_number` and stores the updated record.
    ///
    /// Later lookups by PR (including [`Self::all_by_pr`]) find it even
    /// though it was created from an issue. Also used to persist path
    /// changes made after creation (moved worktree, session directory).
    pub fn register(&self, workspace: &Workspace, pr_number: u64) -> Workspace {
        let mut ws = workspace.clone();
        ws.pr_number = Some(pr_number);
        if let Ok(mut state) = self.state.write() {
            state.insert(ws.clone());
        }
        log::info!("Linked workspace {} to PR #{}", ws.key, pr_number);
        ws
    }

    /// Every workspace bound to `pr` in `repo`, across all AI models.
    #[must_use]
    pub fn all_by_pr(&self, repo: &str, pr: u64) -> Vec<Workspace> {
        let Ok(state) = self.state.read() else {
            return Vec::new();
        };
        let mut found: Vec<Workspace> = state
            .by_pr
            .get(&(repo.to_string(), pr))
            .map(|keys| keys.iter().filter_map(|k| state.by_key.get(k)).cloned().collect())
            .unwrap_or_default();
        found.sort_by(|a, b| a.key.ai_model.cmp(&b.key.ai_model));
        found
    }

    /// Snapshot of every workspace older than `ttl`.
    ///
    /// Side-effect free. The result is detached from the registry: acting on
    /// it never needs the registry lock.
    #[must_use]
    pub fn expired_since(&self, ttl: Duration) -> Vec<Workspace> {
        self.expired_at(Utc::now(), ttl)
    }

    /// [`Self::expired_since`] evaluated at an explicit instant.
    #[must_use]
    pub fn expired_at(&self, now: DateTime<Utc>, ttl: Duration) -> Vec<Workspace> {
        let Ok(state) = self.state.read() else {
            return Vec::new();
        };
        let mut expired: Vec<Workspace> = state
            .by_key
            .values()
            .filter(|ws| ws.is_expired_at(now, ttl))
            .cloned()
            .collect();
        expired.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.path.cmp(&b.path))
        });
        expired
    }

    /// Deregisters `workspace`.
    ///
    /// Returns false if it was already gone. Removal only succeeds when the
    /// stored entry is the same workspace (same path), so a stale snapshot
    /// cannot evict a newer workspace recreated under the same key.
    pub fn remove(&self, workspace: &Workspace) -> bool {
        let Ok(mut state) = self.state.write() else {
            return false;
        };
        let matches = state
            .by_key
            .get(&workspace.key)
            .is_some_and(|stored| stored.path == workspace.path);
        if !matches {
            return false;
        }
        let Some(removed) = state.by_key.remove(&workspace.key) else {
            return false;
        };
        if let Some(pr) = removed.pr_number {
            state.unindex_pr(&removed.key, pr);
        }
        true
    }

    /// Whether `workspace` is still the entry registered under its key.
    ///
    /// False once it was removed or replaced by a workspace at another path.
    #[must_use]
    pub fn is_current(&self, workspace: &Workspace) -> bool {
        self.state.read().is_ok_and(|state| {
            state
                .by_key
                .get(&workspace.key)
                .is_some_and(|stored| stored.path == workspace.path)
        })
    }

    /// Snapshot of every registered workspace, oldest first.
    #[must_use]
    pub fn list(&self) -> Vec<Workspace> {
        self.expired_at(Utc::now(), Duration::ZERO)
    }

    /// Number of registered workspaces.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.read().map(|s| s.by_key.len()).unwrap_or(0)
    }

    /// Check if the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
