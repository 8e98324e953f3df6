//! Workspaces: per-task git working directories.
//!
//! A [`Workspace`] is bound to exactly one (source entity, AI model) pair,
//! named by a [`WorkspaceKey`]. Workspaces are created by a
//! [`WorkspaceProvisioner`] and tracked by the [`WorkspaceRegistry`].
//!
//! # Architecture
//!
//! ```text
//! WorkspaceRegistry (shared, short critical sections)
//!     │
//!     ├── by_key: WorkspaceKey → Workspace
//!     ├── by_pr:  (repo, pr)  → {WorkspaceKey}
//!     └── creating: per-key async guards for create_or_get
//!
//! WorkspaceProvisioner (trait)
//!     └── WorktreeProvisioner (git clone + git worktree)
//! ```

pub mod manager;
pub mod registry;

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

pub use manager::{model_from_branch, WorkspaceProvisioner, WorktreeProvisioner};
pub use registry::WorkspaceRegistry;

/// A repository as the agent needs it: owner, name and clone URL.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct RepoRef {
    /// Owner login (user or organization).
    pub owner: String,
    /// Repository name.
    pub name: String,
    /// HTTPS clone URL.
    pub clone_url: String,
}

impl RepoRef {
    /// Creates a repository reference with the default GitHub clone URL.
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Self {
        let owner = owner.into();
        let name = name.into();
        let clone_url = format!("https://github.com/{}/{}.git", owner, name);
        Self {
            owner,
            name,
            clone_url,
        }
    }

    /// `owner/name`.
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }
}

impl fmt::Display for RepoRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

/// The entity a workspace was created for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "kind", content = "number", rename_all = "snake_case")]
pub enum Source {
    /// An issue number.
    Issue(u64),
    /// A pull request number.
    PullRequest(u64),
}

impl Source {
    /// The issue or pull request number.
    pub fn number(self) -> u64 {
        match self {
            Self::Issue(n) | Self::PullRequest(n) => n,
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Issue(n) => write!(f, "issue #{}", n),
            Self::PullRequest(n) => write!(f, "PR #{}", n),
        }
    }
}

/// Identity of a workspace: (source entity, repository, AI model).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct WorkspaceKey {
    /// Repository full name (`owner/name`).
    pub repo: String,
    /// Issue or pull request the workspace serves.
    pub source: Source,
    /// AI model tag.
    pub ai_model: String,
}

impl WorkspaceKey {
    /// Key for an issue-rooted workspace.
    pub fn issue(repo: &RepoRef, number: u64, ai_model: impl Into<String>) -> Self {
        Self {
            repo: repo.full_name(),
            source: Source::Issue(number),
            ai_model: ai_model.into(),
        }
    }

    /// Key for a PR-rooted workspace.
    pub fn pull_request(repo: &RepoRef, number: u64, ai_model: impl Into<String>) -> Self {
        Self {
            repo: repo.full_name(),
            source: Source::PullRequest(number),
            ai_model: ai_model.into(),
        }
    }
}

impl fmt::Display for WorkspaceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} [{}]", self.repo, self.source, self.ai_model)
    }
}

/// An on-disk working copy and branch bound to one identity key.
///
/// Values handed out by the registry are snapshots. The branch never
/// changes after creation; PR linkage and moved paths are stored through
/// [`WorkspaceRegistry::register`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Workspace {
    /// Identity the workspace was created under.
    pub key: WorkspaceKey,
    /// Repository the workspace was cloned from.
    pub repo: RepoRef,
    /// Worktree directory.
    pub path: PathBuf,
    /// Directory holding AI session state, once created.
    pub session_path: Option<PathBuf>,
    /// Branch checked out in the worktree.
    pub branch: String,
    /// Pull request the workspace is linked to.
    pub pr_number: Option<u64>,
    /// Creation time, the basis for expiry.
    pub created_at: DateTime<Utc>,
}

impl Workspace {
    /// AI model tag.
    pub fn ai_model(&self) -> &str {
        &self.key.ai_model
    }

    /// True once `ttl` has elapsed since creation at time `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        // A creation time in the future counts as age zero.
        let age = (now - self.created_at).to_std().unwrap_or(Duration::ZERO);
        age >= ttl
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// Builds a workspace value without touching the filesystem.
    pub fn workspace(key: WorkspaceKey, created_at: DateTime<Utc>) -> Workspace {
        let repo = match key.repo.split_once('/') {
            Some((owner, name)) => RepoRef::new(owner, name),
            None => RepoRef::new("owner", key.repo.clone()),
        };
        let n = key.source.number();
        Workspace {
            path: PathBuf::from(format!("/tmp/ws/{}-{}-{}", key.ai_model, repo.name, n)),
            branch: format!("forgehand/{}/issue-{}", key.ai_model, n),
            session_path: None,
            pr_number: match key.source {
                Source::PullRequest(pr) => Some(pr),
                Source::Issue(_) => None,
            },
            repo,
            key,
            created_at,
        }
    }
}
