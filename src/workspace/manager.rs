//! Filesystem side of workspaces: clones, worktrees and session directories.
//!
//! Each repository is cloned once under `<base>/repos/<owner>-<name>`. Every
//! workspace is a `git worktree` of that clone:
//!
//! ```text
//! <base>/
//! ├── repos/octo-widgets/                         (shared clone)
//! ├── claude-widgets-issue-7-1718000000/          (issue-rooted worktree)
//! ├── claude-widgets-pr-42-1718000000/            (same worktree after move)
//! └── sessions/claude-widgets-session-42-1718000000/
//! ```
//!
//! Every git command that touches a shared clone (clone, fetch, worktree
//! add/move/remove) runs under that clone's lock, so events for different
//! issues of one repository never race on the same `.git`.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::process::Command;

use super::{RepoRef, Source, Workspace, WorkspaceKey};
use crate::constants::COPY_PATTERNS_FILE;
use crate::keyed::KeyedLocks;

/// Creates and destroys the on-disk part of workspaces.
///
/// Implementations do not touch the [`super::WorkspaceRegistry`]; callers
/// register what they get back.
#[async_trait]
pub trait WorkspaceProvisioner: Send + Sync {
    /// Create a fresh worktree on a new branch for an issue.
    async fn create_for_issue(&self, repo: &RepoRef, issue: u64, ai_model: &str)
        -> Result<Workspace>;

    /// Create a worktree checked out at an existing PR head branch.
    async fn create_for_pr(
        &self,
        repo: &RepoRef,
        pr: u64,
        head_branch: &str,
        ai_model: &str,
    ) -> Result<Workspace>;

    /// Rename an issue-rooted worktree to its PR-rooted path.
    async fn move_to_pr(&self, workspace: &Workspace, pr: u64) -> Result<Workspace>;

    /// Create the directory holding AI session state.
    async fn create_session_dir(&self, workspace: &Workspace) -> Result<Workspace>;

    /// Remove the worktree and session directory. Missing paths are fine.
    async fn cleanup(&self, workspace: &Workspace) -> Result<()>;
}

/// [`WorkspaceProvisioner`] backed by the `git` CLI.
#[derive(Debug, Clone)]
pub struct WorktreeProvisioner {
    base_dir: PathBuf,
    branch_prefix: String,
    token: Option<String>,
    git_user_name: String,
    git_user_email: String,
    clone_locks: Arc<KeyedLocks<PathBuf>>,
}

impl WorktreeProvisioner {
    /// Creates a provisioner rooted at `base_dir`.
    pub fn new(base_dir: PathBuf, branch_prefix: impl Into<String>) -> Self {
        Self {
            base_dir,
            branch_prefix: branch_prefix.into(),
            token: None,
            git_user_name: "forgehand".to_string(),
            git_user_email: "forgehand@users.noreply.github.com".to_string(),
            clone_locks: Arc::default(),
        }
    }

    /// Authenticate clones and pushes with a GitHub token.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        let token = token.into();
        self.token = (!token.is_empty()).then_some(token);
        self
    }

    /// Commit author used in every worktree.
    pub fn with_identity(mut self, name: impl Into<String>, email: impl Into<String>) -> Self {
        self.git_user_name = name.into();
        self.git_user_email = email.into();
        self
    }

    /// Directory of the shared clone for `repo`.
    pub fn clone_dir(&self, repo: &RepoRef) -> PathBuf {
        self.base_dir
            .join("repos")
            .join(format!("{}-{}", repo.owner, repo.name))
    }

    /// Clone URL with the token in its authority. Non-HTTPS URLs (SSH,
    /// local paths) are used as given.
    fn remote_url(&self, repo: &RepoRef) -> String {
        let Some(token) = &self.token else {
            return repo.clone_url.clone();
        };
        match reqwest::Url::parse(&repo.clone_url) {
            Ok(mut url) if url.scheme() == "https" => {
                if url.set_username("x-access-token").is_err()
                    || url.set_password(Some(token.as_str())).is_err()
                {
                    return repo.clone_url.clone();
                }
                url.to_string()
            }
            _ => repo.clone_url.clone(),
        }
    }

    /// Clones or fetches `repo`. Callers hold the clone lock.
    async fn ensure_clone(&self, repo: &RepoRef) -> Result<PathBuf> {
        let clone_dir = self.clone_dir(repo);
        if clone_dir.join(".git").exists() {
            log::debug!("Fetching {}", repo);
            run_git(&clone_dir, &["fetch", "origin", "--prune"]).await?;
            return Ok(clone_dir);
        }

        if let Some(parent) = clone_dir.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        log::info!("Cloning {}...", repo);
        let target = path_str(&clone_dir)?;
        run_git(&self.base_dir, &["clone", &self.remote_url(repo), target])
            .await
            .with_context(|| format!("Failed to clone {}", repo))?;
        run_git(&clone_dir, &["config", "user.name", &self.git_user_name]).await?;
        run_git(&clone_dir, &["config", "user.email", &self.git_user_email]).await?;
        Ok(clone_dir)
    }

    fn worktree_path(&self, ai_model: &str, repo: &RepoRef, source: Source, ts: i64) -> PathBuf {
        let (kind, n) = match source {
            Source::Issue(n) => ("issue", n),
            Source::PullRequest(n) => ("pr", n),
        };
        self.base_dir
            .join(format!("{}-{}-{}-{}-{}", ai_model, repo.name, kind, n, ts))
    }
}

#[async_trait]
impl WorkspaceProvisioner for WorktreeProvisioner {
    async fn create_for_issue(
        &self,
        repo: &RepoRef,
        issue: u64,
        ai_model: &str,
    ) -> Result<Workspace> {
        let created_at = Utc::now();
        let ts = created_at.timestamp();
        let branch = format!("{}/{}/issue-{}-{}", self.branch_prefix, ai_model, issue, ts);
        let path = self.worktree_path(ai_model, repo, Source::Issue(issue), ts);

        self.clone_locks
            .run(&self.clone_dir(repo), async {
                let clone_dir = self.ensure_clone(repo).await?;
                log::info!("Creating worktree {} on branch {}", path.display(), branch);
                run_git(
                    &clone_dir,
                    &["worktree", "add", "-b", &branch, path_str(&path)?, "origin/HEAD"],
                )
                .await
                .context("Failed to create worktree")?;
                copy_pattern_files(&clone_dir, &path)
            })
            .await?;

        Ok(Workspace {
            key: WorkspaceKey::issue(repo, issue, ai_model),
            repo: repo.clone(),
            path,
            session_path: None,
            branch,
            pr_number: None,
            created_at,
        })
    }

    async fn create_for_pr(
        &self,
        repo: &RepoRef,
        pr: u64,
        head_branch: &str,
        ai_model: &str,
    ) -> Result<Workspace> {
        let created_at = Utc::now();
        let path = self.worktree_path(ai_model, repo, Source::PullRequest(pr), created_at.timestamp());

        // Detached so several models can work on the same PR branch at once.
        let start = format!("origin/{}", head_branch);
        self.clone_locks
            .run(&self.clone_dir(repo), async {
                let clone_dir = self.ensure_clone(repo).await?;
                log::info!("Creating worktree {} at {}", path.display(), start);
                run_git(&clone_dir, &["worktree", "add", "--detach", path_str(&path)?, &start])
                    .await
                    .with_context(|| format!("Failed to create worktree for PR #{}", pr))?;
                copy_pattern_files(&clone_dir, &path)
            })
            .await?;

        Ok(Workspace {
            key: WorkspaceKey::pull_request(repo, pr, ai_model),
            repo: repo.clone(),
            path,
            session_path: None,
            branch: head_branch.to_string(),
            pr_number: Some(pr),
            created_at,
        })
    }

    async fn move_to_pr(&self, workspace: &Workspace, pr: u64) -> Result<Workspace> {
        let new_path = self.worktree_path(
            workspace.ai_model(),
            &workspace.repo,
            Source::PullRequest(pr),
            workspace.created_at.timestamp(),
        );
        if new_path == workspace.path {
            return Ok(workspace.clone());
        }

        let clone_dir = self.clone_dir(&workspace.repo);
        let args = [
            "worktree",
            "move",
            path_str(&workspace.path)?,
            path_str(&new_path)?,
        ];
        self.clone_locks
            .run(&clone_dir, run_git(&clone_dir, &args))
            .await
            .with_context(|| format!("Failed to move worktree to PR #{}", pr))?;
        log::info!(
            "Moved worktree {} -> {}",
            workspace.path.display(),
            new_path.display()
        );

        let mut moved = workspace.clone();
        moved.path = new_path;
        moved.pr_number = Some(pr);
        Ok(moved)
    }

    async fn create_session_dir(&self, workspace: &Workspace) -> Result<Workspace> {
        let n = workspace.pr_number.unwrap_or(workspace.key.source.number());
        let session_path = self.base_dir.join("sessions").join(format!(
            "{}-{}-session-{}-{}",
            workspace.ai_model(),
            workspace.repo.name,
            n,
            workspace.created_at.timestamp()
        ));
        fs::create_dir_all(&session_path)
            .with_context(|| format!("Failed to create {}", session_path.display()))?;

        let mut ws = workspace.clone();
        ws.session_path = Some(session_path);
        Ok(ws)
    }

    async fn cleanup(&self, workspace: &Workspace) -> Result<()> {
        let clone_dir = self.clone_dir(&workspace.repo);

        if workspace.path.exists() {
            log::info!("Removing worktree at {}", workspace.path.display());
            let worktree = path_str(&workspace.path)?;
            self.clone_locks
                .run(&clone_dir, async {
                    let removed =
                        run_git(&clone_dir, &["worktree", "remove", worktree, "--force"]).await;

                    // If git refuses, prune and remove the directory manually
                    if let Err(e) = removed {
                        log::warn!("Git worktree remove failed ({}), trying prune...", e);
                        if workspace.path.exists() {
                            fs::remove_dir_all(&workspace.path).with_context(|| {
                                format!("Failed to remove {}", workspace.path.display())
                            })?;
                        }
                        if let Err(e) = run_git(&clone_dir, &["worktree", "prune"]).await {
                            log::debug!("Worktree prune failed: {}", e);
                        }
                    }
                    Ok::<_, anyhow::Error>(())
                })
                .await?;
        }

        if let Some(session_path) = &workspace.session_path {
            if session_path.exists() {
                fs::remove_dir_all(session_path)
                    .with_context(|| format!("Failed to remove {}", session_path.display()))?;
            }
        }
        Ok(())
    }
}

/// Extracts the AI model from a branch this agent created.
///
/// Branches look like `<prefix>/<model>/issue-<n>-<ts>`. Returns `None` for
/// branches from anywhere else.
pub fn model_from_branch(prefix: &str, branch: &str) -> Option<String> {
    let rest = branch.strip_prefix(prefix)?.strip_prefix('/')?;
    let (model, tail) = rest.split_once('/')?;
    (!model.is_empty() && !tail.is_empty()).then(|| model.to_string())
}

/// Runs git in `dir`, returning trimmed stdout.
pub(crate) async fn run_git(dir: &Path, args: &[&str]) -> Result<String> {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .await
        .with_context(|| format!("Failed to run git {}", args.first().unwrap_or(&"")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        anyhow::bail!("git {} failed: {}", args.first().unwrap_or(&""), stderr.trim());
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

fn path_str(path: &Path) -> Result<&str> {
    path.to_str()
        .ok_or_else(|| anyhow::anyhow!("Path contains invalid UTF-8: {:?}", path))
}

/// Reads `.forgehand_copy` and returns its glob patterns.
fn read_copy_patterns(repo_path: &Path) -> Result<Vec<String>> {
    let copy_path = repo_path.join(COPY_PATTERNS_FILE);
    if !copy_path.exists() {
        return Ok(Vec::new());
    }

    let content = fs::read_to_string(&copy_path)
        .with_context(|| format!("Failed to read {}", COPY_PATTERNS_FILE))?;
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(ToString::to_string)
        .collect())
}

/// Copies untracked files matching `.forgehand_copy` (env files, local
/// settings) from the shared clone into a new worktree.
fn copy_pattern_files(source_repo: &Path, dest_worktree: &Path) -> Result<()> {
    let patterns = read_copy_patterns(source_repo)?;
    if patterns.is_empty() {
        log::debug!("No {} patterns found, skipping file copy", COPY_PATTERNS_FILE);
        return Ok(());
    }

    let mut builder = GlobSetBuilder::new();
    for pattern in &patterns {
        match Glob::new(pattern) {
            Ok(glob) => {
                builder.add(glob);
            }
            Err(e) => log::warn!("Invalid pattern in {}: '{}' - {}", COPY_PATTERNS_FILE, pattern, e),
        }
    }
    let globset = builder.build()?;

    let copied = copy_matching_files(source_repo, dest_worktree, source_repo, &globset)?;
    log::info!("Copied {} file(s) matching {}", copied, COPY_PATTERNS_FILE);
    Ok(())
}

fn copy_matching_files(
    source_root: &Path,
    dest_root: &Path,
    current_dir: &Path,
    globset: &GlobSet,
) -> Result<usize> {
    let entries = match fs::read_dir(current_dir) {
        Ok(entries) => entries,
        Err(e) => {
            log::warn!("Failed to read directory {}: {}", current_dir.display(), e);
            return Ok(0);
        }
    };

    let mut copied = 0;
    for entry in entries.flatten() {
        let path = entry.path();
        if path.file_name().and_then(|n| n.to_str()) == Some(".git") {
            continue;
        }

        let rel_path = path
            .strip_prefix(source_root)
            .context("Failed to get relative path")?;

        if path.is_dir() {
            copied += copy_matching_files(source_root, dest_root, &path, globset)?;
        } else if globset.is_match(rel_path) {
            let dest_path = dest_root.join(rel_path);
            if let Some(parent) = dest_path.parent() {
                if let Err(e) = fs::create_dir_all(parent) {
                    log::warn!("Failed to create {}: {}", parent.display(), e);
                    continue;
                }
            }
            match fs::copy(&path, &dest_path) {
                Ok(_) => copied += 1,
                Err(e) => log::warn!(
                    "Failed to copy {} to {}: {} - continuing with remaining files",
                    path.display(),
                    dest_path.display(),
                    e
                ),
            }
        }
    }
    Ok(copied)
}
