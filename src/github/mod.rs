//! GitHub collaborator.
//!
//! [`GithubClient`] is the narrow contract the pipeline uses to publish
//! results: branches, pull requests, comments. [`RestGithubClient`] talks to
//! the REST API for remote objects and drives `git` in the workspace for
//! commits and pushes.

pub mod rest;

use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;

use crate::events::{Comment, Issue, PullRequest, Review, ReviewComment};
use crate::workspace::{RepoRef, Workspace};

pub use rest::RestGithubClient;

/// A file changed by a pull request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct PrFile {
    /// Path of the file.
    pub filename: String,
    /// Lines added.
    #[serde(default)]
    pub additions: u64,
    /// Lines removed.
    #[serde(default)]
    pub deletions: u64,
}

/// Everything said on a pull request so far.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrHistory {
    /// PR description.
    pub pr_body: String,
    /// Conversation comments.
    pub issue_comments: Vec<Comment>,
    /// Line comments.
    pub review_comments: Vec<ReviewComment>,
    /// Submitted reviews.
    pub reviews: Vec<Review>,
}

impl PrHistory {
    /// True when there is nothing to give the AI as context.
    pub fn is_empty(&self) -> bool {
        self.pr_body.is_empty()
            && self.issue_comments.is_empty()
            && self.review_comments.is_empty()
            && self.reviews.is_empty()
    }
}

/// Operations on GitHub the agent depends on.
#[async_trait]
pub trait GithubClient: Send + Sync {
    /// Publish the workspace branch so a PR can be opened from it.
    async fn create_branch(&self, workspace: &Workspace) -> Result<()>;

    /// Open a pull request from the workspace branch into the default branch.
    async fn create_pull_request(
        &self,
        workspace: &Workspace,
        title: &str,
        body: &str,
    ) -> Result<PullRequest>;

    /// Replace a pull request description.
    async fn update_pull_request(&self, repo: &RepoRef, pr: u64, body: &str) -> Result<()>;

    /// Bring the workspace up to date with the PR head. Callers treat
    /// failure as non-fatal.
    async fn pull_latest_changes(&self, workspace: &Workspace, pr: &PullRequest) -> Result<()>;

    /// Commit everything in the workspace and push it. Returns false when
    /// there was nothing to commit.
    async fn commit_and_push(&self, workspace: &Workspace, message: &str) -> Result<bool>;

    /// Comment on an issue or pull request conversation.
    async fn create_comment(&self, repo: &RepoRef, number: u64, body: &str) -> Result<()>;

    /// Reply in a review comment thread.
    async fn reply_to_review_comment(
        &self,
        repo: &RepoRef,
        pr: u64,
        comment_id: u64,
        body: &str,
    ) -> Result<()>;

    /// Fetch a pull request.
    async fn get_pull_request(&self, repo: &RepoRef, number: u64) -> Result<PullRequest>;

    /// Fetch the description, comments, line comments and reviews of a PR.
    async fn get_all_comments(&self, repo: &RepoRef, pr: &PullRequest) -> Result<PrHistory>;

    /// Delete a branch. Already-deleted branches are not an error.
    async fn delete_branch(&self, repo: &RepoRef, branch: &str) -> Result<()>;

    /// Line comments belonging to one review.
    async fn get_review_comments(
        &self,
        repo: &RepoRef,
        pr: u64,
        review_id: u64,
    ) -> Result<Vec<ReviewComment>>;

    /// Files changed by a pull request.
    async fn list_pull_request_files(&self, repo: &RepoRef, pr: u64) -> Result<Vec<PrFile>>;

    /// Open issues (not PRs) carrying `label`, at most `limit`.
    async fn list_issues_with_label(
        &self,
        repo: &RepoRef,
        label: &str,
        limit: usize,
    ) -> Result<Vec<Issue>>;
}
