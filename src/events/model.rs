//! GitHub payload objects shared by webhook events and REST responses.
//!
//! Only the fields the agent reads are modelled; serde ignores the rest.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::workspace::RepoRef;

/// A GitHub account.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Login name.
    #[serde(default)]
    pub login: String,
}

/// A repository as it appears in webhook payloads.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repository {
    /// Repository name.
    pub name: String,
    /// `owner/name`.
    pub full_name: String,
    /// Owner account.
    #[serde(default)]
    pub owner: User,
    /// HTTPS clone URL.
    #[serde(default)]
    pub clone_url: String,
    /// Default branch name.
    #[serde(default)]
    pub default_branch: String,
}

impl Repository {
    /// Owner login, taken from `full_name` when the owner object is sparse.
    pub fn owner_login(&self) -> &str {
        if self.owner.login.is_empty() {
            self.full_name
                .split_once('/')
                .map_or("", |(owner, _)| owner)
        } else {
            &self.owner.login
        }
    }

    /// Reference used for workspaces and API calls.
    pub fn to_ref(&self) -> RepoRef {
        let mut repo = RepoRef::new(self.owner_login(), self.name.clone());
        if !self.clone_url.is_empty() {
            repo.clone_url.clone_from(&self.clone_url);
        }
        repo
    }
}

/// An issue label.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Label {
    /// Label name.
    pub name: String,
}

/// An issue (or the issue view of a pull request).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    /// Issue number.
    pub number: u64,
    /// Title.
    #[serde(default)]
    pub title: String,
    /// Body text.
    #[serde(default)]
    pub body: Option<String>,
    /// `open` or `closed`.
    #[serde(default)]
    pub state: String,
    /// Labels on the issue.
    #[serde(default)]
    pub labels: Vec<Label>,
    /// Web URL.
    #[serde(default)]
    pub html_url: String,
    /// Present when the issue is a pull request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pull_request: Option<serde_json::Value>,
    /// Author.
    #[serde(default)]
    pub user: User,
}

impl Issue {
    /// True when this issue is the issue view of a pull request.
    pub fn is_pull_request(&self) -> bool {
        self.pull_request.is_some()
    }

    /// Body text, empty when absent.
    pub fn body_text(&self) -> &str {
        self.body.as_deref().unwrap_or("")
    }

    /// True if the issue carries a label named `name` (case-insensitive).
    pub fn has_label(&self, name: &str) -> bool {
        self.labels.iter().any(|l| l.name.eq_ignore_ascii_case(name))
    }
}

/// A branch pointer on a pull request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitRef {
    /// Branch name.
    #[serde(rename = "ref")]
    pub ref_name: String,
    /// Commit SHA.
    #[serde(default)]
    pub sha: String,
}

/// A pull request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequest {
    /// PR number.
    pub number: u64,
    /// Title.
    #[serde(default)]
    pub title: String,
    /// Body text.
    #[serde(default)]
    pub body: Option<String>,
    /// `open` or `closed`.
    #[serde(default)]
    pub state: String,
    /// Web URL.
    #[serde(default)]
    pub html_url: String,
    /// Source branch.
    #[serde(default)]
    pub head: GitRef,
    /// Target branch.
    #[serde(default)]
    pub base: GitRef,
    /// Author.
    #[serde(default)]
    pub user: User,
    /// Draft flag.
    #[serde(default)]
    pub draft: bool,
    /// Whether the PR was merged (closed events).
    #[serde(default)]
    pub merged: bool,
}

impl PullRequest {
    /// Body text, empty when absent.
    pub fn body_text(&self) -> &str {
        self.body.as_deref().unwrap_or("")
    }
}

/// An issue or PR conversation comment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    /// Comment id.
    pub id: u64,
    /// Body text.
    #[serde(default)]
    pub body: String,
    /// Author.
    #[serde(default)]
    pub user: User,
    /// Web URL.
    #[serde(default)]
    pub html_url: String,
    /// Creation time.
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

/// A comment attached to a line range of a PR diff.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewComment {
    /// Comment id.
    pub id: u64,
    /// Body text.
    #[serde(default)]
    pub body: String,
    /// File the comment is on.
    #[serde(default)]
    pub path: String,
    /// Last line of the commented range.
    #[serde(default)]
    pub line: Option<u64>,
    /// First line of a multi-line range.
    #[serde(default)]
    pub start_line: Option<u64>,
    /// Diff context around the comment.
    #[serde(default)]
    pub diff_hunk: String,
    /// Author.
    #[serde(default)]
    pub user: User,
    /// Parent comment when this is a reply.
    #[serde(default)]
    pub in_reply_to_id: Option<u64>,
}

impl ReviewComment {
    /// `(start, end)` lines, with `start == end` for single-line comments.
    pub fn line_range(&self) -> Option<(u64, u64)> {
        let end = self.line?;
        Some((self.start_line.unwrap_or(end), end))
    }
}

/// A submitted pull request review.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Review {
    /// Review id.
    pub id: u64,
    /// Summary body.
    #[serde(default)]
    pub body: Option<String>,
    /// `approved`, `changes_requested`, `commented`.
    #[serde(default)]
    pub state: String,
    /// Reviewer.
    #[serde(default)]
    pub user: User,
}

impl Review {
    /// Body text, empty when absent.
    pub fn body_text(&self) -> &str {
        self.body.as_deref().unwrap_or("")
    }
}

/// One commit in a push event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushCommit {
    /// Commit SHA.
    pub id: String,
    /// Commit message.
    #[serde(default)]
    pub message: String,
}
