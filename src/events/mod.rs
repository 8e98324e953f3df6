//! Typed GitHub events.
//!
//! Raw webhook payloads are converted into [`GithubEvent`], a closed enum
//! with one typed context per supported event kind. Handlers match on it
//! exhaustively: first the event kind, then the action string.

pub mod model;

use serde::Deserialize;
use std::fmt;
use std::str::FromStr;

pub use model::{
    Comment, GitRef, Issue, Label, PullRequest, PushCommit, Repository, Review, ReviewComment,
    User,
};

/// Supported event kinds, named by their `X-GitHub-Event` header value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// `issues`
    Issues,
    /// `pull_request`
    PullRequest,
    /// `issue_comment`
    IssueComment,
    /// `pull_request_review_comment`
    ReviewComment,
    /// `pull_request_review`
    Review,
    /// `push`
    Push,
    /// `workflow_dispatch`
    WorkflowDispatch,
    /// `schedule`
    Schedule,
}

impl EventKind {
    /// Header name of the event.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Issues => "issues",
            Self::PullRequest => "pull_request",
            Self::IssueComment => "issue_comment",
            Self::ReviewComment => "pull_request_review_comment",
            Self::Review => "pull_request_review",
            Self::Push => "push",
            Self::WorkflowDispatch => "workflow_dispatch",
            Self::Schedule => "schedule",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = EventParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "issues" => Self::Issues,
            "pull_request" => Self::PullRequest,
            "issue_comment" => Self::IssueComment,
            "pull_request_review_comment" => Self::ReviewComment,
            "pull_request_review" => Self::Review,
            "push" => Self::Push,
            "workflow_dispatch" => Self::WorkflowDispatch,
            "schedule" => Self::Schedule,
            other => return Err(EventParseError::UnsupportedEvent(other.to_string())),
        })
    }
}

/// Errors from [`parse_event`].
#[derive(Debug)]
pub enum EventParseError {
    /// The event type is not one the agent understands.
    UnsupportedEvent(String),
    /// The payload does not match the event type.
    InvalidPayload {
        /// Event type being parsed.
        event: EventKind,
        /// Deserialization failure.
        source: serde_json::Error,
    },
}

impl fmt::Display for EventParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnsupportedEvent(event) => write!(f, "Unsupported event type: {event}"),
            Self::InvalidPayload { event, source } => {
                write!(f, "Invalid {event} payload: {source}")
            }
        }
    }
}

impl std::error::Error for EventParseError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::UnsupportedEvent(_) => None,
            Self::InvalidPayload { source, .. } => Some(source),
        }
    }
}

/// `issues` event.
#[derive(Debug, Clone, Deserialize)]
pub struct IssuesContext {
    /// `opened`, `assigned`, `labeled`, ...
    pub action: String,
    /// The issue.
    pub issue: Issue,
    /// Label just applied (`labeled` only).
    #[serde(default)]
    pub label: Option<Label>,
    /// Repository.
    pub repository: Repository,
    /// Triggering user.
    #[serde(default)]
    pub sender: User,
}

/// `pull_request` event.
#[derive(Debug, Clone, Deserialize)]
pub struct PullRequestContext {
    /// `opened`, `synchronize`, `closed`, ...
    pub action: String,
    /// The pull request.
    pub pull_request: PullRequest,
    /// Repository.
    pub repository: Repository,
    /// Triggering user.
    #[serde(default)]
    pub sender: User,
}

/// `issue_comment` event (issues and PR conversations).
#[derive(Debug, Clone, Deserialize)]
pub struct IssueCommentContext {
    /// `created`, `edited`, `deleted`.
    pub action: String,
    /// Issue or PR the comment is on.
    pub issue: Issue,
    /// The comment.
    pub comment: Comment,
    /// Repository.
    pub repository: Repository,
    /// Triggering user.
    #[serde(default)]
    pub sender: User,
}

/// `pull_request_review_comment` event.
#[derive(Debug, Clone, Deserialize)]
pub struct ReviewCommentContext {
    /// `created`, `edited`, `deleted`.
    pub action: String,
    /// The line comment.
    pub comment: ReviewComment,
    /// Pull request the comment is on.
    pub pull_request: PullRequest,
    /// Repository.
    pub repository: Repository,
    /// Triggering user.
    #[serde(default)]
    pub sender: User,
}

/// `pull_request_review` event.
#[derive(Debug, Clone, Deserialize)]
pub struct ReviewContext {
    /// `submitted`, `edited`, `dismissed`.
    pub action: String,
    /// The review.
    pub review: Review,
    /// Pull request under review.
    pub pull_request: PullRequest,
    /// Repository.
    pub repository: Repository,
    /// Triggering user.
    #[serde(default)]
    pub sender: User,
}

/// `push` event.
#[derive(Debug, Clone, Deserialize)]
pub struct PushContext {
    /// Full ref, e.g. `refs/heads/main`.
    #[serde(rename = "ref")]
    pub ref_name: String,
    /// SHA before the push.
    #[serde(default)]
    pub before: String,
    /// SHA after the push.
    #[serde(default)]
    pub after: String,
    /// Pushed commits.
    #[serde(default)]
    pub commits: Vec<PushCommit>,
    /// Repository.
    pub repository: Repository,
    /// Triggering user.
    #[serde(default)]
    pub sender: User,
}

/// `workflow_dispatch` event.
#[derive(Debug, Clone, Deserialize)]
pub struct WorkflowDispatchContext {
    /// Dispatch inputs.
    #[serde(default)]
    pub inputs: serde_json::Map<String, serde_json::Value>,
    /// Ref the workflow ran on.
    #[serde(rename = "ref", default)]
    pub ref_name: String,
    /// Workflow file.
    #[serde(default)]
    pub workflow: String,
    /// Repository.
    pub repository: Repository,
    /// Triggering user.
    #[serde(default)]
    pub sender: User,
}

impl WorkflowDispatchContext {
    /// A string input, if present and non-empty.
    pub fn input(&self, name: &str) -> Option<&str> {
        self.inputs
            .get(name)
            .and_then(serde_json::Value::as_str)
            .filter(|s| !s.is_empty())
    }
}

/// `schedule` event.
#[derive(Debug, Clone, Deserialize)]
pub struct ScheduleContext {
    /// Cron expression that fired.
    pub schedule: String,
    /// Repository.
    pub repository: Repository,
    /// Scheduled runs have no human sender.
    #[serde(default)]
    pub sender: User,
}

/// A parsed GitHub event.
#[derive(Debug, Clone)]
pub enum GithubEvent {
    /// `issues`
    Issues(IssuesContext),
    /// `pull_request`
    PullRequest(PullRequestContext),
    /// `issue_comment`
    IssueComment(IssueCommentContext),
    /// `pull_request_review_comment`
    ReviewComment(ReviewCommentContext),
    /// `pull_request_review`
    Review(ReviewContext),
    /// `push`
    Push(PushContext),
    /// `workflow_dispatch`
    WorkflowDispatch(WorkflowDispatchContext),
    /// `schedule`
    Schedule(ScheduleContext),
}

impl GithubEvent {
    /// Event kind.
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Issues(_) => EventKind::Issues,
            Self::PullRequest(_) => EventKind::PullRequest,
            Self::IssueComment(_) => EventKind::IssueComment,
            Self::ReviewComment(_) => EventKind::ReviewComment,
            Self::Review(_) => EventKind::Review,
            Self::Push(_) => EventKind::Push,
            Self::WorkflowDispatch(_) => EventKind::WorkflowDispatch,
            Self::Schedule(_) => EventKind::Schedule,
        }
    }

    /// Action string; empty for kinds without one.
    pub fn action(&self) -> &str {
        match self {
            Self::Issues(c) => &c.action,
            Self::PullRequest(c) => &c.action,
            Self::IssueComment(c) => &c.action,
            Self::ReviewComment(c) => &c.action,
            Self::Review(c) => &c.action,
            Self::Push(_) | Self::WorkflowDispatch(_) | Self::Schedule(_) => "",
        }
    }

    /// Source repository.
    pub fn repository(&self) -> &Repository {
        match self {
            Self::Issues(c) => &c.repository,
            Self::PullRequest(c) => &c.repository,
            Self::IssueComment(c) => &c.repository,
            Self::ReviewComment(c) => &c.repository,
            Self::Review(c) => &c.repository,
            Self::Push(c) => &c.repository,
            Self::WorkflowDispatch(c) => &c.repository,
            Self::Schedule(c) => &c.repository,
        }
    }

    /// Triggering user (empty login for scheduled runs).
    pub fn sender(&self) -> &User {
        match self {
            Self::Issues(c) => &c.sender,
            Self::PullRequest(c) => &c.sender,
            Self::IssueComment(c) => &c.sender,
            Self::ReviewComment(c) => &c.sender,
            Self::Review(c) => &c.sender,
            Self::Push(c) => &c.sender,
            Self::WorkflowDispatch(c) => &c.sender,
            Self::Schedule(c) => &c.sender,
        }
    }
}

impl fmt::Display for GithubEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let action = self.action();
        if action.is_empty() {
            write!(f, "{} on {}", self.kind(), self.repository().full_name)
        } else {
            write!(f, "{}.{} on {}", self.kind(), action, self.repository().full_name)
        }
    }
}

/// Parses a raw webhook payload for `event_type`.
pub fn parse_event(event_type: &str, payload: &[u8]) -> Result<GithubEvent, EventParseError> {
    let kind: EventKind = event_type.parse()?;
    let invalid = |source| EventParseError::InvalidPayload {
        event: kind,
        source,
    };
    Ok(match kind {
        EventKind::Issues => GithubEvent::Issues(serde_json::from_slice(payload).map_err(invalid)?),
        EventKind::PullRequest => {
            GithubEvent::PullRequest(serde_json::from_slice(payload).map_err(invalid)?)
        }
        EventKind::IssueComment => {
            GithubEvent::IssueComment(serde_json::from_slice(payload).map_err(invalid)?)
        }
        EventKind::ReviewComment => {
            GithubEvent::ReviewComment(serde_json::from_slice(payload).map_err(invalid)?)
        }
        EventKind::Review => GithubEvent::Review(serde_json::from_slice(payload).map_err(invalid)?),
        EventKind::Push => GithubEvent::Push(serde_json::from_slice(payload).map_err(invalid)?),
        EventKind::WorkflowDispatch => {
            GithubEvent::WorkflowDispatch(serde_json::from_slice(payload).map_err(invalid)?)
        }
        EventKind::Schedule => {
            GithubEvent::Schedule(serde_json::from_slice(payload).map_err(invalid)?)
        }
    })
}
