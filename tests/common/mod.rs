//! In-memory collaborators shared by the integration tests.

#![allow(dead_code)]

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use forgehand::events::{Issue, PullRequest, ReviewComment, User};
use forgehand::github::{GithubClient, PrFile, PrHistory};
use forgehand::session::{ProcessSession, SessionError, SessionFactory, SessionResponse};
use forgehand::workspace::{RepoRef, WorkspaceProvisioner};
use forgehand::{Agent, Config, Workspace, WorkspaceKey};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const AI_OUTPUT: &str = "## Summary\nAdd login endpoint\n## Changes\n- src/auth.rs\n## Test Plan\ncargo test\n";

pub const REPO_JSON: &str = r#"{"name": "widgets", "full_name": "octo/widgets",
    "owner": {"login": "octo"}, "clone_url": "https://github.com/octo/widgets.git"}"#;

/// GitHub fake that records every call.
#[derive(Default)]
pub struct FakeGithub {
    pub calls: Mutex<Vec<String>>,
    pub comments: Mutex<Vec<(u64, String)>>,
    pub pr_bodies: Mutex<Vec<(u64, String)>>,
    pub commits: Mutex<Vec<String>>,
    pub deleted_branches: Mutex<Vec<String>>,
    pub prs: Mutex<HashMap<u64, PullRequest>>,
    pub labeled_issues: Mutex<Vec<Issue>>,
    next_pr: AtomicU64,
}

impl FakeGithub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            next_pr: AtomicU64::new(100),
            ..Self::default()
        })
    }

    /// Makes an existing PR known to `get_pull_request`.
    pub fn add_pr(&self, number: u64, head: &str) {
        let mut pr = PullRequest {
            number,
            title: format!("PR {number}"),
            ..PullRequest::default()
        };
        pr.head.ref_name = head.to_string();
        pr.base.ref_name = "main".to_string();
        self.prs.lock().unwrap().insert(number, pr);
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }
}

#[async_trait]
impl GithubClient for FakeGithub {
    async fn create_branch(&self, workspace: &Workspace) -> Result<()> {
        self.record(format!("create_branch {}", workspace.branch));
        Ok(())
    }

    async fn create_pull_request(
        &self,
        workspace: &Workspace,
        title: &str,
        body: &str,
    ) -> Result<PullRequest> {
        let number = self.next_pr.fetch_add(1, Ordering::SeqCst);
        self.record(format!("create_pull_request {number}"));
        let mut pr = PullRequest {
            number,
            title: title.to_string(),
            body: Some(body.to_string()),
            html_url: format!("https://github.com/octo/widgets/pull/{number}"),
            ..PullRequest::default()
        };
        pr.head.ref_name.clone_from(&workspace.branch);
        pr.base.ref_name = "main".to_string();
        self.prs.lock().unwrap().insert(number, pr.clone());
        Ok(pr)
    }

    async fn update_pull_request(&self, _repo: &RepoRef, pr: u64, body: &str) -> Result<()> {
        self.record(format!("update_pull_request {pr}"));
        self.pr_bodies.lock().unwrap().push((pr, body.to_string()));
        Ok(())
    }

    async fn pull_latest_changes(&self, _workspace: &Workspace, pr: &PullRequest) -> Result<()> {
        self.record(format!("pull_latest_changes {}", pr.number));
        Ok(())
    }

    async fn commit_and_push(&self, _workspace: &Workspace, message: &str) -> Result<bool> {
        self.record("commit_and_push".to_string());
        self.commits.lock().unwrap().push(message.to_string());
        Ok(true)
    }

    async fn create_comment(&self, _repo: &RepoRef, number: u64, body: &str) -> Result<()> {
        self.record(format!("create_comment {number}"));
        self.comments.lock().unwrap().push((number, body.to_string()));
        Ok(())
    }

    async fn reply_to_review_comment(
        &self,
        _repo: &RepoRef,
        pr: u64,
        comment_id: u64,
        body: &str,
    ) -> Result<()> {
        self.record(format!("reply_to_review_comment {pr} {comment_id}"));
        self.comments.lock().unwrap().push((pr, body.to_string()));
        Ok(())
    }

    async fn get_pull_request(&self, _repo: &RepoRef, number: u64) -> Result<PullRequest> {
        self.record(format!("get_pull_request {number}"));
        self.prs
            .lock()
            .unwrap()
            .get(&number)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("PR #{number} not found"))
    }

    async fn get_all_comments(&self, _repo: &RepoRef, pr: &PullRequest) -> Result<PrHistory> {
        Ok(PrHistory {
            pr_body: pr.body_text().to_string(),
            ..PrHistory::default()
        })
    }

    async fn delete_branch(&self, _repo: &RepoRef, branch: &str) -> Result<()> {
        self.record(format!("delete_branch {branch}"));
        self.deleted_branches.lock().unwrap().push(branch.to_string());
        Ok(())
    }

    async fn get_review_comments(
        &self,
        _repo: &RepoRef,
        _pr: u64,
        _review_id: u64,
    ) -> Result<Vec<ReviewComment>> {
        Ok(vec![ReviewComment {
            id: 1,
            body: "rename this".to_string(),
            path: "src/lib.rs".to_string(),
            line: Some(4),
            user: User {
                login: "bob".to_string(),
            },
            ..ReviewComment::default()
        }])
    }

    async fn list_pull_request_files(&self, _repo: &RepoRef, _pr: u64) -> Result<Vec<PrFile>> {
        Ok(vec![PrFile {
            filename: "src/lib.rs".to_string(),
            additions: 3,
            deletions: 1,
        }])
    }

    async fn list_issues_with_label(
        &self,
        _repo: &RepoRef,
        label: &str,
        limit: usize,
    ) -> Result<Vec<Issue>> {
        self.record(format!("list_issues_with_label {label} {limit}"));
        Ok(self
            .labeled_issues
            .lock()
            .unwrap()
            .iter()
            .take(limit)
            .cloned()
            .collect())
    }
}

/// Provisioner that only fabricates paths.
#[derive(Default)]
pub struct FakeProvisioner {
    pub created: AtomicUsize,
    pub session_dirs: AtomicUsize,
    pub cleaned: Mutex<Vec<PathBuf>>,
    pub delay: Duration,
}

impl FakeProvisioner {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn workspace(&self, key: WorkspaceKey, repo: &RepoRef, branch: String, pr: Option<u64>) -> Workspace {
        let n = self.created.fetch_add(1, Ordering::SeqCst);
        Workspace {
            path: PathBuf::from(format!("/fake/{}-{}-{}", key.ai_model, repo.name, n)),
            key,
            repo: repo.clone(),
            session_path: None,
            branch,
            pr_number: pr,
            created_at: Utc::now(),
        }
    }
}

#[async_trait]
impl WorkspaceProvisioner for FakeProvisioner {
    async fn create_for_issue(&self, repo: &RepoRef, issue: u64, ai_model: &str) -> Result<Workspace> {
        tokio::time::sleep(self.delay).await;
        let branch = format!("forgehand/{ai_model}/issue-{issue}-1700000000");
        Ok(self.workspace(WorkspaceKey::issue(repo, issue, ai_model), repo, branch, None))
    }

    async fn create_for_pr(
        &self,
        repo: &RepoRef,
        pr: u64,
        head_branch: &str,
        ai_model: &str,
    ) -> Result<Workspace> {
        tokio::time::sleep(self.delay).await;
        Ok(self.workspace(
            WorkspaceKey::pull_request(repo, pr, ai_model),
            repo,
            head_branch.to_string(),
            Some(pr),
        ))
    }

    async fn move_to_pr(&self, workspace: &Workspace, pr: u64) -> Result<Workspace> {
        let mut moved = workspace.clone();
        moved.path = PathBuf::from(format!("{}-pr-{pr}", workspace.path.display()));
        moved.pr_number = Some(pr);
        Ok(moved)
    }

    async fn create_session_dir(&self, workspace: &Workspace) -> Result<Workspace> {
        self.session_dirs.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;
        let mut ws = workspace.clone();
        ws.session_path = Some(workspace.path.join("session"));
        Ok(ws)
    }

    async fn cleanup(&self, workspace: &Workspace) -> Result<()> {
        self.cleaned.lock().unwrap().push(workspace.path.clone());
        Ok(())
    }
}

/// Session that answers with a canned transcript after `failures` transient errors.
#[derive(Debug)]
pub struct ScriptedSession {
    id: String,
    failures: AtomicUsize,
    pub sends: AtomicUsize,
    pub closed: AtomicUsize,
    pub prompts: Mutex<Vec<String>>,
}

#[async_trait]
impl ProcessSession for ScriptedSession {
    fn id(&self) -> &str {
        &self.id
    }

    async fn send(&self, prompt: &str) -> Result<SessionResponse, SessionError> {
        self.sends.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(prompt.to_string());
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(SessionError::transient("pipe closed"));
        }
        Ok(SessionResponse::from_bytes(AI_OUTPUT))
    }

    async fn close(&self) -> Result<(), SessionError> {
        self.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Factory handing out [`ScriptedSession`]s and remembering them.
#[derive(Default)]
pub struct FakeSessions {
    pub failures_per_session: usize,
    pub started: Mutex<Vec<Arc<ScriptedSession>>>,
}

impl FakeSessions {
    pub fn new(failures_per_session: usize) -> Arc<Self> {
        Arc::new(Self {
            failures_per_session,
            ..Self::default()
        })
    }

    pub fn started(&self) -> Vec<Arc<ScriptedSession>> {
        self.started.lock().unwrap().clone()
    }
}

#[async_trait]
impl SessionFactory for FakeSessions {
    async fn start(&self, workspace: &Workspace) -> Result<Arc<dyn ProcessSession>, SessionError> {
        let session = Arc::new(ScriptedSession {
            id: format!("session-{}", workspace.key),
            failures: AtomicUsize::new(self.failures_per_session),
            sends: AtomicUsize::new(0),
            closed: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        });
        self.started.lock().unwrap().push(Arc::clone(&session));
        Ok(session)
    }
}

pub struct Harness {
    pub agent: Arc<Agent>,
    pub github: Arc<FakeGithub>,
    pub provisioner: Arc<FakeProvisioner>,
    pub sessions: Arc<FakeSessions>,
}

pub fn test_config() -> Config {
    let mut config = Config::default();
    config.retry_base_delay_ms = 1;
    config
}

pub fn harness_with(config: Config, session_failures: usize) -> Harness {
    let github = FakeGithub::new();
    let provisioner = FakeProvisioner::new();
    let sessions = FakeSessions::new(session_failures);
    let agent = Arc::new(Agent::new(
        config,
        Arc::clone(&github) as Arc<dyn GithubClient>,
        Arc::clone(&provisioner) as Arc<dyn WorkspaceProvisioner>,
        Arc::clone(&sessions) as Arc<dyn SessionFactory>,
    ));
    Harness {
        agent,
        github,
        provisioner,
        sessions,
    }
}

pub fn harness() -> Harness {
    harness_with(test_config(), 0)
}

/// `issue_comment.created` payload.
pub fn issue_comment(issue: u64, on_pr: bool, comment_id: u64, body: &str) -> Vec<u8> {
    let pr = if on_pr {
        r#", "pull_request": {"url": "https://api.github.com/pulls/1"}"#
    } else {
        ""
    };
    format!(
        r#"{{"action": "created",
            "issue": {{"number": {issue}, "title": "Add login", "body": "Users need login"{pr}}},
            "comment": {{"id": {comment_id}, "body": "{body}", "user": {{"login": "alice"}}}},
            "repository": {REPO_JSON},
            "sender": {{"login": "alice"}}}}"#
    )
    .into_bytes()
}

/// `pull_request` payload.
pub fn pull_request_event(action: &str, number: u64, head: &str) -> Vec<u8> {
    format!(
        r#"{{"action": "{action}",
            "pull_request": {{"number": {number}, "title": "t", "state": "closed",
                "head": {{"ref": "{head}"}}, "base": {{"ref": "main"}}}},
            "repository": {REPO_JSON},
            "sender": {{"login": "alice"}}}}"#
    )
    .into_bytes()
}
