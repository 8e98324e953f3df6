//! End-to-end flows shared by the handlers.
//!
//! Every flow runs sequentially on the caller's task:
//!
//! ```text
//! workspace (WorkspaceRegistry::create_or_get)
//!   → session (SessionRegistry::get)
//!   → AI request (RetryExecutor)
//!   → publish (commit, PR body, comment)
//! ```
//!
//! Resource acquisition failures end the flow immediately. Side effects
//! already visible on GitHub are never rolled back.
//!
//! Opening the PR for an issue workspace is guarded per key, so concurrent
//! `/code` events on one issue produce one branch and one PR.

use anyhow::{Context, Result};
use std::fmt;
use std::sync::Arc;

use crate::command::CommandKind;
use crate::config::Config;
use crate::events::{Issue, PullRequest, Review, ReviewComment};
use crate::github::{GithubClient, PrHistory};
use crate::keyed::KeyedLocks;
use crate::output::{self, build_pr_body, build_reply, commit_message, parse_structured_output};
use crate::prompt;
use crate::retry::RetryExecutor;
use crate::session::{ProcessSession, SessionRegistry};
use crate::sweeper::{ExpirySweeper, Teardown};
use crate::workspace::{
    model_from_branch, RepoRef, Workspace, WorkspaceKey, WorkspaceProvisioner, WorkspaceRegistry,
};

/// Shared collaborators and the flows built on them.
pub struct Pipeline {
    config: Arc<Config>,
    github: Arc<dyn GithubClient>,
    provisioner: Arc<dyn WorkspaceProvisioner>,
    workspaces: Arc<WorkspaceRegistry>,
    sessions: Arc<SessionRegistry>,
    sweeper: Arc<ExpirySweeper>,
    retry: RetryExecutor,
    opening: KeyedLocks<WorkspaceKey>,
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("workspaces", &self.workspaces.len())
            .field("sessions", &self.sessions.len())
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    /// Wires the pipeline together.
    pub fn new(
        config: Arc<Config>,
        github: Arc<dyn GithubClient>,
        provisioner: Arc<dyn WorkspaceProvisioner>,
        workspaces: Arc<WorkspaceRegistry>,
        sessions: Arc<SessionRegistry>,
        sweeper: Arc<ExpirySweeper>,
    ) -> Self {
        let retry = RetryExecutor::new(config.retry_base_delay());
        Self {
            config,
            github,
            provisioner,
            workspaces,
            sessions,
            sweeper,
            retry,
            opening: KeyedLocks::default(),
        }
    }

    /// Agent configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// GitHub collaborator.
    pub fn github(&self) -> &dyn GithubClient {
        self.github.as_ref()
    }

    /// Workspace registry.
    pub fn workspaces(&self) -> &WorkspaceRegistry {
        &self.workspaces
    }

    /// Session registry.
    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    /// Expiry sweeper.
    pub fn sweeper(&self) -> &ExpirySweeper {
        &self.sweeper
    }

    /// Model to use: explicit request, else the model encoded in the
    /// branch, else the configured default.
    pub fn resolve_model(&self, requested: Option<&str>, branch: Option<&str>) -> String {
        requested
            .filter(|m| !m.is_empty())
            .map(ToString::to_string)
            .or_else(|| branch.and_then(|b| model_from_branch(&self.config.branch_prefix, b)))
            .unwrap_or_else(|| self.config.default_ai_model.clone())
    }

    async fn session_for(&self, ws: &Workspace) -> Result<Arc<dyn ProcessSession>> {
        Ok(self.sessions.get(ws).await?)
    }

    /// Sends `prompt` through the retry executor and drains the response.
    async fn ask(&self, ws: &Workspace, prompt: &str) -> Result<String> {
        let session = self.session_for(ws).await?;
        let response = self
            .retry
            .execute(session.as_ref(), prompt, self.config.retry_max_attempts)
            .await?;
        let output = response.read_to_string().await?;
        log::info!("AI output for {}: {} bytes", ws.key, output.len());
        log::debug!("AI output: {}", output);
        Ok(output)
    }

    /// Reports an AI failure on the conversation before returning it.
    async fn report_failure(&self, repo: &RepoRef, number: u64, err: &anyhow::Error) {
        let body = format!("### AI execution failed\n\n```text\n{:#}\n```", err);
        if let Err(e) = self.github.create_comment(repo, number, &body).await {
            log::warn!("Failed to report AI failure on #{}: {:#}", number, e);
        }
    }

    /// Workspace for an existing PR, creating a worktree on its head branch
    /// if none is registered yet.
    async fn pr_workspace(&self, repo: &RepoRef, pr: &PullRequest, ai_model: &str) -> Result<Workspace> {
        let key = WorkspaceKey::pull_request(repo, pr.number, ai_model);
        let ws = self
            .workspaces
            .create_or_get(&key, || {
                self.provisioner
                    .create_for_pr(repo, pr.number, &pr.head.ref_name, ai_model)
            })
            .await
            .with_context(|| format!("Failed to acquire workspace for PR #{}", pr.number))?;

        if ws.session_path.is_some() {
            return Ok(ws);
        }
        self.opening
            .run(&key, async {
                // Re-read: a concurrent event may have added the session dir.
                let ws = self.workspaces.get(&key).unwrap_or(ws);
                if ws.session_path.is_some() {
                    return Ok(ws);
                }
                let ws = self
                    .provisioner
                    .create_session_dir(&ws)
                    .await
                    .context("Failed to create session directory")?;
                Ok(self.workspaces.register(&ws, pr.number))
            })
            .await
    }

    /// Implements an issue: branch, PR, AI run, PR body, commit.
    pub async fn process_issue(
        &self,
        repo: &RepoRef,
        issue: &Issue,
        ai_model: &str,
        args: &str,
    ) -> Result<PullRequest> {
        log::info!("Processing issue #{} in {} with {}", issue.number, repo, ai_model);
        let key = WorkspaceKey::issue(repo, issue.number, ai_model);
        let ws = self
            .workspaces
            .create_or_get(&key, || {
                self.provisioner.create_for_issue(repo, issue.number, ai_model)
            })
            .await
            .with_context(|| format!("Failed to acquire workspace for issue #{}", issue.number))?;

        let (ws, pr) = self
            .opening
            .run(&key, async {
                // Re-read: a concurrent event may have opened the PR meanwhile.
                let ws = self.workspaces.get(&key).unwrap_or(ws);
                match ws.pr_number {
                    Some(pr_number) => {
                        log::info!("Issue #{} already has PR #{}", issue.number, pr_number);
                        let pr = self.github.get_pull_request(repo, pr_number).await?;
                        Ok::<_, anyhow::Error>((ws, pr))
                    }
                    None => self.open_pull_request(&ws, issue).await,
                }
            })
            .await?;

        let prompt = prompt::issue_prompt(issue, args);
        let output = match self.ask(&ws, &prompt).await {
            Ok(output) => output,
            Err(e) => {
                self.report_failure(repo, pr.number, &e).await;
                return Err(e);
            }
        };

        let body = build_pr_body(&output, &prompt);
        self.github
            .update_pull_request(repo, pr.number, &body)
            .await
            .context("Failed to update PR body")?;

        let message = commit_message(
            &parse_structured_output(&output),
            &format!("Implement #{}: {}", issue.number, issue.title),
        );
        self.github
            .commit_and_push(&ws, &message)
            .await
            .context("Failed to commit and push")?;

        log::info!("Issue #{} processed: {}", issue.number, pr.html_url);
        Ok(pr)
    }

    async fn open_pull_request(&self, ws: &Workspace, issue: &Issue) -> Result<(Workspace, PullRequest)> {
        self.github
            .create_branch(ws)
            .await
            .context("Failed to create branch")?;

        let title = format!("{} (#{})", issue.title, issue.number);
        let body = format!(
            "Closes #{}\n\nWork in progress by forgehand using `{}`.",
            issue.number,
            ws.ai_model()
        );
        let pr = self
            .github
            .create_pull_request(ws, &title, &body)
            .await
            .context("Failed to create pull request")?;

        let ws = match self.provisioner.move_to_pr(ws, pr.number).await {
            Ok(moved) => moved,
            Err(e) => {
                log::warn!("Keeping issue path for {}: {:#}", ws.key, e);
                ws.clone()
            }
        };
        let ws = self
            .provisioner
            .create_session_dir(&ws)
            .await
            .context("Failed to create session directory")?;
        let ws = self.workspaces.register(&ws, pr.number);
        Ok((ws, pr))
    }

    /// Fetches PR history; failures yield empty context.
    async fn history(&self, repo: &RepoRef, pr: &PullRequest, exclude: Option<u64>) -> String {
        match self.github.get_all_comments(repo, pr).await {
            Ok(history) => prompt::format_history(&history, exclude),
            Err(e) => {
                log::warn!("Continuing without PR history: {:#}", e);
                prompt::format_history(
                    &PrHistory {
                        pr_body: pr.body_text().to_string(),
                        ..PrHistory::default()
                    },
                    exclude,
                )
            }
        }
    }

    async fn refresh(&self, ws: &Workspace, pr: &PullRequest) {
        if let Err(e) = self.github.pull_latest_changes(ws, pr).await {
            log::warn!("Failed to pull latest changes for PR #{}: {:#}", pr.number, e);
        }
    }

    /// Commits the run. Fatal for `/fix`, logged for `/continue`.
    async fn publish_commit(&self, ws: &Workspace, kind: CommandKind, output: &str, fallback: &str) -> Result<()> {
        let message = commit_message(&parse_structured_output(output), fallback);
        match self.github.commit_and_push(ws, &message).await {
            Ok(_) => Ok(()),
            Err(e) if kind == CommandKind::Fix => Err(e.context("Failed to commit and push fix")),
            Err(e) => {
                log::warn!("Failed to commit and push for {}: {:#}", ws.key, e);
                Ok(())
            }
        }
    }

    /// Handles `/continue` or `/fix` on a PR conversation.
    pub async fn process_pr(
        &self,
        repo: &RepoRef,
        pr_number: u64,
        kind: CommandKind,
        requested_model: Option<&str>,
        args: &str,
        current_comment_id: Option<u64>,
    ) -> Result<()> {
        let pr = self
            .github
            .get_pull_request(repo, pr_number)
            .await
            .with_context(|| format!("Failed to fetch PR #{}", pr_number))?;
        let ai_model = self.resolve_model(requested_model, Some(&pr.head.ref_name));
        log::info!("{} on PR #{} in {} with {}", kind, pr_number, repo, ai_model);

        let ws = self.pr_workspace(repo, &pr, &ai_model).await?;
        self.refresh(&ws, &pr).await;

        let history = self.history(repo, &pr, current_comment_id).await;
        let prompt = prompt::pr_prompt(kind, args, &history);
        let output = match self.ask(&ws, &prompt).await {
            Ok(output) => output,
            Err(e) => {
                self.report_failure(repo, pr_number, &e).await;
                return Err(e);
            }
        };

        self.publish_commit(&ws, kind, &output, &format!("Apply {} on PR #{}", kind, pr_number))
            .await?;
        let heading = match kind {
            CommandKind::Fix => "Fix applied",
            _ => "Work continued",
        };
        self.github
            .create_comment(repo, pr_number, &build_reply(heading, &output))
            .await
            .context("Failed to post result comment")?;
        Ok(())
    }

    /// Handles `/continue` or `/fix` on a single line comment; replies in thread.
    pub async fn process_review_comment(
        &self,
        repo: &RepoRef,
        pr_number: u64,
        comment: &ReviewComment,
        kind: CommandKind,
        requested_model: Option<&str>,
        args: &str,
    ) -> Result<()> {
        let pr = self
            .github
            .get_pull_request(repo, pr_number)
            .await
            .with_context(|| format!("Failed to fetch PR #{}", pr_number))?;
        let ai_model = self.resolve_model(requested_model, Some(&pr.head.ref_name));
        log::info!(
            "{} from line comment {} on PR #{} with {}",
            kind,
            comment.id,
            pr_number,
            ai_model
        );

        let ws = self.pr_workspace(repo, &pr, &ai_model).await?;
        self.refresh(&ws, &pr).await;

        let history = self.history(repo, &pr, Some(comment.id)).await;
        let prompt = prompt::review_comment_prompt(kind, comment, args, &history);
        let output = match self.ask(&ws, &prompt).await {
            Ok(output) => output,
            Err(e) => {
                let body = format!("AI execution failed:\n\n```text\n{:#}\n```", e);
                if let Err(reply_err) = self
                    .github
                    .reply_to_review_comment(repo, pr_number, comment.id, &body)
                    .await
                {
                    log::warn!("Failed to report AI failure in thread: {:#}", reply_err);
                }
                return Err(e);
            }
        };

        self.publish_commit(
            &ws,
            kind,
            &output,
            &format!("Address review comment on {}", comment.path),
        )
        .await?;
        self.github
            .reply_to_review_comment(repo, pr_number, comment.id, &build_reply("Done", &output))
            .await
            .context("Failed to reply to review comment")?;
        Ok(())
    }

    /// Handles `/continue` or `/fix` in a review body: all of the review's
    /// line comments are addressed in one run.
    pub async fn process_review(
        &self,
        repo: &RepoRef,
        pr_number: u64,
        review: &Review,
        kind: CommandKind,
        requested_model: Option<&str>,
        args: &str,
    ) -> Result<()> {
        let review_id = review.id;
        let trigger_user = review.user.login.as_str();
        let pr = self
            .github
            .get_pull_request(repo, pr_number)
            .await
            .with_context(|| format!("Failed to fetch PR #{}", pr_number))?;
        let ai_model = self.resolve_model(requested_model, Some(&pr.head.ref_name));
        log::info!("{} from review {} on PR #{} with {}", kind, review_id, pr_number, ai_model);

        let ws = self.pr_workspace(repo, &pr, &ai_model).await?;
        self.refresh(&ws, &pr).await;

        let comments = match self.github.get_review_comments(repo, pr_number, review_id).await {
            Ok(comments) => comments,
            Err(e) => {
                log::warn!("Failed to fetch comments of review {}: {:#}", review_id, e);
                Vec::new()
            }
        };
        let prompt = prompt::review_batch_prompt(kind, &comments, args);
        let output = match self.ask(&ws, &prompt).await {
            Ok(output) => output,
            Err(e) => {
                self.report_failure(repo, pr_number, &e).await;
                return Err(e);
            }
        };

        self.publish_commit(
            &ws,
            kind,
            &output,
            &format!("Address review feedback on PR #{}", pr_number),
        )
        .await?;

        let heading = format!("Processed {} review comment(s)", comments.len());
        let mut body = build_reply(&heading, &output);
        if !trigger_user.is_empty() {
            body = format!("@{}\n\n{}", trigger_user, body);
        }
        self.github
            .create_comment(repo, pr_number, &body)
            .await
            .context("Failed to post review result")?;
        Ok(())
    }

    /// Runs an AI review of a PR and posts it as a comment.
    pub async fn review_pr(&self, repo: &RepoRef, pr: &PullRequest) -> Result<()> {
        let ai_model = self.resolve_model(None, None);
        log::info!("Reviewing PR #{} in {} with {}", pr.number, repo, ai_model);

        let files = match self.github.list_pull_request_files(repo, pr.number).await {
            Ok(files) => files,
            Err(e) => {
                log::warn!("Reviewing PR #{} without file list: {:#}", pr.number, e);
                Vec::new()
            }
        };

        let ws = self.pr_workspace(repo, pr, &ai_model).await?;
        self.refresh(&ws, pr).await;

        let prompt = prompt::review_pr_prompt(pr, &files);
        let output = self.ask(&ws, &prompt).await?;
        let mut body = format!("## AI code review\n\n{}", output.trim());
        if let Some(error) = output::extract_error_info(&output) {
            body.push_str(&format!("\n\n## Error\n\n```text\n{}\n```", error));
        }
        self.github
            .create_comment(repo, pr.number, &body)
            .await
            .context("Failed to post review")?;
        Ok(())
    }

    /// Tears down every workspace of a closed PR and deletes the agent's
    /// branch. Best-effort throughout; returns how many workspaces were
    /// cleaned up.
    pub async fn cleanup_after_pr_closed(&self, repo: &RepoRef, pr: &PullRequest) -> usize {
        let workspaces = self.workspaces.all_by_pr(&repo.full_name(), pr.number);
        log::info!(
            "Cleaning up after PR #{} closed: {} workspace(s)",
            pr.number,
            workspaces.len()
        );

        let mut cleaned = 0;
        for ws in &workspaces {
            if self.sweeper.teardown(ws).await == Teardown::Removed {
                cleaned += 1;
            }
        }

        let branch = &pr.head.ref_name;
        if model_from_branch(&self.config.branch_prefix, branch).is_some() {
            match self.github.delete_branch(repo, branch).await {
                Ok(()) => log::info!("Deleted branch {}", branch),
                Err(e) => log::error!("Failed to delete branch {}: {:#}", branch, e),
            }
        } else {
            log::info!("Branch {} was not created by forgehand, keeping it", branch);
        }
        cleaned
    }
}
