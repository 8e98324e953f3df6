//! Explicit slash commands in comments and reviews.

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::sync::Arc;

use super::Handler;
use crate::command::{parse_command, CommandKind, TagCommand};
use crate::events::GithubEvent;
use crate::pipeline::Pipeline;

/// Runs `/code`, `/continue` and `/fix`.
pub struct TagHandler {
    pipeline: Arc<Pipeline>,
}

impl std::fmt::Debug for TagHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TagHandler").finish_non_exhaustive()
    }
}

impl TagHandler {
    /// Handler over `pipeline`.
    pub fn new(pipeline: Arc<Pipeline>) -> Self {
        Self { pipeline }
    }
}

fn is_pr_command(cmd: &TagCommand) -> bool {
    matches!(cmd.kind, CommandKind::Continue | CommandKind::Fix)
}

/// The command this handler would run for `event`, if it claims it.
///
/// `/code` is only valid on plain issues; `/continue` and `/fix` only on
/// pull requests.
pub fn claimed_command(event: &GithubEvent) -> Option<TagCommand> {
    match event {
        GithubEvent::IssueComment(ctx) if ctx.action == "created" => {
            let cmd = parse_command(&ctx.comment.body)?;
            let valid = if ctx.issue.is_pull_request() {
                is_pr_command(&cmd)
            } else {
                cmd.kind == CommandKind::Code
            };
            valid.then_some(cmd)
        }
        GithubEvent::ReviewComment(ctx) if ctx.action == "created" => {
            parse_command(&ctx.comment.body).filter(is_pr_command)
        }
        GithubEvent::Review(ctx) if ctx.action == "submitted" => {
            parse_command(ctx.review.body_text()).filter(is_pr_command)
        }
        _ => None,
    }
}

#[async_trait]
impl Handler for TagHandler {
    fn mode(&self) -> &'static str {
        "tag"
    }

    fn priority(&self) -> u32 {
        10
    }

    fn can_handle(&self, event: &GithubEvent) -> bool {
        claimed_command(event).is_some()
    }

    async fn execute(&self, event: &GithubEvent) -> Result<()> {
        let Some(cmd) = claimed_command(event) else {
            bail!("Tag handler cannot handle {}", event);
        };
        let repo = event.repository().to_ref();
        let model = cmd.ai_model.as_deref();
        log::info!(
            "{} by {} on {} (model: {})",
            cmd.kind,
            event.sender().login,
            repo,
            model.unwrap_or("default")
        );

        match event {
            GithubEvent::IssueComment(ctx) if ctx.issue.is_pull_request() => {
                self.pipeline
                    .process_pr(
                        &repo,
                        ctx.issue.number,
                        cmd.kind,
                        model,
                        &cmd.args,
                        Some(ctx.comment.id),
                    )
                    .await
            }
            GithubEvent::IssueComment(ctx) => {
                let model = self.pipeline.resolve_model(model, None);
                self.pipeline
                    .process_issue(&repo, &ctx.issue, &model, &cmd.args)
                    .await
                    .map(|_| ())
            }
            GithubEvent::ReviewComment(ctx) => {
                self.pipeline
                    .process_review_comment(
                        &repo,
                        ctx.pull_request.number,
                        &ctx.comment,
                        cmd.kind,
                        model,
                        &cmd.args,
                    )
                    .await
            }
            GithubEvent::Review(ctx) => {
                self.pipeline
                    .process_review(
                        &repo,
                        ctx.pull_request.number,
                        &ctx.review,
                        cmd.kind,
                        model,
                        &cmd.args,
                    )
                    .await
            }
            _ => bail!("Tag handler cannot handle {}", event),
        }
    }
}
