//! Teardown when a pull request closes.

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::sync::Arc;

use super::Handler;
use crate::events::GithubEvent;
use crate::pipeline::Pipeline;

/// Releases every workspace of a closed PR and deletes the agent's branch.
pub struct CleanupHandler {
    pipeline: Arc<Pipeline>,
}

impl std::fmt::Debug for CleanupHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CleanupHandler").finish_non_exhaustive()
    }
}

impl CleanupHandler {
    /// Handler over `pipeline`.
    pub fn new(pipeline: Arc<Pipeline>) -> Self {
        Self { pipeline }
    }
}

#[async_trait]
impl Handler for CleanupHandler {
    fn mode(&self) -> &'static str {
        "cleanup"
    }

    fn priority(&self) -> u32 {
        40
    }

    fn can_handle(&self, event: &GithubEvent) -> bool {
        matches!(event, GithubEvent::PullRequest(ctx) if ctx.action == "closed")
    }

    async fn execute(&self, event: &GithubEvent) -> Result<()> {
        let GithubEvent::PullRequest(ctx) = event else {
            bail!("Cleanup handler cannot handle {}", event);
        };
        let repo = ctx.repository.to_ref();
        let cleaned = self
            .pipeline
            .cleanup_after_pr_closed(&repo, &ctx.pull_request)
            .await;
        log::info!(
            "PR #{} closed ({}): {} workspace(s) cleaned up",
            ctx.pull_request.number,
            if ctx.pull_request.merged { "merged" } else { "not merged" },
            cleaned
        );
        Ok(())
    }
}
