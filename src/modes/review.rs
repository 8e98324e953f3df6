//! Passive review of pull requests and pushes to the main branch.

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::sync::Arc;

use super::Handler;
use crate::config::Config;
use crate::events::{GithubEvent, PushContext};
use crate::pipeline::Pipeline;

const MAIN_REFS: &[&str] = &["refs/heads/main", "refs/heads/master"];

/// Reviews PRs as they change and summarizes pushes to main.
pub struct ReviewHandler {
    pipeline: Arc<Pipeline>,
}

impl std::fmt::Debug for ReviewHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReviewHandler").finish_non_exhaustive()
    }
}

impl ReviewHandler {
    /// Handler over `pipeline`.
    pub fn new(pipeline: Arc<Pipeline>) -> Self {
        Self { pipeline }
    }
}

/// Whether the review handler claims `event` under `config`.
///
/// `ready_for_review` always gets an AI review. `opened` and `synchronize`
/// only do with `auto_review_prs`.
pub fn claims(config: &Config, event: &GithubEvent) -> bool {
    match event {
        GithubEvent::PullRequest(ctx) => match ctx.action.as_str() {
            "ready_for_review" => true,
            "opened" | "synchronize" => config.auto_review_prs,
            _ => false,
        },
        GithubEvent::Push(ctx) => MAIN_REFS.contains(&ctx.ref_name.as_str()),
        _ => false,
    }
}

/// One-line-per-commit summary of a push.
pub fn push_summary(ctx: &PushContext) -> String {
    let mut summary = format!(
        "{} commit(s) pushed to {} by {}",
        ctx.commits.len(),
        ctx.ref_name.trim_start_matches("refs/heads/"),
        ctx.sender.login
    );
    for commit in &ctx.commits {
        let sha: String = commit.id.chars().take(7).collect();
        let subject = commit.message.lines().next().unwrap_or_default();
        summary.push_str(&format!("\n  {} {}", sha, subject));
    }
    summary
}

#[async_trait]
impl Handler for ReviewHandler {
    fn mode(&self) -> &'static str {
        "review"
    }

    fn priority(&self) -> u32 {
        30
    }

    fn can_handle(&self, event: &GithubEvent) -> bool {
        claims(self.pipeline.config(), event)
    }

    async fn execute(&self, event: &GithubEvent) -> Result<()> {
        match event {
            GithubEvent::PullRequest(ctx) => {
                let repo = ctx.repository.to_ref();
                self.pipeline.review_pr(&repo, &ctx.pull_request).await
            }
            GithubEvent::Push(ctx) => {
                log::info!("{}: {}", ctx.repository.full_name, push_summary(ctx));
                Ok(())
            }
            _ => bail!("Review handler cannot handle {}", event),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modes::test_support::event;

    fn pr_event(action: &str) -> GithubEvent {
        event(
            "pull_request",
            &format!(r#""action": "{action}", "pull_request": {{"number": 3}}"#),
        )
    }

    #[test]
    fn test_claims_pr_actions() {
        let config = Config::default();
        assert!(claims(&config, &pr_event("ready_for_review")));
        assert!(!claims(&config, &pr_event("opened")));
        assert!(!claims(&config, &pr_event("synchronize")));
        assert!(!claims(&config, &pr_event("closed")));
        assert!(!claims(&config, &pr_event("labeled")));
    }

    #[test]
    fn test_auto_review_claims_every_push_to_a_pr() {
        let config = Config {
            auto_review_prs: true,
            ..Config::default()
        };
        assert!(claims(&config, &pr_event("opened")));
        assert!(claims(&config, &pr_event("synchronize")));
        assert!(claims(&config, &pr_event("ready_for_review")));
        assert!(!claims(&config, &pr_event("closed")));
    }

    #[test]
    fn test_claims_push_to_main_only() {
        let config = Config::default();
        let push = |r: &str| event("push", &format!(r#""ref": "{r}""#));
        assert!(claims(&config, &push("refs/heads/main")));
        assert!(claims(&config, &push("refs/heads/master")));
        assert!(!claims(&config, &push("refs/heads/feature")));
        assert!(!claims(&config, &push("refs/tags/v1.0")));
    }

    #[test]
    fn test_push_summary() {
        let GithubEvent::Push(ctx) = event(
            "push",
            r#""ref": "refs/heads/main",
               "commits": [{"id": "0123456789abcdef", "message": "Fix login\n\nDetails"}],
               "sender": {"login": "alice"}"#,
        ) else {
            unreachable!()
        };
        assert_eq!(
            push_summary(&ctx),
            "1 commit(s) pushed to main by alice\n  0123456 Fix login"
        );
    }
}
