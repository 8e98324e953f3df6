//! Automation: assignment, trigger labels, workflow dispatch and schedules.

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

use super::Handler;
use crate::config::Config;
use crate::constants::DEFAULT_BATCH_MAX_ISSUES;
use crate::events::{GithubEvent, Issue, IssuesContext, WorkflowDispatchContext};
use crate::pipeline::Pipeline;
use crate::prompt::auto_issue_instructions;
use crate::workspace::{RepoRef, Workspace};

/// Cron expression of the nightly cleanup.
pub const CRON_DAILY_CLEANUP: &str = "0 2 * * *";
/// Cron expression of the weekly report.
pub const CRON_WEEKLY_REPORT: &str = "0 9 * * 1";

/// Maintenance task named by `inputs.task_type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskType {
    /// Run `/code` over a batch of labeled issues.
    BatchProcessIssues,
    /// Sweep expired workspaces now.
    CleanupResources,
    /// Render a workspace report.
    GenerateReport,
    /// Check the agent's collaborators.
    HealthCheck,
}

impl TaskType {
    /// Parses a `task_type` input.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "batch_process_issues" => Some(Self::BatchProcessIssues),
            "cleanup_resources" => Some(Self::CleanupResources),
            "generate_report" => Some(Self::GenerateReport),
            "health_check" => Some(Self::HealthCheck),
            _ => None,
        }
    }

    /// Task a cron expression maps to; unknown schedules run a health check.
    pub fn for_schedule(cron: &str) -> Self {
        match cron {
            CRON_DAILY_CLEANUP => Self::CleanupResources,
            CRON_WEEKLY_REPORT => Self::GenerateReport,
            _ => Self::HealthCheck,
        }
    }
}

/// Level of detail of a generated report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportKind {
    /// Counts only.
    Summary,
    /// Counts plus one line per workspace.
    Detailed,
}

/// Whether the agent handler claims `event` under `config`.
pub fn claims(config: &Config, event: &GithubEvent) -> bool {
    match event {
        GithubEvent::Issues(ctx) => match ctx.action.as_str() {
            "assigned" => true,
            "labeled" => has_trigger_label(config, ctx),
            "opened" => config.auto_process_opened_issues,
            _ => false,
        },
        GithubEvent::PullRequest(ctx) => {
            matches!(ctx.action.as_str(), "opened" | "synchronize") && config.auto_review_prs
        }
        GithubEvent::WorkflowDispatch(_) | GithubEvent::Schedule(_) => true,
        _ => false,
    }
}

fn has_trigger_label(config: &Config, ctx: &IssuesContext) -> bool {
    ctx.issue
        .labels
        .iter()
        .any(|l| config.is_auto_trigger_label(&l.name))
}

/// Markdown report of the registered workspaces.
pub fn render_report(kind: ReportKind, workspaces: &[Workspace], sessions: usize, now: DateTime<Utc>) -> String {
    let linked = workspaces.iter().filter(|ws| ws.pr_number.is_some()).count();
    let mut report = format!(
        "# forgehand report\n\n\
         - Workspaces: {}\n\
         - Linked to a PR: {}\n\
         - Live sessions: {}\n\
         - Generated: {}\n",
        workspaces.len(),
        linked,
        sessions,
        now.format("%Y-%m-%d %H:%M:%S UTC")
    );
    if kind == ReportKind::Detailed && !workspaces.is_empty() {
        report.push_str("\n## Workspaces\n");
        for ws in workspaces {
            let pr = ws
                .pr_number
                .map_or_else(|| "-".to_string(), |n| format!("#{n}"));
            report.push_str(&format!(
                "- {} (PR: {}, AI: {}, age: {}h) {}\n",
                ws.key,
                pr,
                ws.ai_model(),
                (now - ws.created_at).num_hours(),
                ws.path.display()
            ));
        }
    }
    report
}

/// Label-, assignment- and schedule-driven automation.
pub struct AgentHandler {
    pipeline: Arc<Pipeline>,
}

impl std::fmt::Debug for AgentHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentHandler").finish_non_exhaustive()
    }
}

impl AgentHandler {
    /// Handler over `pipeline`.
    pub fn new(pipeline: Arc<Pipeline>) -> Self {
        Self { pipeline }
    }

    async fn auto_process_issue(&self, repo: &RepoRef, issue: &Issue) -> Result<()> {
        let model = self.pipeline.resolve_model(None, None);
        let instructions = auto_issue_instructions(issue);
        self.pipeline
            .process_issue(repo, issue, &model, instructions)
            .await
            .map(|pr| log::info!("Issue #{} handled in PR #{}", issue.number, pr.number))
    }

    async fn run_task(&self, task: TaskType, repo: &RepoRef, dispatch: Option<&WorkflowDispatchContext>) -> Result<()> {
        match task {
            TaskType::BatchProcessIssues => {
                let Some(ctx) = dispatch else {
                    bail!("batch_process_issues needs workflow inputs");
                };
                self.batch_process_issues(repo, ctx).await
            }
            TaskType::CleanupResources => {
                let report = self.pipeline.sweeper().sweep_once().await;
                log::info!(
                    "Resource cleanup completed: {} of {} expired workspace(s) removed",
                    report.removed,
                    report.expired
                );
                Ok(())
            }
            TaskType::GenerateReport => {
                let kind = match dispatch.and_then(|c| c.input("report_type")) {
                    Some("detailed") => ReportKind::Detailed,
                    Some(_) => ReportKind::Summary,
                    // Scheduled reports are the weekly detailed one.
                    None if dispatch.is_none() => ReportKind::Detailed,
                    None => ReportKind::Summary,
                };
                let report = render_report(
                    kind,
                    &self.pipeline.workspaces().list(),
                    self.pipeline.sessions().len(),
                    Utc::now(),
                );
                log::info!("Generated {:?} report:\n{}", kind, report);
                Ok(())
            }
            TaskType::HealthCheck => {
                self.health_check();
                Ok(())
            }
        }
    }

    async fn batch_process_issues(&self, repo: &RepoRef, ctx: &WorkflowDispatchContext) -> Result<()> {
        let label = ctx.input("label_filter").unwrap_or_default();
        let max_issues = ctx
            .inputs
            .get("max_issues")
            .and_then(|v| v.as_u64().or_else(|| v.as_str().and_then(|s| s.parse().ok())))
            .filter(|n| *n > 0)
            .map_or(DEFAULT_BATCH_MAX_ISSUES, |n| usize::try_from(n).unwrap_or(usize::MAX));

        let issues = self
            .pipeline
            .github()
            .list_issues_with_label(repo, label, max_issues)
            .await?;
        log::info!("Batch processing {} issue(s) labeled '{}'", issues.len(), label);

        let mut processed = 0;
        for issue in &issues {
            match self.auto_process_issue(repo, issue).await {
                Ok(()) => {
                    processed += 1;
                    log::info!("Processed issue #{} ({}/{})", issue.number, processed, issues.len());
                }
                Err(e) => log::error!("Failed to process issue #{}: {:#}", issue.number, e),
            }
        }
        log::info!(
            "Batch processing completed: {}/{} issue(s) processed",
            processed,
            issues.len()
        );
        Ok(())
    }

    fn health_check(&self) {
        let config = self.pipeline.config();
        let model = &config.default_ai_model;
        let checks = [
            ("github_token", config.has_token()),
            ("default_agent", config.agent_command(model).is_some()),
            ("workspace_base", config.workspace_base.is_dir()),
        ];
        let healthy = checks.iter().all(|(_, ok)| *ok);
        for (name, ok) in checks {
            log::info!("Health check {}: {}", name, if ok { "ok" } else { "FAILED" });
        }
        log::info!(
            "Health check completed: {} ({} workspace(s), {} session(s))",
            if healthy { "healthy" } else { "unhealthy" },
            self.pipeline.workspaces().len(),
            self.pipeline.sessions().len()
        );
    }
}

#[async_trait]
impl Handler for AgentHandler {
    fn mode(&self) -> &'static str {
        "agent"
    }

    fn priority(&self) -> u32 {
        20
    }

    fn can_handle(&self, event: &GithubEvent) -> bool {
        claims(self.pipeline.config(), event)
    }

    async fn execute(&self, event: &GithubEvent) -> Result<()> {
        let repo = event.repository().to_ref();
        match event {
            GithubEvent::Issues(ctx) => {
                log::info!("Auto-processing issue #{} ({})", ctx.issue.number, ctx.action);
                self.auto_process_issue(&repo, &ctx.issue).await
            }
            GithubEvent::PullRequest(ctx) => self.pipeline.review_pr(&repo, &ctx.pull_request).await,
            GithubEvent::WorkflowDispatch(ctx) => {
                let Some(name) = ctx.input("task_type") else {
                    bail!("workflow_dispatch is missing inputs.task_type");
                };
                let Some(task) = TaskType::parse(name) else {
                    bail!("Unknown task_type: {}", name);
                };
                log::info!("Running dispatched task {:?}", task);
                self.run_task(task, &repo, Some(ctx)).await
            }
            GithubEvent::Schedule(ctx) => {
                let task = TaskType::for_schedule(&ctx.schedule);
                log::info!("Schedule '{}' runs {:?}", ctx.schedule, task);
                self.run_task(task, &repo, None).await
            }
            _ => bail!("Agent handler cannot handle {}", event),
        }
    }
}
