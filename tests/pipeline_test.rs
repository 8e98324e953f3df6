//! End-to-end event handling against in-memory collaborators.

mod common;

use common::{harness, harness_with, issue_comment, pull_request_event, test_config, REPO_JSON};
use forgehand::HandleOutcome;
use std::sync::atomic::Ordering;
use std::sync::Arc;

const BRANCH: &str = "forgehand/claude/issue-7-1700000000";

#[tokio::test]
async fn test_code_comment_opens_one_pr_and_links_workspace() {
    let h = harness();

    let outcome = h
        .agent
        .handle("issue_comment", &issue_comment(7, false, 1, "/code use JWT"))
        .await
        .unwrap();

    assert_eq!(outcome, HandleOutcome::Handled { mode: "tag" });
    assert_eq!(h.provisioner.created.load(Ordering::SeqCst), 1);
    assert_eq!(h.github.count("create_branch"), 1);
    assert_eq!(h.github.count("create_pull_request"), 1);
    assert_eq!(h.github.count("update_pull_request 100"), 1);
    assert_eq!(*h.github.commits.lock().unwrap(), vec!["Add login endpoint"]);

    let linked = h.agent.workspaces().all_by_pr("octo/widgets", 100);
    assert_eq!(linked.len(), 1);
    assert_eq!(linked[0].pr_number, Some(100));
    assert!(linked[0].session_path.is_some());
    assert!(linked[0].path.to_string_lossy().ends_with("-pr-100"));

    let sessions = h.sessions.started();
    assert_eq!(sessions.len(), 1);
    let prompts = sessions[0].prompts.lock().unwrap();
    assert!(prompts[0].contains("## Issue #7: Add login"));
    assert!(prompts[0].contains("use JWT"));
}

#[tokio::test]
async fn test_repeated_code_reuses_workspace_and_pr() {
    let h = harness();
    let event = issue_comment(7, false, 1, "/code");

    h.agent.handle("issue_comment", &event).await.unwrap();
    h.agent.handle("issue_comment", &event).await.unwrap();

    assert_eq!(h.provisioner.created.load(Ordering::SeqCst), 1);
    assert_eq!(h.github.count("create_pull_request"), 1);
    assert_eq!(h.github.count("get_pull_request 100"), 1);
    assert_eq!(h.sessions.started().len(), 1);
    assert_eq!(h.agent.workspaces().len(), 1);
}

#[tokio::test]
async fn test_concurrent_code_comments_open_one_pr() {
    let h = harness();
    let event = Arc::new(issue_comment(7, false, 1, "/code"));

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let agent = Arc::clone(&h.agent);
        let event = Arc::clone(&event);
        tasks.push(tokio::spawn(async move {
            agent.handle("issue_comment", &event).await
        }));
    }
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    assert_eq!(h.provisioner.created.load(Ordering::SeqCst), 1);
    assert_eq!(h.github.count("create_branch"), 1);
    assert_eq!(h.github.count("create_pull_request"), 1);
    assert_eq!(h.sessions.started().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_fix_comments_create_one_session_dir() {
    let h = harness();
    h.github.add_pr(42, "feature/login");
    let event = Arc::new(issue_comment(42, true, 1, "/fix tighten the checks"));

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let agent = Arc::clone(&h.agent);
        let event = Arc::clone(&event);
        tasks.push(tokio::spawn(async move {
            agent.handle("issue_comment", &event).await
        }));
    }
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    assert_eq!(h.provisioner.created.load(Ordering::SeqCst), 1);
    assert_eq!(h.provisioner.session_dirs.load(Ordering::SeqCst), 1);
    assert_eq!(h.sessions.started().len(), 1);
}

#[tokio::test]
async fn test_fix_on_pr_reuses_issue_workspace_and_session() {
    let h = harness();
    h.agent
        .handle("issue_comment", &issue_comment(7, false, 1, "/code"))
        .await
        .unwrap();

    let outcome = h
        .agent
        .handle("issue_comment", &issue_comment(100, true, 2, "/fix tests fail"))
        .await
        .unwrap();

    assert_eq!(outcome, HandleOutcome::Handled { mode: "tag" });
    assert_eq!(h.provisioner.created.load(Ordering::SeqCst), 1);
    assert_eq!(h.github.count("pull_latest_changes 100"), 1);
    let sessions = h.sessions.started();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].sends.load(Ordering::SeqCst), 2);
    assert!(sessions[0].prompts.lock().unwrap()[1].contains("tests fail"));

    let comments = h.github.comments.lock().unwrap();
    assert_eq!(comments.len(), 1);
    assert_eq!(comments[0].0, 100);
    assert!(comments[0].1.starts_with("### Fix applied"));
}

#[tokio::test]
async fn test_models_get_separate_workspaces_and_close_together() {
    let h = harness();
    h.agent
        .handle("issue_comment", &issue_comment(7, false, 1, "/code"))
        .await
        .unwrap();
    h.agent
        .handle("issue_comment", &issue_comment(100, true, 2, "/continue -gemini"))
        .await
        .unwrap();

    let linked = h.agent.workspaces().all_by_pr("octo/widgets", 100);
    let models: Vec<_> = linked.iter().map(|ws| ws.ai_model().to_string()).collect();
    assert_eq!(models, vec!["claude", "gemini"]);
    assert_eq!(h.agent.sessions().len(), 2);

    let outcome = h
        .agent
        .handle("pull_request", &pull_request_event("closed", 100, BRANCH))
        .await
        .unwrap();

    assert_eq!(outcome, HandleOutcome::Handled { mode: "cleanup" });
    assert!(h.agent.workspaces().is_empty());
    assert!(h.agent.sessions().is_empty());
    assert_eq!(h.provisioner.cleaned.lock().unwrap().len(), 2);
    for session in h.sessions.started() {
        assert_eq!(session.closed.load(Ordering::SeqCst), 1);
    }
    assert_eq!(*h.github.deleted_branches.lock().unwrap(), vec![BRANCH]);
}

#[tokio::test]
async fn test_closing_foreign_pr_keeps_branch() {
    let h = harness();
    let outcome = h
        .agent
        .handle("pull_request", &pull_request_event("closed", 5, "feature/login"))
        .await
        .unwrap();

    assert_eq!(outcome, HandleOutcome::Handled { mode: "cleanup" });
    assert!(h.github.deleted_branches.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_transient_failures_are_retried() {
    let h = harness_with(test_config(), 2);

    h.agent
        .handle("issue_comment", &issue_comment(7, false, 1, "/code"))
        .await
        .unwrap();

    assert_eq!(h.sessions.started()[0].sends.load(Ordering::SeqCst), 3);
    assert_eq!(h.github.count("commit_and_push"), 1);
}

#[tokio::test]
async fn test_exhausted_retries_report_on_pr() {
    let h = harness_with(test_config(), 10);

    let err = h
        .agent
        .handle("issue_comment", &issue_comment(7, false, 1, "/code"))
        .await
        .unwrap_err();

    assert!(format!("{err:#}").contains("failed after 3 attempts"));
    assert_eq!(h.sessions.started()[0].sends.load(Ordering::SeqCst), 3);
    assert_eq!(h.github.count("commit_and_push"), 0);
    let comments = h.github.comments.lock().unwrap();
    assert_eq!(comments.len(), 1);
    assert!(comments[0].1.starts_with("### AI execution failed"));
    // The PR stays; visible side effects are not rolled back.
    assert_eq!(h.agent.workspaces().all_by_pr("octo/widgets", 100).len(), 1);
}

#[tokio::test]
async fn test_unclaimed_events_are_ignored() {
    let h = harness();

    let closed_issue = format!(
        r#"{{"action": "closed", "issue": {{"number": 7}}, "repository": {REPO_JSON}}}"#
    );
    let outcome = h.agent.handle("issues", closed_issue.as_bytes()).await.unwrap();
    assert_eq!(outcome, HandleOutcome::Ignored);

    let chatter = issue_comment(7, false, 1, "looks good to me");
    let outcome = h.agent.handle("issue_comment", &chatter).await.unwrap();
    assert_eq!(outcome, HandleOutcome::Ignored);

    // GitHub sends `ping` when a webhook is first configured.
    let outcome = h.agent.handle("ping", br#"{"zen":"hi"}"#).await.unwrap();
    assert_eq!(outcome, HandleOutcome::Ignored);
    let outcome = h.agent.handle("star", b"{}").await.unwrap();
    assert_eq!(outcome, HandleOutcome::Ignored);
    assert!(h.github.calls.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_malformed_payload_is_an_error() {
    let h = harness();
    let err = h.agent.handle("issues", b"not json").await.unwrap_err();
    assert!(err.to_string().contains("Invalid issues payload"));
}

#[tokio::test]
async fn test_expired_workspaces_are_swept() {
    let mut config = test_config();
    config.workspace_ttl_secs = 0;
    let h = harness_with(config, 0);
    h.agent
        .handle("issue_comment", &issue_comment(7, false, 1, "/code"))
        .await
        .unwrap();

    let report = h.agent.sweep_once().await;

    assert_eq!(report.expired, 1);
    assert_eq!(report.removed, 1);
    assert!(h.agent.workspaces().is_empty());
    assert!(h.agent.sessions().is_empty());
    assert_eq!(h.sessions.started()[0].closed.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_review_with_fix_mentions_reviewer() {
    let h = harness();
    h.github.add_pr(42, "feature/login");
    let payload = format!(
        r#"{{"action": "submitted",
            "review": {{"id": 9, "body": "/fix please", "state": "changes_requested",
                "user": {{"login": "bob"}}}},
            "pull_request": {{"number": 42, "head": {{"ref": "feature/login"}}, "base": {{"ref": "main"}}}},
            "repository": {REPO_JSON},
            "sender": {{"login": "bob"}}}}"#
    );

    let outcome = h
        .agent
        .handle("pull_request_review", payload.as_bytes())
        .await
        .unwrap();

    assert_eq!(outcome, HandleOutcome::Handled { mode: "tag" });
    let prompt = h.sessions.started()[0].prompts.lock().unwrap()[0].clone();
    assert!(prompt.contains("- src/lib.rs:4: rename this"));
    let comments = h.github.comments.lock().unwrap();
    assert!(comments[0].1.starts_with("@bob\n\n### Processed 1 review comment(s)"));
    // Foreign branch: the default model is used.
    assert_eq!(
        h.agent.workspaces().all_by_pr("octo/widgets", 42)[0].ai_model(),
        "claude"
    );
}

#[tokio::test]
async fn test_review_comment_replies_in_thread() {
    let h = harness();
    h.github.add_pr(42, "feature/login");
    let payload = format!(
        r#"{{"action": "created",
            "comment": {{"id": 77, "body": "/continue add a test", "path": "src/auth.rs", "line": 12}},
            "pull_request": {{"number": 42, "head": {{"ref": "feature/login"}}, "base": {{"ref": "main"}}}},
            "repository": {REPO_JSON}}}"#
    );

    h.agent
        .handle("pull_request_review_comment", payload.as_bytes())
        .await
        .unwrap();

    assert_eq!(h.github.count("reply_to_review_comment 42 77"), 1);
    assert_eq!(h.github.count("create_comment"), 0);
}

#[tokio::test]
async fn test_auto_review_needs_opt_in() {
    let h = harness();
    let opened = pull_request_event("opened", 42, "feature/login");

    // Without auto_review_prs, opening or pushing to a PR runs no AI review.
    let outcome = h.agent.handle("pull_request", &opened).await.unwrap();
    assert_eq!(outcome, HandleOutcome::Ignored);
    let pushed = pull_request_event("synchronize", 42, "feature/login");
    let outcome = h.agent.handle("pull_request", &pushed).await.unwrap();
    assert_eq!(outcome, HandleOutcome::Ignored);
    assert!(h.sessions.started().is_empty());
    assert_eq!(h.github.count("create_comment"), 0);

    // Marking a draft ready still asks for a review.
    let ready = pull_request_event("ready_for_review", 42, "feature/login");
    let outcome = h.agent.handle("pull_request", &ready).await.unwrap();
    assert_eq!(outcome, HandleOutcome::Handled { mode: "review" });
    assert_eq!(h.sessions.started().len(), 1);

    let mut config = test_config();
    config.auto_review_prs = true;
    let h = harness_with(config, 0);
    let outcome = h.agent.handle("pull_request", &opened).await.unwrap();
    assert_eq!(outcome, HandleOutcome::Handled { mode: "agent" });
    let comments = h.github.comments.lock().unwrap();
    assert!(comments[0].1.starts_with("## AI code review"));
}

#[tokio::test]
async fn test_unknown_dispatch_task_fails() {
    let h = harness();
    let payload = format!(
        r#"{{"inputs": {{"task_type": "reboot"}}, "repository": {REPO_JSON}}}"#
    );
    let err = h
        .agent
        .handle("workflow_dispatch", payload.as_bytes())
        .await
        .unwrap_err();
    assert!(format!("{err:#}").contains("Unknown task_type: reboot"));
}

#[tokio::test]
async fn test_batch_dispatch_processes_labeled_issues() {
    let h = harness();
    {
        let mut issues = h.github.labeled_issues.lock().unwrap();
        for n in 1..=3 {
            issues.push(forgehand::events::Issue {
                number: n,
                title: format!("Bug {n}"),
                ..Default::default()
            });
        }
    }
    let payload = format!(
        r#"{{"inputs": {{"task_type": "batch_process_issues", "label_filter": "ai-assist", "max_issues": "2"}},
            "repository": {REPO_JSON}}}"#
    );

    h.agent
        .handle("workflow_dispatch", payload.as_bytes())
        .await
        .unwrap();

    assert_eq!(h.github.count("list_issues_with_label ai-assist 2"), 1);
    assert_eq!(h.github.count("create_pull_request"), 2);
    assert_eq!(h.agent.workspaces().len(), 2);
}
