//! Prompt text sent to the AI assistant.

use crate::command::CommandKind;
use crate::events::{Issue, PullRequest, ReviewComment};
use crate::github::{PrFile, PrHistory};
use crate::output::{SECTION_CHANGES, SECTION_SUMMARY, SECTION_TEST_PLAN};

fn answer_format() -> String {
    format!(
        "Answer with these markdown sections:\n\
         {SECTION_SUMMARY}\nOne or two sentences on what you did.\n\
         {SECTION_CHANGES}\nThe files you changed and how.\n\
         {SECTION_TEST_PLAN}\nHow to verify the change."
    )
}

/// Prompt for implementing an issue from scratch.
pub fn issue_prompt(issue: &Issue, args: &str) -> String {
    let mut prompt = format!(
        "Implement the following GitHub issue in this repository.\n\n\
         ## Issue #{}: {}\n{}\n",
        issue.number,
        issue.title,
        issue.body_text()
    );
    if !args.is_empty() {
        prompt.push_str(&format!("\n## Additional instructions\n{}\n", args));
    }
    prompt.push('\n');
    prompt.push_str(&answer_format());
    prompt
}

/// Instructions synthesized for issues picked up by automation.
pub fn auto_issue_instructions(issue: &Issue) -> &'static str {
    let title = issue.title.to_lowercase();
    if title.contains("bug") || title.contains("fix") {
        "Find the root cause of the reported bug, fix it, and add a regression test."
    } else if title.contains("test") {
        "Add or improve tests covering the described behavior."
    } else if title.contains("refactor") {
        "Refactor the described code without changing its behavior."
    } else {
        "Implement the requested change following the project's existing conventions."
    }
}

fn verb(kind: CommandKind) -> (&'static str, &'static str) {
    match kind {
        CommandKind::Fix => ("fix", "Analyze and fix the problems in this PR."),
        CommandKind::Continue => ("continue", "Continue the work in this PR and improve it."),
        CommandKind::Code => ("work on", "Work on the task described in this PR."),
    }
}

/// Renders PR history as prompt context, skipping the triggering comment.
pub fn format_history(history: &PrHistory, current_comment_id: Option<u64>) -> String {
    let is_current = |id: u64| current_comment_id == Some(id);
    let mut parts = Vec::new();

    if !history.pr_body.is_empty() {
        parts.push(format!("## PR description\n{}", history.pr_body));
    }

    let comments: Vec<String> = history
        .issue_comments
        .iter()
        .filter(|c| !is_current(c.id))
        .map(|c| {
            let when = c
                .created_at
                .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_default();
            format!("**{}** ({}):\n{}", c.user.login, when, c.body)
        })
        .collect();
    if !comments.is_empty() {
        parts.push(format!("## Previous comments\n{}", comments.join("\n\n")));
    }

    let line_comments: Vec<String> = history
        .review_comments
        .iter()
        .filter(|c| !is_current(c.id))
        .map(|c| {
            format!(
                "**{}** - {}:{}:\n{}",
                c.user.login,
                c.path,
                c.line.unwrap_or_default(),
                c.body
            )
        })
        .collect();
    if !line_comments.is_empty() {
        parts.push(format!("## Line comments\n{}", line_comments.join("\n\n")));
    }

    let reviews: Vec<String> = history
        .reviews
        .iter()
        .filter(|r| !r.body_text().is_empty())
        .map(|r| format!("**{}** ({}):\n{}", r.user.login, r.state, r.body_text()))
        .collect();
    if !reviews.is_empty() {
        parts.push(format!("## Reviews\n{}", reviews.join("\n\n")));
    }

    parts.join("\n\n")
}

/// Prompt for `/continue` and `/fix` on a PR conversation.
pub fn pr_prompt(kind: CommandKind, args: &str, history: &str) -> String {
    let (verb, default_task) = verb(kind);
    match (args.is_empty(), history.is_empty()) {
        (false, false) => format!(
            "You are helping with a pull request. Using the context below, {verb} the PR.\n\n\
             {history}\n\n\
             ## Current instruction\n{args}\n\n\
             Notes:\n\
             1. The current instruction is the task; history is context only.\n\
             2. Keep changes consistent with the PR's goal and earlier agreements.\n\
             3. If the instruction conflicts with earlier discussion, follow the instruction and say so."
        ),
        (false, true) => format!("Following this instruction, {verb} the PR:\n\n{args}"),
        (true, false) => format!(
            "You are helping with a pull request. Using the context below, {verb} the PR.\n\n\
             {history}\n\n\
             ## Task\n{default_task}"
        ),
        (true, true) => default_task.to_string(),
    }
}

/// Prompt for `/continue` and `/fix` on a single line comment.
pub fn review_comment_prompt(
    kind: CommandKind,
    comment: &ReviewComment,
    args: &str,
    history: &str,
) -> String {
    let (verb, default_task) = verb(kind);
    let location = match comment.line_range() {
        Some((start, end)) if start != end => format!("{}, lines {}-{}", comment.path, start, end),
        Some((line, _)) => format!("{}, line {}", comment.path, line),
        None => comment.path.clone(),
    };
    let task = if args.is_empty() { default_task } else { args };

    let mut prompt = format!(
        "A reviewer asked you to {verb} the code at {location}.\n\n\
         ## Review comment\n{}\n",
        comment.body
    );
    if !comment.diff_hunk.is_empty() {
        prompt.push_str(&format!("\n## Diff context\n```diff\n{}\n```\n", comment.diff_hunk));
    }
    if !history.is_empty() {
        prompt.push_str(&format!("\n{}\n", history));
    }
    prompt.push_str(&format!("\n## Task\n{}\n\nOnly change what the comment is about.", task));
    prompt
}

/// Prompt for a review whose line comments should be handled together.
pub fn review_batch_prompt(kind: CommandKind, comments: &[ReviewComment], args: &str) -> String {
    let (verb, default_task) = verb(kind);
    let listed: Vec<String> = comments
        .iter()
        .map(|c| match c.line_range() {
            Some((start, end)) if start != end => {
                format!("- {}:{}-{}: {}", c.path, start, end, c.body)
            }
            Some((line, _)) => format!("- {}:{}: {}", c.path, line, c.body),
            None => format!("- {}: {}", c.path, c.body),
        })
        .collect();
    let task = if args.is_empty() { default_task } else { args };

    format!(
        "A reviewer left the following comments. Please {verb} the PR by addressing all of them.\n\n\
         ## Review comments\n{}\n\n\
         ## Task\n{task}\n\n{}",
        listed.join("\n"),
        answer_format()
    )
}

/// Prompt for an automatic code review.
pub fn review_pr_prompt(pr: &PullRequest, files: &[PrFile]) -> String {
    let additions: u64 = files.iter().map(|f| f.additions).sum();
    let deletions: u64 = files.iter().map(|f| f.deletions).sum();
    let listed: Vec<String> = files
        .iter()
        .map(|f| format!("- {} (+{} -{})", f.filename, f.additions, f.deletions))
        .collect();

    format!(
        "Review the following pull request.\n\n\
         ## PR\n\
         - Title: {}\n\
         - Description: {}\n\
         - Author: {}\n\
         - Branch: {} -> {}\n\
         - Files changed: {}\n\
         - Lines: +{} -{}\n\n\
         ## Changed files\n{}\n\n\
         ## Review for\n\
         1. Code quality and naming\n\
         2. Correctness and likely bugs\n\
         3. Performance\n\
         4. Security\n\
         5. Maintainability\n\
         6. Test coverage\n\n\
         ## Output\n\
         ### Strengths\n\
         ### Issues\n\
         ### Suggestions\n\
         ### Verdict\n\
         State whether you recommend merging.",
        pr.title,
        pr.body_text(),
        pr.user.login,
        pr.head.ref_name,
        pr.base.ref_name,
        files.len(),
        additions,
        deletions,
        listed.join("\n"),
    )
}
