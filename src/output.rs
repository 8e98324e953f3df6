//! Parsing AI output and turning it into PR text.
//!
//! Prompts ask the assistant to answer with three markdown sections:
//! `## Summary`, `## Changes` and `## Test Plan`. Anything outside them is
//! kept only in the raw transcript.

/// Heading of the summary section.
pub const SECTION_SUMMARY: &str = "## Summary";
/// Heading of the changes section.
pub const SECTION_CHANGES: &str = "## Changes";
/// Heading of the test plan section.
pub const SECTION_TEST_PLAN: &str = "## Test Plan";

const ERROR_PREFIXES: &[&str] = &["error:", "exception:", "traceback", "panic:"];

/// The three sections of a structured AI answer. Empty when absent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StructuredOutput {
    /// What was done, in prose.
    pub summary: String,
    /// Files and changes.
    pub changes: String,
    /// How to verify.
    pub test_plan: String,
}

#[derive(Clone, Copy)]
enum Section {
    Summary,
    Changes,
    TestPlan,
}

/// Splits AI output into its sections.
///
/// Blank lines are dropped from the summary but kept in the other sections
/// so lists and code blocks survive.
pub fn parse_structured_output(output: &str) -> StructuredOutput {
    let mut current = None;
    let mut summary = Vec::new();
    let mut changes = Vec::new();
    let mut test_plan = Vec::new();

    for line in output.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with(SECTION_SUMMARY) {
            current = Some(Section::Summary);
            continue;
        } else if trimmed.starts_with(SECTION_CHANGES) {
            current = Some(Section::Changes);
            continue;
        } else if trimmed.starts_with(SECTION_TEST_PLAN) {
            current = Some(Section::TestPlan);
            continue;
        }

        match current {
            Some(Section::Summary) if !trimmed.is_empty() => summary.push(line),
            Some(Section::Changes) => changes.push(line),
            Some(Section::TestPlan) => test_plan.push(line),
            _ => {}
        }
    }

    StructuredOutput {
        summary: summary.join("\n").trim().to_string(),
        changes: changes.join("\n").trim().to_string(),
        test_plan: test_plan.join("\n").trim().to_string(),
    }
}

/// The last line that looks like an error report, if any.
pub fn extract_error_info(output: &str) -> Option<String> {
    output.lines().rev().map(str::trim).find_map(|line| {
        let lower = line.to_lowercase();
        ERROR_PREFIXES
            .iter()
            .any(|p| lower.starts_with(p))
            .then(|| line.to_string())
    })
}

/// Commit message derived from the summary's first line.
pub fn commit_message(output: &StructuredOutput, fallback: &str) -> String {
    output
        .summary
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .map_or_else(|| fallback.to_string(), |l| truncate(l, 72))
}

fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max_chars.saturating_sub(3)).collect();
        format!("{}...", cut)
    }
}

/// PR description built from an AI run.
///
/// Always carries the raw transcript and the prompt so failures are visible
/// to the requester; an error excerpt is added when one is found.
pub fn build_pr_body(raw_output: &str, prompt: &str) -> String {
    let sections = parse_structured_output(raw_output);
    let mut body = String::new();

    for (heading, text) in [
        (SECTION_SUMMARY, &sections.summary),
        (SECTION_CHANGES, &sections.changes),
        (SECTION_TEST_PLAN, &sections.test_plan),
    ] {
        if !text.is_empty() {
            body.push_str(&format!("{}\n\n{}\n\n", heading, text));
        }
    }

    body.push_str("---\n\n");
    body.push_str(&format!(
        "<details><summary>Full AI output</summary>\n\n{}\n\n</details>\n\n",
        raw_output
    ));

    if let Some(error) = extract_error_info(raw_output) {
        log::warn!("Error detected in AI output: {}", error);
        body.push_str(&format!("## Error\n\n```text\n{}\n```\n\n", error));
    }

    body.push_str(&format!(
        "<details><summary>Original prompt</summary>\n\n{}\n\n</details>",
        prompt
    ));
    body
}

/// Comment posted after a PR run: the summary up front, transcript folded.
pub fn build_reply(heading: &str, raw_output: &str) -> String {
    let sections = parse_structured_output(raw_output);
    let mut reply = format!("### {}\n\n", heading);
    if sections.summary.is_empty() {
        reply.push_str(raw_output.trim());
        reply.push_str("\n\n");
    } else {
        reply.push_str(&format!("{}\n\n", sections.summary));
        if !sections.changes.is_empty() {
            reply.push_str(&format!("{}\n\n{}\n\n", SECTION_CHANGES, sections.changes));
        }
        reply.push_str(&format!(
            "<details><summary>Full AI output</summary>\n\n{}\n\n</details>\n\n",
            raw_output
        ));
    }
    if let Some(error) = extract_error_info(raw_output) {
        reply.push_str(&format!("## Error\n\n```text\n{}\n```\n", error));
    }
    reply.trim_end().to_string()
}
