//! Slash commands in comments.
//!
//! ```text
//! /code [-<model>] [instructions...]
//! /continue [-<model>] [instructions...]
//! /fix [-<model>] [instructions...]
//! ```

use std::fmt;

/// Which slash command was used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    /// Implement an issue in a new branch and PR.
    Code,
    /// Keep working on an existing PR.
    Continue,
    /// Fix problems on an existing PR.
    Fix,
}

impl CommandKind {
    /// The slash form, e.g. `/code`.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Code => "/code",
            Self::Continue => "/continue",
            Self::Fix => "/fix",
        }
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A parsed slash command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagCommand {
    /// Command used.
    pub kind: CommandKind,
    /// Model requested with `-<model>`.
    pub ai_model: Option<String>,
    /// Remaining instructions, trimmed.
    pub args: String,
}

/// Parses a comment body. Returns `None` unless it starts with a command.
pub fn parse_command(body: &str) -> Option<TagCommand> {
    let body = body.trim_start();
    let (head, rest) = body
        .split_once(char::is_whitespace)
        .unwrap_or((body, ""));
    let kind = match head {
        "/code" => CommandKind::Code,
        "/continue" => CommandKind::Continue,
        "/fix" => CommandKind::Fix,
        _ => return None,
    };

    let rest = rest.trim_start();
    let (ai_model, args) = match rest.split_once(char::is_whitespace).unwrap_or((rest, "")) {
        (token, tail) if token.len() > 1 && token.starts_with('-') => {
            (Some(token[1..].to_string()), tail)
        }
        _ => (None, rest),
    };

    Some(TagCommand {
        kind,
        ai_model,
        args: args.trim().to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_code_command() {
        let cmd = parse_command("/code").unwrap();
        assert_eq!(cmd.kind, CommandKind::Code);
        assert_eq!(cmd.ai_model, None);
        assert_eq!(cmd.args, "");
    }

    #[test]
    fn test_model_and_args() {
        let cmd = parse_command("  /fix -gemini  the failing test\nin ci").unwrap();
        assert_eq!(cmd.kind, CommandKind::Fix);
        assert_eq!(cmd.ai_model.as_deref(), Some("gemini"));
        assert_eq!(cmd.args, "the failing test\nin ci");
    }

    #[test]
    fn test_args_without_model() {
        let cmd = parse_command("/continue add docs").unwrap();
        assert_eq!(cmd.ai_model, None);
        assert_eq!(cmd.args, "add docs");
    }

    #[test]
    fn test_non_commands() {
        assert!(parse_command("looks good to me").is_none());
        assert!(parse_command("/codex run").is_none());
        assert!(parse_command("please /code this").is_none());
        assert!(parse_command("").is_none());
    }

    #[test]
    fn test_lone_dash_is_an_argument() {
        let cmd = parse_command("/code - list").unwrap();
        assert_eq!(cmd.ai_model, None);
        assert_eq!(cmd.args, "- list");
    }
}
