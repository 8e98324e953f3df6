//! Configuration loading and persistence.
//!
//! Handles reading and writing the forgehand configuration file. The GitHub
//! token is never written to disk; it comes from the environment.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;
use std::time::Duration;
use std::{fs, path::PathBuf};

use crate::constants;

/// Command line used to launch one AI assistant.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct AgentCommand {
    /// Executable name or path.
    pub program: String,
    /// Arguments passed before the prompt is written to stdin.
    #[serde(default)]
    pub args: Vec<String>,
}

impl AgentCommand {
    fn new(program: &str, args: &[&str]) -> Self {
        Self {
            program: program.to_string(),
            args: args.iter().map(|a| (*a).to_string()).collect(),
        }
    }
}

/// Configuration for the forgehand agent.
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(default)]
pub struct Config {
    /// Base URL of the GitHub REST API.
    pub github_api_url: String,
    /// GitHub token - NOT serialized to disk.
    #[serde(skip)]
    pub github_token: String,
    /// Base directory for clones, worktrees and session directories.
    pub workspace_base: PathBuf,
    /// Model used when neither the command nor the branch names one.
    pub default_ai_model: String,
    /// AI assistant launch commands keyed by model name.
    pub agents: BTreeMap<String, AgentCommand>,
    /// Seconds a workspace may live before the sweeper reclaims it.
    pub workspace_ttl_secs: u64,
    /// Seconds between expiry sweeps.
    pub sweep_interval_secs: u64,
    /// Attempts per AI request.
    pub retry_max_attempts: u32,
    /// Linear backoff unit in milliseconds.
    pub retry_base_delay_ms: u64,
    /// Namespace for branches created by the agent.
    pub branch_prefix: String,
    /// Labels that trigger automatic issue processing.
    pub auto_trigger_labels: Vec<String>,
    /// Process issues as soon as they are opened.
    pub auto_process_opened_issues: bool,
    /// Review pull requests automatically when opened or updated.
    pub auto_review_prs: bool,
    /// Author name for commits made in workspaces.
    pub git_user_name: String,
    /// Author email for commits made in workspaces.
    pub git_user_email: String,
}

impl Default for Config {
    fn default() -> Self {
        let workspace_base = dirs::home_dir()
            .map(|h| h.join("forgehand-workspaces"))
            .unwrap_or_else(|| PathBuf::from("forgehand-workspaces"));

        let mut agents = BTreeMap::new();
        agents.insert(
            "claude".to_string(),
            AgentCommand::new("claude", &["--print", "--dangerously-skip-permissions"]),
        );
        agents.insert("gemini".to_string(), AgentCommand::new("gemini", &["--yolo"]));

        Self {
            github_api_url: "https://api.github.com".to_string(),
            github_token: String::new(),
            workspace_base,
            default_ai_model: "claude".to_string(),
            agents,
            workspace_ttl_secs: constants::DEFAULT_WORKSPACE_TTL.as_secs(),
            sweep_interval_secs: constants::SWEEP_INTERVAL.as_secs(),
            retry_max_attempts: constants::DEFAULT_RETRY_ATTEMPTS,
            retry_base_delay_ms: 500,
            branch_prefix: constants::DEFAULT_BRANCH_PREFIX.to_string(),
            auto_trigger_labels: constants::DEFAULT_AUTO_TRIGGER_LABELS
                .iter()
                .map(|l| (*l).to_string())
                .collect(),
            auto_process_opened_issues: false,
            auto_review_prs: false,
            git_user_name: "forgehand".to_string(),
            git_user_email: "forgehand@users.noreply.github.com".to_string(),
        }
    }
}

impl Config {
    /// Returns the configuration directory path, creating it if necessary.
    ///
    /// `FORGEHAND_CONFIG_DIR` overrides the platform config directory.
    pub fn config_dir() -> Result<PathBuf> {
        let dir = if let Ok(dir) = std::env::var("FORGEHAND_CONFIG_DIR") {
            PathBuf::from(dir)
        } else {
            dirs::config_dir()
                .context("Could not determine config directory")?
                .join("forgehand")
        };
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create config dir {}", dir.display()))?;
        Ok(dir)
    }

    /// Loads configuration from file, with environment variable overrides.
    ///
    /// A missing or unreadable file falls back to defaults.
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from_file().unwrap_or_else(|e| {
            log::debug!("Using default config: {}", e);
            Self::default()
        });
        config.apply_env_overrides();
        config.workspace_base = expand_path(&config.workspace_base);
        Ok(config)
    }

    fn load_from_file() -> Result<Self> {
        let config_path = Self::config_dir()?.join("config.json");
        if config_path.exists() {
            let content = fs::read_to_string(&config_path)?;
            Ok(serde_json::from_str(&content)?)
        } else {
            anyhow::bail!("Config file not found")
        }
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("FORGEHAND_GITHUB_API_URL") {
            self.github_api_url = url;
        }

        // Token from env var; the forgehand-specific name wins
        if let Ok(token) = std::env::var("FORGEHAND_GITHUB_TOKEN") {
            self.github_token = token;
        } else if let Ok(token) = std::env::var("GITHUB_TOKEN") {
            self.github_token = token;
        }

        if let Ok(base) = std::env::var("FORGEHAND_WORKSPACE_BASE") {
            self.workspace_base = PathBuf::from(base);
        }

        if let Ok(model) = std::env::var("FORGEHAND_DEFAULT_AI_MODEL") {
            self.default_ai_model = model;
        }

        if let Ok(ttl) = std::env::var("FORGEHAND_WORKSPACE_TTL") {
            if let Ok(ttl) = ttl.parse::<u64>() {
                self.workspace_ttl_secs = ttl;
            }
        }

        if let Ok(interval) = std::env::var("FORGEHAND_SWEEP_INTERVAL") {
            if let Ok(interval) = interval.parse::<u64>() {
                self.sweep_interval_secs = interval;
            }
        }

        if let Ok(attempts) = std::env::var("FORGEHAND_RETRY_ATTEMPTS") {
            if let Ok(attempts) = attempts.parse::<u32>() {
                self.retry_max_attempts = attempts;
            }
        }
    }

    /// Persists the current configuration to disk.
    /// Note: the GitHub token is never saved.
    pub fn save(&self) -> Result<()> {
        let config_path = Self::config_dir()?.join("config.json");
        fs::write(&config_path, serde_json::to_string_pretty(self)?)?;

        // Set restrictive permissions (owner read/write only)
        #[cfg(unix)]
        fs::set_permissions(&config_path, fs::Permissions::from_mode(0o600))?;

        Ok(())
    }

    /// Check if a GitHub token is available.
    pub fn has_token(&self) -> bool {
        !self.github_token.is_empty()
    }

    /// Workspace time-to-live.
    pub fn workspace_ttl(&self) -> Duration {
        Duration::from_secs(self.workspace_ttl_secs)
    }

    /// Interval between expiry sweeps.
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    /// Linear retry backoff unit.
    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    /// Launch command for a model, if one is configured.
    pub fn agent_command(&self, model: &str) -> Option<&AgentCommand> {
        self.agents.get(model)
    }

    /// True when `label` is one of the auto-trigger labels (case-insensitive).
    pub fn is_auto_trigger_label(&self, label: &str) -> bool {
        self.auto_trigger_labels
            .iter()
            .any(|l| l.eq_ignore_ascii_case(label))
    }
}

/// Expands `~` and environment variables in a configured path.
fn expand_path(path: &std::path::Path) -> PathBuf {
    let raw = path.to_string_lossy();
    match shellexpand::full(&raw) {
        Ok(expanded) => PathBuf::from(expanded.as_ref()),
        Err(e) => {
            log::warn!("Could not expand path {}: {}", raw, e);
            path.to_path_buf()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.default_ai_model, "claude");
        assert_eq!(config.sweep_interval(), Duration::from_secs(3600));
        assert_eq!(config.retry_max_attempts, 3);
        assert_eq!(config.retry_base_delay(), Duration::from_millis(500));
        assert!(!config.auto_process_opened_issues);
        assert!(!config.auto_review_prs);
        assert!(config.agent_command("claude").is_some());
    }

    #[test]
    fn test_token_is_not_serialized() {
        let config = Config {
            github_token: "ghp_secret".to_string(),
            ..Config::default()
        };
        let json = serde_json::to_string(&config).unwrap();
        assert!(!json.contains("ghp_secret"));
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let config: Config = serde_json::from_str(r#"{"default_ai_model": "gemini"}"#).unwrap();
        assert_eq!(config.default_ai_model, "gemini");
        assert_eq!(config.branch_prefix, "forgehand");
        assert_eq!(config.workspace_ttl(), constants::DEFAULT_WORKSPACE_TTL);
    }

    #[test]
    fn test_auto_trigger_label_is_case_insensitive() {
        let config = Config::default();
        assert!(config.is_auto_trigger_label("AI-Assist"));
        assert!(!config.is_auto_trigger_label("bug"));
    }

    #[test]
    fn test_expand_path_keeps_plain_paths() {
        let path = PathBuf::from("/tmp/forgehand");
        assert_eq!(expand_path(&path), path);
    }
}
