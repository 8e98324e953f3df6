//! Session backed by an AI command-line assistant.
//!
//! Each prompt runs the configured executable inside the workspace with the
//! prompt on stdin; stdout is the response. Conversation state lives in the
//! workspace's session directory (exported as `FORGEHAND_SESSION_DIR`).

use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use super::{ProcessSession, SessionError, SessionFactory, SessionResponse};
use crate::config::{AgentCommand, Config};
use crate::workspace::Workspace;

/// A [`ProcessSession`] that launches the AI CLI once per prompt.
#[derive(Debug)]
pub struct CliSession {
    id: String,
    command: AgentCommand,
    workdir: PathBuf,
    session_dir: Option<PathBuf>,
    closed: AtomicBool,
    exchanges: AtomicU64,
}

impl CliSession {
    /// Creates a session running `command` in `workdir`.
    pub fn new(command: AgentCommand, workdir: PathBuf, session_dir: Option<PathBuf>) -> Self {
        let id = uuid::Uuid::new_v4().to_string()[..8].to_string();
        Self {
            id,
            command,
            workdir,
            session_dir,
            closed: AtomicBool::new(false),
            exchanges: AtomicU64::new(0),
        }
    }

    /// Number of completed exchanges.
    pub fn exchanges(&self) -> u64 {
        self.exchanges.load(Ordering::Relaxed)
    }

    fn spawn_error(&self, e: &std::io::Error) -> SessionError {
        if e.kind() == ErrorKind::NotFound {
            SessionError::not_found(format!("{} not found: {}", self.command.program, e))
        } else {
            SessionError::fatal(format!("failed to launch {}: {}", self.command.program, e))
        }
    }
}

#[async_trait]
impl ProcessSession for CliSession {
    fn id(&self) -> &str {
        &self.id
    }

    async fn send(&self, prompt: &str) -> Result<SessionResponse, SessionError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(SessionError::fatal("session closed"));
        }

        let mut command = Command::new(&self.command.program);
        command
            .args(&self.command.args)
            .current_dir(&self.workdir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.session_dir {
            command.env("FORGEHAND_SESSION_DIR", dir);
        }

        let mut child = command.spawn().map_err(|e| self.spawn_error(&e))?;
        log::debug!("Session {} sending {} byte prompt", self.id, prompt.len());

        if let Some(mut stdin) = child.stdin.take() {
            let written = stdin.write_all(prompt.as_bytes()).await;
            if let Err(e) = written {
                return Err(if e.kind() == ErrorKind::BrokenPipe {
                    SessionError::transient(format!("pipe closed: {}", e))
                } else {
                    SessionError::transient(format!("failed to write prompt: {}", e))
                });
            }
            // Dropping stdin signals end of prompt.
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| SessionError::transient(format!("lost process: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(SessionError::transient(format!(
                "process already exited ({}): {}",
                output.status,
                stderr.trim()
            )));
        }

        self.exchanges.fetch_add(1, Ordering::Relaxed);
        Ok(SessionResponse::from_bytes(output.stdout))
    }

    async fn close(&self) -> Result<(), SessionError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            log::debug!("Session {} already closed", self.id);
        }
        Ok(())
    }
}

/// Starts [`CliSession`]s using the per-model commands from [`Config`].
#[derive(Debug, Clone)]
pub struct CliSessionFactory {
    config: Arc<Config>,
}

impl CliSessionFactory {
    /// Creates a factory reading commands from `config`.
    pub fn new(config: Arc<Config>) -> Self {
        Self { config }
    }
}

#[async_trait]
impl SessionFactory for CliSessionFactory {
    async fn start(&self, workspace: &Workspace) -> Result<Arc<dyn ProcessSession>, SessionError> {
        let command = self
            .config
            .agent_command(workspace.ai_model())
            .cloned()
            .ok_or_else(|| {
                SessionError::not_found(format!(
                    "no agent command configured for model '{}'",
                    workspace.ai_model()
                ))
            })?;
        if !workspace.path.is_dir() {
            return Err(SessionError::not_found(format!(
                "workspace directory {} does not exist",
                workspace.path.display()
            )));
        }
        Ok(Arc::new(CliSession::new(
            command,
            workspace.path.clone(),
            workspace.session_path.clone(),
        )))
    }
}
