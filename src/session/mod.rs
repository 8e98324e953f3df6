//! AI process sessions.
//!
//! A [`ProcessSession`] is a handle to one AI assistant bound to one
//! workspace. Its only data operation is [`ProcessSession::send`], which
//! returns a [`SessionResponse`] byte stream the caller drains completely.
//!
//! # Architecture
//!
//! ```text
//! SessionRegistry ── owns ──> WorkspaceKey → Arc<dyn ProcessSession>
//!     │
//!     └── SessionFactory (trait)
//!             └── CliSessionFactory → CliSession (AI CLI per prompt)
//! ```
//!
//! Failures carry a [`SessionErrorKind`] set by the session itself, so the
//! retry layer never inspects message text.

pub mod cli;
pub mod registry;

use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::workspace::Workspace;

pub use cli::{CliSession, CliSessionFactory};
pub use registry::{SessionRegistry, SessionStartError};

/// Classification of a session failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionErrorKind {
    /// Dead process, broken pipe, interrupted exchange. Worth retrying.
    Transient,
    /// The session cannot serve requests (closed, misconfigured).
    Fatal,
    /// The AI executable or workspace is missing.
    NotFound,
}

impl fmt::Display for SessionErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transient => write!(f, "transient"),
            Self::Fatal => write!(f, "fatal"),
            Self::NotFound => write!(f, "not found"),
        }
    }
}

/// Error returned by session operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionError {
    /// Failure classification.
    pub kind: SessionErrorKind,
    /// Human-readable detail.
    pub message: String,
}

impl SessionError {
    /// A retryable failure.
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: SessionErrorKind::Transient,
            message: message.into(),
        }
    }

    /// A non-retryable failure.
    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            kind: SessionErrorKind::Fatal,
            message: message.into(),
        }
    }

    /// A missing executable or resource.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            kind: SessionErrorKind::NotFound,
            message: message.into(),
        }
    }

    /// True for [`SessionErrorKind::Transient`].
    pub fn is_transient(&self) -> bool {
        self.kind == SessionErrorKind::Transient
    }
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} session error: {}", self.kind, self.message)
    }
}

impl std::error::Error for SessionError {}

/// Byte stream produced by one [`ProcessSession::send`] exchange.
pub struct SessionResponse {
    reader: Pin<Box<dyn AsyncRead + Send>>,
}

impl SessionResponse {
    /// Wraps any async reader.
    pub fn new(reader: impl AsyncRead + Send + 'static) -> Self {
        Self {
            reader: Box::pin(reader),
        }
    }

    /// A response whose content is already in memory.
    pub fn from_bytes(bytes: impl Into<Bytes>) -> Self {
        Self::new(std::io::Cursor::new(bytes.into()))
    }

    /// Drains the stream to the end.
    pub async fn read_all(mut self) -> Result<Vec<u8>, SessionError> {
        let mut buf = Vec::new();
        self.reader
            .read_to_end(&mut buf)
            .await
            .map_err(|e| SessionError::transient(format!("response stream interrupted: {}", e)))?;
        Ok(buf)
    }

    /// Drains the stream and decodes it as UTF-8 (lossy).
    pub async fn read_to_string(self) -> Result<String, SessionError> {
        let buf = self.read_all().await?;
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }
}

impl fmt::Debug for SessionResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionResponse").finish_non_exhaustive()
    }
}

/// A live handle to one AI assistant bound to one workspace.
#[async_trait]
pub trait ProcessSession: Send + Sync + fmt::Debug {
    /// Session identifier, for logs.
    fn id(&self) -> &str;

    /// Sends one prompt and returns the response stream.
    ///
    /// # Errors
    ///
    /// Dead-process and broken-pipe failures are reported as
    /// [`SessionErrorKind::Transient`]; a closed session as
    /// [`SessionErrorKind::Fatal`].
    async fn send(&self, prompt: &str) -> Result<SessionResponse, SessionError>;

    /// Terminates the session. Calling it again is a no-op.
    async fn close(&self) -> Result<(), SessionError>;
}

/// Starts sessions for workspaces.
#[async_trait]
pub trait SessionFactory: Send + Sync {
    /// Starts the underlying process for `workspace`.
    async fn start(&self, workspace: &Workspace) -> Result<Arc<dyn ProcessSession>, SessionError>;
}
