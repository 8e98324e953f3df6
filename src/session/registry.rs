//! Registry of live sessions, one per workspace.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use super::{ProcessSession, SessionError, SessionFactory};
use crate::keyed::KeyedLocks;
use crate::workspace::{Workspace, WorkspaceKey};

/// Starting a session failed. Never retried at this layer.
#[derive(Debug)]
pub struct SessionStartError {
    /// Workspace the session was for.
    pub workspace: String,
    /// Underlying failure.
    pub source: SessionError,
}

impl fmt::Display for SessionStartError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Failed to start session for {}: {}", self.workspace, self.source)
    }
}

impl std::error::Error for SessionStartError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

/// Owns the mapping from workspace identity to [`ProcessSession`].
///
/// Sessions start lazily on first [`Self::get`] and end on [`Self::close`].
/// The map lock is never held while a session starts or closes.
pub struct SessionRegistry {
    factory: Arc<dyn SessionFactory>,
    sessions: Mutex<HashMap<WorkspaceKey, Arc<dyn ProcessSession>>>,
    starting: KeyedLocks<WorkspaceKey>,
}

impl fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("sessions", &self.len())
            .finish_non_exhaustive()
    }
}

impl SessionRegistry {
    /// Creates an empty registry that starts sessions with `factory`.
    pub fn new(factory: Arc<dyn SessionFactory>) -> Self {
        Self {
            factory,
            sessions: Mutex::new(HashMap::new()),
            starting: KeyedLocks::default(),
        }
    }

    fn lookup(&self, key: &WorkspaceKey) -> Option<Arc<dyn ProcessSession>> {
        self.sessions.lock().ok()?.get(key).map(Arc::clone)
    }

    /// Returns the workspace's session, starting one if needed.
    pub async fn get(
        &self,
        workspace: &Workspace,
    ) -> Result<Arc<dyn ProcessSession>, SessionStartError> {
        if let Some(session) = self.lookup(&workspace.key) {
            return Ok(session);
        }

        self.starting
            .run(&workspace.key, async {
                if let Some(session) = self.lookup(&workspace.key) {
                    return Ok(session);
                }
                let session = self
                    .factory
                    .start(workspace)
                    .await
                    .map_err(|source| SessionStartError {
                        workspace: workspace.key.to_string(),
                        source,
                    })?;
                log::info!("Started session {} for {}", session.id(), workspace.key);
                if let Ok(mut sessions) = self.sessions.lock() {
                    sessions.insert(workspace.key.clone(), Arc::clone(&session));
                }
                Ok(session)
            })
            .await
    }

    /// Closes and deregisters the workspace's session.
    ///
    /// A never-started or already-closed session is a no-op.
    pub async fn close(&self, workspace: &Workspace) -> Result<(), SessionError> {
        let removed = match self.sessions.lock() {
            Ok(mut sessions) => sessions.remove(&workspace.key),
            Err(_) => return Err(SessionError::fatal("session table poisoned")),
        };
        let Some(session) = removed else {
            log::debug!("No session to close for {}", workspace.key);
            return Ok(());
        };
        session.close().await?;
        log::info!("Closed session {} for {}", session.id(), workspace.key);
        Ok(())
    }

    /// True if the workspace has a live session.
    pub fn contains(&self, workspace: &Workspace) -> bool {
        self.lookup(&workspace.key).is_some()
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.sessions.lock().map(|s| s.len()).unwrap_or(0)
    }

    /// Check if no sessions are live.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
