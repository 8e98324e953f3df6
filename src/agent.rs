//! Top-level entry point: one [`Agent`] per process.
//!
//! # Architecture
//!
//! ```text
//!  raw event ──> parse_event ──> ModeRouter ──> Handler ──> Pipeline
//!                                                             │
//!             ┌───────────────────────────────────────────────┤
//!             v                    v                          v
//!    WorkspaceRegistry      SessionRegistry             GithubClient
//!             ^                    ^
//!             └──── ExpirySweeper ─┘   (background, one per agent)
//! ```
//!
//! Events are handled concurrently; the two registries are the only shared
//! mutable state.

use anyhow::Result;
use std::fmt;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::events::{parse_event, EventParseError};
use crate::github::GithubClient;
use crate::modes::{
    AgentHandler, CleanupHandler, DispatchError, ModeRouter, ReviewHandler, TagHandler,
};
use crate::pipeline::Pipeline;
use crate::session::{SessionFactory, SessionRegistry};
use crate::sweeper::{ExpirySweeper, SweepReport};
use crate::workspace::{WorkspaceProvisioner, WorkspaceRegistry};

/// What happened to an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandleOutcome {
    /// A handler claimed and completed the event.
    Handled {
        /// Mode of that handler.
        mode: &'static str,
    },
    /// No handler claims this event.
    Ignored,
}

/// The agent: registries, sweeper, pipeline and router wired together.
pub struct Agent {
    pipeline: Arc<Pipeline>,
    router: ModeRouter,
    workspaces: Arc<WorkspaceRegistry>,
    sessions: Arc<SessionRegistry>,
    sweeper: Arc<ExpirySweeper>,
}

impl fmt::Debug for Agent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Agent")
            .field("router", &self.router)
            .field("workspaces", &self.workspaces.len())
            .field("sessions", &self.sessions.len())
            .finish_non_exhaustive()
    }
}

impl Agent {
    /// Builds an agent over the given collaborators.
    pub fn new(
        config: Config,
        github: Arc<dyn GithubClient>,
        provisioner: Arc<dyn WorkspaceProvisioner>,
        session_factory: Arc<dyn SessionFactory>,
    ) -> Self {
        let config = Arc::new(config);
        let workspaces = Arc::new(WorkspaceRegistry::new());
        let sessions = Arc::new(SessionRegistry::new(session_factory));
        let sweeper = Arc::new(ExpirySweeper::new(
            Arc::clone(&workspaces),
            Arc::clone(&sessions),
            Arc::clone(&provisioner),
            config.workspace_ttl(),
            config.sweep_interval(),
        ));
        let pipeline = Arc::new(Pipeline::new(
            config,
            github,
            provisioner,
            Arc::clone(&workspaces),
            Arc::clone(&sessions),
            Arc::clone(&sweeper),
        ));

        let mut router = ModeRouter::new();
        router.register(Arc::new(TagHandler::new(Arc::clone(&pipeline))));
        router.register(Arc::new(AgentHandler::new(Arc::clone(&pipeline))));
        router.register(Arc::new(ReviewHandler::new(Arc::clone(&pipeline))));
        router.register(Arc::new(CleanupHandler::new(Arc::clone(&pipeline))));

        Self {
            pipeline,
            router,
            workspaces,
            sessions,
            sweeper,
        }
    }

    /// Parses, routes and runs one event.
    ///
    /// Unclaimed events, including event types the agent has no model for
    /// (`ping`, `star`), are [`HandleOutcome::Ignored`], not errors. A
    /// malformed payload for a known event type is an error.
    pub async fn handle(&self, event_type: &str, payload: &[u8]) -> Result<HandleOutcome> {
        let event_id = uuid::Uuid::new_v4().to_string();
        let event_id = &event_id[..8];
        let event = match parse_event(event_type, payload) {
            Ok(event) => event,
            Err(EventParseError::UnsupportedEvent(kind)) => {
                log::info!("[{}] Ignoring unsupported event type {}", event_id, kind);
                return Ok(HandleOutcome::Ignored);
            }
            Err(e) => return Err(e.into()),
        };
        log::info!("[{}] Received {} from {}", event_id, event, event.sender().login);

        match self.router.dispatch(&event).await {
            Ok(mode) => {
                log::info!("[{}] Handled by {} mode", event_id, mode);
                Ok(HandleOutcome::Handled { mode })
            }
            Err(DispatchError::NoHandler { .. }) => {
                log::info!("[{}] No handler for {}, ignoring", event_id, event);
                Ok(HandleOutcome::Ignored)
            }
            Err(e) => {
                log::error!("[{}] {}", event_id, e);
                Err(e.into())
            }
        }
    }

    /// Starts the expiry sweeper on the current runtime.
    pub fn spawn_sweeper(&self, token: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(Arc::clone(&self.sweeper).run(token))
    }

    /// Runs one sweep pass now.
    pub async fn sweep_once(&self) -> SweepReport {
        self.sweeper.sweep_once().await
    }

    /// Workspace registry.
    pub fn workspaces(&self) -> &WorkspaceRegistry {
        &self.workspaces
    }

    /// Session registry.
    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    /// Shared flows, for callers that bypass routing.
    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// Router with the standard handlers.
    pub fn router(&self) -> &ModeRouter {
        &self.router
    }
}
