//! Event handlers and the router that picks one.
//!
//! # Architecture
//!
//! ```text
//! GithubEvent ──> ModeRouter::select ──> first handler (ascending priority)
//!                                        whose can_handle() is true
//!                                              │
//!                                              v
//!                                       Handler::execute
//! ```
//!
//! | Mode      | Priority | Claims                                           |
//! |-----------|----------|--------------------------------------------------|
//! | `tag`     | 10       | `/code`, `/continue`, `/fix` comments and reviews |
//! | `agent`   | 20       | assignment, labels, dispatch, schedule           |
//! | `review`  | 30       | PR opened/synchronize/ready, push to main        |
//! | `cleanup` | 40       | PR closed                                        |
//!
//! `can_handle` is a pure predicate: outer match on the event kind, inner
//! match on the action string.

pub mod agent;
pub mod cleanup;
pub mod review;
pub mod tag;

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

use crate::events::GithubEvent;

pub use agent::AgentHandler;
pub use cleanup::CleanupHandler;
pub use review::ReviewHandler;
pub use tag::TagHandler;

/// A strategy for one family of events.
#[async_trait]
pub trait Handler: Send + Sync {
    /// Short mode name used in logs.
    fn mode(&self) -> &'static str;

    /// Lower runs first.
    fn priority(&self) -> u32;

    /// Whether this handler claims `event`. Must not have side effects.
    fn can_handle(&self, event: &GithubEvent) -> bool;

    /// Handles a claimed event.
    async fn execute(&self, event: &GithubEvent) -> anyhow::Result<()>;
}

/// Errors from [`ModeRouter::dispatch`].
#[derive(Debug)]
pub enum DispatchError {
    /// No handler claimed the event. Callers treat this as a no-op.
    NoHandler {
        /// Event kind header value.
        event_type: String,
        /// Event action, possibly empty.
        action: String,
    },
    /// The selected handler failed.
    Handler {
        /// Mode of the failing handler.
        mode: &'static str,
        /// Its error, unchanged.
        source: anyhow::Error,
    },
}

impl fmt::Display for DispatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoHandler { event_type, action } if action.is_empty() => {
                write!(f, "No handler available for {event_type}")
            }
            Self::NoHandler { event_type, action } => {
                write!(f, "No handler available for {event_type}.{action}")
            }
            Self::Handler { mode, source } => write!(f, "{mode} handler failed: {source:#}"),
        }
    }
}

impl std::error::Error for DispatchError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::NoHandler { .. } => None,
            Self::Handler { source, .. } => Some(source.as_ref()),
        }
    }
}

/// Priority-ordered set of handlers.
#[derive(Default)]
pub struct ModeRouter {
    handlers: Vec<Arc<dyn Handler>>,
}

impl fmt::Debug for ModeRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let modes: Vec<_> = self
            .handlers
            .iter()
            .map(|h| (h.mode(), h.priority()))
            .collect();
        f.debug_struct("ModeRouter").field("handlers", &modes).finish()
    }
}

impl ModeRouter {
    /// Empty router.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a handler. Among equal priorities the earlier registration wins.
    pub fn register(&mut self, handler: Arc<dyn Handler>) {
        self.handlers.push(handler);
        // Stable sort keeps registration order for ties.
        self.handlers.sort_by_key(|h| h.priority());
    }

    /// Registered modes in selection order.
    pub fn modes(&self) -> Vec<&'static str> {
        self.handlers.iter().map(|h| h.mode()).collect()
    }

    /// The first handler, by ascending priority, that claims `event`.
    pub fn select(&self, event: &GithubEvent) -> Option<Arc<dyn Handler>> {
        self.handlers
            .iter()
            .find(|h| h.can_handle(event))
            .map(Arc::clone)
    }

    /// Selects a handler and runs it. Returns the mode that handled the event.
    pub async fn dispatch(&self, event: &GithubEvent) -> Result<&'static str, DispatchError> {
        let Some(handler) = self.select(event) else {
            return Err(DispatchError::NoHandler {
                event_type: event.kind().to_string(),
                action: event.action().to_string(),
            });
        };
        let mode = handler.mode();
        log::info!("Dispatching {} to {} handler", event, mode);
        handler
            .execute(event)
            .await
            .map(|()| mode)
            .map_err(|source| DispatchError::Handler { mode, source })
    }
}
