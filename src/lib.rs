//! forgehand - turns GitHub events into AI-authored code changes.
//!
//! A comment like `/code` on an issue gets a dedicated git worktree, a
//! long-lived AI assistant process bound to it, a branch and a pull request.
//! Later `/continue` and `/fix` commands reuse the same workspace and
//! session; closing the PR or letting the workspace expire tears both down.
//!
//! # Architecture
//!
//! - **Workspace registry** - identity key to on-disk worktree, shared by
//!   all handlers and the sweeper
//! - **Session registry** - one AI process per workspace
//! - **Retry executor** - bounded retries of a single AI request
//! - **Mode router** - picks one handler per event by priority
//! - **Expiry sweeper** - background reclamation of stale workspaces
//!
//! # Modules
//!
//! - [`agent`] - top-level facade
//! - [`modes`] - handlers and router
//! - [`pipeline`] - end-to-end flows shared by handlers
//! - [`workspace`] - registry and git worktree provisioning
//! - [`session`] - AI process sessions
//! - [`github`] - GitHub client
//! - [`config`] - configuration loading/saving

// Library modules
pub mod agent;
pub mod command;
pub mod config;
pub mod constants;
pub mod events;
pub mod github;
pub mod modes;
pub mod output;
pub mod pipeline;
pub mod prompt;
pub mod retry;
pub mod session;
pub mod sweeper;
pub mod workspace;

mod keyed;

// Re-export commonly used types
pub use agent::{Agent, HandleOutcome};
pub use config::Config;
pub use events::{parse_event, GithubEvent};
pub use github::{GithubClient, RestGithubClient};
pub use modes::{Handler, ModeRouter};
pub use retry::{RetryError, RetryExecutor};
pub use session::{CliSessionFactory, ProcessSession, SessionError, SessionRegistry};
pub use sweeper::{ExpirySweeper, Teardown};
pub use workspace::{Workspace, WorkspaceKey, WorkspaceRegistry, WorktreeProvisioner};
