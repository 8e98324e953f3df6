//! Application-wide constants for forgehand.
//!
//! This module centralizes the magic numbers used across the agent so the
//! defaults in [`crate::config::Config`] and the background tasks agree.
//!
//! # Categories
//!
//! - **Timeouts**: Network and operation timeouts
//! - **Lifecycle**: Workspace expiry and sweep cadence
//! - **Retry**: AI request retry policy
//! - **Automation**: Labels and limits used by the automation handler

use std::time::Duration;

// ============================================================================
// Timeouts
// ============================================================================

/// HTTP client request timeout for GitHub API calls.
pub const HTTP_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// User agent sent with every GitHub API request.
pub const USER_AGENT: &str = concat!("forgehand/", env!("CARGO_PKG_VERSION"));

// ============================================================================
// Lifecycle
// ============================================================================

/// How often the expiry sweeper scans the workspace registry.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Default workspace time-to-live before the sweeper reclaims it.
pub const DEFAULT_WORKSPACE_TTL: Duration = Duration::from_secs(24 * 60 * 60);

// ============================================================================
// Retry
// ============================================================================

/// Default number of attempts for one AI request.
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 3;

/// Linear backoff unit. The n-th retry waits `n * RETRY_BASE_DELAY`.
pub const RETRY_BASE_DELAY: Duration = Duration::from_millis(500);

// ============================================================================
// Automation
// ============================================================================

/// Issue labels that trigger automatic processing when applied.
pub const DEFAULT_AUTO_TRIGGER_LABELS: &[&str] = &["ai-assist", "forgehand", "auto-code", "ai-help"];

/// Upper bound on issues handled by one `batch_process_issues` dispatch.
pub const DEFAULT_BATCH_MAX_ISSUES: usize = 10;

/// Branch namespace used for every branch this agent creates.
pub const DEFAULT_BRANCH_PREFIX: &str = "forgehand";

/// Name of the file listing glob patterns copied into fresh worktrees.
pub const COPY_PATTERNS_FILE: &str = ".forgehand_copy";
