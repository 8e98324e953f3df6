//! Background expiry of stale workspaces.
//!
//! # State machine
//!
//! ```text
//!            tick                  non-empty snapshot
//!   Idle ──────────> Scanning ─────────────────────> Acting
//!    ^                  │ empty                        │
//!    └──────────────────┴──────────────────────────────┘
//! ```
//!
//! Scanning takes a detached snapshot with
//! [`WorkspaceRegistry::expired_since`]; Acting tears each entry down with
//! no registry lock held. Each teardown is independent and best-effort:
//! session close failures are logged and cleanup continues; a failed
//! cleanup leaves the entry registered for the next tick. A snapshot entry
//! whose key now maps to a different workspace is skipped untouched.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::session::SessionRegistry;
use crate::workspace::{Workspace, WorkspaceProvisioner, WorkspaceRegistry};

/// Where the sweeper currently is in its cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepPhase {
    /// Waiting for the next tick.
    Idle,
    /// Taking the expired snapshot.
    Scanning,
    /// Tearing down expired workspaces.
    Acting,
}

impl SweepPhase {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::Scanning,
            2 => Self::Acting,
            _ => Self::Idle,
        }
    }
}

/// Outcome of one sweep pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Workspaces found expired.
    pub expired: usize,
    /// Workspaces torn down.
    pub removed: usize,
    /// Workspaces whose cleanup failed and stay registered.
    pub failed: usize,
    /// Snapshot entries already deregistered or replaced by the time they
    /// were reached.
    pub superseded: usize,
}

/// What [`ExpirySweeper::teardown`] did with one workspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Teardown {
    /// Session closed, disk cleaned, entry deregistered.
    Removed,
    /// The registry no longer holds this workspace; nothing was touched.
    Superseded,
    /// Disk cleanup failed; the entry stays registered.
    Failed,
}

/// Periodically reclaims workspaces older than the TTL.
pub struct ExpirySweeper {
    workspaces: Arc<WorkspaceRegistry>,
    sessions: Arc<SessionRegistry>,
    provisioner: Arc<dyn WorkspaceProvisioner>,
    ttl: Duration,
    period: Duration,
    phase: AtomicU8,
}

impl fmt::Debug for ExpirySweeper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExpirySweeper")
            .field("ttl", &self.ttl)
            .field("period", &self.period)
            .field("phase", &self.phase())
            .finish_non_exhaustive()
    }
}

impl ExpirySweeper {
    /// Creates a sweeper over the given registries.
    pub fn new(
        workspaces: Arc<WorkspaceRegistry>,
        sessions: Arc<SessionRegistry>,
        provisioner: Arc<dyn WorkspaceProvisioner>,
        ttl: Duration,
        period: Duration,
    ) -> Self {
        Self {
            workspaces,
            sessions,
            provisioner,
            ttl,
            period,
            phase: AtomicU8::new(0),
        }
    }

    /// Current phase.
    pub fn phase(&self) -> SweepPhase {
        SweepPhase::from_u8(self.phase.load(Ordering::Acquire))
    }

    fn set_phase(&self, phase: SweepPhase) {
        let v = match phase {
            SweepPhase::Idle => 0,
            SweepPhase::Scanning => 1,
            SweepPhase::Acting => 2,
        };
        self.phase.store(v, Ordering::Release);
    }

    /// Runs one scan-and-act pass.
    pub async fn sweep_once(&self) -> SweepReport {
        self.set_phase(SweepPhase::Scanning);
        let expired = self.workspaces.expired_since(self.ttl);
        if expired.is_empty() {
            self.set_phase(SweepPhase::Idle);
            return SweepReport::default();
        }

        self.set_phase(SweepPhase::Acting);
        log::info!("Found {} expired workspace(s)", expired.len());
        let mut report = SweepReport {
            expired: expired.len(),
            ..SweepReport::default()
        };
        for ws in &expired {
            match self.teardown(ws).await {
                Teardown::Removed => report.removed += 1,
                Teardown::Superseded => report.superseded += 1,
                Teardown::Failed => report.failed += 1,
            }
        }
        log::info!(
            "Sweep finished: {} removed, {} left for retry",
            report.removed,
            report.failed
        );
        self.set_phase(SweepPhase::Idle);
        report
    }

    /// Closes the workspace's session, removes it from disk and deregisters it.
    ///
    /// Never fails the caller. `ws` is usually a snapshot; if the registry
    /// has since dropped it or holds a different workspace under its key,
    /// the live session and worktree belong to that newer workspace and are
    /// left alone. After a failed disk cleanup the workspace stays
    /// registered so a later sweep retries it.
    pub async fn teardown(&self, ws: &Workspace) -> Teardown {
        if !self.workspaces.is_current(ws) {
            log::debug!("Workspace {} was superseded, skipping teardown", ws.key);
            return Teardown::Superseded;
        }
        if let Err(e) = self.sessions.close(ws).await {
            log::error!("Failed to close session for {}: {}", ws.key, e);
        }

        match self.provisioner.cleanup(ws).await {
            Ok(()) => {
                if !self.workspaces.remove(ws) {
                    log::debug!("Workspace {} was already deregistered", ws.key);
                }
                log::info!("Cleaned up workspace {}", ws.key);
                Teardown::Removed
            }
            Err(e) => {
                log::error!("Failed to clean up workspace {}: {:#}", ws.key, e);
                Teardown::Failed
            }
        }
    }

    /// Sweeps every `period` until `token` is cancelled.
    pub async fn run(self: Arc<Self>, token: CancellationToken) {
        log::info!(
            "Expiry sweeper started (ttl {:?}, every {:?})",
            self.ttl,
            self.period
        );
        loop {
            tokio::select! {
                () = token.cancelled() => {
                    log::info!("Expiry sweeper stopping");
                    break;
                }
                () = tokio::time::sleep(self.period) => {
                    self.sweep_once().await;
                }
            }
        }
    }
}
