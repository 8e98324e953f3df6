//! Bounded retries around [`ProcessSession::send`].
//!
//! Backoff is linear: after the n-th failed attempt the executor waits
//! `n * base_delay` before trying again. Every error kind is retried the
//! same way; the kind only changes what gets logged. The executor never
//! replaces the session it was given.

use std::fmt;
use std::time::Duration;

use crate::constants::RETRY_BASE_DELAY;
use crate::session::{ProcessSession, SessionError, SessionErrorKind, SessionResponse};

/// All attempts failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryError {
    /// Attempts made.
    pub attempts: u32,
    /// Error from the final attempt.
    pub last: SessionError,
}

impl fmt::Display for RetryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "failed after {} attempts, last error: {}",
            self.attempts, self.last
        )
    }
}

impl std::error::Error for RetryError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.last)
    }
}

/// Retries AI requests with linear backoff.
#[derive(Debug, Clone, Copy)]
pub struct RetryExecutor {
    base_delay: Duration,
}

impl Default for RetryExecutor {
    fn default() -> Self {
        Self::new(RETRY_BASE_DELAY)
    }
}

impl RetryExecutor {
    /// Creates an executor with the given backoff unit.
    pub fn new(base_delay: Duration) -> Self {
        Self { base_delay }
    }

    /// Backoff unit.
    pub fn base_delay(&self) -> Duration {
        self.base_delay
    }

    /// Sends `prompt` up to `max_attempts` times (at least once).
    pub async fn execute(
        &self,
        session: &dyn ProcessSession,
        prompt: &str,
        max_attempts: u32,
    ) -> Result<SessionResponse, RetryError> {
        let max_attempts = max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match session.send(prompt).await {
                Ok(response) => {
                    if attempt > 1 {
                        log::info!(
                            "Session {} succeeded on attempt {}/{}",
                            session.id(),
                            attempt,
                            max_attempts
                        );
                    }
                    return Ok(response);
                }
                Err(err) => {
                    match err.kind {
                        SessionErrorKind::Transient => log::warn!(
                            "Session {} attempt {}/{} hit a dead process: {}",
                            session.id(),
                            attempt,
                            max_attempts,
                            err.message
                        ),
                        SessionErrorKind::Fatal | SessionErrorKind::NotFound => log::error!(
                            "Session {} attempt {}/{} failed: {}",
                            session.id(),
                            attempt,
                            max_attempts,
                            err
                        ),
                    }

                    if attempt >= max_attempts {
                        return Err(RetryError {
                            attempts: attempt,
                            last: err,
                        });
                    }
                    let delay = self.base_delay * attempt;
                    log::debug!("Retrying in {:?}", delay);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}
