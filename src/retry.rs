//! Per-task retry loop with deterministic exponential backoff.
//!
//! One call to [`RetryPolicy::run`] drives a single [`TransferTask`] to a
//! terminal outcome: every attempt is checkpointed as `Downloading` in the
//! [`StatusStore`], transferred, then size-verified. Attempt failures never
//! escape as errors; they become either another attempt or a `Failed` record.
//! Only status-store failures are returned as `Err`, because resumability
//! cannot be guaranteed without them.
//!
//! # Delay Calculation
//!
//! ```text
//! delay(after attempt n) = min(delay_unit * delay_base^n, max_delay)
//! ```
//!
//! With the defaults (base 2, unit 1 s) the waits are 2 s, 4 s, 8 s, 16 s.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::Utc;
use tracing::{info, instrument, warn};

use crate::catalog::{DEFAULT_RETRY_DELAY_BASE, TransferTask};
use crate::status::{StatusError, StatusStore, TransferRecord};
use crate::transfer::{TransferBackend, TransferError};
use crate::verify::{BYTES_PER_MB, IntegrityVerifier};

/// Default unit multiplied by `delay_base^attempt`.
pub const DEFAULT_DELAY_UNIT: Duration = Duration::from_secs(1);

/// Upper bound for a single backoff wait.
///
/// Total backoff before attempt `k + 1` is at least the sum of
/// `min(base^i, MAX_DELAY)` for `i` in `1..=k`. With base 2 the cap first
/// applies to the wait after attempt 12.
pub const MAX_DELAY: Duration = Duration::from_secs(3600);

/// Granularity at which a backoff wait notices an interrupt.
const INTERRUPT_POLL: Duration = Duration::from_millis(100);

/// Terminal result of one task.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome {
    /// Transferred and verified.
    Completed {
        /// Attempts used.
        attempts: u32,
        /// Verified size.
        bytes: u64,
        /// Human-readable summary.
        message: String,
    },
    /// All attempts failed.
    Failed {
        /// Attempts made.
        attempts: u32,
        /// Message of the last failure.
        last_error: String,
    },
    /// Stopped by an interrupt before reaching a terminal state.
    Interrupted {
        /// Attempts started before the interrupt.
        attempts: u32,
    },
}

impl TaskOutcome {
    /// Attempts made, whatever the outcome.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Completed { attempts, .. }
            | Self::Failed { attempts, .. }
            | Self::Interrupted { attempts } => *attempts,
        }
    }
}

/// Backoff configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    delay_base: f64,
    delay_unit: Duration,
    max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            delay_base: DEFAULT_RETRY_DELAY_BASE,
            delay_unit: DEFAULT_DELAY_UNIT,
            max_delay: MAX_DELAY,
        }
    }
}

impl RetryPolicy {
    /// Creates a policy waiting `delay_base^attempt` seconds between attempts.
    #[must_use]
    pub fn new(delay_base: f64) -> Self {
        Self {
            delay_base,
            ..Self::default()
        }
    }

    /// Replaces the time unit of the backoff (seconds by default).
    #[must_use]
    pub fn with_delay_unit(mut self, delay_unit: Duration) -> Self {
        self.delay_unit = delay_unit;
        self
    }

    /// Wait before the attempt following failed attempt `attempt` (1-based).
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let factor = self.delay_base.powi(exponent);
        Duration::try_from_secs_f64(self.delay_unit.as_secs_f64() * factor)
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }

    /// Drives `task` to a terminal outcome.
    ///
    /// The task's `max_retries` bounds the number of attempts. When
    /// `interrupted` is set, no further attempt starts and the last persisted
    /// record is left in place.
    ///
    /// # Errors
    ///
    /// Returns [`StatusError`] when a status update cannot be persisted.
    #[instrument(skip_all, fields(file = %task.local_filename, backend = %backend.kind()))]
    pub async fn run(
        &self,
        task: &TransferTask,
        backend: &dyn TransferBackend,
        verifier: &IntegrityVerifier,
        store: &StatusStore,
        download_dir: &Path,
        interrupted: &AtomicBool,
    ) -> Result<TaskOutcome, StatusError> {
        let max_attempts = task.max_retries.max(1);
        let mut attempt = 0;

        loop {
            if interrupted.load(Ordering::SeqCst) {
                return Ok(TaskOutcome::Interrupted { attempts: attempt });
            }
            attempt += 1;

            store
                .put(
                    &task.local_filename,
                    TransferRecord::Downloading {
                        attempt,
                        started_at: Utc::now(),
                        backend: backend.kind(),
                    },
                )
                .await?;
            info!(attempt, max_attempts, "transfer attempt started");

            let error = match attempt_once(task, backend, verifier, download_dir).await {
                Ok(bytes) => {
                    store
                        .put(
                            &task.local_filename,
                            TransferRecord::Completed {
                                completed_at: Utc::now(),
                                attempts: attempt,
                                backend: backend.kind(),
                                size_bytes: Some(bytes),
                            },
                        )
                        .await?;
                    #[allow(clippy::cast_precision_loss)]
                    let message = format!(
                        "{} downloaded ({:.1} MB) via {} in {attempt} attempt(s)",
                        task.local_filename,
                        bytes as f64 / BYTES_PER_MB,
                        backend.kind()
                    );
                    info!(attempt, bytes, "transfer completed");
                    return Ok(TaskOutcome::Completed {
                        attempts: attempt,
                        bytes,
                        message,
                    });
                }
                Err(error) => error,
            };

            let last_error = error.to_string();
            warn!(attempt, kind = %error.kind(), error = %last_error, "transfer attempt failed");

            if attempt >= max_attempts {
                store
                    .put(
                        &task.local_filename,
                        TransferRecord::Failed {
                            failed_at: Utc::now(),
                            attempts: attempt,
                            last_error: last_error.clone(),
                            backend: backend.kind(),
                        },
                    )
                    .await?;
                return Ok(TaskOutcome::Failed {
                    attempts: attempt,
                    last_error,
                });
            }

            let delay = self.delay_for(attempt);
            info!(
                attempt,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "waiting before retry"
            );
            if !sleep_unless_interrupted(delay, interrupted).await {
                return Ok(TaskOutcome::Interrupted { attempts: attempt });
            }
        }
    }
}

async fn attempt_once(
    task: &TransferTask,
    backend: &dyn TransferBackend,
    verifier: &IntegrityVerifier,
    download_dir: &Path,
) -> Result<u64, TransferError> {
    let path = backend.transfer(task, download_dir).await?;
    verifier.check(&path, task.size_estimate_mb).await
}

/// Sleeps for `delay`; returns false if `interrupted` was set meanwhile.
async fn sleep_unless_interrupted(delay: Duration, interrupted: &AtomicBool) -> bool {
    let deadline = tokio::time::Instant::now() + delay;
    loop {
        if interrupted.load(Ordering::SeqCst) {
            return false;
        }
        let now = tokio::time::Instant::now();
        if now >= deadline {
            return true;
        }
        tokio::time::sleep((deadline - now).min(INTERRUPT_POLL)).await;
    }
}
