//! Retry-with-backoff for transient download failures.
//!
//! The loop is an explicit state machine:
//!
//! ```text
//! Attempting(n) --retryable failure, n < max--> Backoff(n, delay)
//! Attempting(n) --other failure or n == max--> Exhausted
//! Backoff(n, _) --delay elapsed--> Attempting(n + 1)
//! any --cancel--> Canceled
//! ```
//!
//! Sleeping goes through a [`Clock`] so tests can observe backoff waits
//! without spending wall-clock time on them.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::error::{ProvisionError, Result};

// ============================================================================
// Retry Policy
// ============================================================================

/// Exponential backoff policy for transient network failures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Attempt ceiling, first attempt included.
    pub max_attempts: u32,
    /// Wait after the first failed attempt.
    pub initial_delay_ms: u64,
    /// Growth factor applied per further failure.
    pub multiplier: f64,
    /// Upper bound for a single wait.
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 2_000,
            multiplier: 2.0,
            max_delay_ms: 30_000,
        }
    }
}

impl RetryPolicy {
    /// Returns the wait that follows the given failed attempt (1-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        let delay_ms = self.initial_delay_ms as f64 * self.multiplier.powi(exponent);
        let capped = delay_ms.min(self.max_delay_ms as f64).max(0.0);
        Duration::from_millis(capped as u64)
    }

    /// Clamps the policy to usable values.
    pub fn validate(&mut self) {
        self.max_attempts = self.max_attempts.clamp(1, 10);
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            self.multiplier = 1.0;
        }
        self.max_delay_ms = self.max_delay_ms.max(self.initial_delay_ms);
    }
}

// ============================================================================
// State Machine
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryState {
    Attempting { attempt: u32 },
    Backoff { attempt: u32, delay: Duration },
    Exhausted,
    Canceled,
}

/// Tracks where a retry loop stands. Pure bookkeeping, no I/O.
#[derive(Debug, Clone)]
pub struct RetryMachine {
    policy: RetryPolicy,
    state: RetryState,
}

impl RetryMachine {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            state: RetryState::Attempting { attempt: 1 },
        }
    }

    pub fn state(&self) -> RetryState {
        self.state
    }

    /// Records a failed attempt and returns the next state.
    pub fn on_failure(&mut self, retryable: bool) -> RetryState {
        self.state = match self.state {
            RetryState::Attempting { attempt } if retryable && attempt < self.policy.max_attempts => {
                RetryState::Backoff {
                    attempt,
                    delay: self.policy.delay_for_attempt(attempt),
                }
            }
            RetryState::Attempting { .. } => RetryState::Exhausted,
            other => other,
        };
        self.state
    }

    /// Moves from a finished backoff to the next attempt.
    pub fn resume(&mut self) -> RetryState {
        if let RetryState::Backoff { attempt, .. } = self.state {
            self.state = RetryState::Attempting {
                attempt: attempt + 1,
            };
        }
        self.state
    }

    pub fn cancel(&mut self) {
        self.state = RetryState::Canceled;
    }
}

// ============================================================================
// Clock
// ============================================================================

/// Source of backoff sleeps.
#[async_trait]
pub trait Clock: Send + Sync + fmt::Debug {
    async fn sleep(&self, duration: Duration);
}

/// Clock backed by the tokio timer.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioClock;

#[async_trait]
impl Clock for TokioClock {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Clock that returns immediately and remembers every requested wait.
#[cfg(test)]
#[derive(Debug, Default)]
pub(crate) struct RecordingClock {
    waits: parking_lot::Mutex<Vec<Duration>>,
}

#[cfg(test)]
impl RecordingClock {
    pub(crate) fn waits(&self) -> Vec<Duration> {
        self.waits.lock().clone()
    }
}

#[cfg(test)]
#[async_trait]
impl Clock for RecordingClock {
    async fn sleep(&self, duration: Duration) {
        self.waits.lock().push(duration);
    }
}

// ============================================================================
// Driver
// ============================================================================

/// Runs `op` until it succeeds, fails permanently, or `cancel` fires.
///
/// `op` receives the 1-based attempt number. `on_retry` is called before
/// each backoff wait with the attempt that just failed and the wait.
///
/// # Errors
///
/// Returns the last attempt's error once the machine is exhausted, or
/// [`ProvisionError::Cancelled`] as soon as the token fires.
pub async fn retry_with<T, F, Fut, R>(
    policy: &RetryPolicy,
    clock: &dyn Clock,
    cancel: &CancellationToken,
    mut on_retry: R,
    mut op: F,
) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
    R: FnMut(u32, Duration, &ProvisionError),
{
    let mut machine = RetryMachine::new(policy.clone());

    while let RetryState::Attempting { attempt } = machine.state() {
        if cancel.is_cancelled() {
            machine.cancel();
            break;
        }

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                machine.cancel();
                break;
            }
            result = op(attempt) => result,
        };

        let err = match result {
            Ok(value) => return Ok(value),
            Err(err) if err.is_cancelled() => {
                machine.cancel();
                break;
            }
            Err(err) => err,
        };

        match machine.on_failure(err.is_retryable()) {
            RetryState::Backoff { attempt, delay } => {
                warn!(attempt, ?delay, error = %err, "Attempt failed, backing off");
                on_retry(attempt, delay, &err);
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        machine.cancel();
                        break;
                    }
                    _ = clock.sleep(delay) => {}
                }
                machine.resume();
            }
            _ => return Err(err),
        }
    }

    Err(ProvisionError::Cancelled)
}
