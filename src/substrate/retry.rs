//! Activity execution with retries
//!
//! Runs one activity (a single account executor call) under an
//! [`ActivityOptions`] schedule:
//!
//! ```text
//! attempt 1 ──fail──▶ sleep 1u ──▶ attempt 2 ──fail──▶ sleep 2u ──▶ attempt 3 ──fail──▶ ExhaustedRetries
//!     │                                │                                │
//!     └─ bounded by start_to_close ────┴── all of it bounded by schedule_to_close
//! ```
//!
//! Each attempt may additionally be bound by a heartbeat timeout.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::heartbeat::ActivityContext;

/// Exponential backoff schedule
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Delay after the first failed attempt
    pub initial_interval: Duration,
    /// Multiplier applied per further failure
    pub backoff_coefficient: f64,
    /// Upper bound on any single delay
    pub maximum_interval: Duration,
    /// Attempts in total, including the first
    pub maximum_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_secs(1),
            backoff_coefficient: 2.0,
            maximum_interval: Duration::from_secs(20),
            maximum_attempts: 3,
        }
    }
}

impl RetryPolicy {
    /// Delay to wait after the given failed attempt (1-based)
    pub fn backoff_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        let delay_ms =
            self.initial_interval.as_millis() as f64 * self.backoff_coefficient.powi(exponent);
        let capped_ms = delay_ms.min(self.maximum_interval.as_millis() as f64);
        Duration::from_millis(capped_ms as u64)
    }
}

/// Limits applied to one activity invocation
#[derive(Debug, Clone, PartialEq)]
pub struct ActivityOptions {
    pub retry: RetryPolicy,
    /// Deadline for a single attempt
    pub start_to_close: Duration,
    /// Deadline for the whole step, backoff sleeps included
    pub schedule_to_close: Duration,
    /// Maximum silence between heartbeats, if the activity must report liveness
    pub heartbeat_timeout: Option<Duration>,
}

impl Default for ActivityOptions {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            start_to_close: Duration::from_secs(2),
            schedule_to_close: Duration::from_secs(5000),
            heartbeat_timeout: None,
        }
    }
}

impl ActivityOptions {
    pub fn with_heartbeat_timeout(mut self, timeout: Duration) -> Self {
        self.heartbeat_timeout = Some(timeout);
        self
    }
}

/// Why a single attempt failed
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AttemptError {
    #[error("{message}")]
    Failed { message: String, retryable: bool },

    #[error("attempt exceeded start-to-close timeout of {0:?}")]
    StartToCloseTimeout(Duration),

    #[error("no heartbeat within {0:?}")]
    HeartbeatTimeout(Duration),
}

impl AttemptError {
    pub fn is_retryable(&self) -> bool {
        match self {
            AttemptError::Failed { retryable, .. } => *retryable,
            AttemptError::StartToCloseTimeout(_) | AttemptError::HeartbeatTimeout(_) => true,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            AttemptError::Failed { retryable: true, .. } => "ATTEMPT_FAILED",
            AttemptError::Failed {
                retryable: false, ..
            } => "ATTEMPT_REJECTED",
            AttemptError::StartToCloseTimeout(_) => "START_TO_CLOSE_TIMEOUT",
            AttemptError::HeartbeatTimeout(_) => "HEARTBEAT_TIMEOUT",
        }
    }
}

/// Terminal failure of one step after the retry schedule gave up
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StepFailure {
    #[error("retries exhausted after {attempts} attempts: {last_error}")]
    ExhaustedRetries {
        attempts: u32,
        last_error: AttemptError,
    },

    #[error("non-retryable failure on attempt {attempt}: {error}")]
    NonRetryable { attempt: u32, error: AttemptError },

    #[error("schedule-to-close timeout of {timeout:?} elapsed after {attempts} attempts")]
    ScheduleToCloseTimeout {
        timeout: Duration,
        attempts: u32,
        last_error: Option<AttemptError>,
    },
}

impl StepFailure {
    pub fn code(&self) -> &'static str {
        match self {
            StepFailure::ExhaustedRetries { .. } => "EXHAUSTED_RETRIES",
            StepFailure::NonRetryable { .. } => "NON_RETRYABLE",
            StepFailure::ScheduleToCloseTimeout { .. } => "SCHEDULE_TO_CLOSE_TIMEOUT",
        }
    }

    /// Attempts actually made before giving up
    pub fn attempts(&self) -> u32 {
        match self {
            StepFailure::ExhaustedRetries { attempts, .. }
            | StepFailure::ScheduleToCloseTimeout { attempts, .. } => *attempts,
            StepFailure::NonRetryable { attempt, .. } => *attempt,
        }
    }
}

/// Run `activity` until it succeeds or the schedule in `options` gives up.
///
/// `activity` is invoked once per attempt with a fresh [`ActivityContext`].
pub async fn run_activity<F, Fut, E>(
    name: &'static str,
    options: &ActivityOptions,
    mut activity: F,
) -> Result<(), StepFailure>
where
    F: FnMut(ActivityContext) -> Fut,
    Fut: Future<Output = Result<(), E>>,
    E: Into<AttemptError>,
{
    let policy = &options.retry;
    let max_attempts = policy.maximum_attempts.max(1);
    let deadline = Instant::now() + options.schedule_to_close;
    let mut last_error = None;

    for attempt in 1..=max_attempts {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(StepFailure::ScheduleToCloseTimeout {
                timeout: options.schedule_to_close,
                attempts: attempt - 1,
                last_error,
            });
        }

        debug!(activity = name, attempt, "Starting activity attempt");
        let attempt_limit = options.start_to_close.min(remaining);
        let error = match run_attempt(name, attempt, attempt_limit, options, &mut activity).await {
            Ok(()) => {
                debug!(activity = name, attempt, "Activity attempt succeeded");
                return Ok(());
            }
            Err(error) => error,
        };

        if !error.is_retryable() {
            warn!(activity = name, attempt, error = %error, "Activity failed (non-retryable)");
            return Err(StepFailure::NonRetryable { attempt, error });
        }

        if attempt == max_attempts {
            warn!(activity = name, attempt, error = %error, "Activity failed, no attempts left");
            return Err(StepFailure::ExhaustedRetries {
                attempts: attempt,
                last_error: error,
            });
        }

        let backoff = policy.backoff_after(attempt);
        if Instant::now() + backoff >= deadline {
            warn!(activity = name, attempt, error = %error, "Activity failed, no time left to retry");
            return Err(StepFailure::ScheduleToCloseTimeout {
                timeout: options.schedule_to_close,
                attempts: attempt,
                last_error: Some(error),
            });
        }

        warn!(
            activity = name,
            attempt,
            error = %error,
            backoff_ms = backoff.as_millis() as u64,
            "Activity attempt failed (will retry)"
        );
        last_error = Some(error);
        tokio::time::sleep(backoff).await;
    }

    // max_attempts >= 1, so the loop always returns
    Err(StepFailure::ExhaustedRetries {
        attempts: max_attempts,
        last_error: last_error.unwrap_or(AttemptError::StartToCloseTimeout(options.start_to_close)),
    })
}

async fn run_attempt<F, Fut, E>(
    name: &'static str,
    attempt: u32,
    limit: Duration,
    options: &ActivityOptions,
    activity: &mut F,
) -> Result<(), AttemptError>
where
    F: FnMut(ActivityContext) -> Fut,
    Fut: Future<Output = Result<(), E>>,
    E: Into<AttemptError>,
{
    let guarded = async {
        match options.heartbeat_timeout {
            Some(heartbeat_timeout) => {
                let (ctx, monitor) = ActivityContext::monitored(name, attempt, heartbeat_timeout);
                let silence = monitor.timeout();
                let work = activity(ctx);
                tokio::select! {
                    result = work => result.map_err(Into::<AttemptError>::into),
                    () = monitor.expired() => Err(AttemptError::HeartbeatTimeout(silence)),
                }
            }
            None => activity(ActivityContext::unmonitored(name, attempt))
                .await
                .map_err(Into::<AttemptError>::into),
        }
    };

    match tokio::time::timeout(limit, guarded).await {
        Ok(result) => result,
        Err(_) => Err(AttemptError::StartToCloseTimeout(limit)),
    }
}
