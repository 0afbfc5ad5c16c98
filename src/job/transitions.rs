//! Pure job lifecycle transitions — outcome resolution and backoff.
//!
//! No I/O here: the worker feeds an execution outcome plus the job's current
//! counters through `resolve_outcome` and applies the returned resolution via
//! the store's conditional update.

use chrono::{DateTime, Duration, Utc};

/// Retry policy for a single job.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Maximum execution attempts before the job is parked in the DLQ.
    pub max_retries: u32,
    /// Base of the exponential backoff, in seconds.
    pub backoff_base: u32,
}

/// Result of executing a job's command.
///
/// A command that could not be started at all is a `Failure` like any other;
/// it routes through the same retry/DLQ policy.
#[derive(Debug, Clone)]
pub enum ExecOutcome {
    Success { output: Option<String> },
    Failure { detail: String, output: Option<String> },
}

/// Where a `processing` job goes next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Command exited zero.
    Completed,
    /// Command failed with retry budget remaining; eligible again at `run_at`.
    Retry { run_at: DateTime<Utc> },
    /// Retry budget exhausted; park in the DLQ.
    Dead,
}

/// Backoff delay after the given number of attempts: `base ^ attempts` seconds.
pub fn backoff_delay(base: u32, attempts: u32) -> Duration {
    let secs = (base as i64).checked_pow(attempts).unwrap_or(i64::MAX);
    Duration::seconds(secs)
}

/// Resolve an execution outcome to the job's next state.
///
/// `attempts` is the post-claim attempt count (the claim that led to this
/// execution already incremented it), so the retry delay after the first
/// failure is `base ^ 1`.
pub fn resolve_outcome(
    outcome: &ExecOutcome,
    attempts: u32,
    policy: RetryPolicy,
    now: DateTime<Utc>,
) -> Resolution {
    match outcome {
        ExecOutcome::Success { .. } => Resolution::Completed,
        ExecOutcome::Failure { .. } => {
            if attempts >= policy.max_retries {
                Resolution::Dead
            } else {
                Resolution::Retry {
                    run_at: now + backoff_delay(policy.backoff_base, attempts),
                }
            }
        }
    }
}
