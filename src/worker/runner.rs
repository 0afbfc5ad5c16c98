//! Polling worker loop — claim, execute, record.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::error::Error;
use crate::job::{
    ExecOutcome, Job, JobState, Resolution, RetryPolicy, backoff_delay, resolve_outcome,
};
use crate::store::{JobStore, JobUpdate};
use crate::worker::shutdown::Shutdown;

/// Consecutive store failures tolerated before the worker gives up.
const STORE_FAILURE_LIMIT: u32 = 5;

/// Worker tuning, derived from [`Config`].
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Suspension between unsuccessful claim attempts.
    pub poll_interval: Duration,
    /// Backoff base applied to failed jobs, in seconds.
    pub backoff_base: u32,
}

impl From<&Config> for WorkerConfig {
    fn from(config: &Config) -> Self {
        Self {
            poll_interval: config.poll_interval(),
            backoff_base: config.backoff_base,
        }
    }
}

/// A single polling worker over the shared store.
pub struct Worker {
    store: Arc<dyn JobStore>,
    config: WorkerConfig,
    shutdown: Shutdown,
}

impl Worker {
    pub fn new(store: Arc<dyn JobStore>, config: WorkerConfig, shutdown: Shutdown) -> Self {
        Self {
            store,
            config,
            shutdown,
        }
    }

    /// Run until shutdown is requested.
    ///
    /// Transient store failures are retried at the poll interval; after
    /// [`STORE_FAILURE_LIMIT`] consecutive failures the worker exits with the
    /// last error instead of retry-storming.
    pub async fn run(&self) -> Result<(), Error> {
        info!(
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            "Worker started, waiting for jobs"
        );

        let mut store_failures: u32 = 0;
        loop {
            if self.shutdown.is_requested() {
                break;
            }

            let claimed = match self.store.claim_next_due(Utc::now()).await {
                Ok(claimed) => {
                    store_failures = 0;
                    claimed
                }
                Err(e) => {
                    store_failures += 1;
                    if store_failures >= STORE_FAILURE_LIMIT {
                        error!(error = %e, failures = store_failures, "Store unavailable, giving up");
                        return Err(e.into());
                    }
                    warn!(error = %e, failures = store_failures, "Store error during claim, will retry");
                    tokio::time::sleep(self.config.poll_interval).await;
                    continue;
                }
            };

            match claimed {
                Some(job) => self.process(job).await,
                None => tokio::time::sleep(self.config.poll_interval).await,
            }
        }

        info!("Worker shutting down gracefully");
        Ok(())
    }

    /// Execute one claimed job and record the outcome.
    ///
    /// Execution is never interrupted: a shutdown request that arrives while
    /// the command runs is honored only at the next loop iteration, after the
    /// resulting transition has been recorded.
    async fn process(&self, job: Job) {
        info!(id = %job.id, command = %job.command, attempt = job.attempts, "Job started");

        let outcome = execute_command(&job.command).await;

        if self.shutdown.is_requested() {
            info!(id = %job.id, "Shutdown requested mid-job, recording result first");
        }

        let policy = RetryPolicy {
            max_retries: job.max_retries,
            backoff_base: self.config.backoff_base,
        };
        let now = Utc::now();
        let resolution = resolve_outcome(&outcome, job.attempts, policy, now);

        let (detail, output) = match &outcome {
            ExecOutcome::Success { output } => (None, output.clone()),
            ExecOutcome::Failure { detail, output } => (Some(detail.clone()), output.clone()),
        };

        let update = match &resolution {
            Resolution::Completed => {
                info!(id = %job.id, "Job completed");
                JobUpdate::completed(output)
            }
            Resolution::Retry { run_at } => {
                info!(
                    id = %job.id,
                    attempt = job.attempts,
                    retry_in_secs = backoff_delay(policy.backoff_base, job.attempts).num_seconds(),
                    "Job failed, will retry"
                );
                JobUpdate::retry(*run_at, detail.unwrap_or_default(), output)
            }
            Resolution::Dead => {
                warn!(id = %job.id, attempts = job.attempts, "Job hit max retries, moving to DLQ");
                JobUpdate::dead(detail.unwrap_or_default(), output)
            }
        };

        match self
            .store
            .update_state(&job.id, JobState::Processing, &update)
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                // Should be impossible under the claim protocol; leave the
                // row for manual inspection rather than guessing.
                error!(id = %job.id, "Job left processing state under our claim, not touching it");
            }
            Err(e) => {
                error!(id = %job.id, error = %e, "Failed to record job outcome");
            }
        }
    }
}

/// Run a job's command under the platform shell, capturing exit status and
/// output. A spawn failure is folded into `Failure` like a non-zero exit.
pub async fn execute_command(command: &str) -> ExecOutcome {
    #[cfg(unix)]
    let mut cmd = {
        let mut cmd = tokio::process::Command::new("sh");
        cmd.arg("-c").arg(command);
        cmd
    };
    #[cfg(windows)]
    let mut cmd = {
        let mut cmd = tokio::process::Command::new("cmd");
        cmd.arg("/C").arg(command);
        cmd
    };

    match cmd.output().await {
        Ok(out) => {
            let stdout = String::from_utf8_lossy(&out.stdout).to_string();
            let stderr = String::from_utf8_lossy(&out.stderr).to_string();
            let output = (!stdout.is_empty()).then_some(stdout);
            if out.status.success() {
                ExecOutcome::Success { output }
            } else {
                let code = out
                    .status
                    .code()
                    .map(|c| c.to_string())
                    .unwrap_or_else(|| "killed by signal".to_string());
                let detail = if stderr.trim().is_empty() {
                    format!("exit status {code}")
                } else {
                    format!("exit status {code}: {}", stderr.trim())
                };
                ExecOutcome::Failure { detail, output }
            }
        }
        Err(e) => ExecOutcome::Failure {
            detail: format!("failed to start command: {e}"),
            output: None,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn execute_captures_success_output() {
        match execute_command("echo hello").await {
            ExecOutcome::Success { output } => {
                assert_eq!(output.as_deref().map(str::trim), Some("hello"));
            }
            other => panic!("expected success, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn execute_reports_exit_code() {
        match execute_command("exit 3").await {
            ExecOutcome::Failure { detail, .. } => {
                assert!(detail.contains("exit status 3"), "detail: {detail}");
            }
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn execute_captures_stderr_detail() {
        match execute_command("echo boom >&2; exit 1").await {
            ExecOutcome::Failure { detail, .. } => {
                assert!(detail.contains("boom"), "detail: {detail}");
            }
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_command_is_a_plain_failure() {
        // The shell itself starts fine and reports command-not-found as a
        // non-zero exit; either way this must be Failure, never a panic.
        match execute_command("definitely-not-a-real-binary-anywhere").await {
            ExecOutcome::Failure { .. } => {}
            other => panic!("expected failure, got {other:?}"),
        }
    }
}
