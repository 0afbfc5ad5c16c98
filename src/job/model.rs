//! Job rows and states.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::JobError;

/// State of a job in the queue.
///
/// `Failed` is transient: a non-zero exit is always resolved to `Pending`
/// (retry) or `Dead` (DLQ) in the same update, so rows are never at rest in
/// `Failed`. It is kept in the enum so status output can render all states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Waiting to be claimed once `run_at` is due.
    Pending,
    /// Claimed by a worker; the command is executing.
    Processing,
    /// Command exited zero.
    Completed,
    /// Transient failure marker, never observable at rest.
    Failed,
    /// Retries exhausted; parked in the dead-letter queue.
    Dead,
}

impl JobState {
    /// All states, in display order.
    pub const ALL: [JobState; 5] = [
        JobState::Pending,
        JobState::Processing,
        JobState::Completed,
        JobState::Failed,
        JobState::Dead,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Dead => "dead",
        }
    }

    /// Check if this state allows transitioning to another state.
    pub fn can_transition_to(&self, target: JobState) -> bool {
        use JobState::*;

        matches!(
            (self, target),
            // Claim
            (Pending, Processing) |
            // Outcome resolution
            (Processing, Completed) | (Processing, Pending) |
            (Processing, Failed) | (Processing, Dead) |
            // Transient failure resolution
            (Failed, Pending) | (Failed, Dead) |
            // Manual DLQ retry
            (Dead, Pending)
        )
    }

    /// Check if this is a terminal state (absent manual intervention).
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Dead)
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for JobState {
    type Err = JobError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "dead" => Ok(Self::Dead),
            other => Err(JobError::UnknownState(other.to_string())),
        }
    }
}

/// A persisted job row.
#[derive(Debug, Clone)]
pub struct Job {
    /// Caller-supplied unique id. Never changes, never reused.
    pub id: String,
    /// Opaque shell command to execute.
    pub command: String,
    pub state: JobState,
    /// Execution attempts so far. Incremented on each claim.
    pub attempts: u32,
    /// Retry budget, snapshotted from config at enqueue time.
    pub max_retries: u32,
    /// Earliest instant the job is eligible for claim.
    pub run_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Last captured failure detail (exit status / spawn error).
    pub last_error: Option<String>,
    /// Last captured stdout.
    pub output_log: Option<String>,
}

/// Enqueue request, as accepted on the wire: `{"id": ..., "command": ...}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewJob {
    pub id: String,
    pub command: String,
}

impl NewJob {
    /// Parse and validate a JSON enqueue payload.
    pub fn from_json(payload: &str) -> Result<Self, JobError> {
        let job: NewJob =
            serde_json::from_str(payload).map_err(|e| JobError::InvalidPayload(e.to_string()))?;
        job.validate()?;
        Ok(job)
    }

    pub fn validate(&self) -> Result<(), JobError> {
        if self.id.trim().is_empty() {
            return Err(JobError::EmptyId);
        }
        if self.command.trim().is_empty() {
            return Err(JobError::EmptyCommand);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn state_transitions_valid() {
        assert!(JobState::Pending.can_transition_to(JobState::Processing));
        assert!(JobState::Processing.can_transition_to(JobState::Completed));
        assert!(JobState::Processing.can_transition_to(JobState::Pending));
        assert!(JobState::Processing.can_transition_to(JobState::Dead));
        assert!(JobState::Dead.can_transition_to(JobState::Pending));
    }

    #[test]
    fn state_transitions_invalid() {
        assert!(!JobState::Completed.can_transition_to(JobState::Pending));
        assert!(!JobState::Completed.can_transition_to(JobState::Processing));
        assert!(!JobState::Pending.can_transition_to(JobState::Completed));
        assert!(!JobState::Dead.can_transition_to(JobState::Processing));
    }

    #[test]
    fn terminal_states() {
        assert!(JobState::Completed.is_terminal());
        assert!(JobState::Dead.is_terminal());
        assert!(!JobState::Pending.is_terminal());
        assert!(!JobState::Processing.is_terminal());
        assert!(!JobState::Failed.is_terminal());
    }

    #[test]
    fn state_display_and_parse() {
        for state in JobState::ALL {
            assert_eq!(JobState::from_str(state.as_str()).unwrap(), state);
        }
        assert!(JobState::from_str("zombie").is_err());
    }

    #[test]
    fn state_serde_roundtrip() {
        let json = serde_json::to_string(&JobState::Processing).unwrap();
        assert_eq!(json, "\"processing\"");
        let parsed: JobState = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, JobState::Processing);
    }

    #[test]
    fn new_job_from_json() {
        let job = NewJob::from_json(r#"{"id": "job1", "command": "sleep 2"}"#).unwrap();
        assert_eq!(job.id, "job1");
        assert_eq!(job.command, "sleep 2");
    }

    #[test]
    fn new_job_rejects_malformed_payload() {
        assert!(NewJob::from_json("not json").is_err());
        assert!(NewJob::from_json(r#"{"id": "job1"}"#).is_err());
    }

    #[test]
    fn new_job_rejects_empty_fields() {
        assert!(matches!(
            NewJob::from_json(r#"{"id": "", "command": "true"}"#),
            Err(JobError::EmptyId)
        ));
        assert!(matches!(
            NewJob::from_json(r#"{"id": "job1", "command": "  "}"#),
            Err(JobError::EmptyCommand)
        ));
    }
}
