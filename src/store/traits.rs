//! `JobStore` trait — the single async interface to the shared job table.
//!
//! The trait deliberately exposes only atomic primitives (`claim_next_due`,
//! `update_state`) plus read-only queries. Callers never get read-then-write
//! access to rows, so all concurrency discipline lives behind this boundary.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StoreError;
use crate::job::{Job, JobState, NewJob};

/// Field changes applied by a conditional state update.
///
/// `last_error` and `output_log` are written unconditionally: `None` clears
/// the column, which is how a successful run wipes the previous failure
/// detail. `run_at` is only touched when set.
#[derive(Debug, Clone)]
pub struct JobUpdate {
    pub state: JobState,
    pub run_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub output_log: Option<String>,
}

impl JobUpdate {
    /// Command exited zero.
    pub fn completed(output: Option<String>) -> Self {
        Self {
            state: JobState::Completed,
            run_at: None,
            last_error: None,
            output_log: output,
        }
    }

    /// Command failed with retry budget remaining.
    pub fn retry(run_at: DateTime<Utc>, detail: String, output: Option<String>) -> Self {
        Self {
            state: JobState::Pending,
            run_at: Some(run_at),
            last_error: Some(detail),
            output_log: output,
        }
    }

    /// Retry budget exhausted.
    pub fn dead(detail: String, output: Option<String>) -> Self {
        Self {
            state: JobState::Dead,
            run_at: None,
            last_error: Some(detail),
            output_log: output,
        }
    }
}

/// Backend-agnostic persistence for job rows.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a new job in `pending`, due immediately.
    ///
    /// `max_retries` is the policy snapshot captured at enqueue time.
    /// Fails with [`StoreError::DuplicateId`] if the id already exists.
    async fn insert(&self, job: &NewJob, max_retries: u32) -> Result<(), StoreError>;

    /// Atomically claim the oldest eligible job (`pending`, `run_at <= now`,
    /// ties broken by id) and move it to `processing` with `attempts`
    /// incremented. Returns `None` when nothing is due. Two concurrent calls
    /// never both win the same row.
    async fn claim_next_due(&self, now: DateTime<Utc>) -> Result<Option<Job>, StoreError>;

    /// Conditionally apply `update` to the row with `id`, but only if its
    /// state still equals `expected`. Returns `false` (and mutates nothing)
    /// when the row has moved on — the optimistic-concurrency miss case.
    async fn update_state(
        &self,
        id: &str,
        expected: JobState,
        update: &JobUpdate,
    ) -> Result<bool, StoreError>;

    /// Fetch a single job by id.
    async fn get(&self, id: &str) -> Result<Option<Job>, StoreError>;

    /// List jobs, optionally filtered by state, newest first.
    async fn list_by_state(&self, state: Option<JobState>) -> Result<Vec<Job>, StoreError>;

    /// Per-state row counts. Read-committed; approximate under concurrent
    /// writers is fine.
    async fn counts_by_state(&self) -> Result<BTreeMap<JobState, u64>, StoreError>;

    /// Move a `dead` job back to `pending` with a fresh retry budget
    /// (`attempts` reset to 0, `run_at = now`). Fails with
    /// [`StoreError::NotFound`] unless a dead row with that id exists.
    async fn dlq_retry(&self, id: &str, now: DateTime<Utc>) -> Result<(), StoreError>;
}
