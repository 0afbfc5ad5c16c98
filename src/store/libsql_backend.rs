//! libSQL backend — async `JobStore` implementation over a local SQLite file.
//!
//! SQLite's row-level write serialization is the only synchronization point
//! between workers: the claim is a conditional `UPDATE ... WHERE state =
//! 'pending'` whose affected-row count decides the race.

use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info};

use crate::error::StoreError;
use crate::job::{Job, JobState, NewJob};
use crate::store::traits::{JobStore, JobUpdate};

const JOB_COLUMNS: &str =
    "id, command, state, attempts, max_retries, run_at, created_at, updated_at, last_error, output_log";

/// libSQL job store.
///
/// Holds a single connection reused for all operations; `libsql::Connection`
/// is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlStore {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlStore {
    /// Open (or create) a local database file and initialize the schema.
    pub async fn new_local(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::Open(format!("Failed to create database directory: {e}")))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| StoreError::Open(format!("Failed to open database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| StoreError::Open(format!("Failed to create connection: {e}")))?;

        let store = Self {
            db: Arc::new(db),
            conn,
        };
        store.init_schema().await?;
        info!(path = %path.display(), "Job store opened");
        Ok(store)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, StoreError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| StoreError::Open(format!("Failed to create in-memory database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| StoreError::Open(format!("Failed to create connection: {e}")))?;

        let store = Self {
            db: Arc::new(db),
            conn,
        };
        store.init_schema().await?;
        Ok(store)
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }

    async fn init_schema(&self) -> Result<(), StoreError> {
        self.conn()
            .execute_batch(
                "CREATE TABLE IF NOT EXISTS jobs (
                    id TEXT PRIMARY KEY,
                    command TEXT NOT NULL,
                    state TEXT NOT NULL DEFAULT 'pending',
                    attempts INTEGER NOT NULL DEFAULT 0,
                    max_retries INTEGER NOT NULL,
                    run_at TEXT NOT NULL,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL,
                    last_error TEXT,
                    output_log TEXT
                );
                CREATE INDEX IF NOT EXISTS idx_jobs_state ON jobs(state);
                CREATE INDEX IF NOT EXISTS idx_jobs_state_run_at ON jobs(state, run_at);",
            )
            .await
            .map_err(|e| StoreError::Open(format!("Schema initialization failed: {e}")))?;
        Ok(())
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Canonical timestamp format for the `jobs` table.
///
/// Fixed-width RFC 3339 with microseconds and a `+00:00` offset, so that
/// lexicographic TEXT comparison in SQL matches chronological order.
fn fmt_datetime(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, false)
}

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

fn opt_text_owned(s: Option<String>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s),
        None => libsql::Value::Null,
    }
}

/// Map a libsql Row to a Job. Column order matches JOB_COLUMNS.
fn row_to_job(row: &libsql::Row) -> Result<Job, libsql::Error> {
    let state_str: String = row.get(2)?;
    let run_at_str: String = row.get(5)?;
    let created_str: String = row.get(6)?;
    let updated_str: String = row.get(7)?;

    Ok(Job {
        id: row.get(0)?,
        command: row.get(1)?,
        state: JobState::from_str(&state_str).unwrap_or(JobState::Pending),
        attempts: row.get::<i64>(3)?.max(0) as u32,
        max_retries: row.get::<i64>(4)?.max(0) as u32,
        run_at: parse_datetime(&run_at_str),
        created_at: parse_datetime(&created_str),
        updated_at: parse_datetime(&updated_str),
        last_error: row.get::<String>(8).ok(),
        output_log: row.get::<String>(9).ok(),
    })
}

#[async_trait]
impl JobStore for LibSqlStore {
    async fn insert(&self, job: &NewJob, max_retries: u32) -> Result<(), StoreError> {
        let now = fmt_datetime(Utc::now());
        let result = self
            .conn()
            .execute(
                "INSERT INTO jobs (id, command, state, attempts, max_retries, run_at, created_at, updated_at)
                 VALUES (?1, ?2, 'pending', 0, ?3, ?4, ?4, ?4)",
                params![job.id.as_str(), job.command.as_str(), max_retries as i64, now],
            )
            .await;

        match result {
            Ok(_) => {
                debug!(id = %job.id, "Job enqueued");
                Ok(())
            }
            Err(e) if e.to_string().contains("UNIQUE constraint") => {
                Err(StoreError::DuplicateId { id: job.id.clone() })
            }
            Err(e) => Err(StoreError::Query(format!("insert: {e}"))),
        }
    }

    async fn claim_next_due(&self, now: DateTime<Utc>) -> Result<Option<Job>, StoreError> {
        let conn = self.conn();
        let now_str = fmt_datetime(now);

        // Select a candidate, then race for it with a conditional update.
        // Losing the race is not an error; re-select until no candidate is due.
        loop {
            let mut rows = conn
                .query(
                    "SELECT id FROM jobs
                     WHERE state = 'pending' AND run_at <= ?1
                     ORDER BY run_at, id
                     LIMIT 1",
                    params![now_str.as_str()],
                )
                .await
                .map_err(|e| StoreError::Query(format!("claim_next_due select: {e}")))?;

            let candidate: String = match rows.next().await {
                Ok(Some(row)) => row
                    .get(0)
                    .map_err(|e| StoreError::Query(format!("claim_next_due row parse: {e}")))?,
                Ok(None) => return Ok(None),
                Err(e) => return Err(StoreError::Query(format!("claim_next_due select: {e}"))),
            };

            let affected = conn
                .execute(
                    "UPDATE jobs
                     SET state = 'processing', attempts = attempts + 1, updated_at = ?2
                     WHERE id = ?1 AND state = 'pending' AND run_at <= ?3",
                    params![candidate.as_str(), fmt_datetime(Utc::now()), now_str.as_str()],
                )
                .await
                .map_err(|e| StoreError::Query(format!("claim_next_due update: {e}")))?;

            if affected == 0 {
                // Another worker won this candidate between select and update.
                debug!(id = %candidate, "Lost claim race, re-selecting");
                continue;
            }

            let job = self.get(&candidate).await?.ok_or_else(|| {
                StoreError::Query(format!("claimed job '{candidate}' vanished"))
            })?;
            debug!(id = %job.id, attempts = job.attempts, "Job claimed");
            return Ok(Some(job));
        }
    }

    async fn update_state(
        &self,
        id: &str,
        expected: JobState,
        update: &JobUpdate,
    ) -> Result<bool, StoreError> {
        let affected = self
            .conn()
            .execute(
                "UPDATE jobs
                 SET state = ?1,
                     run_at = COALESCE(?2, run_at),
                     last_error = ?3,
                     output_log = ?4,
                     updated_at = ?5
                 WHERE id = ?6 AND state = ?7",
                params![
                    update.state.as_str(),
                    opt_text_owned(update.run_at.map(fmt_datetime)),
                    opt_text_owned(update.last_error.clone()),
                    opt_text_owned(update.output_log.clone()),
                    fmt_datetime(Utc::now()),
                    id,
                    expected.as_str(),
                ],
            )
            .await
            .map_err(|e| StoreError::Query(format!("update_state: {e}")))?;

        Ok(affected > 0)
    }

    async fn get(&self, id: &str) -> Result<Option<Job>, StoreError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?1"),
                params![id],
            )
            .await
            .map_err(|e| StoreError::Query(format!("get: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let job = row_to_job(&row)
                    .map_err(|e| StoreError::Query(format!("get row parse: {e}")))?;
                Ok(Some(job))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(StoreError::Query(format!("get: {e}"))),
        }
    }

    async fn list_by_state(&self, state: Option<JobState>) -> Result<Vec<Job>, StoreError> {
        let conn = self.conn();
        let mut rows = match state {
            Some(state) => conn
                .query(
                    &format!(
                        "SELECT {JOB_COLUMNS} FROM jobs WHERE state = ?1 ORDER BY created_at DESC"
                    ),
                    params![state.as_str()],
                )
                .await,
            None => conn
                .query(
                    &format!("SELECT {JOB_COLUMNS} FROM jobs ORDER BY created_at DESC"),
                    (),
                )
                .await,
        }
        .map_err(|e| StoreError::Query(format!("list_by_state: {e}")))?;

        let mut jobs = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            jobs.push(
                row_to_job(&row)
                    .map_err(|e| StoreError::Query(format!("list_by_state row parse: {e}")))?,
            );
        }
        Ok(jobs)
    }

    async fn counts_by_state(&self) -> Result<BTreeMap<JobState, u64>, StoreError> {
        let mut rows = self
            .conn()
            .query("SELECT state, COUNT(*) FROM jobs GROUP BY state", ())
            .await
            .map_err(|e| StoreError::Query(format!("counts_by_state: {e}")))?;

        let mut counts = BTreeMap::new();
        while let Ok(Some(row)) = rows.next().await {
            let state_str: String = row
                .get(0)
                .map_err(|e| StoreError::Query(format!("counts_by_state row parse: {e}")))?;
            let count: i64 = row
                .get(1)
                .map_err(|e| StoreError::Query(format!("counts_by_state row parse: {e}")))?;
            if let Ok(state) = JobState::from_str(&state_str) {
                counts.insert(state, count.max(0) as u64);
            }
        }
        Ok(counts)
    }

    async fn dlq_retry(&self, id: &str, now: DateTime<Utc>) -> Result<(), StoreError> {
        let affected = self
            .conn()
            .execute(
                "UPDATE jobs
                 SET state = 'pending', attempts = 0, run_at = ?2, updated_at = ?2
                 WHERE id = ?1 AND state = 'dead'",
                params![id, fmt_datetime(now)],
            )
            .await
            .map_err(|e| StoreError::Query(format!("dlq_retry: {e}")))?;

        if affected == 0 {
            return Err(StoreError::NotFound { id: id.to_string() });
        }
        debug!(id = %id, "Dead job moved back to pending");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_job(id: &str, command: &str) -> NewJob {
        NewJob {
            id: id.to_string(),
            command: command.to_string(),
        }
    }

    #[tokio::test]
    async fn insert_and_get() {
        let store = LibSqlStore::new_memory().await.unwrap();
        store.insert(&new_job("a", "echo hi"), 3).await.unwrap();

        let job = store.get("a").await.unwrap().unwrap();
        assert_eq!(job.command, "echo hi");
        assert_eq!(job.state, JobState::Pending);
        assert_eq!(job.attempts, 0);
        assert_eq!(job.max_retries, 3);
        assert!(job.last_error.is_none());
    }

    #[tokio::test]
    async fn insert_duplicate_id_rejected() {
        let store = LibSqlStore::new_memory().await.unwrap();
        store.insert(&new_job("a", "true"), 3).await.unwrap();
        let err = store.insert(&new_job("a", "false"), 3).await.unwrap_err();
        assert!(matches!(err, StoreError::DuplicateId { id } if id == "a"));
    }

    #[tokio::test]
    async fn claim_increments_attempts_and_sets_processing() {
        let store = LibSqlStore::new_memory().await.unwrap();
        store.insert(&new_job("a", "true"), 3).await.unwrap();

        let job = store.claim_next_due(Utc::now()).await.unwrap().unwrap();
        assert_eq!(job.id, "a");
        assert_eq!(job.state, JobState::Processing);
        assert_eq!(job.attempts, 1);

        // Nothing else is due
        assert!(store.claim_next_due(Utc::now()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn claim_skips_future_run_at() {
        let store = LibSqlStore::new_memory().await.unwrap();
        store.insert(&new_job("a", "true"), 3).await.unwrap();
        let future = Utc::now() + chrono::Duration::hours(1);
        let update = JobUpdate {
            state: JobState::Pending,
            run_at: Some(future),
            last_error: None,
            output_log: None,
        };
        // Push the job into the future via claim + retry update
        store.claim_next_due(Utc::now()).await.unwrap().unwrap();
        assert!(
            store
                .update_state("a", JobState::Processing, &update)
                .await
                .unwrap()
        );

        assert!(store.claim_next_due(Utc::now()).await.unwrap().is_none());
        assert!(
            store
                .claim_next_due(future + chrono::Duration::seconds(1))
                .await
                .unwrap()
                .is_some()
        );
    }

    async fn insert_pending_at(store: &LibSqlStore, id: &str, run_at: DateTime<Utc>) {
        let now = fmt_datetime(Utc::now());
        store
            .conn()
            .execute(
                "INSERT INTO jobs (id, command, state, attempts, max_retries, run_at, created_at, updated_at)
                 VALUES (?1, 'true', 'pending', 0, 3, ?2, ?3, ?3)",
                params![id, fmt_datetime(run_at), now],
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn claim_prefers_oldest_run_at() {
        let store = LibSqlStore::new_memory().await.unwrap();
        let now = Utc::now();
        insert_pending_at(&store, "younger", now - chrono::Duration::seconds(5)).await;
        insert_pending_at(&store, "older", now - chrono::Duration::seconds(60)).await;

        let first = store.claim_next_due(now).await.unwrap().unwrap();
        let second = store.claim_next_due(now).await.unwrap().unwrap();
        assert_eq!(first.id, "older");
        assert_eq!(second.id, "younger");
    }

    #[tokio::test]
    async fn claim_breaks_run_at_ties_by_id() {
        let store = LibSqlStore::new_memory().await.unwrap();
        let now = Utc::now();
        let due = now - chrono::Duration::seconds(5);
        insert_pending_at(&store, "b", due).await;
        insert_pending_at(&store, "a", due).await;

        let first = store.claim_next_due(now).await.unwrap().unwrap();
        let second = store.claim_next_due(now).await.unwrap().unwrap();
        assert_eq!(first.id, "a");
        assert_eq!(second.id, "b");
    }

    #[tokio::test]
    async fn update_state_mismatch_returns_false_without_mutation() {
        let store = LibSqlStore::new_memory().await.unwrap();
        store.insert(&new_job("a", "true"), 3).await.unwrap();

        // Row is pending; an update expecting processing must not apply.
        let applied = store
            .update_state("a", JobState::Processing, &JobUpdate::completed(None))
            .await
            .unwrap();
        assert!(!applied);

        let job = store.get("a").await.unwrap().unwrap();
        assert_eq!(job.state, JobState::Pending);
    }

    #[tokio::test]
    async fn update_state_unknown_id_returns_false() {
        let store = LibSqlStore::new_memory().await.unwrap();
        let applied = store
            .update_state("ghost", JobState::Processing, &JobUpdate::completed(None))
            .await
            .unwrap();
        assert!(!applied);
    }

    #[tokio::test]
    async fn completed_update_clears_last_error() {
        let store = LibSqlStore::new_memory().await.unwrap();
        store.insert(&new_job("a", "true"), 3).await.unwrap();
        store.claim_next_due(Utc::now()).await.unwrap().unwrap();
        let retry_at = Utc::now() + chrono::Duration::seconds(2);
        store
            .update_state(
                "a",
                JobState::Processing,
                &JobUpdate::retry(retry_at, "exit status 1".into(), None),
            )
            .await
            .unwrap();
        assert_eq!(
            store.get("a").await.unwrap().unwrap().last_error.as_deref(),
            Some("exit status 1")
        );

        store
            .claim_next_due(retry_at + chrono::Duration::seconds(1))
            .await
            .unwrap()
            .unwrap();
        store
            .update_state(
                "a",
                JobState::Processing,
                &JobUpdate::completed(Some("ok\n".into())),
            )
            .await
            .unwrap();

        let job = store.get("a").await.unwrap().unwrap();
        assert_eq!(job.state, JobState::Completed);
        assert!(job.last_error.is_none());
        assert_eq!(job.output_log.as_deref(), Some("ok\n"));
    }

    #[tokio::test]
    async fn counts_and_listing() {
        let store = LibSqlStore::new_memory().await.unwrap();
        store.insert(&new_job("a", "true"), 3).await.unwrap();
        store.insert(&new_job("b", "true"), 3).await.unwrap();
        store.claim_next_due(Utc::now()).await.unwrap().unwrap();

        let counts = store.counts_by_state().await.unwrap();
        assert_eq!(counts.get(&JobState::Pending), Some(&1));
        assert_eq!(counts.get(&JobState::Processing), Some(&1));
        assert_eq!(counts.get(&JobState::Dead), None);

        assert_eq!(store.list_by_state(None).await.unwrap().len(), 2);
        assert_eq!(
            store
                .list_by_state(Some(JobState::Processing))
                .await
                .unwrap()
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn dlq_retry_requires_dead_row() {
        let store = LibSqlStore::new_memory().await.unwrap();
        store.insert(&new_job("a", "false"), 1).await.unwrap();

        // Pending job is not retryable via the DLQ path
        let err = store.dlq_retry("a", Utc::now()).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
        let err = store.dlq_retry("ghost", Utc::now()).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));

        store.claim_next_due(Utc::now()).await.unwrap().unwrap();
        store
            .update_state(
                "a",
                JobState::Processing,
                &JobUpdate::dead("exit status 1".into(), None),
            )
            .await
            .unwrap();

        store.dlq_retry("a", Utc::now()).await.unwrap();
        let job = store.get("a").await.unwrap().unwrap();
        assert_eq!(job.state, JobState::Pending);
        assert_eq!(job.attempts, 0);
    }

    #[tokio::test]
    async fn open_creates_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let db_path = tmp.path().join("nested").join("jobq.db");
        let store = LibSqlStore::new_local(&db_path).await.unwrap();
        assert!(db_path.exists());
        drop(store);
    }

    #[test]
    fn datetime_format_orders_lexicographically() {
        let earlier = Utc::now();
        let later = earlier + chrono::Duration::milliseconds(15);
        assert!(fmt_datetime(earlier) < fmt_datetime(later));
        // Round-trips at the stored (microsecond) precision
        assert_eq!(
            parse_datetime(&fmt_datetime(earlier)).timestamp_micros(),
            earlier.timestamp_micros()
        );
    }
}
