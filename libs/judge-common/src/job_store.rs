//! The Job Store: a durable mapping from job identifier to job record,
//! backed by PostgreSQL, that also mediates the queue semantics — workers
//! claim the oldest pending record atomically via `FOR UPDATE SKIP LOCKED`
//! rather than through any in-memory queue, so a crashed worker never
//! loses a job.

use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use sqlx::PgPool;
use std::time::Duration;
use uuid::Uuid;

use crate::error::Error;
use crate::types::{JobCounts, JobOverrides, JobRecord, JobStatus, LanguageId, NewJob, TerminalResult};

/// Mirrors the `jobs` table column-for-column. Kept separate from the
/// public [`JobRecord`] so the wire representation (`#[serde(skip_serializing)]`
/// on raw bytes, base64 encoding of captured output, etc.) never has to
/// agree with the storage representation. `stdout`/`stderr`/`compile_output`
/// are raw bytes, not text — captured program output may not be valid
/// UTF-8 and must round-trip exactly.
#[derive(Debug, sqlx::FromRow)]
struct JobRow {
    job_id: Uuid,
    language_id: LanguageId,
    source_code: Vec<u8>,
    stdin: Vec<u8>,
    overrides: Json<JobOverrides>,
    status: JobStatus,
    worker_id: Option<String>,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    stdout: Option<Vec<u8>>,
    stderr: Option<Vec<u8>>,
    exit_code: Option<i32>,
    execution_time_ms: Option<i64>,
    memory_usage_kib: Option<i64>,
    compile_output: Option<Vec<u8>>,
    error_message: Option<String>,
}

impl From<JobRow> for JobRecord {
    fn from(row: JobRow) -> Self {
        JobRecord {
            job_id: row.job_id,
            language_id: row.language_id,
            source_code: row.source_code,
            stdin: row.stdin,
            overrides: row.overrides.0,
            status: row.status,
            worker_id: row.worker_id,
            created_at: row.created_at,
            started_at: row.started_at,
            completed_at: row.completed_at,
            stdout: row.stdout,
            stderr: row.stderr,
            exit_code: row.exit_code,
            execution_time_ms: row.execution_time_ms.map(|v| v as u64),
            memory_usage_kib: row.memory_usage_kib.map(|v| v as u64),
            compile_output: row.compile_output,
            error_message: row.error_message,
        }
    }
}

const JOB_COLUMNS: &str = "job_id, language_id, source_code, stdin, overrides, status, \
    worker_id, created_at, started_at, completed_at, stdout, stderr, exit_code, \
    execution_time_ms, memory_usage_kib, compile_output, error_message";

/// Durable job storage and queue. Cheap to clone (wraps a pooled
/// connection); share one instance across the Submission API and every
/// worker task.
#[derive(Debug, Clone)]
pub struct JobStore {
    pool: PgPool,
}

impl JobStore {
    /// Connect to `database_url` with a bounded pool. Does not run
    /// migrations — call [`JobStore::migrate`] once at process startup.
    pub async fn connect(database_url: &str) -> Result<Self, Error> {
        let pool = PgPoolOptions::new()
            .max_connections(20)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run the embedded schema migrations. Idempotent.
    pub async fn migrate(&self) -> Result<(), Error> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    /// Insert a new `pending` record and return its assigned identifier.
    pub async fn create(&self, input: NewJob) -> Result<Uuid, Error> {
        let job_id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO jobs (job_id, language_id, source_code, stdin, overrides, status) \
             VALUES ($1, $2, $3, $4, $5, 'pending')",
        )
            .bind(job_id)
            .bind(input.language_id)
            .bind(&input.source_code)
            .bind(&input.stdin)
            .bind(Json(input.overrides))
            .execute(&self.pool)
            .await?;
        Ok(job_id)
    }

    /// Atomically select the oldest `pending` record, transition it to
    /// `running`, and return it, or `None` if no work is available.
    /// `FOR UPDATE SKIP LOCKED` means two concurrent claimers never block
    /// on each other and never receive the same row — each just moves on
    /// to the next-oldest pending row.
    pub async fn claim_one(&self, worker_id: &str) -> Result<Option<JobRecord>, Error> {
        let row: Option<JobRow> = sqlx::query_as(&format!(
            "UPDATE jobs SET status = 'running', worker_id = $1, started_at = now() \
             WHERE job_id = ( \
                 SELECT job_id FROM jobs WHERE status = 'pending' \
                 ORDER BY created_at ASC LIMIT 1 FOR UPDATE SKIP LOCKED \
             ) \
             RETURNING {JOB_COLUMNS}"
        ))
        .bind(worker_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(JobRecord::from))
    }

    /// Transition a record from `running` to `terminal_status`, populate
    /// the result fields, and stamp `completed_at`. Rejects the call if the
    /// record is not currently `running` — at most one worker may hold a
    /// running claim on a given job at any instant, so a `complete()` that
    /// doesn't match a `running` row is a bug in the caller, not a retry
    /// opportunity.
    pub async fn complete(
        &self,
        job_id: Uuid,
        terminal_status: JobStatus,
        result: TerminalResult,
    ) -> Result<(), Error> {
        if !terminal_status.is_terminal() {
            return Err(Error::Config(format!(
                "complete() requires a terminal status, got {terminal_status:?}"
            )));
        }

        let outcome = sqlx::query(
            "UPDATE jobs SET status = $2, worker_id = NULL, completed_at = now(), \
             stdout = $3, stderr = $4, exit_code = $5, execution_time_ms = $6, \
             memory_usage_kib = $7, compile_output = $8, error_message = $9 \
             WHERE job_id = $1 AND status = 'running'",
        )
        .bind(job_id)
        .bind(terminal_status)
        .bind(result.stdout)
        .bind(result.stderr)
        .bind(result.exit_code)
        .bind(result.execution_time_ms.map(|v| v as i64))
        .bind(result.memory_usage_kib.map(|v| v as i64))
        .bind(result.compile_output)
        .bind(result.error_message)
        .execute(&self.pool)
        .await?;

        if outcome.rows_affected() == 0 {
            return Err(Error::NotRunning { job_id });
        }
        Ok(())
    }

    /// Read-only access to a job record for the Submission API.
    pub async fn fetch(&self, job_id: Uuid) -> Result<Option<JobRecord>, Error> {
        let row: Option<JobRow> =
            sqlx::query_as(&format!("SELECT {JOB_COLUMNS} FROM jobs WHERE job_id = $1"))
                .bind(job_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(JobRecord::from))
    }

    /// The stale-claim sweeper: atomically moves `running` records whose
    /// `started_at` predates `now() - threshold` back to `pending`,
    /// clearing `worker_id`. Recovers jobs abandoned by a worker that died
    /// between claim and completion. Returns the number of records
    /// reclaimed.
    pub async fn reap_stale(&self, threshold: Duration) -> Result<u64, Error> {
        let threshold_secs = threshold.as_secs_f64();
        let outcome = sqlx::query(
            "UPDATE jobs SET status = 'pending', worker_id = NULL, started_at = NULL \
             WHERE status = 'running' AND started_at < now() - make_interval(secs => $1)",
        )
        .bind(threshold_secs)
        .execute(&self.pool)
        .await?;
        Ok(outcome.rows_affected())
    }

    /// Backing aggregate for the Submission API's `/health` endpoint.
    pub async fn health_counts(&self) -> Result<JobCounts, Error> {
        let rows: Vec<(JobStatus, i64)> =
            sqlx::query_as("SELECT status, count(*) FROM jobs GROUP BY status")
                .fetch_all(&self.pool)
                .await?;

        let mut counts = JobCounts::default();
        for (status, count) in rows {
            match status {
                JobStatus::Pending => counts.pending = count,
                JobStatus::Running => counts.running = count,
                JobStatus::Completed => counts.completed = count,
                JobStatus::CompileError => counts.compile_error = count,
                JobStatus::RuntimeError => counts.runtime_error = count,
                JobStatus::Timeout => counts.timeout = count,
                JobStatus::InternalError => counts.internal_error = count,
            }
        }
        Ok(counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// `complete()` on a non-`running` record must be rejected, never
    /// silently accepted — terminal states are final. Exercised as a
    /// live-database integration test in `tests/job_store.rs`; this just
    /// pins the error variant shape.
    #[test]
    fn not_running_error_carries_the_job_id() {
        let job_id = Uuid::new_v4();
        let err = Error::NotRunning { job_id };
        assert!(err.to_string().contains(&job_id.to_string()));
    }
}
