use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use diesel::pg::PgConnection;
use diesel::prelude::*;
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::db::PgPool;
use crate::models::{Job, NewJob};
use crate::schema::jobs;

pub const STATUS_QUEUED: &str = "queued";
pub const STATUS_PROCESSING: &str = "processing";
pub const STATUS_SUCCEEDED: &str = "succeeded";
// Exhausted retries park the job with its payload intact.
pub const STATUS_DEAD: &str = "dead";

pub const TASK_NOTIFY: &str = "notify";

#[derive(Debug, Error)]
pub enum JobQueueError {
    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),
    #[error("task queue unavailable: {0}")]
    Unavailable(String),
}

pub type JobQueueResult<T> = Result<T, JobQueueError>;

/// Capability the core uses to hand work to the background runtime. The
/// mutation path only ever sees this trait; the Postgres-backed impl lives
/// below and test harnesses substitute their own.
pub trait TaskClient: Send + Sync {
    /// Enqueue a named task. When `key` is given, a task with the same key
    /// that is still queued or running absorbs the enqueue (at-least-once
    /// delivery with idempotent payloads).
    fn enqueue(&self, kind: &str, payload: Value, key: Option<&str>) -> JobQueueResult<()>;
}

pub struct PgTaskClient {
    pool: PgPool,
}

impl PgTaskClient {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl TaskClient for PgTaskClient {
    fn enqueue(&self, kind: &str, payload: Value, key: Option<&str>) -> JobQueueResult<()> {
        let mut conn = self
            .pool
            .get()
            .map_err(|err| JobQueueError::Unavailable(err.to_string()))?;
        enqueue_job(&mut conn, kind, payload, None, key)?;
        Ok(())
    }
}

pub fn enqueue_job(
    conn: &mut PgConnection,
    job_type: &str,
    payload: Value,
    run_after: Option<DateTime<Utc>>,
    idempotency_key: Option<&str>,
) -> JobQueueResult<Option<Job>> {
    let new_job = NewJob {
        id: Uuid::new_v4(),
        job_type: job_type.to_string(),
        payload,
        status: STATUS_QUEUED.to_string(),
        run_after: run_after.unwrap_or_else(Utc::now),
        idempotency_key: idempotency_key.map(|k| k.to_string()),
    };

    let inserted = diesel::insert_into(jobs::table)
        .values(&new_job)
        .on_conflict_do_nothing()
        .execute(conn)?;

    if inserted == 0 {
        // A job with the same idempotency key is already pending.
        return Ok(None);
    }

    let job = jobs::table.find(new_job.id).first(conn)?;
    Ok(Some(job))
}

pub fn reserve_job(conn: &mut PgConnection, job_types: &[&str]) -> JobQueueResult<Option<Job>> {
    let now = Utc::now();

    conn.transaction(|conn| {
        let job_opt = jobs::table
            .filter(jobs::status.eq(STATUS_QUEUED))
            .filter(jobs::run_after.le(now))
            .filter(jobs::job_type.eq_any(job_types))
            .order(jobs::run_after.asc())
            .for_update()
            .skip_locked()
            .first::<Job>(conn)
            .optional()?;

        if let Some(job) = job_opt {
            diesel::update(jobs::table.find(job.id))
                .set((
                    jobs::status.eq(STATUS_PROCESSING),
                    jobs::attempts.eq(job.attempts + 1),
                    jobs::updated_at.eq(now),
                ))
                .execute(conn)?;

            let refreshed = jobs::table.find(job.id).first(conn)?;
            Ok::<Option<Job>, diesel::result::Error>(Some(refreshed))
        } else {
            Ok::<Option<Job>, diesel::result::Error>(None)
        }
    })
    .map_err(JobQueueError::from)
}

pub fn mark_job_succeeded(conn: &mut PgConnection, job_id: Uuid) -> JobQueueResult<()> {
    diesel::update(jobs::table.find(job_id))
        .set((
            jobs::status.eq(STATUS_SUCCEEDED),
            jobs::last_error.eq::<Option<String>>(None),
            jobs::updated_at.eq(Utc::now()),
        ))
        .execute(conn)?;
    Ok(())
}

pub fn retry_job_after(
    conn: &mut PgConnection,
    job_id: Uuid,
    delay: Duration,
    error_message: &str,
) -> JobQueueResult<()> {
    let next_run = Utc::now()
        + ChronoDuration::from_std(delay).unwrap_or_else(|_| ChronoDuration::seconds(30));

    diesel::update(jobs::table.find(job_id))
        .set((
            jobs::status.eq(STATUS_QUEUED),
            jobs::run_after.eq(next_run),
            jobs::last_error.eq(Some(error_message.to_string())),
            jobs::updated_at.eq(Utc::now()),
        ))
        .execute(conn)?;
    Ok(())
}

pub fn mark_job_dead(
    conn: &mut PgConnection,
    job_id: Uuid,
    error_message: &str,
) -> JobQueueResult<()> {
    diesel::update(jobs::table.find(job_id))
        .set((
            jobs::status.eq(STATUS_DEAD),
            jobs::last_error.eq(Some(error_message.to_string())),
            jobs::updated_at.eq(Utc::now()),
        ))
        .execute(conn)?;
    Ok(())
}

/// Exponential backoff for retryable task failures.
pub fn retry_delay(attempt: i32) -> Duration {
    let capped = attempt.clamp(1, 8) as u32;
    Duration::from_secs(2u64.saturating_pow(capped))
}

#[cfg(test)]
mod tests {
    use super::retry_delay;
    use std::time::Duration;

    #[test]
    fn backoff_grows_and_caps() {
        assert_eq!(retry_delay(1), Duration::from_secs(2));
        assert_eq!(retry_delay(3), Duration::from_secs(8));
        assert_eq!(retry_delay(50), Duration::from_secs(256));
    }
}
