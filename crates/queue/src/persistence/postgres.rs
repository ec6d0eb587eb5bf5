//! PostgreSQL implementation of QueueStore
//!
//! Production persistence using PostgreSQL with:
//! - Race-free leasing with `FOR UPDATE SKIP LOCKED`
//! - Delays computed against the database clock
//! - One table shared by all named queues

use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::{debug, error, instrument};
use uuid::Uuid;

use super::store::*;
use crate::job::{Job, JobId, JobKind, JobState, LeaseId, NewJob};

/// Embedded schema migrations for the `queue_jobs` table
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

/// Apply pending schema migrations
pub async fn run_migrations(pool: &PgPool) -> Result<(), StoreError> {
    MIGRATOR.run(pool).await.map_err(|e| {
        error!("Failed to run queue migrations: {}", e);
        StoreError::Unavailable(e.to_string())
    })
}

const JOB_COLUMNS: &str = "id, queue_name, job_type, payload, state, attempts_made, \
                           max_attempts, backoff, created_at, ready_at, leased_at, lease_id, \
                           last_error";

const LEASED_JOB_COLUMNS: &str = "j.id, j.queue_name, j.job_type, j.payload, j.state, \
                                  j.attempts_made, j.max_attempts, j.backoff, j.created_at, \
                                  j.ready_at, j.leased_at, j.lease_id, j.last_error";

/// PostgreSQL implementation of QueueStore
///
/// Each instance is bound to one queue name; instances for different queues
/// can share a pool.
///
/// # Example
///
/// ```ignore
/// use courier_queue::PostgresQueueStore;
/// use sqlx::PgPool;
///
/// let pool = PgPool::connect("postgres://localhost/courier").await?;
/// courier_queue::persistence::run_migrations(&pool).await?;
/// let store = PostgresQueueStore::new(pool, "notification-queue");
/// ```
#[derive(Clone)]
pub struct PostgresQueueStore {
    pool: PgPool,
    name: String,
}

impl PostgresQueueStore {
    /// Create a store for `queue_name` on the given connection pool
    pub fn new(pool: PgPool, queue_name: impl Into<String>) -> Self {
        Self {
            pool,
            name: queue_name.into(),
        }
    }

    /// Get the underlying connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Whether a job with `job_id` exists in this queue
    async fn exists(&self, job_id: &str) -> Result<bool, StoreError> {
        sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS (SELECT 1 FROM queue_jobs WHERE queue_name = $1 AND id = $2)",
        )
        .bind(&self.name)
        .bind(job_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| unavailable("check job", e))
    }
}

fn unavailable(operation: &str, e: sqlx::Error) -> StoreError {
    error!("Failed to {}: {}", operation, e);
    StoreError::Unavailable(e.to_string())
}

fn millis(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

fn row_to_job(row: &PgRow) -> Result<Job, StoreError> {
    let state: String = row.get("state");
    let state = JobState::parse(&state)
        .ok_or_else(|| StoreError::Serialization(format!("unknown job state: {}", state)))?;

    let backoff_json: serde_json::Value = row.get("backoff");
    let backoff = serde_json::from_value(backoff_json)
        .map_err(|e| StoreError::Serialization(e.to_string()))?;

    let job_type: String = row.get("job_type");
    let attempts_made: i32 = row.get("attempts_made");
    let max_attempts: i32 = row.get("max_attempts");

    Ok(Job {
        id: row.get("id"),
        queue_name: row.get("queue_name"),
        kind: JobKind::from(job_type),
        payload: row.get("payload"),
        state,
        attempts_made: u32::try_from(attempts_made).unwrap_or(0),
        max_attempts: u32::try_from(max_attempts).unwrap_or(1),
        backoff,
        created_at: row.get("created_at"),
        ready_at: row.get("ready_at"),
        leased_at: row.get("leased_at"),
        lease_id: row.get("lease_id"),
        last_error: row.get("last_error"),
    })
}

#[async_trait]
impl QueueStore for PostgresQueueStore {
    fn name(&self) -> &str {
        &self.name
    }

    fn connection_info(&self) -> ConnectionInfo {
        let options = self.pool.connect_options();
        ConnectionInfo {
            backend: "postgres".to_string(),
            host: Some(options.get_host().to_string()),
            port: Some(options.get_port()),
            database: options.get_database().map(str::to_string),
        }
    }

    // =========================================================================
    // Producer operations
    // =========================================================================

    #[instrument(skip(self, job), fields(queue = %self.name, job_type = %job.kind))]
    async fn enqueue(&self, job: NewJob) -> Result<JobId, StoreError> {
        let id = job.id.clone().unwrap_or_else(|| Uuid::now_v7().to_string());
        let state = if job.options.delay.is_zero() {
            JobState::Waiting
        } else {
            JobState::Delayed
        };
        let backoff = serde_json::to_value(&job.options.backoff)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;

        let result = sqlx::query(
            r#"
            INSERT INTO queue_jobs
                (queue_name, id, job_type, payload, state, max_attempts, backoff, ready_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, NOW() + $8::BIGINT * INTERVAL '1 millisecond')
            ON CONFLICT (queue_name, id) DO NOTHING
            "#,
        )
        .bind(&self.name)
        .bind(&id)
        .bind(job.kind.as_str())
        .bind(&job.payload)
        .bind(state.as_str())
        .bind(i32::try_from(job.options.max_attempts.max(1)).unwrap_or(i32::MAX))
        .bind(backoff)
        .bind(millis(job.options.delay))
        .execute(&self.pool)
        .await
        .map_err(|e| unavailable("enqueue job", e))?;

        if result.rows_affected() == 0 {
            debug!(%id, "Job already queued");
        } else {
            debug!(%id, "Enqueued job");
        }

        Ok(id)
    }

    // =========================================================================
    // Worker operations
    // =========================================================================

    #[instrument(skip(self), fields(queue = %self.name))]
    async fn lease_next(&self) -> Result<Option<Job>, StoreError> {
        let query = format!(
            r#"
            WITH leasable AS (
                SELECT seq
                FROM queue_jobs
                WHERE queue_name = $1
                  AND state IN ('waiting', 'delayed')
                  AND ready_at <= NOW()
                ORDER BY seq
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            UPDATE queue_jobs j
            SET state = 'active',
                leased_at = NOW(),
                lease_id = $2,
                attempts_made = attempts_made + 1
            FROM leasable l
            WHERE j.seq = l.seq
            RETURNING {}
            "#,
            LEASED_JOB_COLUMNS
        );

        let row = sqlx::query(&query)
            .bind(&self.name)
            .bind(Uuid::now_v7())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| unavailable("lease job", e))?;

        row.as_ref().map(row_to_job).transpose()
    }

    #[instrument(skip(self), fields(queue = %self.name))]
    async fn ack(&self, job_id: &str, lease_id: LeaseId) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            DELETE FROM queue_jobs
            WHERE queue_name = $1 AND id = $2 AND state = 'active' AND lease_id = $3
            "#,
        )
        .bind(&self.name)
        .bind(job_id)
        .bind(lease_id)
        .execute(&self.pool)
        .await
        .map_err(|e| unavailable("ack job", e))?;

        if result.rows_affected() == 0 && self.exists(job_id).await? {
            return Err(StoreError::LeaseLost(job_id.to_string()));
        }

        Ok(())
    }

    #[instrument(skip(self, last_error), fields(queue = %self.name))]
    async fn schedule_retry(
        &self,
        job_id: &str,
        lease_id: LeaseId,
        delay: Duration,
        last_error: &str,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE queue_jobs
            SET state = CASE WHEN $4::BIGINT = 0 THEN 'waiting' ELSE 'delayed' END,
                ready_at = NOW() + $4::BIGINT * INTERVAL '1 millisecond',
                leased_at = NULL,
                lease_id = NULL,
                last_error = $5
            WHERE queue_name = $1 AND id = $2 AND state = 'active' AND lease_id = $3
            "#,
        )
        .bind(&self.name)
        .bind(job_id)
        .bind(lease_id)
        .bind(millis(delay))
        .bind(last_error)
        .execute(&self.pool)
        .await
        .map_err(|e| unavailable("schedule retry", e))?;

        if result.rows_affected() == 0 {
            return Err(if self.exists(job_id).await? {
                StoreError::LeaseLost(job_id.to_string())
            } else {
                StoreError::NotFound(job_id.to_string())
            });
        }

        Ok(())
    }

    #[instrument(skip(self), fields(queue = %self.name))]
    async fn remove_leased(&self, job_id: &str, lease_id: LeaseId) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            DELETE FROM queue_jobs
            WHERE queue_name = $1 AND id = $2 AND state = 'active' AND lease_id = $3
            "#,
        )
        .bind(&self.name)
        .bind(job_id)
        .bind(lease_id)
        .execute(&self.pool)
        .await
        .map_err(|e| unavailable("remove leased job", e))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::LeaseLost(job_id.to_string()));
        }

        Ok(())
    }

    #[instrument(skip(self), fields(queue = %self.name))]
    async fn reclaim_expired_leases(
        &self,
        lease_timeout: Duration,
    ) -> Result<Vec<JobId>, StoreError> {
        let rows = sqlx::query(
            r#"
            UPDATE queue_jobs
            SET state = 'waiting',
                ready_at = NOW(),
                leased_at = NULL,
                lease_id = NULL
            WHERE queue_name = $1
              AND state = 'active'
              AND leased_at < NOW() - $2::BIGINT * INTERVAL '1 millisecond'
            RETURNING id
            "#,
        )
        .bind(&self.name)
        .bind(millis(lease_timeout))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| unavailable("reclaim expired leases", e))?;

        Ok(rows.iter().map(|row| row.get("id")).collect())
    }

    // =========================================================================
    // Query and admin operations
    // =========================================================================

    #[instrument(skip(self), fields(queue = %self.name))]
    async fn remove(&self, job_id: &str) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM queue_jobs WHERE queue_name = $1 AND id = $2")
            .bind(&self.name)
            .bind(job_id)
            .execute(&self.pool)
            .await
            .map_err(|e| unavailable("remove job", e))?;

        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self), fields(queue = %self.name))]
    async fn get(&self, job_id: &str) -> Result<Option<Job>, StoreError> {
        let query = format!(
            "SELECT {} FROM queue_jobs WHERE queue_name = $1 AND id = $2",
            JOB_COLUMNS
        );

        let row = sqlx::query(&query)
            .bind(&self.name)
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| unavailable("get job", e))?;

        row.as_ref().map(row_to_job).transpose()
    }

    #[instrument(skip(self), fields(queue = %self.name))]
    async fn list_jobs(
        &self,
        states: &[JobState],
        start: usize,
        end: usize,
    ) -> Result<Vec<Job>, StoreError> {
        if end < start || states.is_empty() {
            return Ok(vec![]);
        }

        let states: Vec<String> = states.iter().map(|s| s.as_str().to_string()).collect();
        let query = format!(
            r#"
            SELECT {}
            FROM queue_jobs
            WHERE queue_name = $1
              AND (CASE WHEN state = 'delayed' AND ready_at <= NOW() THEN 'waiting'
                        ELSE state END) = ANY($2)
            ORDER BY seq
            OFFSET $3
            LIMIT $4
            "#,
            JOB_COLUMNS
        );

        let rows = sqlx::query(&query)
            .bind(&self.name)
            .bind(&states)
            .bind(i64::try_from(start).unwrap_or(i64::MAX))
            .bind(i64::try_from(end - start + 1).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| unavailable("list jobs", e))?;

        rows.iter().map(row_to_job).collect()
    }

    #[instrument(skip(self), fields(queue = %self.name))]
    async fn counts(&self) -> Result<JobCounts, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT CASE WHEN state = 'delayed' AND ready_at <= NOW() THEN 'waiting'
                        ELSE state END AS effective_state,
                   COUNT(*) AS count
            FROM queue_jobs
            WHERE queue_name = $1
            GROUP BY effective_state
            "#,
        )
        .bind(&self.name)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| unavailable("count jobs", e))?;

        let mut counts = JobCounts::default();
        for row in rows {
            let state: String = row.get("effective_state");
            let count: i64 = row.get("count");
            if let Some(state) = JobState::parse(&state) {
                counts.add(state, u64::try_from(count).unwrap_or(0));
            }
        }

        Ok(counts)
    }
}
