//! QueueStore trait definition

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::job::{Job, JobId, JobState, LeaseId, NewJob};

/// Error type for store operations
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    /// Backing store cannot be reached or rejected the operation
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// Job not found
    #[error("job not found: {0}")]
    NotFound(JobId),

    /// The caller's lease was reclaimed or superseded; the job was not changed
    #[error("lease lost: {0}")]
    LeaseLost(JobId),

    /// Stored data could not be encoded or decoded
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Job counts per state.
///
/// Completed and failed jobs are removed from the queue rather than retained,
/// so those counters are always zero. They are reported to keep the shape
/// expected by dashboards.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct JobCounts {
    pub waiting: u64,
    pub active: u64,
    pub delayed: u64,
    pub completed: u64,
    pub failed: u64,
    #[serde(rename = "waiting-children")]
    pub waiting_children: u64,
}

impl JobCounts {
    /// Increment the counter for `state`
    pub fn add(&mut self, state: JobState, count: u64) {
        match state {
            JobState::Waiting => self.waiting += count,
            JobState::Active => self.active += count,
            JobState::Delayed => self.delayed += count,
        }
    }

    /// Jobs still held by the queue
    pub fn total(&self) -> u64 {
        self.waiting + self.active + self.delayed
    }

    /// `(state, count)` pairs in display order
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, u64)> {
        [
            ("waiting", self.waiting),
            ("active", self.active),
            ("delayed", self.delayed),
            ("completed", self.completed),
            ("failed", self.failed),
            ("waiting-children", self.waiting_children),
        ]
        .into_iter()
    }
}

/// Where a store keeps its data, for operator diagnostics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ConnectionInfo {
    /// `memory` or `postgres`
    pub backend: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
}

/// Persistent storage for one named queue.
///
/// The dead-letter queue is just another instance of this trait.
///
/// All time comparisons (ready time, lease age) use the store's own clock.
#[async_trait]
pub trait QueueStore: Send + Sync + 'static {
    /// Name of the queue this store holds
    fn name(&self) -> &str;

    /// Connection details, without credentials
    fn connection_info(&self) -> ConnectionInfo;

    // =========================================================================
    // Producer operations
    // =========================================================================

    /// Add a job and return its id.
    ///
    /// If `job.id` names a job already in the queue, nothing is created and
    /// that id is returned.
    async fn enqueue(&self, job: NewJob) -> Result<JobId, StoreError>;

    // =========================================================================
    // Worker operations
    // =========================================================================

    /// Atomically lease the oldest ready job.
    ///
    /// The job becomes active with a fresh `lease_id` and its attempt count
    /// is incremented. No other caller can lease it until it is acked,
    /// rescheduled or reclaimed.
    async fn lease_next(&self) -> Result<Option<Job>, StoreError>;

    /// Mark a job completed and remove it.
    ///
    /// Unknown ids are a no-op. A job held under a different lease is left
    /// alone and `LeaseLost` is returned.
    async fn ack(&self, job_id: &str, lease_id: LeaseId) -> Result<(), StoreError>;

    /// Return a job leased as `lease_id` to the queue, ready after `delay`.
    ///
    /// Fails with `NotFound` for unknown ids and `LeaseLost` if the lease is
    /// no longer live.
    async fn schedule_retry(
        &self,
        job_id: &str,
        lease_id: LeaseId,
        delay: Duration,
        last_error: &str,
    ) -> Result<(), StoreError>;

    /// Delete a job still held under `lease_id`, as the last step of moving
    /// it to the dead-letter queue. Fails with `LeaseLost` otherwise.
    async fn remove_leased(&self, job_id: &str, lease_id: LeaseId) -> Result<(), StoreError>;

    /// Return active jobs leased longer than `lease_timeout` to the waiting
    /// state, without touching their attempt count. Returns the reclaimed ids.
    async fn reclaim_expired_leases(&self, lease_timeout: Duration)
        -> Result<Vec<JobId>, StoreError>;

    // =========================================================================
    // Query and admin operations
    // =========================================================================

    /// Delete a job. Returns `false` if it did not exist.
    async fn remove(&self, job_id: &str) -> Result<bool, StoreError>;

    /// Fetch a job by id
    async fn get(&self, job_id: &str) -> Result<Option<Job>, StoreError>;

    /// List jobs whose effective state is one of `states`, in enqueue order,
    /// positions `start..=end`.
    async fn list_jobs(
        &self,
        states: &[JobState],
        start: usize,
        end: usize,
    ) -> Result<Vec<Job>, StoreError>;

    /// Count jobs by effective state
    async fn counts(&self) -> Result<JobCounts, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_counts_shape() {
        let mut counts = JobCounts::default();
        counts.add(JobState::Waiting, 2);
        counts.add(JobState::Delayed, 1);

        let value = serde_json::to_value(counts).unwrap();
        assert_eq!(value["waiting"], 2);
        assert_eq!(value["delayed"], 1);
        assert_eq!(value["waiting-children"], 0);
        assert_eq!(counts.total(), 3);
        assert_eq!(counts.iter().count(), 6);
    }

    #[test]
    fn test_store_error_display() {
        let err = StoreError::Unavailable("connection refused".to_string());
        assert_eq!(err.to_string(), "store unavailable: connection refused");

        let err = StoreError::LeaseLost("42".to_string());
        assert_eq!(err.to_string(), "lease lost: 42");
    }
}
