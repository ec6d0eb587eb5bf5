//! In-memory implementation of QueueStore for testing

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use uuid::Uuid;

use super::store::*;
use crate::job::{Job, JobId, JobState, LeaseId, NewJob};

/// Jobs keyed by insertion sequence, with an id index
#[derive(Default)]
struct QueueState {
    jobs: BTreeMap<u64, Job>,
    index: HashMap<JobId, u64>,
    next_seq: u64,
}

impl QueueState {
    fn get(&self, job_id: &str) -> Option<&Job> {
        let seq = self.index.get(job_id)?;
        self.jobs.get(seq)
    }

    fn get_mut(&mut self, job_id: &str) -> Option<&mut Job> {
        let seq = self.index.get(job_id)?;
        self.jobs.get_mut(seq)
    }

    fn remove(&mut self, job_id: &str) -> Option<Job> {
        let seq = self.index.remove(job_id)?;
        self.jobs.remove(&seq)
    }
}

/// In-memory implementation of QueueStore
///
/// Provides the same semantics as the PostgreSQL implementation within a
/// single process. Leasing happens under a write lock, so two workers can
/// never lease the same job.
///
/// # Example
///
/// ```
/// use courier_queue::InMemoryQueueStore;
///
/// let store = InMemoryQueueStore::new("notification-queue");
/// assert!(store.is_empty());
/// ```
pub struct InMemoryQueueStore {
    name: String,
    state: RwLock<QueueState>,
}

impl InMemoryQueueStore {
    /// Create an empty queue
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: RwLock::new(QueueState::default()),
        }
    }

    /// Number of jobs currently held
    pub fn len(&self) -> usize {
        self.state.read().jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Make a delayed job ready now. Returns `false` if the job is not delayed.
    #[cfg(test)]
    pub(crate) fn promote(&self, job_id: &str) -> bool {
        let mut state = self.state.write();
        match state.get_mut(job_id) {
            Some(job) if job.state == JobState::Delayed => {
                job.ready_at = Utc::now();
                true
            }
            _ => false,
        }
    }
}

#[async_trait]
impl QueueStore for InMemoryQueueStore {
    fn name(&self) -> &str {
        &self.name
    }

    fn connection_info(&self) -> ConnectionInfo {
        ConnectionInfo {
            backend: "memory".to_string(),
            ..Default::default()
        }
    }

    async fn enqueue(&self, job: NewJob) -> Result<JobId, StoreError> {
        let mut state = self.state.write();

        if let Some(id) = &job.id {
            if state.index.contains_key(id) {
                return Ok(id.clone());
            }
        }

        let now = Utc::now();
        let id = job
            .id
            .clone()
            .unwrap_or_else(|| Uuid::now_v7().to_string());
        let (job_state, ready_at) = job.initial_schedule(now);

        let seq = state.next_seq;
        state.next_seq += 1;
        state.index.insert(id.clone(), seq);
        state.jobs.insert(
            seq,
            Job {
                id: id.clone(),
                queue_name: self.name.clone(),
                kind: job.kind,
                payload: job.payload,
                state: job_state,
                attempts_made: 0,
                max_attempts: job.options.max_attempts.max(1),
                backoff: job.options.backoff,
                created_at: now,
                ready_at,
                leased_at: None,
                lease_id: None,
                last_error: None,
            },
        );

        Ok(id)
    }

    async fn lease_next(&self) -> Result<Option<Job>, StoreError> {
        let mut state = self.state.write();
        let now = Utc::now();

        let Some(job) = state.jobs.values_mut().find(|job| job.is_ready(now)) else {
            return Ok(None);
        };

        job.state = JobState::Active;
        job.attempts_made += 1;
        job.leased_at = Some(now);
        job.lease_id = Some(Uuid::now_v7());

        Ok(Some(job.clone()))
    }

    async fn ack(&self, job_id: &str, lease_id: LeaseId) -> Result<(), StoreError> {
        let mut state = self.state.write();
        let held = match state.get(job_id) {
            None => return Ok(()),
            Some(job) => job.holds_lease(lease_id),
        };
        if !held {
            return Err(StoreError::LeaseLost(job_id.to_string()));
        }

        state.remove(job_id);
        Ok(())
    }

    async fn schedule_retry(
        &self,
        job_id: &str,
        lease_id: LeaseId,
        delay: Duration,
        last_error: &str,
    ) -> Result<(), StoreError> {
        let mut state = self.state.write();
        let job = state
            .get_mut(job_id)
            .ok_or_else(|| StoreError::NotFound(job_id.to_string()))?;
        if !job.holds_lease(lease_id) {
            return Err(StoreError::LeaseLost(job_id.to_string()));
        }

        let now = Utc::now();
        let ready_at = chrono::Duration::from_std(delay)
            .ok()
            .and_then(|delay| now.checked_add_signed(delay))
            .unwrap_or(chrono::DateTime::<Utc>::MAX_UTC);

        job.state = if delay.is_zero() {
            JobState::Waiting
        } else {
            JobState::Delayed
        };
        job.ready_at = ready_at;
        job.leased_at = None;
        job.lease_id = None;
        job.last_error = Some(last_error.to_string());

        Ok(())
    }

    async fn remove_leased(&self, job_id: &str, lease_id: LeaseId) -> Result<(), StoreError> {
        let mut state = self.state.write();
        if !state.get(job_id).is_some_and(|job| job.holds_lease(lease_id)) {
            return Err(StoreError::LeaseLost(job_id.to_string()));
        }

        state.remove(job_id);
        Ok(())
    }

    async fn reclaim_expired_leases(
        &self,
        lease_timeout: Duration,
    ) -> Result<Vec<JobId>, StoreError> {
        let mut state = self.state.write();
        let now = Utc::now();
        let timeout = chrono::Duration::from_std(lease_timeout)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;

        let mut reclaimed = Vec::new();
        for job in state.jobs.values_mut() {
            let expired = job.state == JobState::Active
                && job
                    .leased_at
                    .and_then(|leased| leased.checked_add_signed(timeout))
                    .is_some_and(|deadline| deadline < now);
            if expired {
                job.state = JobState::Waiting;
                job.ready_at = now;
                job.leased_at = None;
                job.lease_id = None;
                reclaimed.push(job.id.clone());
            }
        }

        Ok(reclaimed)
    }

    async fn remove(&self, job_id: &str) -> Result<bool, StoreError> {
        Ok(self.state.write().remove(job_id).is_some())
    }

    async fn get(&self, job_id: &str) -> Result<Option<Job>, StoreError> {
        let state = self.state.read();
        Ok(state
            .index
            .get(job_id)
            .and_then(|seq| state.jobs.get(seq))
            .cloned())
    }

    async fn list_jobs(
        &self,
        states: &[JobState],
        start: usize,
        end: usize,
    ) -> Result<Vec<Job>, StoreError> {
        if end < start {
            return Ok(vec![]);
        }

        let state = self.state.read();
        let now = Utc::now();

        Ok(state
            .jobs
            .values()
            .filter(|job| states.contains(&job.effective_state(now)))
            .skip(start)
            .take(end - start + 1)
            .cloned()
            .collect())
    }

    async fn counts(&self) -> Result<JobCounts, StoreError> {
        let state = self.state.read();
        let now = Utc::now();

        let mut counts = JobCounts::default();
        for job in state.jobs.values() {
            counts.add(job.effective_state(now), 1);
        }
        Ok(counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{JobKind, JobOptions};
    use serde_json::json;

    fn email(to: &str) -> NewJob {
        NewJob::new(JobKind::Email, json!({"to": to, "subject": "hi"}))
    }

    #[tokio::test]
    async fn test_enqueue_and_lease() {
        let store = InMemoryQueueStore::new("q");
        let id = store.enqueue(email("a@b.c")).await.unwrap();

        let job = store.lease_next().await.unwrap().unwrap();
        assert_eq!(job.id, id);
        assert_eq!(job.state, JobState::Active);
        assert_eq!(job.attempts_made, 1);
        assert_eq!(job.max_attempts, 3);
        assert_eq!(job.queue_name, "q");
        assert!(job.leased_at.is_some());
        assert!(job.lease_id.is_some());

        // Nothing else is ready
        assert!(store.lease_next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_lease_in_enqueue_order() {
        let store = InMemoryQueueStore::new("q");
        let first = store.enqueue(email("1@b.c")).await.unwrap();
        let second = store.enqueue(email("2@b.c")).await.unwrap();

        assert_eq!(store.lease_next().await.unwrap().unwrap().id, first);
        assert_eq!(store.lease_next().await.unwrap().unwrap().id, second);
    }

    #[tokio::test]
    async fn test_enqueue_existing_id_is_deduplicated() {
        let store = InMemoryQueueStore::new("q");
        let id = store.enqueue(email("a@b.c").with_id("fixed")).await.unwrap();
        let again = store.enqueue(email("other@b.c").with_id("fixed")).await.unwrap();

        assert_eq!(id, "fixed");
        assert_eq!(again, "fixed");
        assert_eq!(store.len(), 1);
        let job = store.get("fixed").await.unwrap().unwrap();
        assert_eq!(job.payload["to"], "a@b.c");
    }

    #[tokio::test]
    async fn test_ack_removes_and_is_idempotent() {
        let store = InMemoryQueueStore::new("q");
        let id = store.enqueue(email("a@b.c")).await.unwrap();
        let lease = store.lease_next().await.unwrap().unwrap().lease_id.unwrap();

        store.ack(&id, lease).await.unwrap();
        store.ack(&id, lease).await.unwrap();
        store.ack("never-existed", lease).await.unwrap();
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_schedule_retry_delays_job() {
        let store = InMemoryQueueStore::new("q");
        let id = store.enqueue(email("a@b.c")).await.unwrap();
        let lease = store.lease_next().await.unwrap().unwrap().lease_id.unwrap();

        store
            .schedule_retry(&id, lease, Duration::from_secs(60), "timeout")
            .await
            .unwrap();

        let job = store.get(&id).await.unwrap().unwrap();
        assert_eq!(job.state, JobState::Delayed);
        assert_eq!(job.last_error.as_deref(), Some("timeout"));
        assert!(job.leased_at.is_none());
        assert!(job.lease_id.is_none());
        assert!(store.lease_next().await.unwrap().is_none());

        assert!(store.promote(&id));
        let job = store.lease_next().await.unwrap().unwrap();
        assert_eq!(job.id, id);
        assert_eq!(job.attempts_made, 2);
        assert_ne!(job.lease_id, Some(lease));
    }

    #[tokio::test]
    async fn test_schedule_retry_unknown_job() {
        let store = InMemoryQueueStore::new("q");
        let result = store
            .schedule_retry("missing", Uuid::now_v7(), Duration::ZERO, "x")
            .await;
        assert!(matches!(result, Err(StoreError::NotFound(id)) if id == "missing"));
    }

    #[tokio::test]
    async fn test_reclaimed_lease_cannot_write_outcome() {
        let store = InMemoryQueueStore::new("q");
        let id = store.enqueue(email("a@b.c")).await.unwrap();
        let first = store.lease_next().await.unwrap().unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        store
            .reclaim_expired_leases(Duration::from_millis(5))
            .await
            .unwrap();
        let second = store.lease_next().await.unwrap().unwrap();
        assert_eq!(second.id, id);

        let stale = first.lease_id.unwrap();
        let result = store.schedule_retry(&id, stale, Duration::ZERO, "late").await;
        assert!(matches!(result, Err(StoreError::LeaseLost(_))));
        assert!(matches!(store.ack(&id, stale).await, Err(StoreError::LeaseLost(_))));
        assert!(matches!(
            store.remove_leased(&id, stale).await,
            Err(StoreError::LeaseLost(_))
        ));

        // The second holder keeps exclusive use of the job
        assert!(store.lease_next().await.unwrap().is_none());
        let job = store.get(&id).await.unwrap().unwrap();
        assert_eq!(job.state, JobState::Active);
        assert_eq!(job.lease_id, second.lease_id);
        assert!(job.last_error.is_none());

        store.ack(&id, second.lease_id.unwrap()).await.unwrap();
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_remove_leased() {
        let store = InMemoryQueueStore::new("q");
        let id = store.enqueue(email("a@b.c")).await.unwrap();
        assert!(matches!(
            store.remove_leased(&id, Uuid::now_v7()).await,
            Err(StoreError::LeaseLost(_))
        ));

        let lease = store.lease_next().await.unwrap().unwrap().lease_id.unwrap();
        store.remove_leased(&id, lease).await.unwrap();
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_initial_delay() {
        let store = InMemoryQueueStore::new("q");
        let job = email("a@b.c")
            .with_options(JobOptions::default().with_delay(Duration::from_secs(60)));
        let id = store.enqueue(job).await.unwrap();

        assert!(store.lease_next().await.unwrap().is_none());
        let counts = store.counts().await.unwrap();
        assert_eq!(counts.delayed, 1);

        store.promote(&id);
        let counts = store.counts().await.unwrap();
        assert_eq!(counts.waiting, 1);
        assert_eq!(counts.delayed, 0);
    }

    #[tokio::test]
    async fn test_reclaim_expired_leases() {
        let store = InMemoryQueueStore::new("q");
        let id = store.enqueue(email("a@b.c")).await.unwrap();
        store.lease_next().await.unwrap();

        let reclaimed = store
            .reclaim_expired_leases(Duration::from_secs(60))
            .await
            .unwrap();
        assert!(reclaimed.is_empty());

        tokio::time::sleep(Duration::from_millis(20)).await;
        let reclaimed = store
            .reclaim_expired_leases(Duration::from_millis(5))
            .await
            .unwrap();
        assert_eq!(reclaimed, vec![id.clone()]);

        let job = store.get(&id).await.unwrap().unwrap();
        assert_eq!(job.state, JobState::Waiting);
        assert_eq!(job.attempts_made, 1);
        assert!(job.lease_id.is_none());
    }

    #[tokio::test]
    async fn test_remove() {
        let store = InMemoryQueueStore::new("q");
        let id = store.enqueue(email("a@b.c")).await.unwrap();

        assert!(store.remove(&id).await.unwrap());
        assert!(!store.remove(&id).await.unwrap());
        assert!(store.get(&id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_jobs_range_and_states() {
        let store = InMemoryQueueStore::new("q");
        for i in 0..5 {
            store.enqueue(email(&format!("{i}@b.c"))).await.unwrap();
        }
        store.lease_next().await.unwrap();

        let waiting = store.list_jobs(&[JobState::Waiting], 0, 49).await.unwrap();
        assert_eq!(waiting.len(), 4);
        assert_eq!(waiting[0].payload["to"], "1@b.c");

        let page = store.list_jobs(&[JobState::Waiting], 1, 2).await.unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].payload["to"], "2@b.c");

        let all = store
            .list_jobs(&[JobState::Waiting, JobState::Active], 0, 49)
            .await
            .unwrap();
        assert_eq!(all.len(), 5);

        assert!(store.list_jobs(&[JobState::Waiting], 3, 1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_counts() {
        let store = InMemoryQueueStore::new("q");
        store.enqueue(email("a@b.c")).await.unwrap();
        store.enqueue(email("b@b.c")).await.unwrap();
        store.lease_next().await.unwrap();

        let counts = store.counts().await.unwrap();
        assert_eq!(counts.waiting, 1);
        assert_eq!(counts.active, 1);
        assert_eq!(counts.completed, 0);
        assert_eq!(counts.failed, 0);
    }
}
