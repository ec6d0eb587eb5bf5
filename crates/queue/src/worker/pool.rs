//! Worker pool for job execution
//!
//! Leases jobs with bounded concurrency and shuts down gracefully.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use super::poller::{JobPoller, PollerConfig, PollerError};
use super::processor::Processor;
use crate::job::Job;
use crate::persistence::{QueueStore, StoreError};
use crate::reliability::{duration_millis, optional_duration_millis};

/// Worker pool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerPoolConfig {
    /// Unique worker ID (generated if not provided)
    pub worker_id: String,

    /// Maximum jobs processed at once
    pub max_concurrency: usize,

    /// Poller configuration
    pub poller: PollerConfig,

    /// Active jobs leased longer than this are returned to the queue.
    /// Disabled when `None`.
    #[serde(default, with = "optional_duration_millis")]
    pub lease_timeout: Option<Duration>,

    /// How often expired leases are checked
    #[serde(with = "duration_millis")]
    pub reclaim_interval: Duration,

    /// First wait before re-recording an outcome the store rejected;
    /// doubles per try up to `outcome_retry_max`
    #[serde(with = "duration_millis")]
    pub outcome_retry_min: Duration,

    /// Longest wait between outcome write attempts
    #[serde(with = "duration_millis")]
    pub outcome_retry_max: Duration,

    /// Graceful shutdown timeout
    #[serde(with = "duration_millis")]
    pub shutdown_timeout: Duration,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            worker_id: format!("worker-{}", Uuid::now_v7()),
            max_concurrency: 4,
            poller: PollerConfig::default(),
            lease_timeout: None,
            reclaim_interval: Duration::from_secs(30),
            outcome_retry_min: Duration::from_millis(100),
            outcome_retry_max: Duration::from_secs(10),
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

impl WorkerPoolConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the worker ID
    pub fn with_worker_id(mut self, id: impl Into<String>) -> Self {
        self.worker_id = id.into();
        self
    }

    /// Set maximum concurrency
    pub fn with_max_concurrency(mut self, max: usize) -> Self {
        self.max_concurrency = max.max(1);
        self
    }

    /// Set poller configuration
    pub fn with_poller(mut self, config: PollerConfig) -> Self {
        self.poller = config;
        self
    }

    /// Enable lease reclamation
    pub fn with_lease_timeout(mut self, timeout: Duration) -> Self {
        self.lease_timeout = Some(timeout);
        self
    }

    /// Set how often expired leases are checked
    pub fn with_reclaim_interval(mut self, interval: Duration) -> Self {
        self.reclaim_interval = interval;
        self
    }

    /// Set the wait bounds used while the store rejects an outcome write
    pub fn with_outcome_retry(mut self, min: Duration, max: Duration) -> Self {
        self.outcome_retry_min = min;
        self.outcome_retry_max = max.max(min);
        self
    }

    /// Set shutdown timeout
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }
}

/// Worker pool status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerPoolStatus {
    /// Worker is starting up
    Starting,
    /// Worker is running and leasing jobs
    Running,
    /// Worker is draining (finishing current jobs, not leasing new ones)
    Draining,
    /// Worker has stopped
    Stopped,
}

/// Worker pool errors
#[derive(Debug, thiserror::Error)]
pub enum WorkerPoolError {
    /// Store error
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Poller error
    #[error("poller error: {0}")]
    Poller(#[from] PollerError),

    /// Worker already running
    #[error("worker pool is already running")]
    AlreadyRunning,

    /// Shutdown timeout
    #[error("graceful shutdown timed out with {0} jobs still running")]
    ShutdownTimeout(usize),
}

/// Worker pool for processing jobs from one queue
///
/// # Example
///
/// ```ignore
/// use courier_queue::{WorkerPool, WorkerPoolConfig};
///
/// let config = WorkerPoolConfig::new().with_max_concurrency(8);
/// let pool = WorkerPool::new(store, processor, config);
///
/// pool.start().await?;
///
/// // ... later, graceful shutdown
/// pool.shutdown().await?;
/// ```
pub struct WorkerPool {
    store: Arc<dyn QueueStore>,
    processor: Arc<Processor>,
    config: WorkerPoolConfig,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    status: RwLock<WorkerPoolStatus>,
    active_jobs: Arc<Semaphore>,
    poll_handle: Mutex<Option<JoinHandle<()>>>,
    reclaim_handle: Mutex<Option<JoinHandle<()>>>,
}

impl WorkerPool {
    /// Create a new worker pool
    pub fn new(
        store: Arc<dyn QueueStore>,
        processor: Arc<Processor>,
        config: WorkerPoolConfig,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        Self {
            store,
            processor,
            active_jobs: Arc::new(Semaphore::new(config.max_concurrency)),
            config,
            shutdown_tx,
            shutdown_rx,
            status: RwLock::new(WorkerPoolStatus::Stopped),
            poll_handle: Mutex::new(None),
            reclaim_handle: Mutex::new(None),
        }
    }

    /// Start the worker pool
    #[instrument(skip(self), fields(worker_id = %self.config.worker_id))]
    pub async fn start(&self) -> Result<(), WorkerPoolError> {
        {
            let mut status = self.status.write();
            if matches!(
                *status,
                WorkerPoolStatus::Running | WorkerPoolStatus::Starting
            ) {
                return Err(WorkerPoolError::AlreadyRunning);
            }
            *status = WorkerPoolStatus::Starting;
        }

        info!(
            worker_id = %self.config.worker_id,
            queue = %self.store.name(),
            handlers = ?self.processor.handlers().kinds(),
            max_concurrency = self.config.max_concurrency,
            lease_timeout_ms = self.config.lease_timeout.map(|t| t.as_millis() as u64),
            "Starting worker pool"
        );

        self.start_poll_loop();
        if let Some(lease_timeout) = self.config.lease_timeout {
            self.start_reclaim_loop(lease_timeout);
        }

        *self.status.write() = WorkerPoolStatus::Running;
        Ok(())
    }

    /// Stop leasing and wait for in-flight jobs to finish
    #[instrument(skip(self), fields(worker_id = %self.config.worker_id))]
    pub async fn shutdown(&self) -> Result<(), WorkerPoolError> {
        if *self.status.read() == WorkerPoolStatus::Stopped {
            return Ok(());
        }

        info!(worker_id = %self.config.worker_id, "Initiating graceful shutdown");

        *self.status.write() = WorkerPoolStatus::Draining;
        let _ = self.shutdown_tx.send(true);

        // Let the loops observe the signal
        let poll_handle = self.poll_handle.lock().take();
        if let Some(handle) = poll_handle {
            let _ = handle.await;
        }
        let reclaim_handle = self.reclaim_handle.lock().take();
        if let Some(handle) = reclaim_handle {
            let _ = handle.await;
        }

        let deadline = tokio::time::Instant::now() + self.config.shutdown_timeout;
        loop {
            let running = self.running_jobs();
            if running == 0 {
                debug!("All jobs completed");
                break;
            }

            if tokio::time::Instant::now() >= deadline {
                warn!(remaining_jobs = running, "Shutdown timeout reached");
                *self.status.write() = WorkerPoolStatus::Stopped;
                return Err(WorkerPoolError::ShutdownTimeout(running));
            }

            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        *self.status.write() = WorkerPoolStatus::Stopped;
        info!(worker_id = %self.config.worker_id, "Worker pool stopped");
        Ok(())
    }

    /// Get current status
    pub fn status(&self) -> WorkerPoolStatus {
        *self.status.read()
    }

    /// Jobs currently being processed
    pub fn running_jobs(&self) -> usize {
        self.config
            .max_concurrency
            .saturating_sub(self.active_jobs.available_permits())
    }

    /// Get the worker ID
    pub fn worker_id(&self) -> &str {
        &self.config.worker_id
    }

    /// Start the polling loop
    fn start_poll_loop(&self) {
        let store = Arc::clone(&self.store);
        let processor = Arc::clone(&self.processor);
        let active_jobs = Arc::clone(&self.active_jobs);
        let poller_config = self.config.poller.clone();
        let retry = (self.config.outcome_retry_min, self.config.outcome_retry_max);
        let shutdown_rx = self.shutdown_rx.clone();

        let handle = tokio::spawn(async move {
            let mut poller = JobPoller::new(store, poller_config, shutdown_rx.clone());
            let mut shutdown = shutdown_rx;

            loop {
                if poller.is_shutdown() {
                    debug!("Poll loop: shutdown requested");
                    break;
                }

                // Wait for a free slot before leasing
                let permit = tokio::select! {
                    permit = Arc::clone(&active_jobs).acquire_owned() => match permit {
                        Ok(permit) => permit,
                        Err(_) => break,
                    },
                    _ = shutdown.changed() => break,
                };

                match poller.poll().await {
                    Ok(Some(job)) => {
                        let processor = Arc::clone(&processor);
                        let shutdown = shutdown.clone();
                        tokio::spawn(async move {
                            run_job(&processor, job, retry, shutdown).await;
                            drop(permit);
                        });
                        continue;
                    }
                    Ok(None) => drop(permit),
                    Err(PollerError::Shutdown) => break,
                    Err(e) => {
                        drop(permit);
                        error!("Poll error: {}", e);
                    }
                }

                if poller.wait().await {
                    break;
                }
            }

            debug!("Poll loop exited");
        });

        *self.poll_handle.lock() = Some(handle);
    }

    /// Start the expired lease reclamation loop
    fn start_reclaim_loop(&self, lease_timeout: Duration) {
        let store = Arc::clone(&self.store);
        let interval = self.config.reclaim_interval;
        let mut shutdown_rx = self.shutdown_rx.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match store.reclaim_expired_leases(lease_timeout).await {
                            Ok(reclaimed) => {
                                if !reclaimed.is_empty() {
                                    info!(count = reclaimed.len(), "Reclaimed expired leases");
                                }
                            }
                            Err(e) => {
                                error!("Lease reclamation failed: {}", e);
                            }
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        debug!("Reclaim loop: shutdown requested");
                        break;
                    }
                }
            }

            debug!("Reclaim loop exited");
        });

        *self.reclaim_handle.lock() = Some(handle);
    }
}

/// Execute a leased job once, then record its outcome.
///
/// While the store is unavailable the outcome write is retried with doubling
/// waits in `retry`; the handler is never run twice. Gives up once shutdown
/// has begun, leaving the job active.
async fn run_job(
    processor: &Processor,
    job: Job,
    retry: (Duration, Duration),
    mut shutdown: watch::Receiver<bool>,
) {
    let (mut wait, max_wait) = retry;
    let result = processor.execute(&job).await;

    loop {
        match processor.settle(&job, &result).await {
            Ok(outcome) => {
                debug!(job_id = %job.id, ?outcome, "Job processed");
                return;
            }
            Err(StoreError::Unavailable(e)) => {
                if *shutdown.borrow() {
                    error!(job_id = %job.id, "Shutting down with job outcome unrecorded: {}", e);
                    return;
                }
                warn!(
                    job_id = %job.id,
                    retry_in_ms = wait.as_millis() as u64,
                    "Failed to record job outcome, retrying: {}",
                    e
                );
                let closed = tokio::select! {
                    _ = tokio::time::sleep(wait) => false,
                    changed = shutdown.changed() => changed.is_err(),
                };
                if closed {
                    return;
                }
                wait = (wait * 2).min(max_wait);
            }
            Err(e) => {
                error!(job_id = %job.id, "Failed to record job outcome: {}", e);
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dead_letter::DeadLetterManager;
    use crate::job::{JobKind, NewJob};
    use crate::persistence::InMemoryQueueStore;
    use crate::worker::HandlerRegistry;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_default_config() {
        let config = WorkerPoolConfig::default();
        assert!(config.worker_id.starts_with("worker-"));
        assert_eq!(config.max_concurrency, 4);
        assert!(config.lease_timeout.is_none());
        assert_eq!(config.shutdown_timeout, Duration::from_secs(30));
        assert_eq!(config.outcome_retry_min, Duration::from_millis(100));
        assert_eq!(config.outcome_retry_max, Duration::from_secs(10));
    }

    #[test]
    fn test_config_builder() {
        let config = WorkerPoolConfig::new()
            .with_worker_id("test-worker")
            .with_max_concurrency(0)
            .with_lease_timeout(Duration::from_secs(60))
            .with_reclaim_interval(Duration::from_secs(5))
            .with_outcome_retry(Duration::from_millis(50), Duration::from_millis(10));

        assert_eq!(config.worker_id, "test-worker");
        assert_eq!(config.max_concurrency, 1);
        assert_eq!(config.lease_timeout, Some(Duration::from_secs(60)));
        assert_eq!(config.reclaim_interval, Duration::from_secs(5));
        assert_eq!(config.outcome_retry_min, Duration::from_millis(50));
        assert_eq!(config.outcome_retry_max, Duration::from_millis(50));
    }

    #[test]
    fn test_worker_pool_status() {
        assert_ne!(WorkerPoolStatus::Running, WorkerPoolStatus::Stopped);
        assert_ne!(WorkerPoolStatus::Draining, WorkerPoolStatus::Running);
    }

    #[tokio::test]
    async fn test_pool_processes_jobs_and_stops() {
        let primary = Arc::new(InMemoryQueueStore::new("notification-queue"));
        let dead = Arc::new(InMemoryQueueStore::new("notification-dlq"));
        let dlq = Arc::new(DeadLetterManager::new(primary.clone(), dead.clone()));

        let processed = Arc::new(AtomicUsize::new(0));
        let mut handlers = HandlerRegistry::new();
        let counter = processed.clone();
        handlers.register(JobKind::Sms, move |_job| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<_, String>(json!({"ok": true}))
            }
        });

        let processor = Arc::new(Processor::new(primary.clone(), dlq, handlers));
        let config = WorkerPoolConfig::new()
            .with_max_concurrency(2)
            .with_poller(PollerConfig::new().with_min_interval(Duration::from_millis(5)));
        let pool = WorkerPool::new(primary.clone(), processor, config);

        for i in 0..5 {
            primary
                .enqueue(NewJob::new(
                    JobKind::Sms,
                    json!({"to": format!("+1555010{i}"), "text": "hi"}),
                ))
                .await
                .unwrap();
        }

        pool.start().await.unwrap();
        assert_eq!(pool.status(), WorkerPoolStatus::Running);
        assert!(matches!(
            pool.start().await,
            Err(WorkerPoolError::AlreadyRunning)
        ));

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while !primary.is_empty() && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        pool.shutdown().await.unwrap();
        assert_eq!(pool.status(), WorkerPoolStatus::Stopped);
        assert_eq!(processed.load(Ordering::SeqCst), 5);
        assert!(primary.is_empty());
        assert!(dead.is_empty());
    }
}
