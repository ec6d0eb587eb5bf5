//! Job processing: run the handler, then ack, retry or dead-letter

use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use tracing::{debug, error, info, instrument, warn};

use crate::dead_letter::DeadLetterManager;
use crate::job::{Job, JobId, JobKind, LeaseId};
use crate::metrics::{report, JobMetrics, JobStatusLabel, NoopMetrics};
use crate::persistence::{QueueStore, StoreError};
use crate::reliability::{classify, Backoff, FailureClass};

/// Handler execution result; the error string is the failure message
pub type HandlerResult = Result<serde_json::Value, String>;

/// Job handler function type
pub type JobHandler =
    Arc<dyn Fn(Job) -> Pin<Box<dyn Future<Output = HandlerResult> + Send>> + Send + Sync>;

/// Handlers keyed by job kind
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<JobKind, JobHandler>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for `kind`, replacing any previous one
    pub fn register<F, Fut>(&mut self, kind: impl Into<JobKind>, handler: F)
    where
        F: Fn(Job) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        let handler: JobHandler = Arc::new(move |job| Box::pin(handler(job)));
        self.handlers.insert(kind.into(), handler);
    }

    pub fn get(&self, kind: &JobKind) -> Option<JobHandler> {
        self.handlers.get(kind).cloned()
    }

    pub fn kinds(&self) -> Vec<String> {
        let mut kinds: Vec<String> = self.handlers.keys().map(ToString::to_string).collect();
        kinds.sort();
        kinds
    }
}

/// What happened to a leased job
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// Handler succeeded; the job was acked and removed
    Completed,
    /// Handler failed transiently; the job will be leased again after `delay`
    RetryScheduled { attempt: u32, delay: Duration },
    /// Job was moved to the dead-letter queue as `dlq_id`
    DeadLettered { dlq_id: JobId, class: FailureClass },
    /// The lease was reclaimed before the outcome was written; the job was
    /// left to its current holder
    LeaseLost,
}

/// Runs one leased job to a terminal decision.
///
/// A failure is classified first. Permanent failures and failures on the
/// last allowed attempt go to the dead-letter queue; everything else is
/// rescheduled with the job's backoff.
pub struct Processor {
    store: Arc<dyn QueueStore>,
    dead_letters: Arc<DeadLetterManager>,
    handlers: HandlerRegistry,
    metrics: Arc<dyn JobMetrics>,
    backoff: Option<Arc<dyn Backoff>>,
}

impl Processor {
    pub fn new(
        store: Arc<dyn QueueStore>,
        dead_letters: Arc<DeadLetterManager>,
        handlers: HandlerRegistry,
    ) -> Self {
        Self {
            store,
            dead_letters,
            handlers,
            metrics: Arc::new(NoopMetrics),
            backoff: None,
        }
    }

    /// Report job outcomes to `metrics`
    pub fn with_metrics(mut self, metrics: Arc<dyn JobMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Use `backoff` for every job instead of the policy stored with it
    pub fn with_backoff(mut self, backoff: Arc<dyn Backoff>) -> Self {
        self.backoff = Some(backoff);
        self
    }

    pub fn handlers(&self) -> &HandlerRegistry {
        &self.handlers
    }

    /// Process a job previously returned by `lease_next`: [`execute`] it,
    /// then [`settle`] the result.
    ///
    /// Returns an error only when the store cannot record the outcome; the
    /// job is then still active and the caller may settle it again.
    ///
    /// [`execute`]: Processor::execute
    /// [`settle`]: Processor::settle
    pub async fn process(&self, job: Job) -> Result<ProcessOutcome, StoreError> {
        let result = self.execute(&job).await;
        self.settle(&job, &result).await
    }

    /// Run the job's handler once. Panics and unknown kinds become failures.
    #[instrument(skip(self, job), fields(job_id = %job.id, job_type = %job.kind, attempt = job.attempts_made))]
    pub async fn execute(&self, job: &Job) -> HandlerResult {
        let started = Instant::now();

        let result = match self.handlers.get(&job.kind) {
            Some(handler) => AssertUnwindSafe(handler(job.clone()))
                .catch_unwind()
                .await
                .unwrap_or_else(|_| Err("handler panicked".to_string())),
            None => Err(format!("Unsupported job type: {}", job.kind)),
        };

        let job_type = job.kind.as_str();
        report("notification_job_duration_seconds", || {
            self.metrics.observe_duration(job_type, started.elapsed())
        });
        if result.is_err() {
            report("notification_jobs_total", || {
                self.metrics.record_job(job_type, JobStatusLabel::Failed)
            });
        }

        result
    }

    /// Record the result of [`execute`](Processor::execute): ack, reschedule
    /// or dead-letter the job.
    ///
    /// Safe to call again after a `StoreError::Unavailable`. Every write
    /// presents the job's lease, so once the lease is gone nothing is changed
    /// and `ProcessOutcome::LeaseLost` is returned.
    #[instrument(skip(self, job, result), fields(job_id = %job.id, job_type = %job.kind, attempt = job.attempts_made))]
    pub async fn settle(
        &self,
        job: &Job,
        result: &HandlerResult,
    ) -> Result<ProcessOutcome, StoreError> {
        let outcome = match result {
            Ok(_) => self.complete(job).await,
            Err(message) => self.handle_failure(job, message).await,
        };

        match outcome {
            Err(StoreError::LeaseLost(_)) => {
                warn!("Lease lost before the outcome was recorded; job left to its current holder");
                Ok(ProcessOutcome::LeaseLost)
            }
            other => other,
        }
    }

    async fn complete(&self, job: &Job) -> Result<ProcessOutcome, StoreError> {
        let lease_id = lease_of(job)?;
        self.store.ack(&job.id, lease_id).await?;
        report("notification_jobs_total", || {
            self.metrics.record_job(job.kind.as_str(), JobStatusLabel::Success)
        });
        debug!("Job completed");
        Ok(ProcessOutcome::Completed)
    }

    async fn handle_failure(&self, job: &Job, message: &str) -> Result<ProcessOutcome, StoreError> {
        let lease_id = lease_of(job)?;
        let job_type = job.kind.as_str();
        let error = classify(message, &job.kind, &job.payload);
        let last_attempt = job.is_last_attempt();

        warn!(
            attempt = job.attempts_made,
            max_attempts = job.max_attempts,
            permanent = error.is_permanent(),
            last_attempt,
            "Job failed: {}",
            message
        );

        if error.is_permanent() || last_attempt {
            let dlq_id = self.dead_letters.move_to_dlq(job, &error.to_string()).await?;
            report("notification_jobs_total", || {
                self.metrics.record_job(job_type, JobStatusLabel::DeadLettered)
            });
            info!(%dlq_id, "Job moved to dead-letter queue");
            return Ok(ProcessOutcome::DeadLettered {
                dlq_id,
                class: error.class(),
            });
        }

        let delay = match &self.backoff {
            Some(backoff) => backoff.delay_for_attempt(job.attempts_made),
            None => job.backoff.delay_for_attempt(job.attempts_made),
        };

        self.store
            .schedule_retry(&job.id, lease_id, delay, &error.to_string())
            .await
            .inspect_err(|e| error!("Failed to schedule retry: {}", e))?;
        report("notification_jobs_total", || {
            self.metrics.record_job(job_type, JobStatusLabel::Retried)
        });

        Ok(ProcessOutcome::RetryScheduled {
            attempt: job.attempts_made,
            delay,
        })
    }
}

fn lease_of(job: &Job) -> Result<LeaseId, StoreError> {
    job.lease_id
        .ok_or_else(|| StoreError::LeaseLost(job.id.clone()))
}
