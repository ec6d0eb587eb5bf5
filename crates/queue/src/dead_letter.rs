//! Dead-letter queue management
//!
//! Jobs that fail permanently, or run out of attempts, are copied into a
//! second queue with their provenance attached under `__dlq`. Operators can
//! inspect them, put them back on the primary queue, or purge them.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{error, info, instrument, warn};
use utoipa::ToSchema;

use crate::job::{DeadLetterMeta, Job, JobId, JobKind, JobOptions, JobState, NewJob};
use crate::metrics::{report, JobMetrics, NoopMetrics};
use crate::persistence::{ConnectionInfo, JobCounts, QueueStore, StoreError};

/// Maximum ids accepted by one batch operation
pub const DEFAULT_BATCH_LIMIT: usize = 100;

/// Prefix of the id given to a reprocessed job
pub const REPROCESS_ID_PREFIX: &str = "reproc:";

const STATE_IN_DLQ: &str = "in-dlq";
const NOT_FOUND_IN_DLQ: &str = "DLQ job not found";
const NOT_FOUND: &str = "not found";
const NO_IDS: &str = "No jobIds provided";

/// Options for [`DeadLetterManager::inspect`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InspectOptions {
    /// States to include
    pub states: Vec<JobState>,
    /// First position (0-based)
    pub start: usize,
    /// Last position, inclusive
    pub end: usize,
    /// Case-insensitive substring matched against each serialized row
    pub query: Option<String>,
    /// Include the original payload
    pub verbose: bool,
}

impl Default for InspectOptions {
    fn default() -> Self {
        Self {
            states: vec![JobState::Waiting],
            start: 0,
            end: 49,
            query: None,
            verbose: false,
        }
    }
}

/// Operator view of one dead-letter entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct InspectedJob {
    pub id: JobId,
    pub name: String,
    /// Always `in-dlq`
    pub state: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_job_id: Option<JobId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempts_made: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_reason: Option<String>,
    /// Milliseconds since the Unix epoch
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_at: Option<i64>,
    /// Full payload, only when inspecting verbosely
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Object>)]
    pub data: Option<Value>,
}

impl InspectedJob {
    fn from_job(job: &Job, verbose: bool) -> Self {
        let meta = job.dead_letter_meta();
        let field = |name: &str| {
            job.payload
                .get(name)
                .and_then(Value::as_str)
                .map(str::to_string)
        };

        Self {
            id: job.id.clone(),
            name: job.kind.to_string(),
            state: STATE_IN_DLQ.to_string(),
            to: field("to"),
            subject: field("subject"),
            original_job_id: meta.as_ref().map(|m| m.original_job_id.clone()),
            attempts_made: meta.as_ref().map(|m| m.attempts_made),
            failed_reason: meta.as_ref().map(|m| m.failed_reason.clone()),
            failed_at: meta.as_ref().map(|m| m.failed_at.timestamp_millis()),
            data: verbose.then(|| job.payload.clone()),
        }
    }

    fn matches(&self, query: &str) -> bool {
        serde_json::to_string(self)
            .map(|s| s.to_lowercase().contains(query))
            .unwrap_or(false)
    }
}

/// Result of reprocessing one entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ReprocessOutcome {
    pub ok: bool,
    /// Id of the job created on the primary queue
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requeued_as: Option<JobId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ReprocessOutcome {
    pub fn requeued(id: impl Into<JobId>) -> Self {
        Self {
            ok: true,
            requeued_as: Some(id.into()),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            requeued_as: None,
            error: Some(error.into()),
        }
    }

    fn removed() -> Self {
        Self {
            ok: true,
            requeued_as: None,
            error: None,
        }
    }
}

/// Per-id entry of a batch result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct BatchItem {
    pub id: JobId,
    #[serde(flatten)]
    pub outcome: ReprocessOutcome,
}

/// Result of a batch operation.
///
/// `ok` is false only when the request itself was rejected; individual
/// failures are reported per item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct BatchOutcome {
    pub ok: bool,
    pub results: Vec<BatchItem>,
    pub count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BatchOutcome {
    fn completed(results: Vec<BatchItem>) -> Self {
        Self {
            ok: true,
            count: results.len(),
            results,
            error: None,
        }
    }

    fn rejected(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            results: vec![],
            count: 0,
            error: Some(error.into()),
        }
    }
}

/// Counts for one queue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct QueueStats {
    pub queue: String,
    pub counts: JobCounts,
}

/// Connection and count snapshot of the dead-letter queue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct DebugInfo {
    pub queue: String,
    pub connection: ConnectionInfo,
    pub counts: JobCounts,
}

/// Result of [`DeadLetterManager::debug_add`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DebugAddOutcome {
    pub added_id: JobId,
    pub counts: JobCounts,
}

/// Moves failed jobs into the dead-letter queue and back out again
pub struct DeadLetterManager {
    primary: Arc<dyn QueueStore>,
    dlq: Arc<dyn QueueStore>,
    metrics: Arc<dyn JobMetrics>,
    reprocess_options: JobOptions,
}

impl DeadLetterManager {
    pub fn new(primary: Arc<dyn QueueStore>, dlq: Arc<dyn QueueStore>) -> Self {
        Self {
            primary,
            dlq,
            metrics: Arc::new(NoopMetrics),
            reprocess_options: JobOptions::default(),
        }
    }

    /// Report the dead-letter gauge to `metrics`
    pub fn with_metrics(mut self, metrics: Arc<dyn JobMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Options given to reprocessed jobs (default: 3 attempts, exponential from 1s)
    pub fn with_reprocess_options(mut self, options: JobOptions) -> Self {
        self.reprocess_options = options;
        self
    }

    pub fn primary(&self) -> &Arc<dyn QueueStore> {
        &self.primary
    }

    pub fn dlq(&self) -> &Arc<dyn QueueStore> {
        &self.dlq
    }

    /// Move a leased job from the primary queue to the dead-letter queue.
    ///
    /// The entry is written before the job is removed. If the write fails the
    /// job stays active on the primary queue. If the removal fails, or the
    /// lease on `job` is no longer live, the new entry is withdrawn again, so
    /// the job is never in both queues for long.
    #[instrument(skip(self, job, failed_reason), fields(job_id = %job.id))]
    pub async fn move_to_dlq(&self, job: &Job, failed_reason: &str) -> Result<JobId, StoreError> {
        let lease_id = job
            .lease_id
            .ok_or_else(|| StoreError::LeaseLost(job.id.clone()))?;

        let meta = DeadLetterMeta::for_job(job, failed_reason, Utc::now());
        let entry = NewJob::new(job.kind.clone(), meta.attach(job.payload.clone()))
            .with_options(JobOptions::single_attempt());

        let dlq_id = self.dlq.enqueue(entry).await.inspect_err(|e| {
            error!("Failed to write dead-letter entry, job left on primary queue: {}", e)
        })?;

        if let Err(e) = self.primary.remove_leased(&job.id, lease_id).await {
            error!(%dlq_id, "Failed to remove dead-lettered job from primary queue: {}", e);
            if let Err(undo) = self.dlq.remove(&dlq_id).await {
                warn!(%dlq_id, "Dead-letter entry left behind: {}", undo);
            }
            return Err(e);
        }

        Ok(dlq_id)
    }

    /// List dead-letter entries
    #[instrument(skip(self))]
    pub async fn inspect(&self, options: &InspectOptions) -> Result<Vec<InspectedJob>, StoreError> {
        let jobs = self
            .dlq
            .list_jobs(&options.states, options.start, options.end)
            .await?;

        let rows = jobs
            .iter()
            .map(|job| InspectedJob::from_job(job, options.verbose));

        Ok(match options.query.as_deref().map(str::trim) {
            Some(query) if !query.is_empty() => {
                let query = query.to_lowercase();
                rows.filter(|row| row.matches(&query)).collect()
            }
            _ => rows.collect(),
        })
    }

    /// Put one entry back on the primary queue as `reproc:<id>`.
    ///
    /// The new job carries the payload without dead-letter metadata. The
    /// entry is removed only after the new job exists; retrying after a
    /// failed removal does not create a second job.
    #[instrument(skip(self))]
    pub async fn reprocess(&self, dlq_id: &str) -> Result<ReprocessOutcome, StoreError> {
        let Some(entry) = self.dlq.get(dlq_id).await? else {
            return Ok(ReprocessOutcome::failed(NOT_FOUND_IN_DLQ));
        };

        let job = NewJob::new(entry.kind, DeadLetterMeta::strip(entry.payload))
            .with_id(format!("{}{}", REPROCESS_ID_PREFIX, dlq_id))
            .with_options(self.reprocess_options.clone());

        let requeued_as = self.primary.enqueue(job).await?;
        self.dlq.remove(dlq_id).await?;

        info!(%requeued_as, "Reprocessed dead-letter entry");
        Ok(ReprocessOutcome::requeued(requeued_as))
    }

    /// Reprocess up to `limit` entries; one failure does not stop the rest
    #[instrument(skip(self, ids), fields(requested = ids.len()))]
    pub async fn reprocess_many(&self, ids: &[JobId], limit: usize) -> BatchOutcome {
        if ids.is_empty() {
            return BatchOutcome::rejected(NO_IDS);
        }

        let mut results = Vec::with_capacity(ids.len().min(limit));
        for id in ids.iter().take(limit) {
            let outcome = self
                .reprocess(id)
                .await
                .unwrap_or_else(|e| ReprocessOutcome::failed(e.to_string()));
            results.push(BatchItem {
                id: id.clone(),
                outcome,
            });
        }

        BatchOutcome::completed(results)
    }

    /// Reprocess the oldest `limit` waiting entries
    #[instrument(skip(self))]
    pub async fn reprocess_all(&self, limit: usize) -> Result<BatchOutcome, StoreError> {
        if limit == 0 {
            return Ok(BatchOutcome::completed(vec![]));
        }

        let ids: Vec<JobId> = self
            .dlq
            .list_jobs(&[JobState::Waiting], 0, limit - 1)
            .await?
            .into_iter()
            .map(|job| job.id)
            .collect();

        if ids.is_empty() {
            return Ok(BatchOutcome::completed(vec![]));
        }

        Ok(self.reprocess_many(&ids, limit).await)
    }

    /// Delete entries without reprocessing them
    #[instrument(skip(self, ids), fields(requested = ids.len()))]
    pub async fn purge(&self, ids: &[JobId]) -> BatchOutcome {
        if ids.is_empty() {
            return BatchOutcome::rejected(NO_IDS);
        }

        let mut results = Vec::with_capacity(ids.len());
        for id in ids {
            let outcome = match self.dlq.remove(id).await {
                Ok(true) => ReprocessOutcome::removed(),
                Ok(false) => ReprocessOutcome::failed(NOT_FOUND),
                Err(e) => ReprocessOutcome::failed(e.to_string()),
            };
            results.push(BatchItem {
                id: id.clone(),
                outcome,
            });
        }

        info!(count = results.len(), "Purged dead-letter entries");
        BatchOutcome::completed(results)
    }

    /// Dead-letter counts; also refreshes the dead-letter gauge
    pub async fn stats(&self) -> Result<QueueStats, StoreError> {
        let counts = self.dlq.counts().await?;
        for (state, count) in counts.iter() {
            report("notification_dlq_jobs", || self.metrics.set_dlq_jobs(state, count));
        }

        Ok(QueueStats {
            queue: self.dlq.name().to_string(),
            counts,
        })
    }

    /// Connection details and counts of the dead-letter queue
    pub async fn debug(&self) -> Result<DebugInfo, StoreError> {
        Ok(DebugInfo {
            queue: self.dlq.name().to_string(),
            connection: self.dlq.connection_info(),
            counts: self.dlq.counts().await?,
        })
    }

    /// Write a synthetic email entry directly into the dead-letter queue,
    /// recorded as if it had failed all three attempts
    #[instrument(skip(self, payload))]
    pub async fn debug_add(&self, payload: Value) -> Result<DebugAddOutcome, StoreError> {
        let meta = DeadLetterMeta {
            original_job_id: "debug".to_string(),
            original_queue: self.primary.name().to_string(),
            job_name: JobKind::Email.to_string(),
            attempts_made: 3,
            failed_reason: "debug insert".to_string(),
            failed_at: Utc::now(),
        };
        let entry = NewJob::new(JobKind::Email, meta.attach(payload))
            .with_options(JobOptions::single_attempt());

        let added_id = self.dlq.enqueue(entry).await?;
        let counts = self.dlq.counts().await?;

        Ok(DebugAddOutcome { added_id, counts })
    }
}
