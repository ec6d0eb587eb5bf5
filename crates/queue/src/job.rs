//! Job model shared by the stores, the processor and the dead-letter manager

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::reliability::{duration_millis, BackoffPolicy};

/// Job identifier, unique within one queue.
///
/// Store-assigned ids are UUID v7 strings; reprocessed jobs use `reproc:<dlq id>`.
pub type JobId = String;

/// Token identifying one lease of a job. A fresh one is issued by every
/// `lease_next`, and outcome writes must present it.
pub type LeaseId = Uuid;

/// Payload key under which dead-letter metadata is attached.
pub const DLQ_META_KEY: &str = "__dlq";

/// Payload key holding a non-object payload while it sits in the dead-letter queue.
const DLQ_RAW_KEY: &str = "__raw";

/// Kind of notification a job delivers
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum JobKind {
    Email,
    Sms,
    /// Any other job name; no handler is registered for these by default
    Other(String),
}

impl JobKind {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Email => "email",
            Self::Sms => "sms",
            Self::Other(name) => name,
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for JobKind {
    fn from(value: &str) -> Self {
        match value {
            "email" => Self::Email,
            "sms" => Self::Sms,
            other => Self::Other(other.to_string()),
        }
    }
}

impl From<String> for JobKind {
    fn from(value: String) -> Self {
        Self::from(value.as_str())
    }
}

impl From<JobKind> for String {
    fn from(kind: JobKind) -> Self {
        match kind {
            JobKind::Other(name) => name,
            other => other.as_str().to_string(),
        }
    }
}

/// Stored state of a job.
///
/// Completed jobs are removed from the queue and dead-lettered jobs are moved
/// out of it, so neither appears here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    /// Ready to be leased
    Waiting,
    /// Leased by a worker
    Active,
    /// Waiting for its ready time to elapse
    Delayed,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::Active => "active",
            Self::Delayed => "delayed",
        }
    }

    /// Parse a state name. Returns `None` for states the store never holds.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "waiting" | "wait" => Some(Self::Waiting),
            "active" => Some(Self::Active),
            "delayed" => Some(Self::Delayed),
            _ => None,
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-job delivery options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobOptions {
    /// Total attempts including the first one
    pub max_attempts: u32,

    /// Delay policy between attempts
    pub backoff: BackoffPolicy,

    /// Initial delay before the first attempt
    #[serde(default, with = "duration_millis")]
    pub delay: Duration,
}

impl Default for JobOptions {
    /// Three attempts, exponential backoff from one second
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: BackoffPolicy::default(),
            delay: Duration::ZERO,
        }
    }
}

impl JobOptions {
    /// Options for a job that is never retried
    pub fn single_attempt() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

/// A job to be enqueued
#[derive(Debug, Clone, PartialEq)]
pub struct NewJob {
    /// Caller-chosen id; the store assigns one when absent
    pub id: Option<JobId>,
    pub kind: JobKind,
    pub payload: Value,
    pub options: JobOptions,
}

impl NewJob {
    pub fn new(kind: impl Into<JobKind>, payload: Value) -> Self {
        Self {
            id: None,
            kind: kind.into(),
            payload,
            options: JobOptions::default(),
        }
    }

    pub fn with_id(mut self, id: impl Into<JobId>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_options(mut self, options: JobOptions) -> Self {
        self.options = options;
        self
    }

    /// State and ready time for a job enqueued at `now`
    pub(crate) fn initial_schedule(&self, now: DateTime<Utc>) -> (JobState, DateTime<Utc>) {
        if self.options.delay.is_zero() {
            return (JobState::Waiting, now);
        }
        let ready_at = chrono::Duration::from_std(self.options.delay)
            .ok()
            .and_then(|delay| now.checked_add_signed(delay))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        (JobState::Delayed, ready_at)
    }
}

/// A stored job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: JobId,
    pub queue_name: String,
    #[serde(rename = "name")]
    pub kind: JobKind,
    pub payload: Value,
    pub state: JobState,
    /// Number of times the job has been leased
    pub attempts_made: u32,
    pub max_attempts: u32,
    pub backoff: BackoffPolicy,
    pub created_at: DateTime<Utc>,
    /// Earliest time the job may be leased
    pub ready_at: DateTime<Utc>,
    pub leased_at: Option<DateTime<Utc>>,
    /// Current lease; cleared when the job is rescheduled or reclaimed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lease_id: Option<LeaseId>,
    pub last_error: Option<String>,
}

impl Job {
    /// State as observed at `now`: a delayed job whose ready time has passed
    /// is waiting.
    pub fn effective_state(&self, now: DateTime<Utc>) -> JobState {
        match self.state {
            JobState::Delayed if self.ready_at <= now => JobState::Waiting,
            state => state,
        }
    }

    /// Whether the job can be leased at `now`
    pub fn is_ready(&self, now: DateTime<Utc>) -> bool {
        matches!(self.state, JobState::Waiting | JobState::Delayed) && self.ready_at <= now
    }

    /// Whether `lease_id` is the live lease on this job
    pub fn holds_lease(&self, lease_id: LeaseId) -> bool {
        self.state == JobState::Active && self.lease_id == Some(lease_id)
    }

    /// Whether the current attempt is the last one allowed
    pub fn is_last_attempt(&self) -> bool {
        self.attempts_made >= self.max_attempts
    }

    /// Dead-letter metadata, if this job sits in a dead-letter queue
    pub fn dead_letter_meta(&self) -> Option<DeadLetterMeta> {
        DeadLetterMeta::from_payload(&self.payload)
    }
}

/// Provenance attached to a job when it is moved to the dead-letter queue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetterMeta {
    pub original_job_id: JobId,
    pub original_queue: String,
    pub job_name: String,
    pub attempts_made: u32,
    pub failed_reason: String,
    /// Milliseconds since the Unix epoch
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub failed_at: DateTime<Utc>,
}

impl DeadLetterMeta {
    /// Build metadata for a job that failed with `failed_reason`
    pub fn for_job(job: &Job, failed_reason: impl Into<String>, failed_at: DateTime<Utc>) -> Self {
        Self {
            original_job_id: job.id.clone(),
            original_queue: job.queue_name.clone(),
            job_name: job.kind.to_string(),
            attempts_made: job.attempts_made,
            failed_reason: failed_reason.into(),
            failed_at,
        }
    }

    /// Read metadata from a dead-letter payload
    pub fn from_payload(payload: &Value) -> Option<Self> {
        payload
            .get(DLQ_META_KEY)
            .and_then(|meta| serde_json::from_value(meta.clone()).ok())
    }

    /// Attach this metadata to a copy of `payload`
    pub fn attach(&self, payload: Value) -> Value {
        let meta = serde_json::to_value(self).unwrap_or(Value::Null);
        let mut map = match payload {
            Value::Object(map) => map,
            other => {
                let mut map = Map::new();
                map.insert(DLQ_RAW_KEY.to_string(), other);
                map
            }
        };
        map.insert(DLQ_META_KEY.to_string(), meta);
        Value::Object(map)
    }

    /// Remove dead-letter metadata, restoring the payload the job was parked with
    pub fn strip(payload: Value) -> Value {
        match payload {
            Value::Object(mut map) => {
                if map.remove(DLQ_META_KEY).is_some() {
                    if let Some(raw) = map.remove(DLQ_RAW_KEY) {
                        if map.is_empty() {
                            return raw;
                        }
                        map.insert(DLQ_RAW_KEY.to_string(), raw);
                    }
                }
                Value::Object(map)
            }
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_job() -> Job {
        let now = Utc::now();
        Job {
            id: "42".to_string(),
            queue_name: "notification-queue".to_string(),
            kind: JobKind::Email,
            payload: json!({"to": "a@b.c", "subject": "hi"}),
            state: JobState::Active,
            attempts_made: 3,
            max_attempts: 3,
            backoff: BackoffPolicy::default(),
            created_at: now,
            ready_at: now,
            leased_at: Some(now),
            lease_id: Some(Uuid::now_v7()),
            last_error: None,
        }
    }

    #[test]
    fn test_job_kind_from_str() {
        assert_eq!(JobKind::from("email"), JobKind::Email);
        assert_eq!(JobKind::from("sms"), JobKind::Sms);
        assert_eq!(JobKind::from("push"), JobKind::Other("push".to_string()));
        assert_eq!(JobKind::Other("push".to_string()).to_string(), "push");
        assert_eq!(JobKind::from("email".to_string()), JobKind::Email);
        assert_eq!(JobKind::from("push".to_string()), JobKind::from("push"));
    }

    #[test]
    fn test_job_kind_serializes_as_string() {
        let value = serde_json::to_value(JobKind::Sms).unwrap();
        assert_eq!(value, json!("sms"));

        let kind: JobKind = serde_json::from_value(json!("fax")).unwrap();
        assert_eq!(kind, JobKind::Other("fax".to_string()));
    }

    #[test]
    fn test_holds_lease() {
        let mut job = sample_job();
        let lease = job.lease_id.unwrap();
        assert!(job.holds_lease(lease));
        assert!(!job.holds_lease(Uuid::now_v7()));

        job.state = JobState::Waiting;
        assert!(!job.holds_lease(lease));
    }

    #[test]
    fn test_job_state_parse() {
        assert_eq!(JobState::parse("waiting"), Some(JobState::Waiting));
        assert_eq!(JobState::parse(" Delayed "), Some(JobState::Delayed));
        assert_eq!(JobState::parse("completed"), None);
    }

    #[test]
    fn test_default_options() {
        let options = JobOptions::default();
        assert_eq!(options.max_attempts, 3);
        assert_eq!(options.backoff.delay_for_attempt(1), Duration::from_secs(1));
        assert_eq!(options.delay, Duration::ZERO);
    }

    #[test]
    fn test_initial_schedule_with_delay() {
        let now = Utc::now();
        let job = NewJob::new(JobKind::Email, json!({}))
            .with_options(JobOptions::default().with_delay(Duration::from_secs(5)));
        let (state, ready_at) = job.initial_schedule(now);
        assert_eq!(state, JobState::Delayed);
        assert_eq!(ready_at, now + chrono::Duration::seconds(5));

        let (state, ready_at) = NewJob::new(JobKind::Sms, json!({})).initial_schedule(now);
        assert_eq!(state, JobState::Waiting);
        assert_eq!(ready_at, now);
    }

    #[test]
    fn test_effective_state_promotes_elapsed_delay() {
        let mut job = sample_job();
        job.state = JobState::Delayed;
        job.ready_at = Utc::now() - chrono::Duration::seconds(1);
        assert_eq!(job.effective_state(Utc::now()), JobState::Waiting);
        assert!(job.is_ready(Utc::now()));

        job.ready_at = Utc::now() + chrono::Duration::seconds(60);
        assert_eq!(job.effective_state(Utc::now()), JobState::Delayed);
        assert!(!job.is_ready(Utc::now()));
    }

    #[test]
    fn test_dead_letter_meta_attach_and_strip() {
        let job = sample_job();
        let meta = DeadLetterMeta::for_job(&job, "boom", Utc::now());
        let parked = meta.attach(job.payload.clone());

        assert_eq!(parked["to"], "a@b.c");
        assert_eq!(parked["__dlq"]["originalJobId"], "42");
        assert_eq!(parked["__dlq"]["originalQueue"], "notification-queue");
        assert_eq!(parked["__dlq"]["jobName"], "email");
        assert_eq!(parked["__dlq"]["attemptsMade"], 3);
        assert!(parked["__dlq"]["failedAt"].is_i64());

        let restored = DeadLetterMeta::from_payload(&parked).unwrap();
        assert_eq!(restored.failed_reason, "boom");
        assert_eq!(DeadLetterMeta::strip(parked), job.payload);
    }

    #[test]
    fn test_dead_letter_meta_non_object_payload() {
        let mut job = sample_job();
        job.payload = json!("plain text");
        let meta = DeadLetterMeta::for_job(&job, "boom", Utc::now());

        let parked = meta.attach(job.payload.clone());
        assert!(parked.get("__dlq").is_some());
        assert_eq!(DeadLetterMeta::strip(parked), json!("plain text"));
    }
}
