//! # Courier Queue
//!
//! A durable, retrying job engine for outbound notifications (email, SMS).
//!
//! ## Features
//!
//! - **Leased jobs**: a job is held by at most one worker at a time
//! - **Automatic retries**: per-job backoff policy (exponential by default)
//! - **Failure classification**: permanent failures skip the remaining retries
//! - **Dead-letter queue**: exhausted or permanently failed jobs are parked for
//!   inspection, reprocessing and purging
//! - **Pluggable storage**: PostgreSQL (`FOR UPDATE SKIP LOCKED`) or in-memory
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        WorkerPool                            │
//! │  (leases jobs, bounded concurrency, reclaims stale leases)  │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Processor                             │
//! │  (runs handler, classifies failure, ack / retry / park)     │
//! └─────────────────────────────────────────────────────────────┘
//!                 │                               │
//!                 ▼                               ▼
//! ┌──────────────────────────────┐  ┌──────────────────────────────┐
//! │   QueueStore (primary)       │  │   DeadLetterManager          │
//! │   notification-queue         │  │   QueueStore (dead letters)  │
//! └──────────────────────────────┘  └──────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use courier_queue::prelude::*;
//!
//! let primary: Arc<dyn QueueStore> = Arc::new(InMemoryQueueStore::new("notification-queue"));
//! let dead: Arc<dyn QueueStore> = Arc::new(InMemoryQueueStore::new("notification-dlq"));
//! let dlq = Arc::new(DeadLetterManager::new(primary.clone(), dead));
//!
//! let mut handlers = HandlerRegistry::new();
//! register_notification_handlers(&mut handlers, Arc::new(ConsoleTransport), Arc::new(ConsoleTransport));
//!
//! let processor = Arc::new(Processor::new(primary.clone(), dlq.clone(), handlers));
//! let pool = WorkerPool::new(primary.clone(), processor, WorkerPoolConfig::default());
//! pool.start().await?;
//!
//! primary.enqueue(NewJob::new(JobKind::Email, json!({"to": "a@b.c", "subject": "hi"}))).await?;
//! ```

pub mod dead_letter;
pub mod handlers;
pub mod job;
pub mod metrics;
pub mod persistence;
pub mod reliability;
pub mod transport;
pub mod worker;

/// Prelude for common imports
pub mod prelude {
    pub use crate::dead_letter::{
        BatchItem, BatchOutcome, DeadLetterManager, DebugAddOutcome, DebugInfo, InspectOptions,
        InspectedJob, QueueStats, ReprocessOutcome, DEFAULT_BATCH_LIMIT,
    };
    pub use crate::handlers::register_notification_handlers;
    pub use crate::job::{
        DeadLetterMeta, Job, JobId, JobKind, JobOptions, JobState, LeaseId, NewJob,
    };
    pub use crate::metrics::{JobMetrics, JobStatusLabel, NoopMetrics, TracingMetrics};
    pub use crate::persistence::{
        ConnectionInfo, InMemoryQueueStore, JobCounts, PostgresQueueStore, QueueStore, StoreError,
    };
    pub use crate::reliability::{classify, BackoffPolicy, BackoffStrategy, FailureClass, JobError};
    pub use crate::transport::{
        ConsoleTransport, EmailMessage, EmailTransport, HttpRelayTransport, SendReceipt,
        SmsMessage, SmsTransport, TransportError,
    };
    pub use crate::worker::{
        HandlerRegistry, JobHandler, ProcessOutcome, Processor, WorkerPool, WorkerPoolConfig,
        WorkerPoolError,
    };
}

// Re-export key types at crate root
pub use dead_letter::{DeadLetterManager, InspectOptions, ReprocessOutcome};
pub use job::{DeadLetterMeta, Job, JobId, JobKind, JobOptions, JobState, LeaseId, NewJob};
pub use persistence::{InMemoryQueueStore, JobCounts, PostgresQueueStore, QueueStore, StoreError};
pub use reliability::{classify, BackoffPolicy, FailureClass, JobError};
pub use worker::{HandlerRegistry, Processor, WorkerPool, WorkerPoolConfig, WorkerPoolError};
