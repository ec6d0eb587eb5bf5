//! Worker pool for job execution
//!
//! This module provides:
//! - [`WorkerPool`] - Concurrent job execution with graceful shutdown
//! - [`Processor`] - Runs one job and records ack / retry / dead-letter
//! - [`HandlerRegistry`] - Handlers keyed by job kind
//! - [`PollerConfig`] - Job polling with exponential backoff
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       WorkerPool                             │
//! │  ┌─────────────┐                   ┌─────────────────────┐  │
//! │  │  JobPoller  │                   │  Lease Reclaimer    │  │
//! │  │  (polling)  │                   │  (optional)         │  │
//! │  └──────┬──────┘                   └─────────────────────┘  │
//! │         │                                                    │
//! │         ▼                                                    │
//! │  ┌─────────────────────────────────────────────────────┐    │
//! │  │         Processor (Semaphore-limited)               │    │
//! │  │  [Job 1] [Job 2] [Job 3] ... [Job N]                │    │
//! │  └─────────────────────────────────────────────────────┘    │
//! └─────────────────────────────────────────────────────────────┘
//! ```

mod poller;
mod pool;
mod processor;

pub use poller::{JobPoller, PollerConfig, PollerError};
pub use pool::{WorkerPool, WorkerPoolConfig, WorkerPoolError, WorkerPoolStatus};
pub use processor::{HandlerRegistry, HandlerResult, JobHandler, ProcessOutcome, Processor};
