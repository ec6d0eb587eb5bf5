//! Retry and failure-handling policy
//!
//! This module provides:
//! - [`BackoffPolicy`] - Delay between attempts (exponential, linear, fixed)
//! - [`classify`] - Decide whether a failed job is worth retrying

mod backoff;
mod classifier;

pub use backoff::{Backoff, BackoffPolicy, BackoffStrategy};
pub use classifier::{classify, FailureClass, JobError};

pub(crate) use backoff::{duration_millis, optional_duration_millis};
