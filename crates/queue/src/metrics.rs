//! Job metrics port
//!
//! The processor and dead-letter manager report through [`JobMetrics`]. Every
//! method has a no-op default and returns nothing. Calls are made through
//! [`report`], which contains a panicking backend, so a metrics sink can
//! never change a job's outcome.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Duration;

use tracing::{debug, warn};

/// Outcome label attached to job counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobStatusLabel {
    /// Handler succeeded and the job was acked
    Success,
    /// Handler failed (the job may still be retried)
    Failed,
    /// Job was rescheduled for another attempt
    Retried,
    /// Job was moved to the dead-letter queue
    DeadLettered,
}

impl JobStatusLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Retried => "retried",
            Self::DeadLettered => "dead_lettered",
        }
    }
}

/// Sink for job counters, durations and queue gauges
pub trait JobMetrics: Send + Sync {
    /// Count a job outcome (`notification_jobs_total{type,status}`)
    fn record_job(&self, _job_type: &str, _status: JobStatusLabel) {}

    /// Observe handler run time (`notification_job_duration_seconds{type}`)
    fn observe_duration(&self, _job_type: &str, _elapsed: Duration) {}

    /// Set the dead-letter gauge for one state (`notification_dlq_jobs{state}`)
    fn set_dlq_jobs(&self, _state: &str, _count: u64) {}
}

/// Run one sink call. A panic inside the sink is logged and dropped.
pub(crate) fn report(metric: &'static str, call: impl FnOnce()) {
    if catch_unwind(AssertUnwindSafe(call)).is_err() {
        warn!(metric, "Metrics sink panicked; measurement dropped");
    }
}

/// Discards everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMetrics;

impl JobMetrics for NoopMetrics {}

/// Emits every metric as a `debug` tracing event under `courier::metrics`
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingMetrics;

impl JobMetrics for TracingMetrics {
    fn record_job(&self, job_type: &str, status: JobStatusLabel) {
        debug!(
            target: "courier::metrics",
            metric = "notification_jobs_total",
            job_type,
            status = status.as_str(),
            "increment"
        );
    }

    fn observe_duration(&self, job_type: &str, elapsed: Duration) {
        debug!(
            target: "courier::metrics",
            metric = "notification_job_duration_seconds",
            job_type,
            seconds = elapsed.as_secs_f64(),
            "observe"
        );
    }

    fn set_dlq_jobs(&self, state: &str, count: u64) {
        debug!(
            target: "courier::metrics",
            metric = "notification_dlq_jobs",
            state,
            count,
            "set"
        );
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use parking_lot::Mutex;

    /// Records every call for assertions
    #[derive(Default)]
    pub struct RecordingMetrics {
        pub jobs: Mutex<Vec<(String, JobStatusLabel)>>,
        pub durations: Mutex<Vec<String>>,
        pub gauges: Mutex<Vec<(String, u64)>>,
    }

    impl JobMetrics for RecordingMetrics {
        fn record_job(&self, job_type: &str, status: JobStatusLabel) {
            self.jobs.lock().push((job_type.to_string(), status));
        }

        fn observe_duration(&self, job_type: &str, _elapsed: Duration) {
            self.durations.lock().push(job_type.to_string());
        }

        fn set_dlq_jobs(&self, state: &str, count: u64) {
            self.gauges.lock().push((state.to_string(), count));
        }
    }

    /// Panics on every call
    pub struct PanickingMetrics;

    impl JobMetrics for PanickingMetrics {
        fn record_job(&self, _job_type: &str, _status: JobStatusLabel) {
            panic!("metrics backend down");
        }

        fn observe_duration(&self, _job_type: &str, _elapsed: Duration) {
            panic!("metrics backend down");
        }

        fn set_dlq_jobs(&self, _state: &str, _count: u64) {
            panic!("metrics backend down");
        }
    }
}
