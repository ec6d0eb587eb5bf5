//! Job polling with exponential backoff
//!
//! Leases jobs one at a time, slowing down while the queue is empty.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, instrument, trace};

use crate::job::Job;
use crate::persistence::{QueueStore, StoreError};
use crate::reliability::duration_millis;

/// Polling configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PollerConfig {
    /// Poll interval while jobs are available
    #[serde(with = "duration_millis")]
    pub min_interval: Duration,

    /// Poll interval ceiling while idle
    #[serde(with = "duration_millis")]
    pub max_interval: Duration,

    /// Backoff multiplier when no job was found
    pub backoff_multiplier: f64,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_millis(100),
            max_interval: Duration::from_secs(5),
            backoff_multiplier: 1.5,
        }
    }
}

impl PollerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set minimum poll interval
    pub fn with_min_interval(mut self, interval: Duration) -> Self {
        self.min_interval = interval;
        self.max_interval = self.max_interval.max(interval);
        self
    }

    /// Set maximum poll interval
    pub fn with_max_interval(mut self, interval: Duration) -> Self {
        self.max_interval = interval.max(self.min_interval);
        self
    }

    /// Set backoff multiplier
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier.max(1.0);
        self
    }
}

/// Job poller with adaptive backoff
///
/// Backs off exponentially when the queue is empty and resets to the minimum
/// interval as soon as a job is leased.
pub struct JobPoller {
    store: Arc<dyn QueueStore>,
    config: PollerConfig,
    current_interval: Duration,
    shutdown_rx: watch::Receiver<bool>,
}

impl JobPoller {
    pub fn new(
        store: Arc<dyn QueueStore>,
        config: PollerConfig,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            store,
            current_interval: config.min_interval,
            config,
            shutdown_rx,
        }
    }

    /// Lease the next ready job, if any, and update the backoff state
    #[instrument(skip(self), fields(queue = %self.store.name()))]
    pub async fn poll(&mut self) -> Result<Option<Job>, PollerError> {
        if *self.shutdown_rx.borrow() {
            debug!("Poller shutdown requested");
            return Err(PollerError::Shutdown);
        }

        match self.store.lease_next().await {
            Ok(Some(job)) => {
                self.reset_backoff();
                debug!(job_id = %job.id, "Leased job");
                Ok(Some(job))
            }
            Ok(None) => {
                self.increase_backoff();
                trace!(
                    interval_ms = self.current_interval.as_millis() as u64,
                    "No jobs ready, backing off"
                );
                Ok(None)
            }
            Err(e) => {
                self.increase_backoff();
                Err(PollerError::Store(e))
            }
        }
    }

    /// Wait for the current backoff interval.
    ///
    /// Returns `true` if shutdown was signaled while waiting.
    pub async fn wait(&mut self) -> bool {
        let mut shutdown_rx = self.shutdown_rx.clone();
        tokio::select! {
            _ = tokio::time::sleep(self.current_interval) => false,
            _ = shutdown_rx.changed() => {
                debug!("Shutdown signal received during wait");
                true
            }
        }
    }

    pub fn current_interval(&self) -> Duration {
        self.current_interval
    }

    pub fn is_shutdown(&self) -> bool {
        *self.shutdown_rx.borrow()
    }

    fn reset_backoff(&mut self) {
        self.current_interval = self.config.min_interval;
    }

    fn increase_backoff(&mut self) {
        let next = Duration::from_secs_f64(
            self.current_interval.as_secs_f64() * self.config.backoff_multiplier,
        );
        self.current_interval = next.min(self.config.max_interval);
    }
}

/// Poller errors
#[derive(Debug, thiserror::Error)]
pub enum PollerError {
    /// Store error
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Worker shutdown
    #[error("worker is shutting down")]
    Shutdown,
}
