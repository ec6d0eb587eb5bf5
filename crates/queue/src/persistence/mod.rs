//! Persistence layer for job queues
//!
//! This module provides:
//! - [`QueueStore`] trait for leased job storage
//! - [`InMemoryQueueStore`] for tests and local runs
//! - [`PostgresQueueStore`] for production

mod memory;
mod postgres;
mod store;

pub use memory::InMemoryQueueStore;
pub use postgres::{run_migrations, PostgresQueueStore, MIGRATOR};
pub use store::{ConnectionInfo, JobCounts, QueueStore, StoreError};
