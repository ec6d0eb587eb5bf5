// HTTP API routes and DTOs

pub mod common;
pub mod dlq;
pub mod notify;

pub use common::{ApiError, ErrorResponse};
