// Courier server library
// Decision: Router, config and telemetry live here so binaries and tests share them

// API routes and DTOs
pub mod api;

// Router assembly
pub mod app;
pub use app::{build_app, AppState, RouterOptions};

// Internal API key middleware
pub mod auth;

// Environment configuration
pub mod config;
pub use config::{ConfigError, ServerConfig, TransportKind};

// OpenAPI spec generation
pub mod openapi;

// Logging setup
pub mod telemetry;
