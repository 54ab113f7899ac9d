pub mod app;
pub mod bootstrap;
pub mod config;
pub mod envelope;
pub mod error;
pub mod idempotency;
pub mod infra;
pub mod observability;
pub mod pipeline;
pub mod server;
pub mod types;
