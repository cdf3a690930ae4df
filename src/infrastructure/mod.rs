//! Cross-cutting infrastructure: log messages and tracing setup

pub mod log_messages;
pub mod telemetry;

pub use telemetry::init_tracing;
