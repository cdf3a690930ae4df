//! Chat analytics - usage-event ingestion and real-time metrics
//!
//! Events from a chat application are queued, validated, enriched and
//! aggregated into multi-resolution time-series buckets. Every processed
//! event is published as a delta to channel subscribers, and the query
//! engine serves cached range reads with trend and anomaly analysis.

pub mod analysis;
pub mod application;
pub mod config;
pub mod domain;
pub mod error;
pub mod infrastructure;
pub mod ingestion;
pub mod processor;
pub mod publisher;
pub mod query;
pub mod store;

pub use application::Application;
pub use error::{Error, Result};
