//! Ingestion boundary: the bounded queue between event producers and the processor

pub mod queue;

pub use queue::{IngestionQueue, QueueFullError, QueueStats};
