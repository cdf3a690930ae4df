//! Stream processor: validation, enrichment, aggregation and delivery
//!
//! Workers pull batches from the ingestion queue and hand them to the
//! [`StreamProcessor`]. A batch is committed to the store metric by metric
//! with bounded retries; a batch that cannot be committed is written to the
//! dead-letter sink and the processor reports itself degraded.

pub mod dead_letter;
pub mod dedup;
pub mod pipeline;
pub mod retry;
pub mod stats;
pub mod supervisor;
pub mod validate;

use std::time::Duration;

pub use dead_letter::{
    DeadLetter, DeadLetterError, DeadLetterSink, InMemoryDeadLetterSink,
    JsonLinesDeadLetterSink, PendingWrite,
};
pub use dedup::DedupWindow;
pub use pipeline::{BatchOutcome, StreamProcessor};
pub use retry::RetryConfig;
pub use stats::{HealthStatus, ProcessorStats};
pub use supervisor::ProcessorSupervisor;
pub use validate::{check_event, RejectionReason, ValidationError, Validator};

#[derive(Debug, Clone, PartialEq)]
pub struct ProcessorConfig {
    pub workers: usize,
    pub batch_size: usize,
    /// How long a worker waits to fill a batch before processing a partial one
    pub batch_wait: Duration,
    pub dedup_window: Duration,
    pub dedup_capacity: usize,
    /// Tolerance for producer clocks running ahead of ours
    pub max_clock_skew: Duration,
    pub shutdown_timeout: Duration,
    /// Consecutive dead-lettered batches before health becomes `Failed`
    pub fatal_dead_letter_threshold: u32,
    pub retry: RetryConfig,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            batch_size: 100,
            batch_wait: Duration::from_millis(100),
            dedup_window: Duration::from_secs(3600),
            dedup_capacity: 100_000,
            max_clock_skew: Duration::from_secs(60),
            shutdown_timeout: Duration::from_secs(30),
            fatal_dead_letter_threshold: 10,
            retry: RetryConfig::default(),
        }
    }
}
