//! Log message constants
//!
//! Centralizes the messages logged at component lifecycle edges so they stay
//! consistent across workers and can be matched on in log pipelines.

/// Application startup and lifecycle messages
pub mod application {
    pub const STARTING: &str = "Starting chat analytics pipeline";
    pub const STARTED_SUCCESSFULLY: &str = "Pipeline started successfully";
    pub const SHUTDOWN_REQUESTED: &str = "Shutdown requested, draining pipeline";
    pub const SHUTDOWN_COMPLETE: &str = "Pipeline shut down cleanly";
    pub const HEALTH_CHANGED: &str = "Processor health changed";
    pub const FATAL_HEALTH: &str = "Processor reported fatal health, exiting for restart";
}

/// Configuration loading messages
pub mod configuration {
    pub const LOADING_CONFIG: &str = "Loading configuration for environment";
    pub const CONFIG_LOADED: &str = "Configuration loaded successfully";
}

/// Stream processor and worker messages
pub mod processor {
    pub const WORKER_STARTED: &str = "Processor worker started";
    pub const WORKER_STOPPED: &str = "Processor worker stopped";
    pub const WORKER_ABORTED: &str = "Processor worker did not finish before shutdown deadline";
    pub const QUEUE_NOT_DRAINED: &str = "Events left in queue after shutdown deadline";
    pub const BATCH_COMMITTED: &str = "Batch committed";
    pub const BATCH_DEAD_LETTERED: &str = "Batch dead-lettered after exhausting retries";
    pub const DEAD_LETTER_SINK_FAILED: &str = "Dead-letter sink write failed";
    pub const DEAD_LETTER_REPLAYED: &str = "Dead-lettered batch replayed";
}

/// Time-series store messages
pub mod store {
    pub const CLEANUP_COMPLETED: &str = "Retention cleanup completed";
    pub const CLEANUP_FAILED: &str = "Retention cleanup failed";
    pub const RETENTION_TASK_STARTED: &str = "Retention task started";
    pub const RETENTION_TASK_STOPPED: &str = "Retention task stopped";
}

/// Query engine messages
pub mod query {
    pub const CACHE_MISS: &str = "Query cache miss";
    pub const AUTO_RAW_FALLBACK: &str =
        "Raw range too dense for automatic resolution, reading one-minute buckets";
}

/// Real-time publisher messages
pub mod publisher {
    pub const DELTAS_DROPPED: &str = "Dropped oldest buffered deltas for slow subscriber";
    pub const FLUSHER_STARTED: &str = "Publisher flush timer started";
    pub const FLUSHER_STOPPED: &str = "Publisher flush timer stopped";
}
