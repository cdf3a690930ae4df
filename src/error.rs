use thiserror::Error;

use crate::analysis::AnalysisError;
use crate::ingestion::QueueFullError;
use crate::processor::{DeadLetterError, ValidationError};
use crate::publisher::PublisherError;
use crate::query::QueryError;
use crate::store::StoreError;

/// Chat analytics error types
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    QueueFull(#[from] QueueFullError),

    #[error("Invalid event: {0}")]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Analysis failed: {0}")]
    Analysis(#[from] AnalysisError),

    #[error(transparent)]
    DeadLetter(#[from] DeadLetterError),

    #[error(transparent)]
    Publisher(#[from] PublisherError),

    #[error(transparent)]
    Query(#[from] QueryError),

    #[error("Pipeline is shutting down and no longer accepts events")]
    ShuttingDown,

    #[error("Stream processor reported fatal health")]
    ProcessorFailed,
}

impl Error {
    /// Errors the caller caused and can fix by changing its request
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            Self::Validation(_)
                | Self::Publisher(_)
                | Self::Store(StoreError::RangeTooLarge { .. } | StoreError::InvalidRange(_))
                | Self::Query(QueryError::Store(
                    StoreError::RangeTooLarge { .. } | StoreError::InvalidRange(_)
                ))
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
