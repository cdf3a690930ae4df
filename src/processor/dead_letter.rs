//! Dead-letter sinks for batches that exhausted their store retries

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use crate::domain::enrichment::EnrichedEvent;
use crate::domain::events::EventId;
use crate::domain::metrics::{MetricName, TimeSeriesPoint};

#[derive(Debug, Error)]
pub enum DeadLetterError {
    #[error("Dead-letter I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Dead-letter record could not be encoded: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Points for one metric that were not committed to the store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingWrite {
    pub metric: MetricName,
    pub points: Vec<TimeSeriesPoint>,
}

/// A batch that could not be committed
///
/// Only the writes that had not succeeded are kept in `pending`, so
/// replaying a dead letter never double counts the metrics that did commit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetter {
    pub batch_id: Uuid,
    pub failed_at: DateTime<Utc>,
    pub attempts: u32,
    pub error: String,
    pub events: Vec<EnrichedEvent>,
    pub pending: Vec<PendingWrite>,
}

impl DeadLetter {
    pub fn event_ids(&self) -> impl Iterator<Item = &EventId> {
        self.events.iter().map(|enriched| enriched.event().id())
    }

    pub fn pending_points(&self) -> usize {
        self.pending.iter().map(|write| write.points.len()).sum()
    }
}

#[async_trait]
pub trait DeadLetterSink: Send + Sync {
    async fn write(&self, letter: &DeadLetter) -> Result<(), DeadLetterError>;
}

/// Keeps dead letters in memory; useful for tests and embedded hosts
#[derive(Debug, Default)]
pub struct InMemoryDeadLetterSink {
    letters: Mutex<Vec<DeadLetter>>,
}

impl InMemoryDeadLetterSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn letters(&self) -> Vec<DeadLetter> {
        self.letters.lock().clone()
    }

    pub fn take(&self) -> Vec<DeadLetter> {
        std::mem::take(&mut *self.letters.lock())
    }

    pub fn len(&self) -> usize {
        self.letters.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl DeadLetterSink for InMemoryDeadLetterSink {
    async fn write(&self, letter: &DeadLetter) -> Result<(), DeadLetterError> {
        self.letters.lock().push(letter.clone());
        Ok(())
    }
}

/// Appends one JSON document per line to a file
#[derive(Debug)]
pub struct JsonLinesDeadLetterSink {
    path: PathBuf,
    write_lock: tokio::sync::Mutex<()>,
}

impl JsonLinesDeadLetterSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read every dead letter from a JSON-lines file; a missing file is empty
    pub async fn read_all(path: impl AsRef<Path>) -> Result<Vec<DeadLetter>, DeadLetterError> {
        let contents = match tokio::fs::read_to_string(path.as_ref()).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        contents
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| serde_json::from_str(line).map_err(DeadLetterError::from))
            .collect()
    }
}

#[async_trait]
impl DeadLetterSink for JsonLinesDeadLetterSink {
    async fn write(&self, letter: &DeadLetter) -> Result<(), DeadLetterError> {
        let mut line = serde_json::to_vec(letter)?;
        line.push(b'\n');

        let _guard = self.write_lock.lock().await;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(&line).await?;
        file.sync_data().await?;
        Ok(())
    }
}
