//! Processor counters and health signal

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::processor::validate::RejectionReason;

/// Health reported to the host process
///
/// `Failed` is the fatal signal: the host is expected to restart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    /// Batches are being dead-lettered but the sink is working
    Degraded,
    Failed,
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
            Self::Failed => "failed",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ProcessorStats {
    pub accepted: u64,
    pub rejected_missing_field: u64,
    pub rejected_future_timestamp: u64,
    pub rejected_duplicate: u64,
    pub batches_processed: u64,
    pub points_written: u64,
    pub retries: u64,
    pub dead_lettered_batches: u64,
    pub replayed_batches: u64,
}

impl ProcessorStats {
    pub fn rejected(&self) -> u64 {
        self.rejected_missing_field + self.rejected_future_timestamp + self.rejected_duplicate
    }
}

#[derive(Debug, Default)]
pub(crate) struct ProcessorCounters {
    accepted: AtomicU64,
    rejected_missing_field: AtomicU64,
    rejected_future_timestamp: AtomicU64,
    rejected_duplicate: AtomicU64,
    batches_processed: AtomicU64,
    points_written: AtomicU64,
    retries: AtomicU64,
    dead_lettered_batches: AtomicU64,
    replayed_batches: AtomicU64,
}

impl ProcessorCounters {
    pub(crate) fn record_rejection(&self, reason: RejectionReason) {
        let counter = match reason {
            RejectionReason::MissingField => &self.rejected_missing_field,
            RejectionReason::FutureTimestamp => &self.rejected_future_timestamp,
            RejectionReason::Duplicate => &self.rejected_duplicate,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_accepted(&self, count: usize) {
        self.accepted.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_committed(&self, points: usize) {
        self.batches_processed.fetch_add(1, Ordering::Relaxed);
        self.points_written
            .fetch_add(points as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_dead_letter(&self) {
        self.dead_lettered_batches.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_replay(&self, points: usize) {
        self.replayed_batches.fetch_add(1, Ordering::Relaxed);
        self.points_written
            .fetch_add(points as u64, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> ProcessorStats {
        ProcessorStats {
            accepted: self.accepted.load(Ordering::Relaxed),
            rejected_missing_field: self.rejected_missing_field.load(Ordering::Relaxed),
            rejected_future_timestamp: self.rejected_future_timestamp.load(Ordering::Relaxed),
            rejected_duplicate: self.rejected_duplicate.load(Ordering::Relaxed),
            batches_processed: self.batches_processed.load(Ordering::Relaxed),
            points_written: self.points_written.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            dead_lettered_batches: self.dead_lettered_batches.load(Ordering::Relaxed),
            replayed_batches: self.replayed_batches.load(Ordering::Relaxed),
        }
    }
}
