//! Validate, enrich and aggregate one batch of events
//!
//! Store writes are grouped per metric. A metric that committed is never
//! written again for the same batch, so a retry after a partial failure only
//! re-sends the metrics that did not make it.

use chrono::Utc;
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::domain::enrichment::{EnrichedEvent, Enricher};
use crate::domain::events::Event;
use crate::domain::metrics::{MetricName, TimeSeriesPoint};
use crate::infrastructure::log_messages;
use crate::processor::dead_letter::{DeadLetter, DeadLetterSink, PendingWrite};
use crate::processor::dedup::DedupWindow;
use crate::processor::retry::RetryConfig;
use crate::processor::stats::{HealthStatus, ProcessorCounters, ProcessorStats};
use crate::processor::validate::Validator;
use crate::processor::ProcessorConfig;
use crate::publisher::{Delta, DeltaSink};
use crate::store::{StoreError, TimeSeriesStore};

/// What happened to one batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BatchOutcome {
    pub accepted: usize,
    pub rejected: usize,
    pub points_written: usize,
    pub dead_lettered: bool,
}

struct WriteFailure {
    pending: Vec<PendingWrite>,
    error: StoreError,
    attempts: u32,
    points_written: usize,
}

pub struct StreamProcessor {
    validator: Validator,
    enricher: Enricher,
    store: Arc<dyn TimeSeriesStore>,
    dead_letters: Arc<dyn DeadLetterSink>,
    deltas: Arc<dyn DeltaSink>,
    retry: RetryConfig,
    fatal_dead_letter_threshold: u32,
    consecutive_dead_letters: AtomicU32,
    counters: ProcessorCounters,
    health: watch::Sender<HealthStatus>,
}

impl StreamProcessor {
    pub fn new(
        config: &ProcessorConfig,
        enricher: Enricher,
        store: Arc<dyn TimeSeriesStore>,
        dead_letters: Arc<dyn DeadLetterSink>,
        deltas: Arc<dyn DeltaSink>,
    ) -> Self {
        let dedup = Arc::new(DedupWindow::new(
            config.dedup_window,
            config.dedup_capacity,
        ));
        let (health, _) = watch::channel(HealthStatus::Healthy);
        Self {
            validator: Validator::new(dedup, config.max_clock_skew),
            enricher,
            store,
            dead_letters,
            deltas,
            retry: config.retry.clone(),
            fatal_dead_letter_threshold: config.fatal_dead_letter_threshold.max(1),
            consecutive_dead_letters: AtomicU32::new(0),
            counters: ProcessorCounters::default(),
            health,
        }
    }

    pub fn stats(&self) -> ProcessorStats {
        self.counters.snapshot()
    }

    pub fn health(&self) -> watch::Receiver<HealthStatus> {
        self.health.subscribe()
    }

    pub fn health_status(&self) -> HealthStatus {
        *self.health.borrow()
    }

    #[instrument(skip_all, fields(events = events.len()))]
    pub async fn process_batch(&self, events: Vec<Event>) -> BatchOutcome {
        let mut outcome = BatchOutcome::default();
        let now = Utc::now();

        let mut enriched = Vec::with_capacity(events.len());
        for event in events {
            match self.validator.validate(&event, now) {
                Ok(()) => enriched.push(self.enricher.enrich(event)),
                Err(e) => {
                    debug!(reason = %e.reason(), "{}", e);
                    self.counters.record_rejection(e.reason());
                    outcome.rejected += 1;
                }
            }
        }
        outcome.accepted = enriched.len();
        self.counters.record_accepted(enriched.len());
        if enriched.is_empty() {
            return outcome;
        }

        match self.write_with_retry(group_by_metric(&enriched)).await {
            Ok(points_written) => {
                outcome.points_written = points_written;
                self.counters.record_committed(points_written);
                self.publish_deltas(&enriched);
                self.consecutive_dead_letters.store(0, Ordering::Relaxed);
                self.health.send_if_modified(|status| {
                    let recovered = *status == HealthStatus::Degraded;
                    if recovered {
                        *status = HealthStatus::Healthy;
                    }
                    recovered
                });
                debug!(
                    accepted = outcome.accepted,
                    points_written, "{}",
                    log_messages::processor::BATCH_COMMITTED
                );
            }
            Err(failure) => {
                outcome.points_written = failure.points_written;
                outcome.dead_lettered = true;
                self.dead_letter(enriched, failure).await;
            }
        }
        outcome
    }

    /// Re-attempt the uncommitted writes of a dead letter and publish its deltas
    pub async fn replay_dead_letter(&self, letter: &DeadLetter) -> Result<usize, StoreError> {
        let points_written = self
            .write_with_retry(letter.pending.clone())
            .await
            .map_err(|failure| failure.error)?;
        self.counters.record_replay(points_written);
        self.publish_deltas(&letter.events);
        info!(
            batch_id = %letter.batch_id,
            points_written, "{}",
            log_messages::processor::DEAD_LETTER_REPLAYED
        );
        Ok(points_written)
    }

    async fn write_with_retry(&self, pending: Vec<PendingWrite>) -> Result<usize, WriteFailure> {
        let mut remaining: VecDeque<PendingWrite> = pending.into();
        let mut points_written = 0;
        let mut attempt = 1;

        while let Some(write) = remaining.front() {
            let result = self.store.write_points(&write.metric, &write.points).await;
            match result {
                Ok(receipt) => {
                    points_written += receipt.points_written;
                    remaining.pop_front();
                }
                Err(e) if e.is_retryable() && attempt < self.retry.max_attempts() => {
                    let delay = self.retry.delay_for(attempt);
                    warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "Store write failed, retrying: {}",
                        e
                    );
                    self.counters.record_retry();
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    return Err(WriteFailure {
                        pending: remaining.into(),
                        error: e,
                        attempts: attempt,
                        points_written,
                    });
                }
            }
        }
        Ok(points_written)
    }

    async fn dead_letter(&self, events: Vec<EnrichedEvent>, failure: WriteFailure) {
        let letter = DeadLetter {
            batch_id: Uuid::now_v7(),
            failed_at: Utc::now(),
            attempts: failure.attempts,
            error: failure.error.to_string(),
            events,
            pending: failure.pending,
        };

        match self.dead_letters.write(&letter).await {
            Ok(()) => {
                self.counters.record_dead_letter();
                let consecutive = self.consecutive_dead_letters.fetch_add(1, Ordering::Relaxed) + 1;
                error!(
                    batch_id = %letter.batch_id,
                    attempts = letter.attempts,
                    pending_points = letter.pending_points(),
                    consecutive,
                    "{}: {}",
                    log_messages::processor::BATCH_DEAD_LETTERED,
                    letter.error
                );
                if consecutive >= self.fatal_dead_letter_threshold {
                    self.set_health(HealthStatus::Failed);
                } else {
                    self.set_health(HealthStatus::Degraded);
                }
            }
            Err(e) => {
                error!(
                    batch_id = %letter.batch_id,
                    "{}: {}",
                    log_messages::processor::DEAD_LETTER_SINK_FAILED,
                    e
                );
                self.set_health(HealthStatus::Failed);
            }
        }
    }

    /// Failed is terminal; it is never downgraded
    fn set_health(&self, next: HealthStatus) {
        self.health.send_if_modified(|status| {
            if *status == next || *status == HealthStatus::Failed {
                return false;
            }
            *status = next;
            true
        });
    }

    fn publish_deltas(&self, events: &[EnrichedEvent]) {
        for enriched in events {
            self.deltas.publish(Delta::from_enriched(enriched));
        }
    }
}

/// Group every point of the batch by metric, preserving event order within a metric
fn group_by_metric(events: &[EnrichedEvent]) -> Vec<PendingWrite> {
    let mut grouped: BTreeMap<MetricName, Vec<TimeSeriesPoint>> = BTreeMap::new();
    for point in events.iter().flat_map(EnrichedEvent::points) {
        grouped.entry(point.metric.clone()).or_default().push(point);
    }
    grouped
        .into_iter()
        .map(|(metric, points)| PendingWrite { metric, points })
        .collect()
}

impl std::fmt::Debug for StreamProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamProcessor")
            .field("retry", &self.retry)
            .field("stats", &self.stats())
            .field("health", &self.health_status())
            .finish_non_exhaustive()
    }
}
