//! Real-time delta publisher
//!
//! Subscribers register a callback per channel. Each subscription gets its own
//! capped buffer and a bounded delivery queue drained by a dedicated task, so
//! a slow callback only ever backs up its own buffer. Publishing never waits:
//! when a subscriber's queue is full the batch goes back into its buffer, and
//! once the buffer cap is hit the oldest deltas are dropped and counted.

use chrono::Utc;
use derive_more::Display;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::infrastructure::log_messages;
use crate::publisher::buffer::DeltaBuffer;
use crate::publisher::delta::{ChannelName, Delta, DeltaBatch};
use crate::publisher::{DeltaSink, PublisherError};

/// Callback invoked with every delivered batch
pub type BatchHandler = Arc<dyn Fn(DeltaBatch) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, Serialize, Deserialize)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for SubscriptionId {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublisherConfig {
    /// Longest a delta waits in a buffer before a flush
    pub flush_interval: Duration,
    /// Buffer length that triggers an immediate flush
    pub flush_threshold: usize,
    /// Per-subscription buffer cap
    pub max_buffer: usize,
    /// Batches queued for a subscriber's callback before it counts as slow
    pub subscriber_queue: usize,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            flush_interval: Duration::from_secs(1),
            flush_threshold: 50,
            max_buffer: 1_000,
            subscriber_queue: 16,
        }
    }
}

/// Snapshot of publisher counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PublisherStats {
    /// Deltas appended to subscription buffers
    pub deltas_published: u64,
    /// Deltas handed to subscriber callbacks
    pub deltas_delivered: u64,
    pub deltas_dropped: u64,
    pub batches_sent: u64,
    pub subscriptions: usize,
}

#[derive(Debug, Default)]
struct Counters {
    published: AtomicU64,
    delivered: AtomicU64,
    dropped: AtomicU64,
    batches: AtomicU64,
}

struct Subscription {
    id: SubscriptionId,
    buffer: DeltaBuffer,
    sender: mpsc::Sender<DeltaBatch>,
    closed: bool,
}

pub struct RealTimePublisher {
    config: PublisherConfig,
    channels: Mutex<HashMap<ChannelName, Vec<Subscription>>>,
    counters: Arc<Counters>,
    shutdown: watch::Sender<bool>,
    flusher: Mutex<Option<JoinHandle<()>>>,
}

impl RealTimePublisher {
    pub fn new(config: PublisherConfig) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            config,
            channels: Mutex::new(HashMap::new()),
            counters: Arc::new(Counters::default()),
            shutdown,
            flusher: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &PublisherConfig {
        &self.config
    }

    /// Register `on_batch` for `channel`; must be called within a tokio runtime
    pub fn subscribe<F>(&self, channel: ChannelName, on_batch: F) -> SubscriptionId
    where
        F: Fn(DeltaBatch) + Send + Sync + 'static,
    {
        let handler: BatchHandler = Arc::new(on_batch);
        let (sender, mut receiver) = mpsc::channel::<DeltaBatch>(self.config.subscriber_queue.max(1));
        let id = SubscriptionId::new();
        let counters = Arc::clone(&self.counters);

        tokio::spawn(async move {
            while let Some(batch) = receiver.recv().await {
                let delivered = batch.updates.len() as u64;
                handler(batch);
                counters.delivered.fetch_add(delivered, Ordering::Relaxed);
            }
        });

        debug!(subscription = %id, channel = %channel, "Subscription registered");
        self.channels
            .lock()
            .entry(channel)
            .or_default()
            .push(Subscription {
                id,
                buffer: DeltaBuffer::new(self.config.max_buffer),
                sender,
                closed: false,
            });
        id
    }

    /// Remove one subscription; undelivered deltas in its buffer are discarded
    pub fn unsubscribe(&self, id: SubscriptionId) -> Result<(), PublisherError> {
        let mut channels = self.channels.lock();
        let found = channels.values_mut().any(|subscriptions| {
            match subscriptions.iter().position(|s| s.id == id) {
                Some(index) => {
                    subscriptions.remove(index);
                    true
                }
                None => false,
            }
        });
        if !found {
            return Err(PublisherError::UnknownSubscription { id });
        }
        channels.retain(|_, subscriptions| !subscriptions.is_empty());
        Ok(())
    }

    /// Remove every subscription on `channel`; returns how many were removed
    pub fn unsubscribe_channel(&self, channel: &ChannelName) -> usize {
        self.channels
            .lock()
            .remove(channel)
            .map_or(0, |subscriptions| subscriptions.len())
    }

    /// Append `delta` to every subscription on `channel`
    pub fn publish_to(&self, channel: &ChannelName, delta: &Delta) {
        let now = Instant::now();
        let mut channels = self.channels.lock();
        let Some(subscriptions) = channels.get_mut(channel) else {
            return;
        };

        for subscription in subscriptions.iter_mut() {
            self.counters.published.fetch_add(1, Ordering::Relaxed);
            let dropped = subscription.buffer.push(delta.clone(), now);
            self.record_dropped(channel, subscription.id, dropped);
            if subscription.buffer.len() >= self.config.flush_threshold {
                self.flush_subscription(channel, subscription, now);
            }
        }
        subscriptions.retain(|s| !s.closed);
    }

    /// Flush every subscription whose buffer is due
    pub fn flush_due(&self) {
        let now = Instant::now();
        let mut channels = self.channels.lock();
        for (channel, subscriptions) in channels.iter_mut() {
            for subscription in subscriptions.iter_mut() {
                if subscription.buffer.is_due(
                    now,
                    self.config.flush_threshold,
                    self.config.flush_interval,
                ) {
                    self.flush_subscription(channel, subscription, now);
                }
            }
            subscriptions.retain(|s| !s.closed);
        }
    }

    /// Flush every non-empty buffer regardless of timing
    pub fn flush_all(&self) {
        let now = Instant::now();
        let mut channels = self.channels.lock();
        for (channel, subscriptions) in channels.iter_mut() {
            for subscription in subscriptions.iter_mut() {
                if !subscription.buffer.is_empty() {
                    self.flush_subscription(channel, subscription, now);
                }
            }
            subscriptions.retain(|s| !s.closed);
        }
    }

    fn flush_subscription(&self, channel: &ChannelName, subscription: &mut Subscription, now: Instant) {
        let updates = subscription.buffer.begin_flush();
        if updates.is_empty() {
            subscription.buffer.finish_flush(Vec::new(), now);
            return;
        }

        let batch = DeltaBatch {
            channel: channel.clone(),
            updates,
            timestamp: Utc::now(),
        };
        match subscription.sender.try_send(batch) {
            Ok(()) => {
                self.counters.batches.fetch_add(1, Ordering::Relaxed);
                subscription.buffer.finish_flush(Vec::new(), now);
            }
            Err(mpsc::error::TrySendError::Full(batch)) => {
                let dropped = subscription.buffer.finish_flush(batch.updates, now);
                self.record_dropped(channel, subscription.id, dropped);
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!(subscription = %subscription.id, "Subscriber gone, removing");
                subscription.closed = true;
            }
        }
    }

    fn record_dropped(&self, channel: &ChannelName, id: SubscriptionId, dropped: usize) {
        if dropped == 0 {
            return;
        }
        let total = self
            .counters
            .dropped
            .fetch_add(dropped as u64, Ordering::Relaxed)
            + dropped as u64;
        warn!(
            channel = %channel,
            subscription = %id,
            dropped,
            deltas_dropped = total,
            "{}",
            log_messages::publisher::DELTAS_DROPPED
        );
    }

    /// Start the background flush timer
    pub fn start(self: &Arc<Self>) {
        let mut flusher = self.flusher.lock();
        if flusher.is_some() {
            return;
        }

        let publisher = Arc::clone(self);
        let mut shutdown = self.shutdown.subscribe();
        let tick = (self.config.flush_interval / 10).max(Duration::from_millis(5));
        *flusher = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(tick);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            info!("{}", log_messages::publisher::FLUSHER_STARTED);
            loop {
                tokio::select! {
                    _ = ticker.tick() => publisher.flush_due(),
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            info!("{}", log_messages::publisher::FLUSHER_STOPPED);
        }));
    }

    /// Stop the flush timer and flush whatever is still buffered
    pub async fn stop(&self) {
        let _ = self.shutdown.send(true);
        let handle = self.flusher.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!("Publisher flusher ended abnormally: {}", e);
            }
        }
        self.flush_all();
    }

    pub fn stats(&self) -> PublisherStats {
        PublisherStats {
            deltas_published: self.counters.published.load(Ordering::Relaxed),
            deltas_delivered: self.counters.delivered.load(Ordering::Relaxed),
            deltas_dropped: self.counters.dropped.load(Ordering::Relaxed),
            batches_sent: self.counters.batches.load(Ordering::Relaxed),
            subscriptions: self.channels.lock().values().map(Vec::len).sum(),
        }
    }
}

impl DeltaSink for RealTimePublisher {
    fn publish(&self, delta: Delta) {
        for channel in delta.channels() {
            self.publish_to(&channel, &delta);
        }
    }
}

impl std::fmt::Debug for RealTimePublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RealTimePublisher")
            .field("config", &self.config)
            .field("stats", &self.stats())
            .finish()
    }
}
