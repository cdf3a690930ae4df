//! Bounded lock-free ingestion queue using crossbeam's ArrayQueue
//!
//! Unlike a ring buffer this queue never overwrites: when it is full the
//! producer gets its event back inside a [`QueueFullError`] and decides
//! whether to retry or drop. Consumers suspend on a [`Notify`] until events
//! arrive or their batch deadline passes.

use crossbeam::queue::ArrayQueue;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Notify;
use tokio::time::{timeout_at, Instant};

use crate::domain::events::Event;

/// Returned when the queue has no free slot; carries the rejected event
#[derive(Debug, Error)]
#[error("Ingestion queue is full (capacity {capacity})")]
pub struct QueueFullError {
    pub capacity: usize,
    event: Box<Event>,
}

impl QueueFullError {
    /// Take the rejected event back so the producer can retry or drop it
    pub fn into_event(self) -> Event {
        *self.event
    }
}

/// Snapshot of queue counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct QueueStats {
    pub enqueued: u64,
    pub dequeued: u64,
    pub rejected: u64,
    pub depth: usize,
}

pub struct IngestionQueue {
    queue: ArrayQueue<Event>,
    available: Notify,
    space: Notify,
    enqueued: AtomicU64,
    dequeued: AtomicU64,
    rejected: AtomicU64,
}

impl IngestionQueue {
    /// Create a queue holding at most `capacity` events (minimum 1)
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: ArrayQueue::new(capacity.max(1)),
            available: Notify::new(),
            space: Notify::new(),
            enqueued: AtomicU64::new(0),
            dequeued: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
        }
    }

    /// Non-blocking enqueue
    pub fn enqueue(&self, event: Event) -> Result<(), QueueFullError> {
        match self.queue.push(event) {
            Ok(()) => {
                self.enqueued.fetch_add(1, Ordering::Relaxed);
                self.available.notify_one();
                Ok(())
            }
            Err(event) => {
                self.rejected.fetch_add(1, Ordering::Relaxed);
                Err(QueueFullError {
                    capacity: self.queue.capacity(),
                    event: Box::new(event),
                })
            }
        }
    }

    /// Enqueue, waiting up to `wait` for a consumer to free a slot
    pub async fn enqueue_with_wait(&self, event: Event, wait: Duration) -> Result<(), QueueFullError> {
        let deadline = Instant::now() + wait;
        let mut event = event;
        loop {
            let space = self.space.notified();
            tokio::pin!(space);
            space.as_mut().enable();

            match self.queue.push(event) {
                Ok(()) => {
                    self.enqueued.fetch_add(1, Ordering::Relaxed);
                    self.available.notify_one();
                    return Ok(());
                }
                Err(back) => event = back,
            }

            if timeout_at(deadline, space).await.is_err() {
                return self.enqueue(event);
            }
        }
    }

    /// Return up to `max_size` events, waiting at most `max_wait` to fill the batch
    ///
    /// The returned batch may be partial or empty. Events already popped are
    /// never lost to the deadline: the wait only happens between pops.
    pub async fn dequeue_batch(&self, max_size: usize, max_wait: Duration) -> Vec<Event> {
        let mut batch = Vec::with_capacity(max_size.min(self.queue.capacity()));
        if max_size == 0 {
            return batch;
        }

        let deadline = Instant::now() + max_wait;
        loop {
            let available = self.available.notified();
            tokio::pin!(available);
            available.as_mut().enable();

            self.drain_into(&mut batch, max_size);
            if batch.len() >= max_size {
                break;
            }

            if timeout_at(deadline, available).await.is_err() {
                self.drain_into(&mut batch, max_size);
                break;
            }
        }
        batch
    }

    /// Pop whatever is immediately available, up to `max_size`
    pub fn try_dequeue_batch(&self, max_size: usize) -> Vec<Event> {
        let mut batch = Vec::with_capacity(max_size.min(self.queue.len()));
        self.drain_into(&mut batch, max_size);
        batch
    }

    fn drain_into(&self, batch: &mut Vec<Event>, max_size: usize) {
        let before = batch.len();
        while batch.len() < max_size {
            match self.queue.pop() {
                Some(event) => batch.push(event),
                None => break,
            }
        }
        let popped = batch.len() - before;
        if popped > 0 {
            self.dequeued.fetch_add(popped as u64, Ordering::Relaxed);
            self.space.notify_waiters();
            if !self.queue.is_empty() {
                // hand the remainder to another waiting worker
                self.available.notify_one();
            }
        }
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats {
            enqueued: self.enqueued.load(Ordering::Relaxed),
            dequeued: self.dequeued.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            depth: self.queue.len(),
        }
    }
}

impl std::fmt::Debug for IngestionQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IngestionQueue")
            .field("capacity", &self.queue.capacity())
            .field("stats", &self.stats())
            .finish()
    }
}
