//! Per-subscription delta buffer
//!
//! Each subscription moves through `Idle -> Buffering -> Flushing -> Idle`.
//! The buffer is capped: when a slow consumer lets it fill up, the oldest
//! deltas are dropped instead of blocking the publisher.

use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;

use crate::publisher::delta::Delta;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferState {
    Idle,
    Buffering { since: Instant },
    Flushing,
}

#[derive(Debug)]
pub struct DeltaBuffer {
    state: BufferState,
    pending: VecDeque<Delta>,
    max_buffer: usize,
}

impl DeltaBuffer {
    pub fn new(max_buffer: usize) -> Self {
        Self {
            state: BufferState::Idle,
            pending: VecDeque::new(),
            max_buffer: max_buffer.max(1),
        }
    }

    pub fn state(&self) -> BufferState {
        self.state
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Append a delta; returns how many old deltas were dropped to make room
    pub fn push(&mut self, delta: Delta, now: Instant) -> usize {
        if self.state == BufferState::Idle {
            self.state = BufferState::Buffering { since: now };
        }
        self.pending.push_back(delta);
        self.enforce_cap()
    }

    /// Due when the threshold is reached or the oldest buffered delta has
    /// waited a full interval
    pub fn is_due(&self, now: Instant, threshold: usize, interval: Duration) -> bool {
        match self.state {
            BufferState::Buffering { since } => {
                self.pending.len() >= threshold || now.saturating_duration_since(since) >= interval
            }
            BufferState::Idle | BufferState::Flushing => false,
        }
    }

    /// Take every buffered delta, in timestamp order
    pub fn begin_flush(&mut self) -> Vec<Delta> {
        self.state = BufferState::Flushing;
        let mut updates: Vec<Delta> = self.pending.drain(..).collect();
        updates.sort_by_key(|delta| delta.timestamp);
        updates
    }

    /// Complete a flush; `undelivered` deltas go back to the front of the buffer
    ///
    /// Returns how many deltas were dropped to respect the cap.
    pub fn finish_flush(&mut self, undelivered: Vec<Delta>, now: Instant) -> usize {
        for delta in undelivered.into_iter().rev() {
            self.pending.push_front(delta);
        }
        let dropped = self.enforce_cap();
        self.state = if self.pending.is_empty() {
            BufferState::Idle
        } else {
            BufferState::Buffering { since: now }
        };
        dropped
    }

    fn enforce_cap(&mut self) -> usize {
        let excess = self.pending.len().saturating_sub(self.max_buffer);
        self.pending.drain(..excess);
        excess
    }
}
