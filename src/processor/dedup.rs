//! Sliding window of recently seen event ids

use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use crate::domain::events::EventId;

/// Bounded set of event ids seen within the last `window`
///
/// Ids expire once they are older than the window, and the oldest ids are
/// evicted early when `capacity` is reached. Shared by all workers.
#[derive(Debug)]
pub struct DedupWindow {
    window: Duration,
    capacity: usize,
    inner: Mutex<DedupState>,
}

#[derive(Debug, Default)]
struct DedupState {
    seen: HashMap<EventId, Instant>,
    order: VecDeque<(EventId, Instant)>,
}

impl DedupState {
    /// Drop expired ids, then the oldest ones until fewer than `limit` remain
    fn evict(&mut self, now: Instant, window: Duration, limit: usize) {
        while let Some((id, seen_at)) = self.order.front() {
            let expired = now.saturating_duration_since(*seen_at) > window;
            if !expired && self.seen.len() < limit {
                break;
            }
            // only drop the map entry if it still refers to this observation
            if self.seen.get(id) == Some(seen_at) {
                self.seen.remove(id);
            }
            self.order.pop_front();
        }
    }
}

impl DedupWindow {
    pub fn new(window: Duration, capacity: usize) -> Self {
        Self {
            window,
            capacity: capacity.max(1),
            inner: Mutex::new(DedupState::default()),
        }
    }

    /// Record `id`; returns `false` if it was already seen within the window
    pub fn observe(&self, id: &EventId) -> bool {
        self.observe_at(id, Instant::now())
    }

    pub fn observe_at(&self, id: &EventId, now: Instant) -> bool {
        let mut state = self.inner.lock();
        state.evict(now, self.window, usize::MAX);
        if state.seen.contains_key(id) {
            return false;
        }
        state.evict(now, self.window, self.capacity);
        state.seen.insert(id.clone(), now);
        state.order.push_back((id.clone(), now));
        true
    }

    pub fn len(&self) -> usize {
        self.inner.lock().seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
