use std::collections::{HashSet, VecDeque};
use std::sync::Mutex;

use uuid::Uuid;

/// Consumer-side filter for at-least-once delivery.
///
/// Remembers the most recent `capacity` event ids and reports whether an
/// incoming event is seen for the first time.
pub struct Deduplicator {
    capacity: usize,
    seen: Mutex<Seen>,
}

#[derive(Default)]
struct Seen {
    ids: HashSet<Uuid>,
    order: VecDeque<Uuid>,
}

impl Default for Deduplicator {
    fn default() -> Self {
        Self::with_capacity(10_000)
    }
}

impl Deduplicator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            seen: Mutex::new(Seen::default()),
        }
    }

    /// `true` the first time `id` is offered, `false` for repeats still in the window.
    pub fn first_delivery(&self, id: Uuid) -> bool {
        let mut seen = match self.seen.lock() {
            Ok(seen) => seen,
            Err(poisoned) => poisoned.into_inner(),
        };

        if !seen.ids.insert(id) {
            return false;
        }
        seen.order.push_back(id);
        if seen.order.len() > self.capacity {
            if let Some(evicted) = seen.order.pop_front() {
                seen.ids.remove(&evicted);
            }
        }
        true
    }

    pub fn len(&self) -> usize {
        self.seen.lock().map(|s| s.ids.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
