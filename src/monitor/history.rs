use super::types::LockEvent;
use std::collections::VecDeque;

/// Bounded FIFO of events; the oldest entry is dropped once full.
#[derive(Debug)]
pub(crate) struct EventHistory {
    events: VecDeque<LockEvent>,
    capacity: usize,
}

impl EventHistory {
    pub(crate) fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            events: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub(crate) fn push(&mut self, event: LockEvent) {
        if self.events.len() == self.capacity {
            self.events.pop_front();
        }
        self.events.push_back(event);
    }

    /// Up to `limit` events, most recent first. `None` returns everything.
    pub(crate) fn recent(&self, limit: Option<usize>) -> Vec<LockEvent> {
        let limit = limit.unwrap_or(self.events.len());
        self.events.iter().rev().take(limit).cloned().collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.events.len()
    }
}
