use std::collections::VecDeque;

use crate::event::SyncEvent;

pub const MIN_EVENT_LOG: usize = 20;
pub const MAX_EVENT_LOG: usize = 200;
pub const DEFAULT_EVENT_LOG: usize = 50;

/// Newest-first event history with a fixed retention window.
#[derive(Debug, Clone)]
pub struct EventLog {
    capacity: usize,
    entries: VecDeque<SyncEvent>,
}

impl Default for EventLog {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_EVENT_LOG)
    }
}

impl EventLog {
    /// Capacity is clamped to the 20..=200 window.
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.clamp(MIN_EVENT_LOG, MAX_EVENT_LOG);
        Self {
            capacity,
            entries: VecDeque::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, event: SyncEvent) {
        self.entries.push_front(event);
        self.entries.truncate(self.capacity);
    }

    /// Newest first.
    pub fn iter(&self) -> impl Iterator<Item = &SyncEvent> {
        self.entries.iter()
    }

    pub fn latest(&self) -> Option<&SyncEvent> {
        self.entries.front()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventPayload;

    #[test]
    fn test_evicts_oldest() {
        let mut log = EventLog::with_capacity(20);
        for n in 0..25u64 {
            log.push(SyncEvent::new(EventPayload::Heartbeat { latency_ms: n }));
        }
        assert_eq!(log.len(), 20);
        assert_eq!(
            log.latest().map(|e| &e.payload),
            Some(&EventPayload::Heartbeat { latency_ms: 24 })
        );
        assert_eq!(
            log.iter().last().map(|e| &e.payload),
            Some(&EventPayload::Heartbeat { latency_ms: 5 })
        );
    }

    #[test]
    fn test_capacity_is_clamped() {
        assert_eq!(EventLog::with_capacity(1).capacity(), MIN_EVENT_LOG);
        assert_eq!(EventLog::with_capacity(10_000).capacity(), MAX_EVENT_LOG);
    }
}
