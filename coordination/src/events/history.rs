//! Bounded in-memory event history

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use super::bus::{EventBusError, EventBusResult};
use super::types::AlertEvent;

/// Default number of events kept
pub const DEFAULT_HISTORY_CAPACITY: usize = 512;

/// Shared reference to EventHistory
pub type SharedEventHistory = Arc<EventHistory>;

/// Ring buffer of the most recent alert events.
pub struct EventHistory {
    capacity: usize,
    events: Mutex<VecDeque<AlertEvent>>,
}

impl EventHistory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            events: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    pub fn shared(self) -> SharedEventHistory {
        Arc::new(self)
    }

    /// Append an event, evicting the oldest when full
    pub fn record(&self, event: AlertEvent) -> EventBusResult<()> {
        let mut events = self
            .events
            .lock()
            .map_err(|e| EventBusError::RecordFailed(e.to_string()))?;
        if events.len() == self.capacity {
            events.pop_front();
        }
        events.push_back(event);
        Ok(())
    }

    /// Retained events of one alert run
    pub fn for_generation(&self, generation: u64) -> Vec<AlertEvent> {
        self.events
            .lock()
            .map(|events| {
                events
                    .iter()
                    .filter(|e| e.generation() == generation)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl Default for EventHistory {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}
