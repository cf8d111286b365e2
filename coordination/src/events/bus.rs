//! Event bus for alert events
//!
//! Provides pub/sub messaging using Tokio broadcast channels, with an
//! optional [`EventHistory`] that records every published event.

use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::debug;

use super::history::SharedEventHistory;
use super::types::AlertEvent;

/// Channel capacity for broadcast
const CHANNEL_CAPACITY: usize = 256;

/// Error type for event bus operations
#[derive(Debug, thiserror::Error)]
pub enum EventBusError {
    #[error("Failed to record event: {0}")]
    RecordFailed(String),
}

/// Result type for event bus operations
pub type EventBusResult<T> = Result<T, EventBusError>;

/// Shared reference to EventBus
pub type SharedEventBus = Arc<EventBus>;

/// Event bus with broadcast channels and optional history
pub struct EventBus {
    /// Broadcast sender for publishing events
    sender: broadcast::Sender<AlertEvent>,

    /// Optional in-memory history
    history: Option<SharedEventHistory>,
}

impl EventBus {
    /// Create a new event bus without history
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            sender,
            history: None,
        }
    }

    /// Create an event bus that records into `history`
    pub fn with_history(history: SharedEventHistory) -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            sender,
            history: Some(history),
        }
    }

    /// Create a shared reference to this event bus
    pub fn shared(self) -> SharedEventBus {
        Arc::new(self)
    }

    pub fn history(&self) -> Option<&SharedEventHistory> {
        self.history.as_ref()
    }

    /// Publish an event to all subscribers
    pub fn publish(&self, event: AlertEvent) -> EventBusResult<()> {
        let event_type = event.event_type();
        let generation = event.generation();

        if let Some(history) = &self.history {
            history.record(event.clone())?;
        }

        // No receivers is fine; the history still has it.
        match self.sender.send(event) {
            Ok(count) => {
                debug!(event_type, generation, receivers = count, "Event published");
            }
            Err(_) => {
                debug!(event_type, generation, "Event published (no receivers)");
            }
        }
        Ok(())
    }

    /// Subscribe to receive events
    pub fn subscribe(&self) -> broadcast::Receiver<AlertEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::history::EventHistory;
    use crate::events::types::ResetReason;
    use chrono::Utc;

    fn reset(generation: u64) -> AlertEvent {
        AlertEvent::Reset {
            generation,
            reason: ResetReason::Manual,
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_publish_subscribe() {
        let bus = EventBus::new();
        let mut receiver = bus.subscribe();

        bus.publish(reset(1)).unwrap();

        let received = receiver.recv().await.unwrap();
        assert_eq!(received.event_type(), "reset");
    }

    #[tokio::test]
    async fn test_multiple_subscribers() {
        let bus = EventBus::new().shared();
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        bus.publish(reset(4)).unwrap();

        let e1 = rx1.recv().await.unwrap();
        let e2 = rx2.recv().await.unwrap();
        assert_eq!(e1, e2);
    }

    #[test]
    fn test_publish_without_subscribers_records_history() {
        let history = EventHistory::new(8).shared();
        let bus = EventBus::with_history(history.clone());

        bus.publish(reset(2)).unwrap();
        assert_eq!(history.for_generation(2).len(), 1);
    }
}
