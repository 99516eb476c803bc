//! Process-wide event bus
//!
//! A thin wrapper over a bounded broadcast channel carrying `MetricEvent`
//! values to any number of subscribers (persistence recorder, realtime
//! broadcaster, tests). Publishing never blocks: with no subscribers the
//! event is dropped, and a subscriber that falls behind loses the oldest
//! events rather than slowing producers down.

use crate::events::MetricEvent;
use tokio::sync::broadcast;

/// Default capacity of the broadcast channel per subscriber
const BUS_CAPACITY: usize = 256;

/// Publish/subscribe channel for metric events
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<MetricEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    /// Create a new bus with the default capacity
    pub fn new() -> Self {
        Self::with_capacity(BUS_CAPACITY)
    }

    /// Create a new bus with an explicit per-subscriber capacity
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all current subscribers
    ///
    /// A send with no subscribers is not an error; the event is simply
    /// dropped.
    pub fn emit(&self, event: MetricEvent) {
        let _ = self.sender.send(event);
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<MetricEvent> {
        self.sender.subscribe()
    }

    /// Number of currently attached subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}
