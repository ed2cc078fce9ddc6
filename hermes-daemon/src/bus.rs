//! Broadcast fan-out for [`SyncEvent`]s inside the daemon.

use hermes_sync::{EventPublisher, SyncEvent};
use tokio::sync::broadcast;

/// Lagging subscribers lose the oldest events first.
pub const EVENT_BUS_CAPACITY: usize = 64;

#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<SyncEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(EVENT_BUS_CAPACITY)
    }
}

impl EventPublisher for EventBus {
    fn publish(&self, event: SyncEvent) {
        // No subscribers is not an error.
        let delivered = self.tx.send(event).unwrap_or(0);
        tracing::debug!(event = event.name(), delivered, "event published");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_published_events() {
        let bus = EventBus::default();
        bus.publish(SyncEvent::DataUpdated { critical: false });

        let mut rx = bus.subscribe();
        bus.publish(SyncEvent::DataUpdated { critical: true });
        assert_eq!(
            rx.recv().await.unwrap(),
            SyncEvent::DataUpdated { critical: true }
        );
        assert_eq!(bus.subscriber_count(), 1);
    }
}
