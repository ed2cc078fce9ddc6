//! In-process notification that fresh data has been stored.

use serde::{Deserialize, Serialize};

/// Published after every successful run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SyncEvent {
    DataUpdated { critical: bool },
}

impl SyncEvent {
    pub fn name(&self) -> &'static str {
        match self {
            SyncEvent::DataUpdated { .. } => "data_updated",
        }
    }
}

/// Fan-out seam for [`SyncEvent`]s. Must not block.
pub trait EventPublisher: Send + Sync {
    fn publish(&self, event: SyncEvent);
}

/// Drops every event. Used by one-shot runs with no listeners.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopPublisher;

impl EventPublisher for NoopPublisher {
    fn publish(&self, event: SyncEvent) {
        tracing::trace!(event = event.name(), "no listeners");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_updated_wire_shape() {
        let json = serde_json::to_string(&SyncEvent::DataUpdated { critical: true }).unwrap();
        assert_eq!(json, r#"{"event":"data_updated","critical":true}"#);
        assert_eq!(SyncEvent::DataUpdated { critical: false }.name(), "data_updated");
    }
}
