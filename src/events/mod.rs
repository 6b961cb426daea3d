//! Broadcast event bus (C7): fans every published event out to all current
//! subscribers. A subscriber that falls behind loses only its own backlog —
//! `tokio::sync::broadcast`'s `Lagged(n)` is exactly that isolation guarantee.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventMessage {
    HookTriggered {
        hook_id: String,
        project_name: Option<String>,
        success: bool,
        at: DateTime<Utc>,
    },
    GithookTriggered {
        project_name: String,
        branch: Option<String>,
        success: bool,
        skipped: bool,
        at: DateTime<Utc>,
    },
    VersionSwitched {
        project_name: String,
        ref_kind: String,
        ref_name: String,
        at: DateTime<Utc>,
    },
    ProjectManaged {
        project_name: String,
        action: String,
        actor: String,
        at: DateTime<Utc>,
    },
}

impl EventMessage {
    fn at(&self) -> DateTime<Utc> {
        match self {
            EventMessage::HookTriggered { at, .. }
            | EventMessage::GithookTriggered { at, .. }
            | EventMessage::VersionSwitched { at, .. }
            | EventMessage::ProjectManaged { at, .. } => *at,
        }
    }

    fn tag(&self) -> &'static str {
        match self {
            EventMessage::HookTriggered { .. } => "hook_triggered",
            EventMessage::GithookTriggered { .. } => "githook_triggered",
            EventMessage::VersionSwitched { .. } => "version_switched",
            EventMessage::ProjectManaged { .. } => "project_managed",
        }
    }

    /// The wire shape for the streaming subscription: `{type, timestamp,
    /// data}`, distinct from this type's own internally-tagged `Serialize`
    /// derive (used where the variant tag and fields are wanted flattened).
    pub fn envelope(&self) -> serde_json::Value {
        let mut data = serde_json::to_value(self).unwrap_or(serde_json::Value::Null);
        if let serde_json::Value::Object(map) = &mut data {
            map.remove("type");
            map.remove("at");
        }
        serde_json::json!({
            "type": self.tag(),
            "timestamp": self.at().to_rfc3339(),
            "data": data,
        })
    }
}

/// Shared handle injected into `AppState`; cheap to clone since it only
/// wraps the broadcast sender.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<EventMessage>,
}

impl EventBus {
    pub fn new(subscriber_buffer: usize) -> Self {
        let (sender, _) = broadcast::channel(subscriber_buffer.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EventMessage> {
        let receiver = self.sender.subscribe();
        crate::api::metrics::set_event_bus_subscribers(self.sender.receiver_count());
        receiver
    }

    /// Publish to all current subscribers. Returns the number that received
    /// it; zero is not an error, just means nobody is listening right now.
    pub fn publish(&self, event: EventMessage) -> usize {
        let delivered = self.sender.send(event).unwrap_or(0);
        crate::api::metrics::set_event_bus_subscribers(self.sender.receiver_count());
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_event() -> EventMessage {
        EventMessage::VersionSwitched {
            project_name: "site".to_string(),
            ref_kind: "branch".to_string(),
            ref_name: "main".to_string(),
            at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn all_current_subscribers_receive_a_published_event() {
        let bus = EventBus::new(8);
        let mut sub_a = bus.subscribe();
        let mut sub_b = bus.subscribe();

        bus.publish(sample_event());

        assert!(sub_a.recv().await.is_ok());
        assert!(sub_b.recv().await.is_ok());
    }

    #[tokio::test]
    async fn a_lagged_subscriber_does_not_affect_others() {
        let bus = EventBus::new(2);
        let mut slow = bus.subscribe();
        let mut fast = bus.subscribe();

        for _ in 0..5 {
            bus.publish(sample_event());
        }

        // `slow` missed messages dropped off the ring buffer; it should
        // observe a Lagged error rather than panicking or blocking.
        let first = slow.recv().await;
        assert!(matches!(first, Err(tokio::sync::broadcast::error::RecvError::Lagged(_))) || first.is_ok());

        assert!(fast.recv().await.is_ok());
    }

    #[tokio::test]
    async fn publish_with_no_subscribers_returns_zero_without_error() {
        let bus = EventBus::new(4);
        assert_eq!(bus.publish(sample_event()), 0);
    }

    #[test]
    fn envelope_nests_fields_under_data_with_a_timestamp_key() {
        let envelope = sample_event().envelope();
        assert_eq!(envelope["type"], "version_switched");
        assert!(envelope["timestamp"].is_string());
        assert_eq!(envelope["data"]["project_name"], "site");
        assert!(envelope["data"].get("at").is_none());
        assert!(envelope["data"].get("type").is_none());
    }
}
