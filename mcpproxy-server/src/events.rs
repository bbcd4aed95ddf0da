//! Server-sent events for the control plane

use chrono::Utc;
use serde_json::{json, Value};
use tokio::sync::broadcast;

/// Fan-out hub behind `GET /events`. Lossy by design: slow consumers skip
/// ahead rather than stalling publishers.
#[derive(Clone)]
pub struct EventHub {
    sender: broadcast::Sender<Value>,
}

impl Default for EventHub {
    fn default() -> Self {
        let (sender, _) = broadcast::channel(64);
        Self { sender }
    }
}

impl EventHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Value> {
        self.sender.subscribe()
    }

    /// Publish a status event; `running` reflects overall server health
    pub fn publish_status(&self, running: bool, extra: Value) {
        let mut event = json!({
            "running": running,
            "timestamp": Utc::now(),
        });
        if let (Value::Object(target), Value::Object(source)) = (&mut event, extra) {
            for (key, value) in source {
                target.insert(key, value);
            }
        }
        let _ = self.sender.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_reaches_subscriber() {
        let hub = EventHub::new();
        let mut receiver = hub.subscribe();

        hub.publish_status(true, json!({"servers_connected": 2}));

        let event = receiver.recv().await.unwrap();
        assert_eq!(event["running"], json!(true));
        assert_eq!(event["servers_connected"], json!(2));
        assert!(event.get("timestamp").is_some());
    }
}
