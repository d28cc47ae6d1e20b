use log::{debug, info};
use serde_json::Value;
use tokio::sync::broadcast;

/// A dispatched global event.
#[derive(Debug, Clone, PartialEq)]
pub struct GlobalEvent {
    pub name: String,
    pub args: Value,
}

/// Receives events forwarded by the debug surface.
#[cfg_attr(test, mockall::automock)]
pub trait EventBus: Send + Sync {
    fn dispatch(&self, name: &str, args: &Value);
}

/// Fans events out to every subscriber over a broadcast channel.
pub struct BroadcastEventBus {
    sender: broadcast::Sender<GlobalEvent>,
}

impl BroadcastEventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<GlobalEvent> {
        self.sender.subscribe()
    }
}

impl Default for BroadcastEventBus {
    fn default() -> Self {
        Self::new(64)
    }
}

impl EventBus for BroadcastEventBus {
    fn dispatch(&self, name: &str, args: &Value) {
        info!("Dispatching event {}", name);
        let event = GlobalEvent {
            name: name.to_string(),
            args: args.clone(),
        };
        if self.sender.send(event).is_err() {
            debug!("No subscribers for event {}", name);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_dispatch_reaches_subscribers() {
        let bus = BroadcastEventBus::default();
        let mut first = bus.subscribe();
        let mut second = bus.subscribe();

        bus.dispatch("refresh", &json!({"force": true}));

        let expected = GlobalEvent {
            name: "refresh".into(),
            args: json!({"force": true}),
        };
        assert_eq!(first.try_recv().unwrap(), expected);
        assert_eq!(second.try_recv().unwrap(), expected);
    }

    #[test]
    fn test_dispatch_without_subscribers_is_fine() {
        BroadcastEventBus::new(4).dispatch("ignored", &Value::Null);
    }
}
