//! Fire-and-forget notification sink.
//!
//! Jobs hand events to a [`Notifier`]; a failed delivery is logged and never
//! reaches the job that produced it.

use rumqttc::{AsyncClient, QoS};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

pub const EVENT_TOPIC_PREFIX: &str = "meshmon/events";

pub trait Notifier: Send + Sync {
    fn broadcast(&self, event: &str, payload: Value);
}

/// Serializes `payload` and broadcasts it; a serialization failure is logged and dropped
pub fn publish<T: Serialize + ?Sized>(notifier: &dyn Notifier, event: &str, payload: &T) {
    match serde_json::to_value(payload) {
        Ok(value) => notifier.broadcast(event, value),
        Err(e) => warn!("cannot serialize {} payload: {}", event, e),
    }
}

pub fn event_topic(event: &str) -> String {
    format!("{}/{}@v1", EVENT_TOPIC_PREFIX, event)
}

/// Publishes each broadcast as JSON on `meshmon/events/<event>@v1`
pub struct MqttNotifier {
    client: AsyncClient,
}

impl MqttNotifier {
    pub fn new(client: AsyncClient) -> Self {
        Self { client }
    }
}

impl Notifier for MqttNotifier {
    fn broadcast(&self, event: &str, payload: Value) {
        let topic = event_topic(event);
        let body = payload.to_string();
        if let Err(e) = self.client.try_publish(&topic, QoS::AtLeastOnce, false, body) {
            warn!("dropping {} broadcast: {}", event, e);
        }
    }
}

/// Used when no broker is configured
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn broadcast(&self, event: &str, payload: Value) {
        debug!(event, %payload, "broadcast");
    }
}
