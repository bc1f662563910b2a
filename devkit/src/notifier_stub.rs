/*!
Recording notifier for tests without a broker

Stands in for the MQTT notifier: every broadcast is kept in memory, with the
topic it would have been published on, so tests can assert on what the
monitor told its clients.
*/

use meshmon_kernel::notify::{event_topic, Notifier};
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct RecordedBroadcast {
    pub event: String,
    pub topic: String,
    pub payload: Value,
}

#[derive(Clone, Default)]
pub struct RecordingNotifier {
    broadcasts: Arc<Mutex<Vec<RecordedBroadcast>>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_broadcasts(&self) -> Vec<RecordedBroadcast> {
        self.broadcasts.lock().clone()
    }

    /// Event names in broadcast order
    pub fn events(&self) -> Vec<String> {
        self.broadcasts.lock().iter().map(|b| b.event.clone()).collect()
    }

    /// Payloads broadcast under `event`, oldest first
    pub fn find_by_event(&self, event: &str) -> Vec<Value> {
        self.broadcasts
            .lock()
            .iter()
            .filter(|b| b.event == event)
            .map(|b| b.payload.clone())
            .collect()
    }

    pub fn count(&self, event: &str) -> usize {
        self.broadcasts.lock().iter().filter(|b| b.event == event).count()
    }

    pub fn last(&self, event: &str) -> Option<Value> {
        self.find_by_event(event).pop()
    }

    /// Polls until `event` has been broadcast or `timeout` passes
    pub async fn wait_for(&self, event: &str, timeout: Duration) -> Option<Value> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(v) = self.last(event) {
                return Some(v);
            }
            if tokio::time::Instant::now() >= deadline {
                log::warn!("timeout waiting for {}", event);
                return None;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    pub fn clear(&self) {
        self.broadcasts.lock().clear();
    }
}

impl Notifier for RecordingNotifier {
    fn broadcast(&self, event: &str, payload: Value) {
        let topic = event_topic(event);
        log::debug!("[stub] {} <- {}", topic, payload);
        self.broadcasts.lock().push(RecordedBroadcast { event: event.to_string(), topic, payload });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_records_in_order() {
        let notifier = RecordingNotifier::new();
        notifier.broadcast("scan_started", json!({ "timestamp": 1 }));
        notifier.broadcast("new_event", json!({ "id": 1 }));
        notifier.broadcast("new_event", json!({ "id": 2 }));

        assert_eq!(notifier.events(), vec!["scan_started", "new_event", "new_event"]);
        assert_eq!(notifier.count("new_event"), 2);
        assert_eq!(notifier.last("new_event").unwrap()["id"], 2);
        assert_eq!(notifier.get_broadcasts()[0].topic, "meshmon/events/scan_started@v1");

        notifier.clear();
        assert!(notifier.events().is_empty());
    }

    #[tokio::test]
    async fn test_wait_for_sees_later_broadcast() {
        let notifier = RecordingNotifier::new();
        let sender = notifier.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            sender.broadcast("ping_result", json!({ "success": true }));
        });
        let got = notifier.wait_for("ping_result", Duration::from_secs(2)).await;
        assert_eq!(got.unwrap()["success"], true);
        assert!(notifier.wait_for("never", Duration::from_millis(30)).await.is_none());
    }
}
