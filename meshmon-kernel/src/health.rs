use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use time::OffsetDateTime;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::StoreError;
use crate::models::LinkStatus;
use crate::monitor::Monitor;
use crate::notify::publish;
use crate::telemetry::TelemetrySummary;

pub const STATUS_PERIOD: Duration = Duration::from_secs(30);

#[derive(Debug, Serialize)]
pub struct MonitorStatus {
    pub uptime_seconds: u64,
    pub is_scanning: bool,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_scan: Option<OffsetDateTime>,
    pub node_count: usize,
    pub active_link_count: usize,
    pub live_sessions: usize,
    pub telemetry: TelemetrySummary,
    pub mqtt_status: String,
    pub mqtt_reconnects: u32,
}

#[derive(Clone)]
pub struct HealthTracker {
    start_time: Instant,
    mqtt_reconnects: Arc<AtomicU32>,
    mqtt_status: Arc<Mutex<String>>,
}

impl Default for HealthTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthTracker {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            mqtt_reconnects: Arc::new(AtomicU32::new(0)),
            mqtt_status: Arc::new(Mutex::new("connecting".to_string())),
        }
    }

    pub fn mark_mqtt_connected(&self) {
        *self.mqtt_status.lock() = "connected".to_string();
    }

    pub fn mark_mqtt_disabled(&self) {
        *self.mqtt_status.lock() = "disabled".to_string();
    }

    pub fn increment_reconnects(&self) {
        self.mqtt_reconnects.fetch_add(1, Ordering::Relaxed);
        *self.mqtt_status.lock() = "reconnecting".to_string();
    }

    pub fn status(&self, monitor: &Monitor) -> Result<MonitorStatus, StoreError> {
        Ok(MonitorStatus {
            uptime_seconds: self.start_time.elapsed().as_secs(),
            is_scanning: monitor.scans.is_scanning(),
            last_scan: monitor.scans.last_scan(),
            node_count: monitor.store.count_nodes(true)?,
            active_link_count: monitor.store.count_links(LinkStatus::Good)?,
            live_sessions: monitor.sessions.active_count(),
            telemetry: monitor.telemetry.summary()?,
            mqtt_status: self.mqtt_status.lock().clone(),
            mqtt_reconnects: self.mqtt_reconnects.load(Ordering::Relaxed),
        })
    }

    /// Publishes `monitor_status` every `period`
    pub fn spawn_status_publisher(&self, monitor: Arc<Monitor>, period: Duration) -> JoinHandle<()> {
        let tracker = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                match tracker.status(&monitor) {
                    Ok(status) => {
                        debug!(
                            "status: uptime {}s, {} nodes, {} links",
                            status.uptime_seconds, status.node_count, status.active_link_count
                        );
                        publish(monitor.notifier.as_ref(), "monitor_status", &status);
                    }
                    Err(e) => warn!("cannot compute status: {}", e),
                }
            }
        })
    }
}
