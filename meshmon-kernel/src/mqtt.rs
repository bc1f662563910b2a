use rumqttc::{AsyncClient, Event, EventLoop, Incoming, MqttOptions, QoS};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::MqttConf;
use crate::error::ScanError;
use crate::health::HealthTracker;
use crate::monitor::Monitor;

pub const COMMAND_TOPIC: &str = "meshmon/clients/command@v1";

/// A request from a connected UI client
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ClientCommand {
    pub client_id: String,
    #[serde(flatten)]
    pub action: ClientAction,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ClientAction {
    StartNodePing { node: String },
    StopNodePing,
    Disconnect,
    RequestScan,
}

pub fn create_mqtt_client(cfg: &MqttConf, client_id: &str) -> (AsyncClient, EventLoop) {
    let mut opts = MqttOptions::new(client_id, &cfg.host, cfg.port);
    opts.set_keep_alive(Duration::from_secs(15));
    AsyncClient::new(opts, 64)
}

/// Answers one client command through the monitor's notifier
pub async fn handle_command(monitor: &Arc<Monitor>, cmd: ClientCommand) {
    let client_id = cmd.client_id;
    let notifier = monitor.notifier.as_ref();
    match cmd.action {
        ClientAction::StartNodePing { node } => match monitor.sessions.start(&client_id, &node) {
            Ok(handle) => notifier.broadcast(
                "ping_started",
                json!({ "client_id": client_id, "node": handle.node, "ip": handle.ip }),
            ),
            Err(e) => {
                warn!("client {} cannot ping {:?}: {}", client_id, node, e);
                notifier.broadcast("ping_error", json!({ "client_id": client_id, "error": e.to_string() }));
            }
        },
        ClientAction::StopNodePing => {
            monitor.sessions.stop(&client_id);
            notifier.broadcast("ping_stopped", json!({ "client_id": client_id }));
        }
        ClientAction::Disconnect => {
            monitor.sessions.disconnect(&client_id);
            debug!("client {} disconnected", client_id);
        }
        ClientAction::RequestScan => {
            if monitor.scans.is_scanning() {
                notifier.broadcast(
                    "scan_acknowledged",
                    json!({ "client_id": client_id, "accepted": false, "reason": "scan already in progress" }),
                );
                return;
            }
            notifier.broadcast("scan_acknowledged", json!({ "client_id": client_id, "accepted": true }));
            let monitor = Arc::clone(monitor);
            tokio::spawn(async move {
                match monitor.run_scan(None).await {
                    Ok(_) => {}
                    Err(ScanError::AlreadyScanning) => debug!("manual scan coalesced into running scan"),
                    Err(e) => error!("manual scan failed: {}", e),
                }
            });
        }
    }
}

/// Drives the MQTT event loop: keeps the notifier's publishes flowing and dispatches client commands
pub fn spawn_mqtt_listener(
    client: AsyncClient,
    mut eventloop: EventLoop,
    monitor: Arc<Monitor>,
    health: HealthTracker,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                    info!("MQTT connected");
                    health.mark_mqtt_connected();
                    // subscriptions do not survive a reconnect with a clean session
                    if let Err(e) = client.try_subscribe(COMMAND_TOPIC, QoS::AtLeastOnce) {
                        error!("subscribe {} failed: {:?}", COMMAND_TOPIC, e);
                    }
                }
                Ok(Event::Incoming(Incoming::Publish(p))) if p.topic == COMMAND_TOPIC => {
                    match serde_json::from_slice::<ClientCommand>(&p.payload) {
                        Ok(cmd) => handle_command(&monitor, cmd).await,
                        Err(e) => warn!("invalid client command: {}", e),
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    warn!("MQTT error: {:?}", e);
                    health.increment_reconnects();
                    tokio::time::sleep(Duration::from_secs(2)).await;
                }
            }
        }
    })
}
