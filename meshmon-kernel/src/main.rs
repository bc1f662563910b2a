use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use meshmon_kernel::config::load_config;
use meshmon_kernel::fetch::HttpFetcher;
use meshmon_kernel::health::{HealthTracker, STATUS_PERIOD};
use meshmon_kernel::monitor::Monitor;
use meshmon_kernel::mqtt::{create_mqtt_client, spawn_mqtt_listener};
use meshmon_kernel::notify::{MqttNotifier, Notifier, TracingNotifier};
use meshmon_kernel::probe::SystemProber;
use meshmon_kernel::scheduler::spawn_jobs;
use meshmon_kernel::store::Store;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("meshmon_kernel=info")),
        )
        .init();

    let cfg = load_config().await;
    info!("meshmon starting, entry node {}", cfg.starting_node);

    let store = Arc::new(
        Store::open(&cfg.database_path).with_context(|| format!("cannot open database {}", cfg.database_path))?,
    );
    let fetcher = Arc::new(
        HttpFetcher::new(Duration::from_secs(cfg.request_timeout_secs)).context("cannot build HTTP client")?,
    );
    let prober = Arc::new(SystemProber::new().context("cannot build probe client")?);
    let health = HealthTracker::new();

    let mqtt = if cfg.mqtt.enabled {
        let client_id = format!("meshmon-kernel-{}", uuid::Uuid::new_v4());
        Some(create_mqtt_client(&cfg.mqtt, &client_id))
    } else {
        warn!("MQTT disabled, broadcasts go to the log only");
        health.mark_mqtt_disabled();
        None
    };
    let notifier: Arc<dyn Notifier> = match &mqtt {
        Some((client, _)) => Arc::new(MqttNotifier::new(client.clone())),
        None => Arc::new(TracingNotifier),
    };

    let monitor = Arc::new(Monitor::new(cfg, store, fetcher, prober, notifier));
    let _jobs = spawn_jobs(monitor.clone());
    let _status = health.spawn_status_publisher(monitor.clone(), STATUS_PERIOD);
    if let Some((client, eventloop)) = mqtt {
        spawn_mqtt_listener(client, eventloop, monitor.clone(), health.clone());
    }

    tokio::signal::ctrl_c().await.context("cannot listen for shutdown signal")?;
    info!("shutting down");
    Ok(())
}
