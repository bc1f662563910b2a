//! Static configuration (YAML) and runtime settings overrides.
//!
//! The YAML file gives defaults for everything; the settings table in the
//! store overrides a handful of keys at runtime. Jobs call
//! [`RuntimeSettings::load`] at their start so an override takes effect on the
//! next run without a restart.

use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::fs;
use tracing::{info, warn};

use crate::error::{ConfigError, StoreError};
use crate::store::Store;

pub const DEFAULT_STARTING_NODE: &str =
    "http://localnode.local.mesh/cgi-bin/sysinfo.json?lqm=1&hosts=1&services=1&services_local=1";

pub const MAX_DEPTH_RANGE: (u32, u32) = (1, 20);
pub const POLL_INTERVAL_RANGE: (u64, u64) = (10, 600);

pub const SETTING_STARTING_NODE: &str = "starting_node";
pub const SETTING_SHOW_TUNNELS: &str = "show_tunnels";
pub const SETTING_MAX_DEPTH: &str = "max_depth";
pub const SETTING_POLL_INTERVAL: &str = "poll_interval";
pub const SETTING_AUTO_SCAN: &str = "auto_scan";

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct MonitorConfig {
    pub database_path: String,
    pub starting_node: String,
    pub poll_interval_secs: u64,
    pub link_timeout_secs: u64,
    pub link_remove_after_secs: u64,
    pub quality_good: i64,
    pub quality_poor: i64,
    pub show_tunnels: bool,
    pub max_depth: u32,
    pub request_timeout_secs: u64,
    pub min_scan_gap_secs: u64,
    pub initial_scan_delay_secs: u64,
    pub mqtt: MqttConf,
    pub telemetry: TelemetryConf,
    pub sessions: SessionConf,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct MqttConf {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct TelemetryConf {
    pub enabled: bool,
    pub ping_count: u32,
    pub ping_timeout_secs: u64,
    pub ping_interval_secs: u64,
    pub throughput_interval_secs: u64,
    pub throughput_quality_threshold: i64,
    pub throughput_duration_secs: u64,
    pub throughput_bandwidth: String,
    pub history_retention_hours: i64,
    pub prune_interval_secs: u64,
    pub round_budget_secs: f64,
    pub max_stagger_secs: f64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct SessionConf {
    pub probe_interval_ms: u64,
    pub probe_timeout_secs: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            database_path: "meshmon.db".into(),
            starting_node: DEFAULT_STARTING_NODE.into(),
            poll_interval_secs: 30,
            link_timeout_secs: 300,
            link_remove_after_secs: 600,
            quality_good: 70,
            quality_poor: 40,
            show_tunnels: false,
            max_depth: 5,
            request_timeout_secs: 10,
            min_scan_gap_secs: 10,
            initial_scan_delay_secs: 5,
            mqtt: MqttConf::default(),
            telemetry: TelemetryConf::default(),
            sessions: SessionConf::default(),
        }
    }
}

impl MonitorConfig {
    /// Raises zero periods to the smallest usable value
    pub fn clamped(mut self) -> Self {
        self.poll_interval_secs = self.poll_interval_secs.max(1);
        self.telemetry.ping_interval_secs = self.telemetry.ping_interval_secs.max(1);
        self.telemetry.throughput_interval_secs = self.telemetry.throughput_interval_secs.max(1);
        self.telemetry.prune_interval_secs = self.telemetry.prune_interval_secs.max(1);
        self.sessions.probe_interval_ms = self.sessions.probe_interval_ms.max(1);
        self
    }
}

impl Default for MqttConf {
    fn default() -> Self {
        Self { enabled: true, host: "localhost".into(), port: 1883 }
    }
}

impl Default for TelemetryConf {
    fn default() -> Self {
        Self {
            enabled: true,
            ping_count: 5,
            ping_timeout_secs: 5,
            ping_interval_secs: 60,
            throughput_interval_secs: 300,
            throughput_quality_threshold: 50,
            throughput_duration_secs: 5,
            throughput_bandwidth: "10M".into(),
            history_retention_hours: 24,
            prune_interval_secs: 3600,
            round_budget_secs: 50.0,
            max_stagger_secs: 5.0,
        }
    }
}

impl Default for SessionConf {
    fn default() -> Self {
        Self { probe_interval_ms: 1000, probe_timeout_secs: 2 }
    }
}

/// Loads the YAML config named by `MESHMON_CONFIG` (default `meshmon.yaml`).
/// A missing, empty or invalid file falls back to defaults.
pub async fn load_config() -> MonitorConfig {
    let path = std::env::var("MESHMON_CONFIG").unwrap_or_else(|_| "meshmon.yaml".into());
    match read_config(&path).await {
        Ok(Some(cfg)) => {
            info!("loaded config from {}", path);
            cfg.clamped()
        }
        Ok(None) => {
            warn!("no config at {}, using defaults", path);
            MonitorConfig::default()
        }
        Err(e) => {
            warn!("invalid config {}: {}, using defaults", path, e);
            MonitorConfig::default()
        }
    }
}

async fn read_config(path: &str) -> Result<Option<MonitorConfig>, ConfigError> {
    if !Path::new(path).exists() {
        return Ok(None);
    }
    let txt = fs::read_to_string(path).await?;
    if txt.trim().is_empty() {
        return Ok(None);
    }
    Ok(Some(serde_yaml::from_str(&txt)?))
}

/// Effective values for one job run: static config overlaid with stored settings
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RuntimeSettings {
    pub starting_node: String,
    pub show_tunnels: bool,
    pub max_depth: u32,
    pub poll_interval_secs: u64,
    pub auto_scan: bool,
}

impl RuntimeSettings {
    pub fn load(store: &Store, cfg: &MonitorConfig) -> Result<Self, StoreError> {
        let starting_node = store
            .get_setting(SETTING_STARTING_NODE)?
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| cfg.starting_node.clone());
        // the stored flag can only widen visibility, never hide what the config shows
        let show_tunnels = cfg.show_tunnels
            || store
                .get_setting(SETTING_SHOW_TUNNELS)?
                .map(|v| parse_flag(&v))
                .unwrap_or(false);
        let max_depth = store
            .get_setting(SETTING_MAX_DEPTH)?
            .and_then(|v| v.trim().parse::<i64>().ok())
            .map(clamp_max_depth)
            .unwrap_or_else(|| clamp_max_depth(cfg.max_depth as i64));
        let poll_interval_secs = store
            .get_setting(SETTING_POLL_INTERVAL)?
            .and_then(|v| v.trim().parse::<i64>().ok())
            .map(clamp_poll_interval)
            .unwrap_or_else(|| clamp_poll_interval(cfg.poll_interval_secs as i64));
        let auto_scan = store
            .get_setting(SETTING_AUTO_SCAN)?
            .map(|v| parse_flag(&v))
            .unwrap_or(true);

        Ok(Self { starting_node, show_tunnels, max_depth, poll_interval_secs, auto_scan })
    }
}

/// Partial settings update, as sent by an operator
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SettingsUpdate {
    pub starting_node: Option<String>,
    pub show_tunnels: Option<bool>,
    pub max_depth: Option<i64>,
    pub poll_interval: Option<i64>,
    pub auto_scan: Option<bool>,
}

/// Writes an update, clamping numeric values into their safe range
pub fn apply_settings_update(store: &Store, update: &SettingsUpdate) -> Result<(), StoreError> {
    if let Some(url) = &update.starting_node {
        store.set_setting(SETTING_STARTING_NODE, url)?;
        info!("starting node updated to {}", url);
    }
    if let Some(show) = update.show_tunnels {
        store.set_setting(SETTING_SHOW_TUNNELS, flag(show))?;
        info!("show tunnels updated to {}", show);
    }
    if let Some(depth) = update.max_depth {
        let depth = clamp_max_depth(depth);
        store.set_setting(SETTING_MAX_DEPTH, &depth.to_string())?;
        info!("max depth updated to {}", depth);
    }
    if let Some(interval) = update.poll_interval {
        let interval = clamp_poll_interval(interval);
        store.set_setting(SETTING_POLL_INTERVAL, &interval.to_string())?;
        info!("poll interval updated to {}s", interval);
    }
    if let Some(auto) = update.auto_scan {
        store.set_setting(SETTING_AUTO_SCAN, flag(auto))?;
        info!("auto scan updated to {}", auto);
    }
    Ok(())
}

pub fn clamp_max_depth(depth: i64) -> u32 {
    depth.clamp(MAX_DEPTH_RANGE.0 as i64, MAX_DEPTH_RANGE.1 as i64) as u32
}

pub fn clamp_poll_interval(secs: i64) -> u64 {
    secs.clamp(POLL_INTERVAL_RANGE.0 as i64, POLL_INTERVAL_RANGE.1 as i64) as u64
}

fn parse_flag(v: &str) -> bool {
    v.trim().eq_ignore_ascii_case("true")
}

fn flag(v: bool) -> &'static str {
    if v { "true" } else { "false" }
}
