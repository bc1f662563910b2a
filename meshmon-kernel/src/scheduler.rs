//! Background jobs: periodic scans and, when telemetry is enabled, latency
//! rounds, throughput tests and history pruning.

use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::error::ScanError;
use crate::monitor::Monitor;
use crate::telemetry::ProcessOutcome;

pub fn spawn_jobs(monitor: Arc<Monitor>) -> Vec<JoinHandle<()>> {
    let mut jobs = vec![spawn_scan_loop(monitor.clone())];
    let t = &monitor.cfg.telemetry;
    if t.enabled {
        info!(
            "telemetry enabled: ping every {}s, throughput every {}s",
            t.ping_interval_secs, t.throughput_interval_secs
        );
        jobs.push(spawn_latency_loop(monitor.clone(), Duration::from_secs(t.ping_interval_secs)));
        jobs.push(spawn_throughput_loop(monitor.clone(), Duration::from_secs(t.throughput_interval_secs)));
        jobs.push(spawn_prune_loop(monitor.clone(), Duration::from_secs(t.prune_interval_secs)));
    } else {
        info!("telemetry disabled");
    }
    jobs
}

/// Scans repeatedly; the interval and auto-scan flag are re-read every cycle
fn spawn_scan_loop(monitor: Arc<Monitor>) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(monitor.cfg.initial_scan_delay_secs)).await;
        loop {
            let settings = match monitor.settings() {
                Ok(s) => s,
                Err(e) => {
                    error!("cannot read settings: {}", e);
                    tokio::time::sleep(Duration::from_secs(monitor.cfg.poll_interval_secs)).await;
                    continue;
                }
            };
            if settings.auto_scan {
                match monitor.run_scan(None).await {
                    Ok(_) => {}
                    Err(ScanError::AlreadyScanning) => debug!("scheduled scan skipped: scan in progress"),
                    Err(e) => warn!("scheduled scan failed: {}", e),
                }
            } else {
                debug!("auto scan disabled");
            }
            tokio::time::sleep(Duration::from_secs(settings.poll_interval_secs)).await;
        }
    })
}

fn spawn_latency_loop(monitor: Arc<Monitor>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            if let Err(e) = monitor.telemetry.run_latency_round().await {
                error!("ping round failed: {}", e);
            }
        }
    })
}

fn spawn_throughput_loop(monitor: Arc<Monitor>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            match monitor.telemetry.enqueue_all_eligible() {
                Ok(n) if n > 0 => debug!("queued {} throughput tests", n),
                Ok(_) => {}
                Err(e) => {
                    error!("cannot queue throughput tests: {}", e);
                    continue;
                }
            }
            match monitor.telemetry.process_one().await {
                ProcessOutcome::Busy => debug!("throughput test already running"),
                ProcessOutcome::Skipped(reason) => debug!("throughput test skipped: {}", reason),
                _ => {}
            }
        }
    })
}

fn spawn_prune_loop(monitor: Arc<Monitor>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            if let Err(e) = monitor.telemetry.prune_history(OffsetDateTime::now_utc()) {
                error!("history prune failed: {}", e);
            }
        }
    })
}
