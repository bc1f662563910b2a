//! The assembled monitor: every subsystem plus the full scan sequence.

use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use tracing::{error, info, warn};

use crate::config::{MonitorConfig, RuntimeSettings};
use crate::discovery::DiscoveryEngine;
use crate::error::{ScanError, StoreError};
use crate::fetch::NodeFetcher;
use crate::lifecycle::Reconciler;
use crate::models::ScanReport;
use crate::notify::{publish, Notifier};
use crate::probe::Prober;
use crate::scan::ScanCoordinator;
use crate::sessions::LiveSessionManager;
use crate::store::Store;
use crate::telemetry::TelemetryService;
use crate::view::{network_graph, NetworkGraph};

#[derive(Serialize)]
struct ScanComplete<'a> {
    result: &'a ScanReport,
    network: &'a NetworkGraph,
}

pub struct Monitor {
    pub cfg: MonitorConfig,
    pub store: Arc<Store>,
    pub notifier: Arc<dyn Notifier>,
    pub discovery: DiscoveryEngine,
    pub reconciler: Reconciler,
    pub telemetry: Arc<TelemetryService>,
    pub sessions: Arc<LiveSessionManager>,
    pub scans: ScanCoordinator,
}

impl Monitor {
    pub fn new(
        cfg: MonitorConfig,
        store: Arc<Store>,
        fetcher: Arc<dyn NodeFetcher>,
        prober: Arc<dyn Prober>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let cfg = cfg.clamped();
        let telemetry = Arc::new(TelemetryService::new(
            store.clone(),
            prober.clone(),
            notifier.clone(),
            cfg.clone(),
        ));
        let sessions = Arc::new(LiveSessionManager::new(
            store.clone(),
            prober,
            notifier.clone(),
            Duration::from_millis(cfg.sessions.probe_interval_ms),
            cfg.sessions.probe_timeout_secs,
        ));
        Self {
            discovery: DiscoveryEngine::new(store.clone(), fetcher),
            reconciler: Reconciler::new(store.clone()),
            scans: ScanCoordinator::new(Duration::from_secs(cfg.min_scan_gap_secs)),
            telemetry,
            sessions,
            notifier,
            store,
            cfg,
        }
    }

    pub fn settings(&self) -> Result<RuntimeSettings, StoreError> {
        RuntimeSettings::load(&self.store, &self.cfg)
    }

    /// Discovery, reconciliation, event logging and broadcasts as one job.
    ///
    /// A scan already in progress is rejected without any broadcast; every
    /// other failure is broadcast as `scan_error` before being returned.
    pub async fn run_scan(&self, start_address: Option<&str>) -> Result<ScanReport, ScanError> {
        let guard = self.scans.try_begin().await?;
        self.notifier.broadcast(
            "scan_started",
            json!({ "timestamp": OffsetDateTime::now_utc().unix_timestamp() }),
        );

        match self.scan_once(start_address).await {
            Ok(report) => {
                guard.finish(&report);
                Ok(report)
            }
            Err(e) => {
                error!("scan failed: {}", e);
                self.notifier.broadcast("scan_error", json!({ "error": e.to_string() }));
                Err(e)
            }
        }
    }

    async fn scan_once(&self, start_address: Option<&str>) -> Result<ScanReport, ScanError> {
        let settings = self.settings()?;
        let discovery = self.discovery.discover(&settings, start_address, None).await?;
        let reconcile = self.reconciler.reconcile(
            time::Duration::seconds(self.cfg.link_timeout_secs as i64),
            time::Duration::seconds(self.cfg.link_remove_after_secs as i64),
        )?;
        let report = ScanReport { discovery, reconcile };

        let events: Vec<_> = report.all_events().cloned().collect();
        let stored = self.store.append_events(&events)?;
        if self.cfg.telemetry.enabled {
            self.telemetry.record_rf_snapshot(OffsetDateTime::now_utc())?;
        }

        if let Some(err) = &report.discovery.start_node_error {
            warn!("starting node unreachable: {}", err);
            self.notifier.broadcast(
                "starting_node_error",
                json!({ "error": err, "url": start_address.unwrap_or(&settings.starting_node) }),
            );
        }
        for link in &report.reconcile.dropped_links {
            publish(self.notifier.as_ref(), "link_dropped", link);
        }
        for node in &report.reconcile.inactive_nodes {
            publish(self.notifier.as_ref(), "node_inactive", node);
        }
        for ev in &stored {
            publish(self.notifier.as_ref(), "new_event", ev);
        }
        let network = network_graph(
            &self.store,
            &settings.starting_node,
            self.cfg.quality_good,
            self.cfg.quality_poor,
        )?;
        let complete = ScanComplete { result: &report, network: &network };
        publish(self.notifier.as_ref(), "scan_complete", &complete);

        info!(
            "scan complete: {} nodes, {} links, {} events",
            report.discovery.nodes_found,
            report.discovery.links_found,
            stored.len()
        );
        Ok(report)
    }

    /// Deletes events older than `days`
    pub fn clear_old_events(&self, days: i64) -> Result<usize, StoreError> {
        let cutoff = OffsetDateTime::now_utc() - time::Duration::days(days);
        let n = self.store.clear_events_before(cutoff)?;
        info!("cleared {} events older than {} days", n, days);
        Ok(n)
    }
}
