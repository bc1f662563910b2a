//! Scheduled RF telemetry: staggered latency rounds, a single-flight
//! throughput queue, history snapshots and pruning, plus on-demand probes.

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use tracing::{debug, info, warn};

use crate::config::{MonitorConfig, RuntimeSettings};
use crate::error::{SessionError, StoreError};
use crate::fetch::host_of;
use crate::notify::{publish, Notifier};
use crate::probe::{mesh_qualified, LatencyResult, Prober, ThroughputResult};
use crate::store::Store;

pub const DEFAULT_PRIORITY: i32 = 5;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueuedTest {
    pub source: String,
    pub target: String,
    pub priority: i32,
    #[serde(with = "time::serde::rfc3339")]
    pub enqueued_at: OffsetDateTime,
}

#[derive(Default)]
struct QueueState {
    pending: Vec<QueuedTest>,
    running: bool,
}

/// Pending throughput tests, deduplicated by pair, with a system-wide running flag
#[derive(Default)]
pub struct ThroughputQueue {
    state: Mutex<QueueState>,
}

/// Why [`ThroughputQueue::begin`] did not hand out a test
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueIdle {
    Busy,
    Empty,
}

/// Holds the running flag; dropping it clears the flag
pub struct RunningGuard<'a> {
    queue: &'a ThroughputQueue,
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.queue.state.lock().running = false;
    }
}

impl ThroughputQueue {
    /// Adds a test unless the pair is already queued
    pub fn enqueue(&self, source: &str, target: &str, priority: i32) -> bool {
        let mut st = self.state.lock();
        if st.pending.iter().any(|t| t.source == source && t.target == target) {
            return false;
        }
        st.pending.push(QueuedTest {
            source: source.to_string(),
            target: target.to_string(),
            priority,
            enqueued_at: OffsetDateTime::now_utc(),
        });
        true
    }

    /// Pops the lowest priority value (oldest first among equals) and marks the queue running
    pub fn begin(&self) -> Result<(QueuedTest, RunningGuard<'_>), QueueIdle> {
        let mut st = self.state.lock();
        if st.running {
            return Err(QueueIdle::Busy);
        }
        let idx = st
            .pending
            .iter()
            .enumerate()
            .min_by_key(|(_, t)| t.priority)
            .map(|(i, _)| i)
            .ok_or(QueueIdle::Empty)?;
        let test = st.pending.remove(idx);
        st.running = true;
        Ok((test, RunningGuard { queue: self }))
    }

    pub fn len(&self) -> usize {
        self.state.lock().pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_running(&self) -> bool {
        self.state.lock().running
    }

    pub fn pending(&self) -> Vec<QueuedTest> {
        self.state.lock().pending.clone()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProcessOutcome {
    Busy,
    Empty,
    Skipped(String),
    Completed(ThroughputResult),
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeKind {
    Ping,
    Throughput,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeOutcome {
    Ping(Option<LatencyResult>),
    Throughput(Option<ThroughputResult>),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QuickPing {
    pub node: String,
    pub ip: String,
    pub result: LatencyResult,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TelemetrySummary {
    pub rf_link_count: usize,
    pub queue_size: usize,
    pub running: bool,
    pub enabled: bool,
}

#[derive(Serialize)]
struct LinkPair<'a> {
    source: &'a str,
    target: &'a str,
}

#[derive(Serialize)]
struct RfStatsUpdate<'a> {
    link: LinkPair<'a>,
    #[serde(with = "time::serde::rfc3339")]
    timestamp: OffsetDateTime,
    #[serde(skip_serializing_if = "Option::is_none")]
    ping: Option<&'a LatencyResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    throughput: Option<&'a ThroughputResult>,
}

/// Stagger between probes: the round budget spread over the links, capped
pub fn stagger_delay(link_count: usize, budget_secs: f64, max_secs: f64) -> Duration {
    if link_count == 0 || budget_secs <= 0.0 {
        return Duration::ZERO;
    }
    Duration::from_secs_f64((budget_secs / link_count as f64).min(max_secs).max(0.0))
}

pub struct TelemetryService {
    store: Arc<Store>,
    prober: Arc<dyn Prober>,
    notifier: Arc<dyn Notifier>,
    cfg: MonitorConfig,
    queue: ThroughputQueue,
}

impl TelemetryService {
    pub fn new(store: Arc<Store>, prober: Arc<dyn Prober>, notifier: Arc<dyn Notifier>, cfg: MonitorConfig) -> Self {
        Self { store, prober, notifier, cfg, queue: ThroughputQueue::default() }
    }

    pub fn queue(&self) -> &ThroughputQueue {
        &self.queue
    }

    pub fn enqueue(&self, source: &str, target: &str, priority: i32) -> bool {
        let added = self.queue.enqueue(source, target, priority);
        if added {
            debug!("queued throughput test {} -> {} (priority {})", source, target, priority);
        }
        added
    }

    /// Queues every RF link whose quality clears the throughput threshold
    pub fn enqueue_all_eligible(&self) -> Result<usize, StoreError> {
        let threshold = self.cfg.telemetry.throughput_quality_threshold;
        let added = self
            .store
            .rf_links()?
            .iter()
            .filter(|l| l.quality >= threshold)
            .filter(|l| self.enqueue(&l.source, &l.target, DEFAULT_PRIORITY))
            .count();
        Ok(added)
    }

    /// Runs at most one queued throughput test
    pub async fn process_one(&self) -> ProcessOutcome {
        let (test, _running) = match self.queue.begin() {
            Ok(started) => started,
            Err(QueueIdle::Busy) => return ProcessOutcome::Busy,
            Err(QueueIdle::Empty) => return ProcessOutcome::Empty,
        };
        match self.run_throughput_test(&test).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!("throughput test {} -> {} aborted: {}", test.source, test.target, e);
                self.test_status(&test.source, &test.target, "failed", None);
                ProcessOutcome::Failed
            }
        }
    }

    async fn run_throughput_test(&self, test: &QueuedTest) -> Result<ProcessOutcome, StoreError> {
        let Some(ip) = self.store.node_ip(&test.target)? else {
            warn!("cannot run throughput test: no address for {}", test.target);
            return Ok(ProcessOutcome::Skipped(format!("no address for {}", test.target)));
        };
        let threshold = self.cfg.telemetry.throughput_quality_threshold;
        if let Some(link) = self.store.get_link(&test.source, &test.target)? {
            if link.quality < threshold {
                info!(
                    "skipping throughput {} -> {}: quality {}% below {}%",
                    test.source, test.target, link.quality, threshold
                );
                return Ok(ProcessOutcome::Skipped(format!("quality {}% below threshold", link.quality)));
            }
        }

        self.test_status(&test.source, &test.target, "running", None);
        let proxy = self.proxy_host()?;
        let result = self
            .prober
            .throughput_probe(
                &ip,
                &proxy,
                self.cfg.telemetry.throughput_duration_secs,
                &self.cfg.telemetry.throughput_bandwidth,
            )
            .await;

        match result {
            Some(r) => {
                let now = OffsetDateTime::now_utc();
                self.store.record_throughput(&test.source, &test.target, &r, now)?;
                self.test_status(&test.source, &test.target, "complete", Some(&r));
                self.rf_update(&test.source, &test.target, now, None, Some(&r));
                info!("throughput {} -> {}: {} Mbit/s", test.source, test.target, r.tx_mbps);
                Ok(ProcessOutcome::Completed(r))
            }
            None => {
                warn!("throughput test {} -> {} failed", test.source, test.target);
                self.test_status(&test.source, &test.target, "failed", None);
                Ok(ProcessOutcome::Failed)
            }
        }
    }

    /// Pings every RF link target once, pausing between links. Returns how many links were probed.
    pub async fn run_latency_round(&self) -> Result<usize, StoreError> {
        let links = self.store.rf_links()?;
        if links.is_empty() {
            debug!("no RF links to ping");
            return Ok(0);
        }
        let t = &self.cfg.telemetry;
        let stagger = stagger_delay(links.len(), t.round_budget_secs, t.max_stagger_secs);

        let mut probed = 0;
        for (i, link) in links.iter().enumerate() {
            let Some(ip) = self.store.node_ip(&link.target)? else {
                continue;
            };
            let result = self.prober.latency_probe(&ip, t.ping_count, t.ping_timeout_secs).await;
            let now = OffsetDateTime::now_utc();
            match self.store.record_latency(&link.source, &link.target, &result, now) {
                Ok(_) => {
                    self.rf_update(&link.source, &link.target, now, Some(&result), None);
                    debug!("ping {} -> {}: avg {:?} ms, loss {}%", link.source, link.target, result.avg, result.loss);
                    probed += 1;
                }
                Err(e) => warn!("cannot record ping {} -> {}: {}", link.source, link.target, e),
            }

            if i + 1 < links.len() && !stagger.is_zero() {
                tokio::time::sleep(stagger).await;
            }
        }
        info!("completed ping round for {} RF links", probed);
        Ok(probed)
    }

    pub fn record_rf_snapshot(&self, at: OffsetDateTime) -> Result<usize, StoreError> {
        self.store.record_rf_snapshot(at)
    }

    /// Deletes history older than the retention horizon
    pub fn prune_history(&self, now: OffsetDateTime) -> Result<usize, StoreError> {
        let cutoff = now - time::Duration::hours(self.cfg.telemetry.history_retention_hours);
        let n = self.store.prune_history(cutoff)?;
        if n > 0 {
            info!("pruned {} link history rows", n);
        }
        Ok(n)
    }

    /// Probes one link on request and records the result
    pub async fn probe_link(&self, source: &str, target: &str, kind: ProbeKind) -> Result<ProbeOutcome, StoreError> {
        let source = source.trim().to_lowercase();
        let target = target.trim().to_lowercase();
        let (source, target) = (source.as_str(), target.as_str());
        let proxy = self.proxy_host()?;
        let target_ip = self.store.node_ip(target)?;
        let now = OffsetDateTime::now_utc();
        match kind {
            ProbeKind::Ping => {
                let t = &self.cfg.telemetry;
                let result = match &target_ip {
                    Some(ip) => Some(self.prober.latency_probe(ip, t.ping_count, t.ping_timeout_secs).await),
                    None => self.prober.proxy_latency_probe(target, &proxy).await,
                };
                if let Some(r) = &result {
                    self.store.record_latency(source, target, r, now)?;
                    self.rf_update(source, target, now, Some(r), None);
                }
                Ok(ProbeOutcome::Ping(result))
            }
            ProbeKind::Throughput => {
                let address = target_ip.unwrap_or_else(|| mesh_qualified(target));
                let t = &self.cfg.telemetry;
                let result = self
                    .prober
                    .throughput_probe(&address, &proxy, t.throughput_duration_secs, &t.throughput_bandwidth)
                    .await;
                if let Some(r) = &result {
                    self.store.record_throughput(source, target, r, now)?;
                    self.rf_update(source, target, now, None, Some(r));
                }
                Ok(ProbeOutcome::Throughput(result))
            }
        }
    }

    /// Single-packet probe of a stored node
    pub async fn quick_ping(&self, node: &str) -> Result<QuickPing, SessionError> {
        let name = node.trim().to_lowercase();
        if name.is_empty() {
            return Err(SessionError::NoNode);
        }
        let stored = self.store.get_node(&name)?.ok_or_else(|| SessionError::UnknownNode(name.clone()))?;
        let ip = stored
            .ip
            .filter(|ip| !ip.is_empty())
            .ok_or_else(|| SessionError::NoAddress(name.clone()))?;
        let result = self
            .prober
            .latency_probe(&ip, 1, self.cfg.telemetry.ping_timeout_secs)
            .await;
        Ok(QuickPing { node: name, ip, result })
    }

    pub fn summary(&self) -> Result<TelemetrySummary, StoreError> {
        Ok(TelemetrySummary {
            rf_link_count: self.store.rf_links()?.len(),
            queue_size: self.queue.len(),
            running: self.queue.is_running(),
            enabled: self.cfg.telemetry.enabled,
        })
    }

    /// Host that proxied probes run from: the current entry node
    fn proxy_host(&self) -> Result<String, StoreError> {
        let settings = RuntimeSettings::load(&self.store, &self.cfg)?;
        Ok(host_of(&settings.starting_node)
            .or_else(|| host_of(&self.cfg.starting_node))
            .unwrap_or_else(|| "localnode.local.mesh".to_string()))
    }

    fn test_status(&self, source: &str, target: &str, status: &str, result: Option<&ThroughputResult>) {
        let mut payload = json!({
            "link": { "source": source, "target": target },
            "status": status,
        });
        if let Some(r) = result {
            payload["result"] = json!(r);
        }
        self.notifier.broadcast("throughput_test_status", payload);
    }

    fn rf_update(
        &self,
        source: &str,
        target: &str,
        at: OffsetDateTime,
        ping: Option<&LatencyResult>,
        throughput: Option<&ThroughputResult>,
    ) {
        let update = RfStatsUpdate { link: LinkPair { source, target }, timestamp: at, ping, throughput };
        publish(self.notifier.as_ref(), "rf_stats_update", &update);
    }
}
