/*!
Scripted stand-ins for the network-facing seams

`ScriptedFetcher` answers status requests from a per-host table and records
every URL asked for. `ScriptedProber` returns canned probe results, optionally
after a delay, and tracks how many probes run at once.
*/

use async_trait::async_trait;
use meshmon_kernel::error::FetchError;
use meshmon_kernel::fetch::{host_of, NodeFetcher};
use meshmon_kernel::probe::{LatencyResult, Prober, ThroughputResult};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

#[derive(Debug, Clone)]
enum Scripted {
    Report(Value),
    Unreachable,
}

/// Serves reports keyed by host (as found in the request URL)
#[derive(Default)]
pub struct ScriptedFetcher {
    nodes: Mutex<HashMap<String, Scripted>>,
    requests: Mutex<Vec<String>>,
}

impl ScriptedFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serves `report` for `host`, replacing any previous script
    pub fn set_report(&self, host: &str, report: Value) {
        self.nodes.lock().insert(host.to_lowercase(), Scripted::Report(report));
    }

    /// Makes `host` fail like a dead node
    pub fn set_unreachable(&self, host: &str) {
        self.nodes.lock().insert(host.to_lowercase(), Scripted::Unreachable);
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().clone()
    }

    pub fn requested_hosts(&self) -> Vec<String> {
        self.requests.lock().iter().filter_map(|u| host_of(u)).collect()
    }

    pub fn was_requested(&self, host: &str) -> bool {
        self.requested_hosts().iter().any(|h| h.eq_ignore_ascii_case(host))
    }

    pub fn clear_requests(&self) {
        self.requests.lock().clear();
    }
}

#[async_trait]
impl NodeFetcher for ScriptedFetcher {
    async fn fetch(&self, url: &str) -> Result<Value, FetchError> {
        self.requests.lock().push(url.to_string());
        let host = host_of(url).unwrap_or_default().to_lowercase();
        let scripted = self.nodes.lock().get(&host).cloned();
        match scripted {
            Some(Scripted::Report(doc)) => Ok(doc),
            Some(Scripted::Unreachable) => Err(FetchError::Timeout(url.to_string())),
            None => Err(FetchError::Transport { url: url.to_string(), reason: "connection refused".into() }),
        }
    }
}

/// One call made against a [`ScriptedProber`]
#[derive(Debug, Clone, PartialEq)]
pub enum ProbeCall {
    Latency { address: String, count: u32 },
    ProxyLatency { target: String, proxy: String },
    Throughput { target: String, proxy: String },
}

pub struct ScriptedProber {
    latency: Mutex<HashMap<String, LatencyResult>>,
    default_latency: Mutex<LatencyResult>,
    proxy_latency: Mutex<Option<LatencyResult>>,
    throughput: Mutex<Option<ThroughputResult>>,
    delay: Duration,
    calls: Mutex<Vec<ProbeCall>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl Default for ScriptedProber {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedProber {
    pub fn new() -> Self {
        Self {
            latency: Mutex::new(HashMap::new()),
            default_latency: Mutex::new(LatencyResult { min: Some(1.0), avg: Some(2.0), max: Some(3.0), loss: 0.0 }),
            proxy_latency: Mutex::new(None),
            throughput: Mutex::new(Some(ThroughputResult { tx_mbps: 42.5, rx_mbps: 42.5 })),
            delay: Duration::ZERO,
            calls: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    /// Every probe sleeps this long before answering
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn set_latency(&self, address: &str, result: LatencyResult) {
        self.latency.lock().insert(address.to_string(), result);
    }

    pub fn set_default_latency(&self, result: LatencyResult) {
        *self.default_latency.lock() = result;
    }

    pub fn set_proxy_latency(&self, result: Option<LatencyResult>) {
        *self.proxy_latency.lock() = result;
    }

    pub fn set_throughput(&self, result: Option<ThroughputResult>) {
        *self.throughput.lock() = result;
    }

    pub fn calls(&self) -> Vec<ProbeCall> {
        self.calls.lock().clone()
    }

    pub fn throughput_calls(&self) -> usize {
        self.calls.lock().iter().filter(|c| matches!(c, ProbeCall::Throughput { .. })).count()
    }

    /// Highest number of probes observed running concurrently
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    async fn simulate(&self, call: ProbeCall) {
        self.calls.lock().push(call);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Prober for ScriptedProber {
    async fn latency_probe(&self, address: &str, count: u32, _timeout_secs: u64) -> LatencyResult {
        self.simulate(ProbeCall::Latency { address: address.to_string(), count }).await;
        let scripted = self.latency.lock().get(address).copied();
        scripted.unwrap_or_else(|| *self.default_latency.lock())
    }

    async fn proxy_latency_probe(&self, target: &str, proxy_host: &str) -> Option<LatencyResult> {
        self.simulate(ProbeCall::ProxyLatency { target: target.to_string(), proxy: proxy_host.to_string() })
            .await;
        *self.proxy_latency.lock()
    }

    async fn throughput_probe(
        &self,
        target: &str,
        proxy_host: &str,
        _duration_secs: u64,
        _bandwidth: &str,
    ) -> Option<ThroughputResult> {
        self.simulate(ProbeCall::Throughput { target: target.to_string(), proxy: proxy_host.to_string() })
            .await;
        *self.throughput.lock()
    }
}
