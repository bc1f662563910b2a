//! Latency and throughput probes.
//!
//! A local latency probe always yields a [`LatencyResult`]; total loss is a
//! result, not an error. Probes proxied through a mesh node return `None`
//! when no measurement took place at all.

mod command;
mod parse;

pub use command::{ping_args, process_deadline};
pub use parse::{parse_iperf_output, parse_ping_output, parse_proxy_ping_output};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

pub const PROXY_PING_TIMEOUT: Duration = Duration::from_secs(15);
pub const PROXY_IPERF_TIMEOUT: Duration = Duration::from_secs(30);
pub const MESH_DOMAIN: &str = "local.mesh";

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatencyResult {
    pub min: Option<f64>,
    pub avg: Option<f64>,
    pub max: Option<f64>,
    pub loss: f64,
}

impl LatencyResult {
    pub fn total_loss() -> Self {
        Self { min: None, avg: None, max: None, loss: 100.0 }
    }

    pub fn is_total_loss(&self) -> bool {
        self.loss >= 100.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThroughputResult {
    pub tx_mbps: f64,
    pub rx_mbps: f64,
}

#[async_trait]
pub trait Prober: Send + Sync {
    /// Local multi-packet latency probe; never fails
    async fn latency_probe(&self, address: &str, count: u32, timeout_secs: u64) -> LatencyResult;

    /// Latency probe run by `proxy_host` against `target`
    async fn proxy_latency_probe(&self, target: &str, proxy_host: &str) -> Option<LatencyResult>;

    /// Throughput test run by `proxy_host` against `target`
    async fn throughput_probe(
        &self,
        target: &str,
        proxy_host: &str,
        duration_secs: u64,
        bandwidth: &str,
    ) -> Option<ThroughputResult>;
}

/// Local ping binary plus the mesh node test endpoints
pub struct SystemProber {
    client: reqwest::Client,
}

impl SystemProber {
    pub fn new() -> Result<Self, reqwest::Error> {
        Ok(Self { client: reqwest::Client::builder().build()? })
    }

    async fn proxy_get(&self, url: &str, timeout: Duration) -> Option<String> {
        let resp = match self.client.get(url).timeout(timeout).send().await {
            Ok(resp) => resp,
            Err(e) => {
                warn!("proxy request {} failed: {}", url, e);
                return None;
            }
        };
        if !resp.status().is_success() {
            warn!("proxy request {} returned {}", url, resp.status());
            return None;
        }
        match resp.text().await {
            Ok(body) => Some(body),
            Err(e) => {
                warn!("proxy response {} unreadable: {}", url, e);
                None
            }
        }
    }
}

#[async_trait]
impl Prober for SystemProber {
    async fn latency_probe(&self, address: &str, count: u32, timeout_secs: u64) -> LatencyResult {
        match command::run_ping(address, count, timeout_secs).await {
            Ok(output) => parse_ping_output(&output, count).unwrap_or_else(|| {
                warn!("unparseable ping output for {}", address);
                LatencyResult::total_loss()
            }),
            Err(e) => {
                warn!("ping {} failed: {}", address, e);
                LatencyResult::total_loss()
            }
        }
    }

    async fn proxy_latency_probe(&self, target: &str, proxy_host: &str) -> Option<LatencyResult> {
        let url = proxy_ping_url(proxy_host, target);
        info!("ping via {} -> {}", proxy_host, target);
        let body = self.proxy_get(&url, PROXY_PING_TIMEOUT).await?;
        let result = parse_proxy_ping_output(&body);
        if result.is_none() {
            warn!("could not parse proxied ping output from {}", proxy_host);
        }
        result
    }

    async fn throughput_probe(
        &self,
        target: &str,
        proxy_host: &str,
        duration_secs: u64,
        bandwidth: &str,
    ) -> Option<ThroughputResult> {
        let url = proxy_iperf_url(proxy_host, target);
        info!("iperf via {} -> {}", proxy_host, target);
        debug!("iperf hints: {}s at {}", duration_secs, bandwidth);
        let body = self.proxy_get(&url, PROXY_IPERF_TIMEOUT).await?;
        let result = parse_iperf_output(&body);
        if result.is_none() {
            warn!("iperf via {} -> {} produced no rate", proxy_host, target);
        }
        result
    }
}

/// Bare hostnames get the mesh domain; dotted names and IPs are left alone
pub fn mesh_qualified(target: &str) -> String {
    if target.contains('.') || target.chars().all(|c| c.is_ascii_digit()) {
        target.to_string()
    } else {
        format!("{}.{}", target, MESH_DOMAIN)
    }
}

pub fn proxy_ping_url(proxy_host: &str, target: &str) -> String {
    format!("http://{}/cgi-bin/ping?server={}", proxy_host, mesh_qualified(target))
}

pub fn proxy_iperf_url(proxy_host: &str, target: &str) -> String {
    format!("http://{}/cgi-bin/iperf?server={}&protocol=tcp", proxy_host, target)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mesh_qualified() {
        assert_eq!(mesh_qualified("kf9mt-node4"), "kf9mt-node4.local.mesh");
        assert_eq!(mesh_qualified("10.1.2.3"), "10.1.2.3");
        assert_eq!(mesh_qualified("bravo.local.mesh"), "bravo.local.mesh");
    }

    #[test]
    fn test_proxy_urls() {
        assert_eq!(
            proxy_ping_url("localnode.local.mesh", "bravo"),
            "http://localnode.local.mesh/cgi-bin/ping?server=bravo.local.mesh"
        );
        assert_eq!(
            proxy_iperf_url("10.0.0.1", "10.0.0.2"),
            "http://10.0.0.1/cgi-bin/iperf?server=10.0.0.2&protocol=tcp"
        );
    }

    #[test]
    fn test_total_loss_shape() {
        let r = LatencyResult::total_loss();
        assert!(r.is_total_loss());
        assert_eq!((r.min, r.avg, r.max), (None, None, None));
        let json = serde_json::to_value(r).unwrap();
        assert_eq!(json["loss"], 100.0);
        assert!(json["avg"].is_null());
    }
}
