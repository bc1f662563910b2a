//! Node status fetching over HTTP.

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use crate::config::DEFAULT_STARTING_NODE;
use crate::error::{DiscoveryError, FetchError};

pub const SYSINFO_PATH: &str = "/cgi-bin/sysinfo.json";
pub const SYSINFO_QUERY: &str = "lqm=1&hosts=1&services=1&services_local=1";

/// Retrieves a node's self-report
#[async_trait]
pub trait NodeFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Value, FetchError>;
}

pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FetchError::Transport { url: String::new(), reason: e.to_string() })?;
        Ok(Self { client })
    }
}

#[async_trait]
impl NodeFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<Value, FetchError> {
        debug!("fetching {}", url);
        let resp = self.client.get(url).send().await.map_err(|e| classify(url, e))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Status { url: url.to_string(), status: status.as_u16() });
        }
        let body = resp.text().await.map_err(|e| classify(url, e))?;
        serde_json::from_str(&body)
            .map_err(|e| FetchError::Malformed { url: url.to_string(), reason: e.to_string() })
    }
}

fn classify(url: &str, e: reqwest::Error) -> FetchError {
    if e.is_timeout() {
        FetchError::Timeout(url.to_string())
    } else {
        FetchError::Transport { url: url.to_string(), reason: e.to_string() }
    }
}

/// Status URL for a bare host or IP
pub fn build_sysinfo_url(host: &str) -> String {
    format!("http://{}{}?{}", host, SYSINFO_PATH, SYSINFO_QUERY)
}

/// Host part of an address with or without scheme, path or query
pub fn host_of(address: &str) -> Option<String> {
    let trimmed = address.trim();
    let rest = ["http://", "https://"]
        .iter()
        .find_map(|scheme| {
            trimmed
                .get(..scheme.len())
                .filter(|p| p.eq_ignore_ascii_case(scheme))
                .map(|_| &trimmed[scheme.len()..])
        })
        .unwrap_or(trimmed);
    let host = rest.split(['/', '?', '#']).next().unwrap_or("");
    (!host.is_empty()).then(|| host.to_string())
}

/// Turns whatever the operator typed into a full status URL.
///
/// Empty input means the default entry node. Already-complete URLs are kept
/// verbatim, so normalizing twice gives the same result.
pub fn normalize_address(address: &str) -> Result<String, DiscoveryError> {
    let trimmed = address.trim();
    if trimmed.is_empty() {
        return Ok(DEFAULT_STARTING_NODE.to_string());
    }
    let host = host_of(trimmed).ok_or_else(|| DiscoveryError::InvalidStartAddress(address.to_string()))?;
    if trimmed.contains(SYSINFO_PATH) {
        return Ok(trimmed.to_string());
    }
    Ok(build_sysinfo_url(&host))
}
