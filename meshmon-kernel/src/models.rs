//! Data model shared by the store, the discovery engine and the telemetry pipeline.

use serde::{Deserialize, Serialize};
use std::fmt;
use time::OffsetDateTime;

/// A mesh device, identified by its lowercase name
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Node {
    pub name: String,
    pub ip: Option<String>,
    pub description: Option<String>,
    pub model: Option<String>,
    pub firmware_version: Option<String>,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub rf_frequency: Option<String>,
    pub rf_channel: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub first_seen: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub last_seen: OffsetDateTime,
    /// Last successful self-report; `None` for neighbours only known from a tracker
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_polled: Option<OffsetDateTime>,
    pub is_active: bool,
    pub is_supernode: bool,
}

/// Fields extracted from one self-report, before they are merged into a [`Node`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeObservation {
    pub name: String,
    pub ip: Option<String>,
    pub description: Option<String>,
    pub model: Option<String>,
    pub firmware_version: Option<String>,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub rf_frequency: Option<String>,
    pub rf_channel: Option<String>,
    pub is_supernode: bool,
}

/// Link technology as reported by the tracker `type` field
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LinkType {
    Rf,
    Dtd,
    Xlink,
    Tunnel,
    Wireguard,
    Other(String),
}

impl LinkType {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_uppercase().as_str() {
            "RF" => LinkType::Rf,
            "DTD" => LinkType::Dtd,
            "XLINK" => LinkType::Xlink,
            "TUN" | "TUNNEL" | "VTUN" => LinkType::Tunnel,
            "WIREGUARD" | "WG" => LinkType::Wireguard,
            other => LinkType::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            LinkType::Rf => "RF",
            LinkType::Dtd => "DTD",
            LinkType::Xlink => "XLINK",
            LinkType::Tunnel => "TUN",
            LinkType::Wireguard => "WIREGUARD",
            LinkType::Other(raw) => raw,
        }
    }

    pub fn is_tunnel(&self) -> bool {
        matches!(self, LinkType::Tunnel | LinkType::Wireguard)
    }

    pub fn is_rf(&self) -> bool {
        matches!(self, LinkType::Rf)
    }
}

impl fmt::Display for LinkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for LinkType {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for LinkType {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(LinkType::parse(&raw))
    }
}

/// Per-row link status machine: good -> dropped -> removed, any -> good on re-observation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkStatus {
    Good,
    Dropped,
    Removed,
}

impl LinkStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkStatus::Good => "good",
            LinkStatus::Dropped => "dropped",
            LinkStatus::Removed => "removed",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "good" => Some(LinkStatus::Good),
            "dropped" => Some(LinkStatus::Dropped),
            "removed" => Some(LinkStatus::Removed),
            _ => None,
        }
    }
}

/// One directional observation of connectivity, as reported by `source`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Link {
    pub source: String,
    pub target: String,
    pub link_type: LinkType,
    pub quality: i64,
    pub snr: Option<i64>,
    pub distance: Option<i64>,
    #[serde(with = "time::serde::rfc3339")]
    pub first_seen: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub last_seen: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub stable_since: OffsetDateTime,
    pub drop_count: i64,
    pub status: LinkStatus,
}

/// What an upsert did to the link row, used to synthesize events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkUpsert {
    Inserted,
    Refreshed,
    Revived { previous: LinkStatus, drop_count: i64 },
}

/// A service advertised by a node
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Service {
    pub node: String,
    pub name: String,
    pub protocol: Option<String>,
    pub link: Option<String>,
    pub ip: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    NodeDiscovered,
    NodeOnline,
    NodeOffline,
    LinkNew,
    LinkDropped,
    LinkRestored,
    FrequencyChange,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::NodeDiscovered => "node_discovered",
            EventType::NodeOnline => "node_online",
            EventType::NodeOffline => "node_offline",
            EventType::LinkNew => "link_new",
            EventType::LinkDropped => "link_dropped",
            EventType::LinkRestored => "link_restored",
            EventType::FrequencyChange => "frequency_change",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "node_discovered" => Some(EventType::NodeDiscovered),
            "node_online" => Some(EventType::NodeOnline),
            "node_offline" => Some(EventType::NodeOffline),
            "link_new" => Some(EventType::LinkNew),
            "link_dropped" => Some(EventType::LinkDropped),
            "link_restored" => Some(EventType::LinkRestored),
            "frequency_change" => Some(EventType::FrequencyChange),
            _ => None,
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            EventType::NodeOffline | EventType::LinkDropped => Severity::Warning,
            _ => Severity::Info,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
        }
    }

    pub fn parse(raw: &str) -> Self {
        match raw {
            "warning" => Severity::Warning,
            "error" => Severity::Error,
            _ => Severity::Info,
        }
    }
}

/// Immutable record of a state transition
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Event {
    /// Row id once persisted
    pub id: Option<i64>,
    pub event_type: EventType,
    pub node: Option<String>,
    pub details: String,
    pub severity: Severity,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

impl Event {
    pub fn new(event_type: EventType, node: impl Into<String>, details: impl Into<String>, at: OffsetDateTime) -> Self {
        Self {
            id: None,
            event_type,
            node: Some(node.into()),
            details: details.into(),
            severity: event_type.severity(),
            timestamp: at,
        }
    }
}

/// One telemetry sample for a (source, target) pair; any metric group may be empty
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LinkHistorySample {
    pub id: i64,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub source: String,
    pub target: String,
    pub link_type: LinkType,
    pub quality: Option<i64>,
    pub snr: Option<i64>,
    pub ping_min: Option<f64>,
    pub ping_avg: Option<f64>,
    pub ping_max: Option<f64>,
    pub ping_loss: Option<f64>,
    pub throughput_tx: Option<f64>,
    pub throughput_rx: Option<f64>,
}

/// `{name, ip}` pair reported for nodes the reconciler retired
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NodeRef {
    pub name: String,
    pub ip: Option<String>,
}

/// `{source, target, type}` triple reported for links the reconciler dropped
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LinkRef {
    pub source: String,
    pub target: String,
    #[serde(rename = "type")]
    pub link_type: LinkType,
}

/// Outcome of one discovery crawl
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryResult {
    pub nodes_found: usize,
    pub links_found: usize,
    pub nodes_visited: usize,
    pub max_depth_reached: u32,
    pub errors: Vec<String>,
    pub events: Vec<Event>,
    pub start_node_error: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

/// Outcome of one lifecycle sweep
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReconcileResult {
    pub dropped: usize,
    pub removed: usize,
    pub dropped_links: Vec<LinkRef>,
    pub marked_inactive: usize,
    pub inactive_nodes: Vec<NodeRef>,
    pub events: Vec<Event>,
}

/// A full scan: discovery followed by reconciliation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanReport {
    #[serde(flatten)]
    pub discovery: DiscoveryResult,
    pub reconcile: ReconcileResult,
}

impl ScanReport {
    pub fn all_events(&self) -> impl Iterator<Item = &Event> {
        self.discovery.events.iter().chain(self.reconcile.events.iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_link_type_classification() {
        assert_eq!(LinkType::parse("rf"), LinkType::Rf);
        assert!(LinkType::parse("WG").is_tunnel());
        assert!(LinkType::parse("vtun").is_tunnel());
        assert!(!LinkType::parse("DTD").is_tunnel());
        assert_eq!(LinkType::parse("supernode").as_str(), "SUPERNODE");
    }

    #[test]
    fn test_event_severity() {
        assert_eq!(EventType::LinkDropped.severity(), Severity::Warning);
        assert_eq!(EventType::NodeOffline.severity(), Severity::Warning);
        assert_eq!(EventType::LinkNew.severity(), Severity::Info);
        assert_eq!(EventType::parse("frequency_change"), Some(EventType::FrequencyChange));
    }

    #[test]
    fn test_link_status_roundtrip_strings() {
        for status in [LinkStatus::Good, LinkStatus::Dropped, LinkStatus::Removed] {
            assert_eq!(LinkStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(LinkStatus::parse("gone"), None);
    }
}
