//! Parsing of a node's `sysinfo.json` self-report.
//!
//! The document is loosely typed in the field: numbers arrive as strings, the
//! tracker table is usually a map keyed by MAC but sometimes a list. Everything
//! is normalised here so nothing past this module sees the raw JSON.

use serde_json::{Map, Value};
use tracing::warn;

use crate::error::ReportError;
use crate::models::{LinkType, NodeObservation, Service};

pub const BRIDGE_INTERFACE: &str = "br-lan";
const SUPERNODE_MARKER: &str = "supernode";

/// One neighbour entry from the link-quality tracker table
#[derive(Debug, Clone, PartialEq)]
pub struct TrackerRecord {
    pub hostname: String,
    pub link_type: LinkType,
    pub canonical_ip: Option<String>,
    pub routable: bool,
    pub quality: i64,
    pub snr: Option<i64>,
    pub distance: Option<i64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SysinfoReport {
    pub node: NodeObservation,
    pub services: Vec<Service>,
    pub trackers: Vec<TrackerRecord>,
    /// Set when the tracker table had an unexpected shape
    pub tracker_warning: Option<String>,
}

pub fn parse_report(doc: &Value) -> Result<SysinfoReport, ReportError> {
    let obj = doc.as_object().ok_or(ReportError::NotAnObject)?;
    let name = obj
        .get("node")
        .and_then(Value::as_str)
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .ok_or(ReportError::MissingName)?;

    let empty = Map::new();
    let details = obj.get("node_details").and_then(Value::as_object).unwrap_or(&empty);
    let meshrf = obj.get("meshrf").and_then(Value::as_object).unwrap_or(&empty);
    let description = text(details.get("description"));
    let ip = bridge_ip(obj.get("interfaces"));

    let is_supernode = truthy(details.get("supernode"))
        || name.contains(SUPERNODE_MARKER)
        || description
            .as_deref()
            .is_some_and(|d| d.to_lowercase().contains(SUPERNODE_MARKER));

    let node = NodeObservation {
        name: name.clone(),
        ip: ip.clone(),
        description,
        model: text(details.get("model")),
        firmware_version: text(details.get("firmware_version")),
        lat: coordinate(obj.get("lat")),
        lon: coordinate(obj.get("lon")),
        rf_frequency: text(meshrf.get("freq")),
        rf_channel: text(meshrf.get("channel")),
        is_supernode,
    };

    let services = obj
        .get("services_local")
        .and_then(Value::as_array)
        .map(|list| {
            list.iter()
                .filter_map(|svc| {
                    let svc = svc.as_object()?;
                    let svc_name = text(svc.get("name"))?;
                    Some(Service {
                        node: name.clone(),
                        name: svc_name,
                        protocol: text(svc.get("protocol")).or_else(|| Some("tcp".into())),
                        link: text(svc.get("link")),
                        ip: ip.clone(),
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    let (trackers, tracker_warning) = parse_trackers(obj);

    Ok(SysinfoReport { node, services, trackers, tracker_warning })
}

fn parse_trackers(obj: &Map<String, Value>) -> (Vec<TrackerRecord>, Option<String>) {
    let raw = obj
        .get("lqm")
        .and_then(|l| l.get("info"))
        .and_then(|i| i.get("trackers"));

    let entries: Vec<&Value> = match raw {
        None | Some(Value::Null) => return (Vec::new(), None),
        Some(Value::Object(map)) => map.values().collect(),
        Some(Value::Array(list)) => list.iter().collect(),
        Some(other) => {
            let msg = format!("unexpected tracker table type: {}", json_kind(other));
            warn!("{}", msg);
            return (Vec::new(), Some(msg));
        }
    };

    let trackers = entries
        .into_iter()
        .filter_map(|t| {
            let t = t.as_object()?;
            let hostname = text(t.get("hostname"))?.to_lowercase();
            Some(TrackerRecord {
                hostname,
                link_type: LinkType::parse(&text(t.get("type")).unwrap_or_default()),
                canonical_ip: text(t.get("canonical_ip")),
                routable: truthy(t.get("routable")),
                quality: parse_quality(t.get("quality")),
                snr: int_value(t.get("snr")),
                distance: int_value(t.get("distance")),
            })
        })
        .collect();
    (trackers, None)
}

/// Link quality as an integer percentage; unparseable input is 0
pub fn parse_quality(v: Option<&Value>) -> i64 {
    int_value(v).map(|q| q.clamp(0, 100)).unwrap_or(0)
}

fn int_value(v: Option<&Value>) -> Option<i64> {
    match v? {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().filter(|f| f.is_finite()).map(|f| f as i64))
        }
        _ => None,
    }
}

/// Non-empty string form of a scalar
fn text(v: Option<&Value>) -> Option<String> {
    match v? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn truthy(v: Option<&Value>) -> bool {
    match v {
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().is_some_and(|f| f != 0.0),
        Some(Value::String(s)) => matches!(s.trim().to_lowercase().as_str(), "true" | "1" | "yes"),
        _ => false,
    }
}

/// Zero and garbage both mean "no position"
fn coordinate(v: Option<&Value>) -> Option<f64> {
    let f = match v? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }?;
    (f.is_finite() && f != 0.0).then_some(f)
}

fn bridge_ip(interfaces: Option<&Value>) -> Option<String> {
    interfaces?
        .as_array()?
        .iter()
        .filter_map(Value::as_object)
        .find(|iface| {
            iface.get("name").and_then(Value::as_str) == Some(BRIDGE_INTERFACE)
                && text(iface.get("ip")).is_some()
        })
        .and_then(|iface| text(iface.get("ip")))
}

fn json_kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
