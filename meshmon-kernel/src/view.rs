//! Graph projection of the stored topology for visual consumers.

use serde::Serialize;
use std::collections::{BTreeMap, HashSet};

use crate::error::StoreError;
use crate::fetch::host_of;
use crate::models::{Link, LinkStatus, LinkType, Node};
use crate::store::Store;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EdgeClass {
    Good,
    Poor,
    Bad,
    Wired,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GraphNode {
    pub name: String,
    pub ip: Option<String>,
    pub model: Option<String>,
    pub firmware_version: Option<String>,
    pub firmware_mismatch: bool,
    pub rf_frequency: Option<String>,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub is_supernode: bool,
    pub is_inactive: bool,
    pub services: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GraphEdge {
    pub source: String,
    pub target: String,
    pub link_type: LinkType,
    pub quality: i64,
    pub snr: Option<i64>,
    pub status: LinkStatus,
    pub drop_count: i64,
    pub class: EdgeClass,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct NetworkGraph {
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
}

/// Colour class of a (merged) link
pub fn classify_link(link_type: &LinkType, status: LinkStatus, quality: i64, good: i64, poor: i64) -> EdgeClass {
    if *link_type == LinkType::Dtd {
        return EdgeClass::Wired;
    }
    if status == LinkStatus::Dropped {
        return EdgeClass::Bad;
    }
    // tunnels and cross-links usually report no real quality
    let quality_less = link_type.is_tunnel() || *link_type == LinkType::Xlink;
    if quality_less && (quality == 0 || quality >= 100) {
        return EdgeClass::Good;
    }
    if quality > good {
        EdgeClass::Good
    } else if quality > poor {
        EdgeClass::Poor
    } else {
        EdgeClass::Bad
    }
}

/// Active nodes, inactive neighbours of active non-supernodes, and one edge per physical link.
///
/// The two directional rows of a link merge conservatively: the lower quality
/// and lower SNR win, and a dropped row marks the whole edge dropped.
pub fn network_graph(store: &Store, starting_node: &str, good: i64, poor: i64) -> Result<NetworkGraph, StoreError> {
    let nodes = store.list_nodes()?;
    let links = store.list_links(false)?;

    let active: HashSet<&str> = nodes.iter().filter(|n| n.is_active).map(|n| n.name.as_str()).collect();
    let active_plain: HashSet<&str> = nodes
        .iter()
        .filter(|n| n.is_active && !n.is_supernode)
        .map(|n| n.name.as_str())
        .collect();

    let mut shown: HashSet<&str> = active.clone();
    for l in &links {
        if active_plain.contains(l.source.as_str()) && !active.contains(l.target.as_str()) {
            shown.insert(l.target.as_str());
        } else if active_plain.contains(l.target.as_str()) && !active.contains(l.source.as_str()) {
            shown.insert(l.source.as_str());
        }
    }

    let reference = reference_firmware(&nodes, starting_node);
    let mut graph_nodes = Vec::new();
    for n in nodes.iter().filter(|n| shown.contains(n.name.as_str())) {
        let firmware_mismatch = match (&reference, &n.firmware_version) {
            (Some(r), Some(f)) => r != f,
            _ => false,
        };
        graph_nodes.push(GraphNode {
            name: n.name.clone(),
            ip: n.ip.clone(),
            model: n.model.clone(),
            firmware_version: n.firmware_version.clone(),
            firmware_mismatch,
            rf_frequency: n.rf_frequency.clone(),
            lat: n.lat,
            lon: n.lon,
            is_supernode: n.is_supernode,
            is_inactive: !n.is_active,
            services: store.services_for(&n.name)?.into_iter().map(|s| s.name).collect(),
        });
    }

    let mut merged: BTreeMap<(String, String), Link> = BTreeMap::new();
    for l in links
        .iter()
        .filter(|l| shown.contains(l.source.as_str()) && shown.contains(l.target.as_str()))
    {
        let key = if l.source <= l.target {
            (l.source.clone(), l.target.clone())
        } else {
            (l.target.clone(), l.source.clone())
        };
        match merged.get_mut(&key) {
            None => {
                merged.insert(key, l.clone());
            }
            Some(existing) => {
                existing.quality = existing.quality.min(l.quality);
                existing.snr = match (existing.snr, l.snr) {
                    (Some(a), Some(b)) => Some(a.min(b)),
                    (a, b) => a.or(b),
                };
                if l.status == LinkStatus::Dropped {
                    existing.status = LinkStatus::Dropped;
                }
                existing.drop_count = existing.drop_count.max(l.drop_count);
            }
        }
    }

    let edges = merged
        .into_values()
        .map(|l| GraphEdge {
            class: classify_link(&l.link_type, l.status, l.quality, good, poor),
            source: l.source,
            target: l.target,
            link_type: l.link_type,
            quality: l.quality,
            snr: l.snr,
            status: l.status,
            drop_count: l.drop_count,
        })
        .collect();

    Ok(NetworkGraph { nodes: graph_nodes, edges })
}

/// Firmware of the entry node, falling back to the oldest active node
fn reference_firmware(nodes: &[Node], starting_node: &str) -> Option<String> {
    let label = host_of(starting_node)
        .and_then(|h| h.split(['.', ':']).next().map(str::to_lowercase))
        .unwrap_or_default();
    let by_name = nodes
        .iter()
        .filter(|n| n.is_active && !label.is_empty() && n.name.contains(&label))
        .find_map(|n| n.firmware_version.clone());
    by_name.or_else(|| {
        nodes
            .iter()
            .filter(|n| n.is_active)
            .min_by_key(|n| n.first_seen)
            .and_then(|n| n.firmware_version.clone())
    })
}
