//! Breadth-first crawl of the mesh.
//!
//! Starting from one entry node, each node's self-report is fetched, merged
//! into the store, and its routable neighbours are queued one level deeper.
//! Supernodes are recorded but never expanded. Events are collected and
//! returned; persisting them is up to the caller.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use time::OffsetDateTime;
use tracing::{debug, info, warn};

use crate::config::{clamp_max_depth, RuntimeSettings};
use crate::error::DiscoveryError;
use crate::fetch::{build_sysinfo_url, normalize_address, NodeFetcher};
use crate::models::{DiscoveryResult, Event, EventType, LinkUpsert, Node, NodeObservation};
use crate::store::{LinkObservation, Store};
use crate::sysinfo::{parse_report, SysinfoReport};

/// Frequencies closer than this are treated as the same channel
const FREQUENCY_CHANGE_MIN_DELTA: f64 = 1.0;

pub struct DiscoveryEngine {
    store: Arc<Store>,
    fetcher: Arc<dyn NodeFetcher>,
}

/// Per-run counters and collections
struct Crawl {
    at: OffsetDateTime,
    max_depth: u32,
    show_tunnels: bool,
    queue: VecDeque<(String, u32)>,
    seen_addresses: HashSet<String>,
    seen_names: HashSet<String>,
    links_found: usize,
    nodes_visited: usize,
    max_depth_reached: u32,
    errors: Vec<String>,
    events: Vec<Event>,
}

impl Crawl {
    /// Queues an address unless it was already fetched or queued in this run
    fn enqueue(&mut self, url: String, depth: u32) -> bool {
        if self.seen_addresses.insert(url.to_lowercase()) {
            self.queue.push_back((url, depth));
            true
        } else {
            false
        }
    }
}

impl DiscoveryEngine {
    pub fn new(store: Arc<Store>, fetcher: Arc<dyn NodeFetcher>) -> Self {
        Self { store, fetcher }
    }

    /// Crawls from `start_address` (or the configured entry node) down to
    /// `max_depth` (or the configured limit).
    pub async fn discover(
        &self,
        settings: &RuntimeSettings,
        start_address: Option<&str>,
        max_depth: Option<u32>,
    ) -> Result<DiscoveryResult, DiscoveryError> {
        let start = normalize_address(start_address.unwrap_or(&settings.starting_node))?;
        let max_depth = max_depth
            .map(|d| clamp_max_depth(d as i64))
            .unwrap_or(settings.max_depth);

        let mut crawl = Crawl {
            at: OffsetDateTime::now_utc(),
            max_depth,
            show_tunnels: settings.show_tunnels,
            queue: VecDeque::new(),
            seen_addresses: HashSet::new(),
            seen_names: HashSet::new(),
            links_found: 0,
            nodes_visited: 0,
            max_depth_reached: 0,
            errors: Vec::new(),
            events: Vec::new(),
        };
        crawl.enqueue(start.clone(), 0);
        info!("discovery from {} (max depth {})", start, max_depth);

        let mut start_node_error = None;
        while let Some((url, depth)) = crawl.queue.pop_front() {
            crawl.nodes_visited += 1;
            let doc = match self.fetcher.fetch(&url).await {
                Ok(doc) => doc,
                Err(e) => {
                    warn!("fetch failed: {}", e);
                    if url == start {
                        start_node_error = Some(e.to_string());
                    }
                    crawl.errors.push(e.to_string());
                    continue;
                }
            };
            let report = match parse_report(&doc) {
                Ok(report) => report,
                Err(e) => {
                    warn!("bad report from {}: {}", url, e);
                    crawl.errors.push(format!("{}: {}", url, e));
                    continue;
                }
            };
            self.process_node(&mut crawl, report, depth)?;
        }

        info!(
            "discovery done: {} nodes, {} links, {} fetched, {} errors",
            crawl.seen_names.len(),
            crawl.links_found,
            crawl.nodes_visited,
            crawl.errors.len()
        );

        Ok(DiscoveryResult {
            nodes_found: crawl.seen_names.len(),
            links_found: crawl.links_found,
            nodes_visited: crawl.nodes_visited,
            max_depth_reached: crawl.max_depth_reached,
            errors: crawl.errors,
            events: crawl.events,
            start_node_error,
            timestamp: crawl.at,
        })
    }

    fn process_node(&self, crawl: &mut Crawl, report: SysinfoReport, depth: u32) -> Result<(), DiscoveryError> {
        let name = report.node.name.clone();
        if !crawl.seen_names.insert(name.clone()) {
            debug!("{} already processed in this run", name);
            return Ok(());
        }
        crawl.max_depth_reached = crawl.max_depth_reached.max(depth);
        if let Some(w) = &report.tracker_warning {
            crawl.errors.push(format!("{}: {}", name, w));
        }

        let prior = self.store.get_node(&name)?;
        crawl.events.extend(node_events(prior.as_ref(), &report.node, crawl.at));
        self.store.upsert_node(&report.node, crawl.at)?;
        self.store.replace_services(&name, &report.services)?;

        let expand = depth < crawl.max_depth && !report.node.is_supernode;
        if report.node.is_supernode {
            debug!("{} is a supernode, not crawling past it", name);
        }

        for tracker in &report.trackers {
            if tracker.hostname == name {
                continue;
            }
            self.store
                .record_stub_node(&tracker.hostname, tracker.canonical_ip.as_deref(), crawl.at)?;

            if !tracker.link_type.is_tunnel() || crawl.show_tunnels {
                let obs = LinkObservation {
                    source: name.clone(),
                    target: tracker.hostname.clone(),
                    link_type: tracker.link_type.clone(),
                    quality: tracker.quality,
                    snr: tracker.snr,
                    distance: tracker.distance,
                };
                let outcome = self.store.upsert_link(&obs, crawl.at)?;
                crawl.links_found += 1;
                if let Some(ev) = link_event(&obs, outcome, crawl.at) {
                    crawl.events.push(ev);
                }
            }

            // discovery follows routable neighbours whatever the link display policy
            if expand && tracker.routable {
                if let Some(ip) = &tracker.canonical_ip {
                    crawl.enqueue(build_sysinfo_url(ip), depth + 1);
                }
            }
        }
        Ok(())
    }
}

/// Events implied by merging `obs` over the stored `prior` row
pub fn node_events(prior: Option<&Node>, obs: &NodeObservation, at: OffsetDateTime) -> Vec<Event> {
    let mut events = Vec::new();
    let name = obs.name.as_str();
    match prior {
        None => events.push(Event::new(EventType::NodeDiscovered, name, format!("Discovered node {}", name), at)),
        Some(p) if p.last_polled.is_none() => {
            events.push(Event::new(EventType::NodeDiscovered, name, format!("Discovered node {}", name), at))
        }
        Some(p) => {
            if !p.is_active {
                events.push(Event::new(EventType::NodeOnline, name, format!("{} is back online", name), at));
            }
            if let (Some(old), Some(new)) = (p.rf_frequency.as_deref(), obs.rf_frequency.as_deref()) {
                if frequency_changed(old, new) {
                    events.push(Event::new(
                        EventType::FrequencyChange,
                        name,
                        format!("Frequency changed from {} to {} MHz", old, new),
                        at,
                    ));
                }
            }
        }
    }
    events
}

fn frequency_changed(old: &str, new: &str) -> bool {
    match (old.trim().parse::<f64>(), new.trim().parse::<f64>()) {
        (Ok(a), Ok(b)) => (a - b).abs() >= FREQUENCY_CHANGE_MIN_DELTA,
        _ => false,
    }
}

fn link_event(obs: &LinkObservation, outcome: LinkUpsert, at: OffsetDateTime) -> Option<Event> {
    match outcome {
        LinkUpsert::Inserted => Some(Event::new(
            EventType::LinkNew,
            obs.source.as_str(),
            format!("New {} link {} -> {} ({}%)", obs.link_type, obs.source, obs.target, obs.quality),
            at,
        )),
        LinkUpsert::Revived { previous, drop_count } => Some(Event::new(
            EventType::LinkRestored,
            obs.source.as_str(),
            format!(
                "Link {} -> {} restored after being {} (drop #{})",
                obs.source,
                obs.target,
                previous.as_str(),
                drop_count
            ),
            at,
        )),
        LinkUpsert::Refreshed => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(name: &str, active: bool, polled: bool, freq: Option<&str>) -> Node {
        let t = OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap();
        Node {
            name: name.into(),
            ip: None,
            description: None,
            model: None,
            firmware_version: None,
            lat: None,
            lon: None,
            rf_frequency: freq.map(String::from),
            rf_channel: None,
            first_seen: t,
            last_seen: t,
            last_polled: polled.then_some(t),
            is_active: active,
            is_supernode: false,
        }
    }

    fn obs(name: &str, freq: Option<&str>) -> NodeObservation {
        NodeObservation { name: name.into(), rf_frequency: freq.map(String::from), ..Default::default() }
    }

    fn kinds(events: &[Event]) -> Vec<EventType> {
        events.iter().map(|e| e.event_type).collect()
    }

    #[test]
    fn test_new_and_stub_nodes_are_discovered() {
        let at = OffsetDateTime::now_utc();
        assert_eq!(kinds(&node_events(None, &obs("a", None), at)), vec![EventType::NodeDiscovered]);
        let stub = node("a", false, false, None);
        assert_eq!(kinds(&node_events(Some(&stub), &obs("a", None), at)), vec![EventType::NodeDiscovered]);
    }

    #[test]
    fn test_inactive_node_comes_back_online() {
        let at = OffsetDateTime::now_utc();
        let prior = node("a", false, true, Some("5805"));
        assert_eq!(kinds(&node_events(Some(&prior), &obs("a", Some("5805")), at)), vec![EventType::NodeOnline]);
    }

    #[test]
    fn test_frequency_change_threshold() {
        let at = OffsetDateTime::now_utc();
        let prior = node("a", true, true, Some("5805"));
        assert!(node_events(Some(&prior), &obs("a", Some("5805.4")), at).is_empty());
        assert_eq!(
            kinds(&node_events(Some(&prior), &obs("a", Some("5825")), at)),
            vec![EventType::FrequencyChange]
        );
        assert!(node_events(Some(&prior), &obs("a", Some("auto")), at).is_empty());
        assert!(node_events(Some(&prior), &obs("a", None), at).is_empty());
    }
}
