//! Post-crawl staleness sweeps over links and nodes.

use std::collections::HashSet;
use std::sync::Arc;
use time::{Duration, OffsetDateTime};
use tracing::info;

use crate::error::StoreError;
use crate::models::{Event, EventType, NodeRef, ReconcileResult};
use crate::store::Store;

pub struct Reconciler {
    store: Arc<Store>,
}

impl Reconciler {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    pub fn reconcile(&self, link_timeout: Duration, remove_after: Duration) -> Result<ReconcileResult, StoreError> {
        self.reconcile_at(OffsetDateTime::now_utc(), link_timeout, remove_after)
    }

    /// Runs the sweeps as of `now`.
    ///
    /// Removal runs first so a link can never go from good to removed in one pass.
    pub fn reconcile_at(
        &self,
        now: OffsetDateTime,
        link_timeout: Duration,
        remove_after: Duration,
    ) -> Result<ReconcileResult, StoreError> {
        let removed = self.store.remove_dropped_links(now - remove_after)?;
        let dropped_links = self.store.drop_stale_links(now - link_timeout)?;

        let mut events: Vec<Event> = dropped_links
            .iter()
            .map(|l| {
                Event::new(
                    EventType::LinkDropped,
                    l.source.as_str(),
                    format!("{} link {} -> {} dropped", l.link_type, l.source, l.target),
                    now,
                )
            })
            .collect();

        let mut seen = HashSet::new();
        let inactive_nodes: Vec<NodeRef> = self
            .store
            .stale_active_nodes(now - link_timeout)?
            .into_iter()
            .chain(self.store.orphan_active_nodes()?)
            .filter(|n| seen.insert(n.name.clone()))
            .collect();
        let names: Vec<String> = inactive_nodes.iter().map(|n| n.name.clone()).collect();
        let marked_inactive = self.store.mark_nodes_inactive(&names)?;

        events.extend(inactive_nodes.iter().map(|n| {
            Event::new(EventType::NodeOffline, n.name.as_str(), format!("{} went offline", n.name), now)
        }));

        if removed + dropped_links.len() + marked_inactive > 0 {
            info!(
                "reconcile: {} links dropped, {} removed, {} nodes inactive",
                dropped_links.len(),
                removed,
                marked_inactive
            );
        }

        Ok(ReconcileResult {
            dropped: dropped_links.len(),
            removed,
            dropped_links,
            marked_inactive,
            inactive_nodes,
            events,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{LinkStatus, LinkType, NodeObservation};
    use crate::store::LinkObservation;

    fn t(secs: i64) -> OffsetDateTime {
        OffsetDateTime::from_unix_timestamp(1_700_000_000 + secs).unwrap()
    }

    fn setup() -> (Arc<Store>, Reconciler) {
        let store = Arc::new(Store::open_in_memory().unwrap());
        for name in ["alpha", "bravo"] {
            let obs = NodeObservation { name: name.into(), ..Default::default() };
            store.upsert_node(&obs, t(0)).unwrap();
        }
        let link = LinkObservation {
            source: "alpha".into(),
            target: "bravo".into(),
            link_type: LinkType::Rf,
            quality: 90,
            snr: None,
            distance: None,
        };
        store.upsert_link(&link, t(0)).unwrap();
        let reconciler = Reconciler::new(store.clone());
        (store, reconciler)
    }

    #[test]
    fn test_fresh_state_is_untouched() {
        let (store, reconciler) = setup();
        let res = reconciler.reconcile_at(t(60), Duration::seconds(300), Duration::seconds(600)).unwrap();
        assert_eq!(res.dropped + res.removed + res.marked_inactive, 0);
        assert!(res.events.is_empty());
        assert_eq!(store.count_nodes(true).unwrap(), 2);
    }

    #[test]
    fn test_stale_link_drops_before_removal() {
        let (store, reconciler) = setup();
        // long outage: first pass may only drop
        let res = reconciler.reconcile_at(t(5000), Duration::seconds(300), Duration::seconds(600)).unwrap();
        assert_eq!(res.dropped, 1);
        assert_eq!(res.removed, 0);
        assert_eq!(res.dropped_links[0].source, "alpha");
        assert_eq!(store.get_link("alpha", "bravo").unwrap().unwrap().status, LinkStatus::Dropped);
        assert_eq!(res.marked_inactive, 2);

        let res = reconciler.reconcile_at(t(5001), Duration::seconds(300), Duration::seconds(600)).unwrap();
        assert_eq!(res.removed, 1);
        assert_eq!(res.dropped, 0);
        assert_eq!(store.get_link("alpha", "bravo").unwrap().unwrap().status, LinkStatus::Removed);
    }

    #[test]
    fn test_orphan_node_goes_inactive_even_when_fresh() {
        let (store, reconciler) = setup();
        let lonely = NodeObservation { name: "charlie".into(), ..Default::default() };
        store.upsert_node(&lonely, t(50)).unwrap();

        let res = reconciler.reconcile_at(t(60), Duration::seconds(300), Duration::seconds(600)).unwrap();
        assert_eq!(res.inactive_nodes, vec![NodeRef { name: "charlie".into(), ip: None }]);
        assert_eq!(res.events.len(), 1);
        assert_eq!(res.events[0].event_type, EventType::NodeOffline);
    }

    #[test]
    fn test_stale_and_orphan_node_reported_once() {
        let (store, reconciler) = setup();
        let lonely = NodeObservation { name: "charlie".into(), ..Default::default() };
        store.upsert_node(&lonely, t(0)).unwrap();
        store.upsert_node(&NodeObservation { name: "alpha".into(), ..Default::default() }, t(400)).unwrap();
        store.upsert_node(&NodeObservation { name: "bravo".into(), ..Default::default() }, t(400)).unwrap();
        let link = LinkObservation {
            source: "alpha".into(),
            target: "bravo".into(),
            link_type: LinkType::Rf,
            quality: 90,
            snr: None,
            distance: None,
        };
        store.upsert_link(&link, t(400)).unwrap();

        let res = reconciler.reconcile_at(t(400), Duration::seconds(300), Duration::seconds(600)).unwrap();
        assert_eq!(res.marked_inactive, 1);
        assert_eq!(res.inactive_nodes.len(), 1);
    }
}
