use meshmon_devkit::{SysinfoBuilder, TestHarness};
use meshmon_kernel::models::{EventType, LinkStatus};
use meshmon_test_integration::{events_for, two_node_mesh, ALPHA_HOST, ALPHA_IP, BRAVO_IP};
use time::Duration;

const LINK_TIMEOUT: Duration = Duration::seconds(300);
const REMOVE_AFTER: Duration = Duration::seconds(600);

#[tokio::test]
async fn test_stale_link_drops_then_revives() {
    let harness = TestHarness::new().unwrap();
    two_node_mesh(&harness);
    let first = harness.discover(ALPHA_HOST).await.unwrap();

    let later = first.timestamp + Duration::seconds(301);
    let sweep = harness.monitor.reconciler.reconcile_at(later, LINK_TIMEOUT, REMOVE_AFTER).unwrap();

    assert_eq!(sweep.dropped, 2);
    assert_eq!(sweep.removed, 0);
    assert!(sweep
        .dropped_links
        .iter()
        .any(|l| l.source == "alpha" && l.target == "bravo"));
    assert_eq!(events_for(&sweep.events, EventType::LinkDropped, "alpha").len(), 1);
    assert!(sweep.events.iter().all(|e| e.severity.as_str() == "warning"));
    assert_eq!(
        harness.store.get_link("alpha", "bravo").unwrap().unwrap().status,
        LinkStatus::Dropped
    );

    let again = harness.discover(ALPHA_HOST).await.unwrap();
    let link = harness.store.get_link("alpha", "bravo").unwrap().unwrap();
    assert_eq!(link.status, LinkStatus::Good);
    assert_eq!(link.drop_count, 1);
    assert_eq!(link.stable_since.unix_timestamp(), again.timestamp.unix_timestamp());
    assert_eq!(events_for(&again.events, EventType::LinkRestored, "alpha").len(), 1);
}

#[tokio::test]
async fn test_fresh_links_survive_reconcile() {
    let harness = TestHarness::new().unwrap();
    two_node_mesh(&harness);
    let first = harness.discover(ALPHA_HOST).await.unwrap();

    let sweep = harness
        .monitor
        .reconciler
        .reconcile_at(first.timestamp + Duration::seconds(299), LINK_TIMEOUT, REMOVE_AFTER)
        .unwrap();

    assert_eq!(sweep.dropped, 0);
    assert_eq!(sweep.marked_inactive, 0);
    assert!(sweep.events.is_empty());
}

#[tokio::test]
async fn test_dropped_link_is_removed_only_on_a_later_pass() {
    let harness = TestHarness::new().unwrap();
    two_node_mesh(&harness);
    let first = harness.discover(ALPHA_HOST).await.unwrap();

    // a long outage still only drops in the first pass
    let much_later = first.timestamp + Duration::hours(2);
    let sweep = harness.monitor.reconciler.reconcile_at(much_later, LINK_TIMEOUT, REMOVE_AFTER).unwrap();
    assert_eq!((sweep.dropped, sweep.removed), (2, 0));

    let sweep = harness.monitor.reconciler.reconcile_at(much_later, LINK_TIMEOUT, REMOVE_AFTER).unwrap();
    assert_eq!((sweep.dropped, sweep.removed), (0, 2));
    assert_eq!(
        harness.store.get_link("alpha", "bravo").unwrap().unwrap().status,
        LinkStatus::Removed
    );
    assert!(harness.store.list_links(false).unwrap().is_empty());
}

#[tokio::test]
async fn test_stale_nodes_go_offline_and_come_back() {
    let harness = TestHarness::new().unwrap();
    two_node_mesh(&harness);
    let first = harness.discover(ALPHA_HOST).await.unwrap();

    let sweep = harness
        .monitor
        .reconciler
        .reconcile_at(first.timestamp + Duration::seconds(301), LINK_TIMEOUT, REMOVE_AFTER)
        .unwrap();
    let names: Vec<_> = sweep.inactive_nodes.iter().map(|n| n.name.as_str()).collect();
    assert_eq!(names, vec!["alpha", "bravo"]);
    assert_eq!(sweep.inactive_nodes[0].ip.as_deref(), Some(ALPHA_IP));
    assert_eq!(sweep.marked_inactive, 2);
    assert_eq!(events_for(&sweep.events, EventType::NodeOffline, "bravo").len(), 1);
    assert!(!harness.store.get_node("bravo").unwrap().unwrap().is_active);

    let again = harness.discover(ALPHA_HOST).await.unwrap();
    assert_eq!(events_for(&again.events, EventType::NodeOnline, "bravo").len(), 1);
    assert!(harness.store.get_node("bravo").unwrap().unwrap().is_active);
}

#[tokio::test]
async fn test_orphaned_node_is_retired_once() {
    let harness = TestHarness::new().unwrap();
    harness
        .serve(ALPHA_HOST, SysinfoBuilder::new("alpha").ip(ALPHA_IP).rf_neighbor("bravo", BRAVO_IP, 90).build())
        .serve(BRAVO_IP, SysinfoBuilder::new("bravo").ip(BRAVO_IP).build())
        .serve("10.0.0.7", SysinfoBuilder::new("lonely").ip("10.0.0.7").build());
    harness.discover(ALPHA_HOST).await.unwrap();
    let lonely = harness.discover("10.0.0.7").await.unwrap();

    let sweep = harness.monitor.reconciler.reconcile_at(lonely.timestamp, LINK_TIMEOUT, REMOVE_AFTER).unwrap();

    let names: Vec<_> = sweep.inactive_nodes.iter().map(|n| n.name.as_str()).collect();
    assert_eq!(names, vec!["lonely"]);
    assert_eq!(events_for(&sweep.events, EventType::NodeOffline, "lonely").len(), 1);
    // bravo only has an incoming link, which still counts
    assert!(harness.store.get_node("bravo").unwrap().unwrap().is_active);
}

#[tokio::test]
async fn test_scan_persists_events_and_clears_them() {
    let harness = TestHarness::new().unwrap();
    two_node_mesh(&harness);
    harness.monitor.run_scan(None).await.unwrap();

    let stored = harness.store.recent_events(50).unwrap();
    assert_eq!(stored.len(), 4);
    assert!(stored.iter().all(|e| e.id.is_some()));

    // a negative horizon puts the cutoff in the future
    let removed = harness.monitor.clear_old_events(-1).unwrap();
    assert_eq!(removed, 4);
    assert!(harness.store.recent_events(50).unwrap().is_empty());
}
