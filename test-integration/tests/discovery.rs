use meshmon_devkit::{SysinfoBuilder, TestHarness};
use meshmon_kernel::config::SETTING_SHOW_TUNNELS;
use meshmon_kernel::error::DiscoveryError;
use meshmon_kernel::models::{EventType, LinkStatus, LinkType};
use meshmon_test_integration::{event_types, events_for, two_node_mesh, ALPHA_HOST, ALPHA_IP, BRAVO_IP};
use serde_json::json;

#[tokio::test]
async fn test_fresh_store_discovers_alpha_and_bravo() {
    let harness = TestHarness::new().unwrap();
    harness
        .serve(ALPHA_HOST, SysinfoBuilder::new("alpha").ip(ALPHA_IP).rf_neighbor("bravo", BRAVO_IP, 90).build())
        .serve(BRAVO_IP, SysinfoBuilder::new("bravo").ip(BRAVO_IP).build());

    let result = harness.discover(ALPHA_HOST).await.unwrap();

    assert_eq!(result.nodes_found, 2);
    assert_eq!(result.links_found, 1);
    assert_eq!(result.nodes_visited, 2);
    assert_eq!(result.max_depth_reached, 1);
    assert!(result.errors.is_empty());
    assert_eq!(events_for(&result.events, EventType::NodeDiscovered, "alpha").len(), 1);
    assert_eq!(events_for(&result.events, EventType::NodeDiscovered, "bravo").len(), 1);
    let link_new = events_for(&result.events, EventType::LinkNew, "alpha");
    assert_eq!(link_new.len(), 1);
    assert!(link_new[0].details.contains("alpha -> bravo"));

    let link = harness.store.get_link("alpha", "bravo").unwrap().unwrap();
    assert_eq!(link.quality, 90);
    assert_eq!(link.link_type, LinkType::Rf);
    assert_eq!(link.status, LinkStatus::Good);
    let bravo = harness.store.get_node("bravo").unwrap().unwrap();
    assert!(bravo.is_active);
    assert!(bravo.last_polled.is_some());
}

#[tokio::test]
async fn test_supernode_is_recorded_but_not_crawled_past() {
    let harness = TestHarness::new().unwrap();
    harness
        .serve(ALPHA_HOST, SysinfoBuilder::new("alpha").ip(ALPHA_IP).rf_neighbor("charlie", "10.0.0.3", 90).build())
        .serve(
            "10.0.0.3",
            SysinfoBuilder::new("charlie")
                .ip("10.0.0.3")
                .supernode()
                .neighbor("delta", "10.0.0.4", "TUN", 100, true)
                .neighbor("echo", "10.0.0.5", "DTD", 100, true)
                .build(),
        );
    harness.store.set_setting(SETTING_SHOW_TUNNELS, "true").unwrap();

    let result = harness.discover(ALPHA_HOST).await.unwrap();

    let delta = harness.store.get_node("delta").unwrap().unwrap();
    assert!(!delta.is_active);
    assert!(delta.last_polled.is_none());
    assert_eq!(delta.ip.as_deref(), Some("10.0.0.4"));
    assert!(harness.store.get_link("charlie", "delta").unwrap().is_some());
    assert!(harness.store.get_link("charlie", "echo").unwrap().is_some());
    assert!(harness.store.get_node("charlie").unwrap().unwrap().is_supernode);

    assert!(!harness.fetcher.was_requested("10.0.0.4"));
    assert!(!harness.fetcher.was_requested("10.0.0.5"));
    assert_eq!(result.nodes_found, 2);
}

#[tokio::test]
async fn test_supernode_by_name_or_description() {
    let harness = TestHarness::new().unwrap();
    harness
        .serve(
            ALPHA_HOST,
            SysinfoBuilder::new("alpha")
                .ip(ALPHA_IP)
                .rf_neighbor("kc-supernode-1", "10.0.0.3", 90)
                .rf_neighbor("hub", "10.0.0.6", 90)
                .build(),
        )
        .serve("10.0.0.3", SysinfoBuilder::new("kc-supernode-1").rf_neighbor("far", "10.0.0.9", 90).build())
        .serve(
            "10.0.0.6",
            SysinfoBuilder::new("hub").description("Regional SuperNode").rf_neighbor("far2", "10.0.0.8", 90).build(),
        );

    harness.discover(ALPHA_HOST).await.unwrap();

    assert!(!harness.fetcher.was_requested("10.0.0.9"));
    assert!(!harness.fetcher.was_requested("10.0.0.8"));
    assert!(harness.store.get_node("hub").unwrap().unwrap().is_supernode);
}

#[tokio::test]
async fn test_depth_limit_stops_expansion() {
    let harness = TestHarness::new().unwrap();
    harness
        .serve(ALPHA_HOST, SysinfoBuilder::new("alpha").rf_neighbor("bravo", BRAVO_IP, 90).build())
        .serve(BRAVO_IP, SysinfoBuilder::new("bravo").rf_neighbor("charlie", "10.0.0.3", 90).build())
        .serve("10.0.0.3", SysinfoBuilder::new("charlie").build());
    let settings = harness.monitor.settings().unwrap();

    let result = harness
        .monitor
        .discovery
        .discover(&settings, Some(ALPHA_HOST), Some(1))
        .await
        .unwrap();

    assert_eq!(result.nodes_found, 2);
    assert_eq!(result.max_depth_reached, 1);
    assert!(!harness.fetcher.was_requested("10.0.0.3"));
    // beyond the boundary but still known
    assert!(harness.store.get_node("charlie").unwrap().is_some());
    assert!(harness.store.get_link("bravo", "charlie").unwrap().is_some());
}

#[tokio::test]
async fn test_unreachable_start_node_is_reported_not_fatal() {
    let harness = TestHarness::new().unwrap();
    harness.fetcher.set_unreachable(ALPHA_HOST);

    let result = harness.discover(ALPHA_HOST).await.unwrap();

    assert_eq!(result.nodes_found, 0);
    assert_eq!(result.nodes_visited, 1);
    assert_eq!(result.errors.len(), 1);
    assert!(result.start_node_error.is_some());
}

#[tokio::test]
async fn test_dead_neighbour_does_not_abort_crawl() {
    let harness = TestHarness::new().unwrap();
    harness.serve(
        ALPHA_HOST,
        SysinfoBuilder::new("alpha")
            .rf_neighbor("bravo", BRAVO_IP, 90)
            .rf_neighbor("charlie", "10.0.0.3", 70)
            .build(),
    );
    harness.serve("10.0.0.3", SysinfoBuilder::new("charlie").build());

    let result = harness.discover(ALPHA_HOST).await.unwrap();

    assert_eq!(result.nodes_found, 2);
    assert_eq!(result.errors.len(), 1);
    assert!(result.start_node_error.is_none());
    assert_eq!(result.links_found, 2);
}

#[tokio::test]
async fn test_invalid_start_address_is_rejected() {
    let harness = TestHarness::new().unwrap();
    let err = harness.discover("http://").await.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<DiscoveryError>(),
        Some(DiscoveryError::InvalidStartAddress(_))
    ));
    assert!(harness.fetcher.requests().is_empty());
}

#[tokio::test]
async fn test_malformed_tracker_table_means_no_links() {
    let harness = TestHarness::new().unwrap();
    let mut doc = SysinfoBuilder::new("alpha").ip(ALPHA_IP).build();
    doc["lqm"]["info"]["trackers"] = json!("not a table");
    harness.serve(ALPHA_HOST, doc);

    let result = harness.discover(ALPHA_HOST).await.unwrap();

    assert_eq!(result.nodes_found, 1);
    assert_eq!(result.links_found, 0);
    assert_eq!(result.errors.len(), 1);
    assert!(harness.store.get_node("alpha").unwrap().is_some());
}

#[tokio::test]
async fn test_hidden_tunnels_still_leave_stub_nodes() {
    let harness = TestHarness::new().unwrap();
    harness.serve(
        ALPHA_HOST,
        SysinfoBuilder::new("alpha")
            .neighbor("tunnelpeer", "172.31.0.9", "WIREGUARD", 100, false)
            .rf_neighbor("bravo", BRAVO_IP, 90)
            .build(),
    );

    let result = harness.discover(ALPHA_HOST).await.unwrap();
    assert_eq!(result.links_found, 1);
    assert!(harness.store.get_link("alpha", "tunnelpeer").unwrap().is_none());
    assert!(harness.store.get_node("tunnelpeer").unwrap().is_some());

    harness.store.set_setting(SETTING_SHOW_TUNNELS, "true").unwrap();
    let result = harness.discover(ALPHA_HOST).await.unwrap();
    assert_eq!(result.links_found, 2);
    let tunnel = harness.store.get_link("alpha", "tunnelpeer").unwrap().unwrap();
    assert_eq!(tunnel.link_type, LinkType::Wireguard);
}

#[tokio::test]
async fn test_tracker_list_form_and_string_numbers() {
    let harness = TestHarness::new().unwrap();
    harness.serve(
        ALPHA_HOST,
        SysinfoBuilder::new("alpha")
            .raw_tracker(json!({
                "hostname": "Bravo",
                "canonical_ip": BRAVO_IP,
                "type": "RF",
                "quality": "87.6",
                "snr": "22",
                "routable": "true",
            }))
            .raw_tracker(json!({ "hostname": "charlie", "type": "RF", "quality": 250 }))
            .trackers_as_list()
            .build(),
    );

    harness.discover(ALPHA_HOST).await.unwrap();

    let bravo = harness.store.get_link("alpha", "bravo").unwrap().unwrap();
    assert_eq!(bravo.quality, 87);
    assert_eq!(bravo.snr, Some(22));
    assert_eq!(harness.store.get_link("alpha", "charlie").unwrap().unwrap().quality, 100);
    assert!(harness.fetcher.was_requested(BRAVO_IP));
}

#[tokio::test]
async fn test_one_node_behind_two_addresses_is_processed_once() {
    let harness = TestHarness::new().unwrap();
    harness
        .serve(
            ALPHA_HOST,
            SysinfoBuilder::new("alpha")
                .rf_neighbor("bravo", BRAVO_IP, 90)
                .neighbor("bravo-dtd", "10.0.1.2", "DTD", 100, true)
                .build(),
        )
        .serve(BRAVO_IP, SysinfoBuilder::new("bravo").build())
        .serve("10.0.1.2", SysinfoBuilder::new("bravo").build());

    let result = harness.discover(ALPHA_HOST).await.unwrap();

    assert_eq!(result.nodes_visited, 3);
    assert_eq!(result.nodes_found, 2);
    assert_eq!(events_for(&result.events, EventType::NodeDiscovered, "bravo").len(), 1);
}

#[tokio::test]
async fn test_stub_promotion_and_frequency_change() {
    let harness = TestHarness::new().unwrap();
    harness.serve(
        ALPHA_HOST,
        SysinfoBuilder::new("alpha").frequency("5805").rf_neighbor("bravo", BRAVO_IP, 90).build(),
    );
    harness.fetcher.set_unreachable(BRAVO_IP);
    let first = harness.discover(ALPHA_HOST).await.unwrap();
    assert_eq!(event_types(&first.events), vec![EventType::NodeDiscovered, EventType::LinkNew]);

    two_node_mesh(&harness);
    harness.serve(
        ALPHA_HOST,
        SysinfoBuilder::new("alpha")
            .ip(ALPHA_IP)
            .frequency("5745")
            .rf_neighbor("bravo", BRAVO_IP, 90)
            .build(),
    );
    let second = harness.discover(ALPHA_HOST).await.unwrap();

    assert_eq!(events_for(&second.events, EventType::FrequencyChange, "alpha").len(), 1);
    // bravo was only a stub before, so this is its discovery rather than a return
    assert_eq!(events_for(&second.events, EventType::NodeDiscovered, "bravo").len(), 1);
    assert!(events_for(&second.events, EventType::NodeOnline, "bravo").is_empty());
    assert!(events_for(&second.events, EventType::LinkNew, "alpha").is_empty());
}
