//! Shared fixtures for the end-to-end scenarios under `tests/`.

use meshmon_devkit::{SysinfoBuilder, TestHarness};
use meshmon_kernel::models::{Event, EventType};

pub const ALPHA_HOST: &str = "alpha.local.mesh";
pub const ALPHA_IP: &str = "10.0.0.1";
pub const BRAVO_IP: &str = "10.0.0.2";

/// alpha (entry node) and bravo hearing each other over RF
pub fn two_node_mesh(harness: &TestHarness) {
    harness
        .serve(
            ALPHA_HOST,
            SysinfoBuilder::new("alpha")
                .ip(ALPHA_IP)
                .frequency("5805")
                .rf_neighbor("bravo", BRAVO_IP, 90)
                .build(),
        )
        .serve(
            BRAVO_IP,
            SysinfoBuilder::new("bravo")
                .ip(BRAVO_IP)
                .firmware("3.23.12.0")
                .rf_neighbor("alpha", ALPHA_IP, 80)
                .build(),
        );
}

pub fn event_types(events: &[Event]) -> Vec<EventType> {
    events.iter().map(|e| e.event_type).collect()
}

/// Events of `kind` that name `node`
pub fn events_for<'a>(events: &'a [Event], kind: EventType, node: &str) -> Vec<&'a Event> {
    events
        .iter()
        .filter(|e| e.event_type == kind && e.node.as_deref() == Some(node))
        .collect()
}
