//! Topology monitor for an AREDN-style wireless mesh.
//!
//! Crawls node `sysinfo.json` reports breadth-first, keeps nodes, links,
//! services and events in SQLite, ages links and nodes out when they stop
//! being reported, and gathers per-link RF telemetry.

pub mod config;
pub mod discovery;
pub mod error;
pub mod fetch;
pub mod health;
pub mod lifecycle;
pub mod models;
pub mod monitor;
pub mod mqtt;
pub mod notify;
pub mod probe;
pub mod scan;
pub mod scheduler;
pub mod sessions;
pub mod store;
pub mod sysinfo;
pub mod telemetry;
pub mod view;
