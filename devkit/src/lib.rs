/*!
# Meshmon DevKit - fakes and utilities for development

Lets the monitor run without a mesh, a broker or a ping binary:
- recording notifier in place of MQTT
- scripted status fetcher and prober
- `sysinfo.json` report builder
- fake mesh node HTTP server for the real fetcher and proxy probes
- test harness wiring all of the above into a `Monitor`
*/

pub mod fake_node;
pub mod fakes;
pub mod notifier_stub;
pub mod report_builder;
pub mod test_utils;

pub use fake_node::FakeMeshNode;
pub use fakes::{ProbeCall, ScriptedFetcher, ScriptedProber};
pub use notifier_stub::RecordingNotifier;
pub use report_builder::SysinfoBuilder;
pub use test_utils::{test_config, TestHarness};
