/*!
Test harness for the mesh monitor

Bundles a throw-away on-disk store, the scripted fakes and a fully wired
`Monitor`, plus broadcast expectations checked after the test body runs.
*/

use crate::fakes::{ScriptedFetcher, ScriptedProber};
use crate::notifier_stub::RecordingNotifier;
use anyhow::Result;
use meshmon_kernel::config::MonitorConfig;
use meshmon_kernel::models::DiscoveryResult;
use meshmon_kernel::monitor::Monitor;
use meshmon_kernel::store::Store;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

pub struct TestHarness {
    pub notifier: RecordingNotifier,
    pub fetcher: Arc<ScriptedFetcher>,
    pub prober: Arc<ScriptedProber>,
    pub store: Arc<Store>,
    pub monitor: Arc<Monitor>,
    expectations: Vec<Expectation>,
    _dir: TempDir,
}

#[derive(Debug)]
struct Expectation {
    event: String,
    expected_count: usize,
}

/// Config suited to tests: no scan gap, no stagger, fast live sessions
pub fn test_config() -> MonitorConfig {
    let mut cfg = MonitorConfig {
        starting_node: "alpha.local.mesh".into(),
        min_scan_gap_secs: 0,
        initial_scan_delay_secs: 0,
        ..MonitorConfig::default()
    };
    cfg.mqtt.enabled = false;
    cfg.telemetry.round_budget_secs = 0.0;
    cfg.sessions.probe_interval_ms = 20;
    cfg
}

impl TestHarness {
    pub fn new() -> Result<Self> {
        Self::with_config(test_config(), ScriptedProber::new())
    }

    pub fn with_config(cfg: MonitorConfig, prober: ScriptedProber) -> Result<Self> {
        env_logger::try_init().ok();

        let dir = tempfile::tempdir()?;
        let store = Arc::new(Store::open(dir.path().join("meshmon.db"))?);
        let notifier = RecordingNotifier::new();
        let fetcher = Arc::new(ScriptedFetcher::new());
        let prober = Arc::new(prober);
        let monitor = Arc::new(Monitor::new(
            cfg,
            store.clone(),
            fetcher.clone(),
            prober.clone(),
            Arc::new(notifier.clone()),
        ));
        Ok(Self { notifier, fetcher, prober, store, monitor, expectations: Vec::new(), _dir: dir })
    }

    /// Scripts a node report for `host`
    pub fn serve(&self, host: &str, report: Value) -> &Self {
        self.fetcher.set_report(host, report);
        self
    }

    /// Runs discovery alone from `start` with the current settings
    pub async fn discover(&self, start: &str) -> Result<DiscoveryResult> {
        let settings = self.monitor.settings()?;
        Ok(self.monitor.discovery.discover(&settings, Some(start), None).await?)
    }

    /// Expects exactly `count` broadcasts of `event` by the time of verification
    pub fn expect_broadcasts(&mut self, event: &str, count: usize) -> &mut Self {
        self.expectations.push(Expectation { event: event.to_string(), expected_count: count });
        self
    }

    pub fn verify_expectations(&self) -> Result<()> {
        for expectation in &self.expectations {
            let actual = self.notifier.count(&expectation.event);
            if actual != expectation.expected_count {
                anyhow::bail!(
                    "expectation failed for '{}': expected {} broadcasts, got {}",
                    expectation.event,
                    expectation.expected_count,
                    actual
                );
            }
        }
        log::info!("{} expectations verified", self.expectations.len());
        Ok(())
    }

    pub async fn wait_for_broadcast(&self, event: &str, timeout_ms: u64) -> Result<Value> {
        self.notifier
            .wait_for(event, Duration::from_millis(timeout_ms))
            .await
            .ok_or_else(|| anyhow::anyhow!("no {} broadcast within {} ms", event, timeout_ms))
    }

    /// Asserts a field of the latest `event` payload, using a dotted path
    pub fn assert_field_equals(&self, event: &str, field_path: &str, expected: &Value) -> Result<()> {
        let Some(msg) = self.notifier.last(event) else {
            anyhow::bail!("no {} broadcast", event);
        };
        match nested_field(&msg, field_path) {
            Some(actual) if actual == expected => Ok(()),
            Some(actual) => {
                anyhow::bail!("field '{}' mismatch: expected {:?}, got {:?}", field_path, expected, actual)
            }
            None => anyhow::bail!("field '{}' not found in {}", field_path, event),
        }
    }

    pub fn get_stats(&self) -> TestStats {
        let mut event_counts = HashMap::new();
        for event in self.notifier.events() {
            *event_counts.entry(event).or_insert(0) += 1;
        }
        TestStats { total_broadcasts: event_counts.values().sum(), event_counts }
    }

    pub fn reset(&mut self) {
        self.notifier.clear();
        self.fetcher.clear_requests();
        self.expectations.clear();
    }
}

fn nested_field<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(value, |current, part| match current {
        Value::Object(obj) => obj.get(part),
        Value::Array(items) => part.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

#[derive(Debug)]
pub struct TestStats {
    pub total_broadcasts: usize,
    pub event_counts: HashMap<String, usize>,
}
