/*!
Builder for node `sysinfo.json` documents

Produces reports shaped like the ones mesh firmware serves, so fakes can
answer with realistic payloads without hand-written JSON in every test.
*/

use serde_json::{json, Map, Value};

#[derive(Debug, Clone)]
pub struct SysinfoBuilder {
    name: String,
    ip: Option<String>,
    details: Map<String, Value>,
    freq: Option<Value>,
    location: Option<(f64, f64)>,
    services: Vec<Value>,
    trackers: Vec<Value>,
    trackers_as_list: bool,
}

impl SysinfoBuilder {
    pub fn new<S: Into<String>>(name: S) -> Self {
        let mut details = Map::new();
        details.insert("model".into(), json!("MikroTik hAP ac lite"));
        details.insert("firmware_version".into(), json!("3.24.6.0"));
        Self {
            name: name.into(),
            ip: None,
            details,
            freq: None,
            location: None,
            services: Vec::new(),
            trackers: Vec::new(),
            trackers_as_list: false,
        }
    }

    /// Address reported on the bridge interface
    pub fn ip<S: Into<String>>(mut self, ip: S) -> Self {
        self.ip = Some(ip.into());
        self
    }

    pub fn firmware<S: Into<String>>(mut self, version: S) -> Self {
        self.details.insert("firmware_version".into(), json!(version.into()));
        self
    }

    pub fn description<S: Into<String>>(mut self, text: S) -> Self {
        self.details.insert("description".into(), json!(text.into()));
        self
    }

    pub fn supernode(mut self) -> Self {
        self.details.insert("supernode".into(), json!(true));
        self
    }

    pub fn frequency<V: Into<Value>>(mut self, freq: V) -> Self {
        self.freq = Some(freq.into());
        self
    }

    pub fn location(mut self, lat: f64, lon: f64) -> Self {
        self.location = Some((lat, lon));
        self
    }

    pub fn service<S: Into<String>>(mut self, name: S, link: S) -> Self {
        self.services.push(json!({ "name": name.into(), "link": link.into() }));
        self
    }

    /// Routable RF neighbour
    pub fn rf_neighbor(self, hostname: &str, ip: &str, quality: i64) -> Self {
        self.neighbor(hostname, ip, "RF", quality, true)
    }

    pub fn neighbor(mut self, hostname: &str, ip: &str, link_type: &str, quality: i64, routable: bool) -> Self {
        self.trackers.push(json!({
            "hostname": hostname,
            "canonical_ip": ip,
            "type": link_type,
            "quality": quality,
            "snr": 25,
            "routable": routable,
        }));
        self
    }

    /// Raw tracker entry, for exercising loose encodings
    pub fn raw_tracker(mut self, tracker: Value) -> Self {
        self.trackers.push(tracker);
        self
    }

    /// Emit the tracker table as a list instead of a MAC-keyed map
    pub fn trackers_as_list(mut self) -> Self {
        self.trackers_as_list = true;
        self
    }

    pub fn build(self) -> Value {
        let mut doc = Map::new();
        doc.insert("node".into(), json!(self.name));
        doc.insert("node_details".into(), Value::Object(self.details));
        if let Some(ip) = &self.ip {
            doc.insert(
                "interfaces".into(),
                json!([
                    { "name": "eth0", "ip": "192.168.1.2" },
                    { "name": "br-lan", "ip": ip },
                ]),
            );
        }
        if let Some(freq) = self.freq {
            doc.insert("meshrf".into(), json!({ "freq": freq, "channel": "-2" }));
        }
        if let Some((lat, lon)) = self.location {
            doc.insert("lat".into(), json!(lat));
            doc.insert("lon".into(), json!(lon));
        }
        doc.insert("services_local".into(), Value::Array(self.services));

        let trackers = if self.trackers_as_list {
            Value::Array(self.trackers)
        } else {
            let keyed: Map<String, Value> = self
                .trackers
                .into_iter()
                .enumerate()
                .map(|(i, t)| (format!("aa:bb:cc:00:00:{:02x}", i), t))
                .collect();
            Value::Object(keyed)
        };
        doc.insert("lqm".into(), json!({ "enabled": true, "info": { "trackers": trackers } }));
        Value::Object(doc)
    }
}
