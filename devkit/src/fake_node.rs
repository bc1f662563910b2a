/*!
Fake mesh node HTTP server

Serves `/cgi-bin/sysinfo.json`, `/cgi-bin/ping` and `/cgi-bin/iperf` on a
loopback port so the real HTTP fetcher and proxy probes can be exercised
end to end.
*/

use anyhow::Result;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

pub const SAMPLE_PING_OUTPUT: &str = "PING 10.0.0.2 (10.0.0.2): 56 data bytes
64 bytes from 10.0.0.2: seq=0 ttl=64 time=10.000 ms
64 bytes from 10.0.0.2: seq=1 ttl=64 time=20.000 ms

--- 10.0.0.2 ping statistics ---
5 packets transmitted, 4 packets received, 20% packet loss
round-trip min/avg/max = 10.0/15.0/20.0 ms
";

pub const SAMPLE_IPERF_OUTPUT: &str = "Connecting to host 10.0.0.2, port 5201
[  5]   0.00-1.00   sec  5.50 MBytes  46.1 Mbits/sec
[  5]   1.00-2.00   sec  5.25 MBytes  44.0 Mbits/sec
- - - - - - - - - - - - - - - - - - - - - - - - -
iperf Done.
";

struct NodeState {
    sysinfo: Mutex<Option<Value>>,
    ping_output: Mutex<String>,
    iperf_output: Mutex<String>,
    requests: Mutex<Vec<String>>,
}

/// A running fake node; the server stops when this is dropped
pub struct FakeMeshNode {
    pub addr: SocketAddr,
    state: Arc<NodeState>,
    server: JoinHandle<()>,
}

impl FakeMeshNode {
    pub async fn start(report: Value) -> Result<Self> {
        let state = Arc::new(NodeState {
            sysinfo: Mutex::new(Some(report)),
            ping_output: Mutex::new(SAMPLE_PING_OUTPUT.to_string()),
            iperf_output: Mutex::new(SAMPLE_IPERF_OUTPUT.to_string()),
            requests: Mutex::new(Vec::new()),
        });
        let app = Router::new()
            .route("/cgi-bin/sysinfo.json", get(sysinfo))
            .route("/cgi-bin/ping", get(ping))
            .route("/cgi-bin/iperf", get(iperf))
            .with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let server = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                log::error!("fake node server stopped: {}", e);
            }
        });
        log::info!("fake mesh node listening on {}", addr);
        Ok(Self { addr, state, server })
    }

    /// `host:port` as the monitor sees it
    pub fn host(&self) -> String {
        self.addr.to_string()
    }

    pub fn sysinfo_url(&self) -> String {
        meshmon_kernel::fetch::build_sysinfo_url(&self.host())
    }

    /// `None` makes the status endpoint answer 503
    pub fn set_sysinfo(&self, doc: Option<Value>) {
        *self.state.sysinfo.lock() = doc;
    }

    pub fn set_ping_output(&self, body: &str) {
        *self.state.ping_output.lock() = body.to_string();
    }

    pub fn set_iperf_output(&self, body: &str) {
        *self.state.iperf_output.lock() = body.to_string();
    }

    /// Request log as `path` or `path?server=<target>`
    pub fn requests(&self) -> Vec<String> {
        self.state.requests.lock().clone()
    }
}

impl Drop for FakeMeshNode {
    fn drop(&mut self) {
        self.server.abort();
    }
}

async fn sysinfo(State(state): State<Arc<NodeState>>) -> Result<Json<Value>, StatusCode> {
    state.requests.lock().push("/cgi-bin/sysinfo.json".into());
    let doc = state.sysinfo.lock().clone();
    doc.map(Json).ok_or(StatusCode::SERVICE_UNAVAILABLE)
}

async fn ping(State(state): State<Arc<NodeState>>, Query(params): Query<HashMap<String, String>>) -> String {
    record_test(&state, "/cgi-bin/ping", &params);
    state.ping_output.lock().clone()
}

async fn iperf(State(state): State<Arc<NodeState>>, Query(params): Query<HashMap<String, String>>) -> String {
    record_test(&state, "/cgi-bin/iperf", &params);
    state.iperf_output.lock().clone()
}

fn record_test(state: &NodeState, path: &str, params: &HashMap<String, String>) {
    let server = params.get("server").cloned().unwrap_or_default();
    state.requests.lock().push(format!("{}?server={}", path, server));
}
