//! Per-client continuous ping sessions.
//!
//! Each client owns at most one session. Starting a new one overwrites the
//! entry with a fresh token; a loop whose token is no longer the stored one
//! exits on its next check, so nothing has to signal it.

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::error::SessionError;
use crate::notify::{publish, Notifier};
use crate::probe::Prober;
use crate::store::Store;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub node: String,
    pub ip: String,
    pub token: u64,
}

/// Returned by [`LiveSessionManager::start`]
pub struct SessionHandle {
    pub token: u64,
    pub node: String,
    pub ip: String,
    pub task: JoinHandle<()>,
}

#[derive(Debug, Serialize)]
struct PingResult<'a> {
    client_id: &'a str,
    node: &'a str,
    ip: &'a str,
    success: bool,
    time: Option<f64>,
    loss: f64,
}

pub struct LiveSessionManager {
    sessions: Mutex<HashMap<String, Session>>,
    next_token: AtomicU64,
    store: Arc<Store>,
    prober: Arc<dyn Prober>,
    notifier: Arc<dyn Notifier>,
    interval: Duration,
    probe_timeout_secs: u64,
}

impl LiveSessionManager {
    pub fn new(
        store: Arc<Store>,
        prober: Arc<dyn Prober>,
        notifier: Arc<dyn Notifier>,
        interval: Duration,
        probe_timeout_secs: u64,
    ) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            next_token: AtomicU64::new(0),
            store,
            prober,
            notifier,
            interval,
            probe_timeout_secs,
        }
    }

    /// Starts (or replaces) the client's session against `node_name`
    pub fn start(self: &Arc<Self>, client_id: &str, node_name: &str) -> Result<SessionHandle, SessionError> {
        let name = node_name.trim().to_lowercase();
        if name.is_empty() {
            return Err(SessionError::NoNode);
        }
        let node = self
            .store
            .get_node(&name)?
            .ok_or_else(|| SessionError::UnknownNode(name.clone()))?;
        let ip = node
            .ip
            .filter(|ip| !ip.is_empty())
            .ok_or_else(|| SessionError::NoAddress(name.clone()))?;

        let token = self.next_token.fetch_add(1, Ordering::SeqCst) + 1;
        let session = Session { node: name.clone(), ip: ip.clone(), token };
        if let Some(prev) = self.sessions.lock().insert(client_id.to_string(), session) {
            debug!("client {} switched from {} (token {})", client_id, prev.node, prev.token);
        }
        info!("client {} pinging {} ({})", client_id, name, ip);

        let mgr = Arc::clone(self);
        let client = client_id.to_string();
        let (loop_node, loop_ip) = (name.clone(), ip.clone());
        let task = tokio::spawn(async move {
            mgr.probe_loop(client, loop_node, loop_ip, token).await;
        });

        Ok(SessionHandle { token, node: name, ip, task })
    }

    async fn probe_loop(&self, client_id: String, node: String, ip: String, token: u64) {
        loop {
            if !self.is_current(&client_id, token) {
                break;
            }
            let result = self.prober.latency_probe(&ip, 1, self.probe_timeout_secs).await;
            // the probe takes time; the session may have been replaced or stopped meanwhile
            if !self.is_current(&client_id, token) {
                break;
            }
            let payload = PingResult {
                client_id: &client_id,
                node: &node,
                ip: &ip,
                success: !result.is_total_loss(),
                time: result.avg,
                loss: result.loss,
            };
            publish(self.notifier.as_ref(), "ping_result", &payload);
            tokio::time::sleep(self.interval).await;
        }
        debug!("ping loop for {} (token {}) exited", client_id, token);
    }

    fn is_current(&self, client_id: &str, token: u64) -> bool {
        self.sessions
            .lock()
            .get(client_id)
            .is_some_and(|s| s.token == token)
    }

    /// Ends the client's session; returns whether one existed
    pub fn stop(&self, client_id: &str) -> bool {
        let removed = self.sessions.lock().remove(client_id).is_some();
        if removed {
            info!("client {} stopped pinging", client_id);
        }
        removed
    }

    pub fn disconnect(&self, client_id: &str) {
        self.stop(client_id);
    }

    pub fn session(&self, client_id: &str) -> Option<Session> {
        self.sessions.lock().get(client_id).cloned()
    }

    pub fn active_count(&self) -> usize {
        self.sessions.lock().len()
    }
}
