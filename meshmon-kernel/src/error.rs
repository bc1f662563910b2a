//! Error types shared across the kernel.
//!
//! Each concern gets its own enum; per-item failures (one node, one probe) are
//! reported through run results instead of these types, so only the errors
//! that genuinely abort an operation show up here.

/// Errors raised by the SQLite store
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Corrupt row: {0}")]
    Corrupt(String),
    #[error("Schema migration failed: {0}")]
    Migration(String),
}

/// Errors raised while fetching a node's status report
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("Timeout fetching {0}")]
    Timeout(String),
    #[error("Transport error for {url}: {reason}")]
    Transport { url: String, reason: String },
    #[error("HTTP {status} from {url}")]
    Status { url: String, status: u16 },
    #[error("Invalid JSON from {url}: {reason}")]
    Malformed { url: String, reason: String },
}

/// Errors that abort a whole discovery run
#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    #[error("Invalid start address: {0:?}")]
    InvalidStartAddress(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Errors raised by the scan coordinator
#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    #[error("Scan already in progress")]
    AlreadyScanning,
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Errors raised when starting a live probe session
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("No node specified")]
    NoNode,
    #[error("Node {0:?} not found")]
    UnknownNode(String),
    #[error("Node {0:?} has no IP address")]
    NoAddress(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Errors raised when loading the static configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// A node report that cannot be turned into a node observation
#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    #[error("Report is not a JSON object")]
    NotAnObject,
    #[error("Report has no node name")]
    MissingName,
}
