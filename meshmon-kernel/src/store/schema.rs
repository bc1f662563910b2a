//! Versioned schema migrations.
//!
//! Each migration runs exactly once, inside a transaction that also bumps
//! `schema_version`, so reopening a database never re-applies a step.

use rusqlite::{Connection, OptionalExtension};
use tracing::info;

use crate::error::StoreError;

pub const SCHEMA_VERSION: i32 = 2;

/// (version reached after applying, statements)
const MIGRATIONS: &[(i32, &str)] = &[(1, TOPOLOGY_SCHEMA), (2, TELEMETRY_SCHEMA)];

pub(crate) fn migrate(conn: &Connection) -> Result<(), StoreError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL)",
        [],
    )?;
    let current = current_version(conn)?;
    if current > SCHEMA_VERSION {
        return Err(StoreError::Migration(format!(
            "database schema v{} is newer than supported v{}",
            current, SCHEMA_VERSION
        )));
    }
    if current == SCHEMA_VERSION {
        info!("database schema is up to date (v{})", current);
        return Ok(());
    }

    for (version, sql) in MIGRATIONS.iter().filter(|(v, _)| *v > current) {
        info!("applying schema migration v{}", version);
        conn.execute_batch("BEGIN")?;
        let step = conn
            .execute_batch(sql)
            .and_then(|_| conn.execute("DELETE FROM schema_version", []))
            .and_then(|_| conn.execute("INSERT INTO schema_version (version) VALUES (?1)", [version]));
        match step {
            Ok(_) => conn.execute_batch("COMMIT")?,
            Err(e) => {
                let _ = conn.execute_batch("ROLLBACK");
                return Err(StoreError::Migration(format!("v{}: {}", version, e)));
            }
        }
    }
    Ok(())
}

pub(crate) fn current_version(conn: &Connection) -> Result<i32, StoreError> {
    let version = conn
        .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| row.get(0))
        .optional()?;
    Ok(version.unwrap_or(0))
}

const TOPOLOGY_SCHEMA: &str = r#"
CREATE TABLE nodes (
    name TEXT PRIMARY KEY NOT NULL,
    ip TEXT,
    description TEXT,
    model TEXT,
    firmware_version TEXT,
    lat REAL,
    lon REAL,
    rf_frequency TEXT,
    rf_channel TEXT,
    first_seen INTEGER NOT NULL,
    last_seen INTEGER NOT NULL,
    last_polled INTEGER,
    is_active INTEGER NOT NULL DEFAULT 1,
    is_supernode INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE links (
    source TEXT NOT NULL,
    target TEXT NOT NULL,
    link_type TEXT NOT NULL,
    quality INTEGER NOT NULL DEFAULT 0,
    snr INTEGER,
    distance INTEGER,
    first_seen INTEGER NOT NULL,
    last_seen INTEGER NOT NULL,
    stable_since INTEGER NOT NULL,
    drop_count INTEGER NOT NULL DEFAULT 0,
    status TEXT NOT NULL DEFAULT 'good',
    PRIMARY KEY (source, target)
);

CREATE TABLE services (
    node TEXT NOT NULL,
    name TEXT NOT NULL,
    protocol TEXT,
    link TEXT,
    ip TEXT NOT NULL DEFAULT '',
    UNIQUE (node, name, ip)
);

CREATE TABLE settings (
    key TEXT PRIMARY KEY NOT NULL,
    value TEXT NOT NULL
);

CREATE TABLE events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    event_type TEXT NOT NULL,
    node TEXT,
    details TEXT NOT NULL,
    severity TEXT NOT NULL DEFAULT 'info',
    timestamp INTEGER NOT NULL
);

CREATE INDEX idx_links_status ON links(status);
CREATE INDEX idx_links_target ON links(target);
CREATE INDEX idx_events_timestamp ON events(timestamp);
"#;

const TELEMETRY_SCHEMA: &str = r#"
CREATE TABLE link_history (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp INTEGER NOT NULL,
    source TEXT NOT NULL,
    target TEXT NOT NULL,
    link_type TEXT NOT NULL,
    quality INTEGER,
    snr INTEGER,
    ping_min REAL,
    ping_avg REAL,
    ping_max REAL,
    ping_loss REAL,
    throughput_tx REAL,
    throughput_rx REAL
);

CREATE INDEX idx_history_pair ON link_history(source, target, timestamp);
CREATE INDEX idx_history_timestamp ON link_history(timestamp);
"#;
