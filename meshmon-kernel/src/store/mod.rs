//! SQLite persistence for nodes, links, services, settings, events and link history.
//!
//! One connection behind a mutex; multi-statement operations run inside a
//! transaction so concurrent jobs never observe a half-applied change.
//! Timestamps are stored as Unix seconds (UTC).

mod events;
mod history;
mod links;
mod nodes;
mod schema;
mod services;
mod settings;

pub use history::HISTORY_AMEND_WINDOW;
pub use links::LinkObservation;
pub use schema::SCHEMA_VERSION;

use parking_lot::Mutex;
use rusqlite::{types::Type, Connection, Row};
use std::path::Path;
use std::time::Duration;
use time::OffsetDateTime;
use tracing::info;

use crate::error::StoreError;

pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    /// Opens (or creates) the database file and brings its schema up to date
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        schema::migrate(&conn)?;
        info!("store opened at {}", path.display());
        Ok(Self { conn: Mutex::new(conn) })
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        schema::migrate(&conn)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    pub fn schema_version(&self) -> Result<i32, StoreError> {
        schema::current_version(&self.conn.lock())
    }
}

pub(crate) fn to_ts(at: OffsetDateTime) -> i64 {
    at.unix_timestamp()
}

pub(crate) fn ts_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<OffsetDateTime> {
    let secs: i64 = row.get(idx)?;
    OffsetDateTime::from_unix_timestamp(secs)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Integer, Box::new(e)))
}

pub(crate) fn opt_ts_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<OffsetDateTime>> {
    let secs: Option<i64> = row.get(idx)?;
    secs.map(|s| {
        OffsetDateTime::from_unix_timestamp(s)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Integer, Box::new(e)))
    })
    .transpose()
}

pub(crate) fn corrupt_col(idx: usize, what: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, what.into())
}
