use rusqlite::{params, OptionalExtension};
use std::collections::HashMap;

use super::Store;
use crate::error::StoreError;

impl Store {
    pub fn get_setting(&self, key: &str) -> Result<Option<String>, StoreError> {
        let conn = self.conn.lock();
        let value = conn
            .query_row("SELECT value FROM settings WHERE key = ?1", [key], |r| r.get(0))
            .optional()?;
        Ok(value)
    }

    pub fn set_setting(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO settings (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }

    pub fn all_settings(&self) -> Result<HashMap<String, String>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT key, value FROM settings")?;
        let map = stmt
            .query_map([], |r| Ok((r.get(0)?, r.get(1)?)))?
            .collect::<Result<HashMap<_, _>, _>>()?;
        Ok(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_overwrites() {
        let store = Store::open_in_memory().unwrap();
        assert!(store.get_setting("auto_scan").unwrap().is_none());
        store.set_setting("auto_scan", "true").unwrap();
        store.set_setting("auto_scan", "false").unwrap();
        assert_eq!(store.get_setting("auto_scan").unwrap().as_deref(), Some("false"));
        assert_eq!(store.all_settings().unwrap().len(), 1);
    }
}
