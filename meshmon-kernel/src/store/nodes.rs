use rusqlite::{params, OptionalExtension, Row};
use time::OffsetDateTime;

use super::{opt_ts_col, to_ts, ts_col, Store};
use crate::error::StoreError;
use crate::models::{Node, NodeObservation, NodeRef};

const NODE_COLUMNS: &str = "name, ip, description, model, firmware_version, lat, lon, \
     rf_frequency, rf_channel, first_seen, last_seen, last_polled, is_active, is_supernode";

fn node_from_row(row: &Row<'_>) -> rusqlite::Result<Node> {
    Ok(Node {
        name: row.get(0)?,
        ip: row.get(1)?,
        description: row.get(2)?,
        model: row.get(3)?,
        firmware_version: row.get(4)?,
        lat: row.get(5)?,
        lon: row.get(6)?,
        rf_frequency: row.get(7)?,
        rf_channel: row.get(8)?,
        first_seen: ts_col(row, 9)?,
        last_seen: ts_col(row, 10)?,
        last_polled: opt_ts_col(row, 11)?,
        is_active: row.get(12)?,
        is_supernode: row.get(13)?,
    })
}

impl Store {
    pub fn get_node(&self, name: &str) -> Result<Option<Node>, StoreError> {
        let conn = self.conn.lock();
        let sql = format!("SELECT {} FROM nodes WHERE name = ?1", NODE_COLUMNS);
        let node = conn
            .query_row(&sql, [name.to_lowercase()], node_from_row)
            .optional()?;
        Ok(node)
    }

    pub fn list_nodes(&self) -> Result<Vec<Node>, StoreError> {
        let conn = self.conn.lock();
        let sql = format!("SELECT {} FROM nodes ORDER BY name", NODE_COLUMNS);
        let mut stmt = conn.prepare(&sql)?;
        let nodes = stmt
            .query_map([], node_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(nodes)
    }

    /// Stored address of a node, if it has one
    pub fn node_ip(&self, name: &str) -> Result<Option<String>, StoreError> {
        let conn = self.conn.lock();
        let ip: Option<Option<String>> = conn
            .query_row("SELECT ip FROM nodes WHERE name = ?1", [name.to_lowercase()], |r| r.get(0))
            .optional()?;
        Ok(ip.flatten().filter(|ip| !ip.is_empty()))
    }

    /// Merges a successful self-report into the node row.
    ///
    /// Absent optional fields keep their stored value; `last_seen` and
    /// `last_polled` move to `at` and the node is forced active.
    pub fn upsert_node(&self, obs: &NodeObservation, at: OffsetDateTime) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        let now = to_ts(at);
        conn.execute(
            "INSERT INTO nodes (name, ip, description, model, firmware_version, lat, lon,
                                rf_frequency, rf_channel, first_seen, last_seen, last_polled,
                                is_active, is_supernode)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10, ?10, 1, ?11)
             ON CONFLICT(name) DO UPDATE SET
                ip = COALESCE(excluded.ip, nodes.ip),
                description = COALESCE(excluded.description, nodes.description),
                model = COALESCE(excluded.model, nodes.model),
                firmware_version = COALESCE(excluded.firmware_version, nodes.firmware_version),
                lat = COALESCE(excluded.lat, nodes.lat),
                lon = COALESCE(excluded.lon, nodes.lon),
                rf_frequency = COALESCE(excluded.rf_frequency, nodes.rf_frequency),
                rf_channel = COALESCE(excluded.rf_channel, nodes.rf_channel),
                last_seen = excluded.last_seen,
                last_polled = excluded.last_polled,
                is_active = 1,
                is_supernode = excluded.is_supernode",
            params![
                obs.name.to_lowercase(),
                obs.ip,
                obs.description,
                obs.model,
                obs.firmware_version,
                obs.lat,
                obs.lon,
                obs.rf_frequency,
                obs.rf_channel,
                now,
                obs.is_supernode,
            ],
        )?;
        Ok(())
    }

    /// Records a neighbour only known from a tracker entry.
    /// An existing row is left alone apart from filling a missing address.
    pub fn record_stub_node(&self, name: &str, ip: Option<&str>, at: OffsetDateTime) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        let now = to_ts(at);
        conn.execute(
            "INSERT INTO nodes (name, ip, first_seen, last_seen, last_polled, is_active, is_supernode)
             VALUES (?1, ?2, ?3, ?3, NULL, 0, 0)
             ON CONFLICT(name) DO UPDATE SET ip = COALESCE(nodes.ip, excluded.ip)",
            params![name.to_lowercase(), ip, now],
        )?;
        Ok(())
    }

    /// Active nodes whose `last_seen` is older than `cutoff`
    pub fn stale_active_nodes(&self, cutoff: OffsetDateTime) -> Result<Vec<NodeRef>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT name, ip FROM nodes WHERE is_active = 1 AND last_seen < ?1 ORDER BY name",
        )?;
        let refs = stmt
            .query_map([to_ts(cutoff)], |r| Ok(NodeRef { name: r.get(0)?, ip: r.get(1)? }))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(refs)
    }

    /// Active nodes without any non-removed link in either direction
    pub fn orphan_active_nodes(&self) -> Result<Vec<NodeRef>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT n.name, n.ip FROM nodes n
             WHERE n.is_active = 1
               AND NOT EXISTS (
                   SELECT 1 FROM links l
                   WHERE (l.source = n.name OR l.target = n.name) AND l.status != 'removed'
               )
             ORDER BY n.name",
        )?;
        let refs = stmt
            .query_map([], |r| Ok(NodeRef { name: r.get(0)?, ip: r.get(1)? }))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(refs)
    }

    pub fn mark_nodes_inactive(&self, names: &[String]) -> Result<usize, StoreError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let mut changed = 0;
        {
            let mut stmt = tx.prepare("UPDATE nodes SET is_active = 0 WHERE name = ?1 AND is_active = 1")?;
            for name in names {
                changed += stmt.execute([name])?;
            }
        }
        tx.commit()?;
        Ok(changed)
    }

    pub fn count_nodes(&self, active_only: bool) -> Result<usize, StoreError> {
        let conn = self.conn.lock();
        let sql = if active_only {
            "SELECT COUNT(*) FROM nodes WHERE is_active = 1"
        } else {
            "SELECT COUNT(*) FROM nodes"
        };
        let n: i64 = conn.query_row(sql, [], |r| r.get(0))?;
        Ok(n as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::Duration;

    fn obs(name: &str) -> NodeObservation {
        NodeObservation { name: name.into(), ..Default::default() }
    }

    #[test]
    fn test_upsert_merges_missing_fields() {
        let store = Store::open_in_memory().unwrap();
        let t0 = OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap();
        let first = NodeObservation {
            ip: Some("10.0.0.1".into()),
            model: Some("MikroTik hAP".into()),
            rf_frequency: Some("5805".into()),
            ..obs("Alpha")
        };
        store.upsert_node(&first, t0).unwrap();

        let second = NodeObservation { description: Some("rooftop".into()), ..obs("alpha") };
        let t1 = t0 + Duration::seconds(30);
        store.upsert_node(&second, t1).unwrap();

        let node = store.get_node("ALPHA").unwrap().unwrap();
        assert_eq!(node.name, "alpha");
        assert_eq!(node.ip.as_deref(), Some("10.0.0.1"));
        assert_eq!(node.model.as_deref(), Some("MikroTik hAP"));
        assert_eq!(node.description.as_deref(), Some("rooftop"));
        assert_eq!(node.first_seen, t0);
        assert_eq!(node.last_seen, t1);
        assert_eq!(node.last_polled, Some(t1));
        assert!(node.is_active);
    }

    #[test]
    fn test_stub_is_promoted_by_upsert() {
        let store = Store::open_in_memory().unwrap();
        let t0 = OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap();
        store.record_stub_node("bravo", Some("10.0.0.2"), t0).unwrap();

        let stub = store.get_node("bravo").unwrap().unwrap();
        assert!(!stub.is_active);
        assert!(stub.last_polled.is_none());

        store.upsert_node(&obs("bravo"), t0 + Duration::seconds(5)).unwrap();
        let node = store.get_node("bravo").unwrap().unwrap();
        assert!(node.is_active);
        assert_eq!(node.ip.as_deref(), Some("10.0.0.2"));
        assert_eq!(node.first_seen, t0);
    }

    #[test]
    fn test_stub_does_not_touch_polled_node() {
        let store = Store::open_in_memory().unwrap();
        let t0 = OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap();
        store.upsert_node(&NodeObservation { ip: Some("10.0.0.1".into()), ..obs("alpha") }, t0).unwrap();
        store.record_stub_node("alpha", Some("10.9.9.9"), t0 + Duration::seconds(60)).unwrap();

        let node = store.get_node("alpha").unwrap().unwrap();
        assert!(node.is_active);
        assert_eq!(node.ip.as_deref(), Some("10.0.0.1"));
        assert_eq!(node.last_seen, t0);
    }

    #[test]
    fn test_stale_nodes_and_deactivation() {
        let store = Store::open_in_memory().unwrap();
        let t0 = OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap();
        store.upsert_node(&obs("old"), t0).unwrap();
        store.upsert_node(&obs("fresh"), t0 + Duration::seconds(400)).unwrap();

        let stale = store.stale_active_nodes(t0 + Duration::seconds(100)).unwrap();
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].name, "old");

        assert_eq!(store.mark_nodes_inactive(&["old".into()]).unwrap(), 1);
        assert_eq!(store.mark_nodes_inactive(&["old".into()]).unwrap(), 0);
        assert_eq!(store.count_nodes(true).unwrap(), 1);
        assert_eq!(store.count_nodes(false).unwrap(), 2);
    }
}
