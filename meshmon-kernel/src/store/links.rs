use rusqlite::{params, OptionalExtension, Row};
use time::OffsetDateTime;

use super::{corrupt_col, to_ts, ts_col, Store};
use crate::error::StoreError;
use crate::models::{Link, LinkRef, LinkStatus, LinkType, LinkUpsert};

const LINK_COLUMNS: &str = "source, target, link_type, quality, snr, distance, \
     first_seen, last_seen, stable_since, drop_count, status";

fn link_from_row(row: &Row<'_>) -> rusqlite::Result<Link> {
    let link_type: String = row.get(2)?;
    let status: String = row.get(10)?;
    Ok(Link {
        source: row.get(0)?,
        target: row.get(1)?,
        link_type: LinkType::parse(&link_type),
        quality: row.get(3)?,
        snr: row.get(4)?,
        distance: row.get(5)?,
        first_seen: ts_col(row, 6)?,
        last_seen: ts_col(row, 7)?,
        stable_since: ts_col(row, 8)?,
        drop_count: row.get(9)?,
        status: LinkStatus::parse(&status)
            .ok_or_else(|| corrupt_col(10, format!("unknown link status {:?}", status)))?,
    })
}

/// Fresh measurements for one directional link
#[derive(Debug, Clone, PartialEq)]
pub struct LinkObservation {
    pub source: String,
    pub target: String,
    pub link_type: LinkType,
    pub quality: i64,
    pub snr: Option<i64>,
    pub distance: Option<i64>,
}

impl Store {
    pub fn get_link(&self, source: &str, target: &str) -> Result<Option<Link>, StoreError> {
        let conn = self.conn.lock();
        let sql = format!("SELECT {} FROM links WHERE source = ?1 AND target = ?2", LINK_COLUMNS);
        let link = conn
            .query_row(&sql, params![source, target], link_from_row)
            .optional()?;
        Ok(link)
    }

    pub fn list_links(&self, include_removed: bool) -> Result<Vec<Link>, StoreError> {
        let conn = self.conn.lock();
        let filter = if include_removed { "" } else { "WHERE status != 'removed'" };
        let sql = format!("SELECT {} FROM links {} ORDER BY source, target", LINK_COLUMNS, filter);
        let mut stmt = conn.prepare(&sql)?;
        let links = stmt
            .query_map([], link_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(links)
    }

    /// Non-removed RF links, the set the telemetry jobs probe
    pub fn rf_links(&self) -> Result<Vec<Link>, StoreError> {
        Ok(self
            .list_links(false)?
            .into_iter()
            .filter(|l| l.link_type.is_rf())
            .collect())
    }

    /// Inserts or refreshes a link, reviving it if it was dropped or removed.
    ///
    /// A revival bumps `drop_count` and resets `stable_since` to `at`.
    pub fn upsert_link(&self, obs: &LinkObservation, at: OffsetDateTime) -> Result<LinkUpsert, StoreError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let now = to_ts(at);

        let prior: Option<(String, i64)> = tx
            .query_row(
                "SELECT status, drop_count FROM links WHERE source = ?1 AND target = ?2",
                params![obs.source, obs.target],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .optional()?;

        let outcome = match prior {
            None => {
                tx.execute(
                    "INSERT INTO links (source, target, link_type, quality, snr, distance,
                                        first_seen, last_seen, stable_since, drop_count, status)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7, ?7, 0, 'good')",
                    params![obs.source, obs.target, obs.link_type.as_str(), obs.quality, obs.snr, obs.distance, now],
                )?;
                LinkUpsert::Inserted
            }
            Some((status, drop_count)) => {
                let previous = LinkStatus::parse(&status)
                    .ok_or_else(|| StoreError::Corrupt(format!("link {}->{} has status {:?}", obs.source, obs.target, status)))?;
                if previous == LinkStatus::Good {
                    tx.execute(
                        "UPDATE links SET link_type = ?3, quality = ?4, snr = COALESCE(?5, snr), distance = COALESCE(?6, distance), last_seen = ?7
                         WHERE source = ?1 AND target = ?2",
                        params![obs.source, obs.target, obs.link_type.as_str(), obs.quality, obs.snr, obs.distance, now],
                    )?;
                    LinkUpsert::Refreshed
                } else {
                    tx.execute(
                        "UPDATE links SET link_type = ?3, quality = ?4, snr = COALESCE(?5, snr), distance = COALESCE(?6, distance), last_seen = ?7,
                                          stable_since = ?7, drop_count = drop_count + 1, status = 'good'
                         WHERE source = ?1 AND target = ?2",
                        params![obs.source, obs.target, obs.link_type.as_str(), obs.quality, obs.snr, obs.distance, now],
                    )?;
                    LinkUpsert::Revived { previous, drop_count: drop_count + 1 }
                }
            }
        };
        tx.commit()?;
        Ok(outcome)
    }

    /// Moves `good` links last seen before `cutoff` to `dropped`, returning exactly those links
    pub fn drop_stale_links(&self, cutoff: OffsetDateTime) -> Result<Vec<LinkRef>, StoreError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let cutoff = to_ts(cutoff);
        let dropped = {
            let mut stmt = tx.prepare(
                "SELECT source, target, link_type FROM links
                 WHERE status = 'good' AND last_seen < ?1 ORDER BY source, target",
            )?;
            let rows = stmt
                .query_map([cutoff], |r| {
                    let link_type: String = r.get(2)?;
                    Ok(LinkRef { source: r.get(0)?, target: r.get(1)?, link_type: LinkType::parse(&link_type) })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        };
        tx.execute(
            "UPDATE links SET status = 'dropped' WHERE status = 'good' AND last_seen < ?1",
            [cutoff],
        )?;
        tx.commit()?;
        Ok(dropped)
    }

    /// Moves `dropped` links last seen before `cutoff` to `removed`
    pub fn remove_dropped_links(&self, cutoff: OffsetDateTime) -> Result<usize, StoreError> {
        let conn = self.conn.lock();
        let n = conn.execute(
            "UPDATE links SET status = 'removed' WHERE status = 'dropped' AND last_seen < ?1",
            [to_ts(cutoff)],
        )?;
        Ok(n)
    }

    pub fn count_links(&self, status: LinkStatus) -> Result<usize, StoreError> {
        let conn = self.conn.lock();
        let n: i64 = conn.query_row(
            "SELECT COUNT(*) FROM links WHERE status = ?1",
            [status.as_str()],
            |r| r.get(0),
        )?;
        Ok(n as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::Duration;

    fn rf(source: &str, target: &str, quality: i64) -> LinkObservation {
        LinkObservation {
            source: source.into(),
            target: target.into(),
            link_type: LinkType::Rf,
            quality,
            snr: Some(20),
            distance: None,
        }
    }

    #[test]
    fn test_insert_then_refresh() {
        let store = Store::open_in_memory().unwrap();
        let t0 = OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap();
        assert_eq!(store.upsert_link(&rf("a", "b", 90), t0).unwrap(), LinkUpsert::Inserted);
        let t1 = t0 + Duration::seconds(30);
        assert_eq!(store.upsert_link(&rf("a", "b", 80), t1).unwrap(), LinkUpsert::Refreshed);

        let link = store.get_link("a", "b").unwrap().unwrap();
        assert_eq!(link.quality, 80);
        assert_eq!(link.first_seen, t0);
        assert_eq!(link.last_seen, t1);
        assert_eq!(link.stable_since, t0);
        assert_eq!(link.drop_count, 0);
    }

    #[test]
    fn test_refresh_keeps_known_snr_and_distance() {
        let store = Store::open_in_memory().unwrap();
        let t0 = OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap();
        store.upsert_link(&LinkObservation { distance: Some(1200), ..rf("a", "b", 90) }, t0).unwrap();

        let bare = LinkObservation { snr: None, distance: None, ..rf("a", "b", 85) };
        store.upsert_link(&bare, t0 + Duration::seconds(30)).unwrap();
        let link = store.get_link("a", "b").unwrap().unwrap();
        assert_eq!((link.quality, link.snr, link.distance), (85, Some(20), Some(1200)));

        let fresh = LinkObservation { snr: Some(12), ..bare };
        store.upsert_link(&fresh, t0 + Duration::seconds(60)).unwrap();
        assert_eq!(store.get_link("a", "b").unwrap().unwrap().snr, Some(12));
    }

    #[test]
    fn test_drop_remove_and_revive() {
        let store = Store::open_in_memory().unwrap();
        let t0 = OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap();
        store.upsert_link(&rf("a", "b", 90), t0).unwrap();

        let dropped = store.drop_stale_links(t0 + Duration::seconds(1)).unwrap();
        assert_eq!(dropped.len(), 1);
        assert_eq!(dropped[0].link_type, LinkType::Rf);
        assert!(store.drop_stale_links(t0 + Duration::seconds(1)).unwrap().is_empty());

        assert_eq!(store.remove_dropped_links(t0 + Duration::seconds(1)).unwrap(), 1);
        assert_eq!(store.get_link("a", "b").unwrap().unwrap().status, LinkStatus::Removed);
        assert!(store.rf_links().unwrap().is_empty());

        let t2 = t0 + Duration::seconds(900);
        let outcome = store.upsert_link(&rf("a", "b", 70), t2).unwrap();
        assert_eq!(outcome, LinkUpsert::Revived { previous: LinkStatus::Removed, drop_count: 1 });
        let link = store.get_link("a", "b").unwrap().unwrap();
        assert_eq!(link.status, LinkStatus::Good);
        assert_eq!(link.stable_since, t2);
    }

    #[test]
    fn test_remove_skips_good_links() {
        let store = Store::open_in_memory().unwrap();
        let t0 = OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap();
        store.upsert_link(&rf("a", "b", 90), t0).unwrap();
        assert_eq!(store.remove_dropped_links(t0 + Duration::seconds(10_000)).unwrap(), 0);
        assert_eq!(store.count_links(LinkStatus::Good).unwrap(), 1);
    }
}
