use rusqlite::params;
use time::OffsetDateTime;

use super::{corrupt_col, to_ts, ts_col, Store};
use crate::error::StoreError;
use crate::models::{Event, EventType, Severity};

impl Store {
    /// Appends events in one transaction and returns them with their row ids
    pub fn append_events(&self, events: &[Event]) -> Result<Vec<Event>, StoreError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let mut stored = Vec::with_capacity(events.len());
        {
            let mut stmt = tx.prepare(
                "INSERT INTO events (event_type, node, details, severity, timestamp) VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for ev in events {
                stmt.execute(params![
                    ev.event_type.as_str(),
                    ev.node,
                    ev.details,
                    ev.severity.as_str(),
                    to_ts(ev.timestamp),
                ])?;
                let mut ev = ev.clone();
                ev.id = Some(tx.last_insert_rowid());
                stored.push(ev);
            }
        }
        tx.commit()?;
        Ok(stored)
    }

    /// Newest first
    pub fn recent_events(&self, limit: usize) -> Result<Vec<Event>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, event_type, node, details, severity, timestamp FROM events
             ORDER BY timestamp DESC, id DESC LIMIT ?1",
        )?;
        let events = stmt
            .query_map([limit as i64], |r| {
                let kind: String = r.get(1)?;
                let severity: String = r.get(4)?;
                Ok(Event {
                    id: Some(r.get(0)?),
                    event_type: EventType::parse(&kind)
                        .ok_or_else(|| corrupt_col(1, format!("unknown event type {:?}", kind)))?,
                    node: r.get(2)?,
                    details: r.get(3)?,
                    severity: Severity::parse(&severity),
                    timestamp: ts_col(r, 5)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(events)
    }

    pub fn clear_events_before(&self, cutoff: OffsetDateTime) -> Result<usize, StoreError> {
        let conn = self.conn.lock();
        let n = conn.execute("DELETE FROM events WHERE timestamp < ?1", [to_ts(cutoff)])?;
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::Duration;

    #[test]
    fn test_append_list_and_clear() {
        let store = Store::open_in_memory().unwrap();
        let t0 = OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap();
        let events = vec![
            Event::new(EventType::LinkNew, "alpha", "New link to bravo", t0),
            Event::new(EventType::LinkDropped, "alpha", "Link to bravo dropped", t0 + Duration::days(3)),
        ];
        let stored = store.append_events(&events).unwrap();
        assert!(stored.iter().all(|e| e.id.is_some()));

        let recent = store.recent_events(10).unwrap();
        assert_eq!(recent[0].event_type, EventType::LinkDropped);
        assert_eq!(recent[0].severity, Severity::Warning);

        assert_eq!(store.clear_events_before(t0 + Duration::days(1)).unwrap(), 1);
        assert_eq!(store.recent_events(10).unwrap().len(), 1);
    }
}
