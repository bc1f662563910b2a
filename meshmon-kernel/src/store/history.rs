use rusqlite::{params, OptionalExtension, Transaction};
use time::{Duration, OffsetDateTime};

use super::{to_ts, ts_col, Store};
use crate::error::StoreError;
use crate::models::{LinkHistorySample, LinkType};
use crate::probe::{LatencyResult, ThroughputResult};

/// A metric lands in an existing row only if that row is younger than this
pub const HISTORY_AMEND_WINDOW: Duration = Duration::minutes(2);

enum Metric<'a> {
    Latency(&'a LatencyResult),
    Throughput(&'a ThroughputResult),
}

impl Metric<'_> {
    /// Column that is NULL while this metric group is still empty
    fn marker(&self) -> &'static str {
        match self {
            Metric::Latency(_) => "ping_loss",
            Metric::Throughput(_) => "throughput_tx",
        }
    }

    fn update(&self, tx: &Transaction<'_>, id: i64) -> rusqlite::Result<usize> {
        match self {
            Metric::Latency(r) => tx.execute(
                "UPDATE link_history SET ping_min = ?2, ping_avg = ?3, ping_max = ?4, ping_loss = ?5 WHERE id = ?1",
                params![id, r.min, r.avg, r.max, r.loss],
            ),
            Metric::Throughput(r) => tx.execute(
                "UPDATE link_history SET throughput_tx = ?2, throughput_rx = ?3 WHERE id = ?1",
                params![id, r.tx_mbps, r.rx_mbps],
            ),
        }
    }
}

impl Store {
    /// Inserts a quality/SNR row for every non-removed RF link
    pub fn record_rf_snapshot(&self, at: OffsetDateTime) -> Result<usize, StoreError> {
        let conn = self.conn.lock();
        let n = conn.execute(
            "INSERT INTO link_history (timestamp, source, target, link_type, quality, snr)
             SELECT ?1, source, target, link_type, quality, snr FROM links
             WHERE status != 'removed' AND link_type = 'RF'",
            [to_ts(at)],
        )?;
        Ok(n)
    }

    /// Stores a latency result for a link; `None` when the link is unknown
    pub fn record_latency(
        &self,
        source: &str,
        target: &str,
        result: &LatencyResult,
        at: OffsetDateTime,
    ) -> Result<Option<i64>, StoreError> {
        self.amend_or_insert(source, target, Metric::Latency(result), at)
    }

    /// Stores a throughput result for a link; `None` when the link is unknown
    pub fn record_throughput(
        &self,
        source: &str,
        target: &str,
        result: &ThroughputResult,
        at: OffsetDateTime,
    ) -> Result<Option<i64>, StoreError> {
        self.amend_or_insert(source, target, Metric::Throughput(result), at)
    }

    fn amend_or_insert(
        &self,
        source: &str,
        target: &str,
        metric: Metric<'_>,
        at: OffsetDateTime,
    ) -> Result<Option<i64>, StoreError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        let sql = format!(
            "SELECT id FROM link_history
             WHERE source = ?1 AND target = ?2 AND timestamp >= ?3 AND {} IS NULL
             ORDER BY timestamp DESC, id DESC LIMIT 1",
            metric.marker()
        );
        let window_start = to_ts(at - HISTORY_AMEND_WINDOW);
        let existing: Option<i64> = tx
            .query_row(&sql, params![source, target, window_start], |r| r.get(0))
            .optional()?;

        let id = match existing {
            Some(id) => {
                metric.update(&tx, id)?;
                id
            }
            None => {
                let link: Option<(String, i64, Option<i64>)> = tx
                    .query_row(
                        "SELECT link_type, quality, snr FROM links WHERE source = ?1 AND target = ?2",
                        params![source, target],
                        |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
                    )
                    .optional()?;
                let Some((link_type, quality, snr)) = link else {
                    return Ok(None);
                };
                tx.execute(
                    "INSERT INTO link_history (timestamp, source, target, link_type, quality, snr)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![to_ts(at), source, target, link_type, quality, snr],
                )?;
                let id = tx.last_insert_rowid();
                metric.update(&tx, id)?;
                id
            }
        };
        tx.commit()?;
        Ok(Some(id))
    }

    /// Samples for a pair at or after `since`, oldest first
    pub fn history_for(
        &self,
        source: &str,
        target: &str,
        since: OffsetDateTime,
    ) -> Result<Vec<LinkHistorySample>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, timestamp, source, target, link_type, quality, snr,
                    ping_min, ping_avg, ping_max, ping_loss, throughput_tx, throughput_rx
             FROM link_history
             WHERE source = ?1 AND target = ?2 AND timestamp >= ?3
             ORDER BY timestamp, id",
        )?;
        let samples = stmt
            .query_map(params![source, target, to_ts(since)], |r| {
                let link_type: String = r.get(4)?;
                Ok(LinkHistorySample {
                    id: r.get(0)?,
                    timestamp: ts_col(r, 1)?,
                    source: r.get(2)?,
                    target: r.get(3)?,
                    link_type: LinkType::parse(&link_type),
                    quality: r.get(5)?,
                    snr: r.get(6)?,
                    ping_min: r.get(7)?,
                    ping_avg: r.get(8)?,
                    ping_max: r.get(9)?,
                    ping_loss: r.get(10)?,
                    throughput_tx: r.get(11)?,
                    throughput_rx: r.get(12)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(samples)
    }

    pub fn prune_history(&self, cutoff: OffsetDateTime) -> Result<usize, StoreError> {
        let conn = self.conn.lock();
        let n = conn.execute("DELETE FROM link_history WHERE timestamp < ?1", [to_ts(cutoff)])?;
        Ok(n)
    }
}
