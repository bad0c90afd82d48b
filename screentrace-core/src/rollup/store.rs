//! Rollup store operations
//!
//! One idempotent upsert path for the stream processor, range/device-filtered
//! reads for dashboards, and the dead-letter sink. Same-bucket concurrency is
//! serialized here: the fragment-ledger insert and every width's increment
//! happen in a single transaction.

use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::types::{
    bucket_start, format_utc, parse_wire_instant, BucketWidth, QueuedEvent, RollupRow,
};
use crate::validate::RejectReason;

/// Outcome of one upsert attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertResult {
    /// Fragment recorded and all widths incremented
    Aggregated,
    /// Fragment was already in the ledger; nothing changed
    AlreadySeen,
}

/// A dead-lettered event.
#[derive(Debug, Clone)]
pub struct DeadLetterRow {
    pub id: String,
    pub device_id: String,
    pub event_id: Option<String>,
    pub reason: String,
    pub payload: serde_json::Value,
    pub failed_at: DateTime<Utc>,
}

/// Rollup database handle (single connection, WAL mode).
pub struct RollupStore {
    conn: Mutex<Connection>,
}

impl RollupStore {
    /// Open or create the store at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        conn.execute_batch(
            "
            PRAGMA foreign_keys = ON;
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            ",
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory store (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute("PRAGMA foreign_keys = ON", [])?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Run migrations on this store.
    pub fn migrate(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        super::schema::run_migrations(&conn)?;
        Ok(())
    }

    /// Idempotently fold one event into every rollup width.
    ///
    /// The fragment ledger insert and the increments share one transaction:
    /// either the event is fully aggregated exactly once, or nothing changes.
    pub fn upsert_usage(&self, event: &QueuedEvent) -> Result<UpsertResult> {
        let start = parse_wire_instant(&event.window_start)?;
        let end = parse_wire_instant(&event.window_end)?;

        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        let inserted = tx.execute(
            "INSERT OR IGNORE INTO seen_fragments (device_id, event_id, seen_at)
             VALUES (?1, ?2, ?3)",
            params![event.device_id, event.event_id, format_utc(Utc::now())],
        )?;
        if inserted == 0 {
            // The ledger already has this fragment; a dedup-cache miss on a
            // long-delayed resend lands here.
            tx.rollback()?;
            return Ok(UpsertResult::AlreadySeen);
        }

        for width in BucketWidth::ALL {
            let bucket = format_utc(bucket_start(start, width));
            let sql = format!(
                "INSERT INTO usage_{w}
                     (account_id, device_id, bucket_start, kind, key,
                      secs_sum, fragment_count, last_ts)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, 1, ?7)
                 ON CONFLICT (account_id, device_id, bucket_start, kind, key)
                 DO UPDATE SET
                     secs_sum = secs_sum + excluded.secs_sum,
                     fragment_count = fragment_count + 1,
                     last_ts = MAX(COALESCE(last_ts, ''), excluded.last_ts)",
                w = width.as_str()
            );
            tx.execute(
                &sql,
                params![
                    event.account_id,
                    event.device_id,
                    bucket,
                    event.kind,
                    event.key,
                    event.secs,
                    format_utc(end),
                ],
            )?;
        }

        tx.commit()?;
        Ok(UpsertResult::Aggregated)
    }

    /// Record an event that failed post-ingest validation.
    pub fn dead_letter(&self, event: &QueuedEvent, reason: RejectReason) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO dead_letter (id, device_id, event_id, reason, payload, failed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                Uuid::new_v4().to_string(),
                event.device_id,
                event.event_id,
                reason.code(),
                serde_json::to_string(event)?,
                format_utc(Utc::now()),
            ],
        )?;
        Ok(())
    }

    /// Rollup rows for an account in `[from, to)` at one width, optionally
    /// filtered to a device, ordered by bucket start.
    pub fn query_range(
        &self,
        account_id: &str,
        device_id: Option<&str>,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        width: BucketWidth,
    ) -> Result<Vec<RollupRow>> {
        let conn = self.conn.lock().unwrap();

        let mut sql = format!(
            "SELECT account_id, device_id, bucket_start, kind, key,
                    secs_sum, fragment_count, last_ts
             FROM usage_{w}
             WHERE account_id = ?1 AND bucket_start >= ?2 AND bucket_start < ?3",
            w = width.as_str()
        );
        if device_id.is_some() {
            sql.push_str(" AND device_id = ?4");
        }
        sql.push_str(" ORDER BY bucket_start, device_id, kind, key");

        let mut stmt = conn.prepare(&sql)?;
        let map_row = |row: &rusqlite::Row<'_>| -> rusqlite::Result<RollupRow> {
            let bucket_raw: String = row.get(2)?;
            let last_ts_raw: Option<String> = row.get(7)?;
            Ok(RollupRow {
                account_id: row.get(0)?,
                device_id: row.get(1)?,
                bucket_start: DateTime::parse_from_rfc3339(&bucket_raw)
                    .map(|dt| dt.with_timezone(&Utc))
                    .unwrap_or_default(),
                bucket_width: width,
                kind: row.get(3)?,
                key: row.get(4)?,
                aggregated_seconds: row.get(5)?,
                fragment_count: row.get(6)?,
                last_ts: last_ts_raw
                    .and_then(|raw| DateTime::parse_from_rfc3339(&raw).ok())
                    .map(|dt| dt.with_timezone(&Utc)),
            })
        };

        let rows = match device_id {
            Some(device) => stmt
                .query_map(
                    params![account_id, format_utc(from), format_utc(to), device],
                    map_row,
                )?
                .collect::<rusqlite::Result<Vec<_>>>()?,
            None => stmt
                .query_map(params![account_id, format_utc(from), format_utc(to)], map_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?,
        };

        Ok(rows)
    }

    /// Total aggregated seconds and fragment count per key over a range.
    pub fn totals_by_key(
        &self,
        account_id: &str,
        device_id: Option<&str>,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        width: BucketWidth,
    ) -> Result<Vec<(String, f64, i64)>> {
        let rows = self.query_range(account_id, device_id, from, to, width)?;
        let mut totals: Vec<(String, f64, i64)> = Vec::new();
        for row in rows {
            match totals.iter_mut().find(|(key, _, _)| *key == row.key) {
                Some((_, secs, count)) => {
                    *secs += row.aggregated_seconds;
                    *count += row.fragment_count;
                }
                None => totals.push((row.key, row.aggregated_seconds, row.fragment_count)),
            }
        }
        totals.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        Ok(totals)
    }

    /// Dead-letter rows for a device, newest first (observability only).
    pub fn dead_letters(&self, device_id: &str, limit: usize) -> Result<Vec<DeadLetterRow>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, device_id, event_id, reason, payload, failed_at
             FROM dead_letter
             WHERE device_id = ?1
             ORDER BY failed_at DESC
             LIMIT ?2",
        )?;

        let rows = stmt
            .query_map(params![device_id, limit as i64], |row| {
                let payload_raw: String = row.get(4)?;
                let failed_raw: String = row.get(5)?;
                Ok(DeadLetterRow {
                    id: row.get(0)?,
                    device_id: row.get(1)?,
                    event_id: row.get(2)?,
                    reason: row.get(3)?,
                    payload: serde_json::from_str(&payload_raw)
                        .unwrap_or(serde_json::Value::Null),
                    failed_at: DateTime::parse_from_rfc3339(&failed_raw)
                        .map(|dt| dt.with_timezone(&Utc))
                        .unwrap_or_default(),
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(rows)
    }

    /// Whether a fragment is already in the ledger.
    pub fn fragment_seen(&self, device_id: &str, event_id: &str) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let found: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM seen_fragments WHERE device_id = ?1 AND event_id = ?2",
                params![device_id, event_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 7, 0).unwrap()
    }

    fn store() -> RollupStore {
        let store = RollupStore::open_in_memory().unwrap();
        store.migrate().unwrap();
        store
    }

    fn event(event_id: &str, secs: f64) -> QueuedEvent {
        QueuedEvent {
            account_id: "default".to_string(),
            device_id: "device-1".to_string(),
            event_id: event_id.to_string(),
            kind: "app_session".to_string(),
            key: "com.example.app".to_string(),
            secs,
            window_start: format_utc(t0()),
            window_end: format_utc(t0() + chrono::Duration::seconds(secs as i64)),
            client_version: "test".to_string(),
            enqueued_at: t0(),
        }
    }

    #[test]
    fn test_first_upsert_creates_rows_at_all_widths() {
        let store = store();
        assert_eq!(store.upsert_usage(&event("e0", 40.0)).unwrap(), UpsertResult::Aggregated);

        for width in BucketWidth::ALL {
            let rows = store
                .query_range("default", None, t0() - chrono::Duration::hours(1), t0() + chrono::Duration::hours(1), width)
                .unwrap();
            assert_eq!(rows.len(), 1, "width {}", width);
            assert_eq!(rows[0].aggregated_seconds, 40.0);
            assert_eq!(rows[0].fragment_count, 1);
        }
    }

    #[test]
    fn test_same_bucket_accumulates() {
        let store = store();
        store.upsert_usage(&event("e0", 40.0)).unwrap();
        store.upsert_usage(&event("e1", 20.0)).unwrap();

        let rows = store
            .query_range("default", None, t0() - chrono::Duration::hours(1), t0() + chrono::Duration::hours(1), BucketWidth::Hour)
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].aggregated_seconds, 60.0);
        assert_eq!(rows[0].fragment_count, 2);
    }

    #[test]
    fn test_duplicate_fragment_is_ignored() {
        let store = store();
        assert_eq!(store.upsert_usage(&event("e0", 40.0)).unwrap(), UpsertResult::Aggregated);
        assert_eq!(store.upsert_usage(&event("e0", 40.0)).unwrap(), UpsertResult::AlreadySeen);

        let rows = store
            .query_range("default", None, t0() - chrono::Duration::hours(1), t0() + chrono::Duration::hours(1), BucketWidth::Minute)
            .unwrap();
        assert_eq!(rows[0].aggregated_seconds, 40.0);
        assert_eq!(rows[0].fragment_count, 1);
        assert!(store.fragment_seen("device-1", "e0").unwrap());
    }

    #[test]
    fn test_bucket_boundaries_respected() {
        let store = store();
        let mut other = event("e1", 30.0);
        // 12:07 and 12:09 share the 5m bucket but not the 1m bucket
        other.window_start = format_utc(t0() + chrono::Duration::minutes(2));
        other.window_end = format_utc(t0() + chrono::Duration::minutes(2) + chrono::Duration::seconds(30));
        store.upsert_usage(&event("e0", 40.0)).unwrap();
        store.upsert_usage(&other).unwrap();

        let minute_rows = store
            .query_range("default", None, t0() - chrono::Duration::hours(1), t0() + chrono::Duration::hours(1), BucketWidth::Minute)
            .unwrap();
        assert_eq!(minute_rows.len(), 2);

        let five_rows = store
            .query_range("default", None, t0() - chrono::Duration::hours(1), t0() + chrono::Duration::hours(1), BucketWidth::FiveMinutes)
            .unwrap();
        assert_eq!(five_rows.len(), 1);
        assert_eq!(five_rows[0].aggregated_seconds, 70.0);
    }

    #[test]
    fn test_device_filter() {
        let store = store();
        store.upsert_usage(&event("e0", 40.0)).unwrap();
        let mut other_device = event("e1", 10.0);
        other_device.device_id = "device-2".to_string();
        store.upsert_usage(&other_device).unwrap();

        let rows = store
            .query_range("default", Some("device-1"), t0() - chrono::Duration::hours(1), t0() + chrono::Duration::hours(1), BucketWidth::Hour)
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].device_id, "device-1");
    }

    #[test]
    fn test_totals_by_key_sorted_descending() {
        let store = store();
        store.upsert_usage(&event("e0", 40.0)).unwrap();
        let mut chat = event("e1", 90.0);
        chat.key = "com.example.chat".to_string();
        store.upsert_usage(&chat).unwrap();

        let totals = store
            .totals_by_key("default", None, t0() - chrono::Duration::hours(1), t0() + chrono::Duration::hours(1), BucketWidth::Hour)
            .unwrap();
        assert_eq!(totals.len(), 2);
        assert_eq!(totals[0].0, "com.example.chat");
        assert_eq!(totals[0].1, 90.0);
    }

    #[test]
    fn test_dead_letter_round_trip() {
        let store = store();
        store.dead_letter(&event("bad", 0.0), RejectReason::ClockSkew).unwrap();

        let rows = store.dead_letters("device-1", 10).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].reason, "clock_skew");
        assert_eq!(rows[0].event_id.as_deref(), Some("bad"));
    }
}
