//! Core domain types for screentrace
//!
//! These types cover the full pipeline, from raw platform transitions on a
//! device to the additive rollup rows the dashboard reads.
//!
//! ## Terminology
//!
//! | Term | Definition |
//! |------|------------|
//! | **RawEvent** | A single foreground/background transition for one app |
//! | **ScreenWindow** | A half-open interval during which the screen was on |
//! | **Session** | A contiguous foreground interval for one app, after gap-merge |
//! | **UsageItem** | The wire form of a clamped, validated session |
//! | **Fragment** | One aggregated contribution to a rollup bucket, identified by a stable id |
//! | **Cursor** | Per-device watermark: the last instant durably processed |
//! | **Rollup** | Pre-aggregated usage total for one time bucket |

use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::{Error, Result};

// ============================================
// Raw activity
// ============================================

/// Kind of a raw app transition event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Foreground,
    Background,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Foreground => "foreground",
            EventKind::Background => "background",
        }
    }
}

impl std::str::FromStr for EventKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "foreground" => Ok(EventKind::Foreground),
            "background" => Ok(EventKind::Background),
            _ => Err(format!("unknown event kind: {}", s)),
        }
    }
}

/// A single foreground/background transition observed on the device.
///
/// Ephemeral: consumed by the sessionizer and never stored past a cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawEvent {
    /// App identifier (package name on mobile, process image on desktop)
    pub app_key: String,
    /// Transition kind
    pub kind: EventKind,
    /// When the transition happened
    pub ts: DateTime<Utc>,
}

/// Kind of a screen power toggle notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToggleKind {
    ScreenOn,
    ScreenOff,
}

/// An asynchronous screen on/off notification from the platform.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScreenToggle {
    pub kind: ToggleKind,
    pub ts: DateTime<Utc>,
}

/// Half-open interval `[start, end)` of active-screen time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScreenWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

// ============================================
// Sessions
// ============================================

/// A contiguous foreground interval for one app. `end > start` always.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub app_key: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl Session {
    pub fn duration_ms(&self) -> i64 {
        (self.end - self.start).num_milliseconds()
    }
}

// ============================================
// Wire forms
// ============================================

/// Format an instant for the wire with an explicit UTC marker.
pub fn format_utc(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Session-form wire item: one clamped usage session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageItem {
    /// App identifier
    pub package: String,
    /// Duration in milliseconds; equals `windowEnd - windowStart`
    #[serde(rename = "totalMs")]
    pub total_ms: u64,
    /// RFC 3339 instant with an explicit UTC marker
    #[serde(rename = "windowStart")]
    pub window_start: String,
    /// RFC 3339 instant with an explicit UTC marker
    #[serde(rename = "windowEnd")]
    pub window_end: String,
}

impl UsageItem {
    /// Build a wire item from a clamped session.
    pub fn from_session(session: &Session) -> Self {
        UsageItem {
            package: session.app_key.clone(),
            total_ms: session.duration_ms().max(0) as u64,
            window_start: format_utc(session.start),
            window_end: format_utc(session.end),
        }
    }

    /// Duration in whole seconds, rounded up, at least 1.
    pub fn duration_secs(&self) -> f64 {
        ((self.total_ms + 999) / 1000).max(1) as f64
    }
}

/// Session-form batch request body.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UsageBatchRequest {
    pub items: Vec<UsageItem>,
}

impl UsageBatchRequest {
    /// Split a batch into chunks that each fit the given item and byte
    /// ceilings. A single item that alone exceeds `max_bytes` gets its own
    /// chunk; the server rejects it item-level rather than wholesale.
    pub fn chunked(&self, max_items: usize, max_bytes: usize) -> Result<Vec<UsageBatchRequest>> {
        let mut chunks = Vec::new();
        let mut current: Vec<UsageItem> = Vec::new();
        let mut current_bytes = 0usize;

        for item in &self.items {
            let item_bytes = serde_json::to_vec(item)?.len();
            let over_items = current.len() + 1 > max_items;
            let over_bytes = !current.is_empty() && current_bytes + item_bytes > max_bytes;
            if over_items || over_bytes {
                chunks.push(UsageBatchRequest {
                    items: std::mem::take(&mut current),
                });
                current_bytes = 0;
            }
            current_bytes += item_bytes;
            current.push(item.clone());
        }
        if !current.is_empty() {
            chunks.push(UsageBatchRequest { items: current });
        }
        Ok(chunks)
    }
}

/// Per-item rejection detail in a session-form response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchItemError {
    pub index: usize,
    pub error: String,
    pub code: String,
}

/// Session-form batch response body.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageBatchResponse {
    pub accepted: usize,
    pub duplicates: usize,
    pub rejected: usize,
    #[serde(default)]
    pub errors: Vec<BatchItemError>,
}

/// Raw-form wire event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawUsageEvent {
    /// Stable client-generated id, the dedup identifier for this event
    pub event_id: Uuid,
    /// Epoch milliseconds of the event (end of the measured interval)
    pub ts: i64,
    /// Aggregation kind, e.g. "app_session"
    pub kind: String,
    /// Aggregation key, e.g. the package name
    pub key: String,
    /// Seconds of usage this event contributes
    pub secs: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extras: Option<serde_json::Value>,
}

/// Raw-form batch request body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventBatchRequest {
    pub device_id: String,
    #[serde(default)]
    pub sequence_start: u64,
    pub events: Vec<RawUsageEvent>,
    #[serde(default = "default_client_version")]
    pub client_version: String,
}

fn default_client_version() -> String {
    "unknown".to_string()
}

/// Raw-form batch response body.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventBatchResponse {
    pub acknowledged_ids: Vec<String>,
    #[serde(default)]
    pub backoff_seconds: u64,
}

// ============================================
// Cursor
// ============================================

/// Per-device watermark of durably processed activity.
///
/// Monotonically non-decreasing; advanced only per the batcher rules.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadCursor {
    pub device_id: String,
    pub last_confirmed: DateTime<Utc>,
}

// ============================================
// Queue payload
// ============================================

/// One event as it travels the durable ordered queue.
///
/// Both wire forms normalize into this shape at the gateway so that a single
/// validator contract covers the stream processor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedEvent {
    pub account_id: String,
    pub device_id: String,
    /// Dedup identifier: raw-form event_id, or the session fragment id
    pub event_id: String,
    pub kind: String,
    pub key: String,
    pub secs: f64,
    /// RFC 3339, UTC-marked, as received or derived at the gateway
    pub window_start: String,
    pub window_end: String,
    pub client_version: String,
    pub enqueued_at: DateTime<Utc>,
}

impl QueuedEvent {
    /// Device-scoped dedup cache key.
    pub fn dedup_key(&self) -> String {
        format!("{}:{}", self.device_id, self.event_id)
    }
}

// ============================================
// Rollups
// ============================================

/// Fixed rollup bucket widths, all derived from the same events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BucketWidth {
    Minute,
    FiveMinutes,
    Hour,
}

impl BucketWidth {
    pub const ALL: [BucketWidth; 3] =
        [BucketWidth::Minute, BucketWidth::FiveMinutes, BucketWidth::Hour];

    pub fn minutes(&self) -> i64 {
        match self {
            BucketWidth::Minute => 1,
            BucketWidth::FiveMinutes => 5,
            BucketWidth::Hour => 60,
        }
    }

    /// Table suffix used by the rollup store
    pub fn as_str(&self) -> &'static str {
        match self {
            BucketWidth::Minute => "1m",
            BucketWidth::FiveMinutes => "5m",
            BucketWidth::Hour => "60m",
        }
    }
}

impl std::fmt::Display for BucketWidth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for BucketWidth {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "1m" => Ok(BucketWidth::Minute),
            "5m" => Ok(BucketWidth::FiveMinutes),
            "60m" => Ok(BucketWidth::Hour),
            _ => Err(format!("unknown bucket width: {}", s)),
        }
    }
}

/// Round an instant down to its bucket boundary.
pub fn bucket_start(ts: DateTime<Utc>, width: BucketWidth) -> DateTime<Utc> {
    let width_ms = width.minutes() * 60_000;
    let ms = ts.timestamp_millis();
    let floored = ms - ms.rem_euclid(width_ms);
    Utc.timestamp_millis_opt(floored).single().unwrap_or(ts)
}

/// One additive aggregate row, keyed by
/// `(account_id, device_id, bucket_start, kind, key)` per width.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollupRow {
    pub account_id: String,
    pub device_id: String,
    pub bucket_start: DateTime<Utc>,
    pub bucket_width: BucketWidth,
    pub kind: String,
    pub key: String,
    pub aggregated_seconds: f64,
    pub fragment_count: i64,
    pub last_ts: Option<DateTime<Utc>>,
}

// ============================================
// Fragment identity
// ============================================

/// Compute the stable business-key identifier for a session-form item.
///
/// Returns a 32-character hex digest of
/// SHA-256(device_id:package:windowStart:windowEnd). The same item resent by
/// a client always maps to the same fragment id, which is what makes resends
/// collapse to no-ops in the dedup cache and the `seen_fragments` ledger.
pub fn fragment_id(device_id: &str, item: &UsageItem) -> String {
    let hash_input = format!(
        "{}:{}:{}:{}",
        device_id, item.package, item.window_start, item.window_end
    );

    let mut hasher = Sha256::new();
    hasher.update(hash_input.as_bytes());
    let result = hasher.finalize();

    // First 16 bytes (32 hex chars)
    hex::encode(&result[..16])
}

/// Parse a wire timestamp that has already passed validation.
pub fn parse_wire_instant(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Queue(format!("unparseable instant {:?}: {}", raw, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn item(package: &str, start: DateTime<Utc>, ms: i64) -> UsageItem {
        UsageItem {
            package: package.to_string(),
            total_ms: ms as u64,
            window_start: format_utc(start),
            window_end: format_utc(start + Duration::milliseconds(ms)),
        }
    }

    #[test]
    fn test_format_utc_has_marker() {
        let ts = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
        let formatted = format_utc(ts);
        assert!(formatted.ends_with('Z'));
    }

    #[test]
    fn test_fragment_id_deterministic() {
        let start = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
        let a = item("com.example.app", start, 40_000);
        let b = item("com.example.app", start, 40_000);
        assert_eq!(fragment_id("device-1", &a), fragment_id("device-1", &b));
        assert_eq!(fragment_id("device-1", &a).len(), 32);
    }

    #[test]
    fn test_fragment_id_scoped_by_device() {
        let start = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
        let a = item("com.example.app", start, 40_000);
        assert_ne!(fragment_id("device-1", &a), fragment_id("device-2", &a));
    }

    #[test]
    fn test_bucket_start_floors() {
        let ts = Utc.with_ymd_and_hms(2025, 6, 1, 12, 7, 31).unwrap();
        assert_eq!(
            bucket_start(ts, BucketWidth::Minute),
            Utc.with_ymd_and_hms(2025, 6, 1, 12, 7, 0).unwrap()
        );
        assert_eq!(
            bucket_start(ts, BucketWidth::FiveMinutes),
            Utc.with_ymd_and_hms(2025, 6, 1, 12, 5, 0).unwrap()
        );
        assert_eq!(
            bucket_start(ts, BucketWidth::Hour),
            Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_bucket_start_on_boundary_is_identity() {
        let ts = Utc.with_ymd_and_hms(2025, 6, 1, 12, 5, 0).unwrap();
        assert_eq!(bucket_start(ts, BucketWidth::FiveMinutes), ts);
    }

    #[test]
    fn test_duration_secs_rounds_up() {
        let start = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
        let i = item("com.example.app", start, 40_001);
        assert_eq!(i.duration_secs(), 41.0);
        let i = item("com.example.app", start, 40_000);
        assert_eq!(i.duration_secs(), 40.0);
    }

    #[test]
    fn test_chunked_by_item_count() {
        let start = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
        let batch = UsageBatchRequest {
            items: (0..5)
                .map(|i| item(&format!("app{}", i), start, 10_000))
                .collect(),
        };
        let chunks = batch.chunked(2, usize::MAX).unwrap();
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].items.len(), 2);
        assert_eq!(chunks[2].items.len(), 1);
    }

    #[test]
    fn test_chunked_by_bytes() {
        let start = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
        let one = item("com.example.app", start, 10_000);
        let per_item = serde_json::to_vec(&one).unwrap().len();
        let batch = UsageBatchRequest {
            items: vec![one.clone(), one.clone(), one],
        };
        let chunks = batch.chunked(usize::MAX, per_item + 1).unwrap();
        assert_eq!(chunks.len(), 3);
    }

    #[test]
    fn test_usage_item_wire_names() {
        let start = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
        let json = serde_json::to_string(&item("com.example.app", start, 40_000)).unwrap();
        assert!(json.contains("\"totalMs\":40000"));
        assert!(json.contains("\"windowStart\""));
        assert!(json.contains("\"windowEnd\""));
    }
}
