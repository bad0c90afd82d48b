//! Shared usage-item validator
//!
//! The identical contract runs in three places: the agent batcher before
//! upload, the ingest gateway on arrival, and the stream processor before
//! aggregation (the server never trusts the client tier alone).
//!
//! Checks run in a fixed order and short-circuit on the first failure.
//! A failing item is dropped with its reason code; it never affects sibling
//! items in the same batch and is never retried unmodified.

use chrono::{DateTime, Duration, Utc};

use crate::types::{BatchItemError, UsageItem};

/// Sessions longer than this are out of policy.
pub const MAX_SESSION_MS: i64 = 8 * 60 * 60 * 1_000;

/// Tolerance for a device clock running ahead of the server.
pub const CLOCK_SKEW_GRACE_MS: i64 = 5 * 60 * 1_000;

/// Reason an item failed validation, in check order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    NonPositiveDuration,
    InvalidTimestamp,
    MissingUtcMarker,
    EndNotAfterStart,
    WindowTooLong,
    ClockSkew,
}

impl RejectReason {
    /// Stable machine-readable code reported to clients and logs
    pub fn code(&self) -> &'static str {
        match self {
            RejectReason::NonPositiveDuration => "non_positive_duration",
            RejectReason::InvalidTimestamp => "invalid_timestamp",
            RejectReason::MissingUtcMarker => "timezone",
            RejectReason::EndNotAfterStart => "end_not_after_start",
            RejectReason::WindowTooLong => "window_too_long",
            RejectReason::ClockSkew => "clock_skew",
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            RejectReason::NonPositiveDuration => "totalMs must be > 0",
            RejectReason::InvalidTimestamp => "windowStart/windowEnd must be valid instants",
            RejectReason::MissingUtcMarker => "timestamps must be UTC with an explicit marker",
            RejectReason::EndNotAfterStart => "windowEnd must be after windowStart",
            RejectReason::WindowTooLong => "session duration exceeds the 8 hour limit",
            RejectReason::ClockSkew => "windowEnd is too far in the future",
        }
    }
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.code())
    }
}

fn has_utc_marker(raw: &str) -> bool {
    let trimmed = raw.trim();
    trimmed.ends_with('Z') || trimmed.ends_with("+00:00")
}

/// Validate one wire item against `now`. Returns the first failing check.
pub fn validate_item(item: &UsageItem, now: DateTime<Utc>) -> Result<(), RejectReason> {
    if item.total_ms == 0 {
        return Err(RejectReason::NonPositiveDuration);
    }

    let start = DateTime::parse_from_rfc3339(&item.window_start)
        .map_err(|_| RejectReason::InvalidTimestamp)?
        .with_timezone(&Utc);
    let end = DateTime::parse_from_rfc3339(&item.window_end)
        .map_err(|_| RejectReason::InvalidTimestamp)?
        .with_timezone(&Utc);

    if !has_utc_marker(&item.window_start) || !has_utc_marker(&item.window_end) {
        return Err(RejectReason::MissingUtcMarker);
    }

    if end <= start {
        return Err(RejectReason::EndNotAfterStart);
    }

    if end - start > Duration::milliseconds(MAX_SESSION_MS) {
        return Err(RejectReason::WindowTooLong);
    }

    if end > now + Duration::milliseconds(CLOCK_SKEW_GRACE_MS) {
        return Err(RejectReason::ClockSkew);
    }

    Ok(())
}

/// Validate a batch, keeping item independence: the result carries the
/// surviving items and a per-index error list for the rejects.
pub fn partition_valid(
    items: &[UsageItem],
    now: DateTime<Utc>,
) -> (Vec<(usize, UsageItem)>, Vec<BatchItemError>) {
    let mut valid = Vec::new();
    let mut errors = Vec::new();

    for (index, item) in items.iter().enumerate() {
        match validate_item(item, now) {
            Ok(()) => valid.push((index, item.clone())),
            Err(reason) => {
                tracing::debug!(
                    package = %item.package,
                    index,
                    reason = %reason.code(),
                    "Dropping invalid usage item"
                );
                errors.push(BatchItemError {
                    index,
                    error: reason.message().to_string(),
                    code: reason.code().to_string(),
                });
            }
        }
    }

    (valid, errors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::format_utc;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
    }

    fn valid_item() -> UsageItem {
        let start = now() - Duration::minutes(10);
        let end = now() - Duration::minutes(9);
        UsageItem {
            package: "com.example.app".to_string(),
            total_ms: 60_000,
            window_start: format_utc(start),
            window_end: format_utc(end),
        }
    }

    #[test]
    fn test_valid_item_passes() {
        assert!(validate_item(&valid_item(), now()).is_ok());
    }

    #[test]
    fn test_zero_duration_rejected() {
        let mut item = valid_item();
        item.total_ms = 0;
        assert_eq!(
            validate_item(&item, now()),
            Err(RejectReason::NonPositiveDuration)
        );
    }

    #[test]
    fn test_unparseable_timestamp_rejected() {
        let mut item = valid_item();
        item.window_start = "not-a-timestamp".to_string();
        assert_eq!(
            validate_item(&item, now()),
            Err(RejectReason::InvalidTimestamp)
        );
    }

    #[test]
    fn test_non_utc_offset_rejected() {
        let mut item = valid_item();
        item.window_end = "2025-06-01T13:50:00+02:00".to_string();
        assert_eq!(
            validate_item(&item, now()),
            Err(RejectReason::MissingUtcMarker)
        );
    }

    #[test]
    fn test_plus_zero_offset_accepted_as_utc() {
        let mut item = valid_item();
        item.window_start = "2025-06-01T11:50:00+00:00".to_string();
        item.window_end = "2025-06-01T11:51:00+00:00".to_string();
        assert!(validate_item(&item, now()).is_ok());
    }

    #[test]
    fn test_end_not_after_start_rejected() {
        let mut item = valid_item();
        item.window_end = item.window_start.clone();
        assert_eq!(
            validate_item(&item, now()),
            Err(RejectReason::EndNotAfterStart)
        );
    }

    #[test]
    fn test_over_eight_hours_rejected() {
        let start = now() - Duration::hours(10);
        let end = now() - Duration::minutes(30);
        let item = UsageItem {
            package: "com.example.app".to_string(),
            total_ms: (end - start).num_milliseconds() as u64,
            window_start: format_utc(start),
            window_end: format_utc(end),
        };
        assert_eq!(validate_item(&item, now()), Err(RejectReason::WindowTooLong));
    }

    #[test]
    fn test_exactly_eight_hours_passes() {
        let start = now() - Duration::hours(8);
        let item = UsageItem {
            package: "com.example.app".to_string(),
            total_ms: MAX_SESSION_MS as u64,
            window_start: format_utc(start),
            window_end: format_utc(now()),
        };
        assert!(validate_item(&item, now()).is_ok());
    }

    #[test]
    fn test_future_window_rejected() {
        let start = now();
        let end = now() + Duration::minutes(10);
        let item = UsageItem {
            package: "com.example.app".to_string(),
            total_ms: 600_000,
            window_start: format_utc(start),
            window_end: format_utc(end),
        };
        assert_eq!(validate_item(&item, now()), Err(RejectReason::ClockSkew));
    }

    #[test]
    fn test_within_skew_grace_passes() {
        let start = now() - Duration::minutes(1);
        let end = now() + Duration::minutes(4);
        let item = UsageItem {
            package: "com.example.app".to_string(),
            total_ms: 300_000,
            window_start: format_utc(start),
            window_end: format_utc(end),
        };
        assert!(validate_item(&item, now()).is_ok());
    }

    #[test]
    fn test_rejection_is_item_independent() {
        let mut bad = valid_item();
        bad.total_ms = 0;
        let items = vec![valid_item(), bad, valid_item()];

        let (valid, errors) = partition_valid(&items, now());

        assert_eq!(valid.len(), 2);
        assert_eq!(valid[0].0, 0);
        assert_eq!(valid[1].0, 2);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].index, 1);
        assert_eq!(errors[0].code, "non_positive_duration");
    }
}
