//! Sessionizer: pairs foreground/background transitions into sessions
//!
//! Consumes an ordered stream of raw events and maintains one pending
//! foreground start per app. The produced sequence is finite and
//! non-restartable; replaying an interval means re-reading from the cursor.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::types::{EventKind, RawEvent, Session};

/// Pair transitions into raw (unmerged) sessions.
///
/// FOREGROUND overwrites any pending start for the app (last-write-wins; the
/// orphaned start is discarded without error). BACKGROUND emits a session only
/// when a pending start exists and the timestamp is strictly after it; an
/// unmatched close is dropped silently.
pub fn sessionize(events: &[RawEvent]) -> Vec<Session> {
    let mut pending: HashMap<String, DateTime<Utc>> = HashMap::new();
    let mut sessions = Vec::new();

    for event in events {
        match event.kind {
            EventKind::Foreground => {
                if let Some(orphaned) = pending.insert(event.app_key.clone(), event.ts) {
                    tracing::trace!(
                        app = %event.app_key,
                        orphaned = %orphaned,
                        "Foreground overwrote an unmatched pending start"
                    );
                }
            }
            EventKind::Background => {
                if let Some(start) = pending.remove(&event.app_key) {
                    if event.ts > start {
                        sessions.push(Session {
                            app_key: event.app_key.clone(),
                            start,
                            end: event.ts,
                        });
                    }
                }
            }
        }
    }

    sessions
}

/// Merge same-app sessions separated by at most `gap_ms` (inclusive boundary).
///
/// Sessions are grouped per app and walked in start order; a session whose
/// start is within the gap of the running span extends it to
/// `max(prev.end, next.end)`. Output is sorted by start across apps.
pub fn merge_gaps(sessions: Vec<Session>, gap_ms: i64) -> Vec<Session> {
    let mut by_app: HashMap<String, Vec<Session>> = HashMap::new();
    for session in sessions {
        by_app.entry(session.app_key.clone()).or_default().push(session);
    }

    let mut merged = Vec::new();
    for (_, mut app_sessions) in by_app {
        app_sessions.sort_by_key(|s| s.start);

        let mut iter = app_sessions.into_iter();
        let mut running = match iter.next() {
            Some(first) => first,
            None => continue,
        };

        for next in iter {
            if (next.start - running.end).num_milliseconds() <= gap_ms {
                if next.end > running.end {
                    running.end = next.end;
                }
            } else {
                merged.push(running);
                running = next;
            }
        }
        merged.push(running);
    }

    merged.sort_by(|a, b| a.start.cmp(&b.start).then(a.app_key.cmp(&b.app_key)));
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
    }

    fn ev(app: &str, kind: EventKind, offset_ms: i64) -> RawEvent {
        RawEvent {
            app_key: app.to_string(),
            kind,
            ts: t0() + Duration::milliseconds(offset_ms),
        }
    }

    fn session(app: &str, start_ms: i64, end_ms: i64) -> Session {
        Session {
            app_key: app.to_string(),
            start: t0() + Duration::milliseconds(start_ms),
            end: t0() + Duration::milliseconds(end_ms),
        }
    }

    #[test]
    fn test_well_formed_pairs_yield_one_session_each() {
        let events = vec![
            ev("a", EventKind::Foreground, 0),
            ev("a", EventKind::Background, 1_000),
            ev("a", EventKind::Foreground, 5_000),
            ev("a", EventKind::Background, 9_000),
        ];
        let sessions = sessionize(&events);
        assert_eq!(sessions, vec![session("a", 0, 1_000), session("a", 5_000, 9_000)]);
    }

    #[test]
    fn test_interleaved_apps_pair_independently() {
        let events = vec![
            ev("a", EventKind::Foreground, 0),
            ev("b", EventKind::Foreground, 500),
            ev("a", EventKind::Background, 1_000),
            ev("b", EventKind::Background, 2_000),
        ];
        let sessions = sessionize(&events);
        assert_eq!(sessions.len(), 2);
        assert!(sessions.contains(&session("a", 0, 1_000)));
        assert!(sessions.contains(&session("b", 500, 2_000)));
    }

    #[test]
    fn test_foreground_overwrite_is_last_write_wins() {
        let events = vec![
            ev("a", EventKind::Foreground, 0),
            ev("a", EventKind::Foreground, 2_000),
            ev("a", EventKind::Background, 3_000),
        ];
        let sessions = sessionize(&events);
        assert_eq!(sessions, vec![session("a", 2_000, 3_000)]);
    }

    #[test]
    fn test_unmatched_background_dropped_silently() {
        let events = vec![ev("a", EventKind::Background, 1_000)];
        assert!(sessionize(&events).is_empty());
    }

    #[test]
    fn test_background_at_start_instant_dropped() {
        let events = vec![
            ev("a", EventKind::Foreground, 1_000),
            ev("a", EventKind::Background, 1_000),
        ];
        assert!(sessionize(&events).is_empty());
    }

    #[test]
    fn test_dangling_foreground_emits_nothing() {
        let events = vec![
            ev("a", EventKind::Foreground, 0),
            ev("a", EventKind::Background, 1_000),
            ev("a", EventKind::Foreground, 2_000),
        ];
        let sessions = sessionize(&events);
        assert_eq!(sessions, vec![session("a", 0, 1_000)]);
    }

    #[test]
    fn test_merge_within_gap() {
        let merged = merge_gaps(
            vec![session("a", 0, 10_000), session("a", 20_000, 30_000)],
            30_000,
        );
        assert_eq!(merged, vec![session("a", 0, 30_000)]);
    }

    #[test]
    fn test_merge_at_exact_threshold_is_inclusive() {
        let merged = merge_gaps(
            vec![session("a", 0, 10_000), session("a", 40_000, 50_000)],
            30_000,
        );
        assert_eq!(merged, vec![session("a", 0, 50_000)]);
    }

    #[test]
    fn test_gap_over_threshold_stays_split() {
        let merged = merge_gaps(
            vec![session("a", 0, 10_000), session("a", 40_001, 50_000)],
            30_000,
        );
        assert_eq!(
            merged,
            vec![session("a", 0, 10_000), session("a", 40_001, 50_000)]
        );
    }

    #[test]
    fn test_merge_does_not_cross_apps() {
        let merged = merge_gaps(
            vec![session("a", 0, 10_000), session("b", 12_000, 20_000)],
            30_000,
        );
        assert_eq!(merged.len(), 2);
    }

    #[test]
    fn test_merge_contained_session_keeps_longer_end() {
        let merged = merge_gaps(
            vec![session("a", 0, 60_000), session("a", 10_000, 20_000)],
            30_000,
        );
        assert_eq!(merged, vec![session("a", 0, 60_000)]);
    }

    #[test]
    fn test_merge_unsorted_input() {
        let merged = merge_gaps(
            vec![session("a", 20_000, 30_000), session("a", 0, 10_000)],
            30_000,
        );
        assert_eq!(merged, vec![session("a", 0, 30_000)]);
    }
}
