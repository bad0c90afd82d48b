//! Window clamper
//!
//! Restricts a session to the time that actually overlapped an active-screen
//! window. A session with no overlap at all is phantom background activity
//! and is discarded entirely.

use crate::types::{ScreenWindow, Session};

/// Clamp a session to the given screen windows.
///
/// For each window the overlap is
/// `max(0, min(session.end, window.end) - max(session.start, window.start))`.
/// When the total overlap is positive the result spans the min start to the
/// max end among contributing overlaps; otherwise `None`.
pub fn clamp_session(session: &Session, windows: &[ScreenWindow]) -> Option<Session> {
    let mut total_overlap_ms = 0i64;
    let mut clamped_start = None;
    let mut clamped_end = None;

    for window in windows {
        let overlap_start = session.start.max(window.start);
        let overlap_end = session.end.min(window.end);
        let overlap_ms = (overlap_end - overlap_start).num_milliseconds();
        if overlap_ms <= 0 {
            continue;
        }

        total_overlap_ms += overlap_ms;
        clamped_start = Some(match clamped_start {
            Some(start) if start < overlap_start => start,
            _ => overlap_start,
        });
        clamped_end = Some(match clamped_end {
            Some(end) if end > overlap_end => end,
            _ => overlap_end,
        });
    }

    if total_overlap_ms <= 0 {
        return None;
    }

    Some(Session {
        app_key: session.app_key.clone(),
        start: clamped_start?,
        end: clamped_end?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration, TimeZone, Utc};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
    }

    fn session(start_ms: i64, end_ms: i64) -> Session {
        Session {
            app_key: "com.example.app".to_string(),
            start: t0() + Duration::milliseconds(start_ms),
            end: t0() + Duration::milliseconds(end_ms),
        }
    }

    fn window(start_ms: i64, end_ms: i64) -> ScreenWindow {
        ScreenWindow {
            start: t0() + Duration::milliseconds(start_ms),
            end: t0() + Duration::milliseconds(end_ms),
        }
    }

    #[test]
    fn test_zero_overlap_discards_session() {
        let clamped = clamp_session(&session(0, 10_000), &[window(20_000, 30_000)]);
        assert!(clamped.is_none());
    }

    #[test]
    fn test_no_windows_discards_session() {
        let clamped = clamp_session(&session(0, 10_000), &[]);
        assert!(clamped.is_none());
    }

    #[test]
    fn test_half_overlap_clips_to_overlap() {
        // Session [0, 10s), screen on only for [5s, 15s)
        let clamped = clamp_session(&session(0, 10_000), &[window(5_000, 15_000)]).unwrap();
        assert_eq!(clamped.start, t0() + Duration::milliseconds(5_000));
        assert_eq!(clamped.end, t0() + Duration::milliseconds(10_000));
        assert_eq!(clamped.duration_ms(), 5_000);
    }

    #[test]
    fn test_fully_covered_session_unchanged() {
        let clamped = clamp_session(&session(1_000, 9_000), &[window(0, 10_000)]).unwrap();
        assert_eq!(clamped, session(1_000, 9_000));
    }

    #[test]
    fn test_two_windows_span_min_start_to_max_end() {
        // Session [0, 60s) with screen on [10s, 20s) and [40s, 50s)
        let clamped = clamp_session(
            &session(0, 60_000),
            &[window(10_000, 20_000), window(40_000, 50_000)],
        )
        .unwrap();
        assert_eq!(clamped.start, t0() + Duration::milliseconds(10_000));
        assert_eq!(clamped.end, t0() + Duration::milliseconds(50_000));
    }

    #[test]
    fn test_touching_window_boundary_is_no_overlap() {
        // Half-open windows: session ending exactly where the window starts
        let clamped = clamp_session(&session(0, 10_000), &[window(10_000, 20_000)]);
        assert!(clamped.is_none());
    }
}
