//! JSONL activity log source
//!
//! The platform watcher appends one JSON object per line to a local log that
//! only it writes. Two record shapes share the file, discriminated by `kind`:
//!
//! ```text
//! {"kind":"foreground","app":"com.example.app","ts":"2025-06-01T12:00:00Z"}
//! {"kind":"screen_on","ts":"2025-06-01T11:59:55Z"}
//! ```
//!
//! Scans re-read the file per cycle; the lookback cap keeps that bounded.
//! Unparseable lines are skipped with a warning rather than failing the
//! cycle.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::Deserialize;

use screentrace_core::agent::ActivityLog;
use screentrace_core::error::Result;
use screentrace_core::types::{EventKind, RawEvent, ScreenToggle, ToggleKind};

#[derive(Debug, Deserialize)]
struct LogRecord {
    kind: String,
    ts: DateTime<Utc>,
    #[serde(default)]
    app: Option<String>,
}

enum ParsedRecord {
    Event(RawEvent),
    Toggle(ScreenToggle),
}

/// Read-only view over the JSONL activity log.
pub struct JsonlActivityLog {
    path: PathBuf,
}

impl JsonlActivityLog {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
        }
    }

    fn read_records(&self) -> Result<Vec<ParsedRecord>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let content = std::fs::read_to_string(&self.path)?;
        let mut records = Vec::new();

        for (line_no, line) in content.lines().enumerate() {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            match serde_json::from_str::<LogRecord>(trimmed) {
                Ok(record) => match parse_record(record) {
                    Some(parsed) => records.push(parsed),
                    None => {
                        tracing::warn!(line = line_no + 1, "Unknown activity log record kind");
                    }
                },
                Err(e) => {
                    tracing::warn!(line = line_no + 1, error = %e, "Skipping bad log line");
                }
            }
        }

        Ok(records)
    }
}

fn parse_record(record: LogRecord) -> Option<ParsedRecord> {
    if let Ok(kind) = EventKind::from_str(&record.kind) {
        let app = record.app?;
        return Some(ParsedRecord::Event(RawEvent {
            app_key: app,
            kind,
            ts: record.ts,
        }));
    }

    let kind = match record.kind.as_str() {
        "screen_on" => ToggleKind::ScreenOn,
        "screen_off" => ToggleKind::ScreenOff,
        _ => return None,
    };
    Some(ParsedRecord::Toggle(ScreenToggle { kind, ts: record.ts }))
}

impl ActivityLog for JsonlActivityLog {
    fn events_between(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<RawEvent>> {
        Ok(self
            .read_records()?
            .into_iter()
            .filter_map(|r| match r {
                ParsedRecord::Event(e) if e.ts >= from && e.ts < to => Some(e),
                _ => None,
            })
            .collect())
    }

    fn toggles_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<ScreenToggle>> {
        let toggles: Vec<ScreenToggle> = self
            .read_records()?
            .into_iter()
            .filter_map(|r| match r {
                ParsedRecord::Toggle(t) => Some(t),
                _ => None,
            })
            .collect();

        let mut result: Vec<ScreenToggle> = Vec::new();
        if let Some(prior) = toggles
            .iter()
            .filter(|t| t.ts < from)
            .max_by_key(|t| t.ts)
        {
            result.push(prior.clone());
        }
        result.extend(toggles.into_iter().filter(|t| t.ts >= from && t.ts < to));
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use std::io::Write;
    use tempfile::TempDir;

    fn write_log(dir: &TempDir, lines: &[String]) -> PathBuf {
        let path = dir.path().join("activity.jsonl");
        let mut file = std::fs::File::create(&path).unwrap();
        for line in lines {
            writeln!(file, "{}", line).unwrap();
        }
        path
    }

    #[test]
    fn test_reads_events_and_toggles() {
        let dir = TempDir::new().unwrap();
        let t0 = Utc::now() - Duration::minutes(10);
        let path = write_log(
            &dir,
            &[
                format!(
                    r#"{{"kind":"screen_on","ts":"{}"}}"#,
                    t0.to_rfc3339()
                ),
                format!(
                    r#"{{"kind":"foreground","app":"com.example.app","ts":"{}"}}"#,
                    (t0 + Duration::seconds(5)).to_rfc3339()
                ),
                format!(
                    r#"{{"kind":"background","app":"com.example.app","ts":"{}"}}"#,
                    (t0 + Duration::seconds(65)).to_rfc3339()
                ),
            ],
        );

        let log = JsonlActivityLog::new(&path);
        let events = log
            .events_between(t0 - Duration::minutes(1), Utc::now())
            .unwrap();
        let toggles = log
            .toggles_between(t0 - Duration::minutes(1), Utc::now())
            .unwrap();

        assert_eq!(events.len(), 2);
        assert_eq!(events[0].kind, EventKind::Foreground);
        assert_eq!(toggles.len(), 1);
        assert_eq!(toggles[0].kind, ToggleKind::ScreenOn);
    }

    #[test]
    fn test_bad_lines_skipped() {
        let dir = TempDir::new().unwrap();
        let t0 = Utc::now() - Duration::minutes(10);
        let path = write_log(
            &dir,
            &[
                "not json at all".to_string(),
                format!(
                    r#"{{"kind":"foreground","app":"com.example.app","ts":"{}"}}"#,
                    t0.to_rfc3339()
                ),
            ],
        );

        let log = JsonlActivityLog::new(&path);
        let events = log
            .events_between(t0 - Duration::minutes(1), Utc::now())
            .unwrap();
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn test_missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let log = JsonlActivityLog::new(&dir.path().join("absent.jsonl"));
        assert!(log
            .events_between(Utc::now() - Duration::hours(1), Utc::now())
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_prior_toggle_included_for_initial_state() {
        let dir = TempDir::new().unwrap();
        let t0 = Utc::now() - Duration::hours(2);
        let path = write_log(
            &dir,
            &[format!(
                r#"{{"kind":"screen_on","ts":"{}"}}"#,
                t0.to_rfc3339()
            )],
        );

        let log = JsonlActivityLog::new(&path);
        let toggles = log
            .toggles_between(Utc::now() - Duration::hours(1), Utc::now())
            .unwrap();
        assert_eq!(toggles.len(), 1);
    }
}
