//! Local activity log abstraction
//!
//! The platform observes app transitions and screen toggles and appends them
//! to a local, single-writer event log. The collector only ever reads a
//! bounded scan window of it.

use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::types::{RawEvent, ScreenToggle};

/// Read access to a device's local event log.
pub trait ActivityLog {
    /// App transition events with `from <= ts < to`, in log order.
    fn events_between(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<RawEvent>>;

    /// Screen toggles relevant to `[from, to)`: every toggle inside the range
    /// plus the latest one before `from`, so the tracker knows whether the
    /// screen was already on when the window opened.
    fn toggles_between(&self, from: DateTime<Utc>, to: DateTime<Utc>)
        -> Result<Vec<ScreenToggle>>;
}

/// In-memory activity log for tests and simulated devices.
#[derive(Debug, Default, Clone)]
pub struct MemoryActivityLog {
    events: Vec<RawEvent>,
    toggles: Vec<ScreenToggle>,
}

impl MemoryActivityLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_event(&mut self, event: RawEvent) {
        self.events.push(event);
    }

    pub fn push_toggle(&mut self, toggle: ScreenToggle) {
        self.toggles.push(toggle);
    }
}

impl ActivityLog for MemoryActivityLog {
    fn events_between(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<RawEvent>> {
        Ok(self
            .events
            .iter()
            .filter(|e| e.ts >= from && e.ts < to)
            .cloned()
            .collect())
    }

    fn toggles_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<ScreenToggle>> {
        let mut result: Vec<ScreenToggle> = Vec::new();
        if let Some(prior) = self
            .toggles
            .iter()
            .filter(|t| t.ts < from)
            .max_by_key(|t| t.ts)
        {
            result.push(prior.clone());
        }
        result.extend(
            self.toggles
                .iter()
                .filter(|t| t.ts >= from && t.ts < to)
                .cloned(),
        );
        Ok(result)
    }
}
