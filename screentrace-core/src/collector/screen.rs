//! Screen window tracking
//!
//! Screen on/off observation arrives as asynchronous toggle notifications.
//! The tracker folds them into completed [`ScreenWindow`]s that the clamper
//! pulls on demand, decoupling window bookkeeping from callback timing.

use chrono::{DateTime, Utc};

use crate::types::{ScreenToggle, ScreenWindow, ToggleKind};

/// Folds an unbounded sequence of on/off toggles into screen windows.
#[derive(Debug, Default)]
pub struct ScreenTracker {
    current_on: Option<DateTime<Utc>>,
    completed: Vec<ScreenWindow>,
}

impl ScreenTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a tracker from a toggle sequence in observation order.
    pub fn from_toggles<'a>(toggles: impl IntoIterator<Item = &'a ScreenToggle>) -> Self {
        let mut tracker = Self::new();
        for toggle in toggles {
            tracker.observe(toggle);
        }
        tracker
    }

    /// Fold one toggle notification into the tracker.
    ///
    /// A repeated ON keeps the earlier start; an OFF with no matching ON, or
    /// one not after the start, is ignored.
    pub fn observe(&mut self, toggle: &ScreenToggle) {
        match toggle.kind {
            ToggleKind::ScreenOn => {
                if self.current_on.is_none() {
                    self.current_on = Some(toggle.ts);
                }
            }
            ToggleKind::ScreenOff => {
                if let Some(start) = self.current_on.take() {
                    if toggle.ts > start {
                        self.completed.push(ScreenWindow {
                            start,
                            end: toggle.ts,
                        });
                    }
                }
            }
        }
    }

    /// All windows known at `now`: completed ones plus the in-progress window
    /// capped at `now` when the screen is still on.
    pub fn windows(&self, now: DateTime<Utc>) -> Vec<ScreenWindow> {
        let mut windows = self.completed.clone();
        if let Some(start) = self.current_on {
            if now > start {
                windows.push(ScreenWindow { start, end: now });
            }
        }
        windows
    }
}
