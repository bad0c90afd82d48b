//! Noise and minimum-duration filtering
//!
//! Dropping here is classification, not failure: launcher/system-UI sessions
//! and sub-threshold blips are expected and logged at debug only.

use std::collections::HashSet;

use crate::types::Session;

/// Set of app keys excluded from tracking.
#[derive(Debug, Clone, Default)]
pub struct NoiseFilter {
    packages: HashSet<String>,
}

impl NoiseFilter {
    pub fn new<I, S>(packages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            packages: packages.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_noise(&self, app_key: &str) -> bool {
        self.packages.contains(app_key)
    }

    /// Drop noise-app sessions.
    pub fn retain(&self, sessions: Vec<Session>) -> Vec<Session> {
        sessions
            .into_iter()
            .filter(|s| {
                if self.is_noise(&s.app_key) {
                    tracing::debug!(app = %s.app_key, "Dropping noise-app session");
                    false
                } else {
                    true
                }
            })
            .collect()
    }
}

/// Drop sessions whose final (post-clamp) duration is below the threshold.
pub fn drop_short(sessions: Vec<Session>, min_duration_ms: i64) -> Vec<Session> {
    sessions
        .into_iter()
        .filter(|s| {
            let ms = s.duration_ms();
            if ms < min_duration_ms {
                tracing::debug!(app = %s.app_key, ms, "Dropping sub-threshold session");
                false
            } else {
                true
            }
        })
        .collect()
}
