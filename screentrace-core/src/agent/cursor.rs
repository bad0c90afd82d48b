//! Per-device cursor persistence
//!
//! The cursor is the watermark up to which a device's activity has been
//! durably processed. It is persisted as a small JSON state file in the data
//! directory and only ever moves forward.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::types::UploadCursor;

/// Durable store of per-device upload cursors.
pub struct CursorStore {
    path: PathBuf,
    cursors: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl CursorStore {
    /// Open the store, loading any previously persisted cursors.
    pub fn open(path: &Path) -> Result<Self> {
        let cursors = if path.exists() {
            let data = std::fs::read_to_string(path)?;
            serde_json::from_str(&data).unwrap_or_default()
        } else {
            HashMap::new()
        };
        Ok(Self {
            path: path.to_path_buf(),
            cursors: Mutex::new(cursors),
        })
    }

    /// Current cursor for a device, if any cycle has completed.
    pub fn get(&self, device_id: &str) -> Option<DateTime<Utc>> {
        self.cursors.lock().unwrap().get(device_id).copied()
    }

    /// Advance the cursor to `to`, never backwards. Returns the stored value.
    pub fn advance(&self, device_id: &str, to: DateTime<Utc>) -> Result<DateTime<Utc>> {
        let mut guard = self.cursors.lock().unwrap();
        let entry = guard.entry(device_id.to_string()).or_insert(to);
        if to > *entry {
            *entry = to;
        }
        let stored = *entry;
        Self::persist_locked(&guard, &self.path)?;
        Ok(stored)
    }

    /// All known cursors, for startup logging and diagnostics.
    pub fn snapshot(&self) -> Vec<UploadCursor> {
        self.cursors
            .lock()
            .unwrap()
            .iter()
            .map(|(device_id, last_confirmed)| UploadCursor {
                device_id: device_id.clone(),
                last_confirmed: *last_confirmed,
            })
            .collect()
    }

    fn persist_locked(cursors: &HashMap<String, DateTime<Utc>>, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let serialized = serde_json::to_string_pretty(cursors)?;
        std::fs::write(path, serialized)?;
        Ok(())
    }
}
