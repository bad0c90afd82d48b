//! Durable ordered event queue interface
//!
//! The gateway appends; stream processors consume with consumer-group
//! semantics: one active consumer per partition, per-partition ordering,
//! at-least-once delivery (entries stay pending until acknowledged, so a
//! crashed consumer re-reads them). The concrete backing technology is out of
//! scope; this module fixes the contract and ships the in-process
//! implementation used by tests and single-node deployments.

use std::collections::VecDeque;
use std::sync::Mutex;

use sha2::{Digest, Sha256};

use crate::error::{Error, Result};
use crate::types::QueuedEvent;

/// One delivered queue entry.
#[derive(Debug, Clone)]
pub struct QueueEntry {
    pub offset: u64,
    pub event: QueuedEvent,
}

/// Capability interface over the durable ordered queue.
pub trait EventQueue: Send + Sync {
    /// Append an event to its device's partition. Returns the offset.
    fn append(&self, event: QueuedEvent) -> Result<u64>;

    /// Number of partitions.
    fn partitions(&self) -> usize;

    /// Read up to `max` unacknowledged entries from a partition, oldest
    /// first. Re-reads entries delivered but not yet acknowledged.
    fn read(&self, partition: usize, max: usize) -> Result<Vec<QueueEntry>>;

    /// Acknowledge an entry; it will not be delivered again.
    fn ack(&self, partition: usize, offset: u64) -> Result<()>;

    /// Total unacknowledged entries across partitions.
    fn lag(&self) -> usize;
}

/// Stable partition assignment for a device.
pub fn partition_for(device_id: &str, partitions: usize) -> usize {
    let mut hasher = Sha256::new();
    hasher.update(device_id.as_bytes());
    let digest = hasher.finalize();
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    (u64::from_be_bytes(prefix) % partitions.max(1) as u64) as usize
}

struct PartitionState {
    entries: VecDeque<(u64, QueuedEvent)>,
    next_offset: u64,
}

/// In-process queue with per-partition ordering.
pub struct MemoryQueue {
    parts: Vec<Mutex<PartitionState>>,
}

impl MemoryQueue {
    pub fn new(partitions: usize) -> Self {
        let parts = (0..partitions.max(1))
            .map(|_| {
                Mutex::new(PartitionState {
                    entries: VecDeque::new(),
                    next_offset: 0,
                })
            })
            .collect();
        Self { parts }
    }
}

impl EventQueue for MemoryQueue {
    fn append(&self, event: QueuedEvent) -> Result<u64> {
        let partition = partition_for(&event.device_id, self.parts.len());
        let mut state = self.parts[partition].lock().unwrap();
        let offset = state.next_offset;
        state.next_offset += 1;
        state.entries.push_back((offset, event));
        Ok(offset)
    }

    fn partitions(&self) -> usize {
        self.parts.len()
    }

    fn read(&self, partition: usize, max: usize) -> Result<Vec<QueueEntry>> {
        let state = self
            .parts
            .get(partition)
            .ok_or_else(|| Error::Queue(format!("no such partition: {}", partition)))?
            .lock()
            .unwrap();
        Ok(state
            .entries
            .iter()
            .take(max)
            .map(|(offset, event)| QueueEntry {
                offset: *offset,
                event: event.clone(),
            })
            .collect())
    }

    fn ack(&self, partition: usize, offset: u64) -> Result<()> {
        let mut state = self
            .parts
            .get(partition)
            .ok_or_else(|| Error::Queue(format!("no such partition: {}", partition)))?
            .lock()
            .unwrap();
        state.entries.retain(|(o, _)| *o != offset);
        Ok(())
    }

    fn lag(&self) -> usize {
        self.parts
            .iter()
            .map(|p| p.lock().unwrap().entries.len())
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn event(device_id: &str, event_id: &str) -> QueuedEvent {
        QueuedEvent {
            account_id: "default".to_string(),
            device_id: device_id.to_string(),
            event_id: event_id.to_string(),
            kind: "app_session".to_string(),
            key: "com.example.app".to_string(),
            secs: 60.0,
            window_start: "2025-06-01T11:50:00Z".to_string(),
            window_end: "2025-06-01T11:51:00Z".to_string(),
            client_version: "test".to_string(),
            enqueued_at: Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap(),
        }
    }

    #[test]
    fn test_partition_assignment_is_stable() {
        let a = partition_for("device-1", 4);
        let b = partition_for("device-1", 4);
        assert_eq!(a, b);
        assert!(a < 4);
    }

    #[test]
    fn test_same_device_preserves_order() {
        let queue = MemoryQueue::new(4);
        for i in 0..5 {
            queue.append(event("device-1", &format!("e{}", i))).unwrap();
        }

        let partition = partition_for("device-1", 4);
        let entries = queue.read(partition, 10).unwrap();
        let ids: Vec<&str> = entries.iter().map(|e| e.event.event_id.as_str()).collect();
        assert_eq!(ids, vec!["e0", "e1", "e2", "e3", "e4"]);
    }

    #[test]
    fn test_unacked_entries_are_redelivered() {
        let queue = MemoryQueue::new(1);
        queue.append(event("device-1", "e0")).unwrap();

        let first = queue.read(0, 10).unwrap();
        let second = queue.read(0, 10).unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(second.len(), 1);
        assert_eq!(first[0].offset, second[0].offset);
    }

    #[test]
    fn test_ack_removes_entry() {
        let queue = MemoryQueue::new(1);
        queue.append(event("device-1", "e0")).unwrap();
        queue.append(event("device-1", "e1")).unwrap();

        let entries = queue.read(0, 1).unwrap();
        queue.ack(0, entries[0].offset).unwrap();

        let remaining = queue.read(0, 10).unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].event.event_id, "e1");
        assert_eq!(queue.lag(), 1);
    }

    #[test]
    fn test_lag_counts_all_partitions() {
        let queue = MemoryQueue::new(4);
        queue.append(event("device-1", "e0")).unwrap();
        queue.append(event("device-2", "e1")).unwrap();
        queue.append(event("device-3", "e2")).unwrap();
        assert_eq!(queue.lag(), 3);
    }

    #[test]
    fn test_read_bad_partition_errors() {
        let queue = MemoryQueue::new(2);
        assert!(queue.read(5, 10).is_err());
    }
}
