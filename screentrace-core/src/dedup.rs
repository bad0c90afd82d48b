//! Recent-identifier cache for duplicate absorption
//!
//! Bounded and time-boxed: identifiers older than the retention window (48h
//! by default) or beyond the capacity bound are evicted. Eviction is safe
//! because the rollup store's `seen_fragments` uniqueness constraint is the
//! fallback net; the cache exists to resolve the common resend cheaply.
//!
//! The capability interface keeps the stream processor decoupled from the
//! backing technology: the in-memory variant backs unit tests and single-node
//! deployments, a durable variant can back a fleet.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};

/// Capability interface over the recent-identifier cache.
pub trait DedupCache: Send + Sync {
    /// Returns true when the key was already present (a duplicate); marks it
    /// as seen otherwise.
    fn check_and_mark(&self, key: &str, now: DateTime<Utc>) -> bool;

    /// Read-only membership probe (used by the gateway to report duplicates
    /// without claiming the identifier).
    fn contains(&self, key: &str) -> bool;

    /// Number of identifiers currently held.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

struct Inner {
    seen: HashMap<String, DateTime<Utc>>,
    order: VecDeque<(DateTime<Utc>, String)>,
}

/// In-memory, time-indexed dedup cache.
pub struct MemoryDedupCache {
    retention: Duration,
    capacity: usize,
    inner: Mutex<Inner>,
}

impl MemoryDedupCache {
    pub fn new(retention: Duration, capacity: usize) -> Self {
        Self {
            retention,
            capacity: capacity.max(1),
            inner: Mutex::new(Inner {
                seen: HashMap::new(),
                order: VecDeque::new(),
            }),
        }
    }

    /// Cache with the default 48h retention.
    pub fn with_capacity(capacity: usize) -> Self {
        Self::new(Duration::hours(48), capacity)
    }

    fn evict(inner: &mut Inner, cutoff: DateTime<Utc>, capacity: usize) {
        loop {
            let evictable = match inner.order.front() {
                Some((ts, _)) => *ts < cutoff || inner.order.len() > capacity,
                None => false,
            };
            if !evictable {
                break;
            }
            if let Some((_, key)) = inner.order.pop_front() {
                inner.seen.remove(&key);
            }
        }
    }
}

impl DedupCache for MemoryDedupCache {
    fn check_and_mark(&self, key: &str, now: DateTime<Utc>) -> bool {
        let mut inner = self.inner.lock().unwrap();
        Self::evict(&mut inner, now - self.retention, self.capacity);

        if inner.seen.contains_key(key) {
            return true;
        }

        inner.seen.insert(key.to_string(), now);
        inner.order.push_back((now, key.to_string()));
        Self::evict(&mut inner, now - self.retention, self.capacity);
        false
    }

    fn contains(&self, key: &str) -> bool {
        self.inner.lock().unwrap().seen.contains_key(key)
    }

    fn len(&self) -> usize {
        self.inner.lock().unwrap().seen.len()
    }
}
