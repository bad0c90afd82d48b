//! Stream processor
//!
//! Consumes the durable queue with one task per partition, absorbs duplicate
//! deliveries, re-validates every event (the client tier is never trusted
//! alone), and folds survivors into the rollup store. Validation failures go
//! to the dead-letter path and never block the stream.

use std::sync::Arc;

use chrono::Utc;

use crate::config::ProcessorConfig;
use crate::dedup::DedupCache;
use crate::error::Result;
use crate::queue::EventQueue;
use crate::rollup::{RollupStore, UpsertResult};
use crate::types::{QueuedEvent, UsageItem};
use crate::validate::validate_item;

/// Outcome of processing one queue entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOutcome {
    Aggregated,
    Duplicate,
    DeadLettered,
}

/// Per-drain processing counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessStats {
    pub aggregated: usize,
    pub duplicates: usize,
    pub dead_lettered: usize,
}

impl ProcessStats {
    fn record(&mut self, outcome: EventOutcome) {
        match outcome {
            EventOutcome::Aggregated => self.aggregated += 1,
            EventOutcome::Duplicate => self.duplicates += 1,
            EventOutcome::DeadLettered => self.dead_lettered += 1,
        }
    }
}

/// Queue consumer that maintains the rollup store.
pub struct StreamProcessor {
    queue: Arc<dyn EventQueue>,
    dedup: Arc<dyn DedupCache>,
    store: Arc<RollupStore>,
    config: ProcessorConfig,
}

impl StreamProcessor {
    pub fn new(
        queue: Arc<dyn EventQueue>,
        dedup: Arc<dyn DedupCache>,
        store: Arc<RollupStore>,
        config: ProcessorConfig,
    ) -> Self {
        Self {
            queue,
            dedup,
            store,
            config,
        }
    }

    /// Process one event end to end.
    pub fn process_event(&self, event: &QueuedEvent) -> Result<EventOutcome> {
        let now = Utc::now();

        if self.dedup.check_and_mark(&event.dedup_key(), now) {
            tracing::debug!(
                device = %event.device_id,
                event_id = %event.event_id,
                "Duplicate identifier; acknowledging without re-aggregating"
            );
            return Ok(EventOutcome::Duplicate);
        }

        let item = UsageItem {
            package: event.key.clone(),
            total_ms: (event.secs * 1000.0).max(0.0) as u64,
            window_start: event.window_start.clone(),
            window_end: event.window_end.clone(),
        };
        if let Err(reason) = validate_item(&item, now) {
            tracing::warn!(
                device = %event.device_id,
                event_id = %event.event_id,
                reason = %reason.code(),
                "Post-ingest validation failed; dead-lettering"
            );
            self.store.dead_letter(event, reason)?;
            return Ok(EventOutcome::DeadLettered);
        }

        match self.store.upsert_usage(event)? {
            UpsertResult::Aggregated => Ok(EventOutcome::Aggregated),
            // Identifier cache had evicted it; the fragment ledger caught it.
            UpsertResult::AlreadySeen => Ok(EventOutcome::Duplicate),
        }
    }

    /// Synchronously drain one partition until it is empty.
    pub fn drain_partition(&self, partition: usize) -> Result<ProcessStats> {
        let mut stats = ProcessStats::default();

        loop {
            let entries = self.queue.read(partition, self.config.read_batch)?;
            if entries.is_empty() {
                return Ok(stats);
            }
            for entry in entries {
                let outcome = self.process_event(&entry.event)?;
                stats.record(outcome);
                self.queue.ack(partition, entry.offset)?;
            }
        }
    }

    /// Drain every partition once (tests and single-shot maintenance).
    pub fn drain_all(&self) -> Result<ProcessStats> {
        let mut stats = ProcessStats::default();
        for partition in 0..self.queue.partitions() {
            let partial = self.drain_partition(partition)?;
            stats.aggregated += partial.aggregated;
            stats.duplicates += partial.duplicates;
            stats.dead_lettered += partial.dead_lettered;
        }
        Ok(stats)
    }

    /// Spawn one long-running consumer task per partition.
    pub fn spawn(self: Arc<Self>) -> Vec<tokio::task::JoinHandle<()>> {
        let idle = std::time::Duration::from_millis(self.config.idle_poll_ms);

        (0..self.queue.partitions())
            .map(|partition| {
                let processor = self.clone();
                tokio::spawn(async move {
                    tracing::info!(partition, "Stream processor consumer started");
                    loop {
                        match processor.drain_partition(partition) {
                            Ok(stats) if stats != ProcessStats::default() => {
                                tracing::debug!(
                                    partition,
                                    aggregated = stats.aggregated,
                                    duplicates = stats.duplicates,
                                    dead_lettered = stats.dead_lettered,
                                    "Drained partition"
                                );
                            }
                            Ok(_) => {}
                            Err(e) => {
                                tracing::error!(partition, error = %e, "Partition drain failed");
                            }
                        }
                        tokio::time::sleep(idle).await;
                    }
                })
            })
            .collect()
    }
}
