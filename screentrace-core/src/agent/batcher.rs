//! Collection cycle and cursor advancement
//!
//! Each cycle scans `[max(cursor, now - lookback_cap), now]` of the local
//! activity log, runs the full collection pipeline, and uploads whatever
//! survives. Cursor rules:
//!
//! - empty result (no activity, or everything filtered/rejected locally):
//!   advance to `now` directly, no network round trip
//! - non-empty result: advance to `now` only once the server acknowledged at
//!   least one item (accepted, or duplicate of an earlier success)
//!
//! A failed upload leaves the cursor untouched; the next cycle rescans and
//! resends, and server-side dedup absorbs the duplicate delivery.

use chrono::{DateTime, Duration, Utc};

use crate::collector::{clamp_session, drop_short, merge_gaps, sessionize, NoiseFilter, ScreenTracker};
use crate::error::Result;
use crate::types::{BatchItemError, Session, UsageBatchRequest, UsageBatchResponse, UsageItem};
use crate::validate::partition_valid;

use super::context::DeviceContext;
use super::log::ActivityLog;
use super::uploader::UploadClient;

/// What one collection cycle scanned and produced.
#[derive(Debug, Clone)]
pub struct CollectedWindow {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    pub items: Vec<UsageItem>,
    /// Items dropped by local validation, by reason
    pub rejected: Vec<BatchItemError>,
}

/// Terminal result of one cycle.
#[derive(Debug, Clone)]
pub enum CycleOutcome {
    /// Nothing to upload; cursor advanced locally
    Idle,
    /// Batch delivered; body may carry per-item rejections
    Uploaded(UsageBatchResponse),
}

/// Summary of one completed cycle.
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub scanned_from: DateTime<Utc>,
    pub scanned_to: DateTime<Utc>,
    pub produced: usize,
    pub rejected_local: usize,
    pub cursor_advanced: bool,
    pub outcome: CycleOutcome,
}

/// Run the collection pipeline over the device's current scan window.
pub fn collect_items(
    ctx: &DeviceContext,
    log: &dyn ActivityLog,
    now: DateTime<Utc>,
) -> Result<CollectedWindow> {
    let lookback_floor = now - Duration::seconds(ctx.config.lookback_cap_secs);
    let from = match ctx.cursors.get(&ctx.device_id) {
        Some(cursor) if cursor > lookback_floor => cursor,
        _ => lookback_floor,
    };

    let events = log.events_between(from, now)?;
    let toggles = log.toggles_between(from, now)?;

    let sessions = merge_gaps(sessionize(&events), ctx.config.gap_merge_ms);

    let windows = ScreenTracker::from_toggles(&toggles).windows(now);
    let clamped: Vec<Session> = sessions
        .iter()
        .filter_map(|s| clamp_session(s, &windows))
        .collect();

    let noise = NoiseFilter::new(ctx.config.noise_packages.iter().cloned());
    let kept = drop_short(noise.retain(clamped), ctx.config.min_duration_ms);

    let candidates: Vec<UsageItem> = kept.iter().map(UsageItem::from_session).collect();
    let (valid, rejected) = partition_valid(&candidates, now);

    Ok(CollectedWindow {
        from,
        to: now,
        items: valid.into_iter().map(|(_, item)| item).collect(),
        rejected,
    })
}

/// Run one full cycle with a custom delivery function (injected for tests).
pub async fn run_cycle_with<F, Fut>(
    ctx: &DeviceContext,
    log: &dyn ActivityLog,
    now: DateTime<Utc>,
    send: F,
) -> Result<CycleReport>
where
    F: FnOnce(UsageBatchRequest) -> Fut,
    Fut: std::future::Future<Output = Result<UsageBatchResponse>>,
{
    let collected = collect_items(ctx, log, now)?;
    let produced = collected.items.len();
    let rejected_local = collected.rejected.len();

    if collected.items.is_empty() {
        // Dead interval: advance without a round trip so it is never rescanned.
        ctx.cursors.advance(&ctx.device_id, now)?;
        tracing::debug!(
            device = %ctx.device_id,
            from = %collected.from,
            to = %now,
            rejected_local,
            "Cycle produced nothing; cursor advanced locally"
        );
        return Ok(CycleReport {
            scanned_from: collected.from,
            scanned_to: now,
            produced,
            rejected_local,
            cursor_advanced: true,
            outcome: CycleOutcome::Idle,
        });
    }

    let batch = UsageBatchRequest {
        items: collected.items,
    };
    let response = send(batch).await?;

    // A duplicate is an earlier success the client never saw acknowledged;
    // both count as the server having durably processed the interval.
    let acknowledged = response.accepted + response.duplicates >= 1;
    if acknowledged {
        ctx.cursors.advance(&ctx.device_id, now)?;
    } else {
        tracing::warn!(
            device = %ctx.device_id,
            rejected = response.rejected,
            "No item acknowledged; cursor withheld"
        );
    }

    tracing::info!(
        device = %ctx.device_id,
        produced,
        accepted = response.accepted,
        duplicates = response.duplicates,
        rejected = response.rejected,
        "Cycle uploaded"
    );

    Ok(CycleReport {
        scanned_from: collected.from,
        scanned_to: now,
        produced,
        rejected_local,
        cursor_advanced: acknowledged,
        outcome: CycleOutcome::Uploaded(response),
    })
}

/// Run one full cycle against the real upload client.
pub async fn run_cycle(
    ctx: &DeviceContext,
    log: &dyn ActivityLog,
    client: &UploadClient,
    now: DateTime<Utc>,
) -> Result<CycleReport> {
    run_cycle_with(ctx, log, now, |batch| async move {
        client.send_chunked(&batch).await
    })
    .await
}
