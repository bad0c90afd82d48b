//! Session-form batch ingest and dry-run validation
//!
//! `POST /api/v1/usage/batch`: authenticate, validate each item with the
//! shared validator, resolve already-processed fragments as duplicates, and
//! enqueue the rest. Item failures never affect siblings.
//!
//! `POST /api/v1/usage/validate` accepts the identical envelope without
//! persisting anything, for client self-check.

use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use chrono::Utc;

use screentrace_core::dedup::DedupCache;
use screentrace_core::queue::EventQueue;
use screentrace_core::types::{
    fragment_id, QueuedEvent, UsageBatchRequest, UsageBatchResponse,
};
use screentrace_core::validate::partition_valid;

use crate::api::auth::authenticate;
use crate::api::error::{ApiError, ApiResult};
use crate::api::events::check_batch_ceilings;
use crate::state::SharedState;

/// Aggregation kind assigned to session-form items.
const SESSION_KIND: &str = "app_session";

pub async fn batch_usage(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Json(batch): Json<UsageBatchRequest>,
) -> ApiResult<Json<UsageBatchResponse>> {
    let identity = authenticate(&state, &headers)?;

    check_batch_ceilings(&state, batch.items.len(), &batch)?;

    let lag = state.queue.lag();
    if lag > state.limits.queue_hard_ceiling {
        return Err(ApiError::Throttled {
            backoff_seconds: 30,
        });
    }

    let now = Utc::now();
    let (valid, errors) = partition_valid(&batch.items, now);
    let rejected = errors.len();

    let mut accepted = 0usize;
    let mut duplicates = 0usize;

    for (_, item) in valid {
        let event_id = fragment_id(&identity.device_id, &item);
        let dedup_key = format!("{}:{}", identity.device_id, event_id);

        // Read-only probe: the processor is the one that claims identifiers.
        // An already-seen fragment is an earlier success whose response the
        // client lost; acknowledge it as processed without re-enqueueing.
        if state.dedup.contains(&dedup_key) {
            duplicates += 1;
            continue;
        }

        state.queue.append(QueuedEvent {
            account_id: identity.account_id.clone(),
            device_id: identity.device_id.clone(),
            event_id,
            kind: SESSION_KIND.to_string(),
            key: item.package.clone(),
            secs: item.duration_secs(),
            window_start: item.window_start.clone(),
            window_end: item.window_end.clone(),
            client_version: "session-form".to_string(),
            enqueued_at: now,
        })?;
        accepted += 1;
    }

    tracing::info!(
        device = %identity.device_id,
        accepted,
        duplicates,
        rejected,
        "Processed session-form batch"
    );

    Ok(Json(UsageBatchResponse {
        accepted,
        duplicates,
        rejected,
        errors,
    }))
}

pub async fn validate_usage(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Json(batch): Json<UsageBatchRequest>,
) -> ApiResult<Json<UsageBatchResponse>> {
    let identity = authenticate(&state, &headers)?;

    check_batch_ceilings(&state, batch.items.len(), &batch)?;

    let (valid, errors) = partition_valid(&batch.items, Utc::now());

    tracing::debug!(
        device = %identity.device_id,
        valid = valid.len(),
        rejected = errors.len(),
        "Dry-run validated batch"
    );

    Ok(Json(UsageBatchResponse {
        accepted: valid.len(),
        duplicates: 0,
        rejected: errors.len(),
        errors,
    }))
}
