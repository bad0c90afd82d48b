//! Raw-form batch ingest
//!
//! `POST /api/v1/events/batch`: authenticate, check the envelope against the
//! ceilings, append every event to the durable queue, and acknowledge
//! immediately without waiting for aggregation. Over-ceiling batches are
//! rejected wholesale so the client resplits; partial acceptance of an
//! oversized batch is never attempted.

use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use chrono::{Duration, TimeZone, Utc};

use screentrace_core::queue::EventQueue;
use screentrace_core::types::{format_utc, EventBatchRequest, EventBatchResponse, QueuedEvent};

use crate::api::auth::authenticate;
use crate::api::error::{ApiError, ApiResult};
use crate::state::{backoff_for_lag, SharedState};

pub async fn batch_events(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Json(batch): Json<EventBatchRequest>,
) -> ApiResult<Json<EventBatchResponse>> {
    let identity = authenticate(&state, &headers)?;

    if batch.device_id.is_empty() {
        return Err(ApiError::BadRequest {
            error_code: "missing_device_id".to_string(),
            message: "device_id is required".to_string(),
        });
    }
    if batch.device_id != identity.device_id {
        return Err(ApiError::DeviceMismatch);
    }

    check_batch_ceilings(&state, batch.events.len(), &batch)?;

    let lag = state.queue.lag();
    if lag > state.limits.queue_hard_ceiling {
        return Err(ApiError::Throttled {
            backoff_seconds: 30,
        });
    }

    let mut acknowledged_ids = Vec::with_capacity(batch.events.len());
    for event in &batch.events {
        // Derive the validation window from ts/secs so the processor runs
        // the same contract on both wire forms.
        let end = Utc
            .timestamp_millis_opt(event.ts)
            .single()
            .unwrap_or_else(Utc::now);
        let start = end - Duration::milliseconds((event.secs * 1000.0) as i64);

        state.queue.append(QueuedEvent {
            account_id: identity.account_id.clone(),
            device_id: identity.device_id.clone(),
            event_id: event.event_id.to_string(),
            kind: event.kind.clone(),
            key: event.key.clone(),
            secs: event.secs,
            window_start: format_utc(start),
            window_end: format_utc(end),
            client_version: batch.client_version.clone(),
            enqueued_at: Utc::now(),
        })?;
        acknowledged_ids.push(event.event_id.to_string());
    }

    tracing::info!(
        device = %identity.device_id,
        events = acknowledged_ids.len(),
        sequence_start = batch.sequence_start,
        lag,
        "Enqueued raw event batch"
    );

    Ok(Json(EventBatchResponse {
        acknowledged_ids,
        backoff_seconds: backoff_for_lag(lag),
    }))
}

/// Reject the whole batch when an envelope ceiling is exceeded.
pub(crate) fn check_batch_ceilings<T: serde::Serialize>(
    state: &SharedState,
    item_count: usize,
    body: &T,
) -> Result<(), ApiError> {
    if item_count > state.limits.max_batch_items {
        return Err(ApiError::PayloadTooLarge {
            message: format!(
                "batch has {} items, ceiling is {}",
                item_count, state.limits.max_batch_items
            ),
        });
    }

    let bytes = serde_json::to_vec(body).map(|v| v.len()).unwrap_or(usize::MAX);
    if bytes > state.limits.max_batch_bytes {
        return Err(ApiError::PayloadTooLarge {
            message: format!(
                "batch is {} bytes, ceiling is {}",
                bytes, state.limits.max_batch_bytes
            ),
        });
    }

    Ok(())
}
