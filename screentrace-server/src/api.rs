//! Ingest gateway API
//!
//! Route table:
//! - `GET  /health`
//! - `POST /api/v1/events/batch`   raw-form ingest
//! - `POST /api/v1/usage/batch`    session-form ingest
//! - `POST /api/v1/usage/validate` session-form dry run

pub mod auth;
pub mod error;
pub mod events;
pub mod health;
pub mod usage;

use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::state::SharedState;

/// Build the gateway router over the shared state.
pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/health", get(health::health))
        .route("/api/v1/events/batch", post(events::batch_events))
        .route("/api/v1/usage/batch", post(usage::batch_usage))
        .route("/api/v1/usage/validate", post(usage::validate_usage))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
