//! Health endpoint

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use screentrace_core::queue::EventQueue;

use crate::state::SharedState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub queue_lag: usize,
    pub queue_partitions: usize,
}

pub async fn health(State(state): State<SharedState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        queue_lag: state.queue.lag(),
        queue_partitions: state.queue.partitions(),
    })
}
