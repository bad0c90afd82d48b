//! Bearer-token authentication for ingest handlers
//!
//! Credentials are issued by the registration service; the gateway only
//! checks presented tokens against its mirror of them.

use axum::http::header::AUTHORIZATION;
use axum::http::HeaderMap;

use crate::api::error::ApiError;
use crate::state::{AppState, DeviceIdentity};

/// Resolve the device identity behind the request, or fail with 401.
pub fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<DeviceIdentity, ApiError> {
    let token = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .ok_or(ApiError::Unauthorized)?;

    state
        .verifier
        .verify(token)
        .cloned()
        .ok_or(ApiError::Unauthorized)
}
