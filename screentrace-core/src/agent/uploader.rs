//! HTTP client for the ingest gateway batch API
//!
//! Drives the retry state machine in `retry.rs`: classify the attempt, feed
//! it through the pure transition function, and act on the resulting state.
//! Retries are unbounded in attempt count; only a Fatal shape error ends a
//! batch without delivery.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::StatusCode;

use crate::config::UploadConfig;
use crate::error::{Error, Result};
use crate::types::{UsageBatchRequest, UsageBatchResponse};

use super::context::CredentialProvider;
use super::retry::{transition, AttemptOutcome, UploadState};

/// Terminal outcome of delivering one batch.
#[derive(Debug, Clone)]
pub enum UploadOutcome {
    /// The server acknowledged the batch (it may still carry per-item
    /// rejections and duplicates in the body).
    Delivered(UsageBatchResponse),
    /// The batch shape was rejected; it must be restructured before resend.
    RejectedShape { status: u16, message: String },
}

/// HTTP client for the session-form batch upload API.
pub struct UploadClient {
    config: UploadConfig,
    credentials: Arc<dyn CredentialProvider>,
    http_client: reqwest::Client,
    base_url: String,
}

impl UploadClient {
    /// Create a new upload client from configuration.
    ///
    /// Returns an error if the configuration is invalid or missing required
    /// fields.
    pub fn new(config: UploadConfig, credentials: Arc<dyn CredentialProvider>) -> Result<Self> {
        config.validate()?;

        let base_url = config
            .server_url
            .clone()
            .ok_or_else(|| Error::Config("upload.server_url is required".to_string()))?
            .trim_end_matches('/')
            .to_string();

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .default_headers(headers)
            .build()
            .map_err(|e| Error::Config(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            config,
            credentials,
            http_client,
            base_url,
        })
    }

    /// Deliver one batch, retrying until the server acknowledges it or the
    /// batch shape is rejected.
    pub async fn send_batch(&self, batch: &UsageBatchRequest) -> Result<UploadOutcome> {
        let mut attempt: u32 = 0;

        loop {
            let outcome = self.post_batch_once(batch).await;
            let jitter = rand::thread_rng().gen::<f64>();

            match transition(attempt, outcome, jitter) {
                UploadState::Success(response) => {
                    for rejection in &response.errors {
                        tracing::warn!(
                            index = rejection.index,
                            code = %rejection.code,
                            error = %rejection.error,
                            "Server rejected batch item"
                        );
                    }
                    return Ok(UploadOutcome::Delivered(response));
                }
                UploadState::Retry {
                    attempt: next_attempt,
                    delay,
                    refresh_credentials,
                } => {
                    if refresh_credentials {
                        match self.credentials.refresh() {
                            Ok(refreshed) => {
                                tracing::info!(refreshed, "Credential refresh after 401")
                            }
                            Err(e) => tracing::warn!(error = %e, "Credential refresh failed"),
                        }
                    }
                    tracing::debug!(
                        attempt = next_attempt,
                        delay_ms = delay.as_millis() as u64,
                        "Retrying batch upload"
                    );
                    tokio::time::sleep(delay).await;
                    attempt = next_attempt;
                }
                UploadState::Fatal { status, message } => {
                    tracing::warn!(status, %message, "Batch shape rejected; not retrying as-is");
                    return Ok(UploadOutcome::RejectedShape { status, message });
                }
                UploadState::Idle | UploadState::Sending { .. } => {
                    // transition() never yields these
                    unreachable!("transition returned a non-terminal state")
                }
            }
        }
    }

    /// Deliver a batch, splitting it into configured chunks first and again
    /// after any shape rejection. Returns the merged server response.
    pub async fn send_chunked(&self, batch: &UsageBatchRequest) -> Result<UsageBatchResponse> {
        let chunks = batch.chunked(self.config.max_batch_items, self.config.max_batch_bytes)?;
        let mut merged = UsageBatchResponse::default();

        for chunk in chunks {
            match self.send_batch(&chunk).await? {
                UploadOutcome::Delivered(response) => {
                    merged.accepted += response.accepted;
                    merged.duplicates += response.duplicates;
                    merged.rejected += response.rejected;
                    merged.errors.extend(response.errors);
                }
                UploadOutcome::RejectedShape { status, message } if chunk.items.len() > 1 => {
                    // Resplit one level down and deliver item by item.
                    tracing::info!(status, %message, "Resplitting rejected chunk");
                    for item in chunk.items {
                        let single = UsageBatchRequest { items: vec![item] };
                        if let UploadOutcome::Delivered(response) =
                            self.send_batch(&single).await?
                        {
                            merged.accepted += response.accepted;
                            merged.duplicates += response.duplicates;
                            merged.rejected += response.rejected;
                            merged.errors.extend(response.errors);
                        }
                    }
                }
                UploadOutcome::RejectedShape { status, message } => {
                    return Err(Error::Upload(format!(
                        "single-item batch rejected ({}): {}",
                        status, message
                    )));
                }
            }
        }

        Ok(merged)
    }

    /// One HTTP attempt, classified for the state machine. Transport errors
    /// become an outcome rather than an `Err` so the machine decides.
    async fn post_batch_once(&self, batch: &UsageBatchRequest) -> AttemptOutcome {
        let url = format!("{}/api/v1/usage/batch", self.base_url);

        let mut request = self.http_client.post(&url).json(batch);
        if let Some(token) = self.credentials.bearer() {
            request = request.bearer_auth(token);
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                return AttemptOutcome::Transport {
                    message: e.to_string(),
                }
            }
        };

        let status = response.status();

        if status.is_success() {
            return match response.json::<UsageBatchResponse>().await {
                Ok(body) => AttemptOutcome::Accepted(body),
                // A 2xx without a parseable body is indistinguishable from a
                // lost response; retry and let the server dedup absorb it.
                Err(e) => AttemptOutcome::Transport {
                    message: format!("malformed success body: {}", e),
                },
            };
        }

        match status {
            StatusCode::UNAUTHORIZED => AttemptOutcome::Unauthorized,
            StatusCode::TOO_MANY_REQUESTS => {
                let backoff_seconds = response
                    .json::<serde_json::Value>()
                    .await
                    .ok()
                    .and_then(|v| v.get("backoff_seconds").and_then(|b| b.as_u64()));
                AttemptOutcome::TooManyRequests { backoff_seconds }
            }
            StatusCode::PAYLOAD_TOO_LARGE => AttemptOutcome::PayloadTooLarge,
            s if s.is_client_error() => {
                let message = response.text().await.unwrap_or_else(|_| "unknown".to_string());
                AttemptOutcome::ClientError {
                    status: s.as_u16(),
                    message,
                }
            }
            s => AttemptOutcome::ServerError { status: s.as_u16() },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::context::StaticCredentials;

    #[test]
    fn test_client_requires_valid_config() {
        let config = UploadConfig::default();
        let credentials = Arc::new(StaticCredentials::new("st_live_test"));
        assert!(UploadClient::new(config, credentials).is_err());
    }

    #[test]
    fn test_client_with_valid_config() {
        let config = UploadConfig {
            enabled: true,
            server_url: Some("https://screentrace.example.com".to_string()),
            device_id: Some("device-1".to_string()),
            api_key: Some("st_live_test".to_string()),
            ..Default::default()
        };
        let credentials = Arc::new(StaticCredentials::new("st_live_test"));
        assert!(UploadClient::new(config, credentials).is_ok());
    }
}
