//! Upload retry state machine
//!
//! The retry logic is a set of pure transition functions over an explicit
//! state enum, so every transition is unit-testable without a network.
//!
//! ```text
//! Idle ── send ──► Sending ──┬──► Success   (2xx, well-formed body)
//!                            ├──► Retry     (401 / 429 / 5xx / transport)
//!                            └──► Fatal     (other 4xx: batch shape is wrong)
//! ```
//!
//! Retry is unbounded in attempt count and bounded in delay; Fatal means the
//! caller must restructure the batch (e.g. split it) before resending.

use std::time::Duration;

use crate::types::UsageBatchResponse;

/// Upload client state for one batch.
#[derive(Debug, Clone, PartialEq)]
pub enum UploadState {
    Idle,
    Sending {
        attempt: u32,
    },
    Success(UsageBatchResponse),
    Retry {
        attempt: u32,
        delay: Duration,
        refresh_credentials: bool,
    },
    Fatal {
        status: u16,
        message: String,
    },
}

/// Classified outcome of a single HTTP attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum AttemptOutcome {
    /// 2xx with a well-formed body, possibly carrying per-item rejections
    Accepted(UsageBatchResponse),
    /// 401: credentials stale, refresh then retry
    Unauthorized,
    /// 429: honor the server's backoff hint
    TooManyRequests { backoff_seconds: Option<u64> },
    /// 413 or equivalent: the batch shape itself is unacceptable
    PayloadTooLarge,
    /// Any other 4xx: malformed envelope, retrying verbatim cannot succeed
    ClientError { status: u16, message: String },
    /// 5xx: transient server-side failure
    ServerError { status: u16 },
    /// Connection/timeout failure before a status was obtained
    Transport { message: String },
}

/// Default backoff when a 429 carries no hint.
const DEFAULT_THROTTLE_SECS: u64 = 30;

/// Exponential backoff capped at 60s: `min(60, 2^attempt + jitter)` seconds.
/// `jitter` is expected in `[0, 1)` and is passed in to keep this pure.
pub fn retry_delay(attempt: u32, jitter: f64) -> Duration {
    let base = (1u64 << attempt.min(6)) as f64;
    Duration::from_secs_f64((base + jitter).min(60.0))
}

/// Pure transition from a completed attempt to the next state.
pub fn transition(attempt: u32, outcome: AttemptOutcome, jitter: f64) -> UploadState {
    match outcome {
        AttemptOutcome::Accepted(response) => UploadState::Success(response),
        AttemptOutcome::Unauthorized => UploadState::Retry {
            attempt: attempt + 1,
            delay: retry_delay(attempt, jitter),
            refresh_credentials: true,
        },
        AttemptOutcome::TooManyRequests { backoff_seconds } => UploadState::Retry {
            attempt: attempt + 1,
            delay: Duration::from_secs(backoff_seconds.unwrap_or(DEFAULT_THROTTLE_SECS)),
            refresh_credentials: false,
        },
        AttemptOutcome::PayloadTooLarge => UploadState::Fatal {
            status: 413,
            message: "payload too large; batch must be split before resending".to_string(),
        },
        AttemptOutcome::ClientError { status, message } => UploadState::Fatal { status, message },
        AttemptOutcome::ServerError { .. } | AttemptOutcome::Transport { .. } => {
            UploadState::Retry {
                attempt: attempt + 1,
                delay: retry_delay(attempt, jitter),
                refresh_credentials: false,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_delay_growth_and_cap() {
        assert_eq!(retry_delay(0, 0.0), Duration::from_secs(1));
        assert_eq!(retry_delay(1, 0.0), Duration::from_secs(2));
        assert_eq!(retry_delay(4, 0.0), Duration::from_secs(16));
        // Caps at 60 regardless of attempt count
        assert_eq!(retry_delay(6, 0.0), Duration::from_secs(60));
        assert_eq!(retry_delay(40, 0.9), Duration::from_secs(60));
    }

    #[test]
    fn test_retry_delay_includes_jitter() {
        let delay = retry_delay(2, 0.5);
        assert_eq!(delay, Duration::from_secs_f64(4.5));
    }

    #[test]
    fn test_accepted_is_success_even_with_rejections() {
        let response = UsageBatchResponse {
            accepted: 3,
            duplicates: 1,
            rejected: 2,
            errors: Vec::new(),
        };
        let state = transition(0, AttemptOutcome::Accepted(response.clone()), 0.0);
        assert_eq!(state, UploadState::Success(response));
    }

    #[test]
    fn test_unauthorized_retries_with_refresh() {
        let state = transition(0, AttemptOutcome::Unauthorized, 0.0);
        match state {
            UploadState::Retry {
                attempt,
                refresh_credentials,
                ..
            } => {
                assert_eq!(attempt, 1);
                assert!(refresh_credentials);
            }
            other => panic!("unexpected state: {:?}", other),
        }
    }

    #[test]
    fn test_throttle_uses_server_hint() {
        let state = transition(
            2,
            AttemptOutcome::TooManyRequests {
                backoff_seconds: Some(12),
            },
            0.0,
        );
        match state {
            UploadState::Retry { delay, .. } => assert_eq!(delay, Duration::from_secs(12)),
            other => panic!("unexpected state: {:?}", other),
        }
    }

    #[test]
    fn test_throttle_defaults_to_thirty_seconds() {
        let state = transition(
            0,
            AttemptOutcome::TooManyRequests {
                backoff_seconds: None,
            },
            0.0,
        );
        match state {
            UploadState::Retry { delay, .. } => assert_eq!(delay, Duration::from_secs(30)),
            other => panic!("unexpected state: {:?}", other),
        }
    }

    #[test]
    fn test_server_error_retries_without_refresh() {
        let state = transition(3, AttemptOutcome::ServerError { status: 503 }, 0.0);
        match state {
            UploadState::Retry {
                attempt,
                delay,
                refresh_credentials,
            } => {
                assert_eq!(attempt, 4);
                assert_eq!(delay, Duration::from_secs(8));
                assert!(!refresh_credentials);
            }
            other => panic!("unexpected state: {:?}", other),
        }
    }

    #[test]
    fn test_oversized_payload_is_fatal() {
        let state = transition(0, AttemptOutcome::PayloadTooLarge, 0.0);
        assert!(matches!(state, UploadState::Fatal { status: 413, .. }));
    }

    #[test]
    fn test_other_client_error_is_fatal_not_retried() {
        let state = transition(
            0,
            AttemptOutcome::ClientError {
                status: 422,
                message: "bad envelope".to_string(),
            },
            0.0,
        );
        assert!(matches!(state, UploadState::Fatal { status: 422, .. }));
    }

    #[test]
    fn test_transport_failure_retries() {
        let state = transition(
            0,
            AttemptOutcome::Transport {
                message: "connection reset".to_string(),
            },
            0.0,
        );
        assert!(matches!(state, UploadState::Retry { attempt: 1, .. }));
    }
}
