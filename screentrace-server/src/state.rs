//! Shared server state
//!
//! Gateway handlers are stateless with respect to requests; everything they
//! touch here is shared infrastructure (queue, store, dedup cache, token
//! table), each internally synchronized, so the router can be cloned freely
//! and replicated.

use std::collections::HashMap;
use std::sync::Arc;

use screentrace_core::config::{DeviceCredential, ServerConfig};
use screentrace_core::dedup::DedupCache;
use screentrace_core::queue::EventQueue;
use screentrace_core::RollupStore;

/// Identity behind an accepted bearer token.
#[derive(Debug, Clone)]
pub struct DeviceIdentity {
    pub account_id: String,
    pub device_id: String,
}

/// Bearer-token lookup against externally issued device credentials.
#[derive(Debug, Default)]
pub struct TokenVerifier {
    tokens: HashMap<String, DeviceIdentity>,
}

impl TokenVerifier {
    pub fn new(devices: &[DeviceCredential]) -> Self {
        let tokens = devices
            .iter()
            .map(|d| {
                (
                    d.token.clone(),
                    DeviceIdentity {
                        account_id: d.account_id.clone(),
                        device_id: d.device_id.clone(),
                    },
                )
            })
            .collect();
        Self { tokens }
    }

    pub fn verify(&self, token: &str) -> Option<&DeviceIdentity> {
        self.tokens.get(token)
    }
}

/// Batch envelope ceilings and queue pressure thresholds.
#[derive(Debug, Clone)]
pub struct IngestLimits {
    pub max_batch_items: usize,
    pub max_batch_bytes: usize,
    pub queue_hard_ceiling: usize,
}

impl IngestLimits {
    pub fn from_config(config: &ServerConfig) -> Self {
        Self {
            max_batch_items: config.max_batch_items,
            max_batch_bytes: config.max_batch_bytes,
            queue_hard_ceiling: config.queue_hard_ceiling,
        }
    }
}

/// Application state shared across handlers.
pub struct AppState {
    pub queue: Arc<dyn EventQueue>,
    pub store: Arc<RollupStore>,
    pub dedup: Arc<dyn DedupCache>,
    pub verifier: TokenVerifier,
    pub limits: IngestLimits,
}

pub type SharedState = Arc<AppState>;

/// Backoff hint derived from queue lag, so backed-up clients slow down
/// before the hard ceiling turns them away.
pub fn backoff_for_lag(lag: usize) -> u64 {
    if lag > 50_000 {
        30
    } else if lag > 10_000 {
        15
    } else if lag > 5_000 {
        5
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_tiers() {
        assert_eq!(backoff_for_lag(0), 0);
        assert_eq!(backoff_for_lag(5_001), 5);
        assert_eq!(backoff_for_lag(10_001), 15);
        assert_eq!(backoff_for_lag(50_001), 30);
    }

    #[test]
    fn test_token_verifier() {
        let verifier = TokenVerifier::new(&[DeviceCredential {
            token: "st_live_abc".to_string(),
            device_id: "device-1".to_string(),
            account_id: "family-1".to_string(),
        }]);

        assert!(verifier.verify("st_live_abc").is_some());
        assert!(verifier.verify("st_live_xyz").is_none());
        assert_eq!(verifier.verify("st_live_abc").unwrap().device_id, "device-1");
    }
}
