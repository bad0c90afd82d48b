//! Device-scoped context
//!
//! Everything a collection cycle needs travels here explicitly: identity,
//! configuration, credentials, and the cursor store.

use std::sync::Arc;

use crate::config::AgentConfig;
use crate::error::Result;

use super::cursor::CursorStore;

/// Source of the bearer credential presented to the ingest gateway.
///
/// Issuance and refresh live in the registration service; the upload client
/// only asks for the current token and triggers a refresh after a 401.
pub trait CredentialProvider: Send + Sync {
    /// The current bearer token, if one is held.
    fn bearer(&self) -> Option<String>;

    /// Attempt a refresh. Returns true when a new token was obtained.
    fn refresh(&self) -> Result<bool>;
}

/// A fixed token with no refresh path (config-provisioned credentials).
pub struct StaticCredentials {
    token: String,
}

impl StaticCredentials {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

impl CredentialProvider for StaticCredentials {
    fn bearer(&self) -> Option<String> {
        Some(self.token.clone())
    }

    fn refresh(&self) -> Result<bool> {
        Ok(false)
    }
}

/// Per-device context threaded through the batcher and uploader.
pub struct DeviceContext {
    pub device_id: String,
    pub config: AgentConfig,
    pub credentials: Arc<dyn CredentialProvider>,
    pub cursors: Arc<CursorStore>,
}

impl DeviceContext {
    pub fn new(
        device_id: impl Into<String>,
        config: AgentConfig,
        credentials: Arc<dyn CredentialProvider>,
        cursors: Arc<CursorStore>,
    ) -> Self {
        Self {
            device_id: device_id.into(),
            config,
            credentials,
            cursors,
        }
    }
}
