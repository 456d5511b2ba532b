//! Liveness plus authentication check for an endpoint.

use tracing::{debug, instrument};

use crate::auth::{Session, TokenManager};
use crate::endpoint::Connection;
use crate::error::{SyncError, SyncResult};

/// Unauthenticated liveness path, relative to the endpoint base URL.
pub const PROBE_PATH: &str = "/api/health/probe";

/// Classifies an endpoint as reachable and authenticated.
#[derive(Debug, Clone)]
pub struct HealthProber {
    http: reqwest::Client,
    tokens: TokenManager,
}

impl HealthProber {
    /// Create a prober.
    #[must_use]
    pub fn new(http: reqwest::Client, tokens: TokenManager) -> Self {
        Self { http, tokens }
    }

    /// Probe liveness, then authorize.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Unreachable`] if the liveness request fails and
    /// [`SyncError::AuthenticationFailed`] if the endpoint is alive but
    /// rejects the credentials.
    #[instrument(skip(self, connection), fields(endpoint = %connection.id()))]
    pub async fn probe(&self, connection: &Connection) -> SyncResult<Session> {
        let unreachable = |reason: String| SyncError::Unreachable {
            endpoint: connection.id().clone(),
            reason,
        };

        let url = connection.address().join(PROBE_PATH)?;
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| unreachable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(unreachable(format!("probe returned {status}")));
        }
        debug!("probe ok");

        self.tokens.authorize(connection).await
    }
}
