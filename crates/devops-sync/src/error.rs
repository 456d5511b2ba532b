//! Error types for the synchronization engine.

use devops_model::{EndpointId, ModelError};
use thiserror::Error;

use crate::logstream::ChannelKey;

/// Errors that can occur while talking to or reconciling endpoints.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The liveness probe failed (network, DNS, TLS or non-success status).
    #[error("endpoint {endpoint} is unreachable: {reason}")]
    Unreachable {
        /// The endpoint that failed the probe.
        endpoint: EndpointId,
        /// What went wrong.
        reason: String,
    },

    /// Login failed or the token could not be refreshed.
    #[error("authentication failed for endpoint {endpoint}")]
    AuthenticationFailed {
        /// The endpoint that rejected the credentials.
        endpoint: EndpointId,
    },

    /// The operation only exists on orchestrator endpoints.
    #[error("operation '{operation}' is not supported by endpoint {endpoint}")]
    UnsupportedOperation {
        /// The endpoint the operation was attempted on.
        endpoint: EndpointId,
        /// The operation name.
        operation: &'static str,
    },

    /// A log stream is already open for this key.
    #[error("log channel {0} is already open")]
    ChannelAlreadyOpen(ChannelKey),

    /// A resource request failed.
    #[error("failed to fetch {resource} from endpoint {endpoint}: {reason}")]
    Fetch {
        /// The endpoint the request was sent to.
        endpoint: EndpointId,
        /// The resource being fetched or mutated.
        resource: &'static str,
        /// HTTP status, when the server answered.
        status: Option<u16>,
        /// What went wrong.
        reason: String,
    },

    /// The endpoint is not registered.
    #[error("endpoint {0} not found")]
    NotFound(EndpointId),

    /// The endpoint is already registered.
    #[error("endpoint {0} is already registered")]
    AlreadyRegistered(EndpointId),

    /// A bearer token could not be decoded.
    #[error("invalid token: {0}")]
    Token(String),

    /// WebSocket error.
    #[error("websocket error: {0}")]
    WebSocket(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Model validation error.
    #[error(transparent)]
    Model(#[from] ModelError),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl SyncError {
    /// Build a [`SyncError::Fetch`] from a transport error.
    #[must_use]
    pub fn transport(endpoint: &EndpointId, resource: &'static str, err: &reqwest::Error) -> Self {
        Self::Fetch {
            endpoint: endpoint.clone(),
            resource,
            status: err.status().map(|s| s.as_u16()),
            reason: err.to_string(),
        }
    }

    /// Whether this error marks the endpoint as unauthenticated.
    #[must_use]
    pub const fn is_auth_failure(&self) -> bool {
        matches!(self, Self::AuthenticationFailed { .. })
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for SyncError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::WebSocket(err.to_string())
    }
}

/// Result type for synchronization operations.
pub type SyncResult<T> = Result<T, SyncError>;
