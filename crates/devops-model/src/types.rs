//! Core endpoint types: identity, addressing, credentials and state.

use serde::{Deserialize, Serialize};
use std::fmt;
use url::Url;
use uuid::Uuid;

use crate::error::ModelError;

/// Unique identifier for a registered endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EndpointId(String);

impl EndpointId {
    /// Create a new random `EndpointId`.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Parse an `EndpointId` from a string.
    ///
    /// # Errors
    ///
    /// Returns an error if the string is empty or contains whitespace.
    pub fn parse(s: &str) -> Result<Self, ModelError> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(ModelError::Validation(
                "endpoint id cannot be empty".to_string(),
            ));
        }
        if trimmed.chars().any(char::is_whitespace) {
            return Err(ModelError::Validation(format!(
                "endpoint id '{trimmed}' cannot contain whitespace"
            )));
        }
        Ok(Self(trimmed.to_string()))
    }

    /// Get the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for EndpointId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for EndpointId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid.to_string())
    }
}

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Where an endpoint lives.
///
/// Either a raw URL (which may carry a path prefix when the service sits
/// behind a reverse proxy) or scheme/host/port parts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EndpointAddress {
    /// A complete base URL such as `https://devops.example.com/prefix`.
    Url {
        /// The base URL text.
        url: String,
    },
    /// Scheme, host and optional port.
    Parts {
        /// `http` or `https`.
        scheme: String,
        /// Hostname or IP address.
        host: String,
        /// Optional port; the scheme default is used when absent.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        port: Option<u16>,
    },
}

impl EndpointAddress {
    /// Build an address from a raw URL.
    #[must_use]
    pub fn from_url(url: impl Into<String>) -> Self {
        Self::Url { url: url.into() }
    }

    /// Build an address from its parts.
    #[must_use]
    pub fn from_parts(scheme: impl Into<String>, host: impl Into<String>, port: Option<u16>) -> Self {
        Self::Parts {
            scheme: scheme.into(),
            host: host.into(),
            port,
        }
    }

    /// The base URL of the endpoint.
    ///
    /// # Errors
    ///
    /// Returns an error if the address does not form an `http(s)` URL.
    pub fn base_url(&self) -> Result<Url, ModelError> {
        let text = match self {
            Self::Url { url } => url.trim().to_string(),
            Self::Parts { scheme, host, port } => match port {
                Some(port) => format!("{scheme}://{host}:{port}"),
                None => format!("{scheme}://{host}"),
            },
        };

        let url = Url::parse(&text).map_err(|e| ModelError::InvalidUrl {
            url: text.clone(),
            reason: e.to_string(),
        })?;

        match url.scheme() {
            "http" | "https" => {}
            other => {
                return Err(ModelError::InvalidUrl {
                    url: text,
                    reason: format!("unsupported scheme '{other}'"),
                });
            }
        }

        if url.host_str().is_none() {
            return Err(ModelError::InvalidUrl {
                url: text,
                reason: "missing host".to_string(),
            });
        }

        Ok(url)
    }

    /// Resolve an API path (starting with `/`) against the base URL,
    /// keeping any path prefix of the base.
    ///
    /// # Errors
    ///
    /// Returns an error if the base URL is invalid.
    pub fn join(&self, path: &str) -> Result<Url, ModelError> {
        let base = self.base_url()?;
        let text = format!("{}{}", base.as_str().trim_end_matches('/'), path);
        Url::parse(&text).map_err(|e| ModelError::InvalidUrl {
            url: text,
            reason: e.to_string(),
        })
    }

    /// Resolve a path as a WebSocket URL (`http` becomes `ws`, `https` becomes `wss`).
    ///
    /// # Errors
    ///
    /// Returns an error if the base URL is invalid.
    pub fn websocket_url(&self, path: &str) -> Result<Url, ModelError> {
        let url = self.join(path)?;
        let text = url.as_str();
        let converted = if let Some(rest) = text.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = text.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            text.to_string()
        };
        Url::parse(&converted).map_err(|e| ModelError::InvalidUrl {
            url: converted,
            reason: e.to_string(),
        })
    }
}

impl fmt::Display for EndpointAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Url { url } => f.write_str(url),
            Self::Parts {
                scheme,
                host,
                port: Some(port),
            } => write!(f, "{scheme}://{host}:{port}"),
            Self::Parts {
                scheme,
                host,
                port: None,
            } => write!(f, "{scheme}://{host}"),
        }
    }
}

/// Login credentials for an endpoint.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    /// Login email or username.
    pub username: String,
    /// Login password.
    pub password: String,
}

impl Credentials {
    /// Create new credentials.
    #[must_use]
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// Reachability state of an endpoint as seen by the last health probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndpointState {
    /// Reachable and authenticated.
    Active,
    /// Unreachable or failing authentication.
    Inactive,
    /// Switched off by the user; never polled.
    Disabled,
    /// Not probed yet.
    #[default]
    Unknown,
}

impl EndpointState {
    /// Whether the endpoint is currently active.
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Active)
    }
}

impl fmt::Display for EndpointState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Active => "active",
            Self::Inactive => "inactive",
            Self::Disabled => "disabled",
            Self::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// Flavour of a remote endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteKind {
    /// A single hypervisor host.
    #[default]
    SingleHost,
    /// An orchestrator fronting several hosts.
    Orchestrator,
}

impl RemoteKind {
    /// Whether this is an orchestrator.
    #[must_use]
    pub const fn is_orchestrator(self) -> bool {
        matches!(self, Self::Orchestrator)
    }
}

impl fmt::Display for RemoteKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SingleHost => f.write_str("single_host"),
            Self::Orchestrator => f.write_str("orchestrator"),
        }
    }
}

/// The two independently refreshed endpoint groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndpointGroup {
    /// Catalog servers.
    Catalog,
    /// Remote hosts and orchestrators.
    Remote,
}

impl fmt::Display for EndpointGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Catalog => f.write_str("catalog"),
            Self::Remote => f.write_str("remote"),
        }
    }
}
