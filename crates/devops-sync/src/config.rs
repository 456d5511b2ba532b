//! Engine configuration and the endpoint registry file.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use devops_model::{Credentials, EndpointAddress, EndpointId, RemoteKind};
use serde::{Deserialize, Serialize};

use crate::auth::DEFAULT_SUPERUSER_ROLE;
use crate::endpoint::{CatalogEndpoint, Connection, Endpoint, RemoteEndpoint};
use crate::error::{SyncError, SyncResult};

/// Default period of both refresh timers.
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_millis(5000);

/// Default upper bound on a single HTTP request.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Default upper bound on establishing a TCP/TLS connection.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Tunables of the synchronization engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// Period of the catalog and remote refresh timers.
    pub refresh_interval: Duration,
    /// Timeout applied to every HTTP request.
    pub request_timeout: Duration,
    /// Timeout for connection establishment (HTTP and WebSocket).
    pub connect_timeout: Duration,
    /// Role that marks a principal as a super user.
    pub superuser_role: String,
}

impl SyncConfig {
    /// Create a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self {
            refresh_interval: DEFAULT_REFRESH_INTERVAL,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            superuser_role: DEFAULT_SUPERUSER_ROLE.to_string(),
        }
    }

    /// Set the refresh interval.
    #[must_use]
    pub fn with_refresh_interval(mut self, interval: Duration) -> Self {
        self.refresh_interval = interval;
        self
    }

    /// Set the request timeout.
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the connect timeout.
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the super user role name.
    #[must_use]
    pub fn with_superuser_role(mut self, role: impl Into<String>) -> Self {
        self.superuser_role = role.into();
        self
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if an interval or timeout is zero or the super user
    /// role is blank.
    pub fn validate(&self) -> SyncResult<()> {
        if self.refresh_interval.is_zero() {
            return Err(SyncError::Config(
                "refresh_interval must be greater than 0".to_string(),
            ));
        }
        if self.request_timeout.is_zero() {
            return Err(SyncError::Config(
                "request_timeout must be greater than 0".to_string(),
            ));
        }
        if self.connect_timeout.is_zero() {
            return Err(SyncError::Config(
                "connect_timeout must be greater than 0".to_string(),
            ));
        }
        if self.superuser_role.trim().is_empty() {
            return Err(SyncError::Config(
                "superuser_role cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// A catalog server entry in the registry file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEndpointConfig {
    /// Stable id; generated when absent.
    #[serde(default)]
    pub id: Option<EndpointId>,
    /// Display name.
    pub name: String,
    /// Base address.
    pub address: EndpointAddress,
    /// Login credentials.
    pub credentials: Credentials,
    /// Previously issued token to try before logging in.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

/// A remote host or orchestrator entry in the registry file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteEndpointConfig {
    /// Stable id; generated when absent.
    #[serde(default)]
    pub id: Option<EndpointId>,
    /// Display name.
    pub name: String,
    /// Base address.
    pub address: EndpointAddress,
    /// Login credentials.
    pub credentials: Credentials,
    /// Single host or orchestrator.
    #[serde(default)]
    pub kind: RemoteKind,
    /// Whether the endpoint is polled.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Previously issued token to try before logging in.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

const fn default_enabled() -> bool {
    true
}

/// The endpoints a daemon should register at startup.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryFile {
    /// Catalog servers.
    #[serde(default)]
    pub catalog_endpoints: Vec<CatalogEndpointConfig>,
    /// Remote hosts and orchestrators.
    #[serde(default)]
    pub remote_endpoints: Vec<RemoteEndpointConfig>,
}

impl RegistryFile {
    /// Load the registry from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: impl AsRef<Path>) -> SyncResult<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            SyncError::Config(format!(
                "failed to read registry file '{}': {e}",
                path.as_ref().display()
            ))
        })?;
        Self::from_json(&content)
    }

    /// Parse the registry from a JSON string.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON is invalid or fails validation.
    pub fn from_json(content: &str) -> SyncResult<Self> {
        let registry: Self = serde_json::from_str(content)
            .map_err(|e| SyncError::Config(format!("invalid registry JSON: {e}")))?;
        registry.validate()?;
        Ok(registry)
    }

    /// Validate names and addresses, and reject duplicate explicit ids.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Config`] or [`SyncError::Model`] naming the first
    /// offending entry.
    pub fn validate(&self) -> SyncResult<()> {
        let mut seen = std::collections::HashSet::new();
        let entries = self
            .catalog_endpoints
            .iter()
            .map(|e| (&e.id, &e.name, &e.address))
            .chain(
                self.remote_endpoints
                    .iter()
                    .map(|e| (&e.id, &e.name, &e.address)),
            );

        for (id, name, address) in entries {
            if name.trim().is_empty() {
                return Err(SyncError::Config("endpoint name cannot be empty".to_string()));
            }
            address.base_url()?;
            if let Some(id) = id {
                if !seen.insert(id.clone()) {
                    return Err(SyncError::Config(format!("duplicate endpoint id '{id}'")));
                }
            }
        }
        Ok(())
    }

    /// Build endpoint values, catalog servers first.
    #[must_use]
    pub fn into_endpoints(self) -> Vec<Endpoint> {
        let catalogs = self.catalog_endpoints.into_iter().map(|entry| {
            let connection = connection(
                entry.id,
                entry.name,
                entry.address,
                entry.credentials,
                entry.token,
            );
            Endpoint::Catalog(Arc::new(CatalogEndpoint::new(connection)))
        });
        let remotes = self.remote_endpoints.into_iter().map(|entry| {
            let connection = connection(
                entry.id,
                entry.name,
                entry.address,
                entry.credentials,
                entry.token,
            );
            let endpoint = RemoteEndpoint::new(connection, entry.kind);
            if !entry.enabled {
                endpoint.set_enabled(false);
            }
            Endpoint::Remote(Arc::new(endpoint))
        });
        catalogs.chain(remotes).collect()
    }
}

fn connection(
    id: Option<EndpointId>,
    name: String,
    address: EndpointAddress,
    credentials: Credentials,
    token: Option<String>,
) -> Connection {
    let connection = Connection::new(id.unwrap_or_default(), name, address, credentials);
    match token {
        Some(token) => connection.with_token(token),
        None => connection,
    }
}
