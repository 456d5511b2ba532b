//! Authenticated JSON requests against an endpoint's REST API.

use reqwest::{Method, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, trace};

use crate::auth::Session;
use crate::config::SyncConfig;
use crate::endpoint::Connection;
use crate::error::{SyncError, SyncResult};

/// Longest response body excerpt kept in an error message.
const MAX_ERROR_BODY: usize = 256;

/// Thin wrapper over a shared `reqwest` client.
///
/// Every request carries the per-request timeout from [`SyncConfig`], so a
/// stalled endpoint surfaces as a failed fetch rather than a hung tick.
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
}

impl ApiClient {
    /// Build a client honouring the configured timeouts.
    ///
    /// # Errors
    ///
    /// Returns an error if the TLS backend cannot be initialised.
    pub fn new(config: &SyncConfig) -> SyncResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .connect_timeout(config.connect_timeout)
            .user_agent(concat!("devops-sync/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| SyncError::Config(format!("failed to build http client: {e}")))?;
        Ok(Self { http })
    }

    /// The underlying `reqwest` client.
    #[must_use]
    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    /// `GET` a JSON document.
    pub async fn get<T: DeserializeOwned>(
        &self,
        connection: &Connection,
        session: &Session,
        path: &str,
        resource: &'static str,
    ) -> SyncResult<T> {
        let response = self
            .execute(connection, session, Method::GET, path, None::<&()>, resource)
            .await?;
        response
            .json::<T>()
            .await
            .map_err(|e| SyncError::transport(connection.id(), resource, &e))
    }

    /// Send a request with an optional JSON body and decode the JSON reply.
    pub async fn send<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        connection: &Connection,
        session: &Session,
        method: Method,
        path: &str,
        body: Option<&B>,
        resource: &'static str,
    ) -> SyncResult<T> {
        let response = self
            .execute(connection, session, method, path, body, resource)
            .await?;
        response
            .json::<T>()
            .await
            .map_err(|e| SyncError::transport(connection.id(), resource, &e))
    }

    /// Send a request whose reply body is ignored.
    pub async fn send_empty<B: Serialize + ?Sized>(
        &self,
        connection: &Connection,
        session: &Session,
        method: Method,
        path: &str,
        body: Option<&B>,
        resource: &'static str,
    ) -> SyncResult<()> {
        self.execute(connection, session, method, path, body, resource)
            .await
            .map(|_| ())
    }

    async fn execute<B: Serialize + ?Sized>(
        &self,
        connection: &Connection,
        session: &Session,
        method: Method,
        path: &str,
        body: Option<&B>,
        resource: &'static str,
    ) -> SyncResult<reqwest::Response> {
        let url = connection.address().join(path)?;
        debug!(endpoint = %connection.id(), %method, url = %url, resource, "request");

        let mut request = self
            .http
            .request(method, url)
            .header(reqwest::header::AUTHORIZATION, session.bearer());
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| SyncError::transport(connection.id(), resource, &e))?;

        let status = response.status();
        trace!(endpoint = %connection.id(), status = status.as_u16(), resource, "response");
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(SyncError::Fetch {
            endpoint: connection.id().clone(),
            resource,
            status: Some(status.as_u16()),
            reason: describe_failure(status, &body),
        })
    }
}

fn describe_failure(status: StatusCode, body: &str) -> String {
    let body = body.trim();
    if body.is_empty() {
        return format!("server returned {status}");
    }
    let excerpt: String = body.chars().take(MAX_ERROR_BODY).collect();
    format!("server returned {status}: {excerpt}")
}

/// Whether an error means the server rejected our token.
#[must_use]
pub fn is_unauthorized(err: &SyncError) -> bool {
    matches!(
        err,
        SyncError::Fetch {
            status: Some(401),
            ..
        }
    )
}
