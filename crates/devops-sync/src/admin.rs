//! Administrative mutations against an endpoint.
//!
//! Each call authorizes and sends exactly one request. The cached snapshot
//! is left alone; the next refresh tick picks up the result.

use devops_model::{Claim, HostRequest, OrchestratorHost, RemoteKind, Role, User, UserRequest};
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::info;

use crate::auth::TokenManager;
use crate::client::{ApiClient, is_unauthorized};
use crate::endpoint::Connection;
use crate::error::SyncResult;
use crate::fetch::{paths, require_orchestrator};

/// Operations on a published catalog manifest version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManifestPatch {
    /// Mark the version tainted.
    Taint,
    /// Clear the taint.
    Untaint,
    /// Revoke the version.
    Revoke,
    /// Replace the required roles.
    Roles(Vec<String>),
    /// Replace the required claims.
    Claims(Vec<String>),
    /// Replace the tags.
    Tags(Vec<String>),
}

impl ManifestPatch {
    /// Last path segment of the patch request.
    #[must_use]
    pub const fn operation(&self) -> &'static str {
        match self {
            Self::Taint => "taint",
            Self::Untaint => "untaint",
            Self::Revoke => "revoke",
            Self::Roles(_) => "roles",
            Self::Claims(_) => "claims",
            Self::Tags(_) => "tags",
        }
    }

    fn body(&self) -> Option<&[String]> {
        match self {
            Self::Taint | Self::Untaint | Self::Revoke => None,
            Self::Roles(values) | Self::Claims(values) | Self::Tags(values) => Some(values),
        }
    }
}

/// Identifies one manifest version in a catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestRef {
    /// Catalog id.
    pub catalog_id: String,
    /// Version label.
    pub version: String,
    /// CPU architecture.
    pub architecture: String,
}

impl ManifestRef {
    /// Create a reference.
    #[must_use]
    pub fn new(
        catalog_id: impl Into<String>,
        version: impl Into<String>,
        architecture: impl Into<String>,
    ) -> Self {
        Self {
            catalog_id: catalog_id.into(),
            version: version.into(),
            architecture: architecture.into(),
        }
    }

    fn path(&self, patch: &ManifestPatch) -> String {
        format!(
            "{}/{}/{}/{}/{}",
            paths::CATALOG,
            self.catalog_id,
            self.version,
            self.architecture,
            patch.operation()
        )
    }
}

#[derive(Debug, Serialize)]
struct NameRequest<'a> {
    name: &'a str,
}

/// Sends administrative mutations.
#[derive(Debug, Clone)]
pub struct AdminClient {
    client: ApiClient,
    tokens: TokenManager,
}

impl AdminClient {
    /// Create an admin client.
    #[must_use]
    pub fn new(client: ApiClient, tokens: TokenManager) -> Self {
        Self { client, tokens }
    }

    // ==================== Users ====================

    /// Create a user.
    pub async fn create_user(
        &self,
        connection: &Connection,
        user: &UserRequest,
    ) -> SyncResult<User> {
        self.send(connection, Method::POST, paths::USERS, Some(user), "users")
            .await
    }

    /// Update a user.
    pub async fn update_user(
        &self,
        connection: &Connection,
        user_id: &str,
        user: &UserRequest,
    ) -> SyncResult<User> {
        let path = format!("{}/{user_id}", paths::USERS);
        self.send(connection, Method::PUT, &path, Some(user), "users")
            .await
    }

    /// Delete a user.
    pub async fn delete_user(&self, connection: &Connection, user_id: &str) -> SyncResult<()> {
        let path = format!("{}/{user_id}", paths::USERS);
        self.send_empty(connection, Method::DELETE, &path, None::<&()>, "users")
            .await
    }

    // ==================== Roles & Claims ====================

    /// Create a role.
    pub async fn create_role(&self, connection: &Connection, name: &str) -> SyncResult<Role> {
        self.send(
            connection,
            Method::POST,
            paths::ROLES,
            Some(&NameRequest { name }),
            "roles",
        )
        .await
    }

    /// Delete a role.
    pub async fn delete_role(&self, connection: &Connection, role_id: &str) -> SyncResult<()> {
        let path = format!("{}/{role_id}", paths::ROLES);
        self.send_empty(connection, Method::DELETE, &path, None::<&()>, "roles")
            .await
    }

    /// Create a claim.
    pub async fn create_claim(&self, connection: &Connection, name: &str) -> SyncResult<Claim> {
        self.send(
            connection,
            Method::POST,
            paths::CLAIMS,
            Some(&NameRequest { name }),
            "claims",
        )
        .await
    }

    /// Delete a claim.
    pub async fn delete_claim(&self, connection: &Connection, claim_id: &str) -> SyncResult<()> {
        let path = format!("{}/{claim_id}", paths::CLAIMS);
        self.send_empty(connection, Method::DELETE, &path, None::<&()>, "claims")
            .await
    }

    // ==================== Orchestrator hosts ====================

    /// Add a host to an orchestrator.
    pub async fn add_host(
        &self,
        connection: &Connection,
        kind: RemoteKind,
        host: &HostRequest,
    ) -> SyncResult<OrchestratorHost> {
        require_orchestrator(connection, kind, "add_host")?;
        self.send(
            connection,
            Method::POST,
            paths::ORCHESTRATOR_HOSTS,
            Some(host),
            "hosts",
        )
        .await
    }

    /// Update an orchestrator host.
    pub async fn update_host(
        &self,
        connection: &Connection,
        kind: RemoteKind,
        host_id: &str,
        host: &HostRequest,
    ) -> SyncResult<OrchestratorHost> {
        require_orchestrator(connection, kind, "update_host")?;
        let path = paths::orchestrator_host(host_id);
        self.send(connection, Method::PUT, &path, Some(host), "hosts")
            .await
    }

    /// Remove a host from an orchestrator.
    pub async fn delete_host(
        &self,
        connection: &Connection,
        kind: RemoteKind,
        host_id: &str,
    ) -> SyncResult<()> {
        require_orchestrator(connection, kind, "delete_host")?;
        let path = paths::orchestrator_host(host_id);
        self.send_empty(connection, Method::DELETE, &path, None::<&()>, "hosts")
            .await
    }

    // ==================== Catalog ====================

    /// Patch a catalog manifest version.
    pub async fn patch_manifest(
        &self,
        connection: &Connection,
        manifest: &ManifestRef,
        patch: &ManifestPatch,
    ) -> SyncResult<()> {
        let path = manifest.path(patch);
        self.send_empty(connection, Method::PATCH, &path, patch.body(), "manifests")
            .await?;
        info!(
            endpoint = %connection.id(),
            catalog_id = %manifest.catalog_id,
            operation = patch.operation(),
            "manifest patched"
        );
        Ok(())
    }

    async fn send<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        connection: &Connection,
        method: Method,
        path: &str,
        body: Option<&B>,
        resource: &'static str,
    ) -> SyncResult<T> {
        let session = self.tokens.authorize(connection).await?;
        let result = self
            .client
            .send(connection, &session, method, path, body, resource)
            .await;
        self.invalidate_on_401(connection, result).await
    }

    async fn send_empty<B: Serialize + ?Sized>(
        &self,
        connection: &Connection,
        method: Method,
        path: &str,
        body: Option<&B>,
        resource: &'static str,
    ) -> SyncResult<()> {
        let session = self.tokens.authorize(connection).await?;
        let result = self
            .client
            .send_empty(connection, &session, method, path, body, resource)
            .await;
        self.invalidate_on_401(connection, result).await
    }

    async fn invalidate_on_401<T>(
        &self,
        connection: &Connection,
        result: SyncResult<T>,
    ) -> SyncResult<T> {
        if let Err(ref e) = result {
            if is_unauthorized(e) {
                self.tokens.invalidate(connection).await;
            }
        }
        result
    }
}
