//! Resource fetchers.
//!
//! Each fetcher authorizes (reusing the cached token when possible), issues
//! exactly one request and returns the decoded collection. Nothing here
//! retries; a failure is reported to the caller and the resource is tried
//! again on the next tick.

use std::collections::BTreeMap;
use std::fmt;

use devops_model::{
    CacheEntry, CacheListing, CatalogManifest, Claim, HardwareInfo, ManifestVersion,
    OrchestratorHost, ProxyRoute, RemoteKind, ResourcePool, ReverseProxyConfig, Role, User,
    VirtualMachine,
};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::auth::TokenManager;
use crate::client::{ApiClient, is_unauthorized};
use crate::endpoint::Connection;
use crate::error::{SyncError, SyncResult};

/// API paths of the fetched resources.
pub mod paths {
    /// Catalog manifests.
    pub const CATALOG: &str = "/api/v1/catalog";
    /// Local image cache.
    pub const CATALOG_CACHE: &str = "/api/v1/catalog/cache";
    /// Users.
    pub const USERS: &str = "/api/v1/auth/users";
    /// Roles.
    pub const ROLES: &str = "/api/v1/auth/roles";
    /// Claims.
    pub const CLAIMS: &str = "/api/v1/auth/claims";
    /// Hardware summary.
    pub const HARDWARE: &str = "/api/v1/config/hardware";
    /// VMs on a single host.
    pub const MACHINES: &str = "/api/v1/machines";
    /// VMs across an orchestrator.
    pub const ORCHESTRATOR_MACHINES: &str = "/api/v1/orchestrator/machines";
    /// Orchestrator hosts.
    pub const ORCHESTRATOR_HOSTS: &str = "/api/v1/orchestrator/hosts";
    /// Orchestrator resource pools.
    pub const ORCHESTRATOR_RESOURCES: &str = "/api/v1/orchestrator/overview/resources";
    /// Reverse proxy settings.
    pub const REVERSE_PROXY: &str = "/api/v1/reverse-proxy";
    /// Reverse proxy routes.
    pub const REVERSE_PROXY_HOSTS: &str = "/api/v1/reverse-proxy/hosts";

    /// Path of one orchestrator host.
    #[must_use]
    pub fn orchestrator_host(host_id: &str) -> String {
        format!("{ORCHESTRATOR_HOSTS}/{host_id}")
    }

    /// Image cache of one orchestrator host.
    #[must_use]
    pub fn host_cache(host_id: &str) -> String {
        format!("{ORCHESTRATOR_HOSTS}/{host_id}/catalog/cache")
    }

    /// Reverse proxy routes of one orchestrator host.
    #[must_use]
    pub fn host_proxy_routes(host_id: &str) -> String {
        format!("{ORCHESTRATOR_HOSTS}/{host_id}/reverse-proxy/hosts")
    }
}

/// The sub-resources kept in an endpoint snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    /// Catalog manifests.
    Manifests,
    /// Users.
    Users,
    /// Roles.
    Roles,
    /// Claims.
    Claims,
    /// Hardware summary.
    HardwareInfo,
    /// Virtual machines.
    VirtualMachines,
    /// Orchestrator hosts.
    Hosts,
    /// Resource pools.
    ResourcePools,
    /// Image cache entries.
    CacheEntries,
    /// Reverse proxy settings.
    ReverseProxyConfig,
    /// Reverse proxy routes.
    ReverseProxyRoutes,
}

impl ResourceKind {
    /// Name used in logs and errors.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Manifests => "manifests",
            Self::Users => "users",
            Self::Roles => "roles",
            Self::Claims => "claims",
            Self::HardwareInfo => "hardware_info",
            Self::VirtualMachines => "virtual_machines",
            Self::Hosts => "hosts",
            Self::ResourcePools => "resource_pools",
            Self::CacheEntries => "cache_entries",
            Self::ReverseProxyConfig => "reverse_proxy_config",
            Self::ReverseProxyRoutes => "reverse_proxy_routes",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fetches endpoint sub-resources.
#[derive(Debug, Clone)]
pub struct Fetcher {
    client: ApiClient,
    tokens: TokenManager,
}

impl Fetcher {
    /// Create a fetcher.
    #[must_use]
    pub fn new(client: ApiClient, tokens: TokenManager) -> Self {
        Self { client, tokens }
    }

    /// Catalog manifests, grouped by catalog id.
    pub async fn manifests(&self, connection: &Connection) -> SyncResult<Vec<CatalogManifest>> {
        let map: BTreeMap<String, Vec<ManifestVersion>> = self
            .get(connection, paths::CATALOG, ResourceKind::Manifests)
            .await?;
        Ok(CatalogManifest::from_catalog_map(map))
    }

    /// Users.
    pub async fn users(&self, connection: &Connection) -> SyncResult<Vec<User>> {
        self.get(connection, paths::USERS, ResourceKind::Users).await
    }

    /// Roles.
    pub async fn roles(&self, connection: &Connection) -> SyncResult<Vec<Role>> {
        self.get(connection, paths::ROLES, ResourceKind::Roles).await
    }

    /// Claims.
    pub async fn claims(&self, connection: &Connection) -> SyncResult<Vec<Claim>> {
        self.get(connection, paths::CLAIMS, ResourceKind::Claims).await
    }

    /// Hardware summary.
    pub async fn hardware_info(&self, connection: &Connection) -> SyncResult<HardwareInfo> {
        self.get(connection, paths::HARDWARE, ResourceKind::HardwareInfo)
            .await
    }

    /// Virtual machines; orchestrators list across all their hosts.
    pub async fn virtual_machines(
        &self,
        connection: &Connection,
        kind: RemoteKind,
    ) -> SyncResult<Vec<VirtualMachine>> {
        let path = match kind {
            RemoteKind::SingleHost => paths::MACHINES,
            RemoteKind::Orchestrator => paths::ORCHESTRATOR_MACHINES,
        };
        self.get(connection, path, ResourceKind::VirtualMachines)
            .await
    }

    /// Hosts managed by an orchestrator.
    pub async fn orchestrator_hosts(
        &self,
        connection: &Connection,
        kind: RemoteKind,
    ) -> SyncResult<Vec<OrchestratorHost>> {
        require_orchestrator(connection, kind, "orchestrator_hosts")?;
        self.get(connection, paths::ORCHESTRATOR_HOSTS, ResourceKind::Hosts)
            .await
    }

    /// Resource pools of an orchestrator.
    pub async fn resource_pools(
        &self,
        connection: &Connection,
        kind: RemoteKind,
    ) -> SyncResult<Vec<ResourcePool>> {
        require_orchestrator(connection, kind, "resource_pools")?;
        self.get(
            connection,
            paths::ORCHESTRATOR_RESOURCES,
            ResourceKind::ResourcePools,
        )
        .await
    }

    /// The endpoint's own image cache.
    pub async fn cache_entries(&self, connection: &Connection) -> SyncResult<Vec<CacheEntry>> {
        let listing: CacheListing = self
            .get(connection, paths::CATALOG_CACHE, ResourceKind::CacheEntries)
            .await?;
        Ok(listing.manifests)
    }

    /// Image cache of one orchestrator host, stamped with its host id.
    pub async fn host_cache_entries(
        &self,
        connection: &Connection,
        kind: RemoteKind,
        host_id: &str,
    ) -> SyncResult<Vec<CacheEntry>> {
        require_orchestrator(connection, kind, "host_cache_entries")?;
        let listing: CacheListing = self
            .get(
                connection,
                &paths::host_cache(host_id),
                ResourceKind::CacheEntries,
            )
            .await?;
        Ok(listing
            .manifests
            .into_iter()
            .map(|entry| entry.with_host_id(host_id))
            .collect())
    }

    /// Reverse proxy settings of a single host.
    pub async fn reverse_proxy_config(
        &self,
        connection: &Connection,
    ) -> SyncResult<ReverseProxyConfig> {
        self.get(
            connection,
            paths::REVERSE_PROXY,
            ResourceKind::ReverseProxyConfig,
        )
        .await
    }

    /// Reverse proxy routes of a single host.
    pub async fn proxy_routes(&self, connection: &Connection) -> SyncResult<Vec<ProxyRoute>> {
        self.get(
            connection,
            paths::REVERSE_PROXY_HOSTS,
            ResourceKind::ReverseProxyRoutes,
        )
        .await
    }

    /// Reverse proxy routes of one orchestrator host, stamped with its host id.
    pub async fn host_proxy_routes(
        &self,
        connection: &Connection,
        kind: RemoteKind,
        host_id: &str,
    ) -> SyncResult<Vec<ProxyRoute>> {
        require_orchestrator(connection, kind, "host_proxy_routes")?;
        let routes: Vec<ProxyRoute> = self
            .get(
                connection,
                &paths::host_proxy_routes(host_id),
                ResourceKind::ReverseProxyRoutes,
            )
            .await?;
        Ok(routes
            .into_iter()
            .map(|route| route.with_host_id(host_id))
            .collect())
    }

    async fn get<T: DeserializeOwned>(
        &self,
        connection: &Connection,
        path: &str,
        kind: ResourceKind,
    ) -> SyncResult<T> {
        let session = self.tokens.authorize(connection).await?;
        let result = self
            .client
            .get(connection, &session, path, kind.as_str())
            .await;
        if let Err(ref e) = result {
            if is_unauthorized(e) {
                self.tokens.invalidate(connection).await;
            }
        }
        result
    }
}

/// Fail fast unless the endpoint is an orchestrator.
pub(crate) fn require_orchestrator(
    connection: &Connection,
    kind: RemoteKind,
    operation: &'static str,
) -> SyncResult<()> {
    if kind.is_orchestrator() {
        Ok(())
    } else {
        Err(SyncError::UnsupportedOperation {
            endpoint: connection.id().clone(),
            operation,
        })
    }
}
