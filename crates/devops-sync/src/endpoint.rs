//! Registered endpoints and their cached snapshots.
//!
//! An [`Endpoint`] is either a catalog server or a remote host/orchestrator.
//! Both carry a [`Connection`] (address, credentials, cached bearer token)
//! and a snapshot of the sub-resources last fetched from the server. The
//! snapshot sits behind a `parking_lot` mutex that is only ever held for the
//! short, synchronous diff/apply step, never across a network call.

use std::sync::Arc;

use devops_model::{
    CacheEntry, CatalogManifest, Claim, Credentials, EndpointAddress, EndpointGroup, EndpointId,
    EndpointState, HardwareInfo, OrchestratorHost, ProxyRoute, RemoteKind, ResourcePool,
    ReverseProxyConfig, Role, User, VirtualMachine,
};
use parking_lot::{Mutex, MutexGuard};
use serde::Serialize;

use crate::auth::Principal;
use crate::events::StateTransition;

/// Address, credentials and token slot of an endpoint.
pub struct Connection {
    id: EndpointId,
    name: String,
    address: EndpointAddress,
    credentials: Credentials,
    /// Cached bearer token. Held across the login request so that at most
    /// one login per endpoint is in flight.
    token: tokio::sync::Mutex<Option<String>>,
    principal: Mutex<Option<Principal>>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("address", &self.address)
            .field("credentials", &self.credentials)
            .finish_non_exhaustive()
    }
}

impl Connection {
    /// Create a connection with no cached token.
    #[must_use]
    pub fn new(
        id: EndpointId,
        name: impl Into<String>,
        address: EndpointAddress,
        credentials: Credentials,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            address,
            credentials,
            token: tokio::sync::Mutex::new(None),
            principal: Mutex::new(None),
        }
    }

    /// Seed the token slot, e.g. with a token restored from settings.
    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = tokio::sync::Mutex::new(Some(token.into()));
        self
    }

    /// Endpoint id.
    #[must_use]
    pub fn id(&self) -> &EndpointId {
        &self.id
    }

    /// Display name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Network address.
    #[must_use]
    pub fn address(&self) -> &EndpointAddress {
        &self.address
    }

    /// Login credentials.
    #[must_use]
    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    /// The principal decoded from the current token, if any.
    #[must_use]
    pub fn principal(&self) -> Option<Principal> {
        self.principal.lock().clone()
    }

    pub(crate) fn token_slot(&self) -> &tokio::sync::Mutex<Option<String>> {
        &self.token
    }

    pub(crate) fn set_principal(&self, principal: Option<Principal>) {
        *self.principal.lock() = principal;
    }
}

/// Move `state` after a health probe and report a transition worth
/// signalling: into `active` from anything else, or out of `active`.
/// A `disabled` state is left untouched.
fn record_probe(
    id: &EndpointId,
    state: &mut EndpointState,
    healthy: bool,
) -> Option<StateTransition> {
    let from = *state;
    if from == EndpointState::Disabled {
        return None;
    }
    let to = if healthy {
        EndpointState::Active
    } else {
        EndpointState::Inactive
    };
    *state = to;

    let signal = if healthy {
        from != EndpointState::Active
    } else {
        from == EndpointState::Active
    };
    signal.then(|| StateTransition {
        endpoint: id.clone(),
        from,
        to,
    })
}

/// Cached state of a catalog endpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CatalogModel {
    /// Last probe result.
    pub state: EndpointState,
    /// Catalog manifests grouped by catalog id.
    pub manifests: Vec<CatalogManifest>,
    /// User accounts.
    pub users: Vec<User>,
    /// Roles.
    pub roles: Vec<Role>,
    /// Claims.
    pub claims: Vec<Claim>,
    /// Image cache entries.
    pub cache: Vec<CacheEntry>,
    /// Set when a sub-resource changed and the presentation layer has not
    /// been told yet.
    pub needs_tree_refresh: bool,
    /// Whether the model has completed an initial synchronization.
    #[serde(skip)]
    pub synced: bool,
}

/// A registered catalog server.
#[derive(Debug)]
pub struct CatalogEndpoint {
    connection: Connection,
    model: Mutex<CatalogModel>,
}

impl CatalogEndpoint {
    /// Create a catalog endpoint with an empty snapshot.
    #[must_use]
    pub fn new(connection: Connection) -> Self {
        Self {
            connection,
            model: Mutex::new(CatalogModel::default()),
        }
    }

    /// Create a catalog endpoint with a pre-populated snapshot.
    #[must_use]
    pub fn with_model(connection: Connection, model: CatalogModel) -> Self {
        Self {
            connection,
            model: Mutex::new(model),
        }
    }

    /// Connection details.
    #[must_use]
    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    /// Endpoint id.
    #[must_use]
    pub fn id(&self) -> &EndpointId {
        self.connection.id()
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> EndpointState {
        self.model.lock().state
    }

    /// A copy of the cached snapshot.
    #[must_use]
    pub fn snapshot(&self) -> CatalogModel {
        self.model.lock().clone()
    }

    pub(crate) fn lock_model(&self) -> MutexGuard<'_, CatalogModel> {
        self.model.lock()
    }

    pub(crate) fn record_probe(&self, healthy: bool) -> Option<StateTransition> {
        let mut model = self.model.lock();
        record_probe(self.connection.id(), &mut model.state, healthy)
    }
}

/// Reverse proxy configuration and routes of a remote endpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReverseProxyState {
    /// Proxy settings (single hosts only).
    pub config: Option<ReverseProxyConfig>,
    /// Routes, aggregated across hosts on an orchestrator.
    pub routes: Vec<ProxyRoute>,
}

/// Cached state of a remote host or orchestrator.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RemoteModel {
    /// Last probe result, or `disabled`.
    pub state: EndpointState,
    /// Virtual machines.
    pub virtual_machines: Vec<VirtualMachine>,
    /// User accounts.
    pub users: Vec<User>,
    /// Roles.
    pub roles: Vec<Role>,
    /// Claims.
    pub claims: Vec<Claim>,
    /// Hardware summary.
    pub hardware: Option<HardwareInfo>,
    /// Managed hosts (orchestrator only).
    pub hosts: Vec<OrchestratorHost>,
    /// Resource pools (orchestrator only).
    pub resources: Vec<ResourcePool>,
    /// Image cache entries, aggregated across hosts on an orchestrator.
    pub cache: Vec<CacheEntry>,
    /// Reverse proxy configuration.
    pub reverse_proxy: ReverseProxyState,
    /// Set when a sub-resource changed and the presentation layer has not
    /// been told yet.
    pub needs_tree_refresh: bool,
    #[serde(skip)]
    pub(crate) synced: bool,
}

/// A registered remote host or orchestrator.
#[derive(Debug)]
pub struct RemoteEndpoint {
    connection: Connection,
    kind: RemoteKind,
    model: Mutex<RemoteModel>,
}

impl RemoteEndpoint {
    /// Create a remote endpoint with an empty snapshot.
    #[must_use]
    pub fn new(connection: Connection, kind: RemoteKind) -> Self {
        Self {
            connection,
            kind,
            model: Mutex::new(RemoteModel::default()),
        }
    }

    /// Create a remote endpoint with a pre-populated snapshot.
    #[must_use]
    pub fn with_model(connection: Connection, kind: RemoteKind, model: RemoteModel) -> Self {
        Self {
            connection,
            kind,
            model: Mutex::new(model),
        }
    }

    /// Connection details.
    #[must_use]
    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    /// Endpoint id.
    #[must_use]
    pub fn id(&self) -> &EndpointId {
        self.connection.id()
    }

    /// Single host or orchestrator.
    #[must_use]
    pub fn kind(&self) -> RemoteKind {
        self.kind
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> EndpointState {
        self.model.lock().state
    }

    /// Whether the endpoint is switched on.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.state() != EndpointState::Disabled
    }

    /// A copy of the cached snapshot.
    #[must_use]
    pub fn snapshot(&self) -> RemoteModel {
        self.model.lock().clone()
    }

    /// Switch polling on or off. Re-enabling resets the state to `unknown`
    /// and forces a full sync on the next tick.
    pub fn set_enabled(&self, enabled: bool) {
        let mut model = self.model.lock();
        match (enabled, model.state) {
            (false, _) => model.state = EndpointState::Disabled,
            (true, EndpointState::Disabled) => {
                model.state = EndpointState::Unknown;
                model.synced = false;
            }
            (true, _) => {}
        }
    }

    pub(crate) fn lock_model(&self) -> MutexGuard<'_, RemoteModel> {
        self.model.lock()
    }

    pub(crate) fn record_probe(&self, healthy: bool) -> Option<StateTransition> {
        let mut model = self.model.lock();
        record_probe(self.connection.id(), &mut model.state, healthy)
    }
}

/// A registered endpoint of either kind.
#[derive(Debug, Clone)]
pub enum Endpoint {
    /// Catalog server.
    Catalog(Arc<CatalogEndpoint>),
    /// Remote host or orchestrator.
    Remote(Arc<RemoteEndpoint>),
}

impl Endpoint {
    /// Connection details.
    #[must_use]
    pub fn connection(&self) -> &Connection {
        match self {
            Self::Catalog(endpoint) => endpoint.connection(),
            Self::Remote(endpoint) => endpoint.connection(),
        }
    }

    /// Endpoint id.
    #[must_use]
    pub fn id(&self) -> &EndpointId {
        self.connection().id()
    }

    /// Which refresh group the endpoint belongs to.
    #[must_use]
    pub fn group(&self) -> EndpointGroup {
        match self {
            Self::Catalog(_) => EndpointGroup::Catalog,
            Self::Remote(_) => EndpointGroup::Remote,
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> EndpointState {
        match self {
            Self::Catalog(endpoint) => endpoint.state(),
            Self::Remote(endpoint) => endpoint.state(),
        }
    }

    /// Mark the endpoint active after a successful registration probe.
    pub(crate) fn mark_registered(&self) {
        match self {
            Self::Catalog(endpoint) => {
                let mut model = endpoint.lock_model();
                model.state = EndpointState::Active;
                model.synced = false;
            }
            Self::Remote(endpoint) => {
                let mut model = endpoint.lock_model();
                model.state = EndpointState::Active;
                model.synced = false;
            }
        }
    }

    /// Clear the dirty flag once the presentation layer has been notified.
    pub(crate) fn clear_dirty(&self) {
        match self {
            Self::Catalog(endpoint) => endpoint.lock_model().needs_tree_refresh = false,
            Self::Remote(endpoint) => endpoint.lock_model().needs_tree_refresh = false,
        }
    }

    /// Whether the dirty flag is set.
    #[must_use]
    pub fn needs_tree_refresh(&self) -> bool {
        match self {
            Self::Catalog(endpoint) => endpoint.lock_model().needs_tree_refresh,
            Self::Remote(endpoint) => endpoint.lock_model().needs_tree_refresh,
        }
    }
}

impl From<CatalogEndpoint> for Endpoint {
    fn from(endpoint: CatalogEndpoint) -> Self {
        Self::Catalog(Arc::new(endpoint))
    }
}

impl From<RemoteEndpoint> for Endpoint {
    fn from(endpoint: RemoteEndpoint) -> Self {
        Self::Remote(Arc::new(endpoint))
    }
}
