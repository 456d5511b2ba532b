//! Registry of the endpoints being kept in sync.

use std::collections::BTreeMap;
use std::sync::Arc;

use devops_model::EndpointId;
use parking_lot::RwLock;

use crate::endpoint::{CatalogEndpoint, Endpoint, RemoteEndpoint};
use crate::error::{SyncError, SyncResult};

/// Thread-safe map of registered endpoints.
///
/// Ids are unique across both groups. Iteration is ordered by id so ticks
/// visit endpoints deterministically.
#[derive(Debug, Default)]
pub struct EndpointRegistry {
    endpoints: RwLock<BTreeMap<EndpointId, Endpoint>>,
}

impl EndpointRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::AlreadyRegistered`] if the id is taken.
    pub fn insert(&self, endpoint: Endpoint) -> SyncResult<()> {
        let mut endpoints = self.endpoints.write();
        let id = endpoint.id().clone();
        if endpoints.contains_key(&id) {
            return Err(SyncError::AlreadyRegistered(id));
        }
        endpoints.insert(id, endpoint);
        Ok(())
    }

    /// Remove an endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::NotFound`] if the id is unknown.
    pub fn remove(&self, id: &EndpointId) -> SyncResult<Endpoint> {
        self.endpoints
            .write()
            .remove(id)
            .ok_or_else(|| SyncError::NotFound(id.clone()))
    }

    /// Look up an endpoint.
    #[must_use]
    pub fn get(&self, id: &EndpointId) -> Option<Endpoint> {
        self.endpoints.read().get(id).cloned()
    }

    /// Whether an id is registered.
    #[must_use]
    pub fn contains(&self, id: &EndpointId) -> bool {
        self.endpoints.read().contains_key(id)
    }

    /// All catalog endpoints.
    #[must_use]
    pub fn catalog_endpoints(&self) -> Vec<Arc<CatalogEndpoint>> {
        self.endpoints
            .read()
            .values()
            .filter_map(|endpoint| match endpoint {
                Endpoint::Catalog(catalog) => Some(Arc::clone(catalog)),
                Endpoint::Remote(_) => None,
            })
            .collect()
    }

    /// All remote endpoints, enabled or not.
    #[must_use]
    pub fn remote_endpoints(&self) -> Vec<Arc<RemoteEndpoint>> {
        self.endpoints
            .read()
            .values()
            .filter_map(|endpoint| match endpoint {
                Endpoint::Remote(remote) => Some(Arc::clone(remote)),
                Endpoint::Catalog(_) => None,
            })
            .collect()
    }

    /// All endpoints.
    #[must_use]
    pub fn list(&self) -> Vec<Endpoint> {
        self.endpoints.read().values().cloned().collect()
    }

    /// Number of registered endpoints.
    #[must_use]
    pub fn len(&self) -> usize {
        self.endpoints.read().len()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.endpoints.read().is_empty()
    }
}
