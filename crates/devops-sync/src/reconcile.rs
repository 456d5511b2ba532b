//! One refresh tick: probe, fetch, diff, apply, signal.
//!
//! Each endpoint is probed first; an endpoint that fails the probe keeps its
//! previous snapshot and is only reported through its state transition.
//! Fetches for a healthy endpoint run concurrently and their results are
//! collected before the snapshot lock is taken; the per-tick "changed"
//! verdict is computed from complete results.

use std::hash::Hash;
use std::sync::Arc;

use devops_model::{
    CacheEntry, CatalogManifest, Claim, EndpointGroup, EndpointId, EndpointState, OrchestratorHost,
    ProxyRoute, RemoteKind, ResourcePool, Role, User, VirtualMachine,
};
use futures::future::join_all;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::broadcast;
use tracing::{debug, info, instrument, warn};

use crate::diff::{collection_differs, value_differs};
use crate::endpoint::{CatalogEndpoint, Connection, Endpoint, RemoteEndpoint};
use crate::error::{SyncError, SyncResult};
use crate::events::{ModelChanged, StateTransition};
use crate::fetch::{Fetcher, ResourceKind};
use crate::health::HealthProber;
use crate::merge::merge;
use crate::registry::EndpointRegistry;

/// What happened to one endpoint during a tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointOutcome {
    /// The endpoint.
    pub endpoint: EndpointId,
    /// Probe-driven transition worth signalling.
    pub transition: Option<StateTransition>,
    /// Whether any sub-resource snapshot changed.
    pub changed: bool,
    /// Number of failed fetches.
    pub failures: usize,
    /// Whether the fetch cycle ran (probe succeeded).
    pub fetched: bool,
}

impl EndpointOutcome {
    fn probed(endpoint: EndpointId, transition: Option<StateTransition>) -> Self {
        Self {
            endpoint,
            transition,
            changed: false,
            failures: 0,
            fetched: false,
        }
    }
}

/// Summary of a completed tick for one group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupReport {
    /// The refreshed group.
    pub group: EndpointGroup,
    /// Per-endpoint results, ordered by endpoint id.
    pub outcomes: Vec<EndpointOutcome>,
    /// The signal published for this tick, if any.
    pub signal: Option<ModelChanged>,
}

impl GroupReport {
    /// Total fetch failures across the group.
    #[must_use]
    pub fn failures(&self) -> usize {
        self.outcomes.iter().map(|o| o.failures).sum()
    }
}

/// Applies fetch results to one snapshot and keeps the tally.
struct Applier<'a> {
    endpoint: &'a EndpointId,
    force: bool,
    changed: bool,
    applied: usize,
    failures: usize,
}

impl<'a> Applier<'a> {
    fn new(endpoint: &'a EndpointId, force: bool) -> Self {
        Self {
            endpoint,
            force,
            changed: false,
            applied: 0,
            failures: 0,
        }
    }

    fn failed(&mut self, kind: ResourceKind, error: &SyncError) {
        self.failures += 1;
        warn!(endpoint = %self.endpoint, resource = %kind, error = %error, "fetch failed");
    }

    /// Replace a collection when it differs from the fetched one.
    fn replace<T, K, F>(
        &mut self,
        kind: ResourceKind,
        slot: &mut Vec<T>,
        fetched: SyncResult<Vec<T>>,
        key: F,
    ) where
        T: PartialEq,
        K: Ord,
        F: Fn(&T) -> K,
    {
        match fetched {
            Ok(fresh) => {
                self.applied += 1;
                if collection_differs(slot, &fresh, key, self.force) {
                    debug!(endpoint = %self.endpoint, resource = %kind, "changed");
                    *slot = fresh;
                    self.changed = true;
                }
            }
            Err(e) => self.failed(kind, &e),
        }
    }

    /// Replace a single value when it differs from the fetched one.
    fn replace_value<T: PartialEq>(
        &mut self,
        kind: ResourceKind,
        slot: &mut Option<T>,
        fetched: SyncResult<T>,
    ) {
        match fetched {
            Ok(fresh) => {
                self.applied += 1;
                let fresh = Some(fresh);
                if value_differs(&*slot, &fresh, self.force) {
                    debug!(endpoint = %self.endpoint, resource = %kind, "changed");
                    *slot = fresh;
                    self.changed = true;
                }
            }
            Err(e) => self.failed(kind, &e),
        }
    }

    /// Merge an aggregate collection by composite key.
    fn merge<T, K, F>(
        &mut self,
        kind: ResourceKind,
        slot: &mut Vec<T>,
        fetched: SyncResult<Vec<T>>,
        key: F,
    ) where
        T: PartialEq + Serialize + DeserializeOwned,
        K: Ord + Hash + Eq,
        F: Fn(&T) -> K,
    {
        match fetched {
            Ok(incoming) => {
                self.applied += 1;
                let merged = merge(slot, incoming, &key);
                if collection_differs(slot, &merged, &key, self.force) {
                    debug!(endpoint = %self.endpoint, resource = %kind, "merged");
                    *slot = merged;
                    self.changed = true;
                }
            }
            Err(e) => self.failed(kind, &e),
        }
    }
}

/// Runs refresh ticks over the registered endpoints.
#[derive(Debug, Clone)]
pub struct Synchronizer {
    registry: Arc<EndpointRegistry>,
    prober: HealthProber,
    fetcher: Fetcher,
    events: broadcast::Sender<ModelChanged>,
}

impl Synchronizer {
    /// Create a synchronizer publishing to `events`.
    #[must_use]
    pub fn new(
        registry: Arc<EndpointRegistry>,
        prober: HealthProber,
        fetcher: Fetcher,
        events: broadcast::Sender<ModelChanged>,
    ) -> Self {
        Self {
            registry,
            prober,
            fetcher,
            events,
        }
    }

    /// The endpoint registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<EndpointRegistry> {
        &self.registry
    }

    /// Subscribe to change signals.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ModelChanged> {
        self.events.subscribe()
    }

    /// Refresh every endpoint of a group and publish at most one signal.
    #[instrument(skip(self))]
    pub async fn refresh_group(&self, group: EndpointGroup) -> GroupReport {
        let results: Vec<(Endpoint, EndpointOutcome)> = match group {
            EndpointGroup::Catalog => {
                let endpoints = self.registry.catalog_endpoints();
                let outcomes =
                    join_all(endpoints.iter().map(|endpoint| self.sync_catalog(endpoint))).await;
                endpoints
                    .into_iter()
                    .map(Endpoint::Catalog)
                    .zip(outcomes)
                    .collect()
            }
            EndpointGroup::Remote => {
                let endpoints: Vec<Arc<RemoteEndpoint>> = self
                    .registry
                    .remote_endpoints()
                    .into_iter()
                    .filter(|endpoint| endpoint.is_enabled())
                    .collect();
                let outcomes =
                    join_all(endpoints.iter().map(|endpoint| self.sync_remote(endpoint))).await;
                endpoints
                    .into_iter()
                    .map(Endpoint::Remote)
                    .zip(outcomes)
                    .collect()
            }
        };

        let mut signal = ModelChanged::new(group);
        for (endpoint, outcome) in &results {
            if outcome.changed {
                signal.changed.push(endpoint.id().clone());
            }
            if let Some(transition) = &outcome.transition {
                signal.transitions.push(transition.clone());
            }
        }

        let signal = if signal.is_empty() {
            None
        } else {
            info!(
                changed = signal.changed.len(),
                transitions = signal.transitions.len(),
                "model changed"
            );
            if self.events.send(signal.clone()).is_err() {
                debug!("no subscribers for model change signal");
            }
            for (endpoint, outcome) in &results {
                if outcome.changed {
                    endpoint.clear_dirty();
                }
            }
            Some(signal)
        };

        GroupReport {
            group,
            outcomes: results.into_iter().map(|(_, outcome)| outcome).collect(),
            signal,
        }
    }

    /// Probe and refresh one catalog endpoint.
    ///
    /// Leaves the dirty flag set when something changed; clearing it is the
    /// job of [`Synchronizer::refresh_group`] once the signal is published.
    #[instrument(skip(self, endpoint), fields(endpoint = %endpoint.id()))]
    pub async fn sync_catalog(&self, endpoint: &CatalogEndpoint) -> EndpointOutcome {
        let connection = endpoint.connection();
        let probe = self.prober.probe(connection).await;
        let transition = endpoint.record_probe(probe.is_ok());
        log_transition(transition.as_ref());
        if let Err(e) = probe {
            debug!(error = %e, "probe failed, skipping fetches");
            return EndpointOutcome::probed(endpoint.id().clone(), transition);
        }

        let fetcher = &self.fetcher;
        let (manifests, users, roles, claims, cache) = tokio::join!(
            fetcher.manifests(connection),
            fetcher.users(connection),
            fetcher.roles(connection),
            fetcher.claims(connection),
            fetcher.cache_entries(connection),
        );

        let mut model = endpoint.lock_model();
        let mut applier = Applier::new(endpoint.id(), !model.synced);
        applier.replace(
            ResourceKind::Manifests,
            &mut model.manifests,
            manifests,
            |m: &CatalogManifest| m.name.clone(),
        );
        applier.replace(ResourceKind::Users, &mut model.users, users, |u: &User| u.id.clone());
        applier.replace(ResourceKind::Roles, &mut model.roles, roles, |r: &Role| r.name.clone());
        applier.replace(ResourceKind::Claims, &mut model.claims, claims, |c: &Claim| {
            c.name.clone()
        });
        applier.merge(ResourceKind::CacheEntries, &mut model.cache, cache, CacheEntry::key);

        // The forced first sync stays pending until some fetch lands.
        if applier.applied > 0 {
            model.synced = true;
        }
        if applier.changed {
            model.needs_tree_refresh = true;
        }

        EndpointOutcome {
            endpoint: endpoint.id().clone(),
            transition,
            changed: applier.changed,
            failures: applier.failures,
            fetched: true,
        }
    }

    /// Probe and refresh one remote endpoint.
    ///
    /// Orchestrators are refreshed in two phases: the host list first, then
    /// the per-host cache and proxy routes for those hosts. If the host list
    /// cannot be fetched the previously known hosts are used.
    #[instrument(skip(self, endpoint), fields(endpoint = %endpoint.id(), kind = %endpoint.kind()))]
    pub async fn sync_remote(&self, endpoint: &RemoteEndpoint) -> EndpointOutcome {
        if !endpoint.is_enabled() {
            return EndpointOutcome::probed(endpoint.id().clone(), None);
        }

        let connection = endpoint.connection();
        let kind = endpoint.kind();
        let probe = self.prober.probe(connection).await;
        let transition = endpoint.record_probe(probe.is_ok());
        log_transition(transition.as_ref());
        if !endpoint.is_enabled() {
            debug!("disabled during probe, skipping fetches");
            return EndpointOutcome::probed(endpoint.id().clone(), None);
        }
        if let Err(e) = probe {
            debug!(error = %e, "probe failed, skipping fetches");
            return EndpointOutcome::probed(endpoint.id().clone(), transition);
        }

        let fetcher = &self.fetcher;
        let orchestrator = kind.is_orchestrator();
        let (vms, users, roles, claims, hardware, hosts, pools) = tokio::join!(
            fetcher.virtual_machines(connection, kind),
            fetcher.users(connection),
            fetcher.roles(connection),
            fetcher.claims(connection),
            fetcher.hardware_info(connection),
            async {
                if orchestrator {
                    Some(fetcher.orchestrator_hosts(connection, kind).await)
                } else {
                    None
                }
            },
            async {
                if orchestrator {
                    Some(fetcher.resource_pools(connection, kind).await)
                } else {
                    None
                }
            },
        );

        let (cache, proxy_config, routes) = if orchestrator {
            let host_ids = match &hosts {
                Some(Ok(hosts)) => hosts.iter().map(|h| h.id.clone()).collect(),
                _ => cached_host_ids(endpoint),
            };
            let (cache, routes) = tokio::join!(
                self.gather_host_cache(connection, kind, &host_ids),
                self.gather_host_routes(connection, kind, &host_ids),
            );
            (cache, None, routes)
        } else {
            let (cache, config, routes) = tokio::join!(
                fetcher.cache_entries(connection),
                fetcher.reverse_proxy_config(connection),
                fetcher.proxy_routes(connection),
            );
            (cache, Some(config), routes)
        };

        let mut model = endpoint.lock_model();
        if model.state == EndpointState::Disabled {
            debug!("disabled during fetch, discarding results");
            return EndpointOutcome::probed(endpoint.id().clone(), transition);
        }
        let mut applier = Applier::new(endpoint.id(), !model.synced);
        applier.replace(
            ResourceKind::VirtualMachines,
            &mut model.virtual_machines,
            vms,
            |vm: &VirtualMachine| vm.id.clone(),
        );
        applier.replace(ResourceKind::Users, &mut model.users, users, |u: &User| u.id.clone());
        applier.replace(ResourceKind::Roles, &mut model.roles, roles, |r: &Role| r.name.clone());
        applier.replace(ResourceKind::Claims, &mut model.claims, claims, |c: &Claim| {
            c.name.clone()
        });
        applier.replace_value(ResourceKind::HardwareInfo, &mut model.hardware, hardware);
        if let Some(hosts) = hosts {
            applier.replace(
                ResourceKind::Hosts,
                &mut model.hosts,
                hosts,
                |h: &OrchestratorHost| h.id.clone(),
            );
        }
        if let Some(pools) = pools {
            applier.replace(
                ResourceKind::ResourcePools,
                &mut model.resources,
                pools,
                |p: &ResourcePool| p.cpu_type.clone(),
            );
        }
        applier.merge(ResourceKind::CacheEntries, &mut model.cache, cache, CacheEntry::key);
        if let Some(config) = proxy_config {
            applier.replace_value(
                ResourceKind::ReverseProxyConfig,
                &mut model.reverse_proxy.config,
                config,
            );
        }
        applier.merge(
            ResourceKind::ReverseProxyRoutes,
            &mut model.reverse_proxy.routes,
            routes,
            ProxyRoute::key,
        );

        // The forced first sync stays pending until some fetch lands.
        if applier.applied > 0 {
            model.synced = true;
        }
        if applier.changed {
            model.needs_tree_refresh = true;
        }

        EndpointOutcome {
            endpoint: endpoint.id().clone(),
            transition,
            changed: applier.changed,
            failures: applier.failures,
            fetched: true,
        }
    }

    /// Image cache of every host, merged as one incoming set.
    ///
    /// Fails as a whole if any host fails, so a partial listing never prunes
    /// the entries of the host that could not be reached.
    async fn gather_host_cache(
        &self,
        connection: &Connection,
        kind: RemoteKind,
        host_ids: &[String],
    ) -> SyncResult<Vec<CacheEntry>> {
        let results = join_all(
            host_ids
                .iter()
                .map(|id| self.fetcher.host_cache_entries(connection, kind, id)),
        )
        .await;
        flatten_all(results)
    }

    /// Reverse proxy routes of every host, merged as one incoming set.
    async fn gather_host_routes(
        &self,
        connection: &Connection,
        kind: RemoteKind,
        host_ids: &[String],
    ) -> SyncResult<Vec<ProxyRoute>> {
        let results = join_all(
            host_ids
                .iter()
                .map(|id| self.fetcher.host_proxy_routes(connection, kind, id)),
        )
        .await;
        flatten_all(results)
    }
}

fn cached_host_ids(endpoint: &RemoteEndpoint) -> Vec<String> {
    endpoint
        .lock_model()
        .hosts
        .iter()
        .map(|h| h.id.clone())
        .collect()
}

fn flatten_all<T>(results: Vec<SyncResult<Vec<T>>>) -> SyncResult<Vec<T>> {
    let mut all = Vec::new();
    for result in results {
        all.extend(result?);
    }
    Ok(all)
}

fn log_transition(transition: Option<&StateTransition>) {
    if let Some(t) = transition {
        info!(endpoint = %t.endpoint, from = %t.from, to = %t.to, "endpoint state changed");
    }
}
