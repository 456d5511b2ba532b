//! Top-level handle tying the engine together.
//!
//! [`DevOpsService`] owns the endpoint registry, the refresh scheduler and
//! the log channels, and exposes the operations a presentation layer or the
//! daemon needs: registration, removal, enable/disable, start/stop, manual
//! refresh, change subscription and log streaming.

use std::sync::Arc;

use devops_model::{EndpointGroup, EndpointId};
use tokio::sync::broadcast;
use tracing::{info, instrument};

use crate::admin::AdminClient;
use crate::auth::{Session, TokenManager};
use crate::client::ApiClient;
use crate::config::SyncConfig;
use crate::endpoint::Endpoint;
use crate::error::{SyncError, SyncResult};
use crate::events::ModelChanged;
use crate::fetch::Fetcher;
use crate::health::HealthProber;
use crate::logstream::{ChannelKey, LogChannelRegistry, LogSink, log_stream_url};
use crate::reconcile::Synchronizer;
use crate::registry::EndpointRegistry;
use crate::scheduler::{RefreshScheduler, TickOutcome};

/// Capacity of the change signal channel.
const EVENT_CAPACITY: usize = 64;

/// The synchronization engine.
#[derive(Debug)]
pub struct DevOpsService {
    config: SyncConfig,
    registry: Arc<EndpointRegistry>,
    prober: HealthProber,
    fetcher: Fetcher,
    admin: AdminClient,
    synchronizer: Arc<Synchronizer>,
    scheduler: RefreshScheduler,
    logs: LogChannelRegistry,
}

impl DevOpsService {
    /// Build a stopped service.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the HTTP client
    /// cannot be built.
    pub fn new(config: SyncConfig) -> SyncResult<Self> {
        config.validate()?;

        let client = ApiClient::new(&config)?;
        let tokens = TokenManager::new(client.http().clone(), config.superuser_role.clone());
        let prober = HealthProber::new(client.http().clone(), tokens.clone());
        let fetcher = Fetcher::new(client.clone(), tokens.clone());
        let admin = AdminClient::new(client, tokens.clone());

        let registry = Arc::new(EndpointRegistry::new());
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let synchronizer = Arc::new(Synchronizer::new(
            Arc::clone(&registry),
            prober.clone(),
            fetcher.clone(),
            events,
        ));
        let scheduler = RefreshScheduler::new(Arc::clone(&synchronizer), config.refresh_interval);
        let logs = LogChannelRegistry::new(tokens, config.connect_timeout);

        Ok(Self {
            config,
            registry,
            prober,
            fetcher,
            admin,
            synchronizer,
            scheduler,
            logs,
        })
    }

    /// The active configuration.
    #[must_use]
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// The endpoint registry.
    #[must_use]
    pub fn registry(&self) -> &EndpointRegistry {
        &self.registry
    }

    /// Resource fetchers, for one-off reads.
    #[must_use]
    pub fn fetcher(&self) -> &Fetcher {
        &self.fetcher
    }

    /// Administrative mutations.
    #[must_use]
    pub fn admin(&self) -> &AdminClient {
        &self.admin
    }

    /// Probe an endpoint without registering it.
    pub async fn probe(&self, endpoint: &Endpoint) -> SyncResult<Session> {
        self.prober.probe(endpoint.connection()).await
    }

    /// Validate and register an endpoint.
    ///
    /// The endpoint is probed once; a disabled remote endpoint is registered
    /// without probing. A registered endpoint starts `active` and its first
    /// sync always counts as a change.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::AlreadyRegistered`] for a duplicate id, or the
    /// probe error if the endpoint is unreachable or rejects the credentials.
    #[instrument(skip(self, endpoint), fields(endpoint = %endpoint.id()))]
    pub async fn register(&self, endpoint: Endpoint) -> SyncResult<()> {
        if self.registry.contains(endpoint.id()) {
            return Err(SyncError::AlreadyRegistered(endpoint.id().clone()));
        }

        let disabled = matches!(&endpoint, Endpoint::Remote(remote) if !remote.is_enabled());
        if !disabled {
            self.prober.probe(endpoint.connection()).await?;
            endpoint.mark_registered();
        }

        self.registry.insert(endpoint.clone())?;
        info!(group = %endpoint.group(), disabled, "endpoint registered");
        Ok(())
    }

    /// Deregister an endpoint and close all of its log channels.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::NotFound`] if the id is unknown.
    pub fn remove(&self, id: &EndpointId) -> SyncResult<Endpoint> {
        let endpoint = self.registry.remove(id)?;
        self.logs.close_endpoint(id);
        info!(endpoint = %id, "endpoint removed");
        Ok(endpoint)
    }

    /// Switch polling of a remote endpoint on or off.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::NotFound`] if the id is unknown and
    /// [`SyncError::UnsupportedOperation`] for catalog endpoints.
    pub fn set_enabled(&self, id: &EndpointId, enabled: bool) -> SyncResult<()> {
        match self.registry.get(id) {
            Some(Endpoint::Remote(remote)) => {
                remote.set_enabled(enabled);
                info!(endpoint = %id, enabled, "endpoint toggled");
                Ok(())
            }
            Some(Endpoint::Catalog(_)) => Err(SyncError::UnsupportedOperation {
                endpoint: id.clone(),
                operation: "set_enabled",
            }),
            None => Err(SyncError::NotFound(id.clone())),
        }
    }

    /// Start both refresh timers.
    pub fn start(&self) {
        self.scheduler.start_all();
    }

    /// Stop both refresh timers.
    pub fn stop(&self) {
        self.scheduler.stop_all();
    }

    /// Whether the timer of a group is running.
    #[must_use]
    pub fn is_running(&self, group: EndpointGroup) -> bool {
        self.scheduler.is_running(group)
    }

    /// Subscribe to change signals.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ModelChanged> {
        self.synchronizer.subscribe()
    }

    /// Run one tick of a group now.
    pub async fn refresh_now(&self, group: EndpointGroup) -> TickOutcome {
        self.scheduler.try_tick(group).await
    }

    /// Open a log channel for an endpoint or one of its orchestrator hosts.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::NotFound`] for an unknown endpoint,
    /// [`SyncError::ChannelAlreadyOpen`] if the channel exists, or the
    /// connection error.
    pub async fn open_logs(
        &self,
        id: &EndpointId,
        host_id: Option<&str>,
        sink: Arc<dyn LogSink>,
    ) -> SyncResult<ChannelKey> {
        let endpoint = self
            .registry
            .get(id)
            .ok_or_else(|| SyncError::NotFound(id.clone()))?;

        let key = match host_id {
            Some(host_id) => ChannelKey::Host {
                endpoint: id.clone(),
                host_id: host_id.to_string(),
            },
            None => ChannelKey::Endpoint(id.clone()),
        };
        let url = log_stream_url(endpoint.connection().address(), host_id)?;
        self.logs
            .open(key.clone(), endpoint.connection(), url, sink)
            .await?;
        Ok(key)
    }

    /// Close a log channel. No-op if it is not open.
    pub fn close_logs(&self, key: &ChannelKey) {
        self.logs.close(key);
    }

    /// The log channel registry.
    #[must_use]
    pub fn log_channels(&self) -> &LogChannelRegistry {
        &self.logs
    }
}
