//! # devops-sync
//!
//! Keeps an in-memory model of remote DevOps endpoints in sync with the
//! servers: catalog servers, single hypervisor hosts and orchestrators.
//!
//! ## Architecture
//!
//! ```text
//!   RefreshScheduler ──tick──► Synchronizer ──► HealthProber ──► TokenManager
//!   (catalog, remote)               │                                 ▲
//!                                   ├──► Fetcher ─────────────────────┘
//!                                   │
//!                                   ├──► diff / merge ──► endpoint snapshot
//!                                   │
//!                                   └──► ModelChanged (broadcast, one per tick)
//!
//!   LogChannelRegistry ──WebSocket──► LogSink
//! ```
//!
//! Each tick probes every endpoint of its group, fetches the sub-resources
//! of the healthy ones concurrently, compares them with the cached snapshot
//! and publishes at most one [`ModelChanged`] signal. A tick that comes due
//! while the previous one still runs is dropped.
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use devops_sync::{DevOpsService, RegistryFile, SyncConfig};
//!
//! # async fn example() -> Result<(), devops_sync::SyncError> {
//! let service = DevOpsService::new(SyncConfig::default())?;
//! for endpoint in RegistryFile::from_file("endpoints.json")?.into_endpoints() {
//!     service.register(endpoint).await?;
//! }
//! let mut changes = service.subscribe();
//! service.start();
//! while let Ok(change) = changes.recv().await {
//!     println!("{} endpoints changed", change.changed.len());
//! }
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod admin;
pub mod auth;
pub mod client;
pub mod config;
pub mod diff;
pub mod endpoint;
pub mod error;
pub mod events;
pub mod fetch;
pub mod health;
pub mod logstream;
pub mod merge;
pub mod reconcile;
pub mod registry;
pub mod scheduler;
pub mod service;

pub use admin::{AdminClient, ManifestPatch, ManifestRef};
pub use auth::{Principal, Session, TokenClaims, TokenManager};
pub use client::ApiClient;
pub use config::{CatalogEndpointConfig, RegistryFile, RemoteEndpointConfig, SyncConfig};
pub use diff::{collection_differs, value_differs};
pub use endpoint::{
    CatalogEndpoint, CatalogModel, Connection, Endpoint, RemoteEndpoint, RemoteModel,
    ReverseProxyState,
};
pub use error::{SyncError, SyncResult};
pub use events::{ModelChanged, StateTransition};
pub use fetch::{Fetcher, ResourceKind};
pub use health::HealthProber;
pub use logstream::{ChannelKey, LogChannelRegistry, LogSink, MemorySink};
pub use merge::merge;
pub use reconcile::{EndpointOutcome, GroupReport, Synchronizer};
pub use registry::EndpointRegistry;
pub use scheduler::{RefreshScheduler, TickOutcome};
pub use service::DevOpsService;
