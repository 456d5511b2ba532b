//! # devops-model
//!
//! Data model shared by the DevOps endpoint synchronization engine.
//!
//! - [`types`] - endpoint identity, addressing, credentials and state
//! - [`catalog`] - catalog manifests and image cache entries
//! - [`identity`] - users, roles and claims
//! - [`host`] - hardware, virtual machines, orchestrator hosts, resource pools
//!   and reverse proxy routes

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod catalog;
pub mod error;
pub mod host;
pub mod identity;
pub mod types;

pub use catalog::{CacheEntry, CacheEntryKey, CacheListing, CatalogManifest, ManifestVersion};
pub use error::ModelError;
pub use host::{
    HardwareInfo, HostAuthentication, HostRequest, OrchestratorHost, ProxyRoute, ProxyRouteKey,
    ResourcePool, ReverseProxyConfig, VirtualMachine,
};
pub use identity::{Claim, Role, User, UserRequest};
pub use types::{Credentials, EndpointAddress, EndpointGroup, EndpointId, EndpointState, RemoteKind};
