//! Remote host resources: hardware, virtual machines, orchestrator hosts,
//! resource pools and reverse proxy routes.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Hardware summary reported by a host.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HardwareInfo {
    /// CPU architecture.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_type: Option<String>,
    /// CPU brand string.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_brand: Option<String>,
    /// Logical CPU count.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_count: Option<u32>,
    /// Total memory in MiB.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_size: Option<u64>,
    /// Hypervisor product version.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parallels_desktop_version: Option<String>,
    /// Server fields not modelled explicitly.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A virtual machine as listed by a host or an orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VirtualMachine {
    /// VM identifier.
    #[serde(rename = "ID")]
    pub id: String,
    /// VM name.
    #[serde(rename = "Name")]
    pub name: String,
    /// Power state (`running`, `stopped`, ...).
    #[serde(rename = "State", default)]
    pub state: String,
    /// Guest OS.
    #[serde(rename = "OS", default, skip_serializing_if = "Option::is_none")]
    pub os: Option<String>,
    /// Orchestrator host running the VM.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_id: Option<String>,
    /// Server fields not modelled explicitly.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl VirtualMachine {
    /// Create a VM record.
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>, state: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            state: state.into(),
            os: None,
            host_id: None,
            extra: Map::new(),
        }
    }
}

/// A host managed by an orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorHost {
    /// Host id assigned by the orchestrator.
    pub id: String,
    /// Hostname or URL of the host.
    pub host: String,
    /// CPU architecture.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub architecture: Option<String>,
    /// CPU model.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_model: Option<String>,
    /// Health state reported by the orchestrator.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    /// Whether the orchestrator schedules work on the host.
    #[serde(default)]
    pub enabled: bool,
    /// Free-form description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Tags.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Server fields not modelled explicitly.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl OrchestratorHost {
    /// Create a host record.
    #[must_use]
    pub fn new(id: impl Into<String>, host: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            host: host.into(),
            architecture: None,
            cpu_model: None,
            state: None,
            enabled: true,
            description: None,
            tags: Vec::new(),
            extra: Map::new(),
        }
    }
}

/// Request body for adding or updating an orchestrator host.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostRequest {
    /// Host URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    /// Description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Tags.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    /// Credentials the orchestrator uses to reach the host.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authentication: Option<HostAuthentication>,
}

/// Credentials for a host registered on an orchestrator.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostAuthentication {
    /// Username.
    pub username: String,
    /// Password.
    pub password: String,
}

impl std::fmt::Debug for HostAuthentication {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostAuthentication")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// Aggregated capacity for one CPU type across an orchestrator's hosts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourcePool {
    /// CPU architecture the pool covers.
    pub cpu_type: String,
    /// CPU brand.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_brand: Option<String>,
    /// Server fields (totals, available, reserved...) not modelled explicitly.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Reverse proxy settings of a host.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReverseProxyConfig {
    /// Whether the proxy is running.
    #[serde(default)]
    pub enabled: bool,
    /// Listen host.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    /// Listen port.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<String>,
    /// Server fields not modelled explicitly.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Composite key of a reverse proxy route.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProxyRouteKey {
    /// Owning orchestrator host, `None` on a single host.
    pub host_id: Option<String>,
    /// Route host.
    pub host: String,
    /// Route port.
    pub port: String,
}

/// A reverse proxy route.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProxyRoute {
    /// Server-side id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Orchestrator host serving the route.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_id: Option<String>,
    /// Route host.
    pub host: String,
    /// Route port.
    pub port: String,
    /// Server fields (targets, TCP/HTTP routes...) not modelled explicitly.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ProxyRoute {
    /// Create a route.
    #[must_use]
    pub fn new(host: impl Into<String>, port: impl Into<String>) -> Self {
        Self {
            id: None,
            host_id: None,
            host: host.into(),
            port: port.into(),
            extra: Map::new(),
        }
    }

    /// Set the owning host.
    #[must_use]
    pub fn with_host_id(mut self, host_id: impl Into<String>) -> Self {
        self.host_id = Some(host_id.into());
        self
    }

    /// The composite key identifying this route.
    #[must_use]
    pub fn key(&self) -> ProxyRouteKey {
        ProxyRouteKey {
            host_id: self.host_id.clone(),
            host: self.host.clone(),
            port: self.port.clone(),
        }
    }
}
