//! Catalog manifests and image cache entries.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One published version of a catalog image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestVersion {
    /// Server-side manifest id.
    pub id: String,
    /// Catalog id this version belongs to.
    pub catalog_id: String,
    /// Version label.
    pub version: String,
    /// CPU architecture (`arm64`, `x86_64`).
    pub architecture: String,
    /// Free-form tags.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Roles required to pull this version.
    #[serde(default)]
    pub required_roles: Vec<String>,
    /// Claims required to pull this version.
    #[serde(default)]
    pub required_claims: Vec<String>,
    /// Whether the version is tainted.
    #[serde(default)]
    pub tainted: bool,
    /// Whether the version is revoked.
    #[serde(default)]
    pub revoked: bool,
    /// Server fields not modelled explicitly.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A catalog entry: every version published under one catalog id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogManifest {
    /// Catalog id, used as the display name.
    pub name: String,
    /// Published versions, in server order.
    #[serde(default)]
    pub items: Vec<ManifestVersion>,
}

impl CatalogManifest {
    /// Create an empty manifest group.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            items: Vec::new(),
        }
    }

    /// Add a version.
    #[must_use]
    pub fn with_item(mut self, item: ManifestVersion) -> Self {
        self.items.push(item);
        self
    }

    /// Convert the `GET /api/v1/catalog` response shape (catalog id to versions)
    /// into a list of manifest groups.
    #[must_use]
    pub fn from_catalog_map(map: BTreeMap<String, Vec<ManifestVersion>>) -> Vec<Self> {
        map.into_iter()
            .map(|(name, items)| Self { name, items })
            .collect()
    }
}

/// Composite key of a cache entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheEntryKey {
    /// Catalog id.
    pub catalog_id: String,
    /// Version label.
    pub version: String,
    /// Owning orchestrator host, `None` on a single host.
    pub host_id: Option<String>,
    /// CPU architecture.
    pub architecture: String,
}

/// An image held in a host's local catalog cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Catalog id.
    pub catalog_id: String,
    /// Version label.
    pub version: String,
    /// CPU architecture.
    pub architecture: String,
    /// Orchestrator host holding the entry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_id: Option<String>,
    /// Size on disk in bytes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    /// When the entry was cached.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_date: Option<String>,
    /// Server fields not modelled explicitly.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl CacheEntry {
    /// Create a cache entry with only its identifying fields.
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
            host_id: None,
            size: None,
            cache_date: None,
            extra: Map::new(),
        }
    }

    /// Set the owning host.
    #[must_use]
    pub fn with_host_id(mut self, host_id: impl Into<String>) -> Self {
        self.host_id = Some(host_id.into());
        self
    }

    /// The composite key identifying this entry.
    #[must_use]
    pub fn key(&self) -> CacheEntryKey {
        CacheEntryKey {
            catalog_id: self.catalog_id.clone(),
            version: self.version.clone(),
            host_id: self.host_id.clone(),
            architecture: self.architecture.clone(),
        }
    }
}

/// Response body of the cache listing endpoints.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheListing {
    /// Total bytes used by the cache.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_size: Option<u64>,
    /// Cached entries.
    #[serde(default)]
    pub manifests: Vec<CacheEntry>,
}
