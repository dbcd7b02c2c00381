//! Registry data model: what to observe and what one observation contains.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

/// The registry dependencies an application observes.
///
/// Built once at startup and never mutated afterwards.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencySpec {
    /// Service names to watch in the catalog.
    #[serde(default)]
    pub services: BTreeSet<String>,
    /// Key prefixes whose subtrees are watched in the key-value store.
    #[serde(default)]
    pub key_prefixes: BTreeSet<String>,
    /// Exact keys watched in the key-value store.
    #[serde(default)]
    pub keys: BTreeSet<String>,
}

impl DependencySpec {
    /// Creates an empty specification.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a service name.
    #[must_use]
    pub fn service(mut self, name: impl Into<String>) -> Self {
        self.services.insert(name.into());
        self
    }

    /// Adds a key prefix.
    #[must_use]
    pub fn key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefixes.insert(prefix.into());
        self
    }

    /// Adds an exact key.
    #[must_use]
    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.keys.insert(key.into());
        self
    }

    /// Merges another specification into this one.
    pub fn extend(&mut self, other: &Self) {
        self.services.extend(other.services.iter().cloned());
        self.key_prefixes.extend(other.key_prefixes.iter().cloned());
        self.keys.extend(other.keys.iter().cloned());
    }

    /// Returns true if nothing is observed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.services.is_empty() && self.key_prefixes.is_empty() && self.keys.is_empty()
    }

    /// Returns true if `key` is watched either exactly or through a prefix.
    #[must_use]
    pub fn covers_key(&self, key: &str) -> bool {
        self.keys.contains(key) || self.key_prefixes.iter().any(|p| key.starts_with(p.as_str()))
    }
}

fn default_healthy() -> bool {
    true
}

/// One registered instance of a service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceInstance {
    /// Registry-assigned instance id.
    pub id: String,
    /// Host name or IP address.
    pub address: String,
    /// Service port.
    pub port: u16,
    /// Free-form tags.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Free-form metadata.
    #[serde(default)]
    pub meta: BTreeMap<String, String>,
    /// Whether the instance passes its health checks. Defaults to true.
    #[serde(default = "default_healthy")]
    pub healthy: bool,
}

impl ServiceInstance {
    /// Creates a healthy instance with no tags or metadata.
    #[must_use]
    pub fn new(id: impl Into<String>, address: impl Into<String>, port: u16) -> Self {
        Self {
            id: id.into(),
            address: address.into(),
            port,
            tags: Vec::new(),
            meta: BTreeMap::new(),
            healthy: true,
        }
    }

    /// Adds a tag.
    #[must_use]
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    /// Adds a metadata entry.
    #[must_use]
    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.meta.insert(key.into(), value.into());
        self
    }

    /// Marks the instance as failing health checks.
    #[must_use]
    pub fn unhealthy(mut self) -> Self {
        self.healthy = false;
        self
    }

    /// `address:port`.
    #[must_use]
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }
}

/// Catalog data for one service name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceRegistration {
    /// Service name.
    pub name: String,
    /// Registered instances, in registration order.
    #[serde(default)]
    pub instances: Vec<ServiceInstance>,
}

impl ServiceRegistration {
    /// Creates a registration with no instances.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            instances: Vec::new(),
        }
    }

    /// Adds an instance.
    #[must_use]
    pub fn with_instance(mut self, instance: ServiceInstance) -> Self {
        self.instances.push(instance);
        self
    }

    /// Instances currently passing health checks, in registration order.
    pub fn healthy_instances(&self) -> impl Iterator<Item = &ServiceInstance> {
        self.instances.iter().filter(|i| i.healthy)
    }
}

/// Hierarchical key-value view: exact lookup plus prefix enumeration.
///
/// Keys are `/`-separated paths and compared case-sensitively, as the registry
/// stores them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KvStore {
    entries: BTreeMap<String, String>,
}

impl KvStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets `key` to `value`.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.insert(key.into(), value.into());
    }

    /// Exact, case-sensitive lookup.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    /// Entries under `prefix`, yielded as `(path relative to prefix, value)`.
    ///
    /// An empty prefix enumerates the whole store.
    pub fn prefix<'a>(&'a self, prefix: &'a str) -> impl Iterator<Item = (&'a str, &'a str)> + 'a {
        self.entries
            .range::<str, _>((std::ops::Bound::Included(prefix), std::ops::Bound::Unbounded))
            .take_while(move |(k, _)| k.starts_with(prefix))
            .map(move |(k, v)| (&k[prefix.len()..], v.as_str()))
    }

    /// Number of keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the store holds no keys.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Immutable point-in-time view of the observed registry dependencies.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrySnapshot {
    /// Registry-assigned index of this view; zero when unknown.
    #[serde(default)]
    pub index: u64,
    #[serde(default)]
    services: HashMap<String, ServiceRegistration>,
    #[serde(default)]
    kv: KvStore,
}

impl RegistrySnapshot {
    /// Creates an empty snapshot.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the registry index.
    #[must_use]
    pub fn with_index(mut self, index: u64) -> Self {
        self.index = index;
        self
    }

    /// Adds (or replaces) a service registration.
    #[must_use]
    pub fn with_service(mut self, registration: ServiceRegistration) -> Self {
        self.services.insert(registration.name.clone(), registration);
        self
    }

    /// Adds a key-value entry.
    #[must_use]
    pub fn with_key(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.kv.insert(key, value);
        self
    }

    /// Catalog entry for `name`, if registered.
    #[must_use]
    pub fn service(&self, name: &str) -> Option<&ServiceRegistration> {
        self.services.get(name)
    }

    /// The key-value part of the snapshot.
    #[must_use]
    pub const fn kv(&self) -> &KvStore {
        &self.kv
    }

    /// A copy containing only what `deps` observes.
    #[must_use]
    pub fn restrict(&self, deps: &DependencySpec) -> Self {
        let services = self
            .services
            .iter()
            .filter(|(name, _)| deps.services.contains(name.as_str()))
            .map(|(name, reg)| (name.clone(), reg.clone()))
            .collect();

        let mut kv = KvStore::new();
        for (key, value) in &self.kv.entries {
            if deps.covers_key(key) {
                kv.insert(key.clone(), value.clone());
            }
        }

        Self {
            index: self.index,
            services,
            kv,
        }
    }
}
