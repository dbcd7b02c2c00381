//! Mapping rules: how registry entries become flat configuration keys.
//!
//! Three kinds, held in three separately ordered collections:
//! - `ServiceMapping`: a catalog service, bound by a pluggable function.
//! - `KeyTreeMapping`: every key under a prefix, renamed by a key transform.
//! - `KeyItemMapping`: one exact key, renamed to one config key.
//!
//! Rules are declared once and never change for the life of a controller.

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use crate::error::{MergeError, ValidationError};
use crate::flat::FlatConfig;
use crate::merge;
use crate::registry::{DependencySpec, RegistrySnapshot, ServiceRegistration};

/// Binds a service registration to zero or more `(config key, value)` pairs.
pub type BindFn = dyn Fn(&ServiceRegistration) -> Result<Vec<(String, String)>, MergeError> + Send + Sync;

/// Maps a path relative to a tree prefix to a config key.
pub type KeyTransformFn = dyn Fn(&str) -> String + Send + Sync;

/// Service-based mapping.
#[derive(Clone)]
pub struct ServiceMapping {
    service: String,
    bind: Arc<BindFn>,
}

impl ServiceMapping {
    /// Creates a mapping with a custom bind function.
    pub fn new<F>(service: impl Into<String>, bind: F) -> Self
    where
        F: Fn(&ServiceRegistration) -> Result<Vec<(String, String)>, MergeError> + Send + Sync + 'static,
    {
        Self {
            service: service.into(),
            bind: Arc::new(bind),
        }
    }

    /// Binds the first healthy instance's `address:port` to `config_key`.
    ///
    /// A registered service with no healthy instance binds nothing.
    pub fn endpoint(service: impl Into<String>, config_key: impl Into<String>) -> Self {
        let config_key = config_key.into();
        Self::new(service, move |reg| {
            Ok(reg
                .healthy_instances()
                .next()
                .map(|i| (config_key.clone(), i.endpoint()))
                .into_iter()
                .collect())
        })
    }

    /// The catalog service this rule binds.
    #[must_use]
    pub fn service_name(&self) -> &str {
        &self.service
    }

    /// Runs the bind function. A panic inside it is reported as
    /// `MergeError::BindPanicked`.
    pub fn bind(&self, registration: &ServiceRegistration) -> Result<Vec<(String, String)>, MergeError> {
        catch_unwind(AssertUnwindSafe(|| (self.bind)(registration))).unwrap_or_else(|_| {
            Err(MergeError::BindPanicked {
                service: self.service.clone(),
            })
        })
    }
}

impl fmt::Debug for ServiceMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceMapping")
            .field("service", &self.service)
            .finish_non_exhaustive()
    }
}

/// Key-prefix-tree mapping.
#[derive(Clone)]
pub struct KeyTreeMapping {
    prefix: String,
    transform: Arc<KeyTransformFn>,
}

impl KeyTreeMapping {
    /// Creates a mapping with a custom key transform.
    pub fn new<F>(prefix: impl Into<String>, transform: F) -> Self
    where
        F: Fn(&str) -> String + Send + Sync + 'static,
    {
        Self {
            prefix: prefix.into(),
            transform: Arc::new(transform),
        }
    }

    /// Maps `prefix` + `a/b/c` to `section:a:b:c`.
    pub fn nested(prefix: impl Into<String>, section: impl Into<String>) -> Self {
        let section = section.into();
        Self::new(prefix, move |relative| {
            let path = relative.replace('/', ":");
            if section.is_empty() {
                path
            } else {
                format!("{section}:{path}")
            }
        })
    }

    /// Prefix whose subtree this rule maps.
    #[must_use]
    pub fn key_prefix(&self) -> &str {
        &self.prefix
    }

    /// Config key for an entry at `relative` path under the prefix.
    #[must_use]
    pub fn config_key(&self, relative: &str) -> String {
        (self.transform)(relative)
    }
}

impl fmt::Debug for KeyTreeMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyTreeMapping")
            .field("prefix", &self.prefix)
            .finish_non_exhaustive()
    }
}

/// Single-key mapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyItemMapping {
    key: String,
    config_key: String,
}

impl KeyItemMapping {
    /// Maps registry `key` to `config_key`.
    pub fn new(key: impl Into<String>, config_key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            config_key: config_key.into(),
        }
    }

    /// Registry key read by this rule.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Flat config key written by this rule.
    #[must_use]
    pub fn config_key(&self) -> &str {
        &self.config_key
    }
}

/// The three ordered rule collections.
#[derive(Debug, Clone, Default)]
pub struct MappingRules {
    services: Vec<ServiceMapping>,
    trees: Vec<KeyTreeMapping>,
    items: Vec<KeyItemMapping>,
}

impl MappingRules {
    /// Creates an empty rule set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a service mapping.
    #[must_use]
    pub fn service(mut self, rule: ServiceMapping) -> Self {
        self.services.push(rule);
        self
    }

    /// Appends a key-tree mapping.
    #[must_use]
    pub fn tree(mut self, rule: KeyTreeMapping) -> Self {
        self.trees.push(rule);
        self
    }

    /// Appends a key-item mapping.
    #[must_use]
    pub fn item(mut self, rule: KeyItemMapping) -> Self {
        self.items.push(rule);
        self
    }

    /// Service mappings, in application order.
    #[must_use]
    pub fn services(&self) -> &[ServiceMapping] {
        &self.services
    }

    /// Key-tree mappings, in application order.
    #[must_use]
    pub fn trees(&self) -> &[KeyTreeMapping] {
        &self.trees
    }

    /// Key-item mappings, in application order.
    #[must_use]
    pub fn items(&self) -> &[KeyItemMapping] {
        &self.items
    }

    /// Returns true if no rule is declared.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.services.is_empty() && self.trees.is_empty() && self.items.is_empty()
    }

    /// The registry dependencies these rules read.
    #[must_use]
    pub fn dependencies(&self) -> DependencySpec {
        DependencySpec {
            services: self.services.iter().map(|r| r.service.clone()).collect(),
            key_prefixes: self.trees.iter().map(|r| r.prefix.clone()).collect(),
            keys: self.items.iter().map(|r| r.key.clone()).collect(),
        }
    }

    /// Rejects rules that name nothing.
    ///
    /// An empty tree prefix is allowed and maps the whole key-value store.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.services.iter().any(|r| r.service.trim().is_empty()) {
            return Err(ValidationError::EmptyField {
                field: "service_mapping.service".to_string(),
            });
        }
        for item in &self.items {
            if item.key.trim().is_empty() {
                return Err(ValidationError::EmptyField {
                    field: "key_item_mapping.key".to_string(),
                });
            }
            if item.config_key.trim().is_empty() {
                return Err(ValidationError::EmptyField {
                    field: "key_item_mapping.config_key".to_string(),
                });
            }
        }
        Ok(())
    }

    /// Merges `snapshot` through these rules.
    pub fn merge(&self, snapshot: &RegistrySnapshot) -> Result<FlatConfig, MergeError> {
        merge::merge(snapshot, &self.services, &self.trees, &self.items)
    }
}
