//! # regconf - Registry-Derived Application Configuration
//!
//! regconf builds a flat, case-insensitive configuration map from a service
//! registry (a service catalog plus a hierarchical key-value store) and keeps
//! it fresh as the registry changes. A durable emergency cache keeps the
//! application startable while the registry is unreachable.
//!
//! ## Core Concepts
//!
//! - **Snapshot**: one immutable point-in-time view of the observed registry data
//! - **Mapping Rule**: translates a service, a key subtree, or one key into flat keys
//! - **Flat Config**: the ordered, case-insensitive `String -> String` map applications read
//! - **Emergency Cache**: last configuration derived from a live snapshot
//! - **Reload Controller**: initial load with cache fallback, then continuous reload
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use regconf::{
//!     ConfigurationProvider, FileCache, KeyTreeMapping, MappingRules, RegistryConfigProvider,
//!     ReloadConfig, ReloadController, ServiceMapping,
//! };
//!
//! let rules = MappingRules::new()
//!     .service(ServiceMapping::endpoint("api", "Api:Endpoint"))
//!     .tree(KeyTreeMapping::nested("feature/", "Feature"));
//!
//! let controller = ReloadController::new(
//!     observer,
//!     Arc::new(FileCache::new("/var/lib/app/config.cache")),
//!     rules,
//!     ReloadConfig::default().with_reload_delay(Duration::from_secs(5)),
//! )?;
//!
//! let provider = RegistryConfigProvider::new(controller);
//! provider.load()?;
//! let endpoint = provider.get("api:endpoint");
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Data model and contracts
pub mod cache;
pub mod config;
pub mod error;
pub mod flat;
pub mod registry;
pub mod rules;

// Load and reload machinery
pub mod controller;
pub mod merge;
pub mod provider;
pub mod retry;

// Re-export primary types at crate root for convenience
pub use cache::{EmergencyCache, MemoryCache, NoCache};
#[cfg(feature = "persistent")]
pub use cache::FileCache;
pub use config::ReloadConfig;
pub use controller::{ChangeStream, ConfigChanged, LoadSource, LoadState, ReloadController, ReloadHandle};
pub use error::{
    CacheError, ConfigError, ConfigResult, MergeError, RegistryError, ValidationError,
};
pub use flat::FlatConfig;
pub use merge::merge;
pub use provider::{ConfigurationProvider, RegistryConfigProvider};
pub use registry::{
    DependencySpec, InMemoryRegistry, KvStore, RegistryObserver, RegistrySnapshot, ServiceInstance,
    ServiceRegistration, SnapshotSender, SnapshotStream,
};
pub use retry::{ReloadDelay, ResilientSubscription, RetryPolicy, SubscriptionEvent};
pub use rules::{KeyItemMapping, KeyTreeMapping, MappingRules, ServiceMapping};
