//! Registry contracts.
//!
//! The registry is a service catalog plus a hierarchical key-value store. This
//! crate does not speak any registry wire protocol; it only requires an
//! observer that turns a `DependencySpec` into a sequential stream of
//! immutable `RegistrySnapshot`s. `InMemoryRegistry` is an embedded
//! implementation for tests and local runs.

/// Embedded observer backed by process memory.
pub mod memory;
/// Registry data model.
pub mod snapshot;
/// Sequential snapshot stream handle.
pub mod stream;

pub use memory::InMemoryRegistry;
pub use snapshot::{DependencySpec, KvStore, RegistrySnapshot, ServiceInstance, ServiceRegistration};
pub use stream::{SnapshotItem, SnapshotSender, SnapshotStream};

use crate::error::RegistryError;

/// Produces snapshot streams for a set of registry dependencies.
///
/// Each call to `observe` starts an independent subscription. The returned
/// stream delivers snapshots one at a time and may end with an error at any
/// point; callers resubscribe by calling `observe` again.
pub trait RegistryObserver: Send + Sync {
    /// Starts observing `deps`.
    ///
    /// Must return promptly. Connecting and waiting for data belong behind
    /// the returned stream, where the caller bounds them with a timeout; the
    /// controller charges time spent inside `observe` against its
    /// initial-load timeout but cannot interrupt it.
    ///
    /// # Errors
    /// Any `RegistryError` when the subscription cannot be started.
    fn observe(&self, deps: &DependencySpec) -> Result<SnapshotStream, RegistryError>;
}
