//! In-memory registry observer.
//!
//! Holds the current registry contents in process memory and pushes every
//! published change to all live subscriptions. It can also simulate outages,
//! which makes it the reference implementation for controller tests.

use std::sync::{Arc, Mutex, MutexGuard};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::RegistryError;

use super::snapshot::{DependencySpec, RegistrySnapshot};
use super::stream::{SnapshotSender, SnapshotStream};
use super::RegistryObserver;

#[derive(Debug)]
struct Subscriber {
    deps: DependencySpec,
    tx: SnapshotSender,
}

#[derive(Debug, Default)]
struct Inner {
    current: Option<Arc<RegistrySnapshot>>,
    outage: Option<RegistryError>,
    subscribers: Vec<Subscriber>,
}

/// Registry observer backed by an in-process snapshot.
///
/// A new subscription immediately receives the current contents, if any, then
/// every later `publish`. Each subscriber only sees the part of a snapshot its
/// `DependencySpec` covers.
#[derive(Debug, Default)]
pub struct InMemoryRegistry {
    inner: Mutex<Inner>,
    observe_calls: AtomicU64,
}

impl InMemoryRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry that already holds `snapshot`.
    #[must_use]
    pub fn with_snapshot(snapshot: RegistrySnapshot) -> Self {
        let registry = Self::new();
        registry.publish(snapshot);
        registry
    }

    // Plain data behind the lock; poisoning leaves it consistent.
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Replaces the registry contents and delivers them to every subscriber.
    pub fn publish(&self, snapshot: RegistrySnapshot) {
        let snapshot = Arc::new(snapshot);
        let mut inner = self.lock();
        inner.current = Some(Arc::clone(&snapshot));
        inner
            .subscribers
            .retain(|sub| sub.tx.send(Arc::new(snapshot.restrict(&sub.deps))).is_ok());
    }

    /// Starts an outage: live streams end with `error` and new `observe` calls
    /// fail with it until `recover` is called.
    pub fn begin_outage(&self, error: RegistryError) {
        let mut inner = self.lock();
        inner.outage = Some(error.clone());
        for sub in inner.subscribers.drain(..) {
            sub.tx.fail(error.clone());
        }
    }

    /// Ends an outage. Existing contents become observable again.
    pub fn recover(&self) {
        self.lock().outage = None;
    }

    /// Ends every live stream with `error` without starting an outage.
    pub fn fail_streams(&self, error: RegistryError) {
        let mut inner = self.lock();
        for sub in inner.subscribers.drain(..) {
            sub.tx.fail(error.clone());
        }
    }

    /// Number of `observe` calls made so far, successful or not.
    #[must_use]
    pub fn observe_calls(&self) -> u64 {
        self.observe_calls.load(Ordering::Relaxed)
    }

    /// Number of subscriptions still attached.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.lock().subscribers.len()
    }
}

impl RegistryObserver for InMemoryRegistry {
    fn observe(&self, deps: &DependencySpec) -> Result<SnapshotStream, RegistryError> {
        self.observe_calls.fetch_add(1, Ordering::Relaxed);

        let mut inner = self.lock();
        if let Some(err) = &inner.outage {
            return Err(err.clone());
        }

        let (tx, stream) = SnapshotStream::channel();
        if let Some(current) = &inner.current {
            tx.send(Arc::new(current.restrict(deps)))?;
        }
        inner.subscribers.push(Subscriber {
            deps: deps.clone(),
            tx,
        });
        Ok(stream)
    }
}
