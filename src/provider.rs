//! Generic configuration provider contract.
//!
//! Applications consume configuration through `ConfigurationProvider`: call
//! `load` once at startup, then read `current` (or `get`) whenever needed and
//! subscribe for reload notices.

use std::sync::{Arc, Mutex, PoisonError};

use crate::controller::{ChangeStream, LoadSource, LoadState, ReloadController, ReloadHandle};
use crate::error::ConfigResult;
use crate::flat::FlatConfig;

/// A source of flat configuration that can reload itself.
pub trait ConfigurationProvider: Send + Sync {
    /// Loads configuration, blocking until it is available or loading fails.
    fn load(&self) -> ConfigResult<()>;

    /// The current configuration, if loaded.
    fn current(&self) -> Option<Arc<FlatConfig>>;

    /// Notifies after each reload. Re-read `current` on notice.
    fn subscribe(&self) -> ChangeStream;

    /// Looks up one key, ignoring case.
    fn get(&self, key: &str) -> Option<String> {
        self.current().and_then(|c| c.get(key).map(str::to_owned))
    }
}

/// Provider backed by a `ReloadController`.
///
/// `load` runs the initial load and, when configured, starts continuous
/// reload. The reload worker lives as long as the provider (or until
/// `shutdown`).
#[derive(Debug)]
pub struct RegistryConfigProvider {
    controller: Arc<ReloadController>,
    reload: Mutex<Option<ReloadHandle>>,
}

impl RegistryConfigProvider {
    /// Wraps `controller`. Nothing is loaded until `load`.
    #[must_use]
    pub fn new(controller: ReloadController) -> Self {
        Self {
            controller: Arc::new(controller),
            reload: Mutex::new(None),
        }
    }

    /// The underlying controller.
    #[must_use]
    pub const fn controller(&self) -> &Arc<ReloadController> {
        &self.controller
    }

    /// Current lifecycle state of the controller.
    #[must_use]
    pub fn state(&self) -> LoadState {
        self.controller.state()
    }

    /// Like `load`, but reports where the configuration came from.
    pub fn load_with_source(&self) -> ConfigResult<LoadSource> {
        let source = self.controller.initial_load()?;

        let mut reload = self.reload.lock().unwrap_or_else(PoisonError::into_inner);
        if reload.is_none() {
            *reload = self.controller.start_continuous_reload()?;
        }
        Ok(source)
    }

    /// True while a continuous-reload worker is running.
    #[must_use]
    pub fn is_reloading(&self) -> bool {
        self.reload
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(ReloadHandle::is_running)
    }

    /// Stops continuous reload. The last published configuration stays
    /// readable.
    pub fn shutdown(&self) {
        let handle = self.reload.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(handle) = handle {
            handle.shutdown();
        }
    }
}

impl ConfigurationProvider for RegistryConfigProvider {
    fn load(&self) -> ConfigResult<()> {
        self.load_with_source().map(|_| ())
    }

    fn current(&self) -> Option<Arc<FlatConfig>> {
        self.controller.current()
    }

    fn subscribe(&self) -> ChangeStream {
        self.controller.subscribe()
    }
}
