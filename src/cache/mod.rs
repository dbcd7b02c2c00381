//! Emergency cache: durable last-known-good flat configuration.
//!
//! The controller only writes configurations derived from a live snapshot.
//! A configuration that was itself loaded from the cache is never saved back.

#[cfg(feature = "persistent")]
mod codec;
#[cfg(feature = "persistent")]
mod file;

#[cfg(feature = "persistent")]
pub use file::FileCache;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::RwLock;

use crate::error::CacheError;
use crate::flat::FlatConfig;

/// Storage contract for the emergency cache.
pub trait EmergencyCache: Send + Sync {
    /// Loads the cached configuration, or `None` if nothing was ever saved.
    fn try_load(&self) -> Result<Option<FlatConfig>, CacheError>;

    /// Replaces the cached configuration.
    fn save(&self, config: &FlatConfig) -> Result<(), CacheError>;
}

/// A cache that never holds anything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoCache;

impl EmergencyCache for NoCache {
    fn try_load(&self) -> Result<Option<FlatConfig>, CacheError> {
        Ok(None)
    }

    fn save(&self, _config: &FlatConfig) -> Result<(), CacheError> {
        Ok(())
    }
}

/// Process-local cache. Useful for tests and for processes that only need to
/// survive registry outages after a successful start.
#[derive(Debug, Default)]
pub struct MemoryCache {
    slot: RwLock<Option<FlatConfig>>,
    saves: AtomicU64,
    fail_saves: AtomicBool,
}

impl MemoryCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a cache that already holds `config`.
    #[must_use]
    pub fn with(config: FlatConfig) -> Self {
        Self {
            slot: RwLock::new(Some(config)),
            ..Self::default()
        }
    }

    /// Number of successful `save` calls.
    #[must_use]
    pub fn save_count(&self) -> u64 {
        self.saves.load(Ordering::Relaxed)
    }

    /// Makes subsequent saves fail with an I/O error.
    pub fn set_fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::Relaxed);
    }

    /// The stored configuration, if any.
    #[must_use]
    pub fn stored(&self) -> Option<FlatConfig> {
        self.slot.read().ok().and_then(|s| s.clone())
    }
}

impl EmergencyCache for MemoryCache {
    fn try_load(&self) -> Result<Option<FlatConfig>, CacheError> {
        let slot = self
            .slot
            .read()
            .map_err(|_| CacheError::Io(std::io::Error::other("poisoned lock: memory cache")))?;
        Ok(slot.clone())
    }

    fn save(&self, config: &FlatConfig) -> Result<(), CacheError> {
        if self.fail_saves.load(Ordering::Relaxed) {
            return Err(CacheError::Io(std::io::Error::other("memory cache save disabled")));
        }
        let mut slot = self
            .slot
            .write()
            .map_err(|_| CacheError::Io(std::io::Error::other("poisoned lock: memory cache")))?;
        *slot = Some(config.clone());
        self.saves.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}
