//! Reload controller.
//!
//! Owns the currently published `FlatConfig` and drives two phases:
//!
//! 1. `initial_load`: blocks until the first live snapshot (bounded by the
//!    configured timeout), merges and publishes it, and saves it to the
//!    emergency cache. If the live path fails, the cached copy is published
//!    instead; with no cached copy the load is fatal.
//! 2. `start_continuous_reload`: a dedicated worker thread follows the
//!    snapshot stream through a `ResilientSubscription` and re-runs
//!    merge, publish, save and notify for each snapshot. A failing cycle is
//!    logged and counted; the previously published map stays in place.
//!
//! Publication is a single atomic pointer swap, so readers always see a whole
//! map. Cycles are applied under one lock, in delivery order.
//!
//! ```text
//! Uninitialized -> Loading -> LoadedLive | LoadedCache | Fatal
//!                             LoadedLive <-> ReloadFailed
//! ```

mod notify;

pub use notify::{ChangeStream, ConfigChanged};

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use arc_swap::ArcSwapOption;
use crossbeam_channel::{bounded, Sender};
use tracing::{debug, info, warn};

use crate::cache::EmergencyCache;
use crate::config::ReloadConfig;
use crate::error::{ConfigError, ConfigResult, RegistryError};
use crate::flat::FlatConfig;
use crate::registry::{DependencySpec, RegistryObserver, RegistrySnapshot};
use crate::retry::{ResilientSubscription, RetryPolicy, SubscriptionEvent};
use crate::rules::MappingRules;

use notify::ChangeNotifier;

/// Lifecycle state of a controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoadState {
    /// No load attempted yet.
    Uninitialized,
    /// `initial_load` is in progress.
    Loading,
    /// Serving a configuration derived from a live snapshot.
    LoadedLive,
    /// Serving the emergency cache copy; no live snapshot applied yet.
    LoadedCache,
    /// Initial load failed with no cache. Nothing is published.
    Fatal,
    /// The latest reload cycle failed; the last good map is still served.
    ReloadFailed,
}

impl LoadState {
    /// True once some configuration is being served.
    #[must_use]
    pub const fn is_loaded(self) -> bool {
        matches!(self, Self::LoadedLive | Self::LoadedCache | Self::ReloadFailed)
    }
}

/// Where the initial configuration came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadSource {
    /// Merged from a live registry snapshot.
    Live,
    /// Read from the emergency cache.
    Cache,
}

/// Result of acquiring the initial configuration.
#[derive(Debug)]
pub(crate) enum LoadOutcome {
    /// Merged from a live snapshot.
    Live(FlatConfig),
    /// Live path failed; loaded from the emergency cache.
    CacheHit(FlatConfig),
    /// Live path failed and the cache is empty.
    Fatal(ConfigError),
}

/// Drives initial load and continuous reload, and owns the published map.
pub struct ReloadController {
    observer: Arc<dyn RegistryObserver>,
    cache: Arc<dyn EmergencyCache>,
    rules: MappingRules,
    deps: DependencySpec,
    config: ReloadConfig,
    current: ArcSwapOption<FlatConfig>,
    state: Mutex<LoadState>,
    apply_lock: Mutex<()>,
    generation: AtomicU64,
    reload_failures: AtomicU64,
    notifier: ChangeNotifier,
}

impl ReloadController {
    /// Creates a controller that observes exactly what `rules` read.
    ///
    /// # Errors
    /// `ConfigError::Validation` for invalid rules or configuration.
    pub fn new(
        observer: Arc<dyn RegistryObserver>,
        cache: Arc<dyn EmergencyCache>,
        rules: MappingRules,
        config: ReloadConfig,
    ) -> ConfigResult<Self> {
        let deps = rules.dependencies();
        Self::with_dependencies(observer, cache, rules, deps, config)
    }

    /// Creates a controller with an explicit dependency specification.
    ///
    /// Dependencies the rules read are always observed, in addition to `deps`.
    ///
    /// # Errors
    /// `ConfigError::Validation` for invalid rules or configuration.
    pub fn with_dependencies(
        observer: Arc<dyn RegistryObserver>,
        cache: Arc<dyn EmergencyCache>,
        rules: MappingRules,
        mut deps: DependencySpec,
        config: ReloadConfig,
    ) -> ConfigResult<Self> {
        let config = config.validate()?;
        rules.validate()?;
        deps.extend(&rules.dependencies());

        Ok(Self {
            observer,
            cache,
            rules,
            deps,
            notifier: ChangeNotifier::new(config.notification_capacity),
            config,
            current: ArcSwapOption::empty(),
            state: Mutex::new(LoadState::Uninitialized),
            apply_lock: Mutex::new(()),
            generation: AtomicU64::new(0),
            reload_failures: AtomicU64::new(0),
        })
    }

    /// The currently published configuration, if any.
    #[must_use]
    pub fn current(&self) -> Option<Arc<FlatConfig>> {
        self.current.load_full()
    }

    /// Looks up one key in the current configuration.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<String> {
        self.current().and_then(|c| c.get(key).map(str::to_owned))
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> LoadState {
        *self.lock_state()
    }

    /// Everything this controller observes: explicit dependencies plus
    /// whatever the rules read.
    #[must_use]
    pub const fn dependencies(&self) -> &DependencySpec {
        &self.deps
    }

    /// The validated reload configuration.
    #[must_use]
    pub const fn config(&self) -> &ReloadConfig {
        &self.config
    }

    /// Number of configurations published so far.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Number of failed reload cycles so far.
    #[must_use]
    pub fn reload_failures(&self) -> u64 {
        self.reload_failures.load(Ordering::Acquire)
    }

    /// Change notices dropped because a subscriber was not keeping up.
    #[must_use]
    pub fn dropped_notifications(&self) -> u64 {
        self.notifier.dropped()
    }

    /// Subscribes to reload notifications.
    ///
    /// Only continuous-reload cycles notify; the initial load does not.
    #[must_use]
    pub fn subscribe(&self) -> ChangeStream {
        self.notifier.subscribe()
    }

    /// Loads the first configuration, blocking the caller.
    ///
    /// Once a configuration is being served, further calls return where the
    /// served map came from and change nothing. After a fatal load the call
    /// may be retried.
    ///
    /// # Errors
    /// `ConfigError::FatalLoad` wrapping the live-path failure when the
    /// emergency cache holds nothing.
    pub fn initial_load(&self) -> ConfigResult<LoadSource> {
        let _guard = self.lock_apply();
        if let Some(source) = self.served_source() {
            debug!(?source, "configuration already loaded");
            return Ok(source);
        }
        self.set_state(LoadState::Loading);

        match self.acquire() {
            LoadOutcome::Live(config) => {
                let published = self.publish(config);
                self.set_state(LoadState::LoadedLive);
                if let Err(e) = self.cache.save(&published) {
                    warn!(error = %e, "failed to save configuration to emergency cache");
                }
                info!(entries = published.len(), "configuration loaded from registry");
                Ok(LoadSource::Live)
            }
            LoadOutcome::CacheHit(config) => {
                let published = self.publish(config);
                self.set_state(LoadState::LoadedCache);
                info!(entries = published.len(), "configuration loaded from emergency cache");
                Ok(LoadSource::Cache)
            }
            LoadOutcome::Fatal(err) => {
                self.set_state(LoadState::Fatal);
                tracing::error!(error = %err, "configuration load failed");
                Err(err)
            }
        }
    }

    /// Starts the continuous-reload worker, if the configuration enables it.
    ///
    /// Returns `None` when the reload delay is `Never`. The returned handle
    /// owns the worker; shutting it down (or dropping it) stops all further
    /// publication from this worker.
    ///
    /// # Errors
    /// `ConfigError::Internal` if the worker thread cannot be spawned.
    pub fn start_continuous_reload(self: &Arc<Self>) -> ConfigResult<Option<ReloadHandle>> {
        let Some(delay) = self.config.reload_delay.as_duration() else {
            return Ok(None);
        };

        let (shutdown_tx, shutdown_rx) = bounded::<()>(1);
        let mut subscription = ResilientSubscription::new(
            Arc::clone(&self.observer),
            self.deps.clone(),
            RetryPolicy::fixed(delay),
            shutdown_rx,
        );

        let stopped = Arc::new(AtomicBool::new(false));
        let worker_stopped = Arc::clone(&stopped);
        let controller = Arc::clone(self);
        let join = thread::Builder::new()
            .name("regconf-reload".to_string())
            .spawn(move || controller.reload_loop(&mut subscription, &worker_stopped))
            .map_err(|e| ConfigError::internal(format!("failed to spawn reload worker: {e}")))?;

        info!(delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX), "continuous reload started");
        Ok(Some(ReloadHandle {
            shutdown: Some(shutdown_tx),
            join: Some(join),
            stopped,
            controller: Arc::clone(self),
        }))
    }

    fn served_source(&self) -> Option<LoadSource> {
        match self.state() {
            LoadState::LoadedLive | LoadState::ReloadFailed => Some(LoadSource::Live),
            LoadState::LoadedCache => Some(LoadSource::Cache),
            LoadState::Uninitialized | LoadState::Loading | LoadState::Fatal => None,
        }
    }

    fn acquire(&self) -> LoadOutcome {
        let cause = match self.fetch_live() {
            Ok(config) => return LoadOutcome::Live(config),
            Err(e) => e,
        };
        warn!(error = %cause, "live configuration unavailable, trying emergency cache");

        match self.cache.try_load() {
            Ok(Some(config)) => LoadOutcome::CacheHit(config),
            Ok(None) => LoadOutcome::Fatal(ConfigError::fatal(cause)),
            Err(e) => {
                warn!(error = %e, "emergency cache unreadable");
                LoadOutcome::Fatal(ConfigError::fatal(cause))
            }
        }
    }

    // The timeout covers `observe` and the first receive together.
    fn fetch_live(&self) -> ConfigResult<FlatConfig> {
        let started = Instant::now();
        let stream = self.observer.observe(&self.deps)?;
        let snapshot = match self.config.initial_load_timeout {
            Some(timeout) => stream
                .recv_timeout(timeout.saturating_sub(started.elapsed()))
                .map_err(|e| match e {
                    RegistryError::Timeout { .. } => RegistryError::Timeout {
                        duration_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                    },
                    other => other,
                })?,
            None => stream.recv()?,
        };
        Ok(self.rules.merge(&snapshot)?)
    }

    fn reload_loop(&self, subscription: &mut ResilientSubscription, stopped: &AtomicBool) {
        loop {
            match subscription.next() {
                SubscriptionEvent::Snapshot(snapshot) => {
                    if let Err(e) = self.apply_cycle(&snapshot, stopped) {
                        self.record_failure(&e);
                    }
                }
                SubscriptionEvent::Failed(e) => {
                    warn!(
                        error = %e,
                        attempt = subscription.consecutive_failures(),
                        "registry subscription failed, resubscribing after delay"
                    );
                    self.record_failure(&e.into());
                }
                SubscriptionEvent::Shutdown => break,
            }
        }
        info!("continuous reload stopped");
    }

    fn apply_cycle(&self, snapshot: &RegistrySnapshot, stopped: &AtomicBool) -> ConfigResult<()> {
        let _guard = self.lock_apply();
        if stopped.load(Ordering::Acquire) {
            return Ok(());
        }

        let config = self.rules.merge(snapshot)?;
        let published = self.publish(config);
        self.set_state(LoadState::LoadedLive);
        debug!(
            index = snapshot.index,
            entries = published.len(),
            generation = self.generation(),
            "applied registry snapshot"
        );

        // A failed save still counts against the cycle, but the fresh map
        // stays published and the state stays LoadedLive.
        if let Err(e) = self.cache.save(&published) {
            self.reload_failures.fetch_add(1, Ordering::AcqRel);
            warn!(error = %e, "failed to save reloaded configuration to emergency cache");
        }
        self.notifier.notify();
        Ok(())
    }

    fn record_failure(&self, err: &ConfigError) {
        self.reload_failures.fetch_add(1, Ordering::AcqRel);
        let mut state = self.lock_state();
        if *state == LoadState::LoadedLive {
            *state = LoadState::ReloadFailed;
        }
        drop(state);
        warn!(error = %err, "reload cycle failed, keeping last good configuration");
    }

    fn publish(&self, config: FlatConfig) -> Arc<FlatConfig> {
        let config = Arc::new(config);
        self.current.store(Some(Arc::clone(&config)));
        self.generation.fetch_add(1, Ordering::AcqRel);
        config
    }

    fn set_state(&self, state: LoadState) {
        *self.lock_state() = state;
    }

    // Both locks guard plain data; poisoning leaves it consistent.
    fn lock_state(&self) -> MutexGuard<'_, LoadState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_apply(&self) -> MutexGuard<'_, ()> {
        self.apply_lock.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for ReloadController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReloadController")
            .field("deps", &self.deps)
            .field("config", &self.config)
            .field("state", &self.state())
            .field("generation", &self.generation())
            .finish_non_exhaustive()
    }
}

/// Scoped ownership of a continuous-reload worker.
///
/// After `shutdown` returns (or the handle is dropped) the worker has exited
/// and will not publish again.
#[derive(Debug)]
pub struct ReloadHandle {
    shutdown: Option<Sender<()>>,
    join: Option<JoinHandle<()>>,
    stopped: Arc<AtomicBool>,
    controller: Arc<ReloadController>,
}

impl ReloadHandle {
    /// True while the worker thread is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.join.as_ref().is_some_and(|j| !j.is_finished())
    }

    /// Stops the worker and waits for it to exit.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        {
            // Set under the apply lock: no cycle may start after this.
            let _guard = self.controller.lock_apply();
            self.stopped.store(true, Ordering::Release);
        }
        drop(self.shutdown.take());
        if let Some(join) = self.join.take() {
            if join.join().is_err() {
                warn!("reload worker panicked");
            }
        }
    }
}

impl Drop for ReloadHandle {
    fn drop(&mut self) {
        if self.join.is_some() {
            self.stop();
        }
    }
}
