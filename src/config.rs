//! Reload controller configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult, ValidationError};
use crate::retry::ReloadDelay;

/// How the controller loads and reloads.
///
/// Serialized with durations in milliseconds:
/// ```json
/// { "reload_delay_ms": 5000, "initial_load_timeout_ms": 30000, "notification_capacity": 16 }
/// ```
/// `reload_delay_ms: null` (or absent) disables continuous reload;
/// `initial_load_timeout_ms: null` waits for the first snapshot forever.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReloadConfig {
    /// Continuous reload switch and resubscription delay.
    #[serde(rename = "reload_delay_ms")]
    pub reload_delay: ReloadDelay,
    /// Upper bound on waiting for the first live snapshot.
    #[serde(rename = "initial_load_timeout_ms", with = "millis")]
    pub initial_load_timeout: Option<Duration>,
    /// Buffered change notices per subscriber before notices are dropped.
    pub notification_capacity: usize,
}

impl Default for ReloadConfig {
    fn default() -> Self {
        Self {
            reload_delay: ReloadDelay::Never,
            initial_load_timeout: Some(Self::DEFAULT_INITIAL_TIMEOUT),
            notification_capacity: 16,
        }
    }
}

impl ReloadConfig {
    const DEFAULT_INITIAL_TIMEOUT: Duration = Duration::from_secs(30);

    /// Enables continuous reload with a fixed resubscription delay.
    #[must_use]
    pub fn with_reload_delay(mut self, delay: Duration) -> Self {
        self.reload_delay = ReloadDelay::After(delay);
        self
    }

    /// Sets (or with `None`, removes) the initial load timeout.
    #[must_use]
    pub fn with_initial_load_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.initial_load_timeout = timeout;
        self
    }

    /// Sets the per-subscriber change notice buffer.
    #[must_use]
    pub fn with_notification_capacity(mut self, capacity: usize) -> Self {
        self.notification_capacity = capacity;
        self
    }

    /// Parses a JSON document and validates it.
    pub fn from_json(json: &str) -> ConfigResult<Self> {
        let cfg: Self = serde_json::from_str(json).map_err(|e| {
            ConfigError::Validation(ValidationError::InvalidConfig {
                reason: e.to_string(),
            })
        })?;
        cfg.validate()
    }

    /// Checks the configuration, returning it unchanged when valid.
    ///
    /// # Errors
    /// `ConfigError::Validation` for a zero reload delay, a zero initial-load
    /// timeout or a zero notification capacity.
    pub fn validate(self) -> ConfigResult<Self> {
        if matches!(self.reload_delay, ReloadDelay::After(d) if d.is_zero()) {
            return Err(ValidationError::ZeroReloadDelay.into());
        }
        if matches!(self.initial_load_timeout, Some(d) if d.is_zero()) {
            return Err(ValidationError::ZeroInitialTimeout.into());
        }
        if self.notification_capacity == 0 {
            return Err(ValidationError::InvalidConfig {
                reason: "notification_capacity must be at least 1".to_string(),
            }
            .into());
        }
        Ok(self)
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => serializer.serialize_some(&u64::try_from(d.as_millis()).unwrap_or(u64::MAX)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
    }
}
