//! Error types for regconf.
//!
//! All errors are strongly typed using thiserror. Leaf enums cover one concern
//! each (registry, cache, merge, validation); `ConfigError` is the top-level type
//! returned by the controller and provider.

use thiserror::Error;

/// Validation errors for reload configuration and mapping rules.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A continuous-reload delay of zero.
    #[error("Reload delay must be greater than zero")]
    ZeroReloadDelay,

    /// An initial-load timeout of zero.
    #[error("Initial load timeout must be greater than zero")]
    ZeroInitialTimeout,

    /// A rule field that must name something is blank.
    #[error("Required field '{field}' is empty")]
    EmptyField {
        /// Dotted path of the offending field.
        field: String,
    },

    /// A configuration document that does not parse or is out of range.
    #[error("Invalid reload configuration: {reason}")]
    InvalidConfig {
        /// What is wrong with it.
        reason: String,
    },
}

/// Failures retrieving live data from the registry.
///
/// Every variant is a transient registry error: recoverable from the emergency
/// cache during initial load, and by waiting and resubscribing during reload.
#[derive(Debug, Clone, Error)]
pub enum RegistryError {
    /// The registry could not be reached.
    #[error("Registry unavailable: {message}")]
    Unavailable {
        /// Description from the observer.
        message: String,
    },

    /// The snapshot stream ended without an error item.
    #[error("Registry snapshot stream disconnected")]
    Disconnected,

    /// No snapshot arrived in time.
    #[error("No registry snapshot within {duration_ms}ms")]
    Timeout {
        /// The timeout that expired.
        duration_ms: u64,
    },

    /// The registry answered with something the observer could not use.
    #[error("Registry protocol error: {message}")]
    Protocol {
        /// Description from the observer.
        message: String,
    },
}

impl RegistryError {
    /// Creates an unavailable error.
    #[must_use]
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }
}

/// Emergency cache failures.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Reading or writing the cache failed.
    #[error("Cache I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The stored copy failed its integrity checks.
    #[error("Cache file corrupted: {reason}")]
    Corrupted {
        /// Which check failed.
        reason: String,
    },

    /// The configuration could not be encoded.
    #[error("Cache serialization error: {message}")]
    Serialization {
        /// Encoder error text.
        message: String,
    },
}

/// Failures while merging a snapshot into a flat configuration.
#[derive(Debug, Error)]
pub enum MergeError {
    /// A bind function returned an error.
    #[error("Binding service '{service}' failed: {reason}")]
    Bind {
        /// Service being bound.
        service: String,
        /// Why binding failed.
        reason: String,
    },

    /// A bind function panicked.
    #[error("Binding service '{service}' panicked")]
    BindPanicked {
        /// Service being bound.
        service: String,
    },
}

impl MergeError {
    /// Creates a bind error for the given service.
    #[must_use]
    pub fn bind(service: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Bind {
            service: service.into(),
            reason: reason.into(),
        }
    }
}

/// Top-level error type for regconf.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Invalid configuration or rules.
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Transient registry failure.
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    /// Emergency cache failure.
    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    /// Merging a snapshot failed.
    #[error("Merge error: {0}")]
    Merge(#[from] MergeError),

    /// Live retrieval failed and no emergency cache was available.
    #[error("Configuration could not be loaded and no cached copy exists: {cause}")]
    FatalLoad {
        /// The live-path failure.
        #[source]
        cause: Box<ConfigError>,
    },

    /// The controller is gone; no further changes will arrive.
    #[error("Reload controller has been shut down")]
    ShutDown,

    /// Unexpected failure inside the crate.
    #[error("Internal error: {message}")]
    Internal {
        /// Description of the failure.
        message: String,
    },
}

impl ConfigError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Wraps the cause of a failed initial load.
    #[must_use]
    pub fn fatal(cause: Self) -> Self {
        Self::FatalLoad {
            cause: Box::new(cause),
        }
    }

    /// Returns true for fatal configuration load errors.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::FatalLoad { .. })
    }

    /// Returns true if this is a transient registry error.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Registry(_))
    }

    /// The underlying cause of a fatal load, if this is one.
    #[must_use]
    pub fn fatal_cause(&self) -> Option<&Self> {
        match self {
            Self::FatalLoad { cause } => Some(&**cause),
            _ => None,
        }
    }

    /// Returns true if this error may go away on retry.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Registry(_) => true,
            Self::Cache(e) => matches!(e, CacheError::Io(_)),
            Self::Validation(_)
            | Self::Merge(_)
            | Self::FatalLoad { .. }
            | Self::ShutDown
            | Self::Internal { .. } => false,
        }
    }
}

/// Result type alias for regconf operations.
pub type ConfigResult<T> = Result<T, ConfigError>;
