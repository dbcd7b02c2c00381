//! Continuous-reload subscription with fixed-delay resubscription.
//!
//! `ResilientSubscription` wraps a `RegistryObserver` and yields snapshots one
//! at a time. When the underlying stream fails (or `observe` itself fails) it
//! reports the failure, waits the policy delay, and resubscribes. There is no
//! backoff growth and no retry limit. A shutdown signal interrupts both the
//! wait and a pending receive.

use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{select, Receiver, RecvTimeoutError};
use serde::{Deserialize, Serialize};

use crate::error::RegistryError;
use crate::registry::{DependencySpec, RegistryObserver, RegistrySnapshot, SnapshotStream};

/// Delay between continuous-reload resubscriptions.
///
/// `Never` disables continuous reload altogether.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Option<u64>", into = "Option<u64>")]
pub enum ReloadDelay {
    /// Continuous reload is off.
    #[default]
    Never,
    /// Resubscribe this long after each failure.
    After(Duration),
}

impl ReloadDelay {
    /// `None` maps to `Never`.
    #[must_use]
    pub const fn from_option(delay: Option<Duration>) -> Self {
        match delay {
            Some(d) => Self::After(d),
            None => Self::Never,
        }
    }

    /// The delay, or `None` for `Never`.
    #[must_use]
    pub const fn as_duration(self) -> Option<Duration> {
        match self {
            Self::Never => None,
            Self::After(d) => Some(d),
        }
    }

    /// Returns true if continuous reload is on.
    #[must_use]
    pub const fn is_enabled(self) -> bool {
        matches!(self, Self::After(_))
    }
}

// Serialized as milliseconds; `null` is `Never`.
impl From<Option<u64>> for ReloadDelay {
    fn from(ms: Option<u64>) -> Self {
        Self::from_option(ms.map(Duration::from_millis))
    }
}

impl From<ReloadDelay> for Option<u64> {
    fn from(delay: ReloadDelay) -> Self {
        delay
            .as_duration()
            .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
    }
}

/// Fixed-delay, unlimited retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    delay: Duration,
}

impl RetryPolicy {
    /// Waits `delay` before every resubscription.
    #[must_use]
    pub const fn fixed(delay: Duration) -> Self {
        Self { delay }
    }

    /// Delay before resubscription attempt `attempt` (1-based). Constant.
    #[must_use]
    pub const fn delay_for(&self, _attempt: u64) -> Duration {
        self.delay
    }
}

/// What the subscription produced on one `next` call.
#[derive(Debug)]
pub enum SubscriptionEvent {
    /// The next snapshot, in delivery order.
    Snapshot(Arc<RegistrySnapshot>),
    /// The stream (or the subscribe call) failed. The next call waits the
    /// retry delay, then resubscribes.
    Failed(RegistryError),
    /// Shutdown was requested.
    Shutdown,
}

/// Snapshot subscription that resubscribes after failures.
pub struct ResilientSubscription {
    observer: Arc<dyn RegistryObserver>,
    deps: DependencySpec,
    policy: RetryPolicy,
    shutdown: Receiver<()>,
    stream: Option<SnapshotStream>,
    consecutive_failures: u64,
}

impl ResilientSubscription {
    /// Creates an idle subscription. Nothing is observed until `next`.
    ///
    /// Any message on `shutdown`, or dropping its sender, stops the
    /// subscription.
    pub fn new(
        observer: Arc<dyn RegistryObserver>,
        deps: DependencySpec,
        policy: RetryPolicy,
        shutdown: Receiver<()>,
    ) -> Self {
        Self {
            observer,
            deps,
            policy,
            shutdown,
            stream: None,
            consecutive_failures: 0,
        }
    }

    /// Failures since the last delivered snapshot.
    #[must_use]
    pub const fn consecutive_failures(&self) -> u64 {
        self.consecutive_failures
    }

    /// Blocks until the next snapshot, failure or shutdown.
    pub fn next(&mut self) -> SubscriptionEvent {
        if self.consecutive_failures > 0 && self.wait(self.policy.delay_for(self.consecutive_failures)) {
            return SubscriptionEvent::Shutdown;
        }

        let stream = match self.stream.take() {
            Some(stream) => stream,
            None => match self.observer.observe(&self.deps) {
                Ok(stream) => stream,
                Err(err) => return self.failed(err),
            },
        };

        let received = select! {
            recv(self.shutdown) -> _ => None,
            recv(stream.receiver()) -> msg => Some(msg),
        };

        match received {
            None => SubscriptionEvent::Shutdown,
            Some(Ok(Ok(snapshot))) => {
                self.consecutive_failures = 0;
                self.stream = Some(stream);
                SubscriptionEvent::Snapshot(snapshot)
            }
            Some(Ok(Err(err))) => self.failed(err),
            Some(Err(_)) => self.failed(RegistryError::Disconnected),
        }
    }

    fn failed(&mut self, err: RegistryError) -> SubscriptionEvent {
        self.stream = None;
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        SubscriptionEvent::Failed(err)
    }

    // True if shutdown was signalled while waiting.
    fn wait(&self, delay: Duration) -> bool {
        !matches!(self.shutdown.recv_timeout(delay), Err(RecvTimeoutError::Timeout))
    }
}
