use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};

use crate::error::{ConfigError, ConfigResult};

/// Notice that the current configuration was replaced.
///
/// Carries nothing; subscribers re-read the current configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfigChanged;

/// Subscriber side of change notifications.
///
/// Dropping the stream unsubscribes it on the next notification.
#[derive(Debug)]
pub struct ChangeStream {
    rx: Receiver<ConfigChanged>,
}

impl ChangeStream {
    /// Waits for the next change (blocking).
    pub fn recv(&self) -> ConfigResult<ConfigChanged> {
        self.rx.recv().map_err(|_| ConfigError::ShutDown)
    }

    /// Waits for the next change with a timeout. `None` on timeout or once
    /// the controller is gone.
    #[must_use]
    pub fn recv_timeout(&self, timeout: Duration) -> Option<ConfigChanged> {
        self.rx.recv_timeout(timeout).ok()
    }

    /// Returns true if a change is pending, consuming it.
    #[must_use]
    pub fn try_recv(&self) -> bool {
        self.rx.try_recv().is_ok()
    }
}

/// Fans change notices out to subscribers without ever blocking the
/// publishing thread.
#[derive(Debug)]
pub(crate) struct ChangeNotifier {
    capacity: usize,
    subscribers: Mutex<Vec<Sender<ConfigChanged>>>,
    dropped: AtomicU64,
}

impl ChangeNotifier {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            subscribers: Mutex::new(Vec::new()),
            dropped: AtomicU64::new(0),
        }
    }

    pub(crate) fn subscribe(&self) -> ChangeStream {
        let (tx, rx) = bounded(self.capacity);
        self.lock().push(tx);
        ChangeStream { rx }
    }

    pub(crate) fn notify(&self) {
        let mut subs = self.lock();
        // Never block the reload thread: drop the notice if a subscriber is slow.
        subs.retain(|tx| match tx.try_send(ConfigChanged) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(TrySendError::Disconnected(_)) => false,
        });
    }

    pub(crate) fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    #[cfg(test)]
    pub(crate) fn subscriber_count(&self) -> usize {
        self.lock().len()
    }

    // A sender list is valid after any panic; poisoning is ignored.
    fn lock(&self) -> MutexGuard<'_, Vec<Sender<ConfigChanged>>> {
        self.subscribers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
