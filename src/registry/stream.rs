use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender};

use crate::error::RegistryError;

use super::snapshot::RegistrySnapshot;

/// One item delivered by a snapshot stream.
pub type SnapshotItem = Result<Arc<RegistrySnapshot>, RegistryError>;

/// Producer half of a snapshot stream, held by the registry observer.
///
/// Dropping every sender ends the stream with `RegistryError::Disconnected`.
#[derive(Debug, Clone)]
pub struct SnapshotSender {
    tx: Sender<SnapshotItem>,
}

impl SnapshotSender {
    /// Delivers the next snapshot.
    ///
    /// Fails with `Disconnected` once the consumer has dropped its stream.
    pub fn send(&self, snapshot: Arc<RegistrySnapshot>) -> Result<(), RegistryError> {
        self.tx.send(Ok(snapshot)).map_err(|_| RegistryError::Disconnected)
    }

    /// Terminates the stream with an error. Consumers treat the stream as
    /// finished after the first error.
    pub fn fail(self, error: RegistryError) {
        let _ = self.tx.send(Err(error));
    }
}

/// A sequential stream of registry snapshots.
///
/// Snapshots arrive one at a time, in the order the observer produced them.
/// The stream ends either with an error item or with disconnection.
#[derive(Debug)]
pub struct SnapshotStream {
    rx: Receiver<SnapshotItem>,
}

impl SnapshotStream {
    /// Creates an unbounded stream and its sender.
    #[must_use]
    pub fn channel() -> (SnapshotSender, Self) {
        let (tx, rx) = unbounded();
        (SnapshotSender { tx }, Self { rx })
    }

    /// Creates a stream that buffers at most `capacity` undelivered snapshots.
    #[must_use]
    pub fn bounded(capacity: usize) -> (SnapshotSender, Self) {
        let (tx, rx) = bounded(capacity.max(1));
        (SnapshotSender { tx }, Self { rx })
    }

    /// Receive the next snapshot (blocking).
    pub fn recv(&self) -> Result<Arc<RegistrySnapshot>, RegistryError> {
        self.rx.recv().map_err(|_| RegistryError::Disconnected)?
    }

    /// Receive the next snapshot with a timeout.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<Arc<RegistrySnapshot>, RegistryError> {
        self.rx.recv_timeout(timeout).map_err(|err| match err {
            RecvTimeoutError::Timeout => RegistryError::Timeout {
                duration_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            },
            RecvTimeoutError::Disconnected => RegistryError::Disconnected,
        })?
    }

    pub(crate) const fn receiver(&self) -> &Receiver<SnapshotItem> {
        &self.rx
    }
}
