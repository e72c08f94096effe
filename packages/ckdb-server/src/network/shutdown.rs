//! Shutdown coordination between the listener, the signal task, and the
//! main thread.

use tokio::sync::watch;

/// Broadcasts the single shutdown transition.
///
/// The listener selects on a receiver alongside its accept loop; a
/// `shutdown` verb or a termination signal triggers the same path.
#[derive(Debug)]
pub struct ShutdownController {
    signal: watch::Sender<bool>,
}

impl ShutdownController {
    /// Creates a controller with shutdown not yet triggered.
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { signal: tx }
    }

    /// Returns a receiver notified when shutdown is triggered.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.signal.subscribe()
    }

    /// Trigger shutdown. Idempotent; receivers may already be gone.
    pub fn trigger(&self) {
        let _ = self.signal.send(true);
    }

    /// Whether shutdown has been triggered.
    #[must_use]
    pub fn is_triggered(&self) -> bool {
        *self.signal.borrow()
    }
}

impl Default for ShutdownController {
    fn default() -> Self {
        Self::new()
    }
}
