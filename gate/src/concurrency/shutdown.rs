//! Shutdown signaling for background workers.
//!
//! A single [`ShutdownTx`] stops every worker holding a [`ShutdownRx`] subscribed to it. Once
//! sent, the signal stays set.

use tokio::sync::watch;

/// Sending side of the shutdown signal.
#[derive(Debug)]
pub struct ShutdownTx(watch::Sender<bool>);

impl ShutdownTx {
    /// Signals every subscribed worker to stop.
    pub fn shutdown(&self) {
        self.0.send_replace(true);
    }

    /// Returns a new receiver for this signal.
    pub fn subscribe(&self) -> ShutdownRx {
        ShutdownRx(self.0.subscribe())
    }
}

/// Receiving side of the shutdown signal.
#[derive(Debug, Clone)]
pub struct ShutdownRx(watch::Receiver<bool>);

impl ShutdownRx {
    /// Returns `true` if shutdown was signaled.
    pub fn is_shutdown(&self) -> bool {
        *self.0.borrow()
    }

    /// Completes once shutdown is signaled, or when the sender is dropped.
    pub async fn wait_for_shutdown(&mut self) {
        let _ = self.0.wait_for(|shutdown| *shutdown).await;
    }
}

/// Creates a shutdown signal that is not set.
pub fn create_shutdown_channel() -> (ShutdownTx, ShutdownRx) {
    let (tx, rx) = watch::channel(false);
    (ShutdownTx(tx), ShutdownRx(rx))
}
