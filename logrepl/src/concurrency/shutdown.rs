//! Shutdown signaling for streaming sessions.
//!
//! A shutdown is a one-shot, sticky event: once [`ShutdownTx::shutdown`] has been called every
//! present and future wait on a [`ShutdownRx`] completes immediately. Dropping the sender without
//! signaling never counts as a shutdown.

use tokio::sync::watch;

/// Transmitter side of the shutdown channel.
#[derive(Debug, Clone)]
pub struct ShutdownTx(watch::Sender<bool>);

impl ShutdownTx {
    /// Signals shutdown to all receivers.
    pub fn shutdown(&self) {
        // `send_replace` stores the value even when no receiver is currently alive.
        self.0.send_replace(true);
    }

    /// Creates a new receiver observing this sender.
    pub fn subscribe(&self) -> ShutdownRx {
        ShutdownRx(self.0.subscribe())
    }
}

/// Receiver side of the shutdown channel.
#[derive(Debug, Clone)]
pub struct ShutdownRx(watch::Receiver<bool>);

impl ShutdownRx {
    /// Returns `true` if shutdown has already been signaled.
    pub fn is_shutdown(&self) -> bool {
        *self.0.borrow()
    }

    /// Waits until shutdown is signaled.
    ///
    /// Stays pending forever if the sender is dropped without signaling, so this future can be
    /// raced in a `select!` without spurious cancellations.
    pub async fn wait(&mut self) {
        if self.0.wait_for(|shutdown| *shutdown).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Creates a new shutdown channel in the running state.
pub fn create_shutdown_channel() -> (ShutdownTx, ShutdownRx) {
    let (tx, rx) = watch::channel(false);
    (ShutdownTx(tx), ShutdownRx(rx))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn wait_completes_after_shutdown() {
        let (tx, mut rx) = create_shutdown_channel();
        assert!(!rx.is_shutdown());

        tx.shutdown();

        rx.wait().await;
        assert!(rx.is_shutdown());
        // The signal is sticky.
        rx.wait().await;
    }

    #[tokio::test]
    async fn late_subscribers_observe_shutdown() {
        let (tx, _rx) = create_shutdown_channel();
        tx.shutdown();

        let mut late = tx.subscribe();
        assert!(late.is_shutdown());
        late.wait().await;
    }

    #[tokio::test]
    async fn dropped_sender_is_not_a_shutdown() {
        let (tx, mut rx) = create_shutdown_channel();
        drop(tx);

        let waited = tokio::time::timeout(Duration::from_millis(20), rx.wait()).await;
        assert!(waited.is_err());
        assert!(!rx.is_shutdown());
    }
}
