//! Shutdown signalling for started broadcasters.
//!
//! [`HeadBroadcaster::start`] takes a `broadcast::Receiver<()>`; the feed
//! task listens on it and closes the broadcaster when a message arrives.
//! [`ShutdownController`] hands out those receivers and fires them once,
//! either on SIGINT/SIGTERM or when [`shutdown`](ShutdownController::shutdown)
//! is called.
//!
//! [`HeadBroadcaster::start`]: crate::HeadBroadcaster

use std::sync::atomic::{AtomicBool, Ordering};

use tokio::signal;
use tokio::sync::broadcast;

/// Why [`ShutdownController::wait_for_signal`] returned.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShutdownReason {
    Interrupt,
    Terminate,
    /// `shutdown()` was called, e.g. by a component that gave up.
    Requested,
}

/// Source of the shutdown receivers passed to `start`.
pub struct ShutdownController {
    tx: broadcast::Sender<()>,
    triggered: AtomicBool,
}

impl ShutdownController {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1);
        Self {
            tx,
            triggered: AtomicBool::new(false),
        }
    }

    /// A receiver for `HeadBroadcaster::start`.
    ///
    /// Receivers taken after shutdown fired never see it; check
    /// [`is_triggered`](Self::is_triggered) before starting late services.
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.tx.subscribe()
    }

    /// Fire every receiver. Only the first call has an effect.
    pub fn shutdown(&self) {
        if self.triggered.swap(true, Ordering::AcqRel) {
            return;
        }
        let notified = self.tx.send(()).unwrap_or(0);
        tracing::debug!(receivers = notified, "shutdown triggered");
    }

    pub fn is_triggered(&self) -> bool {
        self.triggered.load(Ordering::Acquire)
    }

    /// Wait for SIGINT, SIGTERM or a programmatic [`shutdown`](Self::shutdown),
    /// then fire every receiver.
    pub async fn wait_for_signal(&self) -> ShutdownReason {
        let mut requested = self.tx.subscribe();
        if self.is_triggered() {
            return ShutdownReason::Requested;
        }

        #[cfg(unix)]
        let terminate = async {
            match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    sigterm.recv().await;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "SIGTERM handler unavailable");
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        let reason = tokio::select! {
            _ = signal::ctrl_c() => ShutdownReason::Interrupt,
            _ = terminate => ShutdownReason::Terminate,
            _ = requested.recv() => ShutdownReason::Requested,
        };
        tracing::info!(reason = ?reason, "shutting down");

        self.shutdown();
        reason
    }
}

impl Default for ShutdownController {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn every_receiver_is_fired_once() {
        let controller = ShutdownController::new();
        let mut rx1 = controller.subscribe();
        let mut rx2 = controller.subscribe();
        controller.shutdown();
        controller.shutdown();

        assert!(controller.is_triggered());
        assert!(rx1.recv().await.is_ok());
        assert!(rx2.recv().await.is_ok());
        assert!(rx1.try_recv().is_err());
    }

    #[tokio::test]
    async fn requested_shutdown_ends_the_wait() {
        let controller = std::sync::Arc::new(ShutdownController::new());
        let waiter = {
            let controller = std::sync::Arc::clone(&controller);
            tokio::spawn(async move { controller.wait_for_signal().await })
        };
        tokio::task::yield_now().await;
        controller.shutdown();

        let reason = tokio::time::timeout(std::time::Duration::from_secs(2), waiter)
            .await
            .expect("wait ends on request")
            .unwrap();
        assert_eq!(reason, ShutdownReason::Requested);
    }

    #[tokio::test]
    async fn waiting_after_shutdown_returns_at_once() {
        let controller = ShutdownController::new();
        controller.shutdown();
        assert_eq!(controller.wait_for_signal().await, ShutdownReason::Requested);
    }
}
