//! Per-subscriber delivery workers.
//!
//! ```text
//! broadcast(head)
//!     │
//!     ├──► [queue 1] ──► worker 1 ──► sub1.on_new_longest_chain()
//!     │   (unbounded)         └──────► panic / timeout → logged, next head
//!     ├──► [queue 2] ──► worker 2 ──► sub2.on_new_longest_chain()
//!     └──► [queue N] ──► worker N ──► subN.on_new_longest_chain()
//! ```
//!
//! Each worker drains its own FIFO queue, so a subscriber sees heads in
//! broadcast order while a slow or wedged one only delays itself.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use headcast_types::Head;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::Instrument;

use crate::metrics::BroadcasterMetrics;
use crate::registry::SubscriberId;
use crate::subscriber::HeadTrackable;
use crate::tracing_spans::delivery_span;

/// One head queued for one subscriber.
pub(crate) struct Delivery {
    pub(crate) head: Arc<Head>,
    /// Signalled once the callback finished, timed out or panicked.
    /// Only set in synchronous delivery mode.
    pub(crate) ack: Option<oneshot::Sender<()>>,
}

/// How a single callback invocation ended.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum CallbackOutcome {
    Completed,
    TimedOut,
    Panicked(String),
}

pub(crate) struct DeliveryWorker {
    pub(crate) id: SubscriberId,
    pub(crate) name: Arc<str>,
    pub(crate) subscriber: Arc<dyn HeadTrackable>,
    /// Cleared by the registry on removal; checked before every callback.
    pub(crate) active: Arc<AtomicBool>,
    /// Heads queued but not yet taken by this worker.
    pub(crate) backlog: Arc<AtomicUsize>,
    pub(crate) callback_timeout: Option<Duration>,
    pub(crate) metrics: Arc<BroadcasterMetrics>,
}

impl DeliveryWorker {
    /// Spawn the worker loop. It runs until the queue is closed, the
    /// subscriber is deactivated, or the task is aborted.
    pub(crate) fn spawn(self, mut rx: mpsc::UnboundedReceiver<Delivery>) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(delivery) = rx.recv().await {
                self.backlog.fetch_sub(1, Ordering::AcqRel);
                if !self.active.load(Ordering::Acquire) {
                    break;
                }
                self.deliver(delivery).await;
            }
            tracing::trace!(subscriber = %self.name, id = %self.id, "delivery worker exited");
        })
    }

    async fn deliver(&self, delivery: Delivery) {
        let Delivery { head, ack } = delivery;
        let span = delivery_span(&self.name, self.id.get(), head.number);

        let started = Instant::now();
        let outcome = run_callback(self.subscriber.as_ref(), &head, self.callback_timeout)
            .instrument(span)
            .await;
        self.metrics
            .delivery_duration_ms
            .observe(started.elapsed().as_secs_f64() * 1_000.0);

        match outcome {
            CallbackOutcome::Completed => self.metrics.deliveries.inc(),
            CallbackOutcome::TimedOut => {
                self.metrics.delivery_timeouts.inc();
                tracing::warn!(
                    subscriber = %self.name,
                    id = %self.id,
                    number = head.number,
                    timeout_ms = self.callback_timeout.map_or(0, |t| t.as_millis() as u64),
                    "subscriber callback timed out, abandoning delivery"
                );
            }
            CallbackOutcome::Panicked(message) => {
                self.metrics.subscriber_panics.inc();
                tracing::error!(
                    subscriber = %self.name,
                    id = %self.id,
                    number = head.number,
                    panic = %message,
                    "subscriber callback panicked"
                );
            }
        }

        if let Some(ack) = ack {
            let _ = ack.send(());
        }
    }
}

/// Invoke one callback with panic isolation and an optional time bound.
pub(crate) async fn run_callback(
    subscriber: &dyn HeadTrackable,
    head: &Head,
    timeout: Option<Duration>,
) -> CallbackOutcome {
    let guarded = AssertUnwindSafe(subscriber.on_new_longest_chain(head)).catch_unwind();

    let result = match timeout {
        Some(limit) => match tokio::time::timeout(limit, guarded).await {
            Ok(result) => result,
            Err(_) => return CallbackOutcome::TimedOut,
        },
        None => guarded.await,
    };

    match result {
        Ok(()) => CallbackOutcome::Completed,
        Err(panic) => CallbackOutcome::Panicked(panic_message(panic.as_ref())),
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&'static str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use headcast_types::{BlockHash, Timestamp};

    fn head(number: u64) -> Head {
        Head::new(
            number,
            BlockHash::new([number as u8; 32]),
            BlockHash::ZERO,
            Timestamp::new(number),
        )
    }

    struct Quick;

    #[async_trait]
    impl HeadTrackable for Quick {
        async fn on_new_longest_chain(&self, _head: &Head) {}
    }

    struct Panics;

    #[async_trait]
    impl HeadTrackable for Panics {
        async fn on_new_longest_chain(&self, head: &Head) {
            panic!("cannot handle {}", head.number);
        }
    }

    struct Hangs;

    #[async_trait]
    impl HeadTrackable for Hangs {
        async fn on_new_longest_chain(&self, _head: &Head) {
            std::future::pending::<()>().await;
        }
    }

    #[tokio::test]
    async fn completed_callback() {
        let outcome = run_callback(&Quick, &head(1), Some(Duration::from_secs(1))).await;
        assert_eq!(outcome, CallbackOutcome::Completed);
    }

    #[tokio::test]
    async fn panic_is_caught_with_message() {
        let outcome = run_callback(&Panics, &head(7), None).await;
        assert_eq!(outcome, CallbackOutcome::Panicked("cannot handle 7".into()));
    }

    #[tokio::test]
    async fn hanging_callback_times_out() {
        let outcome = run_callback(&Hangs, &head(1), Some(Duration::from_millis(20))).await;
        assert_eq!(outcome, CallbackOutcome::TimedOut);
    }

    #[tokio::test]
    async fn worker_survives_panics_and_acks_every_head() {
        let (tx, rx) = mpsc::unbounded_channel();
        let metrics = Arc::new(BroadcasterMetrics::new());
        let worker = DeliveryWorker {
            id: SubscriberId::new(1),
            name: Arc::from("panics"),
            subscriber: Arc::new(Panics),
            active: Arc::new(AtomicBool::new(true)),
            backlog: Arc::new(AtomicUsize::new(2)),
            callback_timeout: None,
            metrics: Arc::clone(&metrics),
        }
        .spawn(rx);

        for n in 1..=2 {
            let (ack_tx, ack_rx) = oneshot::channel();
            tx.send(Delivery {
                head: Arc::new(head(n)),
                ack: Some(ack_tx),
            })
            .unwrap();
            ack_rx.await.expect("worker acknowledges after a panic");
        }

        assert_eq!(metrics.subscriber_panics.get(), 2);
        drop(tx);
        worker.await.unwrap();
    }

    #[tokio::test]
    async fn inactive_worker_stops_before_delivering() {
        let (tx, rx) = mpsc::unbounded_channel();
        let metrics = Arc::new(BroadcasterMetrics::new());
        let active = Arc::new(AtomicBool::new(false));
        let worker = DeliveryWorker {
            id: SubscriberId::new(2),
            name: Arc::from("quick"),
            subscriber: Arc::new(Quick),
            active,
            backlog: Arc::new(AtomicUsize::new(1)),
            callback_timeout: None,
            metrics: Arc::clone(&metrics),
        }
        .spawn(rx);

        tx.send(Delivery {
            head: Arc::new(head(1)),
            ack: None,
        })
        .unwrap();
        worker.await.unwrap();
        assert_eq!(metrics.deliveries.get(), 0);
    }
}
