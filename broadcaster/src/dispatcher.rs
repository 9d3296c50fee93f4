//! Head broadcaster. Owns the latest head and fans new heads out.
//!
//! ```text
//! HeadFeed ──► feed task ──► broadcast_new_longest_chain(head)
//!                                 │  (sequencing lock)
//!                                 ├─ stale? ──► no-op
//!                                 ├─ latest = head
//!                                 ├─ snapshot registry
//!                                 └─ push to each subscriber queue
//! ```
//!
//! The sequencing lock is also taken by `subscribe`, so a new subscriber
//! either sees a concurrent broadcast in its returned head or in its queue,
//! never both and never neither.

use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use headcast_types::Head;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, oneshot, Notify, OnceCell};
use tokio::task::JoinHandle;
use tracing::Instrument;

use crate::config::{BroadcasterConfig, DeliveryMode};
use crate::delivery::Delivery;
use crate::feed::HeadFeed;
use crate::lifecycle::{HealthReport, Service, ServiceState, StateCell};
use crate::metrics::BroadcasterMetrics;
use crate::registry::{SubscriberRegistry, Unsubscribe};
use crate::subscriber::HeadTrackable;
use crate::tracing_spans::{broadcast_span, feed_span};
use crate::{BroadcasterError, FeedError};

/// Result of a single `broadcast_new_longest_chain` call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BroadcastOutcome {
    /// The head became the latest head and was queued for this many
    /// subscribers.
    Delivered { subscribers: usize },
    /// The head did not advance past `latest` and was ignored.
    Stale { latest: u64 },
}

/// Tracks the chain tip and notifies every subscriber of each new head.
///
/// Cheap to clone; clones share the same state.
#[derive(Clone)]
pub struct HeadBroadcaster {
    shared: Arc<Shared>,
}

struct Shared {
    config: BroadcasterConfig,
    state: StateCell,
    /// Latest head. Its mutex is the sequencing lock for broadcast and
    /// subscribe.
    latest: Mutex<Option<Arc<Head>>>,
    /// Serializes whole broadcasts in synchronous mode.
    sync_gate: tokio::sync::Mutex<()>,
    registry: Arc<SubscriberRegistry>,
    feed: Option<Arc<dyn HeadFeed>>,
    feed_error: Mutex<Option<FeedError>>,
    feed_task: Mutex<Option<JoinHandle<()>>>,
    stop: Notify,
    /// Outcome of the one shutdown; every `close` caller waits on it.
    close_result: OnceCell<Result<(), BroadcasterError>>,
    metrics: Arc<BroadcasterMetrics>,
}

impl HeadBroadcaster {
    /// A broadcaster without an upstream feed. It accepts subscribers but
    /// cannot be started.
    pub fn new(config: BroadcasterConfig) -> Self {
        Self::build(config, None)
    }

    pub fn with_feed(config: BroadcasterConfig, feed: Arc<dyn HeadFeed>) -> Self {
        Self::build(config, Some(feed))
    }

    fn build(config: BroadcasterConfig, feed: Option<Arc<dyn HeadFeed>>) -> Self {
        let metrics = Arc::new(BroadcasterMetrics::new());
        let registry = Arc::new(SubscriberRegistry::new(
            config.callback_timeout(),
            Arc::clone(&metrics),
        ));
        Self {
            shared: Arc::new(Shared {
                config,
                state: StateCell::new(),
                latest: Mutex::new(None),
                sync_gate: tokio::sync::Mutex::new(()),
                registry,
                feed,
                feed_error: Mutex::new(None),
                feed_task: Mutex::new(None),
                stop: Notify::new(),
                close_result: OnceCell::new(),
                metrics,
            }),
        }
    }

    /// Register a subscriber.
    ///
    /// Returns the latest head at registration time (if any) and a handle
    /// that removes the subscription. Every head broadcast after this
    /// returns is delivered to `callback`. After `close` the subscription is
    /// inert: the head is still returned but nothing is ever delivered.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn subscribe(&self, callback: Arc<dyn HeadTrackable>) -> (Option<Head>, Unsubscribe) {
        let latest = self
            .shared
            .latest
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let current = latest.as_deref().cloned();

        match self.shared.registry.add(callback) {
            Some(id) => (current, Unsubscribe::new(id, &self.shared.registry)),
            None => {
                tracing::debug!(
                    broadcaster = %self.shared.config.name,
                    "subscribe after close, subscription is inert"
                );
                (current, Unsubscribe::inert())
            }
        }
    }

    /// Make `head` the latest head and deliver it to every subscriber.
    ///
    /// Heads whose number does not exceed the latest head's are ignored.
    /// Fails with `NotStarted` before `start` and `Closed` after `close`.
    pub async fn broadcast_new_longest_chain(
        &self,
        head: Head,
    ) -> Result<BroadcastOutcome, BroadcasterError> {
        self.shared.state.ready()?;
        self.shared.broadcast(head).await
    }

    pub fn latest_head(&self) -> Option<Head> {
        self.shared
            .latest
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_deref()
            .cloned()
    }

    pub fn subscriber_count(&self) -> usize {
        self.shared.registry.len()
    }

    pub fn state(&self) -> ServiceState {
        self.shared.state.get()
    }

    pub fn config(&self) -> &BroadcasterConfig {
        &self.shared.config
    }

    pub fn metrics(&self) -> &BroadcasterMetrics {
        &self.shared.metrics
    }
}

impl Shared {
    async fn broadcast(&self, head: Head) -> Result<BroadcastOutcome, BroadcasterError> {
        self.metrics.heads_received.inc();
        let span = broadcast_span(head.number, &head.hash.short());
        let head = Arc::new(head);

        async move {
            match self.config.delivery_mode {
                DeliveryMode::Queued => Ok(self.enqueue(head, false).0),
                DeliveryMode::Synchronous => {
                    let _gate = self.sync_gate.lock().await;
                    let (outcome, acks) = self.enqueue(head, true);
                    futures::future::join_all(acks).await;
                    Ok(outcome)
                }
            }
        }
        .instrument(span)
        .await
    }

    /// Replace the latest head and queue it for every current subscriber,
    /// all under the sequencing lock. Never awaits.
    fn enqueue(
        &self,
        head: Arc<Head>,
        with_ack: bool,
    ) -> (BroadcastOutcome, Vec<oneshot::Receiver<()>>) {
        let mut latest = self.latest.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(current) = latest.as_ref() {
            if head.number <= current.number {
                self.metrics.stale_heads.inc();
                tracing::debug!(
                    number = head.number,
                    hash = %head.hash,
                    latest = current.number,
                    "ignoring head that does not advance the chain"
                );
                return (
                    BroadcastOutcome::Stale {
                        latest: current.number,
                    },
                    Vec::new(),
                );
            }
        }

        *latest = Some(Arc::clone(&head));
        self.metrics.heads_broadcast.inc();
        self.metrics
            .latest_head_number
            .set(i64::try_from(head.number).unwrap_or(i64::MAX));

        if self.registry.is_empty() {
            tracing::trace!(number = head.number, "no subscribers for new head");
            return (BroadcastOutcome::Delivered { subscribers: 0 }, Vec::new());
        }

        let targets = self.registry.snapshot();
        let mut acks = Vec::new();
        let mut queued = 0;

        for target in &targets {
            let (ack, ack_rx) = if with_ack {
                let (tx, rx) = oneshot::channel();
                (Some(tx), Some(rx))
            } else {
                (None, None)
            };

            let delivery = Delivery {
                head: Arc::clone(&head),
                ack,
            };
            let backlog = target.backlog.fetch_add(1, Ordering::AcqRel) + 1;
            if target.sender.send(delivery).is_err() {
                target.backlog.fetch_sub(1, Ordering::AcqRel);
                tracing::trace!(id = %target.id, "subscriber removed during broadcast");
                continue;
            }
            queued += 1;
            acks.extend(ack_rx);

            if backlog == self.config.backlog_warn_threshold {
                self.metrics.backlog_warnings.inc();
                tracing::warn!(
                    subscriber = %target.name,
                    id = %target.id,
                    number = head.number,
                    backlog,
                    "subscriber is falling behind the chain tip"
                );
            }
        }

        tracing::debug!(
            number = head.number,
            hash = %head.hash,
            subscribers = queued,
            "broadcast new longest chain"
        );
        (BroadcastOutcome::Delivered { subscribers: queued }, acks)
    }

    /// Close once; concurrent and later callers wait for that same shutdown
    /// and get its result.
    async fn close(&self) -> Result<(), BroadcasterError> {
        self.state.close()?;
        self.close_result
            .get_or_init(|| self.shut_down())
            .await
            .clone()
    }

    async fn shut_down(&self) -> Result<(), BroadcasterError> {
        tracing::info!(broadcaster = %self.config.name, "closing head broadcaster");
        let grace = self.config.close_grace_period();

        self.stop.notify_one();
        let task = self
            .feed_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(mut task) = task {
            if tokio::time::timeout(grace, &mut task).await.is_err() {
                tracing::warn!(
                    broadcaster = %self.config.name,
                    "feed task still running after grace period, aborting"
                );
                task.abort();
            }
        }

        self.registry.shutdown(grace).await;

        let result = match &self.feed {
            Some(feed) => feed.close().await.map_err(BroadcasterError::from),
            None => Ok(()),
        };
        if let Err(e) = &result {
            tracing::warn!(broadcaster = %self.config.name, error = %e, "error closing head feed");
        }
        tracing::info!(broadcaster = %self.config.name, "head broadcaster closed");
        result
    }

    fn record_feed_error(&self, error: FeedError) {
        *self
            .feed_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(error);
    }
}

/// Consume the feed until it ends, fails, or the broadcaster stops.
async fn run_feed(
    shared: Arc<Shared>,
    feed: Arc<dyn HeadFeed>,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut shutdown_open = true;

    loop {
        let next = tokio::select! {
            biased;
            _ = shared.stop.notified() => {
                tracing::debug!("feed task stopping");
                return;
            }
            signal = shutdown.recv(), if shutdown_open => {
                match signal {
                    Ok(()) | Err(RecvError::Lagged(_)) => {
                        tracing::info!("shutdown signal received");
                        // Close joins this task, so it runs on its own.
                        let closer = Arc::clone(&shared);
                        tokio::spawn(async move {
                            if let Err(e) = closer.close().await {
                                tracing::warn!(error = %e, "error during signalled close");
                            }
                        });
                        return;
                    }
                    Err(RecvError::Closed) => {
                        shutdown_open = false;
                        continue;
                    }
                }
            }
            next = feed.next_head() => next,
        };

        match next {
            Ok(Some(head)) => {
                if shared.state.ready().is_err() {
                    return;
                }
                if let Err(e) = shared.broadcast(head).await {
                    tracing::warn!(error = %e, "broadcast failed");
                }
            }
            Ok(None) => {
                tracing::info!("head feed exhausted");
                return;
            }
            Err(e) => {
                tracing::error!(error = %e, "head feed failed, no longer consuming heads");
                shared.record_feed_error(e);
                return;
            }
        }
    }
}

#[async_trait]
impl Service for HeadBroadcaster {
    fn name(&self) -> String {
        self.shared.config.name.clone()
    }

    async fn start(&self, shutdown: broadcast::Receiver<()>) -> Result<(), BroadcasterError> {
        self.shared.config.validate()?;
        let feed = self.shared.feed.clone().ok_or_else(|| {
            BroadcasterError::InvalidConfiguration("no head feed configured".into())
        })?;
        self.shared.state.start()?;

        let span = feed_span(&self.shared.config.name, feed.name());
        let task = tokio::spawn(run_feed(Arc::clone(&self.shared), feed, shutdown).instrument(span));
        *self
            .shared
            .feed_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(task);

        tracing::info!(
            broadcaster = %self.shared.config.name,
            mode = ?self.shared.config.delivery_mode,
            subscribers = self.shared.registry.len(),
            "head broadcaster started"
        );
        Ok(())
    }

    async fn close(&self) -> Result<(), BroadcasterError> {
        self.shared.close().await
    }

    fn ready(&self) -> Result<(), BroadcasterError> {
        self.shared.state.ready()
    }

    fn health_report(&self) -> HealthReport {
        let mut report = HealthReport::new();
        report.insert(self.name(), self.ready());

        if let Some(feed) = &self.shared.feed {
            report.extend(
                feed.health_report()
                    .into_iter()
                    .map(|(name, status)| (name, status.map_err(BroadcasterError::from))),
            );
            let failure = self
                .shared
                .feed_error
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone();
            if let Some(e) = failure {
                report.insert(feed.name().to_string(), Err(BroadcasterError::Feed(e)));
            }
        }
        report
    }
}
