//! Subscriber registry mapping subscriber ids to their delivery workers.
//!
//! Shared between `subscribe` (which registers), the [`Unsubscribe`] handles
//! (which remove), and the broadcast path (which takes snapshots). Every
//! lock here is held for a map operation only, never across a callback.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock, Weak};
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::delivery::{Delivery, DeliveryWorker};
use crate::metrics::BroadcasterMetrics;
use crate::subscriber::HeadTrackable;

/// Opaque identity of one registration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriberId(u64);

impl SubscriberId {
    pub(crate) fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

struct SubscriberSlot {
    name: Arc<str>,
    sender: mpsc::UnboundedSender<Delivery>,
    active: Arc<AtomicBool>,
    backlog: Arc<AtomicUsize>,
    worker: JoinHandle<()>,
    registered_at: Instant,
}

/// The part of a subscriber a single broadcast needs.
#[derive(Clone)]
pub(crate) struct DeliveryTarget {
    pub(crate) id: SubscriberId,
    pub(crate) name: Arc<str>,
    pub(crate) sender: mpsc::UnboundedSender<Delivery>,
    /// Shared with the worker, which decrements it on every receive.
    pub(crate) backlog: Arc<AtomicUsize>,
}

#[derive(Default)]
struct Slots {
    by_id: HashMap<SubscriberId, SubscriberSlot>,
    closed: bool,
}

pub(crate) struct SubscriberRegistry {
    slots: RwLock<Slots>,
    next_id: AtomicU64,
    callback_timeout: Option<Duration>,
    metrics: Arc<BroadcasterMetrics>,
}

impl SubscriberRegistry {
    pub(crate) fn new(callback_timeout: Option<Duration>, metrics: Arc<BroadcasterMetrics>) -> Self {
        Self {
            slots: RwLock::new(Slots::default()),
            next_id: AtomicU64::new(1),
            callback_timeout,
            metrics,
        }
    }

    /// Register a subscriber and spawn its delivery worker.
    ///
    /// Returns `None` once the registry has been shut down.
    pub(crate) fn add(&self, subscriber: Arc<dyn HeadTrackable>) -> Option<SubscriberId> {
        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        if slots.closed {
            return None;
        }

        let id = SubscriberId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        let name: Arc<str> = Arc::from(subscriber.name());
        let active = Arc::new(AtomicBool::new(true));
        let backlog = Arc::new(AtomicUsize::new(0));
        let (sender, rx) = mpsc::unbounded_channel();

        let worker = DeliveryWorker {
            id,
            name: Arc::clone(&name),
            subscriber,
            active: Arc::clone(&active),
            backlog: Arc::clone(&backlog),
            callback_timeout: self.callback_timeout,
            metrics: Arc::clone(&self.metrics),
        }
        .spawn(rx);

        slots.by_id.insert(
            id,
            SubscriberSlot {
                name: Arc::clone(&name),
                sender,
                active,
                backlog,
                worker,
                registered_at: Instant::now(),
            },
        );
        self.metrics.subscribers.inc();
        tracing::debug!(subscriber = %name, id = %id, total = slots.by_id.len(), "subscriber registered");
        Some(id)
    }

    /// Remove a subscriber. Returns `false` if it was already gone.
    ///
    /// No delivery starts after this returns; one already running is
    /// aborted at its next await point.
    pub(crate) fn remove(&self, id: SubscriberId) -> bool {
        let slot = self
            .slots
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .by_id
            .remove(&id);

        let Some(slot) = slot else {
            return false;
        };
        slot.active.store(false, Ordering::Release);
        slot.worker.abort();
        self.metrics.subscribers.dec();
        tracing::debug!(
            subscriber = %slot.name,
            id = %id,
            registered_for_ms = slot.registered_at.elapsed().as_millis() as u64,
            "subscriber removed"
        );
        true
    }

    /// Point-in-time copy of every active subscriber.
    pub(crate) fn snapshot(&self) -> Vec<DeliveryTarget> {
        self.slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .by_id
            .iter()
            .map(|(id, slot)| DeliveryTarget {
                id: *id,
                name: Arc::clone(&slot.name),
                sender: slot.sender.clone(),
                backlog: Arc::clone(&slot.backlog),
            })
            .collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .by_id
            .len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove every subscriber and refuse new ones.
    ///
    /// Workers get until `grace` to finish the heads already queued for
    /// them; stragglers are aborted.
    pub(crate) async fn shutdown(&self, grace: Duration) {
        let drained: Vec<SubscriberSlot> = {
            let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
            slots.closed = true;
            slots.by_id.drain().map(|(_, slot)| slot).collect()
        };
        self.metrics.subscribers.set(0);

        let deadline = tokio::time::Instant::now() + grace;
        for slot in drained {
            let SubscriberSlot {
                name,
                sender,
                mut worker,
                ..
            } = slot;
            drop(sender);
            if tokio::time::timeout_at(deadline, &mut worker).await.is_err() {
                tracing::warn!(
                    subscriber = %name,
                    grace_ms = grace.as_millis() as u64,
                    "subscriber still busy after grace period, aborting"
                );
                worker.abort();
            }
        }
    }
}

/// Handle returned by `subscribe`; removes the subscription when called.
///
/// Idempotent and cheap to clone. Holds only a weak reference, so it never
/// keeps a dropped broadcaster alive.
#[derive(Clone)]
pub struct Unsubscribe {
    id: Option<SubscriberId>,
    registry: Weak<SubscriberRegistry>,
}

impl Unsubscribe {
    pub(crate) fn new(id: SubscriberId, registry: &Arc<SubscriberRegistry>) -> Self {
        Self {
            id: Some(id),
            registry: Arc::downgrade(registry),
        }
    }

    /// A handle for a subscription that was never registered.
    pub(crate) fn inert() -> Self {
        Self {
            id: None,
            registry: Weak::new(),
        }
    }

    /// The registration this handle removes, if any.
    pub fn id(&self) -> Option<SubscriberId> {
        self.id
    }

    pub fn unsubscribe(&self) {
        if let (Some(id), Some(registry)) = (self.id, self.registry.upgrade()) {
            registry.remove(id);
        }
    }
}

impl fmt::Debug for Unsubscribe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Unsubscribe").field("id", &self.id).finish()
    }
}
