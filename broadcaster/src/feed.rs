//! Upstream head feed.
//!
//! The broadcaster does not discover heads itself. Whatever follows the
//! chain (polling, a websocket subscription, a test) implements [`HeadFeed`]
//! or pushes into the bundled [`ChannelFeed`] through its [`FeedSender`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use headcast_types::Head;
use tokio::sync::{mpsc, Mutex};

use crate::FeedError;

/// Source of new longest-chain heads, in causal order.
#[async_trait]
pub trait HeadFeed: Send + Sync + 'static {
    fn name(&self) -> &str;

    /// Wait for the next head. `Ok(None)` means the feed is exhausted.
    ///
    /// Must be cancel safe: the broadcaster drops this future when it
    /// shuts down.
    async fn next_head(&self) -> Result<Option<Head>, FeedError>;

    /// Release the connection to the upstream node.
    async fn close(&self) -> Result<(), FeedError>;

    /// Health of the feed and anything behind it.
    fn health_report(&self) -> HashMap<String, Result<(), FeedError>> {
        HashMap::new()
    }
}

/// A [`HeadFeed`] backed by a bounded `mpsc` channel.
pub struct ChannelFeed {
    name: String,
    rx: Mutex<mpsc::Receiver<Head>>,
    closed: AtomicBool,
}

/// Producer half of a [`ChannelFeed`].
#[derive(Clone, Debug)]
pub struct FeedSender {
    tx: mpsc::Sender<Head>,
}

impl ChannelFeed {
    pub fn new(name: impl Into<String>, capacity: usize) -> (Self, FeedSender) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let feed = Self {
            name: name.into(),
            rx: Mutex::new(rx),
            closed: AtomicBool::new(false),
        };
        (feed, FeedSender { tx })
    }
}

#[async_trait]
impl HeadFeed for ChannelFeed {
    fn name(&self) -> &str {
        &self.name
    }

    async fn next_head(&self) -> Result<Option<Head>, FeedError> {
        if self.closed.load(Ordering::Acquire) {
            return Ok(None);
        }
        Ok(self.rx.lock().await.recv().await)
    }

    async fn close(&self) -> Result<(), FeedError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.rx.lock().await.close();
        tracing::debug!(feed = %self.name, "channel feed closed");
        Ok(())
    }

    fn health_report(&self) -> HashMap<String, Result<(), FeedError>> {
        let status = if self.closed.load(Ordering::Acquire) {
            Err(FeedError::Closed)
        } else {
            Ok(())
        };
        HashMap::from([(self.name.clone(), status)])
    }
}

impl FeedSender {
    /// Push a head, waiting for room in the channel.
    pub async fn send(&self, head: Head) -> Result<(), FeedError> {
        self.tx.send(head).await.map_err(|_| FeedError::Closed)
    }

    /// Whether the consuming side has gone away.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use headcast_types::{BlockHash, Timestamp};

    fn head(number: u64) -> Head {
        Head::new(
            number,
            BlockHash::new([number as u8; 32]),
            BlockHash::ZERO,
            Timestamp::new(number),
        )
    }

    #[tokio::test]
    async fn delivers_in_order_then_exhausts() {
        let (feed, sender) = ChannelFeed::new("test-feed", 4);
        sender.send(head(1)).await.unwrap();
        sender.send(head(2)).await.unwrap();
        drop(sender);

        assert_eq!(feed.next_head().await.unwrap().map(|h| h.number), Some(1));
        assert_eq!(feed.next_head().await.unwrap().map(|h| h.number), Some(2));
        assert_eq!(feed.next_head().await.unwrap(), None);
    }

    #[tokio::test]
    async fn close_is_idempotent_and_rejects_senders() {
        let (feed, sender) = ChannelFeed::new("test-feed", 4);
        feed.close().await.unwrap();
        feed.close().await.unwrap();

        assert!(sender.is_closed());
        assert_eq!(sender.send(head(1)).await, Err(FeedError::Closed));
        assert_eq!(feed.next_head().await.unwrap(), None);
    }

    #[tokio::test]
    async fn health_reflects_closure() {
        let (feed, _sender) = ChannelFeed::new("test-feed", 4);
        assert_eq!(feed.health_report().get("test-feed"), Some(&Ok(())));
        feed.close().await.unwrap();
        assert_eq!(
            feed.health_report().get("test-feed"),
            Some(&Err(FeedError::Closed))
        );
    }
}
