//! Subscriber that writes every head to the log.

use async_trait::async_trait;
use headcast_types::{Head, Timestamp};

use crate::subscriber::HeadTrackable;

/// Logs each new head at `info`, with its age relative to the local clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSubscriber;

#[async_trait]
impl HeadTrackable for LogSubscriber {
    async fn on_new_longest_chain(&self, head: &Head) {
        tracing::info!(
            number = head.number,
            hash = %head.hash,
            parent = %head.parent_hash,
            timestamp = head.timestamp.as_secs(),
            age_secs = head.timestamp.elapsed_since(Timestamp::now()),
            "new longest chain head"
        );
    }

    fn name(&self) -> &str {
        "log"
    }
}
