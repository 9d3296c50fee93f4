//! Pre-built [`tracing::Span`] constructors for broadcaster operations.
//!
//! Consistent span names and field sets make it easy to correlate a head
//! across the feed loop, the broadcast and every subscriber delivery.

use tracing::{debug_span, info_span, Span};

/// Span covering one call to `broadcast_new_longest_chain`.
pub fn broadcast_span(number: u64, hash: &str) -> Span {
    debug_span!("broadcast", number = number, hash = %hash)
}

/// Span covering the delivery of one head to one subscriber.
pub fn delivery_span(subscriber: &str, id: u64, number: u64) -> Span {
    debug_span!("delivery", subscriber = %subscriber, id = id, number = number)
}

/// Span covering the lifetime of the upstream feed loop.
pub fn feed_span(broadcaster: &str, feed: &str) -> Span {
    info_span!("head_feed", broadcaster = %broadcaster, feed = %feed)
}
