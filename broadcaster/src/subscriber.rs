//! # Subscriber capability
//!
//! [`HeadTrackable`] is the one trait a component implements to receive new
//! heads. Each registered subscriber is driven by its own delivery worker fed
//! by its own queue, so an implementation may be slow (I/O, writing a
//! transaction log, retries) without holding up the feed or other
//! subscribers.
//!
//! ## Contract
//! - Heads arrive one at a time, in broadcast order, with strictly
//!   increasing numbers.
//! - Delivery is fire-and-forget: failures stay inside the implementation.
//!   A panic is caught and logged; the next head is still delivered.
//! - A callback running longer than the configured callback timeout is
//!   abandoned at its next await point.

use async_trait::async_trait;
use headcast_types::Head;

/// Receives every new longest-chain head.
#[async_trait]
pub trait HeadTrackable: Send + Sync + 'static {
    /// Handle a new head.
    async fn on_new_longest_chain(&self, head: &Head);

    /// Human-readable name (for logs/metrics).
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}
