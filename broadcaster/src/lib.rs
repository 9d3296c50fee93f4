//! Chain head broadcaster.
//!
//! Tracks the tip of a blockchain and fans every new head out to a dynamic
//! set of subscribers:
//! - Heads come from an upstream [`HeadFeed`] (or are pushed directly via
//!   [`HeadBroadcaster::broadcast_new_longest_chain`])
//! - Heads that do not advance the chain are ignored
//! - Each subscriber has its own queue and worker, so it sees heads in order
//!   and cannot stall anyone else
//! - The broadcaster follows the [`Service`] lifecycle contract

pub mod config;
mod delivery;
pub mod dispatcher;
pub mod error;
pub mod feed;
pub mod lifecycle;
pub mod log_subscriber;
pub mod logging;
pub mod metrics;
mod registry;
pub mod shutdown;
pub mod subscriber;
pub mod tracing_spans;

pub use config::{BroadcasterConfig, DeliveryMode};
pub use dispatcher::{BroadcastOutcome, HeadBroadcaster};
pub use error::{BroadcasterError, FeedError};
pub use feed::{ChannelFeed, FeedSender, HeadFeed};
pub use lifecycle::{HealthReport, Service, ServiceState};
pub use log_subscriber::LogSubscriber;
pub use logging::{init_logging, LogFormat};
pub use metrics::BroadcasterMetrics;
pub use registry::{SubscriberId, Unsubscribe};
pub use shutdown::{ShutdownController, ShutdownReason};
pub use subscriber::HeadTrackable;

pub use headcast_types::Head;
