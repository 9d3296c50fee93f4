use thiserror::Error;

/// Errors returned by the broadcaster's lifecycle and configuration paths.
///
/// Cloneable so that health reports can hand out copies.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BroadcasterError {
    #[error("already started")]
    AlreadyStarted,

    #[error("not started")]
    NotStarted,

    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("closed")]
    Closed,

    #[error("head feed error: {0}")]
    Feed(#[from] FeedError),

    #[error("config error: {0}")]
    Config(String),
}

/// Errors surfaced by an upstream [`HeadFeed`](crate::HeadFeed).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FeedError {
    #[error("feed closed")]
    Closed,

    #[error("feed disconnected: {0}")]
    Disconnected(String),

    #[error("{0}")]
    Other(String),
}
