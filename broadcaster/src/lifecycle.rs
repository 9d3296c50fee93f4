//! Service lifecycle contract.
//!
//! Every long-running component of the node exposes the same five methods:
//! `name`, `start`, `close`, `ready` and `health_report`. The only legal
//! state path is `Created → Started → Closed`; there is no reopen.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::BroadcasterError;

/// Component name → its current health. `Ok(())` means healthy.
pub type HealthReport = HashMap<String, Result<(), BroadcasterError>>;

/// Uniform start/close/ready/health contract.
#[async_trait]
pub trait Service: Send + Sync {
    /// Static identifier, also the key of this service in its health report.
    fn name(&self) -> String;

    /// Start the service. `shutdown` firing is equivalent to calling
    /// [`close`](Self::close).
    async fn start(&self, shutdown: broadcast::Receiver<()>) -> Result<(), BroadcasterError>;

    /// Stop the service and release its resources. Once started, every call
    /// waits for the same shutdown and returns its result.
    async fn close(&self) -> Result<(), BroadcasterError>;

    /// `Ok` only between a successful start and close.
    fn ready(&self) -> Result<(), BroadcasterError>;

    /// Own readiness plus the health of direct collaborators.
    fn health_report(&self) -> HealthReport;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ServiceState {
    Created,
    Started,
    Closed,
}

/// Mutex-guarded [`ServiceState`] enforcing the one-way transitions.
pub(crate) struct StateCell(Mutex<ServiceState>);

impl StateCell {
    pub(crate) fn new() -> Self {
        Self(Mutex::new(ServiceState::Created))
    }

    pub(crate) fn get(&self) -> ServiceState {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// `Created → Started`.
    pub(crate) fn start(&self) -> Result<(), BroadcasterError> {
        let mut state = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        match *state {
            ServiceState::Created => {
                *state = ServiceState::Started;
                Ok(())
            }
            ServiceState::Started => Err(BroadcasterError::AlreadyStarted),
            ServiceState::Closed => Err(BroadcasterError::Closed),
        }
    }

    /// `Started → Closed`; closing again is allowed.
    pub(crate) fn close(&self) -> Result<(), BroadcasterError> {
        let mut state = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        match *state {
            ServiceState::Created => Err(BroadcasterError::NotStarted),
            ServiceState::Started => {
                *state = ServiceState::Closed;
                Ok(())
            }
            ServiceState::Closed => Ok(()),
        }
    }

    pub(crate) fn ready(&self) -> Result<(), BroadcasterError> {
        match self.get() {
            ServiceState::Created => Err(BroadcasterError::NotStarted),
            ServiceState::Started => Ok(()),
            ServiceState::Closed => Err(BroadcasterError::Closed),
        }
    }
}
