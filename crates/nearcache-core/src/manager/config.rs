//! Error and lifecycle types for the near cache manager.

use crate::{cluster::ClusterError, config::OptionsError};
use serde::Serialize;
use thiserror::Error;

/// Errors returned by [`NearCacheManager`](super::NearCacheManager).
#[derive(Debug, Error)]
pub enum NearCacheManagerError {
    /// The options failed validation; the manager was not created.
    #[error("invalid near caching options: {0}")]
    InvalidOptions(#[from] OptionsError),

    /// The manager was disposed and no longer creates caches.
    #[error("near cache manager has been disposed")]
    Disposed,

    /// A cluster call failed while tearing a cache down.
    #[error("cluster error: {0}")]
    Cluster(#[from] ClusterError),
}

/// Lifecycle of the manager's background repair task.
///
/// Moves forward only: `NotStarted -> Running -> Cancelling -> Stopped`, or
/// `NotStarted -> Stopped` when disposed before any invalidating cache was created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[repr(u8)]
pub enum ManagerState {
    NotStarted = 0,
    Running = 1,
    Cancelling = 2,
    Stopped = 3,
}

impl ManagerState {
    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::NotStarted,
            1 => Self::Running,
            2 => Self::Cancelling,
            _ => Self::Stopped,
        }
    }

    /// Whether the manager stopped accepting new caches.
    #[must_use]
    pub fn is_disposed(self) -> bool {
        self >= Self::Cancelling
    }
}
