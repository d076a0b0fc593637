//! Error types for the connection layer.
//!
//! [`ApiError`] is the synchronous rejection returned by host-facing calls.
//! Protocol and transport failures never surface here; they are reported as
//! [`HpyEvent::Error`](crate::events::HpyEvent::Error) events.

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ApiError {
    #[error("unknown or invalid connection id")]
    InvalidConnId,

    #[error("device is not connected")]
    NotConnected,

    #[error("command queue is full")]
    QueueFull,

    #[error("command rejected in the current connection state")]
    CommandRejected,

    #[error("firmware does not support this command")]
    FwNotSupported,

    #[error("all connection slots are in use")]
    MaxConnections,
}

impl ApiError {
    /// Whether the same call can succeed later without host intervention.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ApiError::QueueFull | ApiError::NotConnected)
    }
}

/// Failures of the tokio driver itself.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuntimeError {
    #[error("platform task has shut down")]
    Shutdown,

    #[error("platform task dropped the reply")]
    ReplyDropped,
}

pub type Result<T, E = ApiError> = std::result::Result<T, E>;
