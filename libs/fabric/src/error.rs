use std::time::Duration;

use hostlink_core::TrackingId;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Codec error: {0}")]
    Codec(String),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    #[error("Service '{service}' did not come online within {waited:?}")]
    ServiceUnavailable { service: String, waited: Duration },

    #[error("No response for {tracking_id} within {after:?}")]
    Timeout {
        tracking_id: TrackingId,
        after: Duration,
    },

    #[error("Tracking ID {0} is already pending")]
    DuplicateTrackingId(TrackingId),

    #[error("Transport failure: {0}")]
    Transport(String),

    #[error("Cancelled: {0}")]
    Cancelled(String),

    #[error(transparent)]
    Core(#[from] hostlink_core::Error),

    #[error("{0}")]
    Custom(String),
}

impl Error {
    pub fn transport(err: impl std::fmt::Display) -> Self {
        Self::Transport(err.to_string())
    }

    /// Whether the caller may retry the same call
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::ServiceUnavailable { .. } | Self::Timeout { .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;
