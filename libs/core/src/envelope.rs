use std::fmt;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque token correlating one outbound call with its inbound response
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrackingId(String);

impl TrackingId {
    /// Generate a fresh, time-ordered tracking ID
    pub fn generate() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for TrackingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TrackingId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for TrackingId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Opaque token grouping several tracking IDs into one conversation
///
/// Never used for matching, only carried along for tracing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(String);

impl CorrelationId {
    pub fn generate() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CorrelationId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for CorrelationId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Unit of message exchange with the hub
///
/// Fields are public for reading; an envelope is not modified once it has
/// been sent or received.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub tracking_id: TrackingId,
    pub correlation_id: CorrelationId,
    pub source_service: String,
    pub destination_service: String,
    pub message_type: String,
    pub payload: Vec<u8>,
    pub timestamp: SystemTime,
}

impl Envelope {
    /// Build a new envelope with fresh tracking and correlation IDs
    pub fn new(
        source_service: impl Into<String>,
        destination_service: impl Into<String>,
        message_type: impl Into<String>,
        payload: Vec<u8>,
    ) -> Self {
        Self {
            tracking_id: TrackingId::generate(),
            correlation_id: CorrelationId::generate(),
            source_service: source_service.into(),
            destination_service: destination_service.into(),
            message_type: message_type.into(),
            payload,
            timestamp: SystemTime::now(),
        }
    }

    pub fn with_tracking_id(mut self, tracking_id: TrackingId) -> Self {
        self.tracking_id = tracking_id;
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: CorrelationId) -> Self {
        self.correlation_id = correlation_id;
        self
    }

    /// Build the response to this envelope
    ///
    /// Keeps tracking and correlation IDs and swaps source and destination.
    pub fn reply(&self, message_type: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            tracking_id: self.tracking_id.clone(),
            correlation_id: self.correlation_id.clone(),
            source_service: self.destination_service.clone(),
            destination_service: self.source_service.clone(),
            message_type: message_type.into(),
            payload,
            timestamp: SystemTime::now(),
        }
    }
}
