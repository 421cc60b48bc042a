//! Hostlink Core - Shared message and service types
//!
//! Defines the [`Envelope`] exchanged with the messaging hub, the opaque
//! identifiers carried inside it, the presence model for host services and
//! the allow-list validators applied to service and message identifiers.

pub mod envelope;
pub mod error;
pub mod service;
pub mod validation;

pub use envelope::{CorrelationId, Envelope, TrackingId};
pub use error::{Error, Result};
pub use service::{PresenceSignal, ServiceState, ServiceStatus, HEARTBEAT_MESSAGE_TYPE};
