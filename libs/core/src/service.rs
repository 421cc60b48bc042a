use std::fmt;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

/// Reserved message type carrying a [`PresenceSignal`] from a host service
pub const HEARTBEAT_MESSAGE_TYPE: &str = "HeartBeatPulse";

/// Availability of a host service as last observed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum ServiceState {
    #[default]
    Unknown,
    Online,
    Offline,
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown => f.write_str("unknown"),
            Self::Online => f.write_str("online"),
            Self::Offline => f.write_str("offline"),
        }
    }
}

/// Snapshot of one service's availability
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceStatus {
    pub service_id: String,
    pub state: ServiceState,
    /// `None` until the first presence signal arrives
    pub last_observed_at: Option<SystemTime>,
}

impl ServiceStatus {
    pub fn unknown(service_id: impl Into<String>) -> Self {
        Self {
            service_id: service_id.into(),
            state: ServiceState::Unknown,
            last_observed_at: None,
        }
    }

    pub fn is_online(&self) -> bool {
        self.state == ServiceState::Online
    }
}

/// Payload of a heartbeat envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceSignal {
    pub state: ServiceState,
}

impl PresenceSignal {
    pub fn online() -> Self {
        Self {
            state: ServiceState::Online,
        }
    }

    pub fn offline() -> Self {
        Self {
            state: ServiceState::Offline,
        }
    }
}
