//! Client configuration
//!
//! Loading is left to the embedding application; this type only derives
//! serde so any loader can produce it.

use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::channel::DEFAULT_INBOUND_BUFFER;
use crate::error::{Error, Result};

/// Address of the messaging hub
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum HubEndpoint {
    Tcp(SocketAddr),
    Unix(PathBuf),
}

impl Default for HubEndpoint {
    fn default() -> Self {
        Self::Tcp(SocketAddr::from(([127, 0, 0, 1], 50051)))
    }
}

impl FromStr for HubEndpoint {
    type Err = Error;

    /// Accepts `tcp://host:port`, `unix:///path/to.sock` or a bare `host:port`
    fn from_str(s: &str) -> Result<Self> {
        if let Some(path) = s.strip_prefix("unix://") {
            if path.is_empty() {
                return Err(Error::Custom("Unix endpoint requires a socket path".to_string()));
            }
            return Ok(Self::Unix(PathBuf::from(path)));
        }

        let addr = s.strip_prefix("tcp://").unwrap_or(s);
        addr.parse()
            .map(Self::Tcp)
            .map_err(|e| Error::Custom(format!("Invalid hub endpoint '{}': {}", s, e)))
    }
}

impl fmt::Display for HubEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp(addr) => write!(f, "tcp://{}", addr),
            Self::Unix(path) => write!(f, "unix://{}", path.display()),
        }
    }
}

impl TryFrom<String> for HubEndpoint {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<HubEndpoint> for String {
    fn from(endpoint: HubEndpoint) -> Self {
        endpoint.to_string()
    }
}

/// Settings for one client session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Identity of this process, used as the source of outbound envelopes
    #[serde(default = "default_service_id")]
    pub service_id: String,

    #[serde(default)]
    pub hub_endpoint: HubEndpoint,

    /// Per-call timeout when the caller gives none
    #[serde(default = "default_timeout_ms")]
    pub default_timeout_ms: u64,

    /// Gate every call on the destination reporting Online
    #[serde(default)]
    pub wait_for_service: bool,

    /// Upper bound on concurrently running subscriber handlers
    #[serde(default = "default_max_concurrent_handlers")]
    pub max_concurrent_handlers: usize,

    /// Mark services Offline when no heartbeat arrived for this long
    #[serde(default)]
    pub heartbeat_stale_after_ms: Option<u64>,

    #[serde(default = "default_inbound_buffer")]
    pub inbound_buffer: usize,

    #[serde(default)]
    pub connect_timeout_ms: Option<u64>,

    #[serde(default)]
    pub send_timeout_ms: Option<u64>,
}

fn default_service_id() -> String {
    "hostlink-client".to_string()
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_max_concurrent_handlers() -> usize {
    64
}

fn default_inbound_buffer() -> usize {
    DEFAULT_INBOUND_BUFFER
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            service_id: default_service_id(),
            hub_endpoint: HubEndpoint::default(),
            default_timeout_ms: default_timeout_ms(),
            wait_for_service: false,
            max_concurrent_handlers: default_max_concurrent_handlers(),
            heartbeat_stale_after_ms: None,
            inbound_buffer: default_inbound_buffer(),
            connect_timeout_ms: None,
            send_timeout_ms: None,
        }
    }
}

impl ClientConfig {
    pub fn new(service_id: impl Into<String>) -> Self {
        Self {
            service_id: service_id.into(),
            ..Self::default()
        }
    }

    pub fn with_hub_endpoint(mut self, endpoint: HubEndpoint) -> Self {
        self.hub_endpoint = endpoint;
        self
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_wait_for_service(mut self, wait: bool) -> Self {
        self.wait_for_service = wait;
        self
    }

    pub fn with_max_concurrent_handlers(mut self, max: usize) -> Self {
        self.max_concurrent_handlers = max;
        self
    }

    pub fn with_heartbeat_stale_after(mut self, max_age: Duration) -> Self {
        self.heartbeat_stale_after_ms = Some(max_age.as_millis() as u64);
        self
    }

    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }

    pub fn heartbeat_stale_after(&self) -> Option<Duration> {
        self.heartbeat_stale_after_ms.map(Duration::from_millis)
    }

    pub fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout_ms.map(Duration::from_millis)
    }

    pub fn send_timeout(&self) -> Option<Duration> {
        self.send_timeout_ms.map(Duration::from_millis)
    }

    /// Check the caller identity before anything goes on the wire
    pub fn validate(&self) -> Result<()> {
        hostlink_core::validation::validate_service_id(&self.service_id)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.default_timeout(), Duration::from_secs(30));
        assert_eq!(config.max_concurrent_handlers, 64);
        assert!(!config.wait_for_service);
        assert!(config.heartbeat_stale_after().is_none());
        assert_eq!(config.hub_endpoint.to_string(), "tcp://127.0.0.1:50051");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn builder_overrides() {
        let config = ClientConfig::new("app-imager")
            .with_default_timeout(Duration::from_millis(1500))
            .with_wait_for_service(true)
            .with_heartbeat_stale_after(Duration::from_secs(10));

        assert_eq!(config.service_id, "app-imager");
        assert_eq!(config.default_timeout(), Duration::from_millis(1500));
        assert!(config.wait_for_service);
        assert_eq!(config.heartbeat_stale_after(), Some(Duration::from_secs(10)));
    }

    #[test]
    fn invalid_service_identity_is_rejected() {
        assert!(ClientConfig::new("App Imager").validate().is_err());
    }

    #[test]
    fn parses_hub_endpoints() {
        assert_eq!(
            "tcp://10.0.0.5:5000".parse::<HubEndpoint>().unwrap(),
            HubEndpoint::Tcp("10.0.0.5:5000".parse().unwrap())
        );
        assert_eq!(
            "127.0.0.1:7000".parse::<HubEndpoint>().unwrap(),
            HubEndpoint::Tcp("127.0.0.1:7000".parse().unwrap())
        );
        assert_eq!(
            "unix:///var/run/hub.sock".parse::<HubEndpoint>().unwrap(),
            HubEndpoint::Unix(PathBuf::from("/var/run/hub.sock"))
        );
        assert!("unix://".parse::<HubEndpoint>().is_err());
        assert!("not an address".parse::<HubEndpoint>().is_err());
    }
}
