//! Hostlink Fabric - Request/response correlation over a hub connection
//!
//! Host services are reached through a single, unordered, fire-and-forget
//! message stream. This crate turns that stream into request/response calls:
//! every outbound request is tagged with a tracking ID, registered before it
//! is sent, and settled exactly once by its response, its deadline, a
//! cancellation or a transport failure. Everything else inbound is broadcast
//! to subscribers.
//!
//! Layers, bottom up:
//! - [`transport`]: length-prefixed frames over TCP, Unix sockets or memory
//! - [`channel`]: envelope I/O with a dedicated reader task
//! - [`tracker`]: service presence from heartbeat signals
//! - [`registry`]: pending calls keyed by tracking ID
//! - [`dispatcher`]: routes inbound envelopes to calls or subscribers
//! - [`client`]: the session object callers hold
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use hostlink_fabric::{Client, ClientConfig, MessageFilter};
//! use hostlink_core::Envelope;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ClientConfig::new("app-imager")
//!     .with_hub_endpoint("tcp://127.0.0.1:50051".parse()?);
//! let client = Client::connect(config).await?;
//!
//! client.wait_until_online("hostsvc-sensor", Duration::from_secs(5)).await?;
//! let reading = client
//!     .call("hostsvc-sensor", "SensorRead", b"temp".to_vec(), Duration::from_secs(2))
//!     .await?;
//!
//! let _pushes = client.subscribe(MessageFilter::message_type("SensorData"), |env: Envelope| {
//!     println!("unsolicited reading: {} bytes", env.payload.len());
//! });
//!
//! client.disconnect().await?;
//! # let _ = reading;
//! # Ok(())
//! # }
//! ```

pub mod channel;
pub mod client;
pub mod codec;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod registry;
pub mod subscription;
pub mod tracker;
pub mod transport;

// Re-exports for convenience
pub use channel::{Channel, InboundStream};
pub use client::{CallOptions, Client};
pub use config::{ClientConfig, HubEndpoint};
pub use error::{Error, Result};
pub use registry::{CorrelationRegistry, PendingCall, RegistryStats};
pub use subscription::{MessageFilter, MessageHandler, Subscription};
pub use tracker::AvailabilityTracker;
