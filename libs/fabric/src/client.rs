//! Request/response client over a single hub connection
//!
//! A [`Client`] is the session object: it owns the channel, the correlation
//! registry, the availability tracker and the subscriber set, and runs the
//! dispatcher task. It is cheap to clone and is passed explicitly to
//! whatever needs to talk to host services.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use hostlink_core::validation::{validate_message_type, validate_service_id};
use hostlink_core::{CorrelationId, Envelope, ServiceStatus, TrackingId};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::channel::Channel;
use crate::codec::{BincodeCodec, Codec};
use crate::config::{ClientConfig, HubEndpoint};
use crate::dispatcher::Dispatcher;
use crate::error::{Error, Result};
use crate::registry::{CorrelationRegistry, RegistryStats};
use crate::subscription::{MessageFilter, MessageHandler, Subscription, Subscriptions};
use crate::tracker::AvailabilityTracker;
use crate::transport::{TcpTransport, Transport, UnixTransport};

/// Per-call overrides
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    /// Falls back to the configured default timeout
    pub timeout: Option<Duration>,
    /// Caller-chosen tracking ID, e.g. to cancel the call by ID later
    pub tracking_id: Option<TrackingId>,
    pub correlation_id: Option<CorrelationId>,
    /// Falls back to the configured `wait_for_service`
    pub wait_for_service: Option<bool>,
}

impl CallOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn tracking_id(mut self, tracking_id: TrackingId) -> Self {
        self.tracking_id = Some(tracking_id);
        self
    }

    pub fn correlation_id(mut self, correlation_id: CorrelationId) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    pub fn wait_for_service(mut self, wait: bool) -> Self {
        self.wait_for_service = Some(wait);
        self
    }
}

struct Inner<C> {
    config: ClientConfig,
    channel: Channel<C>,
    registry: Arc<CorrelationRegistry>,
    tracker: Arc<AvailabilityTracker>,
    subscriptions: Arc<Subscriptions>,
    tasks: Vec<JoinHandle<()>>,
    disconnected: AtomicBool,
}

impl<C> Drop for Inner<C> {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

/// Session with the messaging hub
pub struct Client<C = BincodeCodec> {
    inner: Arc<Inner<C>>,
}

impl<C> Clone for Client<C> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl Client<BincodeCodec> {
    /// Connect to the hub named in the config using the bincode codec
    pub async fn connect(config: ClientConfig) -> Result<Self> {
        Self::connect_with_codec(config, BincodeCodec).await
    }
}

impl<C: Codec> Client<C> {
    pub async fn connect_with_codec(config: ClientConfig, codec: C) -> Result<Self> {
        info!(service = %config.service_id, endpoint = %config.hub_endpoint, "Connecting to hub");

        match &config.hub_endpoint {
            HubEndpoint::Tcp(addr) => {
                let transport = TcpTransport::builder()
                    .address(*addr)
                    .connect_timeout(config.connect_timeout())
                    .send_timeout(config.send_timeout())
                    .connect()
                    .await?;
                Self::from_transport(transport, config, codec)
            }
            HubEndpoint::Unix(path) => {
                let transport = UnixTransport::builder()
                    .path(path)
                    .connect_timeout(config.connect_timeout())
                    .send_timeout(config.send_timeout())
                    .connect()
                    .await?;
                Self::from_transport(transport, config, codec)
            }
        }
    }

    /// Start a session over an already connected transport
    ///
    /// Spawns the reader and dispatcher tasks, so it must be called from
    /// within a Tokio runtime.
    pub fn from_transport(
        transport: impl Transport + 'static,
        config: ClientConfig,
        codec: C,
    ) -> Result<Self> {
        config.validate()?;

        let channel = Channel::from_transport(transport, codec.clone())
            .with_inbound_buffer(config.inbound_buffer);
        let registry = CorrelationRegistry::new();
        let tracker = AvailabilityTracker::new();
        let subscriptions = Subscriptions::new();

        let inbound = channel.receive()?;
        let dispatcher = Dispatcher::new(
            registry.clone(),
            tracker.clone(),
            subscriptions.clone(),
            codec,
            config.max_concurrent_handlers,
        );

        let mut tasks = vec![dispatcher.spawn(inbound)];
        if let Some(max_age) = config.heartbeat_stale_after() {
            tasks.push(tracker.spawn_stale_sweeper(max_age));
        }

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                channel,
                registry,
                tracker,
                subscriptions,
                tasks,
                disconnected: AtomicBool::new(false),
            }),
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Send a request and wait for the matching response payload
    pub async fn call(
        &self,
        destination: &str,
        message_type: &str,
        payload: Vec<u8>,
        timeout: Duration,
    ) -> Result<Vec<u8>> {
        let options = CallOptions::new().timeout(timeout);
        let response = self.call_with(destination, message_type, payload, options).await?;
        Ok(response.payload)
    }

    /// Send a request and wait for the full response envelope
    ///
    /// The registry entry is removed on every exit path, including when the
    /// returned future is dropped before it completes.
    pub async fn call_with(
        &self,
        destination: &str,
        message_type: &str,
        payload: Vec<u8>,
        options: CallOptions,
    ) -> Result<Envelope> {
        self.ensure_connected()?;
        validate_service_id(destination)?;
        validate_message_type(message_type)?;

        let started = Instant::now();
        let timeout = options.timeout.unwrap_or_else(|| self.inner.config.default_timeout());
        let tracking_id = options.tracking_id.unwrap_or_else(TrackingId::generate);

        if options.wait_for_service.unwrap_or(self.inner.config.wait_for_service) {
            debug!(%tracking_id, service = %destination, "call: awaiting service");
            self.inner.tracker.wait_until_online(destination, timeout).await?;
        }

        let mut envelope = Envelope::new(
            self.inner.config.service_id.as_str(),
            destination,
            message_type,
            payload,
        )
        .with_tracking_id(tracking_id.clone());
        if let Some(correlation_id) = options.correlation_id {
            envelope = envelope.with_correlation_id(correlation_id);
        }

        let frame = self.inner.channel.encode(&envelope)?;

        // Registered before sending so an early response always finds its slot
        let remaining = timeout.saturating_sub(started.elapsed());
        let pending = self.inner.registry.register(tracking_id.clone(), remaining)?;

        let send = self.inner.channel.send_frame(frame);
        match tokio::time::timeout_at(pending.deadline(), send).await {
            Ok(Ok(())) => {
                debug!(%tracking_id, service = %destination, %message_type, "call: pending");
            }
            Ok(Err(e)) => {
                self.inner.registry.fail(&tracking_id, e.to_string());
                return Err(e);
            }
            Err(_) => {
                // The frame may still go out; the call is over either way
                debug!(%tracking_id, "call: deadline reached while sending");
                self.inner.registry.expire(&tracking_id);
            }
        }

        let result = pending.wait().await;
        match &result {
            Ok(_) => debug!(%tracking_id, elapsed = ?started.elapsed(), "call: completed"),
            Err(e) => debug!(%tracking_id, error = %e, "call: failed"),
        }
        result
    }

    /// Typed request: encode with the session codec, decode the response
    pub async fn request<Req, Res>(
        &self,
        destination: &str,
        message_type: &str,
        request: &Req,
        timeout: Option<Duration>,
    ) -> Result<Res>
    where
        Req: Serialize,
        Res: for<'de> Deserialize<'de>,
    {
        let codec = self.inner.channel.codec();
        let payload = codec.encode(request)?;
        let options = CallOptions {
            timeout,
            ..CallOptions::default()
        };
        let response = self.call_with(destination, message_type, payload, options).await?;
        codec.decode(&response.payload)
    }

    /// Fire-and-forget message; returns the tracking ID it was sent with
    pub async fn send(
        &self,
        destination: &str,
        message_type: &str,
        payload: Vec<u8>,
    ) -> Result<TrackingId> {
        self.ensure_connected()?;
        validate_service_id(destination)?;
        validate_message_type(message_type)?;

        let envelope = Envelope::new(
            self.inner.config.service_id.as_str(),
            destination,
            message_type,
            payload,
        );
        self.inner.channel.send(&envelope).await?;
        Ok(envelope.tracking_id)
    }

    /// Receive broadcast traffic matching the filter
    pub fn subscribe(&self, filter: MessageFilter, handler: impl MessageHandler) -> Subscription {
        self.inner.subscriptions.add(filter, handler)
    }

    pub async fn wait_until_online(&self, service_id: &str, timeout: Duration) -> Result<()> {
        self.inner.tracker.wait_until_online(service_id, timeout).await
    }

    pub fn service_status(&self, service_id: &str) -> ServiceStatus {
        self.inner.tracker.status(service_id)
    }

    /// Cancel an in-flight call by tracking ID
    pub fn cancel(&self, tracking_id: &TrackingId, reason: impl Into<String>) -> bool {
        self.inner.registry.cancel(tracking_id, reason)
    }

    pub fn pending_calls(&self) -> usize {
        self.inner.registry.len()
    }

    pub fn registry_stats(&self) -> RegistryStats {
        self.inner.registry.stats()
    }

    /// Tear down the session
    ///
    /// Cancels every pending call, stops background tasks and closes the
    /// channel. Calls racing the disconnect fail with [`Error::Cancelled`];
    /// later calls fail with [`Error::Transport`].
    pub async fn disconnect(&self) -> Result<()> {
        if self.inner.disconnected.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let cancelled = self.inner.registry.cancel_and_close("client disconnected");
        info!(cancelled, "Disconnecting from hub");

        for task in &self.inner.tasks {
            task.abort();
        }

        if let Err(e) = self.inner.channel.close().await {
            warn!(error = %e, "disconnect: channel close failed");
        }
        Ok(())
    }

    fn ensure_connected(&self) -> Result<()> {
        if self.inner.disconnected.load(Ordering::SeqCst) {
            return Err(Error::Transport("client disconnected".to_string()));
        }
        Ok(())
    }
}
