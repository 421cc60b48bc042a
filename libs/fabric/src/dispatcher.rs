//! Inbound event dispatch
//!
//! One loop consumes the channel's inbound stream in arrival order. Each
//! envelope either settles a pending call through the registry or is
//! broadcast to matching subscribers. Handlers run on spawned tasks, bounded
//! by a semaphore, so a slow subscriber never stalls the read loop.

use std::sync::Arc;

use futures::{Stream, StreamExt};
use hostlink_core::{Envelope, PresenceSignal, HEARTBEAT_MESSAGE_TYPE};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::codec::Codec;
use crate::error::Error;
use crate::registry::{CorrelationRegistry, Routing};
use crate::subscription::Subscriptions;
use crate::tracker::AvailabilityTracker;

pub struct Dispatcher<C> {
    registry: Arc<CorrelationRegistry>,
    tracker: Arc<AvailabilityTracker>,
    subscriptions: Arc<Subscriptions>,
    codec: C,
    handler_permits: Arc<Semaphore>,
}

impl<C: Codec> Dispatcher<C> {
    pub fn new(
        registry: Arc<CorrelationRegistry>,
        tracker: Arc<AvailabilityTracker>,
        subscriptions: Arc<Subscriptions>,
        codec: C,
        max_concurrent_handlers: usize,
    ) -> Self {
        Self {
            registry,
            tracker,
            subscriptions,
            codec,
            handler_permits: Arc::new(Semaphore::new(max_concurrent_handlers.max(1))),
        }
    }

    /// Run the dispatch loop on its own task
    pub fn spawn<S>(self, inbound: S) -> JoinHandle<()>
    where
        S: Stream<Item = crate::Result<Envelope>> + Send + Unpin + 'static,
    {
        tokio::spawn(self.run(inbound))
    }

    /// Consume the inbound stream until it ends or fails
    ///
    /// On termination every pending call fails with [`Error::Transport`] and
    /// every subscriber is told about the failure.
    pub async fn run<S>(self, mut inbound: S)
    where
        S: Stream<Item = crate::Result<Envelope>> + Unpin,
    {
        info!("Dispatcher started");

        let terminal = loop {
            match inbound.next().await {
                Some(Ok(envelope)) => self.dispatch(envelope),
                Some(Err(e)) => break e,
                None => break Error::Transport("inbound stream ended".to_string()),
            }
        };

        self.shut_down(terminal);
    }

    fn dispatch(&self, envelope: Envelope) {
        trace!(
            tracking_id = %envelope.tracking_id,
            source = %envelope.source_service,
            message_type = %envelope.message_type,
            "Dispatcher: inbound"
        );

        if envelope.message_type == HEARTBEAT_MESSAGE_TYPE {
            self.observe_presence(&envelope);
        }

        // Envelopes without a tracking ID can only be broadcasts
        let envelope = if envelope.tracking_id.is_empty() {
            envelope
        } else {
            match self.registry.route(envelope) {
                Routing::Completed | Routing::Late => return,
                Routing::Unmatched(envelope) => envelope,
            }
        };

        self.broadcast(envelope);
    }

    fn observe_presence(&self, envelope: &Envelope) {
        match self.codec.decode::<PresenceSignal>(&envelope.payload) {
            Ok(signal) => {
                self.tracker.observe(&envelope.source_service, signal.state);
            }
            Err(e) => warn!(
                source = %envelope.source_service,
                error = %e,
                "Dispatcher: malformed presence signal"
            ),
        }
    }

    fn broadcast(&self, envelope: Envelope) {
        let handlers = self.subscriptions.matching(&envelope);
        if handlers.is_empty() {
            trace!(
                tracking_id = %envelope.tracking_id,
                message_type = %envelope.message_type,
                "Dispatcher: no subscriber, dropped"
            );
            return;
        }

        for handler in handlers {
            let permits = self.handler_permits.clone();
            let envelope = envelope.clone();
            tokio::spawn(async move {
                let Ok(_permit) = permits.acquire_owned().await else {
                    return;
                };
                handler.handle(envelope).await;
            });
        }
    }

    fn shut_down(&self, terminal: Error) {
        let message = match terminal {
            Error::Transport(message) => message,
            other => other.to_string(),
        };
        let failed = self.registry.close(&message);
        warn!(error = %message, failed, "Dispatcher stopped, pending calls failed");

        for handler in self.subscriptions.handlers() {
            let error = Error::Transport(message.clone());
            tokio::spawn(async move {
                handler.on_transport_error(&error).await;
            });
        }
        debug!("Dispatcher: subscribers notified");
    }
}
