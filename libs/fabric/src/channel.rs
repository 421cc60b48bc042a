use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;
use hostlink_core::Envelope;
use tokio::sync::{mpsc, oneshot};
use tokio::task::AbortHandle;
use tracing::{debug, trace, warn};

use crate::codec::Codec;
use crate::error::{Error, Result};
use crate::transport::{FrameReader, FrameWriter, Transport};

/// Default capacity of the queue between the reader task and the consumer
pub const DEFAULT_INBOUND_BUFFER: usize = 1024;

/// Frames that may wait for the writer task before senders are held back
const OUTBOUND_QUEUE: usize = 256;

enum Outbound {
    Frame {
        bytes: Vec<u8>,
        done: oneshot::Sender<Result<()>>,
    },
    Close {
        done: oneshot::Sender<Result<()>>,
    },
}

fn writer_stopped() -> Error {
    Error::Transport("channel writer stopped".to_string())
}

/// Duplex envelope channel to the messaging hub
///
/// Pure I/O: envelopes are encoded with the codec and framed by the
/// transport. Frames are written by one dedicated task, so a sender that
/// gives up mid-write never leaves a partial frame on the wire. Inbound
/// envelopes are read by another task and handed out as a single
/// [`InboundStream`].
pub struct Channel<C> {
    outbound: mpsc::Sender<Outbound>,
    reader: std::sync::Mutex<Option<Box<dyn FrameReader>>>,
    reader_task: std::sync::Mutex<Option<AbortHandle>>,
    codec: C,
    inbound_buffer: usize,
}

impl<C: Codec> Channel<C> {
    /// Create a channel from an existing transport
    ///
    /// Spawns the writer task, so it must be called from within a Tokio
    /// runtime.
    pub fn from_transport(transport: impl Transport + 'static, codec: C) -> Self {
        let (reader, writer) = Box::new(transport).into_split();
        let (outbound, queue) = mpsc::channel(OUTBOUND_QUEUE);
        tokio::spawn(write_loop(writer, queue));

        Self {
            outbound,
            reader: std::sync::Mutex::new(Some(reader)),
            reader_task: std::sync::Mutex::new(None),
            codec,
            inbound_buffer: DEFAULT_INBOUND_BUFFER,
        }
    }

    /// Set the capacity of the inbound queue (minimum 1)
    pub fn with_inbound_buffer(mut self, capacity: usize) -> Self {
        self.inbound_buffer = capacity.max(1);
        self
    }

    pub fn codec(&self) -> &C {
        &self.codec
    }

    /// Encode an envelope into a frame for [`send_frame`](Self::send_frame)
    pub fn encode(&self, envelope: &Envelope) -> Result<Vec<u8>> {
        self.codec.encode(envelope)
    }

    /// Send an envelope to the hub
    ///
    /// Fails with [`Error::Transport`] if the stream is closed or the write
    /// is rejected.
    pub async fn send(&self, envelope: &Envelope) -> Result<()> {
        let frame = self.encode(envelope)?;
        self.send_frame(frame).await?;
        trace!(
            tracking_id = %envelope.tracking_id,
            destination = %envelope.destination_service,
            message_type = %envelope.message_type,
            "Channel::send: sent"
        );
        Ok(())
    }

    /// Queue an encoded frame and wait until it is written
    ///
    /// Dropping the returned future never truncates the frame: once queued it
    /// is written in full.
    pub async fn send_frame(&self, bytes: Vec<u8>) -> Result<()> {
        let (done, written) = oneshot::channel();
        self.outbound
            .send(Outbound::Frame { bytes, done })
            .await
            .map_err(|_| writer_stopped())?;
        written.await.map_err(|_| writer_stopped())?
    }

    /// Take the inbound envelope stream
    ///
    /// Spawns the reader task on first call. The stream is not restartable:
    /// any later call fails.
    pub fn receive(&self) -> Result<InboundStream> {
        let reader = self
            .reader
            .lock()
            .map_err(|_| Error::Custom("Channel reader lock poisoned".to_string()))?
            .take()
            .ok_or_else(|| Error::Custom("Inbound stream already taken".to_string()))?;

        let (tx, rx) = mpsc::channel(self.inbound_buffer);
        let task = tokio::spawn(read_loop(reader, self.codec.clone(), tx));
        if let Ok(mut slot) = self.reader_task.lock() {
            *slot = Some(task.abort_handle());
        }
        Ok(InboundStream { rx })
    }

    /// Close the channel in both directions
    ///
    /// Stops the reader task and shuts down the write side once every frame
    /// queued before the call has been written.
    pub async fn close(&self) -> Result<()> {
        self.stop_reader();

        let (done, closed) = oneshot::channel();
        if self.outbound.send(Outbound::Close { done }).await.is_err() {
            return Ok(());
        }
        closed.await.unwrap_or(Ok(()))
    }
}

impl<C> Channel<C> {
    fn stop_reader(&self) {
        if let Some(task) = self.reader_task.lock().ok().and_then(|mut slot| slot.take()) {
            task.abort();
        }
    }
}

impl<C> Drop for Channel<C> {
    fn drop(&mut self) {
        self.stop_reader();
    }
}

async fn write_loop(mut writer: Box<dyn FrameWriter>, mut queue: mpsc::Receiver<Outbound>) {
    debug!("Channel writer: started");
    while let Some(command) = queue.recv().await {
        match command {
            Outbound::Frame { bytes, done } => {
                if let Err(e) = writer.send(&bytes).await {
                    warn!(error = %e, len = bytes.len(), "Channel writer: write failed, stopping");
                    let _ = done.send(Err(Error::transport(e)));
                    // A partial frame may be on the wire; nothing after it would parse
                    let _ = writer.close().await;
                    return;
                }
                let _ = done.send(Ok(()));
            }
            Outbound::Close { done } => {
                let _ = done.send(writer.close().await);
                debug!("Channel writer: closed");
                return;
            }
        }
    }
    debug!("Channel writer: channel dropped, stopping");
}

async fn read_loop<C: Codec>(
    mut reader: Box<dyn FrameReader>,
    codec: C,
    tx: mpsc::Sender<Result<Envelope>>,
) {
    debug!("Channel reader: started");
    loop {
        let bytes = match reader.receive().await {
            Ok(bytes) => bytes,
            Err(e) => {
                let terminal = match e {
                    Error::ConnectionClosed => Error::Transport("stream ended".to_string()),
                    other => Error::transport(other),
                };
                debug!(error = %terminal, "Channel reader: terminating");
                let _ = tx.send(Err(terminal)).await;
                return;
            }
        };

        match codec.decode::<Envelope>(&bytes) {
            Ok(envelope) => {
                if tx.send(Ok(envelope)).await.is_err() {
                    debug!("Channel reader: consumer gone, stopping");
                    return;
                }
            }
            // Framing is still intact, only this message is lost
            Err(e) => warn!(
                error = %e,
                len = bytes.len(),
                "Channel reader: undecodable frame dropped"
            ),
        }
    }
}

/// Inbound envelopes in transport order
///
/// Yields `Err(Error::Transport)` once when the stream ends or fails, then
/// terminates.
pub struct InboundStream {
    rx: mpsc::Receiver<Result<Envelope>>,
}

impl Stream for InboundStream {
    type Item = Result<Envelope>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}
