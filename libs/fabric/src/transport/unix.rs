use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::{UnixListener, UnixStream};

use crate::error::{Error, Result};
use crate::transport::frame::{read_frame, write_frame};
use crate::transport::{FrameReader, FrameWriter, FramedReader, FramedWriter, Transport};

/// Unix domain socket transport with length-prefix framing
///
/// Messages are sent with a 4-byte big-endian length prefix
pub struct UnixTransport {
    stream: UnixStream,
    send_timeout: Option<Duration>,
    receive_timeout: Option<Duration>,
}

impl UnixTransport {
    /// Connect to a Unix socket with no timeouts
    pub async fn connect(path: impl AsRef<Path>) -> Result<Self> {
        Self::builder().path(path).connect().await
    }

    /// Create a builder for configuring the transport
    pub fn builder() -> UnixTransportBuilder {
        UnixTransportBuilder::new()
    }

    /// Create from an existing UnixStream
    pub fn from_stream(stream: UnixStream) -> Self {
        Self {
            stream,
            send_timeout: None,
            receive_timeout: None,
        }
    }
}

#[async_trait::async_trait]
impl Transport for UnixTransport {
    async fn send(&mut self, bytes: &[u8]) -> Result<()> {
        write_frame(&mut self.stream, bytes, self.send_timeout).await
    }

    async fn receive(&mut self) -> Result<Vec<u8>> {
        let receive_op = read_frame(&mut self.stream);

        if let Some(timeout) = self.receive_timeout {
            tokio::time::timeout(timeout, receive_op)
                .await
                .map_err(|_| Error::Custom("Receive timeout exceeded".to_string()))?
        } else {
            receive_op.await
        }
    }

    async fn close(&mut self) -> Result<()> {
        self.stream.shutdown().await?;
        Ok(())
    }

    fn into_split(self: Box<Self>) -> (Box<dyn FrameReader>, Box<dyn FrameWriter>) {
        let (read_half, write_half) = self.stream.into_split();
        (
            Box::new(FramedReader::new(read_half)),
            Box::new(FramedWriter::new(write_half, self.send_timeout)),
        )
    }
}

/// Unix socket listener for accepting incoming connections
pub struct UnixTransportListener {
    listener: UnixListener,
    path: PathBuf,
}

impl UnixTransportListener {
    /// Bind to a Unix socket path, replacing a stale socket file
    pub async fn bind(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if path.exists() {
            std::fs::remove_file(&path)?;
        }

        let listener = UnixListener::bind(&path)?;
        Ok(Self { listener, path })
    }

    /// Accept an incoming connection
    pub async fn accept(&self) -> Result<UnixTransport> {
        let (stream, _) = self.listener.accept().await?;
        Ok(UnixTransport::from_stream(stream))
    }

    /// Get the path this listener is bound to
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Close the listener and remove the socket file
    pub async fn close(&mut self) -> Result<()> {
        if self.path.exists() {
            std::fs::remove_file(&self.path)?;
        }
        Ok(())
    }
}

impl Drop for UnixTransportListener {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

#[async_trait::async_trait]
impl crate::transport::TransportListener for UnixTransportListener {
    type Transport = UnixTransport;

    async fn accept(&self) -> Result<Self::Transport> {
        UnixTransportListener::accept(self).await
    }

    async fn close(&mut self) -> Result<()> {
        UnixTransportListener::close(self).await
    }
}

/// Builder for configuring Unix socket transport
#[derive(Default)]
pub struct UnixTransportBuilder {
    path: Option<PathBuf>,
    connect_timeout: Option<Duration>,
    send_timeout: Option<Duration>,
    receive_timeout: Option<Duration>,
}

impl UnixTransportBuilder {
    /// Create a new builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the path to connect to
    pub fn path(mut self, path: impl AsRef<Path>) -> Self {
        self.path = Some(path.as_ref().to_path_buf());
        self
    }

    /// Set the connection timeout
    pub fn connect_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the send timeout
    pub fn send_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.send_timeout = timeout;
        self
    }

    /// Set the receive timeout (unsplit use only)
    pub fn receive_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.receive_timeout = timeout;
        self
    }

    /// Connect with the configured settings
    pub async fn connect(self) -> Result<UnixTransport> {
        let path = self
            .path
            .ok_or_else(|| Error::Custom("Path not set".to_string()))?;

        let connect_op = UnixStream::connect(path);

        let stream = if let Some(timeout) = self.connect_timeout {
            tokio::time::timeout(timeout, connect_op)
                .await
                .map_err(|_| Error::Custom("Connect timeout exceeded".to_string()))??
        } else {
            connect_op.await?
        };

        Ok(UnixTransport {
            stream,
            send_timeout: self.send_timeout,
            receive_timeout: self.receive_timeout,
        })
    }
}
