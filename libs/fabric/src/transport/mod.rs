use crate::error::Result;

pub mod frame;
pub mod memory;
pub mod tcp;
pub mod unix;

pub use self::frame::{FramedReader, FramedWriter, MAX_FRAME_LEN};
pub use self::memory::MemoryTransport;
pub use self::tcp::{TcpTransport, TcpTransportBuilder, TcpTransportListener};
pub use self::unix::{UnixTransport, UnixTransportBuilder, UnixTransportListener};

/// Read half of a split transport
#[async_trait::async_trait]
pub trait FrameReader: Send {
    /// Receive the next frame
    async fn receive(&mut self) -> Result<Vec<u8>>;
}

/// Write half of a split transport
#[async_trait::async_trait]
pub trait FrameWriter: Send {
    /// Send one frame
    async fn send(&mut self, bytes: &[u8]) -> Result<()>;

    /// Shut down the write direction
    async fn close(&mut self) -> Result<()>;
}

/// Transport trait for sending and receiving raw bytes
///
/// Each transport instance represents a single connection.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    /// Send bytes over the transport
    async fn send(&mut self, bytes: &[u8]) -> Result<()>;

    /// Receive bytes from the transport
    async fn receive(&mut self) -> Result<Vec<u8>>;

    /// Close the transport connection
    async fn close(&mut self) -> Result<()>;

    /// Split into independently owned read and write halves
    fn into_split(self: Box<Self>) -> (Box<dyn FrameReader>, Box<dyn FrameWriter>);
}

/// Listener accepting incoming transports (hub side)
#[async_trait::async_trait]
pub trait TransportListener: Send + Sync {
    type Transport: Transport;

    async fn accept(&self) -> Result<Self::Transport>;

    async fn close(&mut self) -> Result<()>;
}
