use tokio::io::{AsyncWriteExt, DuplexStream};

use crate::error::Result;
use crate::transport::frame::{read_frame, write_frame};
use crate::transport::{FrameReader, FrameWriter, FramedReader, FramedWriter, Transport};

/// In-process transport over a tokio duplex pipe
///
/// Uses the same length-prefix framing as the socket transports. Handy for
/// embedding a hub in the same process and for tests.
pub struct MemoryTransport {
    stream: DuplexStream,
}

impl MemoryTransport {
    /// Buffer size of each direction of the pipe
    const BUFFER_SIZE: usize = 64 * 1024;

    /// Create two connected endpoints
    pub fn pair() -> (Self, Self) {
        let (a, b) = tokio::io::duplex(Self::BUFFER_SIZE);
        (Self { stream: a }, Self { stream: b })
    }
}

#[async_trait::async_trait]
impl Transport for MemoryTransport {
    async fn send(&mut self, bytes: &[u8]) -> Result<()> {
        write_frame(&mut self.stream, bytes, None).await
    }

    async fn receive(&mut self) -> Result<Vec<u8>> {
        read_frame(&mut self.stream).await
    }

    async fn close(&mut self) -> Result<()> {
        self.stream.shutdown().await?;
        Ok(())
    }

    fn into_split(self: Box<Self>) -> (Box<dyn FrameReader>, Box<dyn FrameWriter>) {
        let (read_half, write_half) = tokio::io::split(self.stream);
        (
            Box::new(FramedReader::new(read_half)),
            Box::new(FramedWriter::new(write_half, None)),
        )
    }
}
