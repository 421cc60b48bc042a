use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{Error, Result};
use crate::transport::{FrameReader, FrameWriter};

/// Largest frame accepted from a peer (100MB)
pub const MAX_FRAME_LEN: usize = 100 * 1024 * 1024;

fn eof_as_closed(e: std::io::Error) -> Error {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        Error::ConnectionClosed
    } else {
        e.into()
    }
}

/// Write one frame with a 4-byte big-endian length prefix
pub(crate) async fn write_frame<W>(
    writer: &mut W,
    bytes: &[u8],
    timeout: Option<Duration>,
) -> Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let send_op = async {
        let len = u32::try_from(bytes.len())
            .map_err(|_| Error::InvalidFrame(format!("Message too large: {} bytes", bytes.len())))?;
        writer.write_u32(len).await?;
        writer.write_all(bytes).await?;
        writer.flush().await?;

        Ok::<(), Error>(())
    };

    if let Some(timeout) = timeout {
        tokio::time::timeout(timeout, send_op)
            .await
            .map_err(|_| Error::Custom("Send timeout exceeded".to_string()))?
    } else {
        send_op.await
    }
}

/// Read one length-prefixed frame
pub(crate) async fn read_frame<R>(reader: &mut R) -> Result<Vec<u8>>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let len = reader.read_u32().await.map_err(eof_as_closed)? as usize;

    if len > MAX_FRAME_LEN {
        return Err(Error::InvalidFrame(format!(
            "Message too large: {} bytes",
            len
        )));
    }

    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).await.map_err(eof_as_closed)?;

    Ok(buf)
}

/// Frame reader over any async byte source
pub struct FramedReader<R> {
    inner: R,
}

impl<R> FramedReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner }
    }
}

#[async_trait::async_trait]
impl<R> FrameReader for FramedReader<R>
where
    R: AsyncRead + Unpin + Send,
{
    async fn receive(&mut self) -> Result<Vec<u8>> {
        read_frame(&mut self.inner).await
    }
}

/// Frame writer over any async byte sink
pub struct FramedWriter<W> {
    inner: W,
    send_timeout: Option<Duration>,
}

impl<W> FramedWriter<W> {
    pub fn new(inner: W, send_timeout: Option<Duration>) -> Self {
        Self {
            inner,
            send_timeout,
        }
    }
}

#[async_trait::async_trait]
impl<W> FrameWriter for FramedWriter<W>
where
    W: AsyncWrite + Unpin + Send,
{
    async fn send(&mut self, bytes: &[u8]) -> Result<()> {
        write_frame(&mut self.inner, bytes, self.send_timeout).await
    }

    async fn close(&mut self) -> Result<()> {
        self.inner.shutdown().await?;
        Ok(())
    }
}
