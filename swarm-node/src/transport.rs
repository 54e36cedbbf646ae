//! Transport primitives over TCP: connect, framed send/receive, receive-until-close, close.

use std::io;
use std::time::Duration;

use swarm_core::protocol::PeerAddr;
use swarm_core::wire::{self, FrameDecodeError};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

const READ_CHUNK: usize = 4096;

/// Connect to a peer's advertised address, giving up after `timeout`.
pub async fn connect(addr: &PeerAddr, timeout: Duration) -> io::Result<TcpStream> {
    match tokio::time::timeout(timeout, TcpStream::connect((addr.host.as_str(), addr.port))).await
    {
        Ok(stream) => stream,
        Err(_) => Err(io::Error::new(
            io::ErrorKind::TimedOut,
            format!("connect to {addr} timed out"),
        )),
    }
}

/// Write one length-prefixed frame and flush.
pub async fn send_frame<W: AsyncWrite + Unpin>(writer: &mut W, payload: &[u8]) -> io::Result<()> {
    let frame =
        wire::encode_frame(payload).map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
    writer.write_all(&frame).await?;
    writer.flush().await
}

/// Read everything until the remote closes. More than `limit` bytes is an error.
pub async fn recv_to_end<R: AsyncRead + Unpin>(reader: &mut R, limit: u64) -> io::Result<Vec<u8>> {
    let mut out = Vec::new();
    reader.take(limit + 1).read_to_end(&mut out).await?;
    if out.len() as u64 > limit {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("reply exceeds {limit} bytes"),
        ));
    }
    Ok(out)
}

/// Shut down the write side so the remote sees end-of-stream.
pub async fn close<W: AsyncWrite + Unpin>(writer: &mut W) -> io::Result<()> {
    writer.shutdown().await
}

/// Buffered frame reader. `next_frame` is cancel-safe: bytes of a partially received frame stay
/// buffered if the future is dropped (e.g. by an idle timeout) and are used by the next call.
pub struct FrameReader<R> {
    inner: R,
    buf: Vec<u8>,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            buf: Vec::new(),
        }
    }

    /// Next complete frame payload, or `None` on a clean close between frames.
    pub async fn next_frame(&mut self) -> io::Result<Option<Vec<u8>>> {
        loop {
            match wire::decode_frame(&self.buf) {
                Ok((payload, used)) => {
                    let payload = payload.to_vec();
                    self.buf.drain(..used);
                    return Ok(Some(payload));
                }
                Err(FrameDecodeError::NeedMore) => {}
                Err(e) => return Err(io::Error::new(io::ErrorKind::InvalidData, e)),
            }
            let mut chunk = [0u8; READ_CHUNK];
            let n = self.inner.read(&mut chunk).await?;
            if n == 0 {
                if self.buf.is_empty() {
                    return Ok(None);
                }
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "connection closed mid-frame",
                ));
            }
            self.buf.extend_from_slice(&chunk[..n]);
        }
    }
}

/// Spawn a task that frames and writes every payload pushed to the returned sender, in order.
/// Dropping every sender shuts the write side down and ends the task.
pub fn spawn_frame_writer<W>(mut writer: W) -> (mpsc::UnboundedSender<Vec<u8>>, JoinHandle<()>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, mut rx) = mpsc::unbounded_channel::<Vec<u8>>();
    let handle = tokio::spawn(async move {
        while let Some(payload) = rx.recv().await {
            if let Err(e) = send_frame(&mut writer, &payload).await {
                tracing::debug!(error = %e, "frame writer stopped");
                return;
            }
        }
        let _ = close(&mut writer).await;
    });
    (tx, handle)
}
