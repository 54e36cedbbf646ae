//! Chunk server: answer availability queries and chunk fetches from other peers.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use swarm_core::chunk::ChunkPlan;
use swarm_core::protocol::{PeerRequest, QueryReply};
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, warn};

use crate::folder::SharedFolder;
use crate::transport::{self, FrameReader};

/// Serve requests until the listener fails. Each connection carries one request.
pub async fn run_chunk_server(
    listener: TcpListener,
    folder: SharedFolder,
    chunk_size: u64,
    request_timeout: Duration,
) -> io::Result<()> {
    loop {
        let (stream, remote) = listener.accept().await?;
        let folder = folder.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_request(stream, &folder, chunk_size, request_timeout).await {
                debug!(%remote, error = %e, "request failed");
            }
        });
    }
}

async fn handle_request(
    stream: TcpStream,
    folder: &SharedFolder,
    chunk_size: u64,
    request_timeout: Duration,
) -> io::Result<()> {
    let remote = stream.peer_addr().ok();
    let (reader, mut writer) = stream.into_split();
    let mut reader = FrameReader::new(reader);
    let payload = match tokio::time::timeout(request_timeout, reader.next_frame()).await {
        Ok(Ok(Some(payload))) => payload,
        Ok(Ok(None)) => return Ok(()),
        Ok(Err(e)) => return Err(e),
        Err(_) => {
            return Err(io::Error::new(
                io::ErrorKind::TimedOut,
                "no request received",
            ))
        }
    };
    match PeerRequest::decode(&payload) {
        Ok(PeerRequest::Query { name }) => {
            let reply = match folder.file_len(&name).await {
                Ok(Some(len)) => QueryReply::Length(len),
                Ok(None) => QueryReply::Sorry,
                Err(e) => {
                    warn!(file = %name, error = %e, "cannot stat shared file");
                    QueryReply::Sorry
                }
            };
            debug!(?remote, file = %name, ?reply, "availability query");
            transport::send_frame(&mut writer, &reply.encode()).await?;
        }
        Ok(PeerRequest::Fetch { name, index }) => {
            match read_chunk(folder, &name, index, chunk_size).await {
                Some(bytes) => {
                    debug!(?remote, file = %name, index, len = bytes.len(), "serving chunk");
                    writer.write_all(&bytes).await?;
                }
                // Closing without a payload is the only failure signal.
                None => debug!(?remote, file = %name, index, "chunk unavailable"),
            }
        }
        Err(e) => debug!(?remote, error = %e, "malformed request"),
    }
    transport::close(&mut writer).await
}

/// Bytes of chunk `index`, or `None` if the file is missing or the index is out of range.
async fn read_chunk(
    folder: &SharedFolder,
    name: &str,
    index: u64,
    chunk_size: u64,
) -> Option<Vec<u8>> {
    let len = folder.file_len(name).await.ok()??;
    let span = ChunkPlan::new(len, chunk_size).span(index)?;
    match folder.read_span(name, span).await {
        Ok(bytes) => Some(bytes),
        Err(e) => {
            warn!(file = %name, index, error = %e, "cannot read chunk");
            None
        }
    }
}

/// Bind the chunk server's listener. Port 0 picks an ephemeral port.
pub async fn bind(host: &str, port: u16) -> io::Result<(TcpListener, SocketAddr)> {
    let listener = TcpListener::bind((host, port)).await?;
    let local = listener.local_addr()?;
    Ok((listener, local))
}
