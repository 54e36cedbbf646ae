//! Tracker service: accept peers, run the join handshake, keep the registry, broadcast it on
//! every change, and evict peers that stop answering liveness probes.
//!
//! Each membership change sends O(n) records to O(n) peers. That is fine for small swarms and
//! is the scaling limit of this design.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use swarm_core::liveness::{EvictReason, LivenessAction, LivenessMonitor};
use swarm_core::protocol::{self, Control, PeerAddr, PeerRecord};
use swarm_core::registry::{Registered, Registry};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::transport::{self, FrameReader};

/// Outbound queue of one registered peer connection. Dropping it closes the write side.
type Outbound = mpsc::UnboundedSender<Vec<u8>>;

pub struct Tracker {
    registry: Mutex<Registry<Outbound>>,
    idle_timeout: Duration,
}

impl Tracker {
    pub fn new(idle_timeout: Duration) -> Arc<Self> {
        Arc::new(Self {
            registry: Mutex::new(Registry::new()),
            idle_timeout,
        })
    }

    /// Accept peers until `shutdown` resolves, then close every connection and clear the registry.
    pub async fn run<F>(self: Arc<Self>, listener: TcpListener, shutdown: F) -> io::Result<()>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let mut sessions = JoinSet::new();
        let result = loop {
            tokio::select! {
                _ = &mut shutdown => break Ok(()),
                accepted = listener.accept() => match accepted {
                    Ok((stream, remote)) => {
                        let tracker = self.clone();
                        sessions.spawn(async move { tracker.serve_peer(stream, remote).await });
                    }
                    Err(e) => break Err(e),
                },
                Some(_) = sessions.join_next(), if !sessions.is_empty() => {}
            }
        };
        drop(listener);
        sessions.abort_all();
        while sessions.join_next().await.is_some() {}
        self.close_all().await;
        result
    }

    /// Insert a peer (no-op on a duplicate address) and broadcast. Returns false for duplicates.
    pub async fn register(&self, record: PeerRecord, outbound: Outbound) -> bool {
        let mut registry = self.registry.lock().await;
        let addr = record.addr.clone();
        let added = match registry.register(record, outbound) {
            Registered::Added => {
                info!(peer = %addr, peers = registry.len(), "peer joined");
                true
            }
            Registered::Duplicate(_) => {
                warn!(peer = %addr, "address already registered; dropping new connection");
                false
            }
        };
        broadcast(&registry);
        added
    }

    /// Remove a peer if present, closing its connection, and broadcast the change.
    pub async fn remove(&self, addr: &PeerAddr) -> bool {
        let mut registry = self.registry.lock().await;
        if registry.remove(addr).is_none() {
            return false;
        }
        info!(peer = %addr, peers = registry.len(), "peer left");
        broadcast(&registry);
        true
    }

    pub async fn snapshot(&self) -> Vec<PeerRecord> {
        self.registry.lock().await.snapshot()
    }

    async fn close_all(&self) {
        let drained = self.registry.lock().await.drain();
        info!(peers = drained.len(), "tracker shutting down");
    }

    async fn serve_peer(self: Arc<Self>, stream: TcpStream, remote: SocketAddr) {
        let (reader, writer) = stream.into_split();
        let mut reader = FrameReader::new(reader);
        let record = match self.handshake(&mut reader).await {
            Ok(record) => record,
            Err(e) => {
                warn!(%remote, error = %e, "join handshake failed");
                return;
            }
        };
        let addr = record.addr.clone();
        let (outbound, _writer_task) = transport::spawn_frame_writer(writer);
        if !self.register(record, outbound.clone()).await {
            return;
        }
        self.monitor(addr, reader, outbound).await;
    }

    /// Read the single `host,port[,fileCount]` join message.
    async fn handshake(
        &self,
        reader: &mut FrameReader<OwnedReadHalf>,
    ) -> io::Result<PeerRecord> {
        let payload = tokio::time::timeout(self.idle_timeout, reader.next_frame())
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "no join message"))??
            .ok_or_else(|| io::Error::new(io::ErrorKind::UnexpectedEof, "closed before join"))?;
        protocol::decode_join(&payload).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }

    /// Idle-timeout watchdog for one peer. Returns once the peer has been removed.
    async fn monitor(
        &self,
        addr: PeerAddr,
        mut reader: FrameReader<OwnedReadHalf>,
        outbound: Outbound,
    ) {
        let mut liveness = LivenessMonitor::new();
        loop {
            let action = match tokio::time::timeout(self.idle_timeout, reader.next_frame()).await {
                Err(_) => liveness.on_idle_timeout(),
                Ok(Ok(Some(payload))) => liveness.on_payload(&payload),
                Ok(Ok(None)) | Ok(Err(_)) => liveness.on_disconnect(),
            };
            match action {
                LivenessAction::Continue => {}
                LivenessAction::SendPing => {
                    debug!(peer = %addr, "pinging idle peer");
                    if outbound.send(Control::Ping.as_bytes().to_vec()).is_err() {
                        self.remove(&addr).await;
                        return;
                    }
                }
                LivenessAction::Evict(EvictReason::Left) => {
                    self.remove(&addr).await;
                    return;
                }
                LivenessAction::Evict(reason) => {
                    warn!(peer = %addr, ?reason, "evicting peer");
                    self.remove(&addr).await;
                    return;
                }
            }
        }
    }
}

/// Send the current snapshot to every registered peer. Caller holds the registry lock, so every
/// peer sees the same list and broadcasts are issued in mutation order. A closed queue is
/// skipped; its monitor will evict the peer.
fn broadcast(registry: &Registry<Outbound>) {
    let payload = registry.broadcast_payload();
    for outbound in registry.handles() {
        let _ = outbound.send(payload.clone());
    }
}
