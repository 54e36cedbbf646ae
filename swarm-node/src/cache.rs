//! Peer-side registry cache: the latest tracker broadcast, plus the task that keeps it fresh
//! and answers liveness probes.

use swarm_core::protocol::{self, Control, PeerAddr, PeerRecord};
use tokio::io::AsyncRead;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::transport::FrameReader;

/// Read side of the cache. Cheap to clone; every clone sees the same broadcasts.
#[derive(Debug, Clone)]
pub struct RegistryCache {
    rx: watch::Receiver<Vec<PeerRecord>>,
}

/// Write side, owned by the tracker listener.
pub type CacheUpdater = watch::Sender<Vec<PeerRecord>>;

/// An empty cache and its updater.
pub fn channel() -> (CacheUpdater, RegistryCache) {
    let (tx, rx) = watch::channel(Vec::new());
    (tx, RegistryCache { rx })
}

#[derive(Debug, thiserror::Error)]
#[error("tracker connection lost")]
pub struct TrackerLost;

impl RegistryCache {
    /// Latest registry snapshot.
    pub fn snapshot(&self) -> Vec<PeerRecord> {
        self.rx.borrow().clone()
    }

    /// Wait until the registry lists at least one peer other than `me`.
    pub async fn wait_for_peers(&self, me: &PeerAddr) -> Result<Vec<PeerRecord>, TrackerLost> {
        let mut rx = self.rx.clone();
        let peers = rx
            .wait_for(|peers| peers.iter().any(|p| p.addr != *me))
            .await
            .map_err(|_| TrackerLost)?;
        Ok(peers.clone())
    }
}

/// Read tracker traffic until the connection ends. `PING` is answered with `PONG` on `outbound`
/// and leaves the cache alone; any other payload is a full registry snapshot that replaces it.
pub async fn run_listener<R>(
    mut reader: FrameReader<R>,
    outbound: mpsc::UnboundedSender<Vec<u8>>,
    cache: CacheUpdater,
) -> Result<(), TrackerLost>
where
    R: AsyncRead + Unpin,
{
    loop {
        let payload = match reader.next_frame().await {
            Ok(Some(payload)) => payload,
            Ok(None) => {
                info!("tracker closed the connection");
                return Err(TrackerLost);
            }
            Err(e) => {
                warn!(error = %e, "tracker connection failed");
                return Err(TrackerLost);
            }
        };
        if Control::parse(&payload) == Some(Control::Ping) {
            debug!("answering tracker ping");
            if outbound.send(Control::Pong.as_bytes().to_vec()).is_err() {
                return Err(TrackerLost);
            }
            continue;
        }
        if payload.is_empty() {
            continue;
        }
        match protocol::decode_broadcast(&payload) {
            Ok(records) => {
                debug!(peers = records.len(), "registry update");
                cache.send_replace(records);
            }
            Err(e) => warn!(error = %e, "ignoring malformed registry broadcast"),
        }
    }
}
