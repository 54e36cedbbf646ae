//! Peer: join the tracker, serve the shared folder, download files from the swarm.

use std::io;

use swarm_core::protocol::{self, Control, PeerAddr, PeerRecord, ProtocolError};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::info;

use crate::cache::{self, RegistryCache, TrackerLost};
use crate::config::Config;
use crate::download::{DownloadError, DownloadOutcome, Downloader};
use crate::folder::{FolderError, SharedFolder};
use crate::server;
use crate::transport::{self, FrameReader};

#[derive(Debug, thiserror::Error)]
pub enum PeerError {
    #[error(transparent)]
    Folder(#[from] FolderError),
    #[error("cannot bind chunk server: {0}")]
    Bind(#[source] io::Error),
    #[error("cannot reach tracker at {addr}: {source}")]
    TrackerUnreachable {
        addr: String,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error(transparent)]
    TrackerLost(#[from] TrackerLost),
}

/// A joined peer. Dropping it stops the chunk server and the tracker listener; `leave` also
/// tells the tracker.
pub struct Peer {
    addr: PeerAddr,
    cache: RegistryCache,
    downloader: Downloader,
    tracker_out: Option<mpsc::UnboundedSender<Vec<u8>>>,
    tracker_writer: JoinHandle<()>,
    listener_task: JoinHandle<Result<(), TrackerLost>>,
    server_task: JoinHandle<io::Result<()>>,
}

impl Peer {
    /// Bind the chunk server, connect to the tracker and send the join message.
    pub async fn join(config: &Config, folder: SharedFolder) -> Result<Self, PeerError> {
        let (listener, local) = server::bind(&config.bind_host, config.listen_port)
            .await
            .map_err(PeerError::Bind)?;
        let addr = PeerAddr::new(config.advertise_host.clone(), local.port())?;
        let file_count = folder.list().await?.len() as u64;

        let unreachable = |source| PeerError::TrackerUnreachable {
            addr: config.tracker_addr.clone(),
            source,
        };
        let stream = TcpStream::connect(config.tracker_addr.as_str())
            .await
            .map_err(unreachable)?;
        let (reader, mut writer) = stream.into_split();
        let join = protocol::encode_join(&PeerRecord::new(addr.clone(), file_count));
        transport::send_frame(&mut writer, &join)
            .await
            .map_err(unreachable)?;

        let (tracker_out, tracker_writer) = transport::spawn_frame_writer(writer);
        let (updater, cache) = cache::channel();
        let listener_task = tokio::spawn(cache::run_listener(
            FrameReader::new(reader),
            tracker_out.clone(),
            updater,
        ));
        let server_task = tokio::spawn(server::run_chunk_server(
            listener,
            folder.clone(),
            config.chunk_size,
            config.fetch_timeout(),
        ));
        info!(
            %addr,
            folder = %folder.root().display(),
            files = file_count,
            tracker = %config.tracker_addr,
            "joined swarm"
        );

        Ok(Self {
            addr,
            cache,
            downloader: Downloader::new(folder, config.chunk_size, config.fetch_timeout()),
            tracker_out: Some(tracker_out),
            tracker_writer,
            listener_task,
            server_task,
        })
    }

    /// Address this peer advertised at join.
    pub fn addr(&self) -> &PeerAddr {
        &self.addr
    }

    pub fn registry(&self) -> &RegistryCache {
        &self.cache
    }

    /// Wait until the tracker reports at least one other peer.
    pub async fn wait_for_peers(&self) -> Result<Vec<PeerRecord>, TrackerLost> {
        self.cache.wait_for_peers(&self.addr).await
    }

    /// Download `name` from the peers in the latest registry snapshot.
    pub async fn download(&self, name: &str) -> Result<DownloadOutcome, DownloadError> {
        let peers = self.cache.snapshot();
        self.downloader.download(name, &peers, Some(&self.addr)).await
    }

    /// Send `CLOSE` to the tracker and close the connection.
    pub async fn leave(mut self) {
        if let Some(out) = self.tracker_out.take() {
            let _ = out.send(Control::Close.as_bytes().to_vec());
        }
        // The listener holds a sender clone for PONGs; the writer only finishes once it is gone.
        self.listener_task.abort();
        let _ = (&mut self.listener_task).await;
        let _ = (&mut self.tracker_writer).await;
        info!(addr = %self.addr, "left swarm");
    }
}

impl Drop for Peer {
    fn drop(&mut self) {
        self.listener_task.abort();
        self.server_task.abort();
    }
}
