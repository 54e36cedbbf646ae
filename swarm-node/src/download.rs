//! Download engine: find every peer holding a file, fan out one fetch worker per host over a
//! shared work queue, then reassemble in index order and write the file in one step.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use swarm_core::chunk::{ChunkPlan, ChunkSpan, ResultTable, MAX_FILE_LEN};
use swarm_core::protocol::{self, PeerAddr, PeerRecord, PeerRequest, ProtocolError, QueryReply};
use swarm_core::scheduler::{Claim, WorkQueue};
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinSet;
use tracing::{debug, info, warn, Instrument};

use crate::folder::{FolderError, SharedFolder};
use crate::transport::{self, FrameReader};

/// Result of a download attempt that did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadOutcome {
    Completed {
        path: PathBuf,
        length: u64,
        hosts: usize,
    },
    /// No peer has the file. Not an error; the caller may try again later.
    NotFound,
}

#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    #[error("{0} is already in the shared folder")]
    AlreadyPresent(String),
    #[error(transparent)]
    InvalidName(#[from] ProtocolError),
    #[error("hosts disagree on the length of {name}: {lengths:?}")]
    Inconsistent {
        name: String,
        lengths: Vec<(PeerAddr, u64)>,
    },
    #[error("download of {name} incomplete: {received} of {expected} chunks")]
    Incomplete {
        name: String,
        received: u64,
        expected: u64,
    },
    #[error(transparent)]
    Folder(#[from] FolderError),
}

/// Pulls files from other peers into a shared folder.
#[derive(Debug, Clone)]
pub struct Downloader {
    folder: SharedFolder,
    chunk_size: u64,
    fetch_timeout: Duration,
}

/// Work shared by the fetch workers of one download. The two locks are never held together.
struct Board {
    queue: Mutex<WorkQueue>,
    results: Mutex<ResultTable>,
    changed: Notify,
}

impl Downloader {
    pub fn new(folder: SharedFolder, chunk_size: u64, fetch_timeout: Duration) -> Self {
        Self {
            folder,
            chunk_size,
            fetch_timeout,
        }
    }

    /// Download `name` from the peers in `peers`, skipping `me`.
    pub async fn download(
        &self,
        name: &str,
        peers: &[PeerRecord],
        me: Option<&PeerAddr>,
    ) -> Result<DownloadOutcome, DownloadError> {
        protocol::validate_file_name(name)?;
        if self.folder.contains(name).await? {
            return Err(DownloadError::AlreadyPresent(name.to_string()));
        }
        let hosts: Vec<PeerAddr> = peers
            .iter()
            .map(|p| p.addr.clone())
            .filter(|addr| Some(addr) != me)
            .collect();
        let span = tracing::info_span!("download", id = %uuid::Uuid::new_v4(), file = %name);
        self.run(name, hosts).instrument(span).await
    }

    async fn run(
        &self,
        name: &str,
        hosts: Vec<PeerAddr>,
    ) -> Result<DownloadOutcome, DownloadError> {
        let Some((length, hosts)) = self.discover(name, hosts).await? else {
            info!("no peer has the file");
            return Ok(DownloadOutcome::NotFound);
        };
        let plan = ChunkPlan::new(length, self.chunk_size);
        info!(
            length,
            chunks = plan.num_chunks(),
            hosts = hosts.len(),
            "starting download"
        );
        let host_count = hosts.len();
        let bytes = self.fetch_all(name, plan, hosts).await?;
        let path = self.folder.write_atomic(name, &bytes).await?;
        info!(path = %path.display(), "download complete");
        Ok(DownloadOutcome::Completed {
            path,
            length,
            hosts: host_count,
        })
    }

    /// Ask every host whether it has `name`. Returns the agreed length and the hosts that have
    /// it, or `None` if nobody does. Hosts that cannot be reached, or that advertise more than
    /// `MAX_FILE_LEN` bytes, are skipped.
    pub async fn discover(
        &self,
        name: &str,
        hosts: Vec<PeerAddr>,
    ) -> Result<Option<(u64, Vec<PeerAddr>)>, DownloadError> {
        let mut queries = JoinSet::new();
        for (order, host) in hosts.into_iter().enumerate() {
            let name = name.to_string();
            let timeout = self.fetch_timeout;
            queries.spawn(
                async move {
                    let reply = query_availability(&host, &name, timeout).await;
                    (order, host, reply)
                }
                .in_current_span(),
            );
        }
        let mut found = Vec::new();
        while let Some(joined) = queries.join_next().await {
            let Ok((order, host, reply)) = joined else {
                continue;
            };
            match reply {
                Ok(QueryReply::Length(len)) if len > MAX_FILE_LEN => {
                    warn!(%host, len, "advertised length too large; skipping host")
                }
                Ok(QueryReply::Length(len)) => found.push((order, host, len)),
                Ok(QueryReply::Sorry) => debug!(%host, "host does not have the file"),
                Err(e) => warn!(%host, error = %e, "availability query failed"),
            }
        }
        found.sort_by_key(|(order, _, _)| *order);
        let Some(&(_, _, length)) = found.first() else {
            return Ok(None);
        };
        if found.iter().any(|(_, _, len)| *len != length) {
            return Err(DownloadError::Inconsistent {
                name: name.to_string(),
                lengths: found.into_iter().map(|(_, h, len)| (h, len)).collect(),
            });
        }
        Ok(Some((
            length,
            found.into_iter().map(|(_, host, _)| host).collect(),
        )))
    }

    /// Run one worker per host until every chunk is in or every worker has given up.
    async fn fetch_all(
        &self,
        name: &str,
        plan: ChunkPlan,
        hosts: Vec<PeerAddr>,
    ) -> Result<Vec<u8>, DownloadError> {
        let board = Arc::new(Board {
            queue: Mutex::new(WorkQueue::new(plan.num_chunks())),
            results: Mutex::new(ResultTable::new(plan)),
            changed: Notify::new(),
        });
        let mut workers = JoinSet::new();
        for host in hosts {
            let board = board.clone();
            let name = name.to_string();
            let timeout = self.fetch_timeout;
            workers.spawn(
                async move { fetch_worker(board, host, name, plan, timeout).await }
                    .in_current_span(),
            );
        }
        while let Some(joined) = workers.join_next().await {
            if let Ok((host, fetched)) = joined {
                debug!(%host, fetched, "worker finished");
            }
        }
        {
            let queue = board.queue.lock().await;
            if !queue.is_done() {
                warn!(
                    completed = queue.completed(),
                    pending = queue.pending(),
                    in_flight = queue.in_flight(),
                    "every host gave up"
                );
            }
        }
        let results = board.results.lock().await;
        let received = results.len();
        results.reassemble().ok_or_else(|| DownloadError::Incomplete {
            name: name.to_string(),
            received,
            expected: plan.num_chunks(),
        })
    }
}

/// Claim chunks and fetch them from `host` until the queue is drained. The first failed fetch
/// puts its chunk back and ends the worker; the host is not used again in this download.
async fn fetch_worker(
    board: Arc<Board>,
    host: PeerAddr,
    name: String,
    plan: ChunkPlan,
    timeout: Duration,
) -> (PeerAddr, u64) {
    let mut fetched = 0;
    loop {
        // Registered before claiming so a requeue between claim and wait is not missed.
        let changed = board.changed.notified();
        tokio::pin!(changed);
        changed.as_mut().enable();

        let claim = board.queue.lock().await.claim();
        let span = match claim {
            Claim::Chunk(index) => match plan.span(index) {
                Some(span) => span,
                None => {
                    board.queue.lock().await.requeue(index);
                    break;
                }
            },
            Claim::Wait => {
                changed.await;
                continue;
            }
            Claim::Done => break,
        };

        match fetch_chunk(&host, &name, span, timeout).await {
            Ok(bytes) => {
                if !board.results.lock().await.insert(span.index, bytes) {
                    debug!(%host, index = span.index, "chunk already stored");
                }
                board.queue.lock().await.complete(span.index);
                fetched += 1;
                debug!(%host, index = span.index, "chunk stored");
            }
            Err(e) => {
                warn!(%host, index = span.index, error = %e, "fetch failed; dropping host");
                board.queue.lock().await.requeue(span.index);
                board.changed.notify_waiters();
                return (host, fetched);
            }
        }
        board.changed.notify_waiters();
    }
    board.changed.notify_waiters();
    (host, fetched)
}

/// Availability query: does `host` have `name`, and how long is it?
pub async fn query_availability(
    host: &PeerAddr,
    name: &str,
    timeout: Duration,
) -> io::Result<QueryReply> {
    let request = PeerRequest::Query {
        name: name.to_string(),
    }
    .encode()
    .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
    let exchange = async {
        let stream = transport::connect(host, timeout).await?;
        let (reader, mut writer) = stream.into_split();
        transport::send_frame(&mut writer, &request).await?;
        FrameReader::new(reader)
            .next_frame()
            .await?
            .ok_or_else(|| io::Error::new(io::ErrorKind::UnexpectedEof, "no reply"))
    };
    let payload = tokio::time::timeout(timeout, exchange)
        .await
        .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "query timed out"))??;
    QueryReply::decode(&payload).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

/// Fetch one chunk from `host`. A reply that is empty or not exactly the span's length fails.
pub async fn fetch_chunk(
    host: &PeerAddr,
    name: &str,
    span: ChunkSpan,
    timeout: Duration,
) -> io::Result<Vec<u8>> {
    let request = PeerRequest::Fetch {
        name: name.to_string(),
        index: span.index,
    }
    .encode()
    .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
    let exchange = async {
        let mut stream = transport::connect(host, timeout).await?;
        transport::send_frame(&mut stream, &request).await?;
        transport::recv_to_end(&mut stream, span.len()).await
    };
    let bytes = tokio::time::timeout(timeout, exchange)
        .await
        .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "fetch timed out"))??;
    if bytes.is_empty() {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "closed without data",
        ));
    }
    if bytes.len() as u64 != span.len() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("expected {} bytes, got {}", span.len(), bytes.len()),
        ));
    }
    Ok(bytes)
}
