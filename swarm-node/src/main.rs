// Chunk swarm daemon: run the tracker, or run a peer that serves a folder and fetches files.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use swarm_node::{config, DownloadOutcome, Peer, SharedFolder, Tracker};
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "swarm-node", version, about = "Chunk swarm tracker and peer")]
struct Cli {
    /// Tracker address (overrides config and CHUNKSWARM_TRACKER_ADDR).
    #[arg(long, global = true)]
    tracker: Option<String>,
    /// Chunk size in bytes; must match every other peer.
    #[arg(long, global = true)]
    chunk_size: Option<u64>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the tracker.
    Tracker {
        /// Address to bind; defaults to the configured tracker address.
        #[arg(long)]
        bind: Option<String>,
    },
    /// Join the swarm, share a folder and optionally download files into it.
    Peer {
        /// Shared folder.
        #[arg(long)]
        folder: PathBuf,
        /// File to download once other peers are known. Repeatable.
        #[arg(long = "fetch", value_name = "NAME")]
        fetch: Vec<String>,
        /// Host advertised to other peers.
        #[arg(long)]
        advertise_host: Option<String>,
        /// Chunk server port (0 = ephemeral).
        #[arg(long)]
        port: Option<u16>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let mut cfg = config::load();
    if let Some(addr) = cli.tracker {
        cfg.tracker_addr = addr;
    }
    if let Some(size) = cli.chunk_size.filter(|&s| s > 0) {
        cfg.chunk_size = size;
    }

    match cli.command {
        Command::Tracker { bind } => {
            let bind = bind.unwrap_or_else(|| cfg.tracker_addr.clone());
            let listener = TcpListener::bind(&bind)
                .await
                .with_context(|| format!("bind tracker on {bind}"))?;
            info!(addr = %listener.local_addr()?, "tracker listening");
            Tracker::new(cfg.idle_timeout())
                .run(listener, async {
                    if let Err(e) = shutdown_signal().await {
                        error!(error = %e, "signal handler failed");
                    }
                })
                .await
                .context("tracker")?;
        }
        Command::Peer {
            folder,
            fetch,
            advertise_host,
            port,
        } => {
            if let Some(host) = advertise_host {
                cfg.advertise_host = host;
            }
            if let Some(port) = port {
                cfg.listen_port = port;
            }
            let shared = SharedFolder::open(folder.clone())
                .await
                .with_context(|| format!("open shared folder {}", folder.display()))?;
            let peer = Peer::join(&cfg, shared).await.context("join swarm")?;

            let interrupted = tokio::select! {
                res = fetch_all(&peer, &fetch) => {
                    res?;
                    false
                }
                res = shutdown_signal() => {
                    res?;
                    true
                }
            };
            if !interrupted {
                shutdown_signal().await?;
            }
            peer.leave().await;
        }
    }
    Ok(())
}

/// Wait for another peer, then download each file in turn. Failures are logged, not fatal.
async fn fetch_all(peer: &Peer, names: &[String]) -> anyhow::Result<()> {
    if names.is_empty() {
        return Ok(());
    }
    peer.wait_for_peers().await.context("waiting for peers")?;
    for name in names {
        match peer.download(name).await {
            Ok(DownloadOutcome::Completed { path, length, hosts }) => {
                info!(file = %name, path = %path.display(), length, hosts, "downloaded")
            }
            Ok(DownloadOutcome::NotFound) => warn!(file = %name, "no peer has this file"),
            Err(e) => error!(file = %name, error = %e, "download failed"),
        }
    }
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM (Unix).
async fn shutdown_signal() -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate()).context("install SIGTERM handler")?;
        tokio::select! {
            res = tokio::signal::ctrl_c() => res?,
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
    }
    Ok(())
}
