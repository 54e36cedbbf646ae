//! Chunk swarm node: tracker service and peer daemon.

pub mod cache;
pub mod config;
pub mod download;
pub mod folder;
pub mod peer;
pub mod server;
pub mod tracker;
pub mod transport;

pub use config::Config;
pub use download::{DownloadError, DownloadOutcome, Downloader};
pub use folder::SharedFolder;
pub use peer::{Peer, PeerError};
pub use tracker::Tracker;
