//! BitTorrent swarm download engine

pub mod discovery;
pub mod monitor;
pub mod parsing;
pub mod piece_manager;
pub mod pool;
pub mod protocol;
pub mod session;
#[cfg(test)]
pub mod test_data;
pub mod tracker;
pub mod worker;

use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

pub use discovery::{PeerDiscovery, PeerRefresh};
pub use monitor::{PeerTally, SwarmMonitor};
pub use parsing::{
    BencodeTorrentParser, BencodeValue, FileLayout, TorrentFile, TorrentMetadata, TorrentParser,
};
pub use piece_manager::{DownloadProgress, Piece, PieceManager};
pub use pool::WorkerPool;
pub use protocol::{PeerConnection, PeerHandshake, PeerId, PeerMessage};
pub use session::{DownloadSession, SessionReport};
pub use tracker::{
    AnnounceRequest, HttpTrackerClient, TrackerClient, TrackerResponse, UdpTrackerClient,
    tracker_for_url,
};
pub use worker::{DownloadWorker, WorkerEvent};

use crate::storage::StorageError;

/// SHA-1 hash identifying a unique torrent.
///
/// 20-byte SHA-1 hash of the info dictionary from a torrent file.
/// Used to uniquely identify torrents across the BitTorrent network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InfoHash([u8; 20]);

impl InfoHash {
    /// Creates InfoHash from 20-byte SHA-1 hash.
    pub fn new(hash: [u8; 20]) -> Self {
        Self(hash)
    }

    /// Returns reference to underlying 20-byte hash.
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }
}

impl fmt::Display for InfoHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

/// Zero-based index of a piece within a torrent.
///
/// Torrent files are divided into pieces for downloading and verification.
/// Each piece has a sequential index starting from 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PieceIndex(pub u32);

impl PieceIndex {
    /// Creates PieceIndex from zero-based index.
    pub fn new(index: u32) -> Self {
        Self(index)
    }

    /// Returns the underlying piece index as u32.
    pub fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for PieceIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Errors that can occur during torrent operations.
///
/// Covers all failure modes of a download session: metadata decoding,
/// tracker and peer communication, piece verification and assembly.
#[derive(Debug, thiserror::Error)]
pub enum TorrentError {
    #[error("Failed to parse torrent file: {reason}")]
    InvalidTorrentFile { reason: String },

    #[error("Tracker connection failed: {url}")]
    TrackerConnectionFailed { url: String },

    #[error("Tracker request timed out: {url}")]
    TrackerTimeout { url: String },

    #[error("Tracker {url} returned HTTP {status}")]
    TrackerServerError { url: String, status: u16 },

    #[error("Piece {index} hash mismatch")]
    PieceHashMismatch { index: PieceIndex },

    #[error("Peer connection error: {reason}")]
    PeerConnectionError { reason: String },

    #[error("Protocol error: {message}")]
    ProtocolError { message: String },

    #[error("Peer {address} has none of the remaining pieces")]
    NoUsefulPieces { address: SocketAddr },

    #[error("No piece completed within {elapsed:?}")]
    SessionStalled { elapsed: Duration },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("URL parsing error: {0}")]
    UrlParsing(#[from] url::ParseError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}
