//! Core types for BitTorrent tracker communication

use std::net::SocketAddr;

use async_trait::async_trait;

use crate::torrent::protocol::PeerId;
use crate::torrent::{InfoHash, TorrentError};

/// Tracker announce request.
///
/// Contains client statistics and torrent information sent to tracker
/// during announce operations to request a peer list.
#[derive(Debug, Clone)]
pub struct AnnounceRequest {
    /// Unique identifier for the torrent being announced
    pub info_hash: InfoHash,
    /// Client's unique 20-byte identifier
    pub peer_id: PeerId,
    /// TCP port reported to the tracker
    pub port: u16,
    /// Total bytes uploaded to other peers
    pub uploaded: u64,
    /// Total bytes downloaded from other peers
    pub downloaded: u64,
    /// Bytes remaining to download
    pub left: u64,
}

impl AnnounceRequest {
    /// Creates a request for a fresh download with `left` bytes remaining.
    pub fn new(info_hash: InfoHash, peer_id: PeerId, port: u16, left: u64) -> Self {
        Self {
            info_hash,
            peer_id,
            port,
            uploaded: 0,
            downloaded: 0,
            left,
        }
    }
}

/// Result of one announce exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackerResponse {
    /// Seconds until next announce request should be sent
    pub interval: u32,
    /// Peer addresses in the order the tracker returned them
    pub peers: Vec<SocketAddr>,
}

/// Abstract tracker communication interface.
///
/// One client is bound to one announce URL. Implementations handle the
/// protocol-specific details (HTTP/UDP) while reporting errors through the
/// same taxonomy.
#[async_trait]
pub trait TrackerClient: Send + Sync {
    /// Performs one announce exchange and returns the tracker's peer list.
    ///
    /// # Errors
    ///
    /// - `TorrentError::TrackerConnectionFailed` - If network error
    /// - `TorrentError::TrackerTimeout` - If the tracker did not answer in time
    /// - `TorrentError::ProtocolError` - If invalid tracker response format
    async fn announce(&self, request: AnnounceRequest) -> Result<TrackerResponse, TorrentError>;

    /// Returns tracker URL for debugging and logging purposes.
    fn tracker_url(&self) -> &str;
}
