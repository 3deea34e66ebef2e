//! BitTorrent tracker communication.
//!
//! HTTP (BEP 3) and UDP (BEP 15) announce clients behind one
//! [`TrackerClient`] trait, plus compact peer list decoding shared by both.

pub mod client;
pub mod protocol;
pub mod types;
pub mod udp;

use std::sync::Arc;

// Re-export public API
pub use client::HttpTrackerClient;
pub use protocol::parse_compact_peers;
pub use types::{AnnounceRequest, TrackerClient, TrackerResponse};
pub use udp::UdpTrackerClient;

use crate::config::NetworkConfig;
use crate::torrent::TorrentError;

/// Creates the tracker client matching the URL scheme.
///
/// # Errors
/// - `TorrentError::UrlParsing` - Malformed announce URL
/// - `TorrentError::TrackerConnectionFailed` - Unsupported scheme
pub fn tracker_for_url(
    announce_url: &str,
    config: &NetworkConfig,
) -> Result<Arc<dyn TrackerClient>, TorrentError> {
    let parsed = url::Url::parse(announce_url)?;

    match parsed.scheme() {
        "http" | "https" => Ok(Arc::new(HttpTrackerClient::new(
            announce_url.to_string(),
            config,
        )?)),
        "udp" => Ok(Arc::new(UdpTrackerClient::new(
            announce_url.to_string(),
            config,
        )?)),
        scheme => {
            tracing::warn!("Unsupported tracker scheme {} in {}", scheme, announce_url);
            Err(TorrentError::TrackerConnectionFailed {
                url: announce_url.to_string(),
            })
        }
    }
}
