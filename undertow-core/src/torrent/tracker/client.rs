//! HTTP tracker client implementation with URL building and response parsing

use async_trait::async_trait;

use super::protocol::{parse_compact_peers, url_encode_bytes};
use super::types::{AnnounceRequest, TrackerClient, TrackerResponse};
use crate::config::NetworkConfig;
use crate::torrent::TorrentError;
use crate::torrent::parsing::BencodeValue;

/// HTTP tracker client implementation
pub struct HttpTrackerClient {
    pub(super) announce_url: String,
    pub(super) client: reqwest::Client,
}

impl HttpTrackerClient {
    /// Creates HTTP tracker client for one announce URL.
    ///
    /// Uses network configuration for timeout and user agent settings.
    ///
    /// # Errors
    /// - `TorrentError::Http` - HTTP client could not be constructed
    pub fn new(announce_url: String, config: &NetworkConfig) -> Result<Self, TorrentError> {
        let client = reqwest::Client::builder()
            .timeout(config.tracker_timeout)
            .user_agent(config.user_agent)
            .redirect(reqwest::redirect::Policy::limited(3))
            .build()?;

        Ok(Self {
            announce_url,
            client,
        })
    }

    /// Build announce URL with query parameters
    pub(super) fn build_announce_url(&self, request: &AnnounceRequest) -> String {
        // Binary values are encoded by hand, reqwest would double-encode them
        let query = format!(
            "info_hash={}&peer_id={}&port={}&uploaded={}&downloaded={}&left={}&compact=1",
            url_encode_bytes(request.info_hash.as_bytes()),
            url_encode_bytes(request.peer_id.as_bytes()),
            request.port,
            request.uploaded,
            request.downloaded,
            request.left,
        );

        let separator = if self.announce_url.contains('?') {
            '&'
        } else {
            '?'
        };
        format!("{}{}{}", self.announce_url, separator, query)
    }

    /// Parse tracker response from bencode data
    ///
    /// # Errors
    /// - `TorrentError::ProtocolError` - Undecodable body, tracker failure reason,
    ///   missing `interval` or `peers`
    pub(super) fn parse_announce_response(
        response_bytes: &[u8],
    ) -> Result<TrackerResponse, TorrentError> {
        let root =
            BencodeValue::decode(response_bytes).map_err(|e| TorrentError::ProtocolError {
                message: format!("Failed to parse tracker response: {e}"),
            })?;

        if !matches!(root, BencodeValue::Dict(_)) {
            return Err(TorrentError::ProtocolError {
                message: "Invalid tracker response format".to_string(),
            });
        }

        if let Some(reason) = root.get(b"failure reason").and_then(BencodeValue::as_bytes) {
            return Err(TorrentError::ProtocolError {
                message: format!("Tracker error: {}", String::from_utf8_lossy(reason)),
            });
        }

        let interval = root
            .get(b"interval")
            .and_then(BencodeValue::as_integer)
            .ok_or_else(|| TorrentError::ProtocolError {
                message: "Missing interval in tracker response".to_string(),
            })?;

        let peers = root
            .get(b"peers")
            .and_then(BencodeValue::as_bytes)
            .ok_or_else(|| TorrentError::ProtocolError {
                message: "Missing compact peers in tracker response".to_string(),
            })?;

        Ok(TrackerResponse {
            interval: interval.clamp(0, i64::from(u32::MAX)) as u32,
            peers: parse_compact_peers(peers)?,
        })
    }
}

#[async_trait]
impl TrackerClient for HttpTrackerClient {
    /// Announces client presence to tracker and retrieves peer list.
    ///
    /// # Errors
    /// - `TorrentError::TrackerTimeout` - Request timed out
    /// - `TorrentError::TrackerConnectionFailed` - Network error
    /// - `TorrentError::TrackerServerError` - Non-success HTTP status
    /// - `TorrentError::ProtocolError` - Invalid tracker response format
    async fn announce(&self, request: AnnounceRequest) -> Result<TrackerResponse, TorrentError> {
        let url = self.build_announce_url(&request);
        tracing::debug!("Announcing to tracker: {}", self.announce_url);

        let response = self.client.get(&url).send().await.map_err(|e| {
            tracing::warn!("HTTP request to {} failed: {}", self.announce_url, e);

            if e.is_timeout() {
                TorrentError::TrackerTimeout {
                    url: self.announce_url.clone(),
                }
            } else {
                TorrentError::TrackerConnectionFailed {
                    url: self.announce_url.clone(),
                }
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            tracing::warn!(
                "Tracker {} returned error status: {}",
                self.announce_url,
                status
            );
            return Err(TorrentError::TrackerServerError {
                url: self.announce_url.clone(),
                status: status.as_u16(),
            });
        }

        let response_bytes = response.bytes().await.map_err(|e| {
            tracing::warn!(
                "Failed to read response body from {}: {}",
                self.announce_url,
                e
            );
            TorrentError::TrackerConnectionFailed {
                url: self.announce_url.clone(),
            }
        })?;

        let response = Self::parse_announce_response(&response_bytes).inspect_err(|e| {
            tracing::warn!("Failed to parse response from {}: {}", self.announce_url, e);
        })?;

        tracing::debug!(
            "Announced to {}, received {} peers, interval {}s",
            self.announce_url,
            response.peers.len(),
            response.interval
        );

        Ok(response)
    }

    fn tracker_url(&self) -> &str {
        &self.announce_url
    }
}
