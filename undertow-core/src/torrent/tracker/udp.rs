//! UDP tracker client (BEP 15 connect/announce exchange)

use std::time::Duration;

use async_trait::async_trait;
use bytes::{Buf, BufMut};
use tokio::net::UdpSocket;

use super::protocol::constants::{
    COMPACT_PEER_SIZE, UDP_ACTION_ANNOUNCE, UDP_ACTION_CONNECT, UDP_ACTION_ERROR,
    UDP_ANNOUNCE_HEADER_SIZE, UDP_ANNOUNCE_REQUEST_SIZE, UDP_PROTOCOL_ID, UDP_RECEIVE_BUFFER_SIZE,
};
use super::protocol::parse_compact_peers;
use super::types::{AnnounceRequest, TrackerClient, TrackerResponse};
use crate::config::NetworkConfig;
use crate::torrent::TorrentError;

/// UDP tracker client.
///
/// Every announce opens a fresh socket, obtains a connection id and then
/// sends the announce. Each phase is retried with a timeout that doubles on
/// every attempt.
pub struct UdpTrackerClient {
    announce_url: String,
    tracker_address: String,
    initial_timeout: Duration,
    max_attempts: u32,
}

impl UdpTrackerClient {
    /// Creates a client for a `udp://host:port` announce URL.
    ///
    /// # Errors
    /// - `TorrentError::UrlParsing` - Malformed URL
    /// - `TorrentError::TrackerConnectionFailed` - URL lacks host or port
    pub fn new(announce_url: String, config: &NetworkConfig) -> Result<Self, TorrentError> {
        let parsed = url::Url::parse(&announce_url)?;
        let (Some(host), Some(port)) = (parsed.host_str(), parsed.port()) else {
            return Err(TorrentError::TrackerConnectionFailed {
                url: announce_url.clone(),
            });
        };
        let tracker_address = format!("{host}:{port}");

        Ok(Self {
            announce_url,
            tracker_address,
            initial_timeout: config.udp_initial_timeout,
            max_attempts: config.udp_max_attempts.max(1),
        })
    }

    /// Connect request: magic, action, transaction id.
    pub(super) fn build_connect_request(transaction_id: u32) -> Vec<u8> {
        let mut buf = Vec::with_capacity(16);
        buf.put_u64(UDP_PROTOCOL_ID);
        buf.put_u32(UDP_ACTION_CONNECT);
        buf.put_u32(transaction_id);
        buf
    }

    /// Extracts the connection id from a connect reply.
    ///
    /// # Errors
    /// - `TorrentError::ProtocolError` - Short reply, transaction or action mismatch
    pub(super) fn parse_connect_response(
        mut data: &[u8],
        transaction_id: u32,
    ) -> Result<u64, TorrentError> {
        if let Some(error) = Self::tracker_error(data) {
            return Err(error);
        }

        if data.len() < 16 {
            return Err(TorrentError::ProtocolError {
                message: format!("Connect reply too short: {} bytes", data.len()),
            });
        }

        let action = data.get_u32();
        let reply_transaction = data.get_u32();
        Self::check_reply(action, reply_transaction, UDP_ACTION_CONNECT, transaction_id)?;

        Ok(data.get_u64())
    }

    pub(super) fn build_announce_request(
        connection_id: u64,
        transaction_id: u32,
        request: &AnnounceRequest,
    ) -> Vec<u8> {
        let mut buf = Vec::with_capacity(UDP_ANNOUNCE_REQUEST_SIZE);
        buf.put_u64(connection_id);
        buf.put_u32(UDP_ACTION_ANNOUNCE);
        buf.put_u32(transaction_id);
        buf.put_slice(request.info_hash.as_bytes());
        buf.put_slice(request.peer_id.as_bytes());
        buf.put_u64(request.downloaded);
        buf.put_u64(request.left);
        buf.put_u64(request.uploaded);
        buf.put_u32(0); // event: none
        buf.put_u32(0); // ip: sender address
        buf.put_u32(0); // key
        buf.put_i32(-1); // num_want: tracker default
        buf.put_u16(request.port);
        buf
    }

    /// Decodes an announce reply into interval and peers.
    ///
    /// # Errors
    /// - `TorrentError::ProtocolError` - Short reply, tracker error, transaction
    ///   or action mismatch
    pub(super) fn parse_announce_response(
        mut data: &[u8],
        transaction_id: u32,
    ) -> Result<TrackerResponse, TorrentError> {
        if let Some(error) = Self::tracker_error(data) {
            return Err(error);
        }

        if data.len() < UDP_ANNOUNCE_HEADER_SIZE {
            return Err(TorrentError::ProtocolError {
                message: format!("Announce reply too short: {} bytes", data.len()),
            });
        }

        let action = data.get_u32();
        let reply_transaction = data.get_u32();
        Self::check_reply(action, reply_transaction, UDP_ACTION_ANNOUNCE, transaction_id)?;

        let interval = data.get_u32();
        let _leechers = data.get_u32();
        let _seeders = data.get_u32();

        // Trailing partial records are ignored
        let usable = data.len() - data.len() % COMPACT_PEER_SIZE;
        let peers = parse_compact_peers(&data[..usable])?;

        Ok(TrackerResponse { interval, peers })
    }

    /// Error replies carry action 3, the transaction id and a message.
    fn tracker_error(data: &[u8]) -> Option<TorrentError> {
        if data.len() < 8 || data[..4] != UDP_ACTION_ERROR.to_be_bytes() {
            return None;
        }
        Some(TorrentError::ProtocolError {
            message: format!("Tracker error: {}", String::from_utf8_lossy(&data[8..])),
        })
    }

    fn check_reply(
        action: u32,
        reply_transaction: u32,
        expected_action: u32,
        transaction_id: u32,
    ) -> Result<(), TorrentError> {
        if reply_transaction != transaction_id {
            return Err(TorrentError::ProtocolError {
                message: format!(
                    "Transaction id mismatch: sent {transaction_id}, got {reply_transaction}"
                ),
            });
        }
        if action != expected_action {
            return Err(TorrentError::ProtocolError {
                message: format!("Unexpected action {action}, expected {expected_action}"),
            });
        }
        Ok(())
    }

    /// Sends `request` and waits for one datagram, retrying on timeout.
    async fn exchange(
        &self,
        socket: &UdpSocket,
        request: &[u8],
        buffer: &mut [u8],
    ) -> Result<usize, TorrentError> {
        for attempt in 0..self.max_attempts {
            let deadline = backoff_timeout(self.initial_timeout, attempt);

            socket.send(request).await.map_err(|e| {
                tracing::debug!("UDP send to {} failed: {}", self.tracker_address, e);
                TorrentError::TrackerConnectionFailed {
                    url: self.announce_url.clone(),
                }
            })?;

            match tokio::time::timeout(deadline, socket.recv(buffer)).await {
                Ok(Ok(received)) => return Ok(received),
                Ok(Err(e)) => {
                    tracing::debug!("UDP receive from {} failed: {}", self.tracker_address, e);
                    return Err(TorrentError::TrackerConnectionFailed {
                        url: self.announce_url.clone(),
                    });
                }
                Err(_) => {
                    tracing::debug!(
                        "UDP tracker {} attempt {} timed out after {:?}",
                        self.tracker_address,
                        attempt + 1,
                        deadline
                    );
                }
            }
        }

        Err(TorrentError::TrackerTimeout {
            url: self.announce_url.clone(),
        })
    }
}

/// Timeout for the zero-based `attempt`, doubling from `initial`.
fn backoff_timeout(initial: Duration, attempt: u32) -> Duration {
    initial.saturating_mul(2u32.saturating_pow(attempt))
}

#[async_trait]
impl TrackerClient for UdpTrackerClient {
    async fn announce(&self, request: AnnounceRequest) -> Result<TrackerResponse, TorrentError> {
        tracing::debug!("Announcing to UDP tracker: {}", self.announce_url);

        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        socket
            .connect(&self.tracker_address)
            .await
            .map_err(|e| {
                tracing::warn!("Failed to resolve {}: {}", self.tracker_address, e);
                TorrentError::TrackerConnectionFailed {
                    url: self.announce_url.clone(),
                }
            })?;

        let mut buffer = vec![0u8; UDP_RECEIVE_BUFFER_SIZE];

        let transaction_id: u32 = rand::random();
        let connect = Self::build_connect_request(transaction_id);
        let received = self.exchange(&socket, &connect, &mut buffer).await?;
        let connection_id = Self::parse_connect_response(&buffer[..received], transaction_id)?;

        let transaction_id: u32 = rand::random();
        let announce = Self::build_announce_request(connection_id, transaction_id, &request);
        let received = self.exchange(&socket, &announce, &mut buffer).await?;
        let response = Self::parse_announce_response(&buffer[..received], transaction_id)?;

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
