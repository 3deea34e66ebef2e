//! TCP connection to a single peer

use std::net::SocketAddr;
use std::time::Duration;

use sha1::{Digest, Sha1};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use super::handshake::{HANDSHAKE_LEN, HandshakeCodec};
use super::messages::MessageCodec;
use super::types::{PeerHandshake, PeerId, PeerMessage};
use crate::config::NetworkConfig;
use crate::torrent::{InfoHash, PieceIndex, TorrentError};

/// Largest block a request may ask for.
pub const MAX_BLOCK_SIZE: u32 = 16384;

/// Piece message header: tag, index, offset.
const PIECE_HEADER_LEN: usize = 9;

/// Frames above this size are rejected instead of buffered.
pub const MAX_FRAME_LEN: usize = 1 << 20;

/// Owns the socket to one peer and speaks the wire protocol over it.
///
/// The payload buffer is reused for every frame read on this connection and
/// grows only when a peer sends something larger than a block message.
pub struct PeerConnection {
    address: SocketAddr,
    stream: Option<TcpStream>,
    connect_timeout: Duration,
    read_timeout: Duration,
    payload: Vec<u8>,
    remote_peer_id: Option<PeerId>,
}

impl PeerConnection {
    /// Creates an unconnected peer connection.
    pub fn new(address: SocketAddr, config: &NetworkConfig) -> Self {
        Self {
            address,
            stream: None,
            connect_timeout: config.peer_connect_timeout,
            read_timeout: config.peer_read_timeout,
            payload: Vec::with_capacity(MAX_BLOCK_SIZE as usize + PIECE_HEADER_LEN),
            remote_peer_id: None,
        }
    }

    pub fn address(&self) -> SocketAddr {
        self.address
    }

    /// Peer id the remote side sent in its handshake.
    pub fn remote_peer_id(&self) -> Option<PeerId> {
        self.remote_peer_id
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    /// Dials the peer and exchanges handshakes.
    ///
    /// # Errors
    ///
    /// - `TorrentError::PeerConnectionError` - If dial timed out or the socket failed
    /// - `TorrentError::ProtocolError` - If the reply is malformed or for another torrent
    pub async fn handshake(
        &mut self,
        info_hash: InfoHash,
        peer_id: PeerId,
    ) -> Result<(), TorrentError> {
        let stream = match tokio::time::timeout(
            self.connect_timeout,
            TcpStream::connect(self.address),
        )
        .await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                return Err(TorrentError::PeerConnectionError {
                    reason: format!("Failed to connect to {}: {e}", self.address),
                });
            }
            Err(_) => {
                return Err(TorrentError::PeerConnectionError {
                    reason: format!("Connecting to {} timed out", self.address),
                });
            }
        };
        self.stream = Some(stream);

        let handshake = PeerHandshake::new(info_hash, peer_id);
        self.write_all(&HandshakeCodec::serialize_handshake(&handshake))
            .await?;

        let mut reply = [0u8; HANDSHAKE_LEN];
        self.read_exact_timed(&mut reply).await?;

        let reply = HandshakeCodec::deserialize_handshake(&reply).inspect_err(|_| {
            self.stream = None;
        })?;
        if reply.info_hash != info_hash {
            self.stream = None;
            return Err(TorrentError::ProtocolError {
                message: format!(
                    "Info hash mismatch in handshake: expected {info_hash}, got {}",
                    reply.info_hash
                ),
            });
        }

        self.remote_peer_id = Some(reply.peer_id);
        tracing::debug!("Handshake with {} complete", self.address);
        Ok(())
    }

    /// Writes one wire message.
    ///
    /// # Errors
    ///
    /// - `TorrentError::PeerConnectionError` - If not connected or write failed
    pub async fn send_message(&mut self, message: &PeerMessage) -> Result<(), TorrentError> {
        self.write_all(&MessageCodec::serialize_message(message))
            .await
    }

    /// # Errors
    ///
    /// - `TorrentError::PeerConnectionError` - If not connected or write failed
    pub async fn send_interested(&mut self) -> Result<(), TorrentError> {
        self.send_message(&PeerMessage::Interested).await
    }

    /// Requests the block at `offset`, at most [`MAX_BLOCK_SIZE`] bytes long.
    ///
    /// Returns the length actually requested.
    ///
    /// # Errors
    ///
    /// - `TorrentError::PeerConnectionError` - If not connected or write failed
    pub async fn send_request(
        &mut self,
        piece_index: PieceIndex,
        offset: u32,
        length: u32,
    ) -> Result<u32, TorrentError> {
        let length = length.min(MAX_BLOCK_SIZE);
        self.send_message(&PeerMessage::Request {
            piece_index,
            offset,
            length,
        })
        .await?;
        Ok(length)
    }

    /// # Errors
    ///
    /// - `TorrentError::PeerConnectionError` - If not connected or write failed
    pub async fn send_have(&mut self, piece_index: PieceIndex) -> Result<(), TorrentError> {
        self.send_message(&PeerMessage::Have { piece_index }).await
    }

    /// Reads the next complete message.
    ///
    /// # Errors
    ///
    /// - `TorrentError::PeerConnectionError` - If not connected, read failed or timed out
    /// - `TorrentError::ProtocolError` - If the frame is oversized or undecodable
    pub async fn read_message(&mut self) -> Result<PeerMessage, TorrentError> {
        let mut length = [0u8; 4];
        self.read_exact_timed(&mut length).await?;

        let length = u32::from_be_bytes(length) as usize;
        if length == 0 {
            return Ok(PeerMessage::KeepAlive);
        }
        if length > MAX_FRAME_LEN {
            self.stream = None;
            return Err(TorrentError::ProtocolError {
                message: format!("Frame of {length} bytes exceeds limit"),
            });
        }

        let mut payload = std::mem::take(&mut self.payload);
        payload.resize(length, 0);
        let result = self.read_exact_timed(&mut payload).await;
        let message = result.and_then(|()| MessageCodec::decode_payload(&payload));
        self.payload = payload;

        message
    }

    /// Checks `data` against the expected SHA-1 digest.
    pub fn hash_matches(data: &[u8], expected: &[u8; 20]) -> bool {
        let mut hasher = Sha1::new();
        hasher.update(data);
        hasher.finalize().as_slice() == expected.as_slice()
    }

    /// Shuts the socket down; calling it again is a no-op.
    pub async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.shutdown().await;
        }
    }

    async fn write_all(&mut self, data: &[u8]) -> Result<(), TorrentError> {
        let stream = self.stream.as_mut().ok_or_else(|| not_connected(self.address))?;

        let result = stream.write_all(data).await;
        if let Err(e) = result {
            self.stream = None;
            return Err(TorrentError::PeerConnectionError {
                reason: format!("Failed to write to {}: {e}", self.address),
            });
        }
        Ok(())
    }

    async fn read_exact_timed(&mut self, buf: &mut [u8]) -> Result<(), TorrentError> {
        let address = self.address;
        let stream = self.stream.as_mut().ok_or_else(|| not_connected(address))?;

        let error = match tokio::time::timeout(self.read_timeout, stream.read_exact(buf)).await {
            Ok(Ok(_)) => return Ok(()),
            Ok(Err(e)) => format!("Failed to read from {address}: {e}"),
            Err(_) => format!("Read from {address} timed out"),
        };

        self.stream = None;
        Err(TorrentError::PeerConnectionError { reason: error })
    }
}

fn not_connected(address: SocketAddr) -> TorrentError {
    TorrentError::PeerConnectionError {
        reason: format!("Not connected to {address}"),
    }
}
