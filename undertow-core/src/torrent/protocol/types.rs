//! Core types and enumerations for BitTorrent wire protocol

use bytes::Bytes;

use crate::torrent::{InfoHash, PieceIndex};

/// Client prefix used by [`PeerId::generate`].
pub const DEFAULT_CLIENT_ID: &str = "-UT0001-";

/// BitTorrent peer identifier.
///
/// 20-byte identifier for peers in the BitTorrent network.
/// Used in handshakes and tracker communication to identify clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PeerId([u8; 20]);

impl PeerId {
    /// Creates peer ID from 20-byte array.
    pub fn new(id: [u8; 20]) -> Self {
        Self(id)
    }

    /// Returns peer ID as byte array reference.
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// Generate random peer ID for this client.
    pub fn generate() -> Self {
        Self::generate_with_prefix(DEFAULT_CLIENT_ID)
    }

    /// Generate random peer ID starting with `prefix` (truncated to 20 bytes).
    pub fn generate_with_prefix(prefix: &str) -> Self {
        let mut id: [u8; 20] = rand::random();
        let prefix = &prefix.as_bytes()[..prefix.len().min(20)];
        id[..prefix.len()].copy_from_slice(prefix);
        Self(id)
    }
}

/// BitTorrent wire protocol messages.
///
/// Complete set of message types defined in BEP 3 for peer communication.
/// `Port` is decoded so that DHT-capable peers do not break the session.
#[derive(Debug, Clone, PartialEq)]
pub enum PeerMessage {
    /// Keep-alive message to maintain connection
    KeepAlive,
    /// Peer is choking us
    Choke,
    /// Peer is no longer choking us
    Unchoke,
    /// Sender is interested in the receiver's pieces
    Interested,
    /// Sender is not interested in the receiver's pieces
    NotInterested,
    /// Sender has acquired a specific piece
    Have {
        /// Index of the piece the sender now has
        piece_index: PieceIndex,
    },
    /// Sender's complete piece availability bitmap
    Bitfield {
        /// Bitmap, high bit of the first byte is piece 0
        bitfield: Bytes,
    },
    /// Request a block of data from a piece
    Request {
        /// Index of the piece to request from
        piece_index: PieceIndex,
        /// Byte offset within the piece
        offset: u32,
        /// Number of bytes to request
        length: u32,
    },
    /// A block of piece data
    Piece {
        /// Index of the piece this data belongs to
        piece_index: PieceIndex,
        /// Byte offset within the piece
        offset: u32,
        /// The block bytes
        data: Bytes,
    },
    /// Cancel a previously sent request
    Cancel {
        /// Index of the piece to cancel
        piece_index: PieceIndex,
        /// Byte offset within the piece
        offset: u32,
        /// Number of bytes that were requested
        length: u32,
    },
    /// Sender's DHT port
    Port {
        /// UDP port for DHT communication
        port: u16,
    },
}

/// Peer handshake information.
///
/// Initial exchange between peers to establish protocol compatibility
/// and verify info hash matching for torrent verification.
#[derive(Debug, Clone, PartialEq)]
pub struct PeerHandshake {
    /// Protocol identifier string ("BitTorrent protocol")
    pub protocol: String,
    /// Reserved bytes for protocol extensions
    pub reserved: [u8; 8],
    /// Info hash of the torrent being shared
    pub info_hash: InfoHash,
    /// Unique identifier for the peer
    pub peer_id: PeerId,
}

impl PeerHandshake {
    /// Create handshake for BitTorrent protocol.
    pub fn new(info_hash: InfoHash, peer_id: PeerId) -> Self {
        Self {
            protocol: "BitTorrent protocol".to_string(),
            reserved: [0u8; 8],
            info_hash,
            peer_id,
        }
    }
}

/// Piece availability advertised by a peer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Bitfield(Vec<u8>);

impl Bitfield {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// Bitfield covering exactly `piece_count` pieces.
    ///
    /// A peer's bitmap is truncated or zero-padded to that size.
    pub fn sized(bytes: &[u8], piece_count: usize) -> Self {
        let mut bytes = bytes.to_vec();
        bytes.resize(piece_count.div_ceil(8), 0);
        Self(bytes)
    }

    /// Bitfield with every one of `piece_count` pieces set.
    pub fn full(piece_count: usize) -> Self {
        let mut bitfield = Self(vec![0; piece_count.div_ceil(8)]);
        for index in 0..piece_count {
            bitfield.set(PieceIndex::new(index as u32));
        }
        bitfield
    }

    pub fn has(&self, index: PieceIndex) -> bool {
        let index = index.as_u32() as usize;
        self.0
            .get(index / 8)
            .is_some_and(|byte| byte >> (7 - index % 8) & 1 != 0)
    }

    /// Marks `index` as available.
    ///
    /// Returns `false` and leaves the bitmap untouched when `index` lies
    /// beyond it.
    pub fn set(&mut self, index: PieceIndex) -> bool {
        let index = index.as_u32() as usize;
        let Some(byte) = self.0.get_mut(index / 8) else {
            return false;
        };
        *byte |= 1 << (7 - index % 8);
        true
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}
