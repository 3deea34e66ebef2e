//! BitTorrent tracker protocol utilities and constants

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

use crate::torrent::TorrentError;

/// BitTorrent tracker protocol constants
pub mod constants {
    /// Compact peer response format (4-byte IPv4 + 2-byte port)
    pub const COMPACT_PEER_SIZE: usize = 6;

    /// Magic protocol id opening every UDP connect request
    pub const UDP_PROTOCOL_ID: u64 = 0x0417_2710_1980;

    pub const UDP_ACTION_CONNECT: u32 = 0;
    pub const UDP_ACTION_ANNOUNCE: u32 = 1;
    pub const UDP_ACTION_ERROR: u32 = 3;

    /// Size of the UDP announce request
    pub const UDP_ANNOUNCE_REQUEST_SIZE: usize = 98;

    /// Fixed header of a UDP announce response
    pub const UDP_ANNOUNCE_HEADER_SIZE: usize = 20;

    /// Receive buffer for UDP tracker replies
    pub const UDP_RECEIVE_BUFFER_SIZE: usize = 30020;
}

/// Decodes a compact peer list into socket addresses, preserving order.
///
/// # Errors
/// - `TorrentError::ProtocolError` - Length is not a multiple of 6 bytes
pub fn parse_compact_peers(peer_bytes: &[u8]) -> Result<Vec<SocketAddr>, TorrentError> {
    if peer_bytes.len() % constants::COMPACT_PEER_SIZE != 0 {
        return Err(TorrentError::ProtocolError {
            message: format!("Invalid compact peer data length: {}", peer_bytes.len()),
        });
    }

    Ok(peer_bytes
        .chunks_exact(constants::COMPACT_PEER_SIZE)
        .map(|chunk| {
            let ip = Ipv4Addr::new(chunk[0], chunk[1], chunk[2], chunk[3]);
            let port = u16::from_be_bytes([chunk[4], chunk[5]]);
            SocketAddr::V4(SocketAddrV4::new(ip, port))
        })
        .collect())
}

/// Percent-encodes raw bytes for tracker query parameters.
pub fn url_encode_bytes(bytes: &[u8]) -> String {
    urlencoding::encode_binary(bytes).into_owned()
}
