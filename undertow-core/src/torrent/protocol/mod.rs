//! BitTorrent wire protocol.
//!
//! Message and handshake codecs following BEP 3, and [`PeerConnection`],
//! which owns the TCP socket to one peer.

pub mod connection;
pub mod handshake;
pub mod messages;
pub mod types;

// Re-export public API
pub use connection::{MAX_BLOCK_SIZE, PeerConnection};
pub use handshake::{HANDSHAKE_LEN, HandshakeCodec};
pub use messages::MessageCodec;
pub use types::{Bitfield, PeerHandshake, PeerId, PeerMessage};
