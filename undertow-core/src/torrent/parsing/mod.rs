//! Torrent description decoding and metadata extraction.
//!
//! bencode-rs decodes the raw bytes; this module turns the decoded value into
//! validated [`TorrentMetadata`] and computes the info hash over the canonical
//! encoding of the `info` dictionary.

pub mod bencode;
pub mod parser;
pub mod types;

// Re-export public API
pub use bencode::BencodeValue;
pub use parser::BencodeTorrentParser;
pub use types::{FileLayout, TorrentFile, TorrentMetadata, TorrentParser};
