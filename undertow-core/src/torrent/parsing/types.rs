//! Core types and structures for torrent metadata

use std::path::Path;

use async_trait::async_trait;

use super::super::{InfoHash, PieceIndex, TorrentError};

/// Complete metadata extracted from a torrent file.
///
/// Contains all information needed to download a torrent including
/// piece hashes, file structure, and tracker URLs. Built once per session
/// and shared read-only by every component.
#[derive(Debug, Clone, PartialEq)]
pub struct TorrentMetadata {
    pub info_hash: InfoHash,
    pub name: String,
    pub piece_length: u64,
    pub piece_hashes: Vec<[u8; 20]>,
    pub layout: FileLayout,
    pub announce_urls: Vec<String>,
}

/// How the torrent content maps onto files.
///
/// A torrent carries exactly one of `length` (single file named after the
/// torrent) or `files` (a list of files under a directory named after it).
#[derive(Debug, Clone, PartialEq)]
pub enum FileLayout {
    Single { length: u64 },
    Multi { files: Vec<TorrentFile> },
}

/// Individual file within a torrent.
///
/// Represents a single file entry with its relative path components and
/// byte length.
#[derive(Debug, Clone, PartialEq)]
pub struct TorrentFile {
    pub path: Vec<String>,
    pub length: u64,
}

impl TorrentMetadata {
    /// Files in torrent order.
    ///
    /// Single-file torrents yield one entry whose path is the torrent name.
    pub fn files(&self) -> Vec<TorrentFile> {
        match &self.layout {
            FileLayout::Single { length } => vec![TorrentFile {
                path: vec![self.name.clone()],
                length: *length,
            }],
            FileLayout::Multi { files } => files.clone(),
        }
    }

    /// Sum of all file lengths.
    pub fn total_length(&self) -> u64 {
        match &self.layout {
            FileLayout::Single { length } => *length,
            FileLayout::Multi { files } => files.iter().map(|f| f.length).sum(),
        }
    }

    pub fn piece_count(&self) -> usize {
        self.piece_hashes.len()
    }

    /// Byte length of the piece at `index`; only the last piece may be shorter.
    pub fn piece_size(&self, index: PieceIndex) -> u64 {
        let start = u64::from(index.as_u32()) * self.piece_length;
        self.total_length()
            .saturating_sub(start)
            .min(self.piece_length)
    }

    pub fn is_multi_file(&self) -> bool {
        matches!(self.layout, FileLayout::Multi { .. })
    }
}

/// Abstract torrent parsing interface.
///
/// Provides unified interface for loading torrent metadata from raw bytes
/// or from a file on disk.
#[async_trait]
pub trait TorrentParser: Send + Sync {
    /// Parses torrent metadata from raw bencode bytes.
    ///
    /// Extracts complete torrent information including info hash, piece hashes,
    /// file listings, and announce URLs from bencode-encoded torrent data.
    ///
    /// # Errors
    /// - `TorrentError::InvalidTorrentFile` - Malformed bencode or missing fields
    async fn parse_torrent_data(&self, data: &[u8]) -> Result<TorrentMetadata, TorrentError>;

    /// Parses torrent file from filesystem path.
    ///
    /// Reads file from disk and delegates to parse_torrent_data for processing.
    ///
    /// # Errors
    /// - `TorrentError::Io` - File could not be read
    /// - `TorrentError::InvalidTorrentFile` - Parsing failure
    async fn parse_torrent_file(&self, path: &Path) -> Result<TorrentMetadata, TorrentError>;
}
