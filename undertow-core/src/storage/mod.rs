//! Storage layer for torrent data.
//!
//! Verified pieces are persisted as one shard file per piece index. Once the
//! download completes the assembler streams the shards, in torrent order,
//! into the final output files and removes them.

pub mod assembler;
pub mod shard_store;

use std::path::PathBuf;

pub use assembler::FileAssembler;
pub use shard_store::ShardStore;

use crate::torrent::PieceIndex;

/// Errors that occur during storage operations.
///
/// Any of these during assembly means the intermediate shards are corrupt,
/// which ends the download session.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Shard for a piece is not on disk
    #[error("Shard for piece {index} missing at {}", path.display())]
    ShardMissing {
        /// Index of the piece whose shard was not found
        index: PieceIndex,
        /// Location that was expected to hold it
        path: PathBuf,
    },

    /// Shard is shorter or longer than the piece it holds
    #[error("Shard for piece {index} has {actual} bytes, expected {expected}")]
    ShardTruncated {
        index: PieceIndex,
        expected: u64,
        actual: u64,
    },

    /// Output file length differs from the declared length
    #[error("Wrote {written} bytes to {}, expected {expected}", path.display())]
    LengthMismatch {
        path: PathBuf,
        expected: u64,
        written: u64,
    },

    /// Standard I/O error occurred
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
