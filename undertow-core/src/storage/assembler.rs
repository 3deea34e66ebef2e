//! Reassembly of piece shards into the torrent's files

use std::path::PathBuf;

use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;

use super::{ShardStore, StorageError};
use crate::torrent::{PieceIndex, TorrentMetadata};

/// Streams piece shards into the output files.
///
/// Files are written in torrent order while a cursor walks the pieces; a
/// file may span several pieces and a piece may span several files. Each
/// shard is deleted as soon as all of its bytes have been written.
pub struct FileAssembler {
    shards: ShardStore,
    output_dir: PathBuf,
}

/// Position in the concatenated piece stream.
struct PieceCursor {
    index: u32,
    offset: usize,
    shard: Option<Vec<u8>>,
}

impl FileAssembler {
    pub fn new(shards: ShardStore, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            shards,
            output_dir: output_dir.into(),
        }
    }

    /// Output location of every file, in torrent order.
    ///
    /// Multi-file torrents are rooted in a directory named after the torrent.
    pub fn output_paths(&self, metadata: &TorrentMetadata) -> Vec<PathBuf> {
        let root = if metadata.is_multi_file() {
            self.output_dir.join(&metadata.name)
        } else {
            self.output_dir.clone()
        };

        metadata
            .files()
            .iter()
            .map(|file| file.path.iter().fold(root.clone(), |path, c| path.join(c)))
            .collect()
    }

    /// Writes every file of `metadata` from the shards on disk.
    ///
    /// Returns the paths of the written files.
    ///
    /// # Errors
    ///
    /// - `StorageError::ShardMissing` - If a shard needed for a file is absent
    /// - `StorageError::ShardTruncated` - If a shard length differs from its piece
    /// - `StorageError::LengthMismatch` - If a finished file has the wrong length
    /// - `StorageError::Io` - If a file or directory could not be written
    pub async fn assemble(&self, metadata: &TorrentMetadata) -> Result<Vec<PathBuf>, StorageError> {
        let mut cursor = PieceCursor {
            index: 0,
            offset: 0,
            shard: None,
        };
        let paths = self.output_paths(metadata);

        for (file, path) in metadata.files().iter().zip(&paths) {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).await?;
            }
            let mut output = File::create(path).await?;

            let mut written = 0u64;
            while written < file.length {
                if cursor.shard.is_none() {
                    let index = PieceIndex::new(cursor.index);
                    let expected = metadata.piece_size(index);
                    cursor.shard = Some(self.shards.load(index, expected).await?);
                }
                let Some(shard) = cursor.shard.as_ref() else {
                    continue;
                };

                let available = shard.len() - cursor.offset;
                let chunk = available.min((file.length - written) as usize);
                output
                    .write_all(&shard[cursor.offset..cursor.offset + chunk])
                    .await?;
                cursor.offset += chunk;
                written += chunk as u64;

                if cursor.offset == shard.len() {
                    self.shards.remove(PieceIndex::new(cursor.index)).await?;
                    cursor.index += 1;
                    cursor.offset = 0;
                    cursor.shard = None;
                }
            }

            output.flush().await?;
            let on_disk = output.metadata().await?.len();
            if on_disk != file.length {
                return Err(StorageError::LengthMismatch {
                    path: path.clone(),
                    expected: file.length,
                    written: on_disk,
                });
            }

            tracing::debug!("Assembled {} ({} bytes)", path.display(), file.length);
        }

        tracing::info!(
            "Assembled {} file(s) from {} pieces",
            paths.len(),
            cursor.index
        );
        Ok(paths)
    }
}
