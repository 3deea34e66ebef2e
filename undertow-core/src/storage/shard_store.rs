//! Per-piece shard files

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tokio::fs;

use super::StorageError;
use crate::config::StorageConfig;
use crate::torrent::PieceIndex;

/// Directory of piece shards named `<prefix><index>`.
#[derive(Debug, Clone)]
pub struct ShardStore {
    dir: PathBuf,
    prefix: String,
}

impl ShardStore {
    pub fn new(dir: impl Into<PathBuf>, prefix: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            prefix: prefix.into(),
        }
    }

    pub fn from_config(config: &StorageConfig) -> Self {
        Self::new(config.shard_dir.clone(), config.shard_prefix)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Location of the shard holding piece `index`.
    pub fn shard_path(&self, index: PieceIndex) -> PathBuf {
        self.dir.join(format!("{}{}", self.prefix, index.as_u32()))
    }

    /// Writes a verified piece to `path`.
    ///
    /// The data goes to a temporary sibling first and is renamed into place,
    /// so a shard is either absent or complete.
    ///
    /// # Errors
    ///
    /// - `StorageError::Io` - If the directory or file could not be written
    pub async fn write_shard(path: &Path, data: &[u8]) -> Result<(), StorageError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).await?;
        }

        let mut partial = path.as_os_str().to_owned();
        partial.push(".part");
        let partial = PathBuf::from(partial);

        fs::write(&partial, data).await?;
        fs::rename(&partial, path).await?;
        Ok(())
    }

    /// Reads the shard for `index` and checks it holds exactly `expected` bytes.
    ///
    /// # Errors
    ///
    /// - `StorageError::ShardMissing` - If no shard exists for the piece
    /// - `StorageError::ShardTruncated` - If its length is wrong
    /// - `StorageError::Io` - If reading failed
    pub async fn load(&self, index: PieceIndex, expected: u64) -> Result<Vec<u8>, StorageError> {
        let path = self.shard_path(index);
        let data = match fs::read(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(StorageError::ShardMissing { index, path });
            }
            Err(e) => return Err(e.into()),
        };

        if data.len() as u64 != expected {
            return Err(StorageError::ShardTruncated {
                index,
                expected,
                actual: data.len() as u64,
            });
        }

        Ok(data)
    }

    /// Deletes the shard for `index`; a missing shard is not an error.
    ///
    /// # Errors
    ///
    /// - `StorageError::Io` - If deletion failed
    pub async fn remove(&self, index: PieceIndex) -> Result<(), StorageError> {
        match fs::remove_file(self.shard_path(index)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
