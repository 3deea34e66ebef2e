//! Undertow Core - BitTorrent swarm download engine
//!
//! This crate provides the building blocks for downloading content from a
//! BitTorrent swarm: torrent metadata decoding, HTTP and UDP tracker clients,
//! the peer wire protocol, piece scheduling across a dynamic worker pool and
//! final reassembly of verified pieces into the target files.

pub mod config;
pub mod storage;
pub mod torrent;
pub mod tracing_setup;

// Re-export main types for convenient access
pub use config::UndertowConfig;
pub use storage::{FileAssembler, ShardStore, StorageError};
pub use torrent::{DownloadSession, SessionReport, TorrentError};

/// Core errors that can bubble up from any Undertow subsystem.
///
/// High-level error types representing failures in core functionality.
#[derive(Debug, thiserror::Error)]
pub enum UndertowError {
    #[error("Torrent error: {0}")]
    Torrent(#[from] TorrentError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Configuration error: {reason}")]
    Configuration { reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl UndertowError {
    /// Returns a user-friendly error message suitable for display.
    pub fn user_message(&self) -> String {
        match self {
            UndertowError::Torrent(e) => match e {
                TorrentError::InvalidTorrentFile { reason } => {
                    format!("Invalid torrent file: {reason}")
                }
                TorrentError::TrackerConnectionFailed { url } => {
                    format!("Could not connect to tracker: {url}")
                }
                TorrentError::SessionStalled { elapsed } => {
                    format!("Download made no progress for {}s", elapsed.as_secs())
                }
                TorrentError::Storage(_) => "Failed to assemble downloaded files".to_string(),
                _ => "Download error occurred".to_string(),
            },
            UndertowError::Storage(e) => format!("Failed to assemble downloaded files: {e}"),
            UndertowError::Configuration { reason } => format!("Configuration error: {reason}"),
            UndertowError::Io(_) => "File system error occurred".to_string(),
        }
    }

    /// Checks if this error is due to user input validation.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            UndertowError::Configuration { .. }
                | UndertowError::Torrent(TorrentError::InvalidTorrentFile { .. })
        )
    }
}

pub type Result<T> = std::result::Result<T, UndertowError>;
