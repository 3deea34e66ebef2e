//! Piece scheduler shared by every download worker
//!
//! The scheduler owns the queue of outstanding pieces. Workers `take` a piece,
//! hold it exclusively while downloading, and either `put_back` on failure or
//! report it through `notify_complete` once its shard is on disk.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};

use parking_lot::Mutex;
use tokio::sync::{Notify, watch};

use super::{PieceIndex, TorrentMetadata};
use crate::storage::ShardStore;

/// One unit of verified work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Piece {
    pub index: PieceIndex,
    /// Expected SHA-1 of the piece content
    pub hash: [u8; 20],
    /// True byte length; only the last piece may be shorter than the piece length
    pub length: u64,
    /// Shard file the verified piece is persisted to
    pub save_path: PathBuf,
}

/// Snapshot of completed pieces out of the total.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DownloadProgress {
    pub completed: u32,
    pub total: u32,
}

impl DownloadProgress {
    /// Completion as a percentage in `0.0..=100.0`.
    pub fn percentage(&self) -> f64 {
        if self.total == 0 {
            return 100.0;
        }
        f64::from(self.completed) / f64::from(self.total) * 100.0
    }

    pub fn is_complete(&self) -> bool {
        self.completed >= self.total
    }
}

/// Authoritative work queue for a download session.
///
/// Each piece is either queued exactly once, held by exactly one worker, or
/// completed. Completion is signalled exactly once, after which `take`
/// returns `None` to every caller and returned pieces are dropped.
pub struct PieceManager {
    queue: Mutex<VecDeque<Piece>>,
    available: Notify,
    total: u32,
    completed: AtomicU32,
    requeued: AtomicU32,
    done: watch::Sender<bool>,
    progress: watch::Sender<DownloadProgress>,
}

impl PieceManager {
    /// Creates a scheduler seeded with `pieces` in queue order.
    pub fn new(pieces: Vec<Piece>) -> Self {
        let total = pieces.len() as u32;
        let (done, _) = watch::channel(total == 0);
        let (progress, _) = watch::channel(DownloadProgress {
            completed: 0,
            total,
        });

        Self {
            queue: Mutex::new(pieces.into()),
            available: Notify::new(),
            total,
            completed: AtomicU32::new(0),
            requeued: AtomicU32::new(0),
            done,
            progress,
        }
    }

    /// Seeds one piece per hash in `metadata`, saved into `shards`.
    pub fn from_metadata(metadata: &TorrentMetadata, shards: &ShardStore) -> Self {
        let pieces = metadata
            .piece_hashes
            .iter()
            .enumerate()
            .map(|(i, hash)| {
                let index = PieceIndex::new(i as u32);
                Piece {
                    index,
                    hash: *hash,
                    length: metadata.piece_size(index),
                    save_path: shards.shard_path(index),
                }
            })
            .collect();

        Self::new(pieces)
    }

    /// Removes the next queued piece, waiting while the queue is empty.
    ///
    /// Returns `None` once every piece has completed; a caller waiting at
    /// that moment is woken rather than left blocked.
    pub async fn take(&self) -> Option<Piece> {
        let mut done = self.done.subscribe();

        loop {
            let notified = self.available.notified();
            tokio::pin!(notified);
            // Register before checking the queue so a put_back in between is not missed
            notified.as_mut().enable();

            if self.is_complete() {
                return None;
            }
            if let Some(piece) = self.queue.lock().pop_front() {
                return Some(piece);
            }

            tokio::select! {
                _ = &mut notified => {}
                _ = done.wait_for(|done| *done) => return None,
            }
        }
    }

    /// Returns a piece a worker could not complete.
    pub fn put_back(&self, piece: Piece) {
        if self.is_complete() {
            return;
        }

        tracing::debug!("Piece {} returned to queue", piece.index);
        self.queue.lock().push_back(piece);
        self.requeued.fetch_add(1, Ordering::Relaxed);
        self.available.notify_one();
    }

    /// Records a verified and persisted piece.
    ///
    /// Returns `true` for the single call that completed the download.
    pub fn notify_complete(&self, piece: &Piece) -> bool {
        let total = self.total;
        let Ok(previous) =
            self.completed
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |completed| {
                    (completed < total).then_some(completed + 1)
                })
        else {
            tracing::warn!("Piece {} completed after download finished", piece.index);
            return false;
        };

        let completed = previous + 1;
        self.progress.send_if_modified(|progress| {
            // Concurrent completions may publish out of order
            if completed > progress.completed {
                progress.completed = completed;
                true
            } else {
                false
            }
        });

        let progress = DownloadProgress { completed, total };
        tracing::info!(
            "Downloaded piece {} ({}/{}, {:.1}%)",
            piece.index,
            completed,
            total,
            progress.percentage()
        );

        if completed == total {
            self.queue.lock().clear();
            self.done.send_replace(true);
            self.available.notify_waiters();
            tracing::info!("All {} pieces downloaded", total);
            return true;
        }

        false
    }

    /// Resolves once every piece has completed.
    pub async fn wait_complete(&self) {
        let mut done = self.done.subscribe();
        let _ = done.wait_for(|done| *done).await;
    }

    pub fn is_complete(&self) -> bool {
        *self.done.borrow()
    }

    /// Receiver of progress updates, one per completed piece.
    pub fn subscribe_progress(&self) -> watch::Receiver<DownloadProgress> {
        self.progress.subscribe()
    }

    pub fn completed(&self) -> u32 {
        self.completed.load(Ordering::Acquire)
    }

    pub fn total(&self) -> u32 {
        self.total
    }

    /// Number of pieces currently waiting in the queue.
    pub fn queued(&self) -> usize {
        self.queue.lock().len()
    }

    /// Number of times a piece has been returned to the queue.
    pub fn requeued(&self) -> u32 {
        self.requeued.load(Ordering::Relaxed)
    }
}
