//! Download session orchestration
//!
//! A session wires the components together for one torrent: it seeds the
//! piece scheduler, starts tracker discovery, the worker pool and the swarm
//! monitor, waits for every piece to land, shuts everything down through a
//! shared watch signal and finally assembles the output files.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, watch};

use super::discovery::PeerDiscovery;
use super::monitor::{PeerTally, SwarmMonitor};
use super::piece_manager::PieceManager;
use super::pool::WorkerPool;
use super::protocol::PeerId;
use super::tracker::{AnnounceRequest, TrackerClient, tracker_for_url};
use super::{TorrentError, TorrentMetadata};
use crate::config::UndertowConfig;
use crate::storage::{FileAssembler, ShardStore};

/// Summary of a finished session.
#[derive(Debug, Clone)]
pub struct SessionReport {
    /// Output files in torrent order
    pub files: Vec<PathBuf>,
    pub total_pieces: u32,
    pub total_bytes: u64,
    /// Times a piece went back to the queue
    pub requeued: u32,
    /// Per-peer contributions, busiest first
    pub peers: Vec<PeerTally>,
    pub elapsed: Duration,
}

/// Downloads one torrent from its swarm.
///
/// Trackers default to the metadata's announce URLs; tests and embedders can
/// replace them with [`DownloadSession::with_trackers`] and seed known peers
/// with [`DownloadSession::with_initial_peers`].
pub struct DownloadSession {
    metadata: Arc<TorrentMetadata>,
    config: Arc<UndertowConfig>,
    trackers: Option<Vec<Arc<dyn TrackerClient>>>,
    initial_peers: Vec<SocketAddr>,
}

impl DownloadSession {
    pub fn new(metadata: TorrentMetadata, config: UndertowConfig) -> Self {
        Self {
            metadata: Arc::new(metadata),
            config: Arc::new(config),
            trackers: None,
            initial_peers: Vec::new(),
        }
    }

    /// Uses `trackers` instead of the metadata's announce URLs.
    pub fn with_trackers(mut self, trackers: Vec<Arc<dyn TrackerClient>>) -> Self {
        self.trackers = Some(trackers);
        self
    }

    /// Peers handed to the worker pool before any tracker answers.
    pub fn with_initial_peers(mut self, peers: impl IntoIterator<Item = SocketAddr>) -> Self {
        self.initial_peers.extend(peers);
        self
    }

    pub fn metadata(&self) -> &TorrentMetadata {
        &self.metadata
    }

    /// Runs the session to completion and assembles the output.
    ///
    /// # Errors
    ///
    /// - `TorrentError::SessionStalled` - If the stall timeout elapsed without a piece completing
    /// - `TorrentError::Storage` - If assembling the output files failed
    pub async fn run(self) -> Result<SessionReport, TorrentError> {
        let started = Instant::now();
        let metadata = Arc::clone(&self.metadata);
        let config = Arc::clone(&self.config);

        let peer_id = PeerId::generate_with_prefix(config.torrent.client_id);
        let shards = ShardStore::from_config(&config.storage);
        let pieces = Arc::new(PieceManager::from_metadata(&metadata, &shards));

        tracing::info!(
            "Starting download of {} ({}, {} pieces, {} bytes)",
            metadata.name,
            metadata.info_hash,
            pieces.total(),
            metadata.total_length()
        );

        let trackers = self.trackers.unwrap_or_else(|| build_trackers(&metadata, &config));
        if trackers.is_empty() && self.initial_peers.is_empty() {
            tracing::warn!("No usable trackers or peers; the download cannot make progress");
        }

        let (shutdown_tx, shutdown) = watch::channel(false);

        let request = AnnounceRequest::new(
            metadata.info_hash,
            peer_id,
            config.network.listen_port,
            metadata.total_length(),
        );
        let (mut discovery, addresses) = PeerDiscovery::new(trackers, request, &config.network);
        for peer in self.initial_peers {
            discovery.add_peer(peer);
        }
        discovery.start(shutdown.clone());

        let (events_tx, events) = mpsc::unbounded_channel();
        let pool = WorkerPool::new(
            metadata.info_hash,
            peer_id,
            Arc::clone(&pieces),
            Arc::clone(&config),
            events_tx,
            shutdown.clone(),
        );
        let pool = tokio::spawn(pool.run(addresses));

        let monitor = SwarmMonitor::new(
            events,
            discovery.refresh_handle(),
            config.network.more_peers_interval,
        );
        let monitor = tokio::spawn(monitor.run(shutdown));

        let outcome = wait_for_completion(&pieces, config.torrent.stall_timeout).await;

        shutdown_tx.send_replace(true);
        discovery.join().await;
        if let Err(e) = pool.await {
            tracing::error!("Worker pool task failed: {}", e);
        }
        let peers = monitor.await.unwrap_or_else(|e| {
            tracing::error!("Swarm monitor task failed: {}", e);
            Vec::new()
        });

        outcome?;

        let assembler = FileAssembler::new(shards, config.storage.output_dir.clone());
        let files = assembler.assemble(&metadata).await?;

        let report = SessionReport {
            files,
            total_pieces: pieces.total(),
            total_bytes: metadata.total_length(),
            requeued: pieces.requeued(),
            peers,
            elapsed: started.elapsed(),
        };
        tracing::info!(
            "Finished {} in {:.1}s ({} re-queued pieces)",
            metadata.name,
            report.elapsed.as_secs_f64(),
            report.requeued
        );

        Ok(report)
    }
}

/// One client per announce URL; unsupported URLs are skipped.
fn build_trackers(metadata: &TorrentMetadata, config: &UndertowConfig) -> Vec<Arc<dyn TrackerClient>> {
    metadata
        .announce_urls
        .iter()
        .filter_map(|url| match tracker_for_url(url, &config.network) {
            Ok(tracker) => Some(tracker),
            Err(e) => {
                tracing::warn!("Skipping tracker {}: {}", url, e);
                None
            }
        })
        .collect()
}

/// Waits until every piece completes.
///
/// With a stall timeout the wait fails once that long passes without any
/// piece completing.
async fn wait_for_completion(
    pieces: &PieceManager,
    stall_timeout: Option<Duration>,
) -> Result<(), TorrentError> {
    let Some(stall_timeout) = stall_timeout else {
        pieces.wait_complete().await;
        return Ok(());
    };

    let mut progress = pieces.subscribe_progress();
    loop {
        tokio::select! {
            _ = pieces.wait_complete() => return Ok(()),
            changed = tokio::time::timeout(stall_timeout, progress.changed()) => match changed {
                Ok(Ok(())) => {}
                Ok(Err(_)) => {
                    pieces.wait_complete().await;
                    return Ok(());
                }
                Err(_) => {
                    return Err(TorrentError::SessionStalled {
                        elapsed: stall_timeout,
                    });
                }
            },
        }
    }
}
