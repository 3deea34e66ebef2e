//! Dynamic pool of download workers keyed by peer address

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use super::piece_manager::PieceManager;
use super::protocol::PeerId;
use super::worker::{DownloadWorker, WorkerEvent};
use super::InfoHash;
use crate::config::UndertowConfig;

/// Spawns one worker per discovered peer address.
///
/// Membership is keyed by address: a peer that already has a running worker
/// never gets a second one. Workers that have exited are reaped, so a peer
/// announced again later gets a fresh worker.
pub struct WorkerPool {
    workers: HashMap<SocketAddr, JoinHandle<()>>,
    info_hash: InfoHash,
    peer_id: PeerId,
    pieces: Arc<PieceManager>,
    config: Arc<UndertowConfig>,
    events: mpsc::UnboundedSender<WorkerEvent>,
    shutdown: watch::Receiver<bool>,
}

impl WorkerPool {
    pub fn new(
        info_hash: InfoHash,
        peer_id: PeerId,
        pieces: Arc<PieceManager>,
        config: Arc<UndertowConfig>,
        events: mpsc::UnboundedSender<WorkerEvent>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            workers: HashMap::new(),
            info_hash,
            peer_id,
            pieces,
            config,
            events,
            shutdown,
        }
    }

    /// Starts a worker for `address` unless one is already running.
    ///
    /// Returns whether a worker was spawned.
    pub fn spawn_worker(&mut self, address: SocketAddr) -> bool {
        self.reap();

        if *self.shutdown.borrow() || self.pieces.is_complete() {
            return false;
        }

        match self.workers.entry(address) {
            Entry::Occupied(_) => {
                tracing::trace!("Peer {} already has a worker", address);
                false
            }
            Entry::Vacant(slot) => {
                let worker = DownloadWorker::new(
                    address,
                    self.info_hash,
                    self.peer_id,
                    Arc::clone(&self.pieces),
                    Arc::clone(&self.config),
                    self.events.clone(),
                    self.shutdown.clone(),
                );
                slot.insert(tokio::spawn(worker.run()));
                tracing::debug!("Spawned worker for {}", address);
                true
            }
        }
    }

    /// Whether a live worker exists for `address`.
    pub fn contains(&self, address: &SocketAddr) -> bool {
        self.workers
            .get(address)
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Number of registered workers, including ones not yet reaped.
    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Spawns workers for every address on `addresses` until shutdown, then
    /// waits for all of them to exit.
    pub async fn run(mut self, mut addresses: mpsc::UnboundedReceiver<SocketAddr>) {
        let mut shutdown = self.shutdown.clone();

        loop {
            tokio::select! {
                Some(address) = addresses.recv() => {
                    self.spawn_worker(address);
                }
                _ = shutdown.wait_for(|stop| *stop) => break,
            }
        }

        self.join().await;
    }

    /// Waits for every worker to exit.
    pub async fn join(self) {
        let count = self.workers.len();
        let handles = self.workers.into_values();

        for result in futures::future::join_all(handles).await {
            if let Err(e) = result {
                tracing::error!("Download worker task failed: {}", e);
            }
        }

        tracing::debug!("Joined {} worker(s)", count);
    }

    fn reap(&mut self) {
        self.workers.retain(|_, handle| !handle.is_finished());
    }
}
