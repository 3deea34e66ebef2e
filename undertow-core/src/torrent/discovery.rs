//! Tracker-driven peer discovery
//!
//! One announcer task runs per tracker. Each re-announces on the interval the
//! tracker asked for, or earlier when more peers are requested, and pushes
//! every returned address onto a single unbounded stream.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::Instrument;

use super::tracker::{AnnounceRequest, TrackerClient};
use crate::config::NetworkConfig;

/// Broadcasts "get more peers" to every announcer.
#[derive(Clone)]
pub struct PeerRefresh {
    generation: Arc<watch::Sender<u64>>,
}

impl PeerRefresh {
    fn new() -> Self {
        let (generation, _) = watch::channel(0);
        Self {
            generation: Arc::new(generation),
        }
    }

    /// Wakes every announcer for an immediate announce. Never blocks.
    pub fn request_more_peers(&self) {
        self.generation.send_modify(|generation| *generation += 1);
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<u64> {
        self.generation.subscribe()
    }
}

/// Runs one announcer per tracker and merges their peers into one stream.
pub struct PeerDiscovery {
    trackers: Vec<Arc<dyn TrackerClient>>,
    request: AnnounceRequest,
    max_failures: u32,
    min_interval: Duration,
    peers: mpsc::UnboundedSender<SocketAddr>,
    refresh: PeerRefresh,
    announcers: Vec<JoinHandle<()>>,
}

/// Settings shared by every announcer task.
#[derive(Clone)]
struct AnnouncerContext {
    request: AnnounceRequest,
    max_failures: u32,
    min_interval: Duration,
    peers: mpsc::UnboundedSender<SocketAddr>,
}

impl PeerDiscovery {
    /// Creates the coordinator and the receiving end of its address stream.
    ///
    /// Announcers do not run until [`PeerDiscovery::start`] is called.
    pub fn new(
        trackers: Vec<Arc<dyn TrackerClient>>,
        request: AnnounceRequest,
        config: &NetworkConfig,
    ) -> (Self, mpsc::UnboundedReceiver<SocketAddr>) {
        let (peers, addresses) = mpsc::unbounded_channel();

        let discovery = Self {
            trackers,
            request,
            max_failures: config.max_announce_failures.max(1),
            min_interval: config.min_announce_interval,
            peers,
            refresh: PeerRefresh::new(),
            announcers: Vec::new(),
        };

        (discovery, addresses)
    }

    /// Pushes an address that did not come from a tracker.
    pub fn add_peer(&self, address: SocketAddr) {
        let _ = self.peers.send(address);
    }

    pub fn request_more_peers(&self) {
        self.refresh.request_more_peers();
    }

    /// Handle for requesting more peers from another task.
    pub fn refresh_handle(&self) -> PeerRefresh {
        self.refresh.clone()
    }

    pub fn tracker_count(&self) -> usize {
        self.trackers.len()
    }

    /// Spawns one announcer per tracker; each announces immediately.
    pub fn start(&mut self, shutdown: watch::Receiver<bool>) {
        let context = AnnouncerContext {
            request: self.request.clone(),
            max_failures: self.max_failures,
            min_interval: self.min_interval,
            peers: self.peers.clone(),
        };

        for tracker in &self.trackers {
            let span = tracing::info_span!("announcer", url = %tracker.tracker_url());
            let task = run_announcer(
                Arc::clone(tracker),
                context.clone(),
                self.refresh.subscribe(),
                shutdown.clone(),
            );
            self.announcers.push(tokio::spawn(task.instrument(span)));
        }

        tracing::debug!("Started {} announcer(s)", self.announcers.len());
    }

    /// Waits for every announcer to stop.
    pub async fn join(self) {
        for result in futures::future::join_all(self.announcers).await {
            if let Err(e) = result {
                tracing::error!("Announcer task failed: {}", e);
            }
        }
    }
}

async fn run_announcer(
    tracker: Arc<dyn TrackerClient>,
    context: AnnouncerContext,
    mut refresh: watch::Receiver<u64>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut failures = 0u32;
    let mut wait = Duration::ZERO;

    while failures < context.max_failures {
        tokio::select! {
            _ = tokio::time::sleep(wait) => {}
            changed = refresh.changed() => {
                if changed.is_err() {
                    return;
                }
                tracing::debug!("More peers requested");
            }
            _ = shutdown.wait_for(|stop| *stop) => return,
        }

        let result = tokio::select! {
            result = tracker.announce(context.request.clone()) => result,
            _ = shutdown.wait_for(|stop| *stop) => return,
        };

        match result {
            Ok(response) => {
                failures = 0;
                tracing::info!(
                    "Tracker returned {} peers, next announce in {}s",
                    response.peers.len(),
                    response.interval
                );
                for peer in response.peers {
                    if context.peers.send(peer).is_err() {
                        return;
                    }
                }
                wait = Duration::from_secs(u64::from(response.interval)).max(context.min_interval);
            }
            Err(e) => {
                failures += 1;
                tracing::warn!(
                    "Announce failed ({}/{}): {}",
                    failures,
                    context.max_failures,
                    e
                );
                wait = context.min_interval;
            }
        }
    }

    tracing::warn!(
        "Abandoning tracker after {} consecutive failures",
        context.max_failures
    );
}
