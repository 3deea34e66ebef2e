//! Swarm monitor: per-peer tallies and demand for more peers

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior};

use super::discovery::PeerRefresh;
use super::worker::WorkerEvent;

/// Pieces contributed by one peer over the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerTally {
    pub address: SocketAddr,
    pub pieces: u32,
    /// Whether the peer's worker has exited
    pub exited: bool,
}

/// Watches worker events and asks discovery for more peers whenever a whole
/// window passes without any piece completing.
pub struct SwarmMonitor {
    events: mpsc::UnboundedReceiver<WorkerEvent>,
    refresh: PeerRefresh,
    window: Duration,
    tallies: HashMap<SocketAddr, PeerTally>,
    completed_in_window: u32,
}

impl SwarmMonitor {
    pub fn new(
        events: mpsc::UnboundedReceiver<WorkerEvent>,
        refresh: PeerRefresh,
        window: Duration,
    ) -> Self {
        Self {
            events,
            refresh,
            window,
            tallies: HashMap::new(),
            completed_in_window: 0,
        }
    }

    /// Runs until every worker event sender is gone.
    ///
    /// Returns the tallies, busiest peer first. Once `shutdown` is set no
    /// more peers are requested but remaining events are still counted.
    pub async fn run(mut self, shutdown: watch::Receiver<bool>) -> Vec<PeerTally> {
        let mut ticker = tokio::time::interval_at(Instant::now() + self.window, self.window);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                event = self.events.recv() => match event {
                    Some(event) => self.record(event),
                    None => break,
                },
                _ = ticker.tick() => {
                    if !*shutdown.borrow() {
                        self.end_window();
                    }
                }
            }
        }

        self.into_tallies()
    }

    fn record(&mut self, event: WorkerEvent) {
        match event {
            WorkerEvent::PieceDownloaded { address, index } => {
                let tally = self.tally(address);
                tally.pieces += 1;
                let pieces = tally.pieces;
                self.completed_in_window += 1;
                tracing::debug!("Peer {} delivered piece {} ({} total)", address, index, pieces);
            }
            WorkerEvent::PeerExited { address } => {
                self.tally(address).exited = true;
            }
        }
    }

    fn end_window(&mut self) {
        if self.completed_in_window == 0 {
            tracing::debug!("No pieces completed in the last {:?}, requesting more peers", self.window);
            self.refresh.request_more_peers();
        }
        self.completed_in_window = 0;
    }

    fn tally(&mut self, address: SocketAddr) -> &mut PeerTally {
        self.tallies.entry(address).or_insert_with(|| PeerTally {
            address,
            pieces: 0,
            exited: false,
        })
    }

    fn into_tallies(self) -> Vec<PeerTally> {
        let mut tallies: Vec<_> = self.tallies.into_values().collect();
        tallies.sort_by(|a, b| b.pieces.cmp(&a.pieces).then(a.address.cmp(&b.address)));
        tallies
    }
}
