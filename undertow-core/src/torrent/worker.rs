//! Per-peer download worker
//!
//! A worker owns one peer address for its whole lifetime. Each cycle dials the
//! peer, then pulls pieces from the scheduler and drives the block request
//! state machine until the scheduler runs dry or the connection fails. Failed
//! cycles are retried after a fixed delay up to a bounded number of attempts.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tracing::Instrument;

use super::piece_manager::{Piece, PieceManager};
use super::protocol::{Bitfield, PeerConnection, PeerId, PeerMessage};
use super::{InfoHash, PieceIndex, TorrentError};
use crate::config::UndertowConfig;
use crate::storage::ShardStore;

/// Reported by workers to the swarm monitor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerEvent {
    /// A verified piece was persisted from this peer
    PieceDownloaded {
        address: SocketAddr,
        index: PieceIndex,
    },
    /// The worker gave up on this peer or was shut down
    PeerExited { address: SocketAddr },
}

/// How a single piece attempt ended without a connection error.
enum PieceOutcome {
    Downloaded(Vec<u8>),
    /// Peer choked us mid-piece
    Choked,
    /// Peer's bitfield says it does not have the piece
    Unavailable,
    Shutdown,
}

/// What the worker knows about the remote peer during one connection.
struct RemoteState {
    choked: bool,
    interested: bool,
    bitfield: Option<Bitfield>,
    piece_count: u32,
}

impl RemoteState {
    fn new(piece_count: u32) -> Self {
        Self {
            choked: true,
            interested: false,
            bitfield: None,
            piece_count,
        }
    }

    fn record_bitfield(&mut self, bytes: &[u8]) {
        self.bitfield = Some(Bitfield::sized(bytes, self.piece_count as usize));
    }

    /// Returns `false` for indices outside the torrent.
    fn record_have(&mut self, index: PieceIndex) -> bool {
        if index.as_u32() >= self.piece_count {
            return false;
        }
        if let Some(bitfield) = self.bitfield.as_mut() {
            bitfield.set(index);
        }
        true
    }

    /// A peer that never sent a bitfield is assumed to have every piece.
    fn has(&self, piece: &Piece) -> bool {
        self.bitfield
            .as_ref()
            .is_none_or(|bitfield| bitfield.has(piece.index))
    }
}

/// Downloads pieces from a single peer.
pub struct DownloadWorker {
    address: SocketAddr,
    info_hash: InfoHash,
    peer_id: PeerId,
    pieces: Arc<PieceManager>,
    config: Arc<UndertowConfig>,
    events: mpsc::UnboundedSender<WorkerEvent>,
    shutdown: watch::Receiver<bool>,
}

impl DownloadWorker {
    pub fn new(
        address: SocketAddr,
        info_hash: InfoHash,
        peer_id: PeerId,
        pieces: Arc<PieceManager>,
        config: Arc<UndertowConfig>,
        events: mpsc::UnboundedSender<WorkerEvent>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            address,
            info_hash,
            peer_id,
            pieces,
            config,
            events,
            shutdown,
        }
    }

    pub fn address(&self) -> SocketAddr {
        self.address
    }

    /// Runs download cycles against the peer until the download completes,
    /// the session shuts down or the attempt budget is spent.
    pub async fn run(mut self) {
        let span = tracing::info_span!("peer", address = %self.address);
        self.run_attempts().instrument(span).await;
    }

    async fn run_attempts(&mut self) {
        let max_attempts = self.config.torrent.worker_max_attempts.max(1);
        let retry_delay = self.config.torrent.worker_retry_delay;

        for attempt in 1..=max_attempts {
            match self.download_cycle().await {
                Ok(()) => break,
                Err(e) if attempt == max_attempts => {
                    tracing::warn!("Giving up on peer after {} attempts: {}", attempt, e);
                    break;
                }
                Err(e) => {
                    tracing::debug!("Attempt {}/{} failed: {}", attempt, max_attempts, e);
                }
            }

            if self.is_shutdown() || self.pieces.is_complete() {
                break;
            }

            tokio::select! {
                _ = tokio::time::sleep(retry_delay) => {}
                _ = self.shutdown.wait_for(|stop| *stop) => break,
            }
        }

        let _ = self.events.send(WorkerEvent::PeerExited {
            address: self.address,
        });
    }

    /// One handshake-through-download pass over a fresh connection.
    ///
    /// Returns `Ok` when there is no more work or the session shut down.
    ///
    /// # Errors
    ///
    /// - `TorrentError::PeerConnectionError` - If dialing, reading or writing failed
    /// - `TorrentError::ProtocolError` - If the peer violated the wire protocol
    /// - `TorrentError::NoUsefulPieces` - If the peer has none of the queued pieces
    /// - `TorrentError::Storage` - If a verified piece could not be persisted
    async fn download_cycle(&mut self) -> Result<(), TorrentError> {
        let mut connection = PeerConnection::new(self.address, &self.config.network);
        let result = self.drive(&mut connection).await;
        connection.close().await;
        result
    }

    async fn drive(&mut self, connection: &mut PeerConnection) -> Result<(), TorrentError> {
        tokio::select! {
            result = connection.handshake(self.info_hash, self.peer_id) => result?,
            _ = self.shutdown.wait_for(|stop| *stop) => return Ok(()),
        }

        let mut remote = RemoteState::new(self.pieces.total());
        let mut skipped = 0usize;

        loop {
            let piece = tokio::select! {
                piece = self.pieces.take() => piece,
                _ = self.shutdown.wait_for(|stop| *stop) => return Ok(()),
            };
            let Some(piece) = piece else {
                tracing::debug!("No pieces left to download");
                return Ok(());
            };

            if !remote.has(&piece) {
                self.pieces.put_back(piece);
                skipped += 1;
                // A full rotation of the queue without a match
                if skipped >= self.pieces.queued() {
                    return Err(TorrentError::NoUsefulPieces {
                        address: self.address,
                    });
                }
                continue;
            }
            skipped = 0;

            let outcome = match self.download_piece(connection, &piece, &mut remote).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    self.pieces.put_back(piece);
                    return Err(e);
                }
            };

            match outcome {
                PieceOutcome::Downloaded(data) => self.finish_piece(connection, piece, data).await?,
                PieceOutcome::Choked => {
                    tracing::debug!("Choked while downloading piece {}", piece.index);
                    self.pieces.put_back(piece);
                }
                PieceOutcome::Unavailable => {
                    tracing::debug!("Peer does not have piece {}", piece.index);
                    self.pieces.put_back(piece);
                }
                PieceOutcome::Shutdown => {
                    self.pieces.put_back(piece);
                    return Ok(());
                }
            }
        }
    }

    /// Requests every block of `piece` and collects the responses.
    async fn download_piece(
        &mut self,
        connection: &mut PeerConnection,
        piece: &Piece,
        remote: &mut RemoteState,
    ) -> Result<PieceOutcome, TorrentError> {
        tracing::debug!("Downloading piece {} ({} bytes)", piece.index, piece.length);

        let length = piece.length as usize;
        let block_size = self.config.torrent.block_size.max(1) as usize;
        let max_backlog = self.config.torrent.max_backlog.max(1);

        let mut data = vec![0u8; length];
        let mut received = vec![false; length.div_ceil(block_size)];
        let mut downloaded = 0usize;
        let mut requested = 0usize;
        let mut backlog = 0usize;

        while downloaded < length {
            if !remote.choked {
                while backlog < max_backlog && requested < length {
                    let block = (length - requested).min(block_size);
                    let sent = connection
                        .send_request(piece.index, requested as u32, block as u32)
                        .await?;
                    requested += sent as usize;
                    backlog += 1;
                }
            }

            let message = tokio::select! {
                message = connection.read_message() => message?,
                _ = self.shutdown.wait_for(|stop| *stop) => return Ok(PieceOutcome::Shutdown),
            };

            match message {
                PeerMessage::Choke => {
                    remote.choked = true;
                    return Ok(PieceOutcome::Choked);
                }
                PeerMessage::Unchoke => {
                    tracing::trace!("Unchoked");
                    remote.choked = false;
                }
                PeerMessage::Bitfield { bitfield } => {
                    remote.record_bitfield(&bitfield);
                    self.declare_interest(connection, remote).await?;
                    if !remote.has(piece) {
                        return Ok(PieceOutcome::Unavailable);
                    }
                }
                PeerMessage::Have { piece_index } => {
                    if !remote.record_have(piece_index) {
                        tracing::debug!("Ignoring have for unknown piece {}", piece_index);
                        continue;
                    }
                    self.declare_interest(connection, remote).await?;
                }
                PeerMessage::Piece {
                    piece_index,
                    offset,
                    data: block,
                } => {
                    let offset = offset as usize;
                    let slot = offset / block_size;
                    let in_range = piece_index == piece.index
                        && offset % block_size == 0
                        && offset + block.len() <= length
                        && !block.is_empty();

                    if !in_range || received[slot] {
                        tracing::trace!(
                            "Ignoring block {}@{} ({} bytes)",
                            piece_index,
                            offset,
                            block.len()
                        );
                        continue;
                    }

                    data[offset..offset + block.len()].copy_from_slice(&block);
                    received[slot] = true;
                    downloaded += block.len();
                    backlog = backlog.saturating_sub(1);
                }
                other => {
                    tracing::trace!("Ignoring {:?}", other);
                }
            }
        }

        Ok(PieceOutcome::Downloaded(data))
    }

    /// Verifies, persists and reports a fully downloaded piece.
    ///
    /// A hash mismatch returns the piece to the scheduler without ending
    /// the cycle.
    ///
    /// # Errors
    ///
    /// - `TorrentError::Storage` - If the shard could not be written
    async fn finish_piece(
        &mut self,
        connection: &mut PeerConnection,
        piece: Piece,
        data: Vec<u8>,
    ) -> Result<(), TorrentError> {
        if !PeerConnection::hash_matches(&data, &piece.hash) {
            tracing::warn!("{}", TorrentError::PieceHashMismatch { index: piece.index });
            self.pieces.put_back(piece);
            return Ok(());
        }

        if let Err(e) = connection.send_have(piece.index).await {
            tracing::debug!("Failed to send have for piece {}: {}", piece.index, e);
        }

        if let Err(e) = ShardStore::write_shard(&piece.save_path, &data).await {
            tracing::error!("Failed to save piece {}: {}", piece.index, e);
            self.pieces.put_back(piece);
            return Err(e.into());
        }

        let index = piece.index;
        self.pieces.notify_complete(&piece);
        let _ = self.events.send(WorkerEvent::PieceDownloaded {
            address: self.address,
            index,
        });
        Ok(())
    }

    async fn declare_interest(
        &self,
        connection: &mut PeerConnection,
        remote: &mut RemoteState,
    ) -> Result<(), TorrentError> {
        if !remote.interested {
            connection.send_interested().await?;
            remote.interested = true;
        }
        Ok(())
    }

    fn is_shutdown(&self) -> bool {
        *self.shutdown.borrow()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use bytes::Bytes;
    use tempfile::TempDir;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    use super::*;
    use crate::torrent::protocol::{HANDSHAKE_LEN, HandshakeCodec, MessageCodec, PeerHandshake};
    use crate::torrent::test_data::{content, metadata_for_content};

    /// Seeds `content` in `piece_length` pieces to every connection.
    ///
    /// `bitfield` overrides the advertised pieces; `corrupt` flips a byte of
    /// that piece the first time it is served.
    async fn spawn_seed(
        info_hash: InfoHash,
        content: Vec<u8>,
        piece_length: usize,
        bitfield: Option<Vec<u8>>,
        corrupt: Option<u32>,
    ) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let mut corrupt = corrupt;
            loop {
                let Ok((socket, _)) = listener.accept().await else {
                    return;
                };
                let _ = serve(
                    socket,
                    info_hash,
                    &content,
                    piece_length,
                    bitfield.clone(),
                    &mut corrupt,
                )
                .await;
            }
        });

        address
    }

    async fn serve(
        mut socket: TcpStream,
        info_hash: InfoHash,
        content: &[u8],
        piece_length: usize,
        bitfield: Option<Vec<u8>>,
        corrupt: &mut Option<u32>,
    ) -> std::io::Result<()> {
        let mut handshake = [0u8; HANDSHAKE_LEN];
        socket.read_exact(&mut handshake).await?;
        let reply = PeerHandshake::new(info_hash, PeerId::new([5u8; 20]));
        socket
            .write_all(&HandshakeCodec::serialize_handshake(&reply))
            .await?;

        let piece_count = content.len().div_ceil(piece_length);
        let bitfield = bitfield.unwrap_or_else(|| Bitfield::full(piece_count).as_bytes().to_vec());
        socket
            .write_all(&MessageCodec::serialize_message(&PeerMessage::Bitfield {
                bitfield: Bytes::from(bitfield),
            }))
            .await?;
        socket
            .write_all(&MessageCodec::serialize_message(&PeerMessage::Unchoke))
            .await?;

        loop {
            let mut length = [0u8; 4];
            socket.read_exact(&mut length).await?;
            let mut payload = vec![0u8; u32::from_be_bytes(length) as usize];
            socket.read_exact(&mut payload).await?;

            let Ok(PeerMessage::Request {
                piece_index,
                offset,
                length,
            }) = MessageCodec::decode_payload(&payload)
            else {
                continue;
            };

            let start = piece_index.as_u32() as usize * piece_length + offset as usize;
            let mut block = content[start..start + length as usize].to_vec();
            if *corrupt == Some(piece_index.as_u32()) {
                block[0] ^= 0xFF;
                *corrupt = None;
            }

            socket
                .write_all(&MessageCodec::serialize_message(&PeerMessage::Piece {
                    piece_index,
                    offset,
                    data: Bytes::from(block),
                }))
                .await?;
        }
    }

    struct Harness {
        _temp_dir: TempDir,
        pieces: Arc<PieceManager>,
        store: ShardStore,
        config: Arc<UndertowConfig>,
        events: mpsc::UnboundedReceiver<WorkerEvent>,
        events_tx: mpsc::UnboundedSender<WorkerEvent>,
        shutdown: watch::Sender<bool>,
    }

    impl Harness {
        fn new(metadata: &crate::torrent::TorrentMetadata) -> Self {
            let temp_dir = TempDir::new().unwrap();
            let config = UndertowConfig::for_testing().with_download_dir(temp_dir.path());
            let store = ShardStore::from_config(&config.storage);
            let pieces = Arc::new(PieceManager::from_metadata(metadata, &store));
            let (events_tx, events) = mpsc::unbounded_channel();
            let (shutdown, _) = watch::channel(false);

            Self {
                _temp_dir: temp_dir,
                pieces,
                store,
                config: Arc::new(config),
                events,
                events_tx,
                shutdown,
            }
        }

        fn worker(&self, address: SocketAddr, info_hash: InfoHash) -> DownloadWorker {
            DownloadWorker::new(
                address,
                info_hash,
                PeerId::generate(),
                Arc::clone(&self.pieces),
                Arc::clone(&self.config),
                self.events_tx.clone(),
                self.shutdown.subscribe(),
            )
        }
    }

    #[tokio::test]
    async fn test_downloads_all_pieces() {
        let data = content(40000);
        let metadata = metadata_for_content("file.bin", &data, 16384);
        let mut harness = Harness::new(&metadata);
        let address = spawn_seed(metadata.info_hash, data.clone(), 16384, None, None).await;

        let worker = harness.worker(address, metadata.info_hash);
        tokio::time::timeout(Duration::from_secs(10), worker.run())
            .await
            .unwrap();

        assert!(harness.pieces.is_complete());
        assert_eq!(harness.pieces.requeued(), 0);
        for (i, chunk) in data.chunks(16384).enumerate() {
            let shard = std::fs::read(harness.store.shard_path(PieceIndex::new(i as u32))).unwrap();
            assert_eq!(shard, chunk);
        }

        let mut downloaded = Vec::new();
        while let Ok(event) = harness.events.try_recv() {
            downloaded.push(event);
        }
        assert_eq!(downloaded.len(), 4);
        assert_eq!(downloaded[3], WorkerEvent::PeerExited { address });
    }

    #[tokio::test]
    async fn test_hash_mismatch_requeues_piece() {
        let data = content(40000);
        let metadata = metadata_for_content("file.bin", &data, 16384);
        let harness = Harness::new(&metadata);
        let address = spawn_seed(metadata.info_hash, data.clone(), 16384, None, Some(1)).await;

        let worker = harness.worker(address, metadata.info_hash);
        tokio::time::timeout(Duration::from_secs(10), worker.run())
            .await
            .unwrap();

        assert!(harness.pieces.is_complete());
        assert!(harness.pieces.requeued() >= 1);
        let shard = std::fs::read(harness.store.shard_path(PieceIndex::new(1))).unwrap();
        assert_eq!(shard, &data[16384..32768]);
    }

    #[tokio::test]
    async fn test_peer_without_pieces_gives_up() {
        let data = content(40000);
        let metadata = metadata_for_content("file.bin", &data, 16384);
        let harness = Harness::new(&metadata);
        let address =
            spawn_seed(metadata.info_hash, data, 16384, Some(vec![0u8]), None).await;

        let worker = harness.worker(address, metadata.info_hash);
        tokio::time::timeout(Duration::from_secs(10), worker.run())
            .await
            .unwrap();

        assert!(!harness.pieces.is_complete());
        assert_eq!(harness.pieces.queued(), 3);
        assert_eq!(harness.pieces.completed(), 0);
    }

    #[tokio::test]
    async fn test_unreachable_peer_exhausts_attempts() {
        let data = content(1000);
        let metadata = metadata_for_content("file.bin", &data, 16384);
        let mut harness = Harness::new(&metadata);
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        drop(listener);

        let worker = harness.worker(address, metadata.info_hash);
        tokio::time::timeout(Duration::from_secs(10), worker.run())
            .await
            .unwrap();

        assert_eq!(harness.pieces.queued(), 1);
        assert_eq!(
            harness.events.try_recv().unwrap(),
            WorkerEvent::PeerExited { address }
        );
    }

    #[tokio::test]
    async fn test_shutdown_returns_held_piece() {
        let data = content(1000);
        let metadata = metadata_for_content("file.bin", &data, 16384);
        let harness = Harness::new(&metadata);

        // Peer completes the handshake and then never answers
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        let info_hash = metadata.info_hash;
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut handshake = [0u8; HANDSHAKE_LEN];
            socket.read_exact(&mut handshake).await.unwrap();
            let reply = PeerHandshake::new(info_hash, PeerId::new([5u8; 20]));
            socket
                .write_all(&HandshakeCodec::serialize_handshake(&reply))
                .await
                .unwrap();
            let mut sink = Vec::new();
            let _ = socket.read_to_end(&mut sink).await;
        });

        let handle = tokio::spawn(harness.worker(address, metadata.info_hash).run());
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(harness.pieces.queued(), 0);

        harness.shutdown.send_replace(true);
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(harness.pieces.queued(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_interrupts_silent_handshake() {
        let data = content(1000);
        let metadata = metadata_for_content("file.bin", &data, 16384);
        let mut harness = Harness::new(&metadata);

        // Accepts the connection and never writes a byte
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut sink = Vec::new();
            let _ = socket.read_to_end(&mut sink).await;
        });

        let handle = tokio::spawn(harness.worker(address, metadata.info_hash).run());
        tokio::time::sleep(Duration::from_millis(100)).await;

        harness.shutdown.send_replace(true);
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(harness.pieces.queued(), 1);
        assert_eq!(
            harness.events.try_recv().unwrap(),
            WorkerEvent::PeerExited { address }
        );
    }

    #[test]
    fn test_have_outside_torrent_is_ignored() {
        let mut remote = RemoteState::new(3);
        remote.record_bitfield(&[0b1000_0000]);

        assert!(!remote.record_have(PieceIndex::new(u32::MAX)));
        assert!(!remote.record_have(PieceIndex::new(3)));
        assert_eq!(remote.bitfield.as_ref().unwrap().as_bytes(), &[0b1000_0000]);

        assert!(remote.record_have(PieceIndex::new(2)));
        assert_eq!(remote.bitfield.as_ref().unwrap().as_bytes(), &[0b1010_0000]);
    }

    #[test]
    fn test_oversized_bitfield_is_trimmed() {
        let mut remote = RemoteState::new(3);
        remote.record_bitfield(&[0xff; 1024]);

        assert_eq!(remote.bitfield.as_ref().unwrap().as_bytes(), &[0xff]);
    }
}
