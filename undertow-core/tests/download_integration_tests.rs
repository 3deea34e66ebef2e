//! End-to-end download sessions against mock peers and trackers on loopback.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{
    MockSeed, SeedBehaviour, content, multi_file_metadata, single_file_metadata,
    spawn_http_tracker,
};
use tempfile::TempDir;
use tokio::time::timeout;
use undertow_core::config::UndertowConfig;
use undertow_core::storage::ShardStore;
use undertow_core::torrent::{
    DownloadSession, PieceIndex, PieceManager, TorrentError, TrackerClient,
};

const SESSION_TIMEOUT: Duration = Duration::from_secs(30);

fn test_config(temp_dir: &TempDir) -> UndertowConfig {
    UndertowConfig::for_testing().with_download_dir(temp_dir.path())
}

#[tokio::test]
async fn test_three_piece_download_from_single_seed() {
    let temp_dir = TempDir::new().unwrap();
    let data = content(2 * 16384 + 5000);
    let metadata = single_file_metadata("three.bin", &data, 16384, &[]);
    assert_eq!(metadata.piece_count(), 3);

    let seed = MockSeed::spawn(metadata.info_hash, data.clone(), 16384, SeedBehaviour::default()).await;

    let session = DownloadSession::new(metadata, test_config(&temp_dir))
        .with_trackers(Vec::new())
        .with_initial_peers([seed.address]);
    let report = timeout(SESSION_TIMEOUT, session.run()).await.unwrap().unwrap();

    let output = temp_dir.path().join("three.bin");
    assert_eq!(report.files, vec![output.clone()]);
    assert_eq!(report.total_pieces, 3);
    assert_eq!(report.requeued, 0);
    assert_eq!(std::fs::read(&output).unwrap(), data);

    let shards = ShardStore::new(temp_dir.path(), "piece_");
    for index in 0..3 {
        assert!(!shards.shard_path(PieceIndex::new(index)).exists());
    }

    assert_eq!(report.peers.len(), 1);
    assert_eq!(report.peers[0].address, seed.address);
    assert_eq!(report.peers[0].pieces, 3);
}

#[tokio::test]
async fn test_corrupted_piece_is_retried() {
    let temp_dir = TempDir::new().unwrap();
    let data = content(2 * 16384 + 5000);
    let metadata = single_file_metadata("corrupt.bin", &data, 16384, &[]);

    let behaviour = SeedBehaviour {
        corrupt_piece: Some(1),
        corrupt_times: 1,
        ..SeedBehaviour::default()
    };
    let seed = MockSeed::spawn(metadata.info_hash, data.clone(), 16384, behaviour).await;

    let session = DownloadSession::new(metadata, test_config(&temp_dir))
        .with_trackers(Vec::new())
        .with_initial_peers([seed.address]);
    let report = timeout(SESSION_TIMEOUT, session.run()).await.unwrap().unwrap();

    assert!(report.requeued >= 1);
    assert!(seed.served_blocks() >= 3);
    assert_eq!(
        std::fs::read(temp_dir.path().join("corrupt.bin")).unwrap(),
        data
    );
}

#[tokio::test]
async fn test_bad_peer_does_not_block_completion() {
    let temp_dir = TempDir::new().unwrap();
    let data = content(4 * 16384);
    let metadata = single_file_metadata("mixed.bin", &data, 16384, &[]);

    let liar = MockSeed::spawn(
        metadata.info_hash,
        data.clone(),
        16384,
        SeedBehaviour {
            corrupt_piece: Some(2),
            corrupt_times: u32::MAX,
            ..SeedBehaviour::default()
        },
    )
    .await;
    let honest = MockSeed::spawn(metadata.info_hash, data.clone(), 16384, SeedBehaviour::default()).await;

    let session = DownloadSession::new(metadata, test_config(&temp_dir))
        .with_trackers(Vec::new())
        .with_initial_peers([liar.address, honest.address]);
    let report = timeout(SESSION_TIMEOUT, session.run()).await.unwrap().unwrap();

    assert_eq!(std::fs::read(temp_dir.path().join("mixed.bin")).unwrap(), data);
    assert_eq!(report.peers.iter().map(|p| p.pieces).sum::<u32>(), 4);
}

#[tokio::test]
async fn test_choke_mid_piece_recovers() {
    let temp_dir = TempDir::new().unwrap();
    // Four blocks per piece so requests are pipelined
    let data = content(3 * 65536 - 100);
    let metadata = single_file_metadata("choke.bin", &data, 65536, &[]);

    let behaviour = SeedBehaviour {
        choke_on_piece: Some(0),
        ..SeedBehaviour::default()
    };
    let seed = MockSeed::spawn(metadata.info_hash, data.clone(), 65536, behaviour).await;

    let session = DownloadSession::new(metadata, test_config(&temp_dir))
        .with_trackers(Vec::new())
        .with_initial_peers([seed.address]);
    let report = timeout(SESSION_TIMEOUT, session.run()).await.unwrap().unwrap();

    assert!(report.requeued >= 1);
    assert_eq!(std::fs::read(temp_dir.path().join("choke.bin")).unwrap(), data);
}

#[tokio::test]
async fn test_multi_file_download_via_http_tracker() {
    let temp_dir = TempDir::new().unwrap();
    let first = content(10_000);
    let second = content(30_000);
    let third = b"tail".to_vec();

    // Hashes only depend on content, so seed and tracker can be set up first
    let files: [(&[&str], &[u8]); 3] = [
        (&["a.txt"], &first),
        (&["nested", "b.bin"], &second),
        (&["c.txt"], &third),
    ];
    let probe = multi_file_metadata("album", &files, 16384, &[]);
    let joined: Vec<u8> = [first.as_slice(), second.as_slice(), third.as_slice()].concat();
    let seed = MockSeed::spawn(probe.info_hash, joined, 16384, SeedBehaviour::default()).await;
    let tracker_url = spawn_http_tracker(vec![seed.address]).await;

    let metadata = multi_file_metadata(
        "album",
        &files,
        16384,
        &[tracker_url.clone(), "wss://unsupported.test/announce".to_string()],
    );
    assert_eq!(metadata.info_hash, probe.info_hash);
    assert_eq!(metadata.announce_urls.len(), 2);

    let session = DownloadSession::new(metadata, test_config(&temp_dir));
    let report = timeout(SESSION_TIMEOUT, session.run()).await.unwrap().unwrap();

    let root = temp_dir.path().join("album");
    assert_eq!(
        report.files,
        vec![
            root.join("a.txt"),
            root.join("nested").join("b.bin"),
            root.join("c.txt"),
        ]
    );
    assert_eq!(std::fs::read(root.join("a.txt")).unwrap(), first);
    assert_eq!(std::fs::read(root.join("nested/b.bin")).unwrap(), second);
    assert_eq!(std::fs::read(root.join("c.txt")).unwrap(), third);
}

#[tokio::test]
async fn test_session_stalls_when_no_peer_has_pieces() {
    let temp_dir = TempDir::new().unwrap();
    let data = content(16384);
    let metadata = single_file_metadata("empty-swarm.bin", &data, 16384, &[]);

    let seed = MockSeed::spawn(
        metadata.info_hash,
        data,
        16384,
        SeedBehaviour {
            bitfield: Some(vec![0]),
            ..SeedBehaviour::default()
        },
    )
    .await;

    let mut config = test_config(&temp_dir);
    config.torrent.stall_timeout = Some(Duration::from_millis(500));

    let result = timeout(
        SESSION_TIMEOUT,
        DownloadSession::new(metadata, config)
            .with_trackers(Vec::new())
            .with_initial_peers([seed.address])
            .run(),
    )
    .await
    .unwrap();

    assert!(matches!(result, Err(TorrentError::SessionStalled { .. })));
    assert_eq!(seed.served_blocks(), 0);
}

#[tokio::test]
async fn test_scheduler_completion_counts() {
    let temp_dir = TempDir::new().unwrap();
    let data = content(2 * 16384 + 1);
    let metadata = single_file_metadata("count.bin", &data, 16384, &[]);
    let pieces = Arc::new(PieceManager::from_metadata(
        &metadata,
        &ShardStore::new(temp_dir.path(), "piece_"),
    ));
    let mut progress = pieces.subscribe_progress();

    let mut completions = 0;
    while let Some(piece) = pieces.take().await {
        completions += 1;
        let finished = pieces.notify_complete(&piece);
        assert_eq!(finished, completions == 3);
    }

    assert_eq!(completions, 3);
    assert!(progress.borrow_and_update().is_complete());
    assert!(timeout(Duration::from_millis(100), pieces.take()).await.unwrap().is_none());
}

#[test]
fn test_tracker_trait_is_object_safe() {
    fn accepts(_: Vec<Arc<dyn TrackerClient>>) {}
    accepts(Vec::new());
}
