//! Shared helpers for download integration tests: torrent fixtures, a mock
//! seeding peer and a mock HTTP tracker, all on loopback.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use bytes::Bytes;
use sha1::{Digest, Sha1};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use undertow_core::torrent::protocol::{
    Bitfield, HANDSHAKE_LEN, HandshakeCodec, MessageCodec, PeerHandshake, PeerId, PeerMessage,
};
use undertow_core::torrent::{BencodeValue, InfoHash, TorrentMetadata};

/// Deterministic pseudo-random content.
pub fn content(length: usize) -> Vec<u8> {
    (0..length).map(|i| (i * 7 + i / 251) as u8).collect()
}

fn piece_hashes(content: &[u8], piece_length: u64) -> Vec<u8> {
    content
        .chunks(piece_length as usize)
        .flat_map(|chunk| {
            let mut hasher = Sha1::new();
            hasher.update(chunk);
            hasher.finalize().to_vec()
        })
        .collect()
}

/// Single-file torrent whose piece hashes match `content`.
pub fn single_file_metadata(
    name: &str,
    content: &[u8],
    piece_length: u64,
    announce: &[String],
) -> TorrentMetadata {
    let info = BencodeValue::dict([
        ("length", BencodeValue::from(content.len() as i64)),
        ("name", BencodeValue::from(name)),
        ("piece length", BencodeValue::from(piece_length as i64)),
        ("pieces", BencodeValue::from(piece_hashes(content, piece_length))),
    ]);
    build(info, announce)
}

/// Multi-file torrent over the concatenation of `files`.
pub fn multi_file_metadata(
    name: &str,
    files: &[(&[&str], &[u8])],
    piece_length: u64,
    announce: &[String],
) -> TorrentMetadata {
    let joined: Vec<u8> = files.iter().flat_map(|(_, data)| data.to_vec()).collect();
    let entries = files
        .iter()
        .map(|(path, data)| {
            BencodeValue::dict([
                ("length", BencodeValue::from(data.len() as i64)),
                (
                    "path",
                    BencodeValue::List(path.iter().map(|c| BencodeValue::from(*c)).collect()),
                ),
            ])
        })
        .collect::<Vec<_>>();

    let info = BencodeValue::dict([
        ("files", BencodeValue::List(entries)),
        ("name", BencodeValue::from(name)),
        ("piece length", BencodeValue::from(piece_length as i64)),
        ("pieces", BencodeValue::from(piece_hashes(&joined, piece_length))),
    ]);
    build(info, announce)
}

fn build(info: BencodeValue, announce: &[String]) -> TorrentMetadata {
    let mut root = vec![("info", info)];
    if let Some(first) = announce.first() {
        root.push(("announce", BencodeValue::from(first.as_str())));
    }
    if announce.len() > 1 {
        let tiers = announce
            .iter()
            .map(|url| BencodeValue::List(vec![BencodeValue::from(url.as_str())]))
            .collect();
        root.push(("announce-list", BencodeValue::List(tiers)));
    }

    TorrentMetadata::from_value(&BencodeValue::dict(root)).unwrap()
}

/// Misbehaviour a [`MockSeed`] can be told to exhibit.
#[derive(Debug, Clone, Default)]
pub struct SeedBehaviour {
    /// Piece whose first block is corrupted
    pub corrupt_piece: Option<u32>,
    /// How many times the corruption happens; `u32::MAX` for always
    pub corrupt_times: u32,
    /// Piece whose first request is answered with a choke, then an unchoke
    pub choke_on_piece: Option<u32>,
    /// Advertised pieces; every piece when unset
    pub bitfield: Option<Vec<u8>>,
}

/// Seeding peer serving `content` to any number of connections.
pub struct MockSeed {
    pub address: SocketAddr,
    served_blocks: Arc<AtomicU32>,
}

struct SeedState {
    info_hash: InfoHash,
    content: Vec<u8>,
    piece_length: usize,
    behaviour: SeedBehaviour,
    corruptions_left: AtomicU32,
    chokes_left: AtomicU32,
    served_blocks: Arc<AtomicU32>,
}

impl MockSeed {
    pub async fn spawn(
        info_hash: InfoHash,
        content: Vec<u8>,
        piece_length: u64,
        behaviour: SeedBehaviour,
    ) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        let served_blocks = Arc::new(AtomicU32::new(0));

        let state = Arc::new(SeedState {
            info_hash,
            content,
            piece_length: piece_length as usize,
            corruptions_left: AtomicU32::new(behaviour.corrupt_times),
            chokes_left: AtomicU32::new(u32::from(behaviour.choke_on_piece.is_some())),
            behaviour,
            served_blocks: Arc::clone(&served_blocks),
        });

        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                let state = Arc::clone(&state);
                tokio::spawn(async move {
                    let _ = serve(socket, &state).await;
                });
            }
        });

        Self {
            address,
            served_blocks,
        }
    }

    /// Blocks written so far across all connections.
    pub fn served_blocks(&self) -> u32 {
        self.served_blocks.load(Ordering::SeqCst)
    }
}

async fn write_message(socket: &mut TcpStream, message: &PeerMessage) -> std::io::Result<()> {
    socket
        .write_all(&MessageCodec::serialize_message(message))
        .await
}

async fn serve(mut socket: TcpStream, state: &SeedState) -> std::io::Result<()> {
    let mut handshake = [0u8; HANDSHAKE_LEN];
    socket.read_exact(&mut handshake).await?;
    let reply = PeerHandshake::new(state.info_hash, PeerId::new(*b"-MK0001-seedseedseed"));
    socket
        .write_all(&HandshakeCodec::serialize_handshake(&reply))
        .await?;

    let piece_count = state.content.len().div_ceil(state.piece_length);
    let bitfield = state
        .behaviour
        .bitfield
        .clone()
        .unwrap_or_else(|| Bitfield::full(piece_count).as_bytes().to_vec());
    write_message(
        &mut socket,
        &PeerMessage::Bitfield {
            bitfield: Bytes::from(bitfield),
        },
    )
    .await?;
    write_message(&mut socket, &PeerMessage::Unchoke).await?;

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
        let index = piece_index.as_u32();

        if state.behaviour.choke_on_piece == Some(index)
            && state
                .chokes_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
        {
            write_message(&mut socket, &PeerMessage::Choke).await?;
            tokio::time::sleep(Duration::from_millis(50)).await;
            write_message(&mut socket, &PeerMessage::Unchoke).await?;
            continue;
        }

        let start = index as usize * state.piece_length + offset as usize;
        let mut block = state.content[start..start + length as usize].to_vec();
        if state.behaviour.corrupt_piece == Some(index)
            && offset == 0
            && state
                .corruptions_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
        {
            block[0] ^= 0xFF;
        }

        write_message(
            &mut socket,
            &PeerMessage::Piece {
                piece_index,
                offset,
                data: Bytes::from(block),
            },
        )
        .await?;
        state.served_blocks.fetch_add(1, Ordering::SeqCst);
    }
}

/// HTTP tracker answering every announce with `peers` in compact form.
///
/// Returns the announce URL.
pub async fn spawn_http_tracker(peers: Vec<SocketAddr>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();

    let mut compact = Vec::new();
    for peer in &peers {
        if let SocketAddr::V4(v4) = peer {
            compact.extend_from_slice(&v4.ip().octets());
            compact.extend_from_slice(&v4.port().to_be_bytes());
        }
    }
    let body = BencodeValue::dict([
        ("interval", BencodeValue::from(1800i64)),
        ("peers", BencodeValue::from(compact)),
    ])
    .encode();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let body = body.clone();
            tokio::spawn(async move {
                let mut request = Vec::new();
                let mut buf = [0u8; 1024];
                while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                    match socket.read(&mut buf).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => request.extend_from_slice(&buf[..n]),
                    }
                }

                let head = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                    body.len()
                );
                let _ = socket.write_all(head.as_bytes()).await;
                let _ = socket.write_all(&body).await;
                let _ = socket.shutdown().await;
            });
        }
    });

    format!("http://{address}/announce")
}
