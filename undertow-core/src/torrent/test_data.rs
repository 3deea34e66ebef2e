//! Torrent fixtures shared by unit tests

use sha1::{Digest, Sha1};

use super::parsing::{BencodeValue, TorrentMetadata};

pub fn sha1(data: &[u8]) -> [u8; 20] {
    let mut hasher = Sha1::new();
    hasher.update(data);
    let mut digest = [0u8; 20];
    digest.copy_from_slice(&hasher.finalize());
    digest
}

/// Single-file torrent description with placeholder piece hashes.
pub fn single_file_torrent(name: &str, length: u64, piece_length: u64) -> BencodeValue {
    let piece_count = length.div_ceil(piece_length) as usize;
    let info = BencodeValue::dict([
        ("length", BencodeValue::from(length as i64)),
        ("name", BencodeValue::from(name)),
        ("piece length", BencodeValue::from(piece_length as i64)),
        ("pieces", BencodeValue::from(vec![0xab; piece_count * 20])),
    ]);

    BencodeValue::dict([
        ("announce", BencodeValue::from("http://tracker.test/announce")),
        ("info", info),
    ])
}

/// Multi-file torrent description with placeholder piece hashes.
pub fn multi_file_torrent(name: &str, files: &[(&[&str], u64)], piece_length: u64) -> BencodeValue {
    let total: u64 = files.iter().map(|(_, length)| length).sum();
    let piece_count = total.div_ceil(piece_length) as usize;

    let files = files
        .iter()
        .map(|(path, length)| {
            BencodeValue::dict([
                ("length", BencodeValue::from(*length as i64)),
                (
                    "path",
                    BencodeValue::List(path.iter().map(|c| BencodeValue::from(*c)).collect()),
                ),
            ])
        })
        .collect::<Vec<_>>();

    let info = BencodeValue::dict([
        ("files", BencodeValue::List(files)),
        ("name", BencodeValue::from(name)),
        ("piece length", BencodeValue::from(piece_length as i64)),
        ("pieces", BencodeValue::from(vec![0xcd; piece_count * 20])),
    ]);

    BencodeValue::dict([("announce", BencodeValue::from("udp://tracker.test:80")), ("info", info)])
}

/// Single-file metadata whose piece hashes match `content`.
pub fn metadata_for_content(name: &str, content: &[u8], piece_length: u64) -> TorrentMetadata {
    let pieces: Vec<u8> = content
        .chunks(piece_length as usize)
        .flat_map(|chunk| sha1(chunk))
        .collect();

    let info = BencodeValue::dict([
        ("length", BencodeValue::from(content.len() as i64)),
        ("name", BencodeValue::from(name)),
        ("piece length", BencodeValue::from(piece_length as i64)),
        ("pieces", BencodeValue::from(pieces)),
    ]);
    let root = BencodeValue::dict([("info", info)]);

    // Fixture content always produces well-formed metadata
    TorrentMetadata::from_value(&root).unwrap()
}

/// Deterministic pseudo-random content.
pub fn content(length: usize) -> Vec<u8> {
    (0..length).map(|i| (i * 31 % 251) as u8).collect()
}
