//! Torrent metadata extraction from decoded bencode values

use std::path::Path;

use async_trait::async_trait;

use super::super::{InfoHash, TorrentError};
use super::bencode::BencodeValue;
use super::types::{FileLayout, TorrentFile, TorrentMetadata, TorrentParser};

type ParseResult<T> = Result<T, TorrentError>;

/// Reference implementation using bencode-rs.
///
/// Decodes the raw torrent bytes and builds [`TorrentMetadata`] from the
/// resulting value.
#[derive(Default)]
pub struct BencodeTorrentParser;

impl BencodeTorrentParser {
    /// Creates new bencode parser instance.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl TorrentParser for BencodeTorrentParser {
    async fn parse_torrent_data(
        &self,
        torrent_bytes: &[u8],
    ) -> Result<TorrentMetadata, TorrentError> {
        let root = BencodeValue::decode(torrent_bytes)?;
        TorrentMetadata::from_value(&root)
    }

    async fn parse_torrent_file(&self, path: &Path) -> Result<TorrentMetadata, TorrentError> {
        let file_contents = tokio::fs::read(path).await?;

        self.parse_torrent_data(&file_contents).await
    }
}

impl TorrentMetadata {
    /// Builds metadata from an already decoded torrent description.
    ///
    /// The info hash is the SHA-1 of the canonical encoding of `info`.
    ///
    /// # Errors
    ///
    /// - `TorrentError::InvalidTorrentFile` - Missing or mistyped field, both or
    ///   neither of `length`/`files`, or a piece count inconsistent with the
    ///   total length
    pub fn from_value(root: &BencodeValue) -> ParseResult<Self> {
        if !matches!(root, BencodeValue::Dict(_)) {
            return Err(invalid("Root element must be dictionary"));
        }

        let info = root
            .get(b"info")
            .ok_or_else(|| invalid("Missing 'info' field"))?;
        if !matches!(info, BencodeValue::Dict(_)) {
            return Err(invalid("Info field must be dictionary"));
        }

        let info_hash = InfoHash::new(info.sha1());
        let name = extract_string(info, b"name")?;
        check_path_component(&name)?;

        let piece_length = extract_integer(info, b"piece length")?;
        if piece_length <= 0 {
            return Err(invalid("Piece length must be positive"));
        }
        let piece_length = piece_length as u64;

        let pieces_bytes = extract_bytes(info, b"pieces")?;
        if pieces_bytes.is_empty() || pieces_bytes.len() % 20 != 0 {
            return Err(invalid("Invalid pieces length"));
        }

        let piece_hashes: Vec<[u8; 20]> = pieces_bytes
            .chunks(20)
            .map(|chunk| {
                let mut hash = [0u8; 20];
                hash.copy_from_slice(chunk);
                hash
            })
            .collect();

        let layout = match (info.get(b"length"), info.get(b"files")) {
            (Some(_), Some(_)) => {
                return Err(invalid("Both 'length' and 'files' are present"));
            }
            (None, None) => return Err(invalid("Missing 'files' or 'length' field")),
            (Some(_), None) => FileLayout::Single {
                length: extract_length(info)?,
            },
            (None, Some(files)) => FileLayout::Multi {
                files: extract_files(files)?,
            },
        };

        let metadata = Self {
            info_hash,
            name,
            piece_length,
            piece_hashes,
            layout,
            announce_urls: extract_announce_urls(root),
        };

        let expected_pieces = metadata.total_length().div_ceil(piece_length);
        if expected_pieces != metadata.piece_count() as u64 {
            return Err(invalid(&format!(
                "Expected {expected_pieces} pieces for {} bytes, found {}",
                metadata.total_length(),
                metadata.piece_count()
            )));
        }

        Ok(metadata)
    }
}

fn invalid(reason: &str) -> TorrentError {
    TorrentError::InvalidTorrentFile {
        reason: reason.to_string(),
    }
}

fn extract_bytes<'a>(dict: &'a BencodeValue, key: &[u8]) -> ParseResult<&'a [u8]> {
    dict.get(key).and_then(BencodeValue::as_bytes).ok_or_else(|| {
        invalid(&format!(
            "Missing or invalid field: {:?}",
            String::from_utf8_lossy(key)
        ))
    })
}

fn extract_string(dict: &BencodeValue, key: &[u8]) -> ParseResult<String> {
    let bytes = extract_bytes(dict, key)?;
    String::from_utf8(bytes.to_vec()).map_err(|_| {
        invalid(&format!(
            "Invalid UTF-8 in field: {:?}",
            String::from_utf8_lossy(key)
        ))
    })
}

fn extract_integer(dict: &BencodeValue, key: &[u8]) -> ParseResult<i64> {
    dict.get(key).and_then(BencodeValue::as_integer).ok_or_else(|| {
        invalid(&format!(
            "Missing or invalid integer field: {:?}",
            String::from_utf8_lossy(key)
        ))
    })
}

fn extract_length(dict: &BencodeValue) -> ParseResult<u64> {
    let length = extract_integer(dict, b"length")?;
    u64::try_from(length).map_err(|_| invalid("Negative file length"))
}

fn extract_files(files: &BencodeValue) -> ParseResult<Vec<TorrentFile>> {
    let entries = files
        .as_list()
        .ok_or_else(|| invalid("Invalid files structure"))?;
    if entries.is_empty() {
        return Err(invalid("Empty files list"));
    }

    let mut result = Vec::with_capacity(entries.len());
    let mut total = 0u64;
    for entry in entries {
        if !matches!(entry, BencodeValue::Dict(_)) {
            return Err(invalid("Invalid file entry type"));
        }

        let length = extract_length(entry)?;
        let components = entry
            .get(b"path")
            .and_then(BencodeValue::as_list)
            .ok_or_else(|| invalid("Missing or invalid path in file"))?;
        if components.is_empty() {
            return Err(invalid("Empty file path"));
        }

        let mut path = Vec::with_capacity(components.len());
        for component in components {
            let component = component
                .as_str()
                .ok_or_else(|| invalid("Invalid path component"))?;
            check_path_component(component)?;
            path.push(component.to_string());
        }

        total = total
            .checked_add(length)
            .ok_or_else(|| invalid("Total file length overflows"))?;
        result.push(TorrentFile { path, length });
    }

    Ok(result)
}

/// Rejects names that would resolve outside the output directory once joined.
fn check_path_component(component: &str) -> ParseResult<()> {
    if component.is_empty()
        || component == "."
        || component == ".."
        || component.contains(['/', '\\', ':', '\0'])
    {
        return Err(invalid(&format!("Unsafe path component: {component:?}")));
    }
    Ok(())
}

/// Every tracker of `announce-list` in tier order, or `announce` when the
/// list is absent or empty.
fn extract_announce_urls(root: &BencodeValue) -> Vec<String> {
    let mut urls: Vec<String> = Vec::new();

    if let Some(tiers) = root.get(b"announce-list").and_then(BencodeValue::as_list) {
        for tier in tiers {
            for url in tier.as_list().unwrap_or_default() {
                if let Some(url) = url.as_str()
                    && !urls.iter().any(|existing| existing == url)
                {
                    urls.push(url.to_string());
                }
            }
        }
    }

    if urls.is_empty()
        && let Some(announce) = root.get(b"announce").and_then(BencodeValue::as_str)
    {
        urls.push(announce.to_string());
    }

    urls
}
