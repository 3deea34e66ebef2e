//! Owned bencode value model and canonical encoder
//!
//! Decoding is delegated to bencode-rs; the borrowed tree it returns is
//! converted into [`BencodeValue`] so that metadata and tracker responses can
//! outlive the input buffer. Encoding always writes dictionary keys in sorted
//! order, which is the canonical form the info hash is computed over.

use std::collections::BTreeMap;

use sha1::{Digest, Sha1};

use crate::torrent::TorrentError;

/// Decoded bencode value with owned data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BencodeValue {
    Bytes(Vec<u8>),
    Integer(i64),
    List(Vec<BencodeValue>),
    Dict(BTreeMap<Vec<u8>, BencodeValue>),
}

impl BencodeValue {
    /// Decodes the first bencode value in `data`.
    ///
    /// # Errors
    ///
    /// - `TorrentError::InvalidTorrentFile` - If the input is not valid bencode
    pub fn decode(data: &[u8]) -> Result<Self, TorrentError> {
        let parsed =
            bencode_rs::Value::parse(data).map_err(|e| TorrentError::InvalidTorrentFile {
                reason: format!("Bencode parsing failed: {e:?}"),
            })?;

        let root = parsed
            .first()
            .ok_or_else(|| TorrentError::InvalidTorrentFile {
                reason: "Empty bencode data".to_string(),
            })?;

        Self::from_parsed(root)
    }

    #[allow(unreachable_patterns)]
    fn from_parsed(value: &bencode_rs::Value<'_>) -> Result<Self, TorrentError> {
        match value {
            bencode_rs::Value::Bytes(bytes) => Ok(Self::Bytes(bytes.to_vec())),
            bencode_rs::Value::Integer(value) => Ok(Self::Integer(*value)),
            bencode_rs::Value::List(items) => items
                .iter()
                .map(Self::from_parsed)
                .collect::<Result<Vec<_>, _>>()
                .map(Self::List),
            bencode_rs::Value::Dictionary(dict) => dict
                .iter()
                .map(|(key, value)| Ok((key.to_vec(), Self::from_parsed(value)?)))
                .collect::<Result<BTreeMap<_, _>, TorrentError>>()
                .map(Self::Dict),
            _ => Err(TorrentError::InvalidTorrentFile {
                reason: "Unsupported bencode value".to_string(),
            }),
        }
    }

    /// Encodes the value in canonical form.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.encode_into(&mut buf);
        buf
    }

    fn encode_into(&self, buf: &mut Vec<u8>) {
        match self {
            Self::Bytes(bytes) => {
                buf.extend_from_slice(bytes.len().to_string().as_bytes());
                buf.push(b':');
                buf.extend_from_slice(bytes);
            }
            Self::Integer(value) => {
                buf.push(b'i');
                buf.extend_from_slice(value.to_string().as_bytes());
                buf.push(b'e');
            }
            Self::List(items) => {
                buf.push(b'l');
                for item in items {
                    item.encode_into(buf);
                }
                buf.push(b'e');
            }
            Self::Dict(dict) => {
                buf.push(b'd');
                // BTreeMap iterates in raw byte order of the keys
                for (key, value) in dict {
                    buf.extend_from_slice(key.len().to_string().as_bytes());
                    buf.push(b':');
                    buf.extend_from_slice(key);
                    value.encode_into(buf);
                }
                buf.push(b'e');
            }
        }
    }

    /// SHA-1 digest of the canonical encoding.
    pub fn sha1(&self) -> [u8; 20] {
        let mut hasher = Sha1::new();
        hasher.update(self.encode());
        let mut digest = [0u8; 20];
        digest.copy_from_slice(&hasher.finalize());
        digest
    }

    /// Builds a dictionary from key/value pairs.
    pub fn dict<K, I>(entries: I) -> Self
    where
        K: AsRef<[u8]>,
        I: IntoIterator<Item = (K, BencodeValue)>,
    {
        Self::Dict(
            entries
                .into_iter()
                .map(|(key, value)| (key.as_ref().to_vec(), value))
                .collect(),
        )
    }

    /// Looks up `key` when this value is a dictionary.
    pub fn get(&self, key: &[u8]) -> Option<&BencodeValue> {
        match self {
            Self::Dict(dict) => dict.get(key),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Bytes(bytes) => Some(bytes),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Self::Integer(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[BencodeValue]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        self.as_bytes().and_then(|b| std::str::from_utf8(b).ok())
    }
}

impl From<&str> for BencodeValue {
    fn from(value: &str) -> Self {
        Self::Bytes(value.as_bytes().to_vec())
    }
}

impl From<&[u8]> for BencodeValue {
    fn from(value: &[u8]) -> Self {
        Self::Bytes(value.to_vec())
    }
}

impl From<Vec<u8>> for BencodeValue {
    fn from(value: Vec<u8>) -> Self {
        Self::Bytes(value)
    }
}

impl From<i64> for BencodeValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<Vec<BencodeValue>> for BencodeValue {
    fn from(value: Vec<BencodeValue>) -> Self {
        Self::List(value)
    }
}
