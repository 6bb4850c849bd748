//! Transfer source descriptors
//!
//! A transfer is added from either a magnet URI or a serialized `.torrent`
//! metainfo document. Both resolve to an [`InfoHash`] before the session is
//! involved, which lets the registry key the entry immediately.

pub mod bencode;

use sha1::{Digest, Sha1};
use thiserror::Error;

use crate::identifier::{InfoHash, INFO_HASH_LEN};
use bencode::{BencodeError, Value};

/// Descriptor parsing errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DescriptorError {
    #[error("not a magnet link")]
    NotMagnet,

    #[error("magnet link has no btih info hash")]
    MissingInfoHash,

    #[error("invalid info hash: {0}")]
    InvalidInfoHash(String),

    #[error("bencode error: {0}")]
    Bencode(#[from] BencodeError),

    #[error("missing field: {0}")]
    MissingField(&'static str),

    #[error("invalid field: {0}")]
    InvalidField(&'static str),
}

/// A parsed transfer source
#[derive(Debug, Clone, PartialEq)]
pub enum Source {
    Magnet(MagnetLink),
    Metainfo(Metainfo),
}

impl Source {
    /// Parse a textual descriptor (magnet URI)
    pub fn parse(text: &str) -> Result<Self, DescriptorError> {
        MagnetLink::parse(text).map(Source::Magnet)
    }

    /// Parse raw descriptor bytes: a magnet URI or bencoded metainfo
    pub fn from_bytes(data: &[u8]) -> Result<Self, DescriptorError> {
        let trimmed = data.trim_ascii_start();
        if trimmed.starts_with(b"magnet:") {
            let text = std::str::from_utf8(trimmed).map_err(|_| DescriptorError::NotMagnet)?;
            return Self::parse(text);
        }
        Metainfo::from_bytes(data).map(Source::Metainfo)
    }

    pub fn info_hash(&self) -> InfoHash {
        match self {
            Source::Magnet(m) => m.info_hash,
            Source::Metainfo(m) => m.info_hash,
        }
    }

    pub fn display_name(&self) -> Option<&str> {
        match self {
            Source::Magnet(m) => m.display_name.as_deref(),
            Source::Metainfo(m) => Some(&m.name),
        }
    }

    /// Bytes persisted as the descriptor artifact
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            Source::Magnet(m) => m.uri.as_bytes().to_vec(),
            Source::Metainfo(m) => m.raw.clone(),
        }
    }

    /// File extension of the persisted artifact
    pub fn artifact_extension(&self) -> &'static str {
        match self {
            Source::Magnet(_) => "magnet",
            Source::Metainfo(_) => "torrent",
        }
    }
}

/// Magnet URI (`magnet:?xt=urn:btih:...`)
#[derive(Debug, Clone, PartialEq)]
pub struct MagnetLink {
    pub info_hash: InfoHash,
    pub display_name: Option<String>,
    pub trackers: Vec<String>,
    uri: String,
}

impl MagnetLink {
    pub fn parse(text: &str) -> Result<Self, DescriptorError> {
        let uri = text.trim();
        let query = uri.strip_prefix("magnet:?").ok_or(DescriptorError::NotMagnet)?;

        let mut info_hash = None;
        let mut display_name = None;
        let mut trackers = Vec::new();

        for pair in query.split('&').filter(|p| !p.is_empty()) {
            let (key, raw) = pair.split_once('=').unwrap_or((pair, ""));
            let value = urlencoding::decode(&raw.replace('+', " "))
                .map(|v| v.into_owned())
                .unwrap_or_else(|_| raw.to_string());

            match key {
                "xt" => {
                    let Some(hash) = value
                        .strip_prefix("urn:btih:")
                        .or_else(|| value.strip_prefix("urn:BTIH:"))
                    else {
                        continue;
                    };
                    let parsed = match hash.len() {
                        40 => InfoHash::from_hex(hash),
                        32 => InfoHash::from_base32(hash),
                        _ => return Err(DescriptorError::InvalidInfoHash(hash.to_string())),
                    };
                    info_hash = Some(
                        parsed.map_err(|_| DescriptorError::InvalidInfoHash(hash.to_string()))?,
                    );
                }
                "dn" if !value.is_empty() => display_name = Some(value),
                "tr" if !value.is_empty() => trackers.push(value),
                _ => {}
            }
        }

        Ok(Self {
            info_hash: info_hash.ok_or(DescriptorError::MissingInfoHash)?,
            display_name,
            trackers,
            uri: uri.to_string(),
        })
    }
}

/// One file listed in a metainfo document
#[derive(Debug, Clone, PartialEq)]
pub struct MetainfoFile {
    /// Path relative to the torrent root, `/`-separated
    pub path: String,
    pub length: u64,
}

/// Parsed `.torrent` metainfo
#[derive(Debug, Clone, PartialEq)]
pub struct Metainfo {
    pub info_hash: InfoHash,
    pub name: String,
    pub piece_length: u64,
    pub piece_count: usize,
    pub files: Vec<MetainfoFile>,
    raw: Vec<u8>,
}

impl Metainfo {
    pub fn from_bytes(data: &[u8]) -> Result<Self, DescriptorError> {
        let (top, span) = bencode::parse_dict_with_span(data, b"info")?;
        let (start, end) = span.ok_or(DescriptorError::MissingField("info"))?;
        let info = top.get(b"info").ok_or(DescriptorError::MissingField("info"))?;
        if info.as_dict().is_none() {
            return Err(DescriptorError::InvalidField("info"));
        }

        let digest: [u8; INFO_HASH_LEN] = Sha1::digest(&data[start..end]).into();

        let name = info
            .get(b"name")
            .and_then(Value::as_bytes)
            .map(|b| String::from_utf8_lossy(b).into_owned())
            .ok_or(DescriptorError::MissingField("name"))?;
        let piece_length = info
            .get(b"piece length")
            .and_then(Value::as_int)
            .ok_or(DescriptorError::MissingField("piece length"))?;
        if piece_length <= 0 {
            return Err(DescriptorError::InvalidField("piece length"));
        }
        let pieces = info
            .get(b"pieces")
            .and_then(Value::as_bytes)
            .ok_or(DescriptorError::MissingField("pieces"))?;
        if pieces.len() % INFO_HASH_LEN != 0 {
            return Err(DescriptorError::InvalidField("pieces"));
        }

        let files = match (info.get(b"length"), info.get(b"files")) {
            (Some(length), None) => vec![MetainfoFile {
                path: name.clone(),
                length: non_negative(length, "length")?,
            }],
            (None, Some(files)) => parse_files(files)?,
            (Some(_), Some(_)) => return Err(DescriptorError::InvalidField("length/files")),
            (None, None) => return Err(DescriptorError::MissingField("length")),
        };

        Ok(Self {
            info_hash: InfoHash::from_bytes(digest),
            name,
            piece_length: piece_length as u64,
            piece_count: pieces.len() / INFO_HASH_LEN,
            files,
            raw: data.to_vec(),
        })
    }

    pub fn total_length(&self) -> u64 {
        self.files.iter().map(|f| f.length).sum()
    }
}

fn non_negative(value: &Value, field: &'static str) -> Result<u64, DescriptorError> {
    match value.as_int() {
        Some(n) if n >= 0 => Ok(n as u64),
        _ => Err(DescriptorError::InvalidField(field)),
    }
}

fn parse_files(value: &Value) -> Result<Vec<MetainfoFile>, DescriptorError> {
    let list = value.as_list().ok_or(DescriptorError::InvalidField("files"))?;
    if list.is_empty() {
        return Err(DescriptorError::InvalidField("files"));
    }
    list.iter()
        .map(|entry| {
            let length = non_negative(
                entry.get(b"length").ok_or(DescriptorError::MissingField("length"))?,
                "length",
            )?;
            let components = entry
                .get(b"path")
                .and_then(Value::as_list)
                .ok_or(DescriptorError::MissingField("path"))?;
            let parts = components
                .iter()
                .map(|c| {
                    c.as_bytes()
                        .map(|b| String::from_utf8_lossy(b).into_owned())
                        .ok_or(DescriptorError::InvalidField("path"))
                })
                .collect::<Result<Vec<_>, _>>()?;
            if parts.is_empty() {
                return Err(DescriptorError::InvalidField("path"));
            }
            Ok(MetainfoFile {
                path: parts.join("/"),
                length,
            })
        })
        .collect()
}
