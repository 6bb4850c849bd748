//! Transfer snapshot types

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::identifier::InfoHash;
use crate::session::SessionTransfer;

/// Observable state of one transfer
#[derive(Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Transfer {
    /// Registry key, never changes
    pub info_hash: InfoHash,

    /// Display name, known once the session reports one
    pub name: Option<String>,

    /// Set once, when the session reports the file list
    pub metadata_loaded: bool,

    /// Fixed length and order once metadata has loaded
    pub files: Vec<TransferFile>,

    /// Bytes across selected files
    pub size: u64,

    /// Completed bytes across selected files
    pub downloaded: u64,

    /// 0..=100, two decimals, selected files only
    pub percent: f64,

    /// Bytes per second
    pub download_rate: f64,

    /// Bytes per second
    pub upload_rate: f64,

    pub peers: usize,

    /// Fetch intent
    pub running: bool,

    pub added_at: DateTime<Utc>,

    #[serde(skip)]
    pub(crate) sample: Option<RateSample>,

    #[serde(skip)]
    pub(crate) handle: Option<Arc<dyn SessionTransfer>>,
}

/// One file within a transfer
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferFile {
    /// Unique among siblings
    pub path: String,
    pub size: u64,
    pub chunk_count: usize,
    pub chunks_completed: usize,
    pub percent: f64,
    /// Counted in totals and fetched by the session
    pub selected: bool,
    pub running: bool,
}

/// Counters from the previous merge, used to derive rates
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct RateSample {
    pub at: Instant,
    pub downloaded: u64,
    pub uploaded: u64,
}

impl Transfer {
    /// Fresh entry for an identifier seen for the first time
    pub fn new(info_hash: InfoHash) -> Self {
        Self {
            info_hash,
            name: None,
            metadata_loaded: false,
            files: Vec::new(),
            size: 0,
            downloaded: 0,
            percent: 0.0,
            download_rate: 0.0,
            upload_rate: 0.0,
            peers: 0,
            running: false,
            added_at: Utc::now(),
            sample: None,
            handle: None,
        }
    }

    pub fn file(&self, path: &str) -> Option<&TransferFile> {
        self.files.iter().find(|f| f.path == path)
    }

    pub(crate) fn file_mut(&mut self, path: &str) -> Option<&mut TransferFile> {
        self.files.iter_mut().find(|f| f.path == path)
    }

    pub(crate) fn handle(&self) -> Option<Arc<dyn SessionTransfer>> {
        self.handle.clone()
    }

    pub(crate) fn attach(&mut self, handle: Arc<dyn SessionTransfer>) {
        self.handle = Some(handle);
    }

    pub(crate) fn detach(&mut self) {
        self.handle = None;
        self.sample = None;
    }
}

impl fmt::Debug for Transfer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transfer")
            .field("info_hash", &self.info_hash)
            .field("name", &self.name)
            .field("metadata_loaded", &self.metadata_loaded)
            .field("files", &self.files.len())
            .field("size", &self.size)
            .field("downloaded", &self.downloaded)
            .field("percent", &self.percent)
            .field("running", &self.running)
            .field("attached", &self.handle.is_some())
            .finish()
    }
}
