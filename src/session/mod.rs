//! Transfer session boundary
//!
//! The peer-to-peer protocol lives behind these traits. The registry only
//! ever talks to a session through them, and only outside its lock.

pub mod memory;

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::descriptor::Source;
use crate::identifier::InfoHash;

/// Operating parameters a session is constructed with
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionParams {
    pub download_directory: PathBuf,
    pub incoming_port: i64,
    pub enable_upload: bool,
    pub enable_seeding: bool,
    #[serde(default)]
    pub auto_start: bool,
}

/// Swarm statistics for one transfer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub active_peers: usize,
    pub uploaded_bytes: u64,
}

/// Completion state of one chunk
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChunkState {
    pub complete: bool,
}

/// A live peer-to-peer session
#[async_trait]
pub trait TransferSession: Send + Sync {
    /// Begin resolving a descriptor; returns the live transfer handle
    async fn add(&self, source: &Source) -> anyhow::Result<Arc<dyn SessionTransfer>>;

    /// Every transfer the session currently holds
    fn active_transfers(&self) -> Vec<Arc<dyn SessionTransfer>>;

    fn lookup(&self, info_hash: &InfoHash) -> Option<Arc<dyn SessionTransfer>>;

    /// Close listeners and drop all transfers
    async fn shutdown(&self);
}

/// Handle to one transfer inside a session
#[async_trait]
pub trait SessionTransfer: Send + Sync {
    fn info_hash(&self) -> InfoHash;

    fn name(&self) -> Option<String>;

    /// Suspends until structural metadata is known
    async fn metadata_ready(&self);

    fn is_metadata_loaded(&self) -> bool;

    fn total_length(&self) -> u64;

    fn files(&self) -> Vec<Arc<dyn SessionFile>>;

    fn stats(&self) -> SessionStats;

    /// Cancel outstanding piece requests, keeping the transfer and its data
    fn cancel_all_pieces(&self);

    /// Remove the transfer from the session
    fn discard(&self);
}

/// Handle to one file of a transfer
pub trait SessionFile: Send + Sync {
    fn path(&self) -> String;

    fn length(&self) -> u64;

    fn chunk_states(&self) -> Vec<ChunkState>;

    fn completed_bytes(&self) -> u64;

    fn fetch(&self);

    /// Lower the file's priority to none
    fn suppress_fetch(&self);
}

/// Builds sessions from operating parameters
#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn create(&self, params: &SessionParams) -> anyhow::Result<Arc<dyn TransferSession>>;
}

/// Point-in-time raw state of one transfer, taken outside the registry lock
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawTransferState {
    pub name: Option<String>,
    /// `None` until the session has metadata
    pub files: Option<Vec<RawFile>>,
    pub total_length: u64,
    pub stats: SessionStats,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawFile {
    pub path: String,
    pub length: u64,
    pub chunk_count: usize,
    pub chunks_completed: usize,
    pub completed_bytes: u64,
}

impl RawTransferState {
    pub fn sample(transfer: &dyn SessionTransfer) -> Self {
        let name = transfer.name().filter(|n| !n.is_empty());
        if !transfer.is_metadata_loaded() {
            return Self {
                name,
                ..Default::default()
            };
        }

        let files = transfer
            .files()
            .iter()
            .map(|f| {
                let chunks = f.chunk_states();
                RawFile {
                    path: f.path(),
                    length: f.length(),
                    chunk_count: chunks.len(),
                    chunks_completed: chunks.iter().filter(|c| c.complete).count(),
                    completed_bytes: f.completed_bytes(),
                }
            })
            .collect();

        Self {
            name,
            files: Some(files),
            total_length: transfer.total_length(),
            stats: transfer.stats(),
        }
    }

    pub fn is_metadata_loaded(&self) -> bool {
        self.files.is_some()
    }
}
