//! In-process transfer session
//!
//! Keeps transfers entirely in memory. Metainfo sources have metadata at
//! once; magnet sources wait until [`MemoryTransfer::resolve`] is called.
//! Chunk completion, peers and upload counters are driven explicitly, and
//! every fetch/suppress/cancel/discard instruction is recorded so callers
//! can inspect what the registry asked for.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::{Mutex, MutexGuard};
use tokio::sync::Notify;

use super::{
    ChunkState, SessionFactory, SessionFile, SessionParams, SessionStats, SessionTransfer,
    TransferSession,
};
use crate::descriptor::{MetainfoFile, Source};
use crate::identifier::InfoHash;

/// Instruction recorded against a file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileInstruction {
    Fetch,
    Suppress,
}

// ============================================================================
// Session
// ============================================================================

pub struct MemorySession {
    params: SessionParams,
    transfers: Mutex<Vec<Arc<MemoryTransfer>>>,
    closed: AtomicBool,
}

impl MemorySession {
    pub fn new(params: SessionParams) -> Self {
        Self {
            params,
            transfers: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        }
    }

    pub fn params(&self) -> &SessionParams {
        &self.params
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Transfer list with discarded entries dropped
    fn live(&self) -> MutexGuard<'_, Vec<Arc<MemoryTransfer>>> {
        let mut transfers = self.transfers.lock();
        transfers.retain(|t| !t.is_discarded());
        transfers
    }

    /// Concrete handle for driving a transfer's simulated progress
    pub fn transfer(&self, info_hash: &InfoHash) -> Option<Arc<MemoryTransfer>> {
        self.live()
            .iter()
            .find(|t| t.info_hash == *info_hash)
            .cloned()
    }

    /// Insert a transfer the session "already had", bypassing `add`
    pub fn seed(&self, source: &Source) -> Arc<MemoryTransfer> {
        let transfer = Arc::new(MemoryTransfer::from_source(source));
        self.live().push(transfer.clone());
        transfer
    }
}

#[async_trait]
impl TransferSession for MemorySession {
    async fn add(&self, source: &Source) -> anyhow::Result<Arc<dyn SessionTransfer>> {
        if self.is_closed() {
            anyhow::bail!("session is closed");
        }
        if let Some(existing) = self.transfer(&source.info_hash()) {
            return Ok(existing as Arc<dyn SessionTransfer>);
        }
        Ok(self.seed(source) as Arc<dyn SessionTransfer>)
    }

    fn active_transfers(&self) -> Vec<Arc<dyn SessionTransfer>> {
        self.live()
            .iter()
            .map(|t| t.clone() as Arc<dyn SessionTransfer>)
            .collect()
    }

    fn lookup(&self, info_hash: &InfoHash) -> Option<Arc<dyn SessionTransfer>> {
        self.transfer(info_hash).map(|t| t as Arc<dyn SessionTransfer>)
    }

    async fn shutdown(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let transfers = std::mem::take(&mut *self.transfers.lock());
        tracing::debug!(count = transfers.len(), "Memory session closed");
    }
}

// ============================================================================
// Transfer
// ============================================================================

pub struct MemoryTransfer {
    info_hash: InfoHash,
    name: Mutex<Option<String>>,
    files: Mutex<Option<Vec<Arc<MemoryFile>>>>,
    ready: Notify,
    active_peers: AtomicUsize,
    uploaded: AtomicU64,
    cancellations: AtomicUsize,
    discarded: AtomicBool,
}

impl MemoryTransfer {
    fn from_source(source: &Source) -> Self {
        let transfer = Self {
            info_hash: source.info_hash(),
            name: Mutex::new(source.display_name().map(str::to_string)),
            files: Mutex::new(None),
            ready: Notify::new(),
            active_peers: AtomicUsize::new(0),
            uploaded: AtomicU64::new(0),
            cancellations: AtomicUsize::new(0),
            discarded: AtomicBool::new(false),
        };
        if let Source::Metainfo(meta) = source {
            transfer.resolve(&meta.name, &meta.files, meta.piece_length);
        }
        transfer
    }

    /// Deliver metadata, waking every `metadata_ready` waiter
    pub fn resolve(&self, name: &str, files: &[MetainfoFile], chunk_size: u64) {
        let chunk_size = chunk_size.max(1);
        let files = files
            .iter()
            .map(|f| Arc::new(MemoryFile::new(&f.path, f.length, chunk_size)))
            .collect();
        *self.name.lock() = Some(name.to_string());
        *self.files.lock() = Some(files);
        self.ready.notify_waiters();
    }

    pub fn file(&self, index: usize) -> Option<Arc<MemoryFile>> {
        self.files.lock().as_ref()?.get(index).cloned()
    }

    pub fn set_active_peers(&self, peers: usize) {
        self.active_peers.store(peers, Ordering::SeqCst);
    }

    pub fn add_uploaded(&self, bytes: u64) {
        self.uploaded.fetch_add(bytes, Ordering::SeqCst);
    }

    pub fn cancellations(&self) -> usize {
        self.cancellations.load(Ordering::SeqCst)
    }

    pub fn is_discarded(&self) -> bool {
        self.discarded.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SessionTransfer for MemoryTransfer {
    fn info_hash(&self) -> InfoHash {
        self.info_hash
    }

    fn name(&self) -> Option<String> {
        self.name.lock().clone()
    }

    async fn metadata_ready(&self) {
        loop {
            let notified = self.ready.notified();
            if self.is_metadata_loaded() {
                return;
            }
            notified.await;
        }
    }

    fn is_metadata_loaded(&self) -> bool {
        self.files.lock().is_some()
    }

    fn total_length(&self) -> u64 {
        self.files
            .lock()
            .as_ref()
            .map(|files| files.iter().map(|f| f.length).sum())
            .unwrap_or(0)
    }

    fn files(&self) -> Vec<Arc<dyn SessionFile>> {
        self.files
            .lock()
            .as_ref()
            .map(|files| {
                files
                    .iter()
                    .map(|f| f.clone() as Arc<dyn SessionFile>)
                    .collect()
            })
            .unwrap_or_default()
    }

    fn stats(&self) -> SessionStats {
        SessionStats {
            active_peers: self.active_peers.load(Ordering::SeqCst),
            uploaded_bytes: self.uploaded.load(Ordering::SeqCst),
        }
    }

    fn cancel_all_pieces(&self) {
        self.cancellations.fetch_add(1, Ordering::SeqCst);
    }

    fn discard(&self) {
        self.discarded.store(true, Ordering::SeqCst);
    }
}

// ============================================================================
// File
// ============================================================================

pub struct MemoryFile {
    path: String,
    length: u64,
    chunk_size: u64,
    chunks: Mutex<Vec<bool>>,
    instructions: Mutex<Vec<FileInstruction>>,
}

impl MemoryFile {
    fn new(path: &str, length: u64, chunk_size: u64) -> Self {
        let count = length.div_ceil(chunk_size) as usize;
        Self {
            path: path.to_string(),
            length,
            chunk_size,
            chunks: Mutex::new(vec![false; count]),
            instructions: Mutex::new(Vec::new()),
        }
    }

    /// Mark the first `count` chunks complete
    pub fn complete_chunks(&self, count: usize) {
        let mut chunks = self.chunks.lock();
        let count = count.min(chunks.len());
        chunks[..count].iter_mut().for_each(|c| *c = true);
    }

    pub fn complete_all(&self) {
        self.chunks.lock().iter_mut().for_each(|c| *c = true);
    }

    pub fn instructions(&self) -> Vec<FileInstruction> {
        self.instructions.lock().clone()
    }

    pub fn last_instruction(&self) -> Option<FileInstruction> {
        self.instructions.lock().last().copied()
    }

    fn chunk_len(&self, index: usize) -> u64 {
        let start = index as u64 * self.chunk_size;
        self.chunk_size.min(self.length.saturating_sub(start))
    }
}

impl SessionFile for MemoryFile {
    fn path(&self) -> String {
        self.path.clone()
    }

    fn length(&self) -> u64 {
        self.length
    }

    fn chunk_states(&self) -> Vec<ChunkState> {
        self.chunks
            .lock()
            .iter()
            .map(|complete| ChunkState { complete: *complete })
            .collect()
    }

    fn completed_bytes(&self) -> u64 {
        self.chunks
            .lock()
            .iter()
            .enumerate()
            .filter(|(_, complete)| **complete)
            .map(|(i, _)| self.chunk_len(i))
            .sum()
    }

    fn fetch(&self) {
        self.instructions.lock().push(FileInstruction::Fetch);
    }

    fn suppress_fetch(&self) {
        self.instructions.lock().push(FileInstruction::Suppress);
    }
}

// ============================================================================
// Factory
// ============================================================================

/// Creates [`MemorySession`]s and keeps the most recent one reachable
#[derive(Default)]
pub struct MemorySessionFactory {
    failing: AtomicBool,
    sessions: Mutex<Vec<Arc<MemorySession>>>,
}

impl MemorySessionFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent `create` calls fail
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn latest(&self) -> Option<Arc<MemorySession>> {
        self.sessions.lock().last().cloned()
    }

    pub fn created(&self) -> usize {
        self.sessions.lock().len()
    }
}

#[async_trait]
impl SessionFactory for MemorySessionFactory {
    async fn create(&self, params: &SessionParams) -> anyhow::Result<Arc<dyn TransferSession>> {
        if self.failing.load(Ordering::SeqCst) {
            anyhow::bail!("failed to bind port {}", params.incoming_port);
        }
        let session = Arc::new(MemorySession::new(params.clone()));
        self.sessions.lock().push(session.clone());
        Ok(session as Arc<dyn TransferSession>)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::tests::sample_torrent;
    use crate::session::RawTransferState;
    use std::path::PathBuf;
    use std::time::Duration;

    const MAGNET: &str = "magnet:?xt=urn:btih:c12fe1c06bba254a9dc9f519b335aa7c1367a88a";

    fn params() -> SessionParams {
        SessionParams {
            download_directory: PathBuf::from("/tmp/downloads"),
            incoming_port: 50007,
            enable_upload: true,
            enable_seeding: true,
            auto_start: false,
        }
    }

    #[tokio::test]
    async fn test_metainfo_has_metadata_at_once() {
        let session = MemorySession::new(params());
        let source = Source::from_bytes(&sample_torrent()).unwrap();
        let transfer = session.add(&source).await.unwrap();

        assert!(transfer.is_metadata_loaded());
        assert_eq!(transfer.name().as_deref(), Some("sample"));
        assert_eq!(transfer.files().len(), 3);
        assert_eq!(transfer.total_length(), 18);
        // 6 bytes in 2-byte chunks
        assert_eq!(transfer.files()[0].chunk_states().len(), 3);
    }

    #[tokio::test]
    async fn test_magnet_waits_for_resolve() {
        let session = MemorySession::new(params());
        let source = Source::parse(MAGNET).unwrap();
        let handle = session.add(&source).await.unwrap();
        assert!(!handle.is_metadata_loaded());

        let waiter = tokio::spawn({
            let handle = handle.clone();
            async move { handle.metadata_ready().await }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());

        let concrete = session.transfer(&source.info_hash()).unwrap();
        let file = MetainfoFile {
            path: "x.bin".to_string(),
            length: 10,
        };
        concrete.resolve("resolved", &[file], 4);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(handle.name().as_deref(), Some("resolved"));
    }

    #[tokio::test]
    async fn test_completed_bytes_tracks_short_last_chunk() {
        let session = MemorySession::new(params());
        let transfer = session.seed(&Source::parse(MAGNET).unwrap());
        let file = MetainfoFile {
            path: "x".to_string(),
            length: 10,
        };
        transfer.resolve("r", &[file], 4);

        let file = transfer.file(0).unwrap();
        file.complete_chunks(2);
        assert_eq!(file.completed_bytes(), 8);
        file.complete_all();
        assert_eq!(file.completed_bytes(), 10);

        let raw = RawTransferState::sample(transfer.as_ref());
        let files = raw.files.unwrap();
        assert_eq!(files[0].chunk_count, 3);
        assert_eq!(files[0].chunks_completed, 3);
    }

    #[tokio::test]
    async fn test_discard_and_shutdown() {
        let session = MemorySession::new(params());
        let source = Source::from_bytes(&sample_torrent()).unwrap();
        let handle = session.add(&source).await.unwrap();
        assert_eq!(session.active_transfers().len(), 1);

        handle.discard();
        assert!(session.lookup(&source.info_hash()).is_none());
        assert!(session.active_transfers().is_empty());
        assert!(session.transfers.lock().is_empty());

        session.shutdown().await;
        assert!(session.add(&source).await.is_err());
    }

    #[tokio::test]
    async fn test_discarded_transfers_are_dropped() {
        let session = MemorySession::new(params());
        let source = Source::from_bytes(&sample_torrent()).unwrap();
        for _ in 0..5 {
            session.add(&source).await.unwrap().discard();
        }
        let live = session.add(&source).await.unwrap();

        assert_eq!(session.transfers.lock().len(), 1);
        assert!(!session.transfer(&source.info_hash()).unwrap().is_discarded());
        assert_eq!(live.info_hash(), source.info_hash());
    }

    #[tokio::test]
    async fn test_factory_failure() {
        let factory = MemorySessionFactory::new();
        factory.set_failing(true);
        assert!(factory.create(&params()).await.is_err());
        factory.set_failing(false);
        factory.create(&params()).await.unwrap();
        assert_eq!(factory.created(), 1);
        assert_eq!(factory.latest().unwrap().params().incoming_port, 50007);
    }
}
