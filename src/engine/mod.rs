//! Transfer registry
//!
//! Owns the map of known transfers and the live session handle behind one
//! lock. The lock covers map access and merges only; every session call and
//! every await happens with it released.

mod reconfigure;

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::task::JoinHandle;

use crate::descriptor::Source;
use crate::error::EngineError;
use crate::identifier::InfoHash;
use crate::session::{
    RawTransferState, SessionFactory, SessionParams, SessionTransfer, TransferSession,
};
use crate::store::DescriptorStore;
use crate::transfer::{merge, MergeError, Transfer};

pub use reconfigure::validate_params;

/// Times an add is retried when the session is replaced underneath it
const ADD_ATTEMPTS: usize = 3;

/// Shared handle to the registry
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    registry: Mutex<Registry>,
    factory: Arc<dyn SessionFactory>,
    store: DescriptorStore,
    grace_period: Duration,
    /// Serializes reconfigurations end to end
    reconfigure_gate: tokio::sync::Mutex<()>,
}

#[derive(Default)]
struct Registry {
    transfers: HashMap<InfoHash, Transfer>,
    session: Option<Arc<dyn TransferSession>>,
    params: Option<SessionParams>,
    waiters: HashMap<InfoHash, MetadataWaiter>,
    next_waiter: u64,
    /// Refreshes between sampling the session and merging
    refreshing: usize,
    /// Deleted while a refresh was sampling; its samples must not re-adopt them
    removed: HashSet<InfoHash>,
}

/// Pending metadata wait for one transfer
struct MetadataWaiter {
    generation: u64,
    task: JoinHandle<()>,
}

impl Registry {
    /// Merge a sample into the entry for `handle`, creating it if needed
    fn upsert(
        &mut self,
        handle: Arc<dyn SessionTransfer>,
        raw: &RawTransferState,
        now: Instant,
    ) -> Result<(), MergeError> {
        let info_hash = handle.info_hash();
        let previous = match self.transfers.get(&info_hash) {
            Some(existing) => existing.clone(),
            None => Transfer::new(info_hash),
        };
        let mut next = merge(previous, raw, now)?;
        next.attach(handle);
        self.transfers.insert(info_hash, next);
        Ok(())
    }

    fn get_mut(&mut self, info_hash: &InfoHash) -> Result<&mut Transfer, EngineError> {
        self.transfers
            .get_mut(info_hash)
            .ok_or_else(|| EngineError::NotFound(info_hash.to_hex()))
    }

    fn snapshot(&self) -> Vec<Transfer> {
        let mut transfers: Vec<Transfer> = self.transfers.values().cloned().collect();
        transfers.sort_by_key(|t| t.info_hash);
        transfers
    }

    fn abort_waiters(&mut self) {
        for (_, waiter) in self.waiters.drain() {
            waiter.task.abort();
        }
    }
}

fn same_allocation<T: ?Sized>(a: &Arc<T>, b: &Arc<T>) -> bool {
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}

/// Instruct the session to fetch selected files and skip the rest
fn apply_selection(handle: &dyn SessionTransfer, selection: &[bool]) {
    for (file, selected) in handle.files().iter().zip(selection) {
        if *selected {
            file.fetch();
        } else {
            file.suppress_fetch();
        }
    }
}

impl Engine {
    /// Create an engine with no session; call [`Engine::reconfigure`] to start one
    pub fn new(
        factory: Arc<dyn SessionFactory>,
        store: DescriptorStore,
        grace_period: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                registry: Mutex::new(Registry::default()),
                factory,
                store,
                grace_period,
                reconfigure_gate: tokio::sync::Mutex::new(()),
            }),
        }
    }

    fn session(&self) -> Result<Arc<dyn TransferSession>, EngineError> {
        self.inner
            .registry
            .lock()
            .session
            .clone()
            .ok_or(EngineError::NoSession)
    }

    pub fn has_session(&self) -> bool {
        self.inner.registry.lock().session.is_some()
    }

    /// Operating parameters of the current (or last) session
    pub fn params(&self) -> Option<SessionParams> {
        self.inner.registry.lock().params.clone()
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Current registry contents, without consulting the session
    pub fn transfers(&self) -> Vec<Transfer> {
        self.inner.registry.lock().snapshot()
    }

    pub fn transfer(&self, info_hash: &InfoHash) -> Result<Transfer, EngineError> {
        self.inner
            .registry
            .lock()
            .transfers
            .get(info_hash)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(info_hash.to_hex()))
    }

    /// A transfer with its file list; fails until metadata has loaded
    pub fn get_files(&self, info_hash: &InfoHash) -> Result<Transfer, EngineError> {
        let transfer = self.transfer(info_hash)?;
        if !transfer.metadata_loaded {
            return Err(EngineError::NotReady(info_hash.to_hex()));
        }
        Ok(transfer)
    }

    /// Re-synchronize the registry from every transfer the session holds.
    ///
    /// Returns an empty list when no session is configured. A merge that
    /// fails leaves that transfer's previous snapshot in place and fails the
    /// refresh; other transfers are still merged.
    pub fn refresh_all(&self) -> Result<Vec<Transfer>, EngineError> {
        let session = {
            let mut registry = self.inner.registry.lock();
            match registry.session.clone() {
                Some(session) => {
                    registry.refreshing += 1;
                    session
                }
                None => return Ok(Vec::new()),
            }
        };

        let samples: Vec<_> = session
            .active_transfers()
            .into_iter()
            .map(|handle| {
                let raw = RawTransferState::sample(handle.as_ref());
                (handle, raw)
            })
            .collect();
        let now = Instant::now();

        let mut registry = self.inner.registry.lock();
        registry.refreshing -= 1;
        let removed = if registry.refreshing == 0 {
            std::mem::take(&mut registry.removed)
        } else {
            registry.removed.clone()
        };

        let current = registry.session.as_ref();
        if !current.is_some_and(|s| same_allocation(s, &session)) {
            // Swapped while sampling; these samples belong to a closed session
            return Ok(registry.snapshot());
        }

        let mut failure = None;
        for (handle, raw) in samples {
            if removed.contains(&handle.info_hash()) {
                continue;
            }
            if let Err(e) = registry.upsert(handle, &raw, now) {
                tracing::warn!(error = %e, "Refresh merge failed");
                failure.get_or_insert(e);
            }
        }

        match failure {
            Some(e) => Err(e.into()),
            None => Ok(registry.snapshot()),
        }
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Add a transfer from a magnet URI
    pub async fn add_by_reference(&self, descriptor: &str) -> Result<InfoHash, EngineError> {
        self.add_source(Source::parse(descriptor)?).await
    }

    /// Add a transfer from raw descriptor bytes (`.torrent` or magnet text)
    pub async fn add_from_bytes(&self, data: &[u8]) -> Result<InfoHash, EngineError> {
        self.add_source(Source::from_bytes(data)?).await
    }

    async fn add_source(&self, source: Source) -> Result<InfoHash, EngineError> {
        for _ in 0..ADD_ATTEMPTS {
            let session = self.session()?;
            let handle = match session.add(&source).await {
                Ok(handle) => handle,
                Err(_) if !self.is_current(&session) => continue,
                Err(e) => return Err(EngineError::Session(e.to_string())),
            };
            let info_hash = handle.info_hash();

            if let Err(e) = self.inner.store.save(&source).await {
                tracing::warn!(info_hash = %info_hash, error = %e, "Failed to persist descriptor");
            }

            let raw = RawTransferState::sample(handle.as_ref());
            let attached = {
                let mut registry = self.inner.registry.lock();
                let current = registry
                    .session
                    .as_ref()
                    .is_some_and(|s| same_allocation(s, &session));
                if current {
                    registry.upsert(handle.clone(), &raw, Instant::now())?;
                    self.spawn_metadata_waiter(&mut registry, handle);
                }
                current
            };
            if !attached {
                tracing::debug!(info_hash = %info_hash, "Session replaced during add, retrying");
                continue;
            }

            tracing::info!(
                info_hash = %info_hash,
                name = source.display_name().unwrap_or(""),
                "Added torrent"
            );
            return Ok(info_hash);
        }

        Err(EngineError::NoSession)
    }

    fn is_current(&self, session: &Arc<dyn TransferSession>) -> bool {
        self.inner
            .registry
            .lock()
            .session
            .as_ref()
            .is_some_and(|s| same_allocation(s, session))
    }

    /// Wait for metadata off the lock, then merge and maybe start
    fn spawn_metadata_waiter(&self, registry: &mut Registry, handle: Arc<dyn SessionTransfer>) {
        let info_hash = handle.info_hash();
        let generation = registry.next_waiter;
        registry.next_waiter += 1;

        let engine: Weak<EngineInner> = Arc::downgrade(&self.inner);
        let task = tokio::spawn(async move {
            handle.metadata_ready().await;
            if let Some(inner) = engine.upgrade() {
                Engine { inner }.on_metadata(handle, generation);
            }
        });

        if let Some(previous) = registry
            .waiters
            .insert(info_hash, MetadataWaiter { generation, task })
        {
            previous.task.abort();
        }
    }

    fn on_metadata(&self, handle: Arc<dyn SessionTransfer>, generation: u64) {
        let info_hash = handle.info_hash();
        let raw = RawTransferState::sample(handle.as_ref());

        let should_start = {
            let mut registry = self.inner.registry.lock();
            if registry
                .waiters
                .get(&info_hash)
                .is_some_and(|w| w.generation == generation)
            {
                registry.waiters.remove(&info_hash);
            }

            let attached = registry
                .transfers
                .get(&info_hash)
                .and_then(|t| t.handle.as_ref())
                .is_some_and(|h| same_allocation(h, &handle));
            if !attached {
                return;
            }

            if let Err(e) = registry.upsert(handle, &raw, Instant::now()) {
                tracing::warn!(info_hash = %info_hash, error = %e, "Metadata merge failed");
                return;
            }

            let auto_start = registry.params.as_ref().is_some_and(|p| p.auto_start);
            let running = registry.transfers.get(&info_hash).is_some_and(|t| t.running);
            auto_start || running
        };

        tracing::info!(info_hash = %info_hash, "Torrent metadata loaded");

        if should_start {
            if let Err(e) = self.start(&info_hash) {
                tracing::warn!(info_hash = %info_hash, error = %e, "Auto-start failed");
            }
        }
    }

    /// Mark a transfer running and (re)assert fetch intent on every file.
    ///
    /// Idempotent: starting a running transfer re-issues the per-file
    /// fetch/suppress instructions.
    pub fn start(&self, info_hash: &InfoHash) -> Result<(), EngineError> {
        let (handle, selection) = {
            let mut registry = self.inner.registry.lock();
            let transfer = registry.get_mut(info_hash)?;
            transfer.running = true;
            for file in &mut transfer.files {
                file.running = true;
            }
            let selection: Vec<bool> = transfer.files.iter().map(|f| f.selected).collect();
            (transfer.handle(), selection)
        };

        if let Some(handle) = handle.filter(|h| h.is_metadata_loaded()) {
            apply_selection(handle.as_ref(), &selection);
        }

        tracing::info!(info_hash = %info_hash, "Torrent started");
        Ok(())
    }

    /// Stop fetching, keeping the transfer and its progress
    pub fn stop(&self, info_hash: &InfoHash) -> Result<(), EngineError> {
        let handle = {
            let mut registry = self.inner.registry.lock();
            let transfer = registry.get_mut(info_hash)?;
            if !transfer.running {
                return Err(EngineError::AlreadyStopped(info_hash.to_hex()));
            }
            transfer.running = false;
            for file in &mut transfer.files {
                file.running = false;
            }
            transfer.handle()
        };

        if let Some(handle) = handle {
            handle.cancel_all_pieces();
        }

        tracing::info!(info_hash = %info_hash, "Torrent stopped");
        Ok(())
    }

    /// Remove a transfer, its descriptor artifact and its session state
    pub async fn delete(&self, info_hash: &InfoHash) -> Result<(), EngineError> {
        let (transfer, waiter, session) = {
            let mut registry = self.inner.registry.lock();
            let transfer = registry
                .transfers
                .remove(info_hash)
                .ok_or_else(|| EngineError::NotFound(info_hash.to_hex()))?;
            if registry.refreshing > 0 {
                registry.removed.insert(*info_hash);
            }
            (
                transfer,
                registry.waiters.remove(info_hash),
                registry.session.clone(),
            )
        };

        if let Some(waiter) = waiter {
            waiter.task.abort();
        }

        if let Err(e) = self.inner.store.remove(info_hash).await {
            tracing::warn!(info_hash = %info_hash, error = %e, "Failed to remove descriptor");
        }

        let handle = transfer
            .handle()
            .or_else(|| session.and_then(|s| s.lookup(info_hash)));
        if let Some(handle) = handle {
            handle.discard();
        }

        tracing::info!(info_hash = %info_hash, "Torrent deleted");
        Ok(())
    }

    /// Mark a single file running
    pub fn start_file(&self, info_hash: &InfoHash, path: &str) -> Result<(), EngineError> {
        let mut registry = self.inner.registry.lock();
        let transfer = registry.get_mut(info_hash)?;
        let file = transfer
            .file_mut(path)
            .ok_or_else(|| EngineError::FileNotFound(path.to_string()))?;
        if file.running {
            return Err(EngineError::AlreadyRunning(path.to_string()));
        }
        file.running = true;
        transfer.running = true;

        tracing::info!(info_hash = %info_hash, path = %path, "File started");
        Ok(())
    }

    /// Select or deselect files by path; unknown paths are ignored.
    ///
    /// Totals reflect the new selection on the next merge.
    pub fn set_file_selection(
        &self,
        info_hash: &InfoHash,
        paths: &[String],
        selected: bool,
    ) -> Result<(), EngineError> {
        let (handle, changed) = {
            let mut registry = self.inner.registry.lock();
            let transfer = registry.get_mut(info_hash)?;
            if !transfer.metadata_loaded {
                return Err(EngineError::NotFound(info_hash.to_hex()));
            }
            let mut changed = Vec::new();
            for (index, file) in transfer.files.iter_mut().enumerate() {
                if paths.iter().any(|p| *p == file.path) {
                    file.selected = selected;
                    changed.push(index);
                }
            }
            (transfer.handle(), changed)
        };

        if let Some(handle) = handle {
            let files = handle.files();
            for file in changed.iter().filter_map(|i| files.get(*i)) {
                if selected {
                    file.fetch();
                } else {
                    file.suppress_fetch();
                }
            }
        }

        tracing::info!(
            info_hash = %info_hash,
            files = changed.len(),
            selected,
            "File selection updated"
        );
        Ok(())
    }

    // ========================================================================
    // Background
    // ========================================================================

    /// Re-add every persisted descriptor; returns how many were restored
    pub async fn restore(&self) -> usize {
        let sources = match self.inner.store.load_all().await {
            Ok(sources) => sources,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read stored descriptors");
                return 0;
            }
        };

        let mut restored = 0;
        for source in sources {
            let info_hash = source.info_hash();
            match self.add_source(source).await {
                Ok(_) => restored += 1,
                Err(e) => {
                    tracing::warn!(info_hash = %info_hash, error = %e, "Failed to restore torrent");
                }
            }
        }
        restored
    }

    /// Start background refresh task
    pub fn spawn_refresh_task(&self, every: Duration) -> JoinHandle<()> {
        let engine = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            loop {
                interval.tick().await;
                if let Err(e) = engine.refresh_all() {
                    tracing::warn!(error = %e, "Periodic refresh failed");
                }
            }
        })
    }
}
