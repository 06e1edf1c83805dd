//! Per-file state and backing-handle lifetime.
//!
//! Two locks per file, always taken in this order:
//!
//! 1. `handle`: `(refcount, store)`. Held across the 1→0 transition so the
//!    final flush cannot race a new open.
//! 2. `meta`: the cluster index, pending list, buffered cluster and
//!    `meta_invalid`. Every index lookup and every flush runs under it.
//!
//! Readers take `meta` only long enough to resolve a descriptor.

use crate::ScfsMount;
use crate::pool::PooledBuffers;
use crate::space::SpaceAccount;
use crate::stats::{FileStats, StatCounters};
use parking_lot::Mutex;
use scfs_block::{BackingStore, StoreOpener};
use scfs_error::{Result, ScfsError};
use scfs_types::{ClusterDescriptor, ClusterSize, CompressionType};
use serde::Serialize;
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;
use tracing::{debug, warn};

/// A cluster written since the last flush, not yet in the persisted array.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingClusterEntry {
    pub cluster_idx: u32,
    pub descriptor: ClusterDescriptor,
}

/// The single partial cluster a file may hold in memory.
#[derive(Debug)]
pub(crate) struct BufferedCluster {
    pub(crate) cluster: u32,
    pub(crate) buffers: PooledBuffers,
}

impl BufferedCluster {
    pub(crate) fn len(&self) -> usize {
        self.buffers.plain().len()
    }
}

#[derive(Debug)]
pub(crate) struct FileMeta {
    pub(crate) cluster_size: ClusterSize,
    pub(crate) comp_type: CompressionType,
    /// Index must be reloaded from the footer before it is trusted.
    pub(crate) meta_invalid: bool,
    pub(crate) persisted: Option<Box<[ClusterDescriptor]>>,
    /// Ordered by `cluster_idx`, all past the persisted array.
    pub(crate) pending: Vec<PendingClusterEntry>,
    pub(crate) buffered: Option<BufferedCluster>,
    pub(crate) logical_size: u64,
    /// Where the next cluster is appended in the backing store.
    pub(crate) data_end: u64,
    /// Something changed since the last flush or load.
    pub(crate) dirty: bool,
    /// Logical size at the moment unflushed writes were given up; the next
    /// flush or release reports it.
    pub(crate) lost_writes: Option<u64>,
    accounted_descriptors: u64,
    accounted_buffered: u64,
}

impl FileMeta {
    fn new(mount: &ScfsMount) -> Self {
        Self {
            cluster_size: mount.config().cluster_size,
            comp_type: mount.config().comp_type,
            meta_invalid: true,
            persisted: None,
            pending: Vec::new(),
            buffered: None,
            logical_size: 0,
            data_end: 0,
            dirty: false,
            lost_writes: None,
            accounted_descriptors: 0,
            accounted_buffered: 0,
        }
    }

    /// Push this file's outstanding descriptors and buffered bytes into the
    /// mount totals.
    pub(crate) fn sync_accounting(&mut self, space: &SpaceAccount) {
        let descriptors = self.pending.len() as u64 + u64::from(self.buffered.is_some());
        let buffered = self.buffered.as_ref().map_or(0, |b| b.len() as u64);
        space.adjust_descriptors(self.accounted_descriptors, descriptors);
        space.adjust_buffered(self.accounted_buffered, buffered);
        self.accounted_descriptors = descriptors;
        self.accounted_buffered = buffered;
    }

    /// Stop trusting the cached index. Anything not yet flushed is dropped
    /// on the next reload, so remember that it was lost.
    pub(crate) fn invalidate(&mut self) {
        if self.dirty || self.buffered.is_some() || !self.pending.is_empty() {
            self.lost_writes.get_or_insert(self.logical_size);
        }
        self.meta_invalid = true;
    }

    /// Forget everything cached; the next access reloads from the footer.
    fn reset_after_close(&mut self, space: &SpaceAccount) {
        self.meta_invalid = true;
        self.lost_writes = None;
        self.persisted = None;
        self.pending.clear();
        self.buffered = None;
        self.logical_size = 0;
        self.data_end = 0;
        self.dirty = false;
        self.sync_accounting(space);
    }
}

/// Everything a metadata operation needs besides the locked state.
pub(crate) struct IoCtx<'a> {
    pub(crate) mount: &'a ScfsMount,
    pub(crate) store: &'a dyn BackingStore,
    pub(crate) stats: &'a StatCounters,
}

impl IoCtx<'_> {
    pub(crate) fn retry_limit(&self) -> u32 {
        self.mount.config().io_retry_limit
    }
}

#[derive(Default)]
struct HandleSlot {
    refcount: u32,
    store: Option<Arc<dyn BackingStore>>,
}

/// Shape of a file's index as currently held in memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct IndexSummary {
    pub cluster_size: u32,
    pub comp_type: CompressionType,
    pub logical_size: u64,
    pub cluster_count: u32,
    pub persisted: usize,
    pub pending: usize,
    pub buffered_cluster: Option<u32>,
    pub data_end: u64,
}

/// One logical file stored as compressed clusters in a backing store.
pub struct CompressedFile {
    mount: Arc<ScfsMount>,
    opener: Box<dyn StoreOpener>,
    handle: Mutex<HandleSlot>,
    pub(crate) meta: Mutex<FileMeta>,
    pub(crate) stats: StatCounters,
}

impl CompressedFile {
    pub(crate) fn new(mount: Arc<ScfsMount>, opener: Box<dyn StoreOpener>) -> Self {
        let meta = FileMeta::new(&mount);
        Self {
            mount,
            opener,
            handle: Mutex::new(HandleSlot::default()),
            meta: Mutex::new(meta),
            stats: StatCounters::default(),
        }
    }

    #[must_use]
    pub fn mount(&self) -> &Arc<ScfsMount> {
        &self.mount
    }

    /// Take a reference on the backing store, opening it on 0→1.
    pub fn acquire_backing_handle(&self) -> Result<()> {
        let mut slot = self.handle.lock();
        if slot.refcount == 0 {
            let store = self.opener.open()?;
            slot.store = Some(store);
            self.mount.space().file_opened();
            debug!(target: "scfs::handle", opener = ?self.opener, "backing_handle_opened");
        }
        slot.refcount = slot
            .refcount
            .checked_add(1)
            .ok_or_else(|| ScfsError::InvalidArgument("handle refcount overflow".to_owned()))?;
        Ok(())
    }

    /// Drop a reference on the backing store.
    ///
    /// On 1→0 the metadata is flushed and the store closed, even if the
    /// flush fails; the flush error is returned.
    pub fn release_backing_handle(&self) -> Result<()> {
        let mut slot = self.handle.lock();
        match slot.refcount {
            0 => return Err(ScfsError::NotOpen),
            1 => {}
            _ => {
                slot.refcount -= 1;
                return Ok(());
            }
        }
        let store = slot.store.take().ok_or(ScfsError::NotOpen)?;
        let result = {
            let mut meta = self.meta.lock();
            let ctx = self.ctx(&*store);
            let result = meta.flush_locked(&ctx);
            meta.reset_after_close(self.mount.space());
            result
        };
        slot.refcount = 0;
        drop(slot);
        drop(store);
        self.mount.space().file_closed();
        match &result {
            Ok(()) => debug!(target: "scfs::handle", opener = ?self.opener, "backing_handle_closed"),
            Err(err) => warn!(
                target: "scfs::handle",
                opener = ?self.opener,
                error = %err,
                "backing_handle_closed_after_failed_flush"
            ),
        }
        result
    }

    /// Acquire the backing handle and wrap it in a guard that releases it.
    pub fn open(self: &Arc<Self>) -> Result<FileHandle> {
        self.acquire_backing_handle()?;
        Ok(FileHandle {
            file: Arc::clone(self),
            released: false,
        })
    }

    #[must_use]
    pub fn refcount(&self) -> u32 {
        self.handle.lock().refcount
    }

    pub(crate) fn store(&self) -> Result<Arc<dyn BackingStore>> {
        self.handle.lock().store.clone().ok_or(ScfsError::NotOpen)
    }

    pub(crate) fn ctx<'a>(&'a self, store: &'a dyn BackingStore) -> IoCtx<'a> {
        IoCtx {
            mount: &self.mount,
            store,
            stats: &self.stats,
        }
    }

    /// Check free space on the backing filesystem before writing.
    pub fn admit_write(&self) -> Result<()> {
        let store = self.store()?;
        self.mount.admit_write(&*store)
    }

    /// Descriptor for `cluster`, reloading the index first if it is invalid.
    pub fn resolve(&self, cluster: u32) -> Result<ClusterDescriptor> {
        let store = self.store()?;
        let mut meta = self.meta.lock();
        meta.ensure_loaded(&self.ctx(&*store))?;
        meta.resolve_loaded(cluster)
    }

    pub fn logical_size(&self) -> Result<u64> {
        let store = self.store()?;
        let mut meta = self.meta.lock();
        meta.ensure_loaded(&self.ctx(&*store))?;
        Ok(meta.logical_size)
    }

    #[must_use]
    pub fn is_meta_invalid(&self) -> bool {
        self.meta.lock().meta_invalid
    }

    pub fn index_summary(&self) -> Result<IndexSummary> {
        let store = self.store()?;
        let mut meta = self.meta.lock();
        meta.ensure_loaded(&self.ctx(&*store))?;
        Ok(IndexSummary {
            cluster_size: meta.cluster_size.get(),
            comp_type: meta.comp_type,
            logical_size: meta.logical_size,
            cluster_count: meta.cluster_count()?,
            persisted: meta.persisted.as_ref().map_or(0, |p| p.len()),
            pending: meta.pending.len(),
            buffered_cluster: meta.buffered.as_ref().map(|b| b.cluster),
            data_end: meta.data_end,
        })
    }

    #[must_use]
    pub fn stats(&self) -> FileStats {
        self.stats.snapshot()
    }
}

impl fmt::Debug for CompressedFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompressedFile")
            .field("opener", &self.opener)
            .field("refcount", &self.refcount())
            .finish_non_exhaustive()
    }
}

/// Open reference to a [`CompressedFile`]'s backing store.
///
/// Prefer [`FileHandle::release`] so a failed final flush is seen; a
/// dropped handle can only log it.
#[must_use = "dropping a FileHandle releases it immediately"]
pub struct FileHandle {
    file: Arc<CompressedFile>,
    released: bool,
}

impl FileHandle {
    /// Release this reference and return the final flush result.
    pub fn release(mut self) -> Result<()> {
        self.released = true;
        self.file.release_backing_handle()
    }

    /// Take another reference on the same file.
    pub fn try_clone(&self) -> Result<Self> {
        self.file.open()
    }

    #[must_use]
    pub fn file(&self) -> &Arc<CompressedFile> {
        &self.file
    }
}

impl Deref for FileHandle {
    type Target = CompressedFile;

    fn deref(&self) -> &CompressedFile {
        &self.file
    }
}

impl Drop for FileHandle {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(err) = self.file.release_backing_handle() {
            warn!(
                target: "scfs::handle",
                error = %err,
                errno = err.to_errno(),
                "release_on_drop_failed"
            );
        }
    }
}

impl fmt::Debug for FileHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileHandle")
            .field("file", &self.file)
            .field("released", &self.released)
            .finish()
    }
}
