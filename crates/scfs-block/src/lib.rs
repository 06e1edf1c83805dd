#![forbid(unsafe_code)]
//! Backing-store layer for SCFS.
//!
//! Provides the [`BackingStore`] trait (positional, possibly short
//! transfers), a file-backed and an in-memory implementation, the
//! [`StoreOpener`] used to (re)open a store by identity, and the bounded
//! retry wrappers in [`retry`].

pub mod retry;

pub use retry::{DEFAULT_RETRY_LIMIT, read_exact_at, write_all_at};

use parking_lot::Mutex;
use scfs_error::{Result, ScfsError};
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Byte-addressed storage object an SCFS file is layered on.
///
/// `read_at` and `write_at` follow `pread`/`pwrite` semantics: they may
/// transfer fewer bytes than requested and may fail with
/// [`io::ErrorKind::Interrupted`] or [`io::ErrorKind::WouldBlock`]. Use
/// [`read_exact_at`] / [`write_all_at`] to get whole transfers.
pub trait BackingStore: Send + Sync + fmt::Debug {
    /// Current length in bytes.
    fn len(&self) -> Result<u64>;

    /// Read up to `buf.len()` bytes at `offset`. Returns 0 at end of store.
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize>;

    /// Write up to `buf.len()` bytes at `offset`, extending the store.
    fn write_at(&self, offset: u64, buf: &[u8]) -> io::Result<usize>;

    /// Set the length to exactly `len` bytes.
    fn truncate(&self, len: u64) -> Result<()>;

    /// Bytes still available on the filesystem holding this store.
    fn free_space(&self) -> Result<u64>;

    /// Flush pending writes to stable storage.
    fn sync(&self) -> Result<()>;

    fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

/// Opens the backing store of one logical file.
///
/// Opening must be idempotent: every call yields a store over the same
/// underlying object.
pub trait StoreOpener: Send + Sync + fmt::Debug {
    fn open(&self) -> Result<Arc<dyn BackingStore>>;
}

// ── File-backed store ───────────────────────────────────────────────────────

/// Backing store over a regular file using `pread`/`pwrite` style I/O.
///
/// `std::os::unix::fs::FileExt` is thread-safe and does not share a seek
/// position, so concurrent readers need no extra locking.
#[derive(Debug)]
pub struct FileBackingStore {
    file: File,
    path: PathBuf,
}

impl FileBackingStore {
    /// Open `path` read-write, creating it when `create` is set.
    pub fn open(path: impl AsRef<Path>, create: bool) -> Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(create)
            .truncate(false)
            .open(path)?;
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl BackingStore for FileBackingStore {
    fn len(&self) -> Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        self.file.read_at(buf, offset)
    }

    fn write_at(&self, offset: u64, buf: &[u8]) -> io::Result<usize> {
        self.file.write_at(buf, offset)
    }

    fn truncate(&self, len: u64) -> Result<()> {
        self.file.set_len(len)?;
        Ok(())
    }

    fn free_space(&self) -> Result<u64> {
        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        let dir = if dir.as_os_str().is_empty() {
            Path::new(".")
        } else {
            dir
        };
        Ok(fs2::available_space(dir)?)
    }

    fn sync(&self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }
}

/// Opens a [`FileBackingStore`] by path.
#[derive(Debug, Clone)]
pub struct FileStoreOpener {
    path: PathBuf,
    create: bool,
}

impl FileStoreOpener {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            create: true,
        }
    }

    /// Fail with `NotFound` instead of creating a missing file.
    #[must_use]
    pub fn existing_only(mut self) -> Self {
        self.create = false;
        self
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl StoreOpener for FileStoreOpener {
    fn open(&self) -> Result<Arc<dyn BackingStore>> {
        Ok(Arc::new(FileBackingStore::open(&self.path, self.create)?))
    }
}

// ── In-memory store ─────────────────────────────────────────────────────────

/// Backing store held in memory.
///
/// `max_transfer` caps every `read_at`/`write_at` call so callers can be
/// exercised against short transfers; `capacity` bounds the store and
/// drives [`BackingStore::free_space`].
#[derive(Debug, Default)]
pub struct MemoryBackingStore {
    bytes: Mutex<Vec<u8>>,
    max_transfer: Option<usize>,
    capacity: Option<u64>,
}

impl MemoryBackingStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self {
            bytes: Mutex::new(bytes),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_max_transfer(mut self, max_transfer: usize) -> Self {
        self.max_transfer = Some(max_transfer.max(1));
        self
    }

    #[must_use]
    pub fn with_capacity_limit(mut self, capacity: u64) -> Self {
        self.capacity = Some(capacity);
        self
    }

    /// Copy of the current contents.
    #[must_use]
    pub fn snapshot(&self) -> Vec<u8> {
        self.bytes.lock().clone()
    }

    fn clamp(&self, len: usize) -> usize {
        self.max_transfer.map_or(len, |max| len.min(max))
    }
}

impl BackingStore for MemoryBackingStore {
    fn len(&self) -> Result<u64> {
        Ok(self.bytes.lock().len() as u64)
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        let bytes = self.bytes.lock();
        let Ok(start) = usize::try_from(offset) else {
            return Ok(0);
        };
        if start >= bytes.len() {
            return Ok(0);
        }
        let n = self.clamp(buf.len()).min(bytes.len() - start);
        buf[..n].copy_from_slice(&bytes[start..start + n]);
        drop(bytes);
        Ok(n)
    }

    fn write_at(&self, offset: u64, buf: &[u8]) -> io::Result<usize> {
        let start = usize::try_from(offset)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "offset overflow"))?;
        let n = self.clamp(buf.len());
        let end = start
            .checked_add(n)
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "range overflow"))?;
        if let Some(capacity) = self.capacity {
            if end as u64 > capacity {
                return Err(io::Error::from_raw_os_error(libc::ENOSPC));
            }
        }
        let mut bytes = self.bytes.lock();
        if end > bytes.len() {
            bytes.resize(end, 0);
        }
        bytes[start..end].copy_from_slice(&buf[..n]);
        drop(bytes);
        Ok(n)
    }

    fn truncate(&self, len: u64) -> Result<()> {
        let len = usize::try_from(len)
            .map_err(|_| ScfsError::InvalidArgument(format!("truncate length {len}")))?;
        self.bytes.lock().resize(len, 0);
        Ok(())
    }

    fn free_space(&self) -> Result<u64> {
        let used = self.len()?;
        Ok(self
            .capacity
            .map_or(u64::MAX, |capacity| capacity.saturating_sub(used)))
    }

    fn sync(&self) -> Result<()> {
        Ok(())
    }
}

impl StoreOpener for Arc<MemoryBackingStore> {
    fn open(&self) -> Result<Arc<dyn BackingStore>> {
        Ok(Arc::clone(self) as Arc<dyn BackingStore>)
    }
}
