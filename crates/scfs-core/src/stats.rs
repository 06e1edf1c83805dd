use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Per-file activity counters since the file object was created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FileStats {
    pub clusters_compressed: u64,
    pub clusters_raw: u64,
    /// Plaintext bytes handed to the backing store (before compression).
    pub bytes_in: u64,
    /// Bytes actually stored for those clusters.
    pub bytes_stored: u64,
    /// Clusters stored raw because the codec failed.
    pub codec_fallbacks: u64,
    pub corrupt_reads: u64,
    pub metadata_flushes: u64,
    pub metadata_loads: u64,
}

#[derive(Debug, Default)]
pub(crate) struct StatCounters {
    pub(crate) clusters_compressed: AtomicU64,
    pub(crate) clusters_raw: AtomicU64,
    pub(crate) bytes_in: AtomicU64,
    pub(crate) bytes_stored: AtomicU64,
    pub(crate) codec_fallbacks: AtomicU64,
    pub(crate) corrupt_reads: AtomicU64,
    pub(crate) metadata_flushes: AtomicU64,
    pub(crate) metadata_loads: AtomicU64,
}

pub(crate) fn bump(counter: &AtomicU64, n: u64) {
    counter.fetch_add(n, Ordering::Relaxed);
}

impl StatCounters {
    pub(crate) fn snapshot(&self) -> FileStats {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        FileStats {
            clusters_compressed: load(&self.clusters_compressed),
            clusters_raw: load(&self.clusters_raw),
            bytes_in: load(&self.bytes_in),
            bytes_stored: load(&self.bytes_stored),
            codec_fallbacks: load(&self.codec_fallbacks),
            corrupt_reads: load(&self.corrupt_reads),
            metadata_flushes: load(&self.metadata_flushes),
            metadata_loads: load(&self.metadata_loads),
        }
    }
}
