#![forbid(unsafe_code)]
//! Compressed-cluster storage engine.
//!
//! A file's logical byte stream is split into fixed-size clusters. Each
//! cluster is compressed when that saves enough space and appended to a
//! backing store, followed by an index of cluster descriptors and a footer:
//!
//! ```text
//! ┌───────────┬───────────┬─────┬──────────────┬─────┬──────────────┬────────┐
//! │ cluster 0 │ cluster 1 │ ... │ descriptor 0 │ ... │ descriptor N │ footer │
//! └───────────┴───────────┴─────┴──────────────┴─────┴──────────────┴────────┘
//! ```
//!
//! [`ScfsMount`] holds what every file on a mount shares: configuration,
//! the scratch [`BufferPool`] and the [`SpaceAccount`]. [`CompressedFile`]
//! is one logical file; [`FileHandle`] keeps its backing store open and
//! flushes the index when the last handle goes away.

pub mod config;
mod file;
mod index;
pub mod pool;
mod reader;
pub mod space;
mod stats;
mod writer;

pub use config::MountConfig;
pub use file::{CompressedFile, FileHandle, IndexSummary, PendingClusterEntry};
pub use pool::{BufferPool, PoolStats, PooledBuffers};
pub use space::{SpaceAccount, SpaceSnapshot};
pub use stats::FileStats;

use scfs_block::{BackingStore, StoreOpener};
use scfs_error::{Result, ScfsError};
use scfs_types::{CLUSTER_SIZE_MAX, CompressionType, ParseError};
use std::sync::Arc;
use tracing::debug;

/// State shared by every file on one mount.
#[derive(Debug)]
pub struct ScfsMount {
    config: MountConfig,
    pool: Arc<BufferPool>,
    space: SpaceAccount,
}

impl ScfsMount {
    /// Validate `config` and set up the shared pool and space account.
    pub fn new(config: MountConfig) -> Result<Arc<Self>> {
        config.validate()?;
        if !scfs_codec::is_available(config.comp_type) {
            return Err(ScfsError::CodecUnavailable(
                config.comp_type.name().to_owned(),
            ));
        }
        let plain_capacity = CLUSTER_SIZE_MAX as usize;
        let comp_capacity = CompressionType::ALL
            .iter()
            .map(|&algo| scfs_codec::max_compressed_len(algo, plain_capacity))
            .max()
            .unwrap_or(plain_capacity);
        debug!(
            target: "scfs::handle",
            cluster_size = config.cluster_size.get(),
            comp = config.comp_type.name(),
            threshold = config.comp_threshold_percent,
            slots = config.buffer_pool_slots,
            "mount_created"
        );
        Ok(Arc::new(Self {
            pool: BufferPool::new(config.buffer_pool_slots, plain_capacity, comp_capacity),
            space: SpaceAccount::new(),
            config,
        }))
    }

    #[must_use]
    pub fn config(&self) -> &MountConfig {
        &self.config
    }

    #[must_use]
    pub fn pool(&self) -> &Arc<BufferPool> {
        &self.pool
    }

    #[must_use]
    pub fn space(&self) -> &SpaceAccount {
        &self.space
    }

    /// A logical file layered on the store `opener` produces.
    ///
    /// Nothing is opened until the first [`CompressedFile::open`].
    pub fn file(self: &Arc<Self>, opener: impl StoreOpener + 'static) -> Arc<CompressedFile> {
        Arc::new(CompressedFile::new(Arc::clone(self), Box::new(opener)))
    }

    /// Reject a write up front when `store`'s filesystem cannot hold the
    /// worst-case metadata and buffered data of every open file.
    pub fn admit_write(&self, store: &dyn BackingStore) -> Result<()> {
        let available = store.free_space()?;
        self.space.admit(available)
    }
}

/// Parse failure while decoding what should be an SCFS tail.
pub(crate) fn format_error(err: ParseError) -> ScfsError {
    ScfsError::Format(err.to_string())
}

pub(crate) fn parse_error(err: ParseError) -> ScfsError {
    ScfsError::Parse(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use scfs_block::MemoryBackingStore;

    #[test]
    fn mount_rejects_invalid_config() {
        let err = ScfsMount::new(MountConfig::default().comp_threshold_percent(150))
            .expect_err("threshold out of range");
        assert_eq!(err.to_errno(), libc::EINVAL);
    }

    #[test]
    fn admit_write_uses_store_free_space() {
        let mount = ScfsMount::new(MountConfig::default()).expect("mount");
        let roomy = MemoryBackingStore::new();
        mount.admit_write(&roomy).expect("unbounded store admits");

        mount.space().file_opened();
        let tight = MemoryBackingStore::new().with_capacity_limit(10);
        let err = mount.admit_write(&tight).expect_err("24-byte footer reserve");
        assert_eq!(err.to_errno(), libc::ENOSPC);
    }
}
