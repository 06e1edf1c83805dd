//! Mount-wide engine configuration.

use scfs_block::DEFAULT_RETRY_LIMIT;
use scfs_error::{Result, ScfsError};
use scfs_types::{ClusterSize, CompressionType};
use serde::{Deserialize, Serialize};

/// Configuration shared by every file on one mount.
///
/// Cluster size and compression type apply to files created on this mount;
/// existing files keep the geometry recorded in their footer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MountConfig {
    /// Cluster size for new files. Default: 16 KiB.
    pub cluster_size: ClusterSize,
    /// Compression algorithm for new files. Default: LZ4.
    pub comp_type: CompressionType,
    /// A cluster is stored compressed only if its compressed form is
    /// smaller than this percentage of its raw size (0..=100).
    /// Default: 50.
    pub comp_threshold_percent: u8,
    /// Number of scratch buffer pairs in the shared pool. Default: 16.
    pub buffer_pool_slots: usize,
    /// Consecutive stalled transfers tolerated by the retry wrapper.
    /// Default: 32.
    pub io_retry_limit: u32,
}

impl Default for MountConfig {
    fn default() -> Self {
        Self {
            cluster_size: ClusterSize::DEFAULT,
            comp_type: CompressionType::Lz4,
            comp_threshold_percent: 50,
            buffer_pool_slots: 16,
            io_retry_limit: DEFAULT_RETRY_LIMIT,
        }
    }
}

impl MountConfig {
    /// Set the cluster size for new files.
    pub fn cluster_size(mut self, bytes: u32) -> Result<Self> {
        self.cluster_size = ClusterSize::new(bytes)
            .map_err(|err| ScfsError::InvalidArgument(err.to_string()))?;
        Ok(self)
    }

    #[must_use]
    pub fn comp_type(mut self, comp_type: CompressionType) -> Self {
        self.comp_type = comp_type;
        self
    }

    #[must_use]
    pub fn comp_threshold_percent(mut self, percent: u8) -> Self {
        self.comp_threshold_percent = percent;
        self
    }

    #[must_use]
    pub fn buffer_pool_slots(mut self, slots: usize) -> Self {
        self.buffer_pool_slots = slots;
        self
    }

    #[must_use]
    pub fn io_retry_limit(mut self, limit: u32) -> Self {
        self.io_retry_limit = limit;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.comp_threshold_percent > 100 {
            return Err(ScfsError::InvalidArgument(format!(
                "comp_threshold_percent={} (must be 0..=100)",
                self.comp_threshold_percent
            )));
        }
        if self.buffer_pool_slots == 0 {
            return Err(ScfsError::InvalidArgument(
                "buffer_pool_slots must be > 0".to_owned(),
            ));
        }
        if self.io_retry_limit == 0 {
            return Err(ScfsError::InvalidArgument(
                "io_retry_limit must be > 0".to_owned(),
            ));
        }
        Ok(())
    }

    /// Whether a cluster of `raw_len` bytes that compressed to
    /// `compressed_len` bytes should be stored compressed.
    #[must_use]
    pub fn keeps_compressed(&self, compressed_len: usize, raw_len: usize) -> bool {
        (compressed_len as u64) * 100
            < u64::from(self.comp_threshold_percent) * (raw_len as u64)
    }
}
