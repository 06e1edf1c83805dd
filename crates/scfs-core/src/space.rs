//! Mount-wide space accounting for write admission.
//!
//! The totals only estimate the worst-case metadata a flush of every open
//! file could still need. Checks race with concurrent commits; the backing
//! filesystem has the final word on space.

use scfs_error::{Result, ScfsError};
use scfs_types::{DESCRIPTOR_SIZE, FOOTER_SIZE};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::warn;

/// Snapshot of the running totals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SpaceSnapshot {
    /// Cluster descriptors not yet covered by a written index.
    pub outstanding_descriptors: u64,
    pub open_files: u64,
    /// Plaintext bytes held in scratch buffers and not yet written out.
    pub buffered_bytes: u64,
}

impl SpaceSnapshot {
    /// Worst-case bytes the next flush of every open file needs.
    #[must_use]
    pub fn min_space(&self) -> u64 {
        self.outstanding_descriptors
            .saturating_mul(DESCRIPTOR_SIZE as u64)
            .saturating_add(self.open_files.saturating_mul(FOOTER_SIZE as u64))
            .saturating_add(self.buffered_bytes)
    }
}

#[derive(Debug, Default)]
pub struct SpaceAccount {
    descriptors: AtomicU64,
    open_files: AtomicU64,
    buffered_bytes: AtomicU64,
}

fn saturating_sub(counter: &AtomicU64, n: u64) {
    // fetch_update only fails when the closure returns None.
    let _ = counter.fetch_update(Ordering::AcqRel, Ordering::Acquire, |cur| {
        Some(cur.saturating_sub(n))
    });
}

/// Move `counter` by the signed difference `new - old`.
fn adjust(counter: &AtomicU64, old: u64, new: u64) {
    if new > old {
        counter.fetch_add(new - old, Ordering::AcqRel);
    } else if old > new {
        saturating_sub(counter, old - new);
    }
}

impl SpaceAccount {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn file_opened(&self) {
        self.open_files.fetch_add(1, Ordering::AcqRel);
    }

    pub fn file_closed(&self) {
        saturating_sub(&self.open_files, 1);
    }

    /// Replace one file's descriptor contribution `old` with `new`.
    pub fn adjust_descriptors(&self, old: u64, new: u64) {
        adjust(&self.descriptors, old, new);
    }

    /// Replace one file's buffered-byte contribution `old` with `new`.
    pub fn adjust_buffered(&self, old: u64, new: u64) {
        adjust(&self.buffered_bytes, old, new);
    }

    #[must_use]
    pub fn snapshot(&self) -> SpaceSnapshot {
        SpaceSnapshot {
            outstanding_descriptors: self.descriptors.load(Ordering::Acquire),
            open_files: self.open_files.load(Ordering::Acquire),
            buffered_bytes: self.buffered_bytes.load(Ordering::Acquire),
        }
    }

    /// Fail with `NoSpace` if `available` cannot cover [`SpaceSnapshot::min_space`].
    pub fn admit(&self, available: u64) -> Result<()> {
        let snapshot = self.snapshot();
        let required = snapshot.min_space();
        if available < required {
            warn!(
                target: "scfs::space",
                available,
                required,
                descriptors = snapshot.outstanding_descriptors,
                open_files = snapshot.open_files,
                buffered = snapshot.buffered_bytes,
                "write_admission_rejected"
            );
            return Err(ScfsError::NoSpace);
        }
        Ok(())
    }
}
