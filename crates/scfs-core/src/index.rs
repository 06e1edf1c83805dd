//! Cluster index: lazy footer load and descriptor lookup.
//!
//! Lookups consult the persisted array first (one slot per cluster, loaded
//! from the tail of the store) and then the pending list of clusters
//! appended since the last flush.

use crate::file::{FileMeta, IoCtx};
use crate::stats::bump;
use crate::{format_error, parse_error};
use scfs_block::read_exact_at;
use scfs_error::{Result, ScfsError};
use scfs_types::{
    ClusterDescriptor, FOOTER_SIZE, FooterRecord, decode_descriptors, u64_to_usize,
};
use tracing::{debug, warn};

impl FileMeta {
    pub(crate) fn cluster_count(&self) -> Result<u32> {
        self.cluster_size
            .cluster_count(self.logical_size)
            .map_err(parse_error)
    }

    /// Reload from the footer if the cached index is not trusted.
    pub(crate) fn ensure_loaded(&mut self, ctx: &IoCtx<'_>) -> Result<()> {
        if !self.meta_invalid {
            return Ok(());
        }
        match self.load(ctx) {
            Ok(()) => {
                self.meta_invalid = false;
                bump(&ctx.stats.metadata_loads, 1);
                Ok(())
            }
            Err(err) => {
                warn!(target: "scfs::index", error = %err, "metadata_load_failed");
                Err(err)
            }
        }
    }

    /// State of a file that was just created or truncated to zero.
    pub(crate) fn reset_fresh(&mut self, ctx: &IoCtx<'_>) {
        self.cluster_size = ctx.mount.config().cluster_size;
        self.comp_type = ctx.mount.config().comp_type;
        self.meta_invalid = false;
        self.persisted = Some(Box::default());
        self.pending.clear();
        self.buffered = None;
        self.logical_size = 0;
        self.data_end = 0;
        self.dirty = false;
    }

    fn load(&mut self, ctx: &IoCtx<'_>) -> Result<()> {
        // Anything cached is stale once we decide to reload.
        self.pending.clear();
        self.buffered = None;
        self.dirty = false;
        self.persisted = None;
        self.sync_accounting(ctx.mount.space());

        let store_len = ctx.store.len()?;
        if store_len == 0 {
            self.reset_fresh(ctx);
            debug!(target: "scfs::index", "metadata_fresh_file");
            return Ok(());
        }
        if store_len < FOOTER_SIZE as u64 {
            return Err(ScfsError::Format(format!(
                "store length {store_len} is shorter than a footer"
            )));
        }

        let mut tail = [0_u8; FOOTER_SIZE];
        read_exact_at(
            ctx.store,
            store_len - FOOTER_SIZE as u64,
            &mut tail,
            ctx.retry_limit(),
        )?;
        let footer = FooterRecord::decode(&tail).map_err(format_error)?;
        let footer_size = u64::from(footer.footer_size);
        if footer_size > store_len {
            return Err(ScfsError::Format(format!(
                "footer_size {footer_size} exceeds store length {store_len}"
            )));
        }
        let cluster_size = footer.cluster_size().map_err(format_error)?;
        let comp_type = footer.compression().map_err(format_error)?;
        let expected = cluster_size
            .cluster_count(footer.original_file_size)
            .map_err(format_error)?;
        if footer.descriptor_count() != expected as usize {
            return Err(ScfsError::Format(format!(
                "footer lists {} descriptors, file of {} bytes needs {expected}",
                footer.descriptor_count(),
                footer.original_file_size
            )));
        }

        let index_pos = store_len - footer_size;
        let mut raw = vec![0_u8; u64_to_usize(footer.index_len(), "index_len").map_err(format_error)?];
        read_exact_at(ctx.store, index_pos, &mut raw, ctx.retry_limit())?;
        let descriptors = decode_descriptors(&raw).map_err(format_error)?;
        for (cluster, desc) in descriptors.iter().enumerate() {
            if desc.size == 0 || desc.size > cluster_size.get() || desc.end() > index_pos {
                return Err(ScfsError::Format(format!(
                    "descriptor {cluster} (offset {}, size {}) does not fit cluster size {} before index at {index_pos}",
                    desc.offset,
                    desc.size,
                    cluster_size.get()
                )));
            }
        }

        self.cluster_size = cluster_size;
        self.comp_type = comp_type;
        self.logical_size = footer.original_file_size;
        self.data_end = index_pos;
        debug!(
            target: "scfs::index",
            clusters = descriptors.len(),
            logical_size = self.logical_size,
            cluster_size = cluster_size.get(),
            comp = comp_type.name(),
            "metadata_loaded"
        );
        self.persisted = Some(descriptors.into_boxed_slice());
        Ok(())
    }

    /// Look up `cluster` in a loaded index.
    ///
    /// The buffered cluster has no descriptor yet and is out of range here.
    pub(crate) fn resolve_loaded(&self, cluster: u32) -> Result<ClusterDescriptor> {
        let cluster_count = self.cluster_count()?;
        let out_of_range = ScfsError::OutOfRange {
            cluster,
            cluster_count,
        };
        if cluster >= cluster_count {
            return Err(out_of_range);
        }
        if let Some(desc) = self
            .persisted
            .as_deref()
            .and_then(|persisted| persisted.get(cluster as usize))
        {
            return Ok(*desc);
        }
        self.pending
            .iter()
            .find(|entry| entry.cluster_idx == cluster)
            .map(|entry| entry.descriptor)
            .ok_or(out_of_range)
    }

    /// Remove the descriptor of the trailing cluster so it can be rewritten.
    pub(crate) fn pop_trailing_descriptor(&mut self, cluster: u32) -> Result<ClusterDescriptor> {
        let missing = || ScfsError::Corrupt {
            cluster,
            detail: "trailing cluster is not the last indexed descriptor".to_owned(),
        };
        if let Some(entry) = self.pending.last().copied() {
            if entry.cluster_idx != cluster {
                return Err(missing());
            }
            self.pending.pop();
            return Ok(entry.descriptor);
        }
        let mut descriptors = self.persisted.take().map(Vec::from).unwrap_or_default();
        let popped = if descriptors.len() == cluster as usize + 1 {
            descriptors.pop()
        } else {
            None
        };
        self.persisted = Some(descriptors.into_boxed_slice());
        popped.ok_or_else(missing)
    }
}
