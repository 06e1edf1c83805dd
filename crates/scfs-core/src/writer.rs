//! Cluster writer and metadata persister.
//!
//! Writes are append-only. The last cluster of a file may be partial; it
//! lives in a pooled plaintext buffer until it fills up or the file is
//! flushed. A full cluster is compressed and appended at `data_end`
//! immediately, and its buffers go back to the pool.
//!
//! A cluster whose write-out fails stays in memory: an append is rolled
//! back to where it started, a whole-cluster update stays buffered for the
//! next flush to retry. Nothing on disk is trusted less because of it,
//! since the index and footer are rewritten on every flush anyway.
//!
//! A flush appends the buffered cluster, then writes the whole index and
//! the footer at `data_end` and trims the store to the new tail. A failed
//! flush marks the metadata invalid so the next access reloads whatever
//! footer is actually on disk; the unflushed writes that reload drops are
//! reported once more, as `LostWrites`, by the next flush or release.

use crate::file::{BufferedCluster, CompressedFile, FileMeta, IoCtx, PendingClusterEntry};
use crate::parse_error;
use crate::reader::load_cluster_into;
use crate::pool::PooledBuffers;
use crate::stats::bump;
use scfs_block::write_all_at;
use scfs_error::{Result, ScfsError};
use scfs_types::{
    ClusterDescriptor, CompressionType, DESCRIPTOR_SIZE, FOOTER_SIZE, FooterRecord, u64_to_u32,
};
use tracing::{debug, trace, warn};

impl FileMeta {
    /// Take the buffer for `cluster` out of the file state, creating it for
    /// a new cluster or loading the stored trailing cluster.
    ///
    /// Only the next cluster past the end, or a partial last cluster, can be
    /// staged. With `keep_contents == false` a stored trailing cluster is
    /// not read back because the caller replaces it whole.
    fn take_staged(
        &mut self,
        ctx: &IoCtx<'_>,
        cluster: u32,
        keep_contents: bool,
    ) -> Result<BufferedCluster> {
        if let Some(current) = self.buffered.take() {
            if current.cluster == cluster {
                return Ok(current);
            }
            if current.len() == self.cluster_size.as_usize() {
                // Full cluster left behind by a failed write-out.
                self.settle(ctx, current)?;
            } else {
                let held = current.cluster;
                self.buffered = Some(current);
                return Err(ScfsError::InvalidArgument(format!(
                    "cluster {cluster} cannot be written while partial cluster {held} is buffered"
                )));
            }
        }

        let cluster_count = self.cluster_count()?;
        let cluster_size = self.cluster_size;
        if cluster == cluster_count {
            if let Some(last) = cluster_count.checked_sub(1) {
                if cluster_size.nominal_len(last, self.logical_size) < cluster_size.get() {
                    return Err(ScfsError::InvalidArgument(format!(
                        "cluster {cluster} would follow partial cluster {last}"
                    )));
                }
            }
            return Ok(BufferedCluster {
                cluster,
                buffers: stage_buffers(ctx, cluster),
            });
        }

        let nominal = cluster_size.nominal_len(cluster, self.logical_size);
        if cluster_count.checked_sub(1) == Some(cluster) && nominal < cluster_size.get() {
            return self.take_trailing(ctx, cluster, nominal, keep_contents);
        }
        Err(ScfsError::InvalidArgument(format!(
            "cluster {cluster} is already stored (cluster_count={cluster_count}); writes are append-only"
        )))
    }

    /// Pull the stored partial last cluster back into a buffer and rewind
    /// the append position over it so its replacement lands in place.
    fn take_trailing(
        &mut self,
        ctx: &IoCtx<'_>,
        cluster: u32,
        nominal: u32,
        keep_contents: bool,
    ) -> Result<BufferedCluster> {
        let desc = self.pop_trailing_descriptor(cluster)?;
        let mut current = BufferedCluster {
            cluster,
            buffers: stage_buffers(ctx, cluster),
        };
        if keep_contents {
            if let Err(err) = load_cluster_into(
                ctx,
                self.comp_type,
                self.cluster_size,
                cluster,
                nominal,
                desc,
                &mut current.buffers,
            ) {
                // The descriptor is gone from memory; only a reload restores it.
                self.invalidate();
                return Err(err);
            }
        }
        if desc.end() == self.data_end {
            self.data_end = desc.offset;
        }
        self.dirty = true;
        trace!(
            target: "scfs::writer",
            cluster,
            offset = desc.offset,
            size = desc.size,
            nominal,
            "trailing_cluster_reopened"
        );
        Ok(current)
    }

    /// Keep `current` buffered, or append it if it is full.
    ///
    /// A full cluster that fails to write stays buffered.
    fn settle(&mut self, ctx: &IoCtx<'_>, mut current: BufferedCluster) -> Result<()> {
        if current.len() < self.cluster_size.as_usize() {
            self.buffered = Some(current);
            return Ok(());
        }
        let result = self.write_out(ctx, &mut current);
        if result.is_err() {
            self.buffered = Some(current);
        }
        result
    }

    /// Drop everything past `keep` bytes from the buffered cluster.
    fn unstage(&mut self, keep: usize) {
        let Some(mut current) = self.buffered.take() else {
            return;
        };
        self.logical_size -= (current.len() - keep) as u64;
        if keep > 0 {
            current.buffers.plain_mut().truncate(keep);
            self.buffered = Some(current);
        }
    }

    /// Append `data` at `logical_size`, cluster by cluster.
    ///
    /// Returns how many bytes were taken. A cluster that cannot be written
    /// is rolled back to where this call found it; the call fails only if
    /// nothing was taken.
    fn append_bytes(&mut self, ctx: &IoCtx<'_>, data: &[u8]) -> Result<usize> {
        let cluster_size = self.cluster_size.as_usize();
        let mut accepted = 0;
        while accepted < data.len() {
            let step = u64_to_u32(self.cluster_size.cluster_of(self.logical_size), "cluster")
                .map_err(parse_error)
                .and_then(|cluster| self.take_staged(ctx, cluster, true));
            let mut current = match step {
                Ok(current) => current,
                Err(err) if accepted == 0 => return Err(err),
                Err(_) => break,
            };
            let before = current.len();
            let take = (cluster_size - before).min(data.len() - accepted);
            current
                .buffers
                .plain_mut()
                .extend_from_slice(&data[accepted..accepted + take]);
            self.logical_size += take as u64;
            self.dirty = true;
            if let Err(err) = self.settle(ctx, current) {
                self.unstage(before);
                if accepted == 0 {
                    return Err(err);
                }
                break;
            }
            accepted += take;
        }
        Ok(accepted)
    }

    fn replace_cluster(&mut self, ctx: &IoCtx<'_>, cluster: u32, plaintext: &[u8]) -> Result<()> {
        let cluster_size = self.cluster_size;
        if plaintext.is_empty() || plaintext.len() > cluster_size.as_usize() {
            return Err(ScfsError::InvalidArgument(format!(
                "cluster {cluster} plaintext of {} bytes (cluster size {cluster_size})",
                plaintext.len()
            )));
        }
        let current_len = cluster_size.nominal_len(cluster, self.logical_size) as usize;
        if plaintext.len() < current_len {
            return Err(ScfsError::InvalidArgument(format!(
                "cluster {cluster} cannot shrink from {current_len} to {} bytes",
                plaintext.len()
            )));
        }
        let mut current = self.take_staged(ctx, cluster, false)?;
        let plain = current.buffers.plain_mut();
        plain.clear();
        plain.extend_from_slice(plaintext);
        self.logical_size = cluster_size.cluster_start(cluster) + plaintext.len() as u64;
        self.dirty = true;
        self.settle(ctx, current)
    }

    /// Compress `current` against the threshold and append it at `data_end`.
    ///
    /// On failure nothing in memory changes; the caller still owns the
    /// plaintext and can retry.
    fn write_out(&mut self, ctx: &IoCtx<'_>, current: &mut BufferedCluster) -> Result<()> {
        let cluster = current.cluster;
        let config = ctx.mount.config();
        let (plain, comp) = current.buffers.split_mut();
        let raw_len = plain.len();

        let compressed = match self.comp_type {
            CompressionType::None => false,
            algo => match scfs_codec::compress_into(algo, plain, comp) {
                Ok(()) => config.keeps_compressed(comp.len(), raw_len),
                Err(err) => {
                    bump(&ctx.stats.codec_fallbacks, 1);
                    warn!(
                        target: "scfs::writer",
                        cluster,
                        algo = algo.name(),
                        error = %err,
                        "compress_failed_storing_raw"
                    );
                    false
                }
            },
        };
        let payload: &[u8] = if compressed { comp } else { plain };

        let offset = self.data_end;
        if let Err(err) = write_all_at(ctx.store, offset, payload, ctx.retry_limit()) {
            warn!(
                target: "scfs::writer",
                cluster,
                offset,
                error = %err,
                "cluster_write_failed"
            );
            return Err(err);
        }
        let size = u32::try_from(payload.len()).map_err(|_| ScfsError::Corrupt {
            cluster,
            detail: format!("payload of {} bytes", payload.len()),
        })?;
        let descriptor = ClusterDescriptor { offset, size };
        self.pending.push(PendingClusterEntry {
            cluster_idx: cluster,
            descriptor,
        });
        self.data_end = descriptor.end();
        self.dirty = true;

        if compressed {
            bump(&ctx.stats.clusters_compressed, 1);
        } else {
            bump(&ctx.stats.clusters_raw, 1);
        }
        bump(&ctx.stats.bytes_in, raw_len as u64);
        bump(&ctx.stats.bytes_stored, u64::from(size));
        trace!(
            target: "scfs::writer",
            cluster,
            offset,
            size,
            raw_len,
            compressed,
            "cluster_written"
        );
        Ok(())
    }

    /// Persist the index and footer. Called with the index lock held.
    ///
    /// Writes dropped by an earlier failed flush are reported here once, as
    /// [`ScfsError::LostWrites`].
    pub(crate) fn flush_locked(&mut self, ctx: &IoCtx<'_>) -> Result<()> {
        // An invalid index has nothing trustworthy to write; a clean one
        // already matches the store.
        let result = if self.meta_invalid || (!self.dirty && self.buffered.is_none()) {
            Ok(())
        } else {
            self.flush_inner(ctx)
        };
        if let Err(err) = &result {
            self.invalidate();
            warn!(
                target: "scfs::writer",
                logical_size = self.logical_size,
                error = %err,
                errno = err.to_errno(),
                "metadata_flush_failed"
            );
        }
        self.sync_accounting(ctx.mount.space());
        result?;
        match self.lost_writes.take() {
            Some(logical_size) => {
                warn!(target: "scfs::writer", logical_size, "lost_writes_reported");
                Err(ScfsError::LostWrites { logical_size })
            }
            None => Ok(()),
        }
    }

    fn flush_inner(&mut self, ctx: &IoCtx<'_>) -> Result<()> {
        if let Some(mut current) = self.buffered.take() {
            self.write_out(ctx, &mut current)?;
        }

        let persisted: &[ClusterDescriptor] = self.persisted.as_deref().unwrap_or_default();
        let mut merged = Vec::with_capacity(persisted.len() + self.pending.len());
        merged.extend_from_slice(persisted);
        self.pending.sort_by_key(|entry| entry.cluster_idx);
        for entry in &self.pending {
            if entry.cluster_idx as usize != merged.len() {
                return Err(ScfsError::Corrupt {
                    cluster: entry.cluster_idx,
                    detail: format!("pending cluster does not follow index of {}", merged.len()),
                });
            }
            merged.push(entry.descriptor);
        }
        let cluster_count = self.cluster_count()?;
        if merged.len() != cluster_count as usize {
            return Err(ScfsError::Corrupt {
                cluster: cluster_count,
                detail: format!(
                    "index holds {} descriptors for {cluster_count} clusters",
                    merged.len()
                ),
            });
        }

        // Descriptors go out in batches of at most two clusters' worth of bytes.
        let batch = (2 * self.cluster_size.as_usize() / DESCRIPTOR_SIZE).max(1);
        let mut encoded = Vec::with_capacity(batch * DESCRIPTOR_SIZE);
        let mut pos = self.data_end;
        for chunk in merged.chunks(batch) {
            encoded.clear();
            for desc in chunk {
                encoded.extend_from_slice(&desc.encode());
            }
            write_all_at(ctx.store, pos, &encoded, ctx.retry_limit())?;
            pos += encoded.len() as u64;
        }

        let footer = FooterRecord::new(
            self.cluster_size,
            self.comp_type,
            self.logical_size,
            merged.len(),
        )
        .map_err(parse_error)?;
        write_all_at(ctx.store, pos, &footer.encode(), ctx.retry_limit())?;
        let tail = pos + FOOTER_SIZE as u64;

        let store_len = ctx.store.len()?;
        if store_len > tail {
            ctx.store.truncate(tail)?;
        }
        ctx.store.sync()?;

        debug!(
            target: "scfs::writer",
            clusters = merged.len(),
            folded = self.pending.len(),
            logical_size = self.logical_size,
            index_pos = self.data_end,
            tail,
            trimmed = store_len.saturating_sub(tail),
            "metadata_flushed"
        );
        self.persisted = Some(merged.into_boxed_slice());
        self.pending.clear();
        self.dirty = false;
        bump(&ctx.stats.metadata_flushes, 1);
        Ok(())
    }
}

impl CompressedFile {
    /// Store `plaintext` as the full contents of cluster `cluster`.
    ///
    /// `cluster` must be the next cluster past the end (after a full last
    /// cluster) or the partial last cluster, which may only grow. A cluster
    /// that ends up full is compressed and written right away; a partial one
    /// stays buffered until it fills or the file is flushed. A full cluster
    /// whose write fails stays buffered too, and the next flush retries it.
    pub fn append_or_update_cluster(&self, cluster: u32, plaintext: &[u8]) -> Result<()> {
        let store = self.store()?;
        self.mount().admit_write(&*store)?;
        let ctx = self.ctx(&*store);
        let mut meta = self.meta.lock();
        meta.ensure_loaded(&ctx)?;
        let result = meta.replace_cluster(&ctx, cluster, plaintext);
        meta.sync_accounting(self.mount().space());
        result
    }

    /// Append `data` at `offset`, which must equal the current logical size.
    ///
    /// Like `pwrite`, the write may be short: if a later cluster fails to
    /// reach the store, the bytes taken before it are returned.
    pub fn write_at(&self, offset: u64, data: &[u8]) -> Result<usize> {
        if data.is_empty() {
            return Ok(0);
        }
        let store = self.store()?;
        self.mount().admit_write(&*store)?;
        let ctx = self.ctx(&*store);
        let mut meta = self.meta.lock();
        meta.ensure_loaded(&ctx)?;
        if offset != meta.logical_size {
            return Err(ScfsError::InvalidArgument(format!(
                "write at {offset} does not append to a file of {} bytes",
                meta.logical_size
            )));
        }
        let result = meta.append_bytes(&ctx, data);
        meta.sync_accounting(self.mount().space());
        result
    }

    /// Append the buffered cluster, then write the index and footer.
    ///
    /// A no-op when nothing changed since the last flush or load.
    pub fn flush_metadata(&self) -> Result<()> {
        let store = self.store()?;
        let ctx = self.ctx(&*store);
        let mut meta = self.meta.lock();
        meta.flush_locked(&ctx)
    }

    /// Only truncation to zero is supported.
    pub fn truncate(&self, new_size: u64) -> Result<()> {
        if new_size != 0 {
            return Err(ScfsError::InvalidArgument(format!(
                "truncate to {new_size}: only truncation to 0 is supported"
            )));
        }
        self.truncate_to_zero()
    }

    /// Drop every cluster and reset the file to its freshly created state.
    pub fn truncate_to_zero(&self) -> Result<()> {
        let store = self.store()?;
        let ctx = self.ctx(&*store);
        let mut meta = self.meta.lock();
        if let Err(err) = store.truncate(0) {
            meta.invalidate();
            warn!(target: "scfs::writer", error = %err, "truncate_failed");
            return Err(err);
        }
        let dropped = meta.pending.len();
        meta.reset_fresh(&ctx);
        // Whatever a failed flush lost is gone with the rest of the file.
        meta.lost_writes = None;
        meta.sync_accounting(self.mount().space());
        debug!(target: "scfs::writer", dropped_pending = dropped, "truncated_to_zero");
        Ok(())
    }
}

/// A buffer pair for `cluster`, waiting for one if the pool is exhausted.
fn stage_buffers(ctx: &IoCtx<'_>, cluster: u32) -> PooledBuffers {
    let pool = ctx.mount.pool();
    pool.try_acquire().unwrap_or_else(|| {
        trace!(target: "scfs::writer", cluster, "waiting_for_cluster_buffers");
        pool.acquire()
    })
}
