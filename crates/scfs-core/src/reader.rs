//! Cluster reader.
//!
//! A stored cluster is raw when its size equals the full cluster size or
//! the plaintext length that cluster has at its position (the trailing
//! remainder for the last one). Any other size means compressed. Writers
//! only keep compressed bytes that are strictly shorter than the plaintext,
//! so the two cases never collide.

use crate::file::{CompressedFile, IoCtx};
use crate::parse_error;
use crate::pool::PooledBuffers;
use crate::stats::bump;
use bytes::{Bytes, BytesMut};
use scfs_block::read_exact_at;
use scfs_error::{Result, ScfsError};
use scfs_types::{ClusterDescriptor, ClusterSize, CompressionType, u64_to_u32};
use tracing::{trace, warn};

/// Whether a cluster of plaintext length `nominal` was stored raw.
///
/// Fails with `Corrupt` for a full-size record where a shorter trailing
/// cluster was expected.
pub(crate) fn stored_raw(
    cluster: u32,
    stored: u32,
    cluster_size: ClusterSize,
    nominal: u32,
) -> Result<bool> {
    if stored != cluster_size.get() && stored != nominal {
        return Ok(false);
    }
    if stored != nominal {
        return Err(ScfsError::Corrupt {
            cluster,
            detail: format!("raw record of {stored} bytes, cluster holds {nominal}"),
        });
    }
    Ok(true)
}

/// Decode `stored` (the bytes of cluster `cluster`) into `out`.
pub(crate) fn decode_cluster_into(
    comp_type: CompressionType,
    cluster: u32,
    cluster_size: ClusterSize,
    nominal: u32,
    stored: &[u8],
    out: &mut Vec<u8>,
) -> Result<()> {
    let stored_len = u32::try_from(stored.len()).unwrap_or(u32::MAX);
    if stored_raw(cluster, stored_len, cluster_size, nominal)? {
        out.clear();
        out.extend_from_slice(stored);
        return Ok(());
    }
    scfs_codec::decompress_into(comp_type, stored, nominal, out)
        .map_err(|err| err.into_read_error(cluster))
}

/// Read and decode a cluster into a scratch pair: the stored bytes land in
/// the compressed region, the plaintext in the plaintext region.
pub(crate) fn load_cluster_into(
    ctx: &IoCtx<'_>,
    comp_type: CompressionType,
    cluster_size: ClusterSize,
    cluster: u32,
    nominal: u32,
    desc: ClusterDescriptor,
    buffers: &mut PooledBuffers,
) -> Result<()> {
    let (plain, comp) = buffers.split_mut();
    comp.clear();
    comp.resize(desc.size as usize, 0);
    read_exact_at(ctx.store, desc.offset, comp, ctx.retry_limit())?;
    decode_cluster_into(comp_type, cluster, cluster_size, nominal, comp, plain)
}

/// Everything needed to fetch one cluster once the index lock is dropped.
#[derive(Debug, Clone, Copy)]
struct ClusterPlan {
    cluster: u32,
    desc: ClusterDescriptor,
    nominal: u32,
    cluster_size: ClusterSize,
    comp_type: CompressionType,
}

impl CompressedFile {
    /// Plaintext of cluster `cluster`.
    ///
    /// The index lock covers only the lookup, except for a partial trailing
    /// cluster, which a writer may rewrite in place and is read under it.
    pub fn read_cluster(&self, cluster: u32) -> Result<Bytes> {
        let store = self.store()?;
        let ctx = self.ctx(&*store);
        let mut meta = self.meta.lock();
        meta.ensure_loaded(&ctx)?;
        let cluster_count = meta.cluster_count()?;
        if cluster >= cluster_count {
            return Err(ScfsError::OutOfRange {
                cluster,
                cluster_count,
            });
        }
        if let Some(buffered) = meta.buffered.as_ref().filter(|b| b.cluster == cluster) {
            trace!(target: "scfs::reader", cluster, len = buffered.len(), "read_buffered_cluster");
            return Ok(Bytes::copy_from_slice(buffered.buffers.plain()));
        }
        let plan = ClusterPlan {
            cluster,
            desc: meta.resolve_loaded(cluster)?,
            nominal: meta.cluster_size.nominal_len(cluster, meta.logical_size),
            cluster_size: meta.cluster_size,
            comp_type: meta.comp_type,
        };
        if plan.nominal < plan.cluster_size.get() {
            let out = self.fetch(&ctx, plan);
            drop(meta);
            return out;
        }
        drop(meta);
        self.fetch(&ctx, plan)
    }

    fn fetch(&self, ctx: &IoCtx<'_>, plan: ClusterPlan) -> Result<Bytes> {
        let ClusterPlan {
            cluster,
            desc,
            nominal,
            cluster_size,
            comp_type,
        } = plan;
        let mut stored = BytesMut::zeroed(desc.size as usize);
        read_exact_at(ctx.store, desc.offset, &mut stored, ctx.retry_limit())?;

        let raw = match stored_raw(cluster, desc.size, cluster_size, nominal) {
            Ok(raw) => raw,
            Err(err) => return Err(self.corrupt(cluster, desc, err)),
        };
        trace!(
            target: "scfs::reader",
            cluster,
            offset = desc.offset,
            size = desc.size,
            nominal,
            compressed = !raw,
            "read_cluster"
        );
        if raw {
            return Ok(stored.freeze());
        }
        scfs_codec::decompress(comp_type, &stored, nominal)
            .map(Bytes::from)
            .map_err(|err| self.corrupt(cluster, desc, err.into_read_error(cluster)))
    }

    fn corrupt(&self, cluster: u32, desc: ClusterDescriptor, err: ScfsError) -> ScfsError {
        bump(&self.stats.corrupt_reads, 1);
        warn!(
            target: "scfs::reader",
            cluster,
            offset = desc.offset,
            size = desc.size,
            error = %err,
            "cluster_decode_failed"
        );
        err
    }

    /// Up to `len` bytes starting at `offset`; short at end of file.
    pub fn read_at(&self, offset: u64, len: usize) -> Result<Vec<u8>> {
        let logical_size = self.logical_size()?;
        let end = offset.saturating_add(len as u64).min(logical_size);
        if offset >= end {
            return Ok(Vec::new());
        }
        let cluster_size = self.meta.lock().cluster_size;
        let mut out = Vec::with_capacity((end - offset) as usize);
        let mut pos = offset;
        while pos < end {
            let cluster = u64_to_u32(cluster_size.cluster_of(pos), "cluster").map_err(parse_error)?;
            let data = self.read_cluster(cluster)?;
            let within = (pos - cluster_size.cluster_start(cluster)) as usize;
            let take = ((end - pos) as usize).min(data.len().saturating_sub(within));
            if take == 0 {
                break;
            }
            out.extend_from_slice(&data[within..within + take]);
            pos += take as u64;
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_detection_by_size_and_position() {
        let cs = ClusterSize::new(4096).expect("cluster size");
        // Full cluster stored raw.
        assert!(stored_raw(0, 4096, cs, 4096).expect("full raw"));
        // Full cluster stored compressed.
        assert!(!stored_raw(0, 1000, cs, 4096).expect("full compressed"));
        // Trailing 1000-byte cluster stored raw.
        assert!(stored_raw(3, 1000, cs, 1000).expect("tail raw"));
        // Trailing cluster stored compressed.
        assert!(!stored_raw(3, 200, cs, 1000).expect("tail compressed"));
        // Full-size record for a short trailing cluster.
        assert!(matches!(
            stored_raw(3, 4096, cs, 1000),
            Err(ScfsError::Corrupt { cluster: 3, .. })
        ));
    }

    #[test]
    fn decode_raw_and_compressed() {
        let cs = ClusterSize::new(4096).expect("cluster size");
        let plain = vec![7_u8; 1000];
        let mut out = Vec::new();

        decode_cluster_into(CompressionType::Lz4, 0, cs, 1000, &plain, &mut out).expect("raw");
        assert_eq!(out, plain);

        let packed = scfs_codec::compress(CompressionType::Lz4, &plain).expect("compress");
        assert!(packed.len() < plain.len());
        decode_cluster_into(CompressionType::Lz4, 0, cs, 1000, &packed, &mut out)
            .expect("decompress");
        assert_eq!(out, plain);

        let err = decode_cluster_into(CompressionType::Lz4, 5, cs, 1000, &packed[..3], &mut out)
            .expect_err("truncated stream");
        assert!(matches!(err, ScfsError::Corrupt { cluster: 5, .. }));
    }
}
