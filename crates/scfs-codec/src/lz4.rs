//! LZ4 block backend with a process-wide compression workspace.

use crate::CodecError;
use parking_lot::Mutex;
use scfs_types::{CLUSTER_SIZE_MAX, CompressionType};
use std::sync::OnceLock;
use tracing::debug;

static WORKSPACE: OnceLock<Mutex<Vec<u8>>> = OnceLock::new();

fn workspace() -> &'static Mutex<Vec<u8>> {
    WORKSPACE.get_or_init(|| {
        let len = max_output(CLUSTER_SIZE_MAX as usize);
        debug!(target: "scfs::codec", len, "lz4 workspace allocated");
        Mutex::new(vec![0_u8; len])
    })
}

pub(crate) fn max_output(src_len: usize) -> usize {
    lz4_flex::block::get_maximum_output_size(src_len)
}

pub(crate) fn compress_into(src: &[u8], dst: &mut Vec<u8>) -> Result<(), CodecError> {
    let mut ws = workspace().lock();
    let bound = max_output(src.len());
    if ws.len() < bound {
        // Only inputs larger than the biggest cluster get here.
        ws.resize(bound, 0);
    }
    let n = lz4_flex::block::compress_into(src, &mut ws[..bound]).map_err(|err| {
        CodecError::Compress {
            algo: CompressionType::Lz4,
            detail: err.to_string(),
        }
    })?;
    dst.clear();
    dst.extend_from_slice(&ws[..n]);
    drop(ws);
    Ok(())
}

pub(crate) fn decompress_into(
    src: &[u8],
    expected_len: u32,
    dst: &mut Vec<u8>,
) -> Result<(), CodecError> {
    dst.clear();
    dst.resize(expected_len as usize, 0);
    let n = lz4_flex::block::decompress_into(src, dst).map_err(|err| CodecError::Decompress {
        algo: CompressionType::Lz4,
        detail: err.to_string(),
    })?;
    if n != expected_len as usize {
        dst.truncate(n);
        return Err(CodecError::LengthMismatch {
            algo: CompressionType::Lz4,
            expected: expected_len,
            actual: n,
        });
    }
    Ok(())
}
