//! zlib backend over a lazily created, reused deflate/inflate handle pair.

/// Worst-case deflate expansion plus the zlib header and trailer.
pub(crate) fn max_output(src_len: usize) -> usize {
    src_len + (src_len >> 12) + (src_len >> 14) + (src_len >> 25) + 13 + 6
}

#[cfg(feature = "zlib")]
mod imp {
    use crate::CodecError;
    use flate2::{Compress, Compression, Decompress, FlushCompress, FlushDecompress, Status};
    use parking_lot::Mutex;
    use scfs_types::CompressionType;
    use std::sync::OnceLock;
    use tracing::debug;

    struct Handle {
        deflate: Compress,
        inflate: Decompress,
    }

    static HANDLE: OnceLock<Mutex<Handle>> = OnceLock::new();

    fn handle() -> &'static Mutex<Handle> {
        HANDLE.get_or_init(|| {
            debug!(target: "scfs::codec", "zlib transform handle created");
            Mutex::new(Handle {
                deflate: Compress::new(Compression::default(), true),
                inflate: Decompress::new(true),
            })
        })
    }

    fn compress_failed(detail: impl ToString) -> CodecError {
        CodecError::Compress {
            algo: CompressionType::Zlib,
            detail: detail.to_string(),
        }
    }

    fn decompress_failed(detail: impl ToString) -> CodecError {
        CodecError::Decompress {
            algo: CompressionType::Zlib,
            detail: detail.to_string(),
        }
    }

    pub(crate) fn compress_into(src: &[u8], dst: &mut Vec<u8>) -> Result<(), CodecError> {
        dst.clear();
        dst.reserve(super::max_output(src.len()));
        let mut guard = handle().lock();
        guard.deflate.reset();
        let status = guard
            .deflate
            .compress_vec(src, dst, FlushCompress::Finish)
            .map_err(compress_failed)?;
        drop(guard);
        if status != Status::StreamEnd {
            return Err(compress_failed("output bound exceeded"));
        }
        Ok(())
    }

    pub(crate) fn decompress_into(
        src: &[u8],
        expected_len: u32,
        dst: &mut Vec<u8>,
    ) -> Result<(), CodecError> {
        let expected = expected_len as usize;
        dst.clear();
        // One spare byte so an over-long stream shows up as a length mismatch.
        dst.reserve(expected + 1);
        let mut guard = handle().lock();
        guard.inflate.reset(true);
        let status = guard
            .inflate
            .decompress_vec(src, dst, FlushDecompress::Finish)
            .map_err(decompress_failed)?;
        drop(guard);
        if dst.len() != expected {
            return Err(CodecError::LengthMismatch {
                algo: CompressionType::Zlib,
                expected: expected_len,
                actual: dst.len(),
            });
        }
        if status != Status::StreamEnd {
            return Err(decompress_failed("truncated stream"));
        }
        Ok(())
    }
}

#[cfg(feature = "zlib")]
pub(crate) const AVAILABLE: bool = true;

#[cfg(feature = "zlib")]
pub(crate) use imp::{compress_into, decompress_into};

#[cfg(not(feature = "zlib"))]
pub(crate) const AVAILABLE: bool = false;

#[cfg(not(feature = "zlib"))]
use crate::CodecError;

#[cfg(not(feature = "zlib"))]
pub(crate) fn compress_into(_src: &[u8], _dst: &mut Vec<u8>) -> Result<(), CodecError> {
    Err(CodecError::Unavailable(scfs_types::CompressionType::Zlib))
}

#[cfg(not(feature = "zlib"))]
pub(crate) fn decompress_into(
    _src: &[u8],
    _expected_len: u32,
    _dst: &mut Vec<u8>,
) -> Result<(), CodecError> {
    Err(CodecError::Unavailable(scfs_types::CompressionType::Zlib))
}
