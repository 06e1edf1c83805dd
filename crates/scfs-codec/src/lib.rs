#![forbid(unsafe_code)]
//! Cluster compression dispatch.
//!
//! The algorithm set is closed ([`CompressionType`]), so dispatch is a plain
//! `match`. Two backends keep process-wide state that is created on first
//! use and then reused for the life of the process:
//!
//! - **LZ4**: a scratch workspace sized for the largest supported cluster.
//!   It is never released, so a compress call never has to allocate it
//!   again under memory pressure.
//! - **zlib**: a reusable deflate/inflate handle pair. Builds without the
//!   `zlib` feature report [`CodecError::Unavailable`] instead.
//!
//! Compression failure is recoverable (the writer stores raw bytes);
//! decompression failure fails the single read that hit it.

mod lz4;
mod zlib;

use scfs_error::ScfsError;
use scfs_types::CompressionType;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("{algo} compression failed: {detail}")]
    Compress {
        algo: CompressionType,
        detail: String,
    },
    #[error("{algo} decompression failed: {detail}")]
    Decompress {
        algo: CompressionType,
        detail: String,
    },
    #[error("{algo} produced {actual} bytes, expected {expected}")]
    LengthMismatch {
        algo: CompressionType,
        expected: u32,
        actual: usize,
    },
    #[error("{0} is not available in this build")]
    Unavailable(CompressionType),
}

impl CodecError {
    /// Map a decompression failure on `cluster` to the read-path error.
    #[must_use]
    pub fn into_read_error(self, cluster: u32) -> ScfsError {
        match self {
            Self::Unavailable(algo) => ScfsError::CodecUnavailable(algo.name().to_owned()),
            other => ScfsError::Corrupt {
                cluster,
                detail: other.to_string(),
            },
        }
    }
}

impl From<CodecError> for ScfsError {
    fn from(err: CodecError) -> Self {
        match err {
            CodecError::Unavailable(algo) => Self::CodecUnavailable(algo.name().to_owned()),
            other => Self::Codec(other.to_string()),
        }
    }
}

/// Whether `algo` can be used in this build.
#[must_use]
pub fn is_available(algo: CompressionType) -> bool {
    match algo {
        CompressionType::None | CompressionType::Lz4 => true,
        CompressionType::Zlib => zlib::AVAILABLE,
    }
}

/// Worst-case compressed size of `src_len` input bytes.
#[must_use]
pub fn max_compressed_len(algo: CompressionType, src_len: usize) -> usize {
    match algo {
        CompressionType::None => src_len,
        CompressionType::Lz4 => lz4::max_output(src_len),
        CompressionType::Zlib => zlib::max_output(src_len),
    }
}

/// Compress `src` into `dst`, replacing its contents and keeping its
/// allocation.
pub fn compress_into(
    algo: CompressionType,
    src: &[u8],
    dst: &mut Vec<u8>,
) -> Result<(), CodecError> {
    let result = match algo {
        CompressionType::None => {
            dst.clear();
            dst.extend_from_slice(src);
            Ok(())
        }
        CompressionType::Lz4 => lz4::compress_into(src, dst),
        CompressionType::Zlib => zlib::compress_into(src, dst),
    };
    result?;
    tracing::trace!(
        target: "scfs::codec",
        algo = algo.name(),
        input = src.len(),
        output = dst.len(),
        "compress"
    );
    Ok(())
}

/// Decompress `src` into `dst`, which ends up exactly `expected_len` bytes
/// long on success.
pub fn decompress_into(
    algo: CompressionType,
    src: &[u8],
    expected_len: u32,
    dst: &mut Vec<u8>,
) -> Result<(), CodecError> {
    match algo {
        // Only reached when a stored size disagrees with the nominal length.
        CompressionType::None => Err(CodecError::LengthMismatch {
            algo,
            expected: expected_len,
            actual: src.len(),
        }),
        CompressionType::Lz4 => lz4::decompress_into(src, expected_len, dst),
        CompressionType::Zlib => zlib::decompress_into(src, expected_len, dst),
    }
}

pub fn compress(algo: CompressionType, src: &[u8]) -> Result<Vec<u8>, CodecError> {
    let mut out = Vec::new();
    compress_into(algo, src, &mut out)?;
    Ok(out)
}

pub fn decompress(
    algo: CompressionType,
    src: &[u8],
    expected_len: u32,
) -> Result<Vec<u8>, CodecError> {
    let mut out = Vec::new();
    decompress_into(algo, src, expected_len, &mut out)?;
    Ok(out)
}
