#![forbid(unsafe_code)]
//! Error types for the SCFS compressed-cluster engine.
//!
//! # Error Taxonomy
//!
//! SCFS uses a two-layer error model:
//!
//! | Layer | Type | Crate | Purpose |
//! |-------|------|-------|---------|
//! | Parsing | `ParseError` | `scfs-types` | Footer/descriptor violations found while decoding bytes |
//! | Codec | `CodecError` | `scfs-codec` | Compression or decompression failure, unavailable algorithm |
//! | Runtime | `ScfsError` | `scfs-error` (this crate) | Errors returned by every public engine operation |
//!
//! `scfs-error` depends on no other workspace crate. The conversions
//! `ParseError → ScfsError` and `CodecError → ScfsError` live in the crates
//! that own the source error.
//!
//! ## Mapping Policy
//!
//! | Source | ScfsError Variant | Rationale |
//! |--------|-------------------|-----------|
//! | `ParseError` while reloading a footer | `Format` | The trailing bytes are not an SCFS payload |
//! | `CodecError` on decompress | `Corrupt { cluster, .. }` | A stored cluster does not decode; the read fails |
//! | `CodecError` on compress | never surfaced | The writer stores the raw bytes instead |
//! | `CodecError::Unavailable` | `CodecUnavailable` | The environment cannot provide the algorithm |
//!
//! ## errno Mapping
//!
//! Every `ScfsError` variant maps to exactly one POSIX errno via
//! [`ScfsError::to_errno`]. The match is exhaustive, so a new variant does
//! not compile until its errno is assigned.
//!
//! | Variant | errno |
//! |---------|-------|
//! | `Io` | raw OS error, else `EIO` |
//! | `TooManyRetries` | `EIO` |
//! | `Codec` | `EIO` |
//! | `CodecUnavailable` | `EOPNOTSUPP` |
//! | `Corrupt` | `EIO` |
//! | `LostWrites` | `EIO` |
//! | `OutOfRange` | `EINVAL` |
//! | `Format` | `EINVAL` |
//! | `Parse` | `EINVAL` |
//! | `InvalidArgument` | `EINVAL` |
//! | `NoSpace` | `ENOSPC` |
//! | `NotOpen` | `EBADF` |

use thiserror::Error;

/// Unified error type for all SCFS engine operations.
#[derive(Debug, Error)]
pub enum ScfsError {
    /// Operating system I/O error from the backing store.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A backing-store transfer made no progress for too many consecutive
    /// attempts.
    #[error("{op} at offset {offset} made no progress after {attempts} attempts")]
    TooManyRetries {
        op: &'static str,
        offset: u64,
        attempts: u32,
    },

    /// Compression or decompression failed outside of a cluster read.
    #[error("codec error: {0}")]
    Codec(String),

    /// The requested compression algorithm cannot be provided here.
    #[error("compression algorithm unavailable: {0}")]
    CodecUnavailable(String),

    /// A stored cluster failed to decode or has an impossible descriptor.
    ///
    /// The read fails; no stale or zeroed data is substituted.
    #[error("corrupt cluster {cluster}: {detail}")]
    Corrupt { cluster: u32, detail: String },

    /// A failed metadata flush discarded data written since the last
    /// successful flush. Reported once, by the next flush or release.
    #[error("writes past the on-disk index were lost (logical size was {logical_size})")]
    LostWrites { logical_size: u64 },

    /// Cluster index outside the file's cluster count.
    #[error("cluster {cluster} out of range (cluster_count={cluster_count})")]
    OutOfRange { cluster: u32, cluster_count: u32 },

    /// The backing store does not hold a valid SCFS payload.
    #[error("not an SCFS-formatted object: {0}")]
    Format(String),

    /// Parse-layer error surfaced without more specific context.
    #[error("parse error: {0}")]
    Parse(String),

    /// Unsupported argument (truncation target, non-append write, bad config).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The backing filesystem lacks room for worst-case metadata plus
    /// buffered data.
    #[error("no space left on device")]
    NoSpace,

    /// The backing store handle is not open.
    #[error("backing store is not open")]
    NotOpen,
}

impl ScfsError {
    /// Convert this error into a POSIX errno for the upper file layer.
    ///
    /// Policy notes:
    /// - `CodecUnavailable` → `EOPNOTSUPP`: distinguishes "not built/provided"
    ///   from a failed transform.
    /// - `OutOfRange` → `EINVAL`: an invalid cluster index is a caller error.
    /// - `NotOpen` → `EBADF`: the handle was released (or never acquired).
    #[must_use]
    pub fn to_errno(&self) -> libc::c_int {
        match self {
            Self::Io(err) => err.raw_os_error().unwrap_or(libc::EIO),
            Self::TooManyRetries { .. }
            | Self::Codec(_)
            | Self::Corrupt { .. }
            | Self::LostWrites { .. } => libc::EIO,
            Self::CodecUnavailable(_) => libc::EOPNOTSUPP,
            Self::OutOfRange { .. }
            | Self::Format(_)
            | Self::Parse(_)
            | Self::InvalidArgument(_) => libc::EINVAL,
            Self::NoSpace => libc::ENOSPC,
            Self::NotOpen => libc::EBADF,
        }
    }

    /// Whether this error came from the backing store rather than from the
    /// caller or the stored data.
    #[must_use]
    pub fn is_io(&self) -> bool {
        matches!(self, Self::Io(_) | Self::TooManyRetries { .. })
    }
}

/// Result alias using `ScfsError`.
pub type Result<T> = std::result::Result<T, ScfsError>;
