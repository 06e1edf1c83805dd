#![forbid(unsafe_code)]
//! On-disk records and shared types for SCFS compressed files.
//!
//! # Backing store layout
//!
//! ```text
//! +--------------------+
//! | cluster 0 bytes    |  descriptor 0 .size bytes (compressed or raw)
//! +--------------------+
//! | ...                |
//! +--------------------+
//! | cluster N-1 bytes  |
//! +--------------------+
//! | descriptor 0       |  16 bytes
//! | ...                |
//! | descriptor N-1     |  16 bytes
//! +--------------------+
//! | footer             |  24 bytes
//! +--------------------+
//!
//! ClusterDescriptor:
//! +------------------+--------+
//! | offset           | 8 bytes| byte offset of the cluster in the store
//! | size             | 4 bytes| stored length (compressed or raw)
//! | reserved         | 4 bytes| = 0
//! +------------------+--------+
//!
//! FooterRecord:
//! +--------------------+--------+
//! | cluster_size       | 4 bytes|
//! | comp_type          | 4 bytes|
//! | original_file_size | 8 bytes|
//! | footer_size        | 4 bytes| = N * 16 + 24
//! | magic              | 4 bytes| = 0x5343_4653 ("SCFS")
//! +--------------------+--------+
//! ```
//!
//! All integers are little-endian.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Footer magic ("SCFS" read as a big-endian word).
pub const SCFS_MAGIC: u32 = 0x5343_4653;

/// Encoded size of one [`ClusterDescriptor`].
pub const DESCRIPTOR_SIZE: usize = 16;

/// Encoded size of the fixed [`FooterRecord`].
pub const FOOTER_SIZE: usize = 24;

pub const CLUSTER_SIZE_MIN: u32 = 4096;
pub const CLUSTER_SIZE_MAX: u32 = 65536;
pub const CLUSTER_SIZE_DEFAULT: u32 = 16384;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("insufficient data: need {needed} bytes at offset {offset}, got {actual}")]
    InsufficientData {
        needed: usize,
        offset: usize,
        actual: usize,
    },
    #[error("invalid magic: expected {expected:#x}, got {actual:#x}")]
    InvalidMagic { expected: u64, actual: u64 },
    #[error("invalid field: {field} ({reason})")]
    InvalidField {
        field: &'static str,
        reason: &'static str,
    },
    #[error("integer conversion failed: {field}")]
    IntegerConversion { field: &'static str },
}

#[inline]
pub fn ensure_slice(data: &[u8], offset: usize, len: usize) -> Result<&[u8], ParseError> {
    let Some(end) = offset.checked_add(len) else {
        return Err(ParseError::InvalidField {
            field: "offset",
            reason: "overflow",
        });
    };

    if end > data.len() {
        return Err(ParseError::InsufficientData {
            needed: len,
            offset,
            actual: data.len().saturating_sub(offset),
        });
    }

    Ok(&data[offset..end])
}

#[inline]
pub fn read_le_u32(data: &[u8], offset: usize) -> Result<u32, ParseError> {
    let bytes = ensure_slice(data, offset, 4)?;
    Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

#[inline]
pub fn read_le_u64(data: &[u8], offset: usize) -> Result<u64, ParseError> {
    let bytes = ensure_slice(data, offset, 8)?;
    Ok(u64::from_le_bytes([
        bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
    ]))
}

/// Narrow a `u64` to `usize` with an explicit error path.
pub fn u64_to_usize(value: u64, field: &'static str) -> Result<usize, ParseError> {
    usize::try_from(value).map_err(|_| ParseError::IntegerConversion { field })
}

/// Narrow a `u64` to `u32` with an explicit error path.
pub fn u64_to_u32(value: u64, field: &'static str) -> Result<u32, ParseError> {
    u32::try_from(value).map_err(|_| ParseError::IntegerConversion { field })
}

// ── Cluster geometry ────────────────────────────────────────────────────────

/// Validated cluster size (power of two in 4096..=65536).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct ClusterSize(u32);

impl ClusterSize {
    pub const DEFAULT: Self = Self(CLUSTER_SIZE_DEFAULT);

    /// Create a `ClusterSize` if `value` is a power of two in
    /// [`CLUSTER_SIZE_MIN`, `CLUSTER_SIZE_MAX`].
    pub fn new(value: u32) -> Result<Self, ParseError> {
        if !value.is_power_of_two() || !(CLUSTER_SIZE_MIN..=CLUSTER_SIZE_MAX).contains(&value) {
            return Err(ParseError::InvalidField {
                field: "cluster_size",
                reason: "must be power of two in 4096..=65536",
            });
        }
        Ok(Self(value))
    }

    #[must_use]
    pub fn get(self) -> u32 {
        self.0
    }

    #[must_use]
    pub fn as_usize(self) -> usize {
        // Bounded by CLUSTER_SIZE_MAX, fits every supported target.
        self.0 as usize
    }

    /// Number of bits to shift to convert between bytes and clusters.
    #[must_use]
    pub fn shift(self) -> u32 {
        self.0.trailing_zeros()
    }

    /// Cluster containing `byte_offset`.
    #[must_use]
    pub fn cluster_of(self, byte_offset: u64) -> u64 {
        byte_offset >> self.shift()
    }

    /// Logical byte offset at which cluster `cluster` starts.
    #[must_use]
    pub fn cluster_start(self, cluster: u32) -> u64 {
        u64::from(cluster) << self.shift()
    }

    /// `ceil(logical_size / cluster_size)`.
    pub fn cluster_count(self, logical_size: u64) -> Result<u32, ParseError> {
        let count = logical_size.div_ceil(u64::from(self.0));
        u64_to_u32(count, "cluster_count")
    }

    /// Plaintext length of cluster `cluster` in a file of `logical_size`
    /// bytes: the full cluster size, the trailing remainder for the last
    /// cluster, or zero past the end.
    #[must_use]
    pub fn nominal_len(self, cluster: u32, logical_size: u64) -> u32 {
        let start = self.cluster_start(cluster);
        let remaining = logical_size.saturating_sub(start);
        // min() with a u32 keeps the value in range.
        remaining.min(u64::from(self.0)) as u32
    }
}

impl Default for ClusterSize {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl TryFrom<u32> for ClusterSize {
    type Error = ParseError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ClusterSize> for u32 {
    fn from(value: ClusterSize) -> Self {
        value.0
    }
}

impl fmt::Display for ClusterSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ── Compression type ────────────────────────────────────────────────────────

/// Compression algorithm tag stored in the footer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionType {
    /// Clusters are always stored raw.
    None,
    /// Fast dictionary compressor with a process-wide scratch workspace.
    #[default]
    Lz4,
    /// Generic zlib transform obtained lazily from the codec layer.
    Zlib,
}

impl CompressionType {
    pub const ALL: [Self; 3] = [Self::None, Self::Lz4, Self::Zlib];

    pub fn from_raw(raw: u32) -> Result<Self, ParseError> {
        match raw {
            0 => Ok(Self::None),
            1 => Ok(Self::Lz4),
            2 => Ok(Self::Zlib),
            _ => Err(ParseError::InvalidField {
                field: "comp_type",
                reason: "unknown compression tag",
            }),
        }
    }

    #[must_use]
    pub fn as_raw(self) -> u32 {
        match self {
            Self::None => 0,
            Self::Lz4 => 1,
            Self::Zlib => 2,
        }
    }

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Lz4 => "lz4",
            Self::Zlib => "zlib",
        }
    }
}

impl fmt::Display for CompressionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for CompressionType {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|ty| ty.name().eq_ignore_ascii_case(s))
            .ok_or(ParseError::InvalidField {
                field: "comp_type",
                reason: "expected one of none, lz4, zlib",
            })
    }
}

// ── Cluster descriptor ──────────────────────────────────────────────────────

/// Location and stored length of one cluster inside the backing store.
///
/// Invariant: `size <= cluster_size` of the owning file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClusterDescriptor {
    pub offset: u64,
    pub size: u32,
}

impl ClusterDescriptor {
    /// First byte after this cluster in the backing store.
    #[must_use]
    pub fn end(self) -> u64 {
        self.offset.saturating_add(u64::from(self.size))
    }

    #[must_use]
    pub fn encode(self) -> [u8; DESCRIPTOR_SIZE] {
        let mut buf = [0_u8; DESCRIPTOR_SIZE];
        buf[0..8].copy_from_slice(&self.offset.to_le_bytes());
        buf[8..12].copy_from_slice(&self.size.to_le_bytes());
        // bytes 12..16 are reserved (zeros)
        buf
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ParseError> {
        Ok(Self {
            offset: read_le_u64(bytes, 0)?,
            size: read_le_u32(bytes, 8)?,
        })
    }
}

/// Decode a packed descriptor array.
pub fn decode_descriptors(bytes: &[u8]) -> Result<Vec<ClusterDescriptor>, ParseError> {
    if bytes.len() % DESCRIPTOR_SIZE != 0 {
        return Err(ParseError::InvalidField {
            field: "cluster_index",
            reason: "length is not a multiple of the descriptor size",
        });
    }
    bytes
        .chunks_exact(DESCRIPTOR_SIZE)
        .map(ClusterDescriptor::decode)
        .collect()
}

// ── Footer ──────────────────────────────────────────────────────────────────

/// Trailer at the tail of the backing store describing the whole file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FooterRecord {
    pub cluster_size: u32,
    pub comp_type: u32,
    pub original_file_size: u64,
    pub footer_size: u32,
    pub magic: u32,
}

impl FooterRecord {
    /// Build the footer for a file with `descriptor_count` indexed clusters.
    pub fn new(
        cluster_size: ClusterSize,
        comp_type: CompressionType,
        original_file_size: u64,
        descriptor_count: usize,
    ) -> Result<Self, ParseError> {
        let footer_size = descriptor_count
            .checked_mul(DESCRIPTOR_SIZE)
            .and_then(|bytes| bytes.checked_add(FOOTER_SIZE))
            .and_then(|bytes| u32::try_from(bytes).ok())
            .ok_or(ParseError::IntegerConversion {
                field: "footer_size",
            })?;
        Ok(Self {
            cluster_size: cluster_size.get(),
            comp_type: comp_type.as_raw(),
            original_file_size,
            footer_size,
            magic: SCFS_MAGIC,
        })
    }

    #[must_use]
    pub fn encode(&self) -> [u8; FOOTER_SIZE] {
        let mut buf = [0_u8; FOOTER_SIZE];
        buf[0..4].copy_from_slice(&self.cluster_size.to_le_bytes());
        buf[4..8].copy_from_slice(&self.comp_type.to_le_bytes());
        buf[8..16].copy_from_slice(&self.original_file_size.to_le_bytes());
        buf[16..20].copy_from_slice(&self.footer_size.to_le_bytes());
        buf[20..24].copy_from_slice(&self.magic.to_le_bytes());
        buf
    }

    /// Decode and structurally validate a footer.
    ///
    /// Checks the magic, that `footer_size` covers a whole number of
    /// descriptors, and that the geometry fields are in range.
    pub fn decode(bytes: &[u8]) -> Result<Self, ParseError> {
        let magic = read_le_u32(bytes, 20)?;
        if magic != SCFS_MAGIC {
            return Err(ParseError::InvalidMagic {
                expected: u64::from(SCFS_MAGIC),
                actual: u64::from(magic),
            });
        }
        let footer = Self {
            cluster_size: read_le_u32(bytes, 0)?,
            comp_type: read_le_u32(bytes, 4)?,
            original_file_size: read_le_u64(bytes, 8)?,
            footer_size: read_le_u32(bytes, 16)?,
            magic,
        };
        ClusterSize::new(footer.cluster_size)?;
        CompressionType::from_raw(footer.comp_type)?;
        let index_bytes = (footer.footer_size as usize)
            .checked_sub(FOOTER_SIZE)
            .ok_or(ParseError::InvalidField {
                field: "footer_size",
                reason: "smaller than the fixed footer",
            })?;
        if index_bytes % DESCRIPTOR_SIZE != 0 {
            return Err(ParseError::InvalidField {
                field: "footer_size",
                reason: "not a whole number of descriptors",
            });
        }
        Ok(footer)
    }

    /// Number of descriptors the footer claims precede it.
    #[must_use]
    pub fn descriptor_count(&self) -> usize {
        (self.footer_size as usize).saturating_sub(FOOTER_SIZE) / DESCRIPTOR_SIZE
    }

    /// Byte length of the descriptor array.
    #[must_use]
    pub fn index_len(&self) -> u64 {
        u64::from(self.footer_size).saturating_sub(FOOTER_SIZE as u64)
    }

    pub fn cluster_size(&self) -> Result<ClusterSize, ParseError> {
        ClusterSize::new(self.cluster_size)
    }

    pub fn compression(&self) -> Result<CompressionType, ParseError> {
        CompressionType::from_raw(self.comp_type)
    }
}
