#![forbid(unsafe_code)]
//! SCFS public API facade.
//!
//! Re-exports the engine from `scfs-core` together with the backing-store,
//! on-disk type and error crates, so embedders (and `scfs-cli`) depend on
//! one crate.

pub use scfs_block as block;
pub use scfs_codec as codec;
pub use scfs_core::*;
pub use scfs_types as types;

pub use scfs_block::{
    BackingStore, FileBackingStore, FileStoreOpener, MemoryBackingStore, StoreOpener,
};
pub use scfs_error::{Result, ScfsError};
pub use scfs_types::{ClusterDescriptor, ClusterSize, CompressionType, FooterRecord};
