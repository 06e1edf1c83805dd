use proptest::prelude::*;
use scfs_block::MemoryBackingStore;
use scfs_core::{FileHandle, MountConfig, ScfsMount};
use scfs_types::CompressionType;
use std::sync::Arc;

/// Runs of one repeated byte mixed with pseudo-random stretches, so every
/// codec sees both clusters it can shrink and clusters it cannot.
fn payload() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec((any::<u8>(), 1_usize..600, any::<bool>()), 0..64).prop_map(|runs| {
        let mut out = Vec::new();
        for (byte, len, repeat) in runs {
            if repeat {
                out.extend(std::iter::repeat_n(byte, len));
            } else {
                let mut state = u64::from(byte) | 1;
                out.extend((0..len).map(|_| {
                    state = state
                        .wrapping_mul(6_364_136_223_846_793_005)
                        .wrapping_add(1_442_695_040_888_963_407);
                    (state >> 56) as u8
                }));
            }
        }
        out
    })
}

fn cluster_size() -> impl Strategy<Value = u32> {
    (12_u32..=16).prop_map(|shift| 1 << shift)
}

fn compression() -> impl Strategy<Value = CompressionType> {
    prop::sample::select(CompressionType::ALL.to_vec())
}

fn mount(cluster_size: u32, comp: CompressionType) -> Arc<ScfsMount> {
    let config = MountConfig::default()
        .cluster_size(cluster_size)
        .expect("cluster size")
        .comp_type(comp);
    ScfsMount::new(config).expect("mount")
}

fn append_chunked(handle: &FileHandle, data: &[u8], chunk: usize) {
    let mut offset = 0_u64;
    for piece in data.chunks(chunk) {
        let n = handle.write_at(offset, piece).expect("write");
        assert_eq!(n, piece.len());
        offset += n as u64;
    }
}

fn pack(mount: &Arc<ScfsMount>, data: &[u8], chunk: usize) -> Arc<MemoryBackingStore> {
    let store = Arc::new(MemoryBackingStore::new());
    let file = mount.file(Arc::clone(&store));
    let handle = file.open().expect("open");
    append_chunked(&handle, data, chunk);
    handle.release().expect("release");
    store
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn reopened_file_reads_back_what_was_written(
        data in payload(),
        cluster_size in cluster_size(),
        comp in compression(),
        chunk in 1_usize..20_000,
    ) {
        let mount = mount(cluster_size, comp);
        let store = pack(&mount, &data, chunk);

        let file = mount.file(Arc::clone(&store));
        let handle = file.open().expect("reopen");
        prop_assert_eq!(handle.logical_size().expect("size"), data.len() as u64);
        prop_assert_eq!(handle.read_at(0, data.len() + 1).expect("read"), data);
        handle.release().expect("release");
        prop_assert_eq!(mount.pool().stats().in_use, 0);
    }

    #[test]
    fn repeated_flushes_leave_identical_bytes(
        data in payload(),
        cluster_size in cluster_size(),
        comp in compression(),
        chunk in 1_usize..20_000,
    ) {
        let mount = mount(cluster_size, comp);
        let store = Arc::new(MemoryBackingStore::new());
        let file = mount.file(Arc::clone(&store));
        let handle = file.open().expect("open");
        append_chunked(&handle, &data, chunk);

        handle.flush_metadata().expect("first flush");
        let once = store.snapshot();
        handle.flush_metadata().expect("second flush");
        prop_assert_eq!(&store.snapshot(), &once);
        handle.release().expect("release");
        prop_assert_eq!(&store.snapshot(), &once);

        // A read-only reopen changes nothing either.
        let handle = file.open().expect("reopen");
        let _ = handle.read_at(0, data.len()).expect("read");
        handle.release().expect("release");
        prop_assert_eq!(store.snapshot(), once);
    }

    #[test]
    fn truncated_file_matches_a_fresh_one(
        before in payload(),
        data in payload(),
        cluster_size in cluster_size(),
        comp in compression(),
        chunk in 1_usize..20_000,
    ) {
        let mount = mount(cluster_size, comp);
        let store = Arc::new(MemoryBackingStore::new());
        let file = mount.file(Arc::clone(&store));
        let handle = file.open().expect("open");
        append_chunked(&handle, &before, chunk);
        handle.flush_metadata().expect("flush");

        handle.truncate_to_zero().expect("truncate");
        prop_assert_eq!(handle.logical_size().expect("size"), 0);
        prop_assert_eq!(handle.index_summary().expect("summary").pending, 0);
        append_chunked(&handle, &data, chunk);
        handle.release().expect("release");

        let fresh = pack(&mount, &data, chunk);
        prop_assert_eq!(store.snapshot(), fresh.snapshot());
    }

    #[test]
    fn trailing_cluster_storage_form_is_detected_from_its_size(
        data in payload(),
        cluster_size in cluster_size(),
        comp in compression(),
        chunk in 1_usize..20_000,
    ) {
        let cs = cluster_size as usize;
        prop_assume!(data.len() % cs != 0);
        let mount = mount(cluster_size, comp);
        let store = pack(&mount, &data, chunk);

        let last = u32::try_from(data.len() / cs).expect("cluster");
        let tail = &data[last as usize * cs..];
        let expect_compressed = comp != CompressionType::None
            && scfs_codec::compress(comp, tail)
                .is_ok_and(|packed| mount.config().keeps_compressed(packed.len(), tail.len()));

        let file = mount.file(Arc::clone(&store));
        let handle = file.open().expect("reopen");
        let desc = handle.resolve(last).expect("resolve");
        let stored_raw = desc.size == cluster_size || desc.size as usize == tail.len();
        prop_assert_eq!(stored_raw, !expect_compressed);
        if !expect_compressed {
            prop_assert_eq!(desc.size as usize, tail.len());
        }
        let read = handle.read_cluster(last).expect("read tail");
        prop_assert_eq!(&read[..], tail);
        handle.release().expect("release");
    }
}
