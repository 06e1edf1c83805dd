#![forbid(unsafe_code)]

use scfs::{CompressionType, FileStoreOpener, MountConfig, ScfsError, ScfsMount};
use std::fs;

fn payload(len: usize) -> Vec<u8> {
    (0..len)
        .map(|i| if (i / 512) % 3 == 0 { (i % 251) as u8 } else { b'a' + (i % 7) as u8 })
        .collect()
}

#[test]
fn file_backed_round_trip_and_tight_tail() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("data.scfs");
    let mount = ScfsMount::new(
        MountConfig::default()
            .cluster_size(8192)
            .expect("cluster size")
            .comp_type(CompressionType::Zlib),
    )
    .expect("mount");
    let data = payload(100_000);

    let file = mount.file(FileStoreOpener::new(&path));
    let handle = file.open().expect("create");
    handle.write_at(0, &data).expect("write");
    handle.release().expect("release");

    let stats = file.stats();
    let on_disk = fs::metadata(&path).expect("metadata").len();
    let clusters = 100_000_u64.div_ceil(8192);
    assert_eq!(on_disk, stats.bytes_stored + clusters * 16 + 24);
    assert!(stats.bytes_stored < 100_000);

    let reader = mount.file(FileStoreOpener::new(&path).existing_only());
    let handle = reader.open().expect("reopen");
    assert_eq!(handle.logical_size().expect("size"), 100_000);
    assert_eq!(handle.read_at(0, 200_000).expect("read"), data);
    assert_eq!(handle.read_at(99_990, 100).expect("tail"), &data[99_990..]);
    assert!(handle.read_at(100_000, 10).expect("eof").is_empty());
    handle.release().expect("release");
}

#[test]
fn truncate_on_file_shrinks_the_backing_object() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("truncate.scfs");
    let mount = ScfsMount::new(MountConfig::default()).expect("mount");

    let file = mount.file(FileStoreOpener::new(&path));
    let handle = file.open().expect("open");
    handle.write_at(0, &payload(40_000)).expect("write");
    handle.flush_metadata().expect("flush");
    assert!(fs::metadata(&path).expect("metadata").len() > 0);

    handle.truncate_to_zero().expect("truncate");
    assert_eq!(fs::metadata(&path).expect("metadata").len(), 0);
    handle.release().expect("release");
    assert_eq!(fs::metadata(&path).expect("metadata").len(), 0);
}

#[test]
fn missing_object_is_reported_on_open() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mount = ScfsMount::new(MountConfig::default()).expect("mount");
    let file = mount.file(FileStoreOpener::new(dir.path().join("absent.scfs")).existing_only());

    let err = file.open().expect_err("absent");
    assert!(matches!(err, ScfsError::Io(_)));
    assert_eq!(err.to_errno(), libc::ENOENT);
    assert_eq!(file.refcount(), 0);
    assert_eq!(mount.space().snapshot().open_files, 0);
}
