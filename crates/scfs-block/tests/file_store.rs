#![forbid(unsafe_code)]

use scfs_block::{
    BackingStore, DEFAULT_RETRY_LIMIT, FileBackingStore, FileStoreOpener, StoreOpener,
    read_exact_at, write_all_at,
};
use scfs_error::ScfsError;

#[test]
fn file_store_positional_io_round_trips() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("object.scfs");
    let store = FileBackingStore::open(&path, true).expect("open");
    assert_eq!(store.path(), path.as_path());
    assert!(store.is_empty().expect("len"));

    write_all_at(&store, 8192, &[0xAB; 100], DEFAULT_RETRY_LIMIT).expect("write");
    assert_eq!(store.len().expect("len"), 8292);

    let mut buf = vec![0_u8; 100];
    read_exact_at(&store, 8192, &mut buf, DEFAULT_RETRY_LIMIT).expect("read");
    assert!(buf.iter().all(|b| *b == 0xAB));

    store.truncate(4096).expect("truncate");
    assert_eq!(store.len().expect("len"), 4096);
    store.sync().expect("sync");
    assert!(store.free_space().expect("free space") > 0);
}

#[test]
fn file_opener_reopens_by_path() {
    let dir = tempfile::tempdir().expect("tempdir");
    let opener = FileStoreOpener::new(dir.path().join("reopen.scfs"));

    let first = opener.open().expect("open");
    write_all_at(first.as_ref(), 0, b"footer?", DEFAULT_RETRY_LIMIT).expect("write");
    drop(first);

    let second = opener.open().expect("reopen");
    let mut buf = [0_u8; 7];
    read_exact_at(second.as_ref(), 0, &mut buf, DEFAULT_RETRY_LIMIT).expect("read");
    assert_eq!(&buf, b"footer?");
}

#[test]
fn existing_only_opener_does_not_create() {
    let dir = tempfile::tempdir().expect("tempdir");
    let opener = FileStoreOpener::new(dir.path().join("missing.scfs")).existing_only();
    let err = opener.open().expect_err("missing file must not be created");
    assert!(matches!(err, ScfsError::Io(ref e) if e.kind() == std::io::ErrorKind::NotFound));
    assert!(!opener.path().exists());
}
