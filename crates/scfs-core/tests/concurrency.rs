use scfs_block::MemoryBackingStore;
use scfs_core::{MountConfig, ScfsMount};
use scfs_types::CompressionType;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

const CLUSTER: usize = 4096;

fn cluster_payload(cluster: usize) -> Vec<u8> {
    format!("cluster {cluster:04} payload; ")
        .into_bytes()
        .into_iter()
        .cycle()
        .take(CLUSTER)
        .collect()
}

fn mount(slots: usize) -> Arc<ScfsMount> {
    let config = MountConfig::default()
        .cluster_size(4096)
        .expect("cluster size")
        .comp_type(CompressionType::Lz4)
        .buffer_pool_slots(slots);
    ScfsMount::new(config).expect("mount")
}

#[test]
fn persisted_reads_are_stable_while_new_clusters_are_flushed() {
    const PERSISTED: usize = 16;
    const APPENDED: usize = 24;

    let mount = mount(4);
    let store = Arc::new(MemoryBackingStore::new());
    let file = mount.file(Arc::clone(&store));
    let handle = file.open().expect("open");
    for cluster in 0..PERSISTED {
        let offset = (cluster * CLUSTER) as u64;
        handle
            .write_at(offset, &cluster_payload(cluster))
            .expect("seed");
    }
    handle.flush_metadata().expect("seed flush");

    let writer_done = AtomicBool::new(false);
    thread::scope(|scope| {
        for reader in 0..4 {
            let handle = handle.try_clone().expect("clone handle");
            let writer_done = &writer_done;
            scope.spawn(move || {
                let mut rounds = 0;
                while !writer_done.load(Ordering::Acquire) || rounds < 3 {
                    for cluster in (0..PERSISTED).rev().skip(reader % 2) {
                        let data = handle
                            .read_cluster(u32::try_from(cluster).expect("cluster"))
                            .expect("persisted read");
                        assert_eq!(data, cluster_payload(cluster));
                    }
                    rounds += 1;
                }
                handle.release().expect("reader release");
            });
        }

        let writer = handle.try_clone().expect("writer handle");
        let writer_done = &writer_done;
        scope.spawn(move || {
            for cluster in PERSISTED..PERSISTED + APPENDED {
                let offset = (cluster * CLUSTER) as u64;
                writer
                    .write_at(offset, &cluster_payload(cluster))
                    .expect("append");
                if cluster % 3 == 0 {
                    writer.flush_metadata().expect("flush");
                }
            }
            writer.flush_metadata().expect("final flush");
            writer_done.store(true, Ordering::Release);
            writer.release().expect("writer release");
        });
    });

    assert_eq!(file.refcount(), 1);
    let total = PERSISTED + APPENDED;
    assert_eq!(
        handle.logical_size().expect("size"),
        (total * CLUSTER) as u64
    );
    for cluster in 0..total {
        let data = handle
            .read_cluster(u32::try_from(cluster).expect("cluster"))
            .expect("read back");
        assert_eq!(data, cluster_payload(cluster));
    }
    handle.release().expect("release");
    assert_eq!(file.refcount(), 0);
}

#[test]
fn concurrent_open_and_release_share_one_backing_handle() {
    let mount = mount(2);
    let store = Arc::new(MemoryBackingStore::new());
    let file = mount.file(Arc::clone(&store));
    {
        let handle = file.open().expect("open");
        handle.write_at(0, &cluster_payload(0)).expect("write");
        handle.write_at(CLUSTER as u64, b"tail").expect("tail");
        handle.release().expect("release");
    }
    let flushed = store.snapshot();

    thread::scope(|scope| {
        for _ in 0..8 {
            scope.spawn(|| {
                for _ in 0..50 {
                    let handle = file.open().expect("open");
                    assert_eq!(&handle.read_at(CLUSTER as u64, 16).expect("read")[..], b"tail");
                    handle.release().expect("release");
                }
            });
        }
    });

    assert_eq!(file.refcount(), 0);
    assert_eq!(mount.space().snapshot().open_files, 0);
    assert_eq!(store.snapshot(), flushed);
}

#[test]
fn exhausted_pool_blocks_writers_until_a_cluster_is_released() {
    let mount = mount(1);
    let first_store = Arc::new(MemoryBackingStore::new());
    let second_store = Arc::new(MemoryBackingStore::new());
    let first = mount.file(Arc::clone(&first_store));
    let second = mount.file(Arc::clone(&second_store));

    let first_handle = first.open().expect("open first");
    first_handle.write_at(0, b"partial").expect("holds the only slot");
    assert_eq!(mount.pool().stats().available, 0);

    thread::scope(|scope| {
        let waiter = scope.spawn(|| {
            let handle = second.open().expect("open second");
            handle.write_at(0, b"waits for a slot").expect("write");
            handle.release().expect("release second");
        });

        while mount.pool().stats().waits == 0 {
            thread::sleep(Duration::from_millis(1));
        }
        assert!(!waiter.is_finished());
        // Flushing the first file writes its cluster out and frees the slot.
        first_handle.flush_metadata().expect("flush first");
        waiter.join().expect("waiter");
    });

    first_handle.release().expect("release first");
    let stats = mount.pool().stats();
    assert_eq!(stats.in_use, 0);
    assert_eq!(stats.waits, 1);

    let reopened = mount.file(Arc::clone(&second_store));
    let handle = reopened.open().expect("reopen");
    assert_eq!(handle.read_at(0, 64).expect("read"), b"waits for a slot");
    handle.release().expect("release");
}
