#![forbid(unsafe_code)]

use criterion::{Criterion, black_box, criterion_group, criterion_main};
use scfs_codec::{compress, decompress, is_available};
use scfs_types::CompressionType;

const CLUSTER: usize = 16384;

fn text_cluster() -> Vec<u8> {
    b"the quick brown fox jumps over the lazy scfs cluster "
        .iter()
        .copied()
        .cycle()
        .take(CLUSTER)
        .collect()
}

fn bench_compress(c: &mut Criterion) {
    let src = text_cluster();
    let mut group = c.benchmark_group("compress_16k");
    for algo in CompressionType::ALL {
        if !is_available(algo) {
            continue;
        }
        group.bench_function(algo.name(), |b| {
            b.iter(|| compress(algo, black_box(&src)).expect("compress"));
        });
    }
    group.finish();
}

fn bench_decompress(c: &mut Criterion) {
    let src = text_cluster();
    let mut group = c.benchmark_group("decompress_16k");
    for algo in [CompressionType::Lz4, CompressionType::Zlib] {
        if !is_available(algo) {
            continue;
        }
        let packed = compress(algo, &src).expect("compress");
        group.bench_function(algo.name(), |b| {
            b.iter(|| decompress(algo, black_box(&packed), CLUSTER as u32).expect("decompress"));
        });
    }
    group.finish();
}

criterion_group!(benches, bench_compress, bench_decompress);
criterion_main!(benches);
