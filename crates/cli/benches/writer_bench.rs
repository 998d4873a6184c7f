//! FileWriter append throughput.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use hydfile::{Entry, FileWriter, DEFAULT_MAX_BLOCK_SIZE};
use tempfile::tempdir;

fn bench_write_entry(c: &mut Criterion) {
    let mut group = c.benchmark_group("file_writer");

    for &value_size in &[64usize, 1024, 16 * 1024] {
        group.throughput(Throughput::Bytes(value_size as u64));
        group.bench_with_input(
            BenchmarkId::new("write_entry", value_size),
            &value_size,
            |b, &size| {
                let dir = tempdir().unwrap();
                let mut writer =
                    FileWriter::open(dir.path().join("bench.hyd"), DEFAULT_MAX_BLOCK_SIZE)
                        .unwrap();
                let data = vec![0xA5u8; size];
                let mut seq = 0u64;
                b.iter(|| {
                    seq += 1;
                    let entry = Entry::insert(format!("key{:012}", seq), data.clone());
                    writer.write_entry(&entry).unwrap();
                });
                writer.close().unwrap();
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_write_entry);
criterion_main!(benches);
