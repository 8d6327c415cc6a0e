use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::prelude::*;

use std::sync::Arc;
use vellumdb::common::types::Rid;
use vellumdb::index::btree::BTreeIndex;
use vellumdb::storage::buffer::BufferPoolManager;

fn create_test_environment(buffer_pool_size: usize) -> Arc<BufferPoolManager> {
    let temp_file = tempfile::NamedTempFile::new().unwrap();
    let path = temp_file.path().to_str().unwrap().to_string();
    let buffer_pool = Arc::new(BufferPoolManager::new(buffer_pool_size, 2, path).unwrap());

    // Keep the temp file alive
    std::mem::forget(temp_file);

    buffer_pool
}

fn btree_benchmark(c: &mut Criterion) {
    let buffer_pool_size = 1000;
    let mut group = c.benchmark_group("BTreeIndex");

    for size in [100, 500, 1000].iter() {
        group.bench_with_input(BenchmarkId::new("insert", size), size, |b, &size| {
            let buffer_pool = create_test_environment(buffer_pool_size);
            let btree = BTreeIndex::<i32>::with_default_order("bench", buffer_pool).unwrap();

            let mut rng = StdRng::seed_from_u64(42);
            let keys: Vec<i32> = (0..size).map(|_| rng.r#gen()).collect();
            let mut idx = 0;

            b.iter(|| {
                let key = keys[idx % keys.len()];
                let _ = btree.insert(key, Rid::new(0, 1000)).unwrap();
                idx += 1;
            });
        });

        group.bench_with_input(BenchmarkId::new("lookup", size), size, |b, &size| {
            let buffer_pool = create_test_environment(buffer_pool_size);
            let btree = BTreeIndex::<i32>::with_default_order("bench", buffer_pool).unwrap();

            let mut keys = Vec::with_capacity(size as usize);
            for i in 0..size {
                btree.insert(i, Rid::new(0, i as u32 + 1000)).unwrap();
                keys.push(i);
            }

            let mut rng = StdRng::seed_from_u64(42);
            keys.shuffle(&mut rng);
            let mut idx = 0;

            b.iter(|| {
                let key = keys[idx % keys.len()];
                let found = btree.get_value(&key).unwrap();
                idx += 1;
                found
            });
        });

        group.bench_with_input(BenchmarkId::new("scan", size), size, |b, &size| {
            let buffer_pool = create_test_environment(buffer_pool_size);
            let btree = BTreeIndex::<i32>::with_default_order("bench", buffer_pool).unwrap();

            for i in 0..size {
                btree.insert(i, Rid::new(0, i as u32 + 1000)).unwrap();
            }

            b.iter(|| btree.begin().unwrap().count());
        });
    }

    group.finish();
}

criterion_group!(benches, btree_benchmark);
criterion_main!(benches);
