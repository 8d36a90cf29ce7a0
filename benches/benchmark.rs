// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! Benchmarks for the `path-oram` crate.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use path_oram::{utils, BlockId, PathOram, Storage};

const HEIGHTS_TO_BENCHMARK: [u32; 3] = [5, 8, 10];
const BLOCK_SIZE: usize = 64;
const BUCKET_SIZE: u64 = 4;

fn populated_oram(height: u32) -> PathOram {
    utils::seed_rng(0x13);
    let mut oram = PathOram::new_in_memory(height, BLOCK_SIZE, BUCKET_SIZE).unwrap();
    let records: Vec<(BlockId, Vec<u8>)> = (0..oram.capacity())
        .map(|id| (id, utils::random_bytes(BLOCK_SIZE)))
        .collect();
    oram.load(records).unwrap();
    oram
}

fn benchmark_get(c: &mut Criterion) {
    let mut group = c.benchmark_group("PathOram::get");
    for height in HEIGHTS_TO_BENCHMARK {
        let mut oram = populated_oram(height);
        let capacity = oram.capacity();
        group.bench_with_input(BenchmarkId::from_parameter(height), &height, |b, _| {
            b.iter(|| black_box(oram.get(utils::random_u64(capacity)).unwrap()))
        });
    }
    group.finish();
}

fn benchmark_put(c: &mut Criterion) {
    let mut group = c.benchmark_group("PathOram::put");
    for height in HEIGHTS_TO_BENCHMARK {
        let mut oram = populated_oram(height);
        let capacity = oram.capacity();
        let payload = utils::random_bytes(BLOCK_SIZE);
        group.bench_with_input(BenchmarkId::from_parameter(height), &height, |b, _| {
            b.iter(|| oram.put(utils::random_u64(capacity), &payload).unwrap())
        });
    }
    group.finish();
}

fn benchmark_load(c: &mut Criterion) {
    let mut group = c.benchmark_group("PathOram::load");
    group.sample_size(10);
    for height in [5, 8] {
        group.bench_with_input(BenchmarkId::from_parameter(height), &height, |b, _| {
            b.iter(|| black_box(populated_oram(height)))
        });
    }
    group.finish();
}

/// Reports the physical read amplification of a mixed workload, alongside
/// the timing groups above.
fn benchmark_physical_accesses(c: &mut Criterion) {
    let mut group = c.benchmark_group("physical-accesses");
    group.sample_size(10);
    for height in [5u32] {
        group.bench_with_input(BenchmarkId::from_parameter(height), &height, |b, _| {
            b.iter(|| {
                let mut oram = populated_oram(height);
                let capacity = oram.capacity();
                for _ in 0..64 {
                    oram.get(utils::random_u64(capacity)).unwrap();
                }
                let Storage::Memory(memory) = &oram.storage else {
                    unreachable!()
                };
                black_box(memory.read_count())
            })
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    benchmark_get,
    benchmark_put,
    benchmark_load,
    benchmark_physical_accesses
);
criterion_main!(benches);
