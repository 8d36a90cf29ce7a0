// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! Common test utilities: mirror-checked workloads over an engine.

use crate::utils::{random_bytes, random_u64, with_rng};
use crate::{BlockId, PathOram};
use rand::Rng;
use std::collections::HashMap;

/// Runs `num_operations` random reads and writes against `oram`, keeping
/// `mirror` as the ground truth and checking every read against it.
pub(crate) fn mixed_workload(
    oram: &mut PathOram,
    mirror: &mut HashMap<BlockId, Vec<u8>>,
    num_operations: usize,
) {
    let capacity = oram.capacity();
    let block_size = oram.block_size();

    for _ in 0..num_operations {
        let id = random_u64(capacity);
        let read_versus_write = with_rng(|rng| rng.gen::<bool>());

        if read_versus_write {
            let expected = mirror
                .get(&id)
                .cloned()
                .unwrap_or_else(|| vec![0u8; block_size]);
            assert_eq!(oram.get(id).unwrap(), expected, "{id}");
        } else {
            let payload = random_bytes(block_size);
            oram.put(id, &payload).unwrap();
            mirror.insert(id, payload);
        }
    }
}

/// Reads every id in `[0, N)` and checks it against `mirror` (absent ids
/// must read as zeroes).
pub(crate) fn read_back_all(oram: &mut PathOram, mirror: &HashMap<BlockId, Vec<u8>>) {
    let block_size = oram.block_size();
    for id in 0..oram.capacity() {
        let expected = mirror
            .get(&id)
            .cloned()
            .unwrap_or_else(|| vec![0u8; block_size]);
        assert_eq!(oram.get(id).unwrap(), expected, "{id}");
    }
}

macro_rules! create_workload_tests {
    ($(($log_capacity:expr, $block_size:expr, $bucket_size:expr, $operations:expr)),* $(,)?) => {
        $(
            paste::paste! {
                #[test]
                fn [<mixed_workload_l $log_capacity _b $block_size _z $bucket_size _ $operations>]() {
                    crate::utils::seed_rng(0x13);
                    let mut oram =
                        PathOram::new_in_memory($log_capacity, $block_size, $bucket_size).unwrap();
                    let mut mirror = std::collections::HashMap::new();
                    mixed_workload(&mut oram, &mut mirror, $operations);
                    read_back_all(&mut oram, &mirror);
                    oram.check_consistency().unwrap();
                }
            }
        )*
    };
}

pub(crate) use create_workload_tests;
