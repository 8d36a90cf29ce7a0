// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! The Path ORAM engine.
//!
//! Every public [`PathOram::get`] and [`PathOram::put`] runs the same access
//! step: remap the block to a fresh random leaf, read the full path to its
//! old leaf into the stash, serve the operation from the stash, then evict
//! the stash greedily back into that path, deepest level first. The storage
//! backend observes one path read and one re-encrypted path write per
//! operation, nothing else.
//!
//! The tree of height `L` is stored flat: buckets `1..2^(L+1)` (bucket 0 is
//! reserved padding, bucket 1 the root, buckets `2^L..2^(L+1)` the leaves),
//! with cell `b * Z + j` holding slot `j` of bucket `b`.

use crate::crypto::KEY_SIZE;
use crate::position_map::PositionMap;
use crate::stash::Stash;
use crate::storage::{Storage, StorageConfig, StorageRecord};
use crate::utils::{random_bytes, random_u64, with_rng};
use crate::{BlockId, Leaf, OramError, EMPTY_BLOCK_ID};
use rand::seq::SliceRandom;
use std::collections::HashSet;

/// The smallest supported tree height.
pub const MIN_TREE_HEIGHT: u32 = 3;

/// The largest supported tree height (cell indices must fit in a `u64`).
pub const MAX_TREE_HEIGHT: u32 = 48;

/// The request cap [`PathOram::new_in_memory`] configures for
/// [`PathOram::batch_access`].
pub const DEFAULT_MAX_BATCH_SIZE: usize = 10;

/// Engine parameters.
#[derive(Clone, Debug)]
pub struct OramConfig {
    /// The tree height `L`; the tree has `2^L` leaves.
    pub log_capacity: u32,
    /// The bucket size `Z` (slots per bucket).
    pub bucket_size: u64,
    /// The payload size `B` in bytes.
    pub block_size: usize,
    /// The logical block capacity `N`; ids outside `[0, N)` are rejected.
    pub capacity: u64,
    /// The most requests one [`PathOram::batch_access`] call may carry. A
    /// batch pulls up to this many distinct paths into the stash at once, so
    /// the stash must be sized for it.
    pub max_batch_size: usize,
}

#[derive(Debug, PartialEq, Eq)]
enum EngineState {
    Fresh,
    Operational,
}

/// The Path ORAM state machine composing a [`Storage`], a [`PositionMap`],
/// and a [`Stash`].
///
/// A failure before the path write of an access leaves the engine consistent
/// with having performed the access up to the failure point; a failure during
/// the path write is fatal and further operations are undefined.
#[derive(Debug)]
pub struct PathOram {
    // The adapters are public for tests and benchmarks; clients are expected
    // to go through the engine surface.
    /// The untrusted cell store holding the tree.
    pub storage: Storage,
    /// The `id -> leaf` table.
    pub position_map: PositionMap,
    /// The client-side overflow buffer.
    pub stash: Stash,
    height: u32,
    bucket_size: u64,
    block_size: usize,
    capacity: u64,
    max_batch_size: usize,
    state: EngineState,
}

impl PathOram {
    /// Builds an engine over caller-constructed adapters.
    ///
    /// The storage must hold `Z * 2^(L+1)` cells of the configured block
    /// size and the position map at least `N` entries. With `fresh_init` the
    /// tree is reset (every slot emptied, every position randomized); without
    /// it the engine attaches to whatever state the adapters carry, e.g.
    /// after a snapshot reload.
    pub fn new(
        config: OramConfig,
        storage: Storage,
        position_map: PositionMap,
        stash: Stash,
        fresh_init: bool,
    ) -> Result<Self, OramError> {
        log::info!(
            "PathOram::new(L = {}, Z = {}, B = {}, N = {})",
            config.log_capacity,
            config.bucket_size,
            config.block_size,
            config.capacity
        );

        if config.log_capacity < MIN_TREE_HEIGHT || config.log_capacity > MAX_TREE_HEIGHT {
            return Err(OramError::InvalidConfiguration {
                parameter_name: "tree height".to_string(),
                parameter_value: config.log_capacity.to_string(),
            });
        }
        if config.bucket_size == 0 {
            return Err(OramError::InvalidConfiguration {
                parameter_name: "bucket size Z".to_string(),
                parameter_value: config.bucket_size.to_string(),
            });
        }
        if config.capacity == 0 {
            return Err(OramError::InvalidConfiguration {
                parameter_name: "block capacity N".to_string(),
                parameter_value: config.capacity.to_string(),
            });
        }
        if config.max_batch_size == 0 {
            return Err(OramError::InvalidConfiguration {
                parameter_name: "max batch size".to_string(),
                parameter_value: config.max_batch_size.to_string(),
            });
        }
        if storage.block_size() != config.block_size {
            return Err(OramError::InvalidConfiguration {
                parameter_name: "storage block size".to_string(),
                parameter_value: storage.block_size().to_string(),
            });
        }

        let required_cells = config.bucket_size << (config.log_capacity + 1);
        if storage.capacity() < required_cells {
            return Err(OramError::InvalidConfiguration {
                parameter_name: "storage capacity".to_string(),
                parameter_value: storage.capacity().to_string(),
            });
        }
        if position_map.capacity() < config.capacity {
            return Err(OramError::InvalidConfiguration {
                parameter_name: "position map capacity".to_string(),
                parameter_value: position_map.capacity().to_string(),
            });
        }

        let mut engine = Self {
            storage,
            position_map,
            stash,
            height: config.log_capacity,
            bucket_size: config.bucket_size,
            block_size: config.block_size,
            capacity: config.capacity,
            max_batch_size: config.max_batch_size,
            state: EngineState::Fresh,
        };

        if fresh_init {
            engine.storage.fill_with_zeroes()?;
            engine.position_map.fill_random(engine.num_leaves())?;
        }

        Ok(engine)
    }

    /// Builds a self-contained engine: in-memory storage under a random key,
    /// a flat position map, and a stash of `3 * L * Z` blocks, with
    /// `N = Z * 2^L`.
    pub fn new_in_memory(
        log_capacity: u32,
        block_size: usize,
        bucket_size: u64,
    ) -> Result<Self, OramError> {
        let capacity = bucket_size << log_capacity;
        let storage = Storage::in_memory(StorageConfig {
            capacity: bucket_size << (log_capacity + 1),
            block_size,
            key: random_bytes(KEY_SIZE),
        })?;
        let position_map = PositionMap::flat(capacity)?;
        let stash = Stash::new((3 * log_capacity as u64 * bucket_size).try_into()?);

        Self::new(
            OramConfig {
                log_capacity,
                bucket_size,
                block_size,
                capacity,
                max_batch_size: DEFAULT_MAX_BATCH_SIZE,
            },
            storage,
            position_map,
            stash,
            true,
        )
    }

    /// The logical block capacity `N`.
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// The payload size `B` in bytes.
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// The tree height `L`.
    pub fn height(&self) -> u32 {
        self.height
    }

    /// The bucket size `Z`.
    pub fn bucket_size(&self) -> u64 {
        self.bucket_size
    }

    /// The most requests one [`PathOram::batch_access`] call may carry.
    pub fn max_batch_size(&self) -> usize {
        self.max_batch_size
    }

    fn num_leaves(&self) -> u64 {
        1 << self.height
    }

    /// The index of the ancestor bucket at `level` on the path to `leaf`
    /// (level 0 is the root, level `L` the leaf bucket itself).
    fn bucket_for(&self, level: u32, leaf: Leaf) -> u64 {
        (self.num_leaves() + leaf) >> (self.height - level)
    }

    /// Whether a block assigned to `block_leaf` may occupy the bucket at
    /// `level` on the path to `path_leaf`: the two paths must share their
    /// prefix through that level.
    fn can_include(&self, block_leaf: Leaf, path_leaf: Leaf, level: u32) -> bool {
        self.bucket_for(level, block_leaf) == self.bucket_for(level, path_leaf)
    }

    /// The `(L + 1) * Z` cell indices of the path to `leaf`, root first.
    fn path_cells(&self, leaf: Leaf) -> Vec<u64> {
        let mut cells = Vec::with_capacity(((self.height + 1) as u64 * self.bucket_size) as usize);
        for level in 0..=self.height {
            let bucket = self.bucket_for(level, leaf);
            for slot in 0..self.bucket_size {
                cells.push(bucket * self.bucket_size + slot);
            }
        }
        cells
    }

    fn check_id(&self, id: BlockId) -> Result<(), OramError> {
        if id >= self.capacity {
            return Err(OramError::AddressOutOfBounds {
                attempted: id,
                capacity: self.capacity,
            });
        }
        Ok(())
    }

    fn check_payload(&self, payload: &[u8]) -> Result<(), OramError> {
        if payload.len() != self.block_size {
            return Err(OramError::InvalidLength {
                parameter: "payload",
                actual: payload.len(),
                expected: self.block_size,
            });
        }
        Ok(())
    }

    /// Returns the most recently put payload for `id`, or `B` zero bytes if
    /// `id` was never written.
    pub fn get(&mut self, id: BlockId) -> Result<Vec<u8>, OramError> {
        self.access(id, None)
    }

    /// Stores `payload` (exactly `B` bytes) under `id`.
    pub fn put(&mut self, id: BlockId, payload: &[u8]) -> Result<(), OramError> {
        self.access(id, Some(payload))?;
        Ok(())
    }

    /// The single access step behind `get` and `put`.
    fn access(&mut self, id: BlockId, write: Option<&[u8]>) -> Result<Vec<u8>, OramError> {
        self.check_id(id)?;
        if let Some(payload) = write {
            self.check_payload(payload)?;
        }
        self.state = EngineState::Operational;

        log::debug!("access(id = {id}, write = {})", write.is_some());

        // Remap before any storage I/O: the leaf the backend is about to see
        // read is already stale.
        let previous = self.position_map.get(id)?;
        self.position_map.set(id, random_u64(self.num_leaves()))?;

        self.read_path(previous)?;

        if let Some(payload) = write {
            self.stash.update(id, payload.to_vec())?;
        }
        let result = match self.stash.get(id) {
            Some(payload) => payload.to_vec(),
            None => vec![0u8; self.block_size],
        };

        self.write_path(previous)?;

        Ok(result)
    }

    /// Processes several requests with one deduplicated path read and one
    /// path write over the union of the requested paths. `Some` payload means
    /// put (the result echoes the written payload), `None` means get; results
    /// are in request order.
    ///
    /// At most [`OramConfig::max_batch_size`] requests per call: every
    /// distinct path in a batch lands in the stash together, so an unbounded
    /// batch could overflow a stash sized for single-path accesses.
    pub fn batch_access(
        &mut self,
        requests: &[(BlockId, Option<Vec<u8>>)],
    ) -> Result<Vec<Vec<u8>>, OramError> {
        if requests.len() > self.max_batch_size {
            return Err(OramError::BatchTooLarge {
                requested: requests.len(),
                max_batch_size: self.max_batch_size,
            });
        }
        for (id, write) in requests {
            self.check_id(*id)?;
            if let Some(payload) = write {
                self.check_payload(payload)?;
            }
        }
        self.state = EngineState::Operational;
        if requests.is_empty() {
            return Ok(Vec::new());
        }

        log::debug!("batch_access({} requests)", requests.len());

        let mut paths = Vec::with_capacity(requests.len());
        for (id, _) in requests {
            let previous = self.position_map.get(*id)?;
            self.position_map.set(*id, random_u64(self.num_leaves()))?;
            paths.push(previous);
        }
        paths.sort_unstable();
        paths.dedup();

        let mut cells: Vec<u64> = paths
            .iter()
            .flat_map(|&leaf| self.path_cells(leaf))
            .collect();
        cells.sort_unstable();
        cells.dedup();

        for (id, payload) in self.storage.get_batch(&cells)? {
            if id != EMPTY_BLOCK_ID {
                self.stash.add(id, payload)?;
            }
        }

        let mut results = Vec::with_capacity(requests.len());
        for (id, write) in requests {
            if let Some(payload) = write {
                self.stash.update(*id, payload.clone())?;
            }
            results.push(match self.stash.get(*id) {
                Some(payload) => payload.to_vec(),
                None => vec![0u8; self.block_size],
            });
        }

        // Union of the read paths, deepest buckets first (bucket indices
        // grow with depth).
        let mut buckets = Vec::with_capacity(paths.len() * (self.height as usize + 1));
        for &leaf in &paths {
            for level in 0..=self.height {
                buckets.push(self.bucket_for(level, leaf));
            }
        }
        buckets.sort_unstable_by(|a, b| b.cmp(a));
        buckets.dedup();

        self.evict_into(&buckets)?;

        Ok(results)
    }

    /// Reads every slot on the path to `leaf`, moving occupied blocks into
    /// the stash.
    fn read_path(&mut self, leaf: Leaf) -> Result<(), OramError> {
        let cells = self.path_cells(leaf);
        for (id, payload) in self.storage.get_batch(&cells)? {
            if id != EMPTY_BLOCK_ID {
                self.stash.add(id, payload)?;
            }
        }
        Ok(())
    }

    /// Evicts the stash back into the path to `leaf` and rewrites all of its
    /// buckets in one batch.
    fn write_path(&mut self, leaf: Leaf) -> Result<(), OramError> {
        let buckets: Vec<u64> = (0..=self.height)
            .rev()
            .map(|level| self.bucket_for(level, leaf))
            .collect();
        self.evict_into(&buckets)
    }

    /// Greedily packs eligible stash blocks into `buckets` (which must be
    /// ordered deepest first), padding leftover slots with empty records, and
    /// writes every slot of every bucket in a single storage batch.
    fn evict_into(&mut self, buckets: &[u64]) -> Result<(), OramError> {
        // One position map lookup per stash entry; the map does not change
        // during eviction.
        let mut remaining: Vec<(BlockId, Leaf, Vec<u8>)> = Vec::new();
        for (id, payload) in self.stash.get_all() {
            let block_leaf = self.position_map.get(id)?;
            remaining.push((id, block_leaf, payload));
        }

        let mut evicted = Vec::new();
        let mut writes: Vec<(u64, StorageRecord)> =
            Vec::with_capacity(buckets.len() * self.bucket_size as usize);

        for &bucket in buckets {
            let level = bucket.ilog2();
            let mut filled = 0;
            let mut i = 0;
            while i < remaining.len() && filled < self.bucket_size {
                if self.bucket_for(level, remaining[i].1) == bucket {
                    let (id, _, payload) = remaining.swap_remove(i);
                    writes.push((bucket * self.bucket_size + filled, (id, payload)));
                    evicted.push(id);
                    filled += 1;
                } else {
                    i += 1;
                }
            }
            while filled < self.bucket_size {
                writes.push((
                    bucket * self.bucket_size + filled,
                    (EMPTY_BLOCK_ID, Vec::new()),
                ));
                filled += 1;
            }
        }

        self.storage.set_batch(&writes)?;
        for id in evicted {
            self.stash.remove(id);
        }
        Ok(())
    }

    /// Bulk-initializes a freshly constructed engine.
    ///
    /// Functionally equivalent to a `put` of every record, but amortized:
    /// each record is assigned a uniform random leaf and dropped into the
    /// deepest empty slot on that path, retrying with fresh leaves as needed.
    /// The stash is untouched and the input order is shuffled away before
    /// any storage write.
    pub fn load(&mut self, mut records: Vec<(BlockId, Vec<u8>)>) -> Result<(), OramError> {
        if self.state != EngineState::Fresh {
            return Err(OramError::InvalidState { operation: "load" });
        }
        for (id, payload) in &records {
            self.check_id(*id)?;
            self.check_payload(payload)?;
        }
        self.state = EngineState::Operational;

        log::info!("PathOram::load({} records)", records.len());

        with_rng(|rng| records.shuffle(rng));

        for (id, payload) in records {
            let mut placed = false;
            'attempts: for _ in 0..=self.num_leaves() {
                let leaf = random_u64(self.num_leaves());
                let cells = self.path_cells(leaf);
                let path = self.storage.get_batch(&cells)?;
                for (cell, (slot_id, _)) in cells.iter().zip(&path).rev() {
                    if *slot_id == EMPTY_BLOCK_ID {
                        self.storage.set(*cell, id, &payload)?;
                        self.position_map.set(id, leaf)?;
                        placed = true;
                        break 'attempts;
                    }
                }
            }
            if !placed {
                return Err(OramError::Backend {
                    message: "no space left in ORAM for bulk load".to_string(),
                });
            }
        }

        Ok(())
    }

    /// Debug hook verifying path-only and unique residency: every occupied
    /// slot holds a block whose mapped leaf routes through that bucket, and
    /// no id appears twice across stash and tree.
    pub fn check_consistency(&mut self) -> Result<(), OramError> {
        let mut seen = HashSet::new();

        let num_buckets = 1u64 << (self.height + 1);
        for bucket in 1..num_buckets {
            let level = bucket.ilog2();
            for slot in 0..self.bucket_size {
                let (id, _) = self.storage.get(bucket * self.bucket_size + slot)?;
                if id == EMPTY_BLOCK_ID {
                    continue;
                }

                let leaf = self.position_map.get(id)?;
                if self.bucket_for(level, leaf) != bucket {
                    return Err(OramError::ConsistencyViolation {
                        message: format!(
                            "block {id} sits in bucket {bucket}, off the path to its leaf {leaf}"
                        ),
                    });
                }
                if !seen.insert(id) {
                    return Err(OramError::ConsistencyViolation {
                        message: format!("block {id} occupies more than one slot"),
                    });
                }
                if self.stash.contains(id) {
                    return Err(OramError::ConsistencyViolation {
                        message: format!("block {id} is in both the tree and the stash"),
                    });
                }
            }
        }

        Ok(())
    }
}
