// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! Position maps: the table assigning each block id its tree leaf.
//!
//! Two variants. The flat map is a dense client-side array. The ORAM-backed
//! map stores positions inside a smaller inner ORAM whose block payloads are
//! arrays of leaf indices; recursion bottoms out at a flat map. Ownership is
//! a strict tree: the map owns the inner engine, which owns its own adapters.

use crate::path_oram::PathOram;
use crate::utils::random_u64;
use crate::{BlockId, Leaf, OramError, ID_SIZE};
use std::fs;
use std::path::Path;

/// A dense in-memory position map.
#[derive(Debug)]
pub struct FlatPositionMap {
    map: Vec<Leaf>,
}

impl FlatPositionMap {
    /// Creates a map of `capacity` entries, all zero.
    pub fn new(capacity: u64) -> Result<Self, OramError> {
        Ok(Self {
            map: vec![0; capacity.try_into()?],
        })
    }

    fn check_capacity(&self, id: BlockId) -> Result<usize, OramError> {
        let index: usize = id.try_into()?;
        if index >= self.map.len() {
            return Err(OramError::AddressOutOfBounds {
                attempted: id,
                capacity: self.map.len() as u64,
            });
        }
        Ok(index)
    }

    /// The leaf assigned to `id`.
    pub fn get(&self, id: BlockId) -> Result<Leaf, OramError> {
        Ok(self.map[self.check_capacity(id)?])
    }

    /// Assigns `leaf` to `id`.
    pub fn set(&mut self, id: BlockId, leaf: Leaf) -> Result<(), OramError> {
        let index = self.check_capacity(id)?;
        self.map[index] = leaf;
        Ok(())
    }

    /// The number of entries.
    pub fn capacity(&self) -> u64 {
        self.map.len() as u64
    }

    /// Writes the map as concatenated little-endian u64 leaf indices, no
    /// header.
    pub fn store_to_file(&self, path: impl AsRef<Path>) -> Result<(), OramError> {
        let mut buffer = Vec::with_capacity(self.map.len() * ID_SIZE);
        for leaf in &self.map {
            buffer.extend_from_slice(&leaf.to_le_bytes());
        }
        fs::write(path, buffer)?;
        Ok(())
    }

    /// Reads back a snapshot written by [`FlatPositionMap::store_to_file`];
    /// the entry count is inferred from the file size.
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, OramError> {
        let buffer = fs::read(path.as_ref())?;
        if buffer.len() % ID_SIZE != 0 {
            return Err(OramError::Backend {
                message: format!(
                    "cannot load position map from {}: {} bytes is not a multiple of {ID_SIZE}",
                    path.as_ref().display(),
                    buffer.len()
                ),
            });
        }

        let map = buffer
            .chunks_exact(ID_SIZE)
            .map(|chunk| {
                let mut word = [0u8; ID_SIZE];
                word.copy_from_slice(chunk);
                Leaf::from_le_bytes(word)
            })
            .collect();
        Ok(Self { map })
    }
}

/// A position map stored inside an inner ORAM.
///
/// Each inner block packs `B_inner / 8` leaf indices; an outer id translates
/// to `(id / per_block, id % per_block)`. Inner engine failures surface as
/// this map's [`OramError::Backend`] to preserve the layering.
#[derive(Debug)]
pub struct OramPositionMap {
    oram: Box<PathOram>,
    capacity: u64,
    positions_per_block: u64,
}

impl OramPositionMap {
    /// Wraps `oram` as a map of `capacity` entries.
    ///
    /// The inner ORAM must be able to hold `capacity` positions, i.e.
    /// `oram.capacity() * (oram.block_size() / 8) >= capacity`.
    pub fn new(oram: PathOram, capacity: u64) -> Result<Self, OramError> {
        let positions_per_block = (oram.block_size() / ID_SIZE) as u64;
        if capacity == 0 || oram.capacity() * positions_per_block < capacity {
            return Err(OramError::InvalidConfiguration {
                parameter_name: "position map capacity".to_string(),
                parameter_value: capacity.to_string(),
            });
        }

        Ok(Self {
            oram: Box::new(oram),
            capacity,
            positions_per_block,
        })
    }

    fn locate(&self, id: BlockId) -> Result<(BlockId, usize), OramError> {
        if id >= self.capacity {
            return Err(OramError::AddressOutOfBounds {
                attempted: id,
                capacity: self.capacity,
            });
        }
        let offset: usize = (id % self.positions_per_block).try_into()?;
        Ok((id / self.positions_per_block, offset))
    }

    fn layered(error: OramError) -> OramError {
        OramError::Backend {
            message: format!("position map ORAM: {error}"),
        }
    }

    /// The leaf assigned to `id`, via one inner oblivious access.
    pub fn get(&mut self, id: BlockId) -> Result<Leaf, OramError> {
        let (block, offset) = self.locate(id)?;
        let payload = self.oram.get(block).map_err(Self::layered)?;
        let mut word = [0u8; ID_SIZE];
        word.copy_from_slice(&payload[offset * ID_SIZE..(offset + 1) * ID_SIZE]);
        Ok(Leaf::from_le_bytes(word))
    }

    /// Assigns `leaf` to `id` with an inner read-modify-write.
    pub fn set(&mut self, id: BlockId, leaf: Leaf) -> Result<(), OramError> {
        let (block, offset) = self.locate(id)?;
        let mut payload = self.oram.get(block).map_err(Self::layered)?;
        payload[offset * ID_SIZE..(offset + 1) * ID_SIZE].copy_from_slice(&leaf.to_le_bytes());
        self.oram.put(block, &payload).map_err(Self::layered)
    }

    /// The number of entries.
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// The inner engine, for invariant checks in tests.
    pub fn inner(&mut self) -> &mut PathOram {
        &mut self.oram
    }
}

/// The table `id -> leaf` consulted and updated by every access step.
#[derive(Debug)]
pub enum PositionMap {
    /// A dense client-side array.
    Flat(FlatPositionMap),
    /// A map stored inside an inner ORAM.
    Oram(OramPositionMap),
}

impl PositionMap {
    /// Creates a flat map of `capacity` zeroed entries.
    pub fn flat(capacity: u64) -> Result<Self, OramError> {
        Ok(PositionMap::Flat(FlatPositionMap::new(capacity)?))
    }

    /// Wraps an inner engine as a map of `capacity` entries.
    pub fn oram(oram: PathOram, capacity: u64) -> Result<Self, OramError> {
        Ok(PositionMap::Oram(OramPositionMap::new(oram, capacity)?))
    }

    /// The leaf assigned to `id`.
    pub fn get(&mut self, id: BlockId) -> Result<Leaf, OramError> {
        match self {
            PositionMap::Flat(flat) => flat.get(id),
            PositionMap::Oram(oram) => oram.get(id),
        }
    }

    /// Assigns `leaf` to `id`.
    pub fn set(&mut self, id: BlockId, leaf: Leaf) -> Result<(), OramError> {
        match self {
            PositionMap::Flat(flat) => flat.set(id, leaf),
            PositionMap::Oram(oram) => oram.set(id, leaf),
        }
    }

    /// The number of entries.
    pub fn capacity(&self) -> u64 {
        match self {
            PositionMap::Flat(flat) => flat.capacity(),
            PositionMap::Oram(oram) => oram.capacity(),
        }
    }

    /// Assigns every entry a uniform random leaf in `[0, num_leaves)`.
    ///
    /// The ORAM-backed variant randomizes one inner block per inner write
    /// rather than one entry at a time.
    pub fn fill_random(&mut self, num_leaves: u64) -> Result<(), OramError> {
        match self {
            PositionMap::Flat(flat) => {
                for leaf in &mut flat.map {
                    *leaf = random_u64(num_leaves);
                }
                Ok(())
            }
            PositionMap::Oram(map) => {
                let block_size = map.oram.block_size();
                let num_blocks = map.capacity.div_ceil(map.positions_per_block);
                for block in 0..num_blocks {
                    let mut payload = vec![0u8; block_size];
                    for chunk in payload.chunks_exact_mut(ID_SIZE) {
                        chunk.copy_from_slice(&random_u64(num_leaves).to_le_bytes());
                    }
                    map.oram.put(block, &payload).map_err(OramPositionMap::layered)?;
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::seed_rng;

    #[test]
    fn flat_get_set() {
        let mut map = FlatPositionMap::new(16).unwrap();
        assert_eq!(map.get(3).unwrap(), 0);
        map.set(3, 11).unwrap();
        assert_eq!(map.get(3).unwrap(), 11);
    }

    #[test]
    fn flat_rejects_out_of_bounds() {
        let mut map = FlatPositionMap::new(16).unwrap();
        assert!(matches!(
            map.get(16),
            Err(OramError::AddressOutOfBounds { .. })
        ));
        assert!(matches!(
            map.set(16, 0),
            Err(OramError::AddressOutOfBounds { .. })
        ));
    }

    #[test]
    fn flat_snapshot_round_trip() {
        seed_rng(0x13);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("map.bin");

        let mut map = PositionMap::flat(64).unwrap();
        map.fill_random(1 << 5).unwrap();
        let PositionMap::Flat(flat) = &map else {
            unreachable!()
        };
        flat.store_to_file(&path).unwrap();

        let reloaded = FlatPositionMap::load_from_file(&path).unwrap();
        assert_eq!(reloaded.capacity(), 64);
        for id in 0..64 {
            assert_eq!(reloaded.get(id).unwrap(), flat.get(id).unwrap());
        }
    }

    #[test]
    fn flat_snapshot_rejects_misaligned_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.bin");
        fs::write(&path, [0u8; ID_SIZE + 1]).unwrap();
        assert!(matches!(
            FlatPositionMap::load_from_file(&path),
            Err(OramError::Backend { .. })
        ));
    }

    #[test]
    fn fill_random_stays_in_leaf_range() {
        seed_rng(0x13);
        let num_leaves = 1 << 4;
        let mut map = PositionMap::flat(256).unwrap();
        map.fill_random(num_leaves).unwrap();
        for id in 0..256 {
            assert!(map.get(id).unwrap() < num_leaves);
        }
    }

    #[test]
    fn oram_backed_get_set() {
        seed_rng(0x13);
        // 64-byte inner blocks pack 8 positions each.
        let inner = PathOram::new_in_memory(3, 64, 4).unwrap();
        let capacity = 100;
        let mut map = PositionMap::oram(inner, capacity).unwrap();

        for id in [0u64, 1, 7, 8, 63, capacity - 1] {
            assert_eq!(map.get(id).unwrap(), 0);
            map.set(id, id + 1).unwrap();
            assert_eq!(map.get(id).unwrap(), id + 1);
        }

        // Neighbors within the same inner block stay untouched.
        map.set(16, 0xbeef).unwrap();
        map.set(17, 0xcafe).unwrap();
        assert_eq!(map.get(16).unwrap(), 0xbeef);
        assert_eq!(map.get(17).unwrap(), 0xcafe);
    }

    #[test]
    fn oram_backed_rejects_out_of_bounds() {
        seed_rng(0x13);
        let inner = PathOram::new_in_memory(3, 64, 4).unwrap();
        let mut map = PositionMap::oram(inner, 100).unwrap();
        assert!(matches!(
            map.get(100),
            Err(OramError::AddressOutOfBounds { .. })
        ));
    }

    #[test]
    fn oram_backed_rejects_undersized_inner_engine() {
        seed_rng(0x13);
        // 32 blocks of 8 positions each hold at most 256 entries.
        let inner = PathOram::new_in_memory(3, 64, 4).unwrap();
        assert!(matches!(
            PositionMap::oram(inner, 257),
            Err(OramError::InvalidConfiguration { .. })
        ));
    }

    #[test]
    fn oram_backed_fill_random() {
        seed_rng(0x13);
        let num_leaves = 1 << 7;
        let inner = PathOram::new_in_memory(3, 64, 4).unwrap();
        let mut map = PositionMap::oram(inner, 200).unwrap();
        map.fill_random(num_leaves).unwrap();

        let mut distinct = std::collections::HashSet::new();
        for id in 0..200 {
            let leaf = map.get(id).unwrap();
            assert!(leaf < num_leaves);
            distinct.insert(leaf);
        }
        // 200 uniform draws from 128 leaves collide, but not down to a handful.
        assert!(distinct.len() > 32);
    }
}
