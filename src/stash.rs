// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! The client-side stash: a bounded plaintext map of overflow blocks.

use crate::utils::with_rng;
use crate::{BlockId, OramError, ID_SIZE};
use rand::seq::SliceRandom;
use std::collections::HashMap;
use std::fs;
use std::path::Path;

/// A bounded in-memory mapping from block id to plaintext payload.
///
/// The stash holds the blocks that did not fit into the tree during eviction.
/// Its capacity must exceed the worst-case path overflow; the engine's
/// in-memory constructor sizes it at `3 * L * Z`.
#[derive(Debug)]
pub struct Stash {
    capacity: usize,
    blocks: HashMap<BlockId, Vec<u8>>,
}

impl Stash {
    /// Creates an empty stash holding at most `capacity` blocks.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            blocks: HashMap::with_capacity(capacity),
        }
    }

    fn check_overflow(&self, id: BlockId) -> Result<(), OramError> {
        if self.blocks.len() == self.capacity && !self.blocks.contains_key(&id) {
            return Err(OramError::StashOverflow {
                capacity: self.capacity,
            });
        }
        Ok(())
    }

    /// Stores `payload` under `id`, keeping an existing entry untouched.
    pub fn add(&mut self, id: BlockId, payload: Vec<u8>) -> Result<(), OramError> {
        self.check_overflow(id)?;
        self.blocks.entry(id).or_insert(payload);
        Ok(())
    }

    /// Stores `payload` under `id`, overwriting an existing entry.
    pub fn update(&mut self, id: BlockId, payload: Vec<u8>) -> Result<(), OramError> {
        self.check_overflow(id)?;
        self.blocks.insert(id, payload);
        Ok(())
    }

    /// The payload stored under `id`, if any.
    pub fn get(&self, id: BlockId) -> Option<&[u8]> {
        self.blocks.get(&id).map(Vec::as_slice)
    }

    /// Whether `id` is present.
    pub fn contains(&self, id: BlockId) -> bool {
        self.blocks.contains_key(&id)
    }

    /// Removes `id`; absent ids are a no-op.
    pub fn remove(&mut self, id: BlockId) {
        self.blocks.remove(&id);
    }

    /// A snapshot of every `(id, payload)` pair in randomized order.
    pub fn get_all(&self) -> Vec<(BlockId, Vec<u8>)> {
        let mut all: Vec<(BlockId, Vec<u8>)> = self
            .blocks
            .iter()
            .map(|(&id, payload)| (id, payload.clone()))
            .collect();
        with_rng(|rng| all.shuffle(rng));
        all
    }

    /// The number of blocks currently held.
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    /// Whether the stash holds no blocks.
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// The maximum number of blocks the stash may hold.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Writes the contents as concatenated `(id: u64 LE, payload)` records.
    pub fn store_to_file(&self, path: impl AsRef<Path>) -> Result<(), OramError> {
        let block_size = self.blocks.values().map(Vec::len).next().unwrap_or(0);
        let mut buffer = Vec::with_capacity(self.blocks.len() * (ID_SIZE + block_size));
        for (id, payload) in &self.blocks {
            buffer.extend_from_slice(&id.to_le_bytes());
            buffer.extend_from_slice(payload);
        }
        fs::write(path, buffer)?;
        Ok(())
    }

    /// Reads back a snapshot written by [`Stash::store_to_file`].
    ///
    /// The payload width is not recorded in the file and must be supplied as
    /// `block_size`; a file length that is not a multiple of the record size
    /// fails with [`OramError::Backend`].
    pub fn load_from_file(
        path: impl AsRef<Path>,
        block_size: usize,
        capacity: usize,
    ) -> Result<Self, OramError> {
        let buffer = fs::read(path.as_ref())?;
        let record_size = ID_SIZE + block_size;
        if record_size == ID_SIZE || buffer.len() % record_size != 0 {
            return Err(OramError::Backend {
                message: format!(
                    "cannot load stash from {}: {} bytes is not a multiple of record size {record_size}",
                    path.as_ref().display(),
                    buffer.len()
                ),
            });
        }

        let mut stash = Stash::new(capacity);
        for record in buffer.chunks_exact(record_size) {
            let mut id = [0u8; ID_SIZE];
            id.copy_from_slice(&record[..ID_SIZE]);
            stash.add(BlockId::from_le_bytes(id), record[ID_SIZE..].to_vec())?;
        }
        Ok(stash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::seed_rng;
    use std::collections::HashSet;

    const BLOCK_SIZE: usize = 32;

    fn payload(fill: u8) -> Vec<u8> {
        vec![fill; BLOCK_SIZE]
    }

    #[test]
    fn add_keeps_existing_entry() {
        let mut stash = Stash::new(4);
        stash.add(1, payload(0xaa)).unwrap();
        stash.add(1, payload(0xbb)).unwrap();
        assert_eq!(stash.get(1), Some(&payload(0xaa)[..]));
        assert_eq!(stash.len(), 1);
    }

    #[test]
    fn update_overwrites() {
        let mut stash = Stash::new(4);
        stash.update(1, payload(0xaa)).unwrap();
        stash.update(1, payload(0xbb)).unwrap();
        assert_eq!(stash.get(1), Some(&payload(0xbb)[..]));
    }

    #[test]
    fn remove_is_idempotent() {
        let mut stash = Stash::new(4);
        stash.add(1, payload(0x01)).unwrap();
        stash.remove(1);
        stash.remove(1);
        assert!(!stash.contains(1));
        assert!(stash.is_empty());
    }

    #[test]
    fn overflow_on_new_id_only() {
        let mut stash = Stash::new(2);
        stash.add(1, payload(1)).unwrap();
        stash.add(2, payload(2)).unwrap();
        assert!(matches!(
            stash.add(3, payload(3)),
            Err(OramError::StashOverflow { .. })
        ));
        // Overwriting a resident id at capacity is fine.
        stash.update(2, payload(0xff)).unwrap();
        assert_eq!(stash.get(2), Some(&payload(0xff)[..]));
    }

    #[test]
    fn get_all_returns_every_entry() {
        seed_rng(0x13);
        let mut stash = Stash::new(16);
        for id in 0..10u64 {
            stash.add(id, payload(id as u8)).unwrap();
        }

        let all = stash.get_all();
        assert_eq!(all.len(), 10);
        let ids: HashSet<BlockId> = all.iter().map(|(id, _)| *id).collect();
        assert_eq!(ids, (0..10u64).collect::<HashSet<_>>());
        for (id, data) in all {
            assert_eq!(data, payload(id as u8));
        }
    }

    #[test]
    fn snapshot_round_trip() {
        seed_rng(0x13);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stash.bin");

        let mut stash = Stash::new(16);
        for id in [0u64, 7, 13, u64::MAX - 1] {
            stash.update(id, payload(id as u8)).unwrap();
        }
        stash.store_to_file(&path).unwrap();

        let reloaded = Stash::load_from_file(&path, BLOCK_SIZE, 16).unwrap();
        assert_eq!(reloaded.len(), stash.len());
        for (id, data) in stash.get_all() {
            assert_eq!(reloaded.get(id), Some(&data[..]));
        }
    }

    #[test]
    fn empty_snapshot_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.bin");
        Stash::new(4).store_to_file(&path).unwrap();
        let reloaded = Stash::load_from_file(&path, BLOCK_SIZE, 4).unwrap();
        assert!(reloaded.is_empty());
    }

    #[test]
    fn load_rejects_misaligned_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.bin");
        fs::write(&path, [0u8; ID_SIZE + BLOCK_SIZE + 1]).unwrap();
        assert!(matches!(
            Stash::load_from_file(&path, BLOCK_SIZE, 4),
            Err(OramError::Backend { .. })
        ));
    }
}
