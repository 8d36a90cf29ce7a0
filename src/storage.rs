// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! Storage adapters: cell-addressed arrays of encrypted `(id, payload)` records.
//!
//! The adapter owns the encryption boundary. Every `set` serializes the id and
//! payload into one cipher-block-aligned plaintext, draws a fresh random IV,
//! and persists `iv || ciphertext`; every `get` decrypts and returns the
//! plaintext record. Two writes of the same record therefore never produce the
//! same bytes on the backend. An empty key bypasses encryption (test mode);
//! the IV field is still present, zero-filled.
//!
//! On-disk record layout:
//!
//! ```text
//! offset 0              iv          (AES_BLOCK_SIZE bytes, random per write)
//! offset AES_BLOCK_SIZE ciphertext  (ceil((ID_SIZE + B) / 16) * 16 bytes)
//! ```

use crate::crypto::{self, EncryptionMode, AES_BLOCK_SIZE, KEY_SIZE};
use crate::utils::random_bytes;
use crate::{BlockId, OramError, EMPTY_BLOCK_ID, ID_SIZE};
use std::fs::OpenOptions;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

/// A storage record: a block id and its plaintext payload.
pub type StorageRecord = (BlockId, Vec<u8>);

/// Parameters shared by every storage variant.
#[derive(Clone, Debug)]
pub struct StorageConfig {
    /// The number of cells (one per bucket slot).
    pub capacity: u64,
    /// The payload size `B` in bytes; a multiple of [`AES_BLOCK_SIZE`], at
    /// least two cipher blocks.
    pub block_size: usize,
    /// The AES-256 key, exactly [`KEY_SIZE`] bytes, or empty to bypass
    /// encryption.
    pub key: Vec<u8>,
}

/// Validated configuration plus the derived record geometry.
#[derive(Debug)]
struct StorageCore {
    capacity: u64,
    block_size: usize,
    key: Option<[u8; KEY_SIZE]>,
    plaintext_size: usize,
    record_size: usize,
}

impl StorageCore {
    fn new(config: &StorageConfig) -> Result<Self, OramError> {
        if config.block_size < 2 * AES_BLOCK_SIZE || config.block_size % AES_BLOCK_SIZE != 0 {
            return Err(OramError::InvalidConfiguration {
                parameter_name: "storage block size".to_string(),
                parameter_value: config.block_size.to_string(),
            });
        }
        if config.capacity == 0 {
            return Err(OramError::InvalidConfiguration {
                parameter_name: "storage capacity".to_string(),
                parameter_value: config.capacity.to_string(),
            });
        }

        let key = if config.key.is_empty() {
            None
        } else if config.key.len() == KEY_SIZE {
            let mut key = [0u8; KEY_SIZE];
            key.copy_from_slice(&config.key);
            Some(key)
        } else {
            return Err(OramError::InvalidLength {
                parameter: "key",
                actual: config.key.len(),
                expected: KEY_SIZE,
            });
        };

        let plaintext_size =
            (ID_SIZE + config.block_size).div_ceil(AES_BLOCK_SIZE) * AES_BLOCK_SIZE;

        Ok(Self {
            capacity: config.capacity,
            block_size: config.block_size,
            key,
            plaintext_size,
            record_size: AES_BLOCK_SIZE + plaintext_size,
        })
    }

    fn check_capacity(&self, location: u64) -> Result<(), OramError> {
        if location >= self.capacity {
            return Err(OramError::AddressOutOfBounds {
                attempted: location,
                capacity: self.capacity,
            });
        }
        Ok(())
    }

    /// Serializes and encrypts one record. Payloads shorter than the block
    /// size are zero-padded; longer ones are rejected.
    fn encode(&self, id: BlockId, payload: &[u8]) -> Result<Vec<u8>, OramError> {
        if payload.len() > self.block_size {
            return Err(OramError::InvalidLength {
                parameter: "payload",
                actual: payload.len(),
                expected: self.block_size,
            });
        }

        let mut plaintext = vec![0u8; self.plaintext_size];
        plaintext[..ID_SIZE].copy_from_slice(&id.to_le_bytes());
        plaintext[ID_SIZE..ID_SIZE + payload.len()].copy_from_slice(payload);

        let mut raw = Vec::with_capacity(self.record_size);
        match &self.key {
            Some(key) => {
                let iv = random_bytes(AES_BLOCK_SIZE);
                let ciphertext = crypto::encrypt(key, &iv, &plaintext, EncryptionMode::Encrypt)?;
                raw.extend_from_slice(&iv);
                raw.extend_from_slice(&ciphertext);
            }
            None => {
                raw.extend_from_slice(&[0u8; AES_BLOCK_SIZE]);
                raw.extend_from_slice(&plaintext);
            }
        }
        Ok(raw)
    }

    fn decode(&self, raw: &[u8]) -> Result<StorageRecord, OramError> {
        if raw.len() != self.record_size {
            return Err(OramError::Backend {
                message: format!(
                    "malformed record: {} bytes, expected {}",
                    raw.len(),
                    self.record_size
                ),
            });
        }

        let (iv, body) = raw.split_at(AES_BLOCK_SIZE);
        let plaintext = match &self.key {
            Some(key) => crypto::encrypt(key, iv, body, EncryptionMode::Decrypt)?,
            None => body.to_vec(),
        };

        let mut id = [0u8; ID_SIZE];
        id.copy_from_slice(&plaintext[..ID_SIZE]);
        let payload = plaintext[ID_SIZE..ID_SIZE + self.block_size].to_vec();

        Ok((BlockId::from_le_bytes(id), payload))
    }
}

/// An in-memory storage adapter.
///
/// Tracks per-cell physical read and write counts; the obliviousness tests
/// use them to check that an access touches exactly one path.
#[derive(Debug)]
pub struct MemoryStorage {
    core: StorageCore,
    cells: Vec<Vec<u8>>,
    /// `reads[i]` counts the physical reads of cell `i`.
    pub reads: Vec<u64>,
    /// `writes[i]` counts the physical writes of cell `i`.
    pub writes: Vec<u64>,
}

impl MemoryStorage {
    /// Total physical reads across all cells.
    pub fn read_count(&self) -> u64 {
        self.reads.iter().sum()
    }

    /// Total physical writes across all cells.
    pub fn write_count(&self) -> u64 {
        self.writes.iter().sum()
    }
}

/// A file-backed storage adapter with random access at `i * record_size`.
#[derive(Debug)]
pub struct FileStorage {
    core: StorageCore,
    file: std::fs::File,
}

/// A cell-addressed array of encrypted records over a fixed block size.
///
/// Concrete variants are chosen at construction ([`Storage::in_memory`],
/// [`Storage::file`]); the record codec and the capacity checks are shared.
#[derive(Debug)]
pub enum Storage {
    /// RAM-backed cells.
    Memory(MemoryStorage),
    /// A single binary file of `capacity * record_size` bytes.
    File(FileStorage),
}

impl Storage {
    /// Creates an in-memory adapter with every cell initialized to the empty
    /// record.
    pub fn in_memory(config: StorageConfig) -> Result<Self, OramError> {
        let core = StorageCore::new(&config)?;
        let capacity: usize = core.capacity.try_into()?;
        let record_size = core.record_size;
        let mut storage = Storage::Memory(MemoryStorage {
            core,
            cells: vec![vec![0u8; record_size]; capacity],
            reads: vec![0; capacity],
            writes: vec![0; capacity],
        });
        storage.fill_with_zeroes()?;
        Ok(storage)
    }

    /// Opens a file-backed adapter.
    ///
    /// With `overwrite = true` the file is created (or truncated) and every
    /// cell is initialized to the empty record. With `overwrite = false` the
    /// adapter attaches to an existing file, which must be exactly
    /// `capacity * record_size` bytes; a missing or mis-sized file fails with
    /// [`OramError::Backend`].
    pub fn file(
        config: StorageConfig,
        path: impl AsRef<Path>,
        overwrite: bool,
    ) -> Result<Self, OramError> {
        let core = StorageCore::new(&config)?;
        let expected_len = core.capacity * core.record_size as u64;

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(overwrite)
            .truncate(overwrite)
            .open(path.as_ref())
            .map_err(|e| OramError::Backend {
                message: format!("cannot open {}: {e}", path.as_ref().display()),
            })?;

        if overwrite {
            file.set_len(expected_len)?;
        } else {
            let actual_len = file.metadata()?.len();
            if actual_len != expected_len {
                return Err(OramError::Backend {
                    message: format!(
                        "cannot attach to {}: {actual_len} bytes, expected {expected_len}",
                        path.as_ref().display()
                    ),
                });
            }
        }

        let mut storage = Storage::File(FileStorage { core, file });
        if overwrite {
            storage.fill_with_zeroes()?;
        }
        Ok(storage)
    }

    fn core(&self) -> &StorageCore {
        match self {
            Storage::Memory(memory) => &memory.core,
            Storage::File(file) => &file.core,
        }
    }

    /// The number of cells.
    pub fn capacity(&self) -> u64 {
        self.core().capacity
    }

    /// The payload size `B` in bytes.
    pub fn block_size(&self) -> usize {
        self.core().block_size
    }

    /// The on-disk size of one cell, IV included.
    pub fn record_size(&self) -> usize {
        self.core().record_size
    }

    /// Reads and decrypts the record in cell `location`.
    pub fn get(&mut self, location: u64) -> Result<StorageRecord, OramError> {
        self.core().check_capacity(location)?;
        let raw = self.read_raw(location)?;
        self.core().decode(&raw)
    }

    /// Reads several cells, preserving the order of `locations`.
    pub fn get_batch(&mut self, locations: &[u64]) -> Result<Vec<StorageRecord>, OramError> {
        locations.iter().map(|&location| self.get(location)).collect()
    }

    /// Encrypts `(id, payload)` under a fresh IV and writes it to cell
    /// `location`. Payloads shorter than the block size are zero-padded.
    pub fn set(&mut self, location: u64, id: BlockId, payload: &[u8]) -> Result<(), OramError> {
        self.core().check_capacity(location)?;
        let raw = self.core().encode(id, payload)?;
        self.write_raw(location, &raw)?;
        self.flush()
    }

    /// Writes several cells as one batch, flushing the backend once at the
    /// end. The adapter is single-writer, so the batch is atomic with respect
    /// to every other adapter call.
    pub fn set_batch(&mut self, requests: &[(u64, StorageRecord)]) -> Result<(), OramError> {
        for (location, (id, payload)) in requests {
            self.core().check_capacity(*location)?;
            let raw = self.core().encode(*id, payload)?;
            self.write_raw(*location, &raw)?;
        }
        self.flush()
    }

    /// Resets every cell to `(EMPTY_BLOCK_ID, zeroes)`. Under a non-empty key
    /// the cells still appear on the backend as fresh random ciphertexts.
    pub fn fill_with_zeroes(&mut self) -> Result<(), OramError> {
        for location in 0..self.capacity() {
            let raw = self.core().encode(EMPTY_BLOCK_ID, &[])?;
            self.write_raw(location, &raw)?;
        }
        self.flush()
    }

    fn read_raw(&mut self, location: u64) -> Result<Vec<u8>, OramError> {
        log::debug!("physical read -- {location}");
        match self {
            Storage::Memory(memory) => {
                let index: usize = location.try_into()?;
                memory.reads[index] += 1;
                Ok(memory.cells[index].clone())
            }
            Storage::File(backing) => {
                let mut raw = vec![0u8; backing.core.record_size];
                backing
                    .file
                    .seek(SeekFrom::Start(location * backing.core.record_size as u64))?;
                backing.file.read_exact(&mut raw)?;
                Ok(raw)
            }
        }
    }

    fn write_raw(&mut self, location: u64, raw: &[u8]) -> Result<(), OramError> {
        log::debug!("physical write -- {location}");
        match self {
            Storage::Memory(memory) => {
                let index: usize = location.try_into()?;
                memory.writes[index] += 1;
                memory.cells[index].copy_from_slice(raw);
                Ok(())
            }
            Storage::File(backing) => {
                backing
                    .file
                    .seek(SeekFrom::Start(location * backing.core.record_size as u64))?;
                backing.file.write_all(raw)?;
                Ok(())
            }
        }
    }

    fn flush(&mut self) -> Result<(), OramError> {
        match self {
            Storage::Memory(_) => Ok(()),
            Storage::File(backing) => {
                backing.file.flush()?;
                Ok(())
            }
        }
    }
}
