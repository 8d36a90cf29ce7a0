// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! Symmetric encryption and hashing primitives.
//!
//! Storage records are protected with AES-256-CBC over cipher-block-aligned
//! plaintexts, one fresh random IV per write, no padding scheme (the storage
//! adapter aligns its plaintexts itself). Hashing is SHA-256.

use crate::OramError;
use aes::cipher::{block_padding::NoPadding, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::Path;

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

/// The encryption key size in bytes (AES-256).
pub const KEY_SIZE: usize = 32;

/// The cipher block size in bytes.
pub const AES_BLOCK_SIZE: usize = 16;

/// The digest size in bytes (SHA-256).
pub const HASH_SIZE: usize = 32;

/// Whether [`encrypt`] runs the cipher forwards or backwards.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EncryptionMode {
    /// Transform plaintext into ciphertext.
    Encrypt,
    /// Transform ciphertext back into plaintext.
    Decrypt,
}

fn check_length(
    parameter: &'static str,
    actual: usize,
    expected: usize,
) -> Result<(), OramError> {
    if actual != expected {
        return Err(OramError::CryptoArg {
            message: format!("{parameter} of {actual} bytes provided, need {expected} bytes"),
        });
    }
    Ok(())
}

/// Runs AES-256-CBC over `input` in the requested direction.
///
/// `key` must be [`KEY_SIZE`] bytes, `iv` exactly one cipher block, and
/// `input` a non-empty multiple of [`AES_BLOCK_SIZE`]; the output has the
/// same length as the input. Violations fail with
/// [`OramError::CryptoArg`] before the cipher runs.
pub fn encrypt(
    key: &[u8],
    iv: &[u8],
    input: &[u8],
    mode: EncryptionMode,
) -> Result<Vec<u8>, OramError> {
    check_length("key", key.len(), KEY_SIZE)?;
    check_length("IV", iv.len(), AES_BLOCK_SIZE)?;

    if input.is_empty() || input.len() % AES_BLOCK_SIZE != 0 {
        return Err(OramError::CryptoArg {
            message: format!(
                "input must be a positive multiple of {AES_BLOCK_SIZE} (provided {} bytes)",
                input.len()
            ),
        });
    }

    match mode {
        EncryptionMode::Encrypt => {
            let cipher = Aes256CbcEnc::new_from_slices(key, iv).map_err(|e| {
                OramError::CryptoArg {
                    message: e.to_string(),
                }
            })?;
            Ok(cipher.encrypt_padded_vec_mut::<NoPadding>(input))
        }
        EncryptionMode::Decrypt => {
            let cipher = Aes256CbcDec::new_from_slices(key, iv).map_err(|e| {
                OramError::CryptoArg {
                    message: e.to_string(),
                }
            })?;
            cipher
                .decrypt_padded_vec_mut::<NoPadding>(input)
                .map_err(|e| OramError::CryptoArg {
                    message: e.to_string(),
                })
        }
    }
}

/// Returns the SHA-256 digest of `input`.
pub fn hash(input: &[u8]) -> [u8; HASH_SIZE] {
    Sha256::digest(input).into()
}

/// Hashes `input` to an integer in `[0, max)`: the first 8 digest bytes are
/// interpreted little-endian and reduced modulo `max`.
///
/// # Panics
///
/// Panics if `max` is zero.
pub fn hash_to_u64(input: &[u8], max: u64) -> u64 {
    assert!(max > 0, "empty range");
    let digest = hash(input);
    let mut word = [0u8; 8];
    word.copy_from_slice(&digest[..8]);
    u64::from_le_bytes(word) % max
}

/// Persists an encryption key as [`KEY_SIZE`] raw bytes.
pub fn store_key(key: &[u8], path: impl AsRef<Path>) -> Result<(), OramError> {
    check_length("key", key.len(), KEY_SIZE)?;
    fs::write(path, key)?;
    Ok(())
}

/// Reads back a key written by [`store_key`].
pub fn load_key(path: impl AsRef<Path>) -> Result<Vec<u8>, OramError> {
    let key = fs::read(path)?;
    check_length("key", key.len(), KEY_SIZE)?;
    Ok(key)
}
