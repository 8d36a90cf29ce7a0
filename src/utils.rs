// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! Process-wide randomness and small payload helpers.
//!
//! The CSPRNG is shared state with a test seam: production code draws from a
//! thread-local [`StdRng`] seeded from OS entropy, and tests call
//! [`seed_rng`] to make every draw deterministic without threading an RNG
//! through the adapters and the engine.

use rand::{rngs::StdRng, RngCore, SeedableRng};
use std::cell::RefCell;

thread_local! {
    static GLOBAL_RNG: RefCell<StdRng> = RefCell::new(StdRng::from_entropy());
}

/// Replaces the process-wide RNG of the current thread with a deterministic
/// generator. Intended for tests; calling it in production forfeits all
/// security guarantees of the construction.
pub fn seed_rng(seed: u64) {
    GLOBAL_RNG.with(|rng| *rng.borrow_mut() = StdRng::seed_from_u64(seed));
}

pub(crate) fn with_rng<T>(f: impl FnOnce(&mut StdRng) -> T) -> T {
    GLOBAL_RNG.with(|rng| f(&mut rng.borrow_mut()))
}

/// Returns `n` uniform random bytes.
pub fn random_bytes(n: usize) -> Vec<u8> {
    let mut bytes = vec![0u8; n];
    with_rng(|rng| rng.fill_bytes(&mut bytes));
    bytes
}

/// Returns a uniform random integer in `[0, max)`.
///
/// The draw is 8 random bytes interpreted as an unsigned 64-bit integer and
/// reduced modulo `max`; the modulo bias is negligible for `max ≪ 2^64`.
///
/// # Panics
///
/// Panics if `max` is zero.
pub fn random_u64(max: u64) -> u64 {
    assert!(max > 0, "empty range");
    with_rng(|rng| rng.next_u64()) % max
}

/// Returns a uniform random integer in `[0, max)`. See [`random_u64`].
///
/// # Panics
///
/// Panics if `max` is zero.
pub fn random_u32(max: u32) -> u32 {
    assert!(max > 0, "empty range");
    with_rng(|rng| rng.next_u32()) % max
}

/// Encodes `text` as a zero-padded payload of exactly `block_size` bytes.
///
/// Text longer than `block_size` is truncated.
pub fn from_text(text: &str, block_size: usize) -> Vec<u8> {
    let mut payload = vec![0u8; block_size];
    let n = text.len().min(block_size);
    payload[..n].copy_from_slice(&text.as_bytes()[..n]);
    payload
}

/// Recovers the text stored by [`from_text`], dropping the zero padding.
pub fn to_text(payload: &[u8]) -> String {
    let end = payload
        .iter()
        .position(|&b| b == 0)
        .unwrap_or(payload.len());
    String::from_utf8_lossy(&payload[..end]).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seeded_rng_is_deterministic() {
        seed_rng(0x13);
        let first = (random_bytes(32), random_u64(1 << 20));
        seed_rng(0x13);
        let second = (random_bytes(32), random_u64(1 << 20));
        assert_eq!(first, second);
    }

    #[test]
    fn random_u64_respects_bound() {
        seed_rng(0);
        for max in [1, 2, 7, 1 << 16] {
            for _ in 0..100 {
                assert!(random_u64(max) < max);
            }
        }
    }

    #[test]
    fn random_bytes_are_not_constant() {
        seed_rng(1);
        assert_ne!(random_bytes(16), random_bytes(16));
    }

    #[test]
    fn text_round_trip() {
        let payload = from_text("hello", 32);
        assert_eq!(payload.len(), 32);
        assert_eq!(to_text(&payload), "hello");
    }

    #[test]
    fn text_truncates_to_block_size() {
        let payload = from_text("abcdefgh", 4);
        assert_eq!(payload.len(), 4);
        assert_eq!(to_text(&payload), "abcd");
    }
}
