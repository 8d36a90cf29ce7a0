// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! A client-side implementation of Path ORAM.
//!
//! The crate hides the access pattern of a logical block store from the
//! untrusted storage holding it: to any observer of the backend, every
//! [`PathOram::get`] and [`PathOram::put`] looks like the same thing, one
//! root-to-leaf path read followed by one re-encrypted path write.
//!
//! The engine composes three adapters, each replaceable at construction:
//! a [`Storage`] holding encrypted `(id, payload)` records, a client-side
//! plaintext [`Stash`], and a [`PositionMap`] assigning each block a random
//! leaf. The position map of a large ORAM can itself be stored inside a
//! smaller ORAM ([`OramPositionMap`]), with a flat array at the base of the
//! recursion.
//!
//! ```
//! use path_oram::PathOram;
//!
//! let mut oram = PathOram::new_in_memory(5, 64, 4)?;
//! oram.put(7, &[0x42; 64])?;
//! assert_eq!(oram.get(7)?, vec![0x42; 64]);
//! # Ok::<(), path_oram::OramError>(())
//! ```

#![warn(clippy::cargo, clippy::doc_markdown, missing_docs, rustdoc::all)]

pub mod crypto;
pub mod path_oram;
pub mod position_map;
pub mod stash;
pub mod storage;
pub mod utils;

#[cfg(test)]
mod test_utils;

pub use crate::path_oram::{OramConfig, PathOram, DEFAULT_MAX_BATCH_SIZE};
pub use crate::position_map::{FlatPositionMap, OramPositionMap, PositionMap};
pub use crate::stash::Stash;
pub use crate::storage::{FileStorage, MemoryStorage, Storage, StorageConfig};

use std::fmt;
use std::num::TryFromIntError;

/// The numeric type of logical block identifiers.
pub type BlockId = u64;

/// The numeric type of leaf indices, in `[0, 2^L)` for a tree of height `L`.
pub type Leaf = u64;

/// The block id marking an unoccupied slot.
pub const EMPTY_BLOCK_ID: BlockId = BlockId::MAX;

/// The width of a serialized [`BlockId`] in bytes (little-endian).
pub const ID_SIZE: usize = std::mem::size_of::<BlockId>();

/// The error type for every fallible operation in this crate.
///
/// Errors are surfaced, not recovered: no operation retries, and a failure
/// aborts the current public operation. A failure during a path write leaves
/// the engine in an undefined state (see [`PathOram`]).
#[derive(Debug)]
#[non_exhaustive]
pub enum OramError {
    /// A block id, cell index, or bucket index outside the declared bounds.
    AddressOutOfBounds {
        /// The offending index.
        attempted: u64,
        /// The capacity it was checked against.
        capacity: u64,
    },
    /// A payload, key, or IV of the wrong length.
    InvalidLength {
        /// What was mis-sized.
        parameter: &'static str,
        /// The length provided.
        actual: usize,
        /// The length required.
        expected: usize,
    },
    /// Inserting a new block would exceed the stash capacity.
    StashOverflow {
        /// The configured stash capacity.
        capacity: usize,
    },
    /// A batched access carried more requests than the engine allows.
    BatchTooLarge {
        /// The number of requests submitted.
        requested: usize,
        /// The configured maximum.
        max_batch_size: usize,
    },
    /// The storage medium failed (file or network I/O), or an inner
    /// position-map engine failed.
    Backend {
        /// Description of the failure.
        message: String,
    },
    /// Inconsistent cryptographic parameters.
    CryptoArg {
        /// Description of the violated requirement.
        message: String,
    },
    /// A constructor was given parameters it cannot work with.
    InvalidConfiguration {
        /// The rejected parameter.
        parameter_name: String,
        /// Its value.
        parameter_value: String,
    },
    /// An operation was invoked in an engine state that does not permit it.
    InvalidState {
        /// The rejected operation.
        operation: &'static str,
    },
    /// A debug consistency check found a violated invariant.
    ConsistencyViolation {
        /// Description of the violation.
        message: String,
    },
    /// An internal integer conversion overflowed.
    IntegerConversion,
}

impl fmt::Display for OramError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OramError::AddressOutOfBounds {
                attempted,
                capacity,
            } => {
                write!(f, "index {attempted} out of bounds (capacity {capacity})")
            }
            OramError::InvalidLength {
                parameter,
                actual,
                expected,
            } => {
                write!(
                    f,
                    "{parameter} of {actual} bytes provided, need {expected} bytes"
                )
            }
            OramError::StashOverflow { capacity } => {
                write!(f, "insertion over stash capacity ({capacity})")
            }
            OramError::BatchTooLarge {
                requested,
                max_batch_size,
            } => {
                write!(
                    f,
                    "batch of {requested} requests over the maximum of {max_batch_size}"
                )
            }
            OramError::Backend { message } => write!(f, "storage backend failure: {message}"),
            OramError::CryptoArg { message } => write!(f, "crypto argument error: {message}"),
            OramError::InvalidConfiguration {
                parameter_name,
                parameter_value,
            } => {
                write!(
                    f,
                    "invalid configuration: {parameter_name} = {parameter_value}"
                )
            }
            OramError::InvalidState { operation } => {
                write!(f, "operation {operation} is not valid in the current state")
            }
            OramError::ConsistencyViolation { message } => {
                write!(f, "consistency violation: {message}")
            }
            OramError::IntegerConversion => write!(f, "integer conversion overflowed"),
        }
    }
}

impl std::error::Error for OramError {}

impl From<TryFromIntError> for OramError {
    fn from(_: TryFromIntError) -> Self {
        OramError::IntegerConversion
    }
}

impl From<std::io::Error> for OramError {
    fn from(error: std::io::Error) -> Self {
        OramError::Backend {
            message: error.to_string(),
        }
    }
}
