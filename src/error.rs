// Copyright 2019-2022 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use thiserror::Error;

/// Errors surfaced by the block store.
#[derive(Debug, Error)]
pub enum Error {
    #[error("block manager operation called before open_file")]
    FileNotOpen,

    #[error("open_file called while a file is already open")]
    AlreadyOpen,

    #[error("database schema version {found} does not match expected {expected}")]
    UnsupportedSchema { found: u64, expected: u64 },

    #[error("serialized payload of {size} bytes exceeds the {limit} byte limit")]
    PayloadTooLarge { size: usize, limit: usize },

    #[error("operation not valid on an empty container")]
    Empty,

    #[error("iterator out of range")]
    OutOfRange,

    #[error("cannot clear the block cache while handles are outstanding")]
    ActiveHandles,

    #[error(transparent)]
    BackendFailure(#[from] rusqlite::Error),

    #[error("block {0} does not exist")]
    MissingBlock(u64),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;
