// Copyright 2019-2022 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! A persistent block store over a single-file relational database, plus a
//! library of persistent container types (forward-list, list, chunked
//! deque) whose nodes live in the store.
//!
//! The store is organized as four layers, leaves first:
//!
//! - [`backend`]: the SQLite adapter, schema, transactions, the persistent
//!   metadata record.
//! - [`manager`]: the block manager, index allocation, block read/write, the
//!   single user-facing `transaction` primitive, and the incremental
//!   mark-and-sweep [`gc`] state machine.
//! - [`cache`] / [`handle`]: the in-memory block cache, copy-on-write
//!   snapshots for rollback, live-handle counting that gates GC sweep.
//! - [`containers`]: persistent container types built out of blocks,
//!   [`containers::ForwardList`], [`containers::List`],
//!   [`containers::Deque`].
//!
//! Applications open a file with [`BlockManager::open_file`], obtain the
//! root block reference with [`BlockManager::root`], wrap it in a container
//! type, and mutate inside [`BlockManager::transaction`]. Periodically call
//! [`BlockManager::gc`] to advance the incremental collector.

pub mod backend;
pub mod cache;
pub mod config;
pub mod containers;
pub mod error;
pub mod gc;
pub mod handle;
pub mod layout;
pub mod manager;
pub mod metadata;

#[cfg(feature = "metrics")]
pub mod metrics;

pub use config::StoreConfig;
pub use containers::{Deque, DequeCursor, ForwardList, ForwardListCursor, List, ListCursor};
pub use error::{Error, Result};
pub use gc::{GcCallback, GcInfo, RunToCompletion};
pub use handle::{BlockHandle, LazyHandle};
pub use layout::{BlockRef, Layout};
pub use manager::BlockManager;
