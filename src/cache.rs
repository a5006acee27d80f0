// Copyright 2019-2022 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Block cache: a shared table from block index to materialized value,
//! with copy-on-write snapshots for rollback and live-handle counting that
//! gates the GC sweep. Type erasure over the cached value goes through a
//! small object-safe trait ([`ErasedEntry`]) rather than `std::any`
//! downcasting plus raw function pointers.

use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::{Error, Result};
use crate::layout::{BlockRef, Layout};

trait ErasedEntry: Any + Send {
    fn encode_erased(&self) -> Result<(Vec<u8>, Vec<BlockRef>)>;
    fn clone_erased(&self) -> Box<dyn ErasedEntry>;
    fn as_any(&self) -> &dyn Any;
}

impl<T> ErasedEntry for T
where
    T: Layout + Clone + Send + 'static,
{
    fn encode_erased(&self) -> Result<(Vec<u8>, Vec<BlockRef>)> {
        self.encode()
    }

    fn clone_erased(&self) -> Box<dyn ErasedEntry> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

struct CacheEntry {
    value: Box<dyn ErasedEntry>,
    snapshot: Option<Box<dyn ErasedEntry>>,
}

/// Live-handle counter shared between a manager and every handle it hands
/// out. Sweep cannot start while this is non-zero.
#[derive(Clone, Default)]
pub struct HandleCounter(Arc<AtomicUsize>);

impl HandleCounter {
    pub fn count(&self) -> usize {
        self.0.load(Ordering::Acquire)
    }

    pub(crate) fn guard(&self) -> HandleGuard {
        self.0.fetch_add(1, Ordering::AcqRel);
        HandleGuard(self.0.clone())
    }
}

/// RAII token held by a live [`crate::handle::BlockHandle`] /
/// [`crate::handle::LazyHandle`]; decrements the counter on drop.
pub struct HandleGuard(Arc<AtomicUsize>);

impl Clone for HandleGuard {
    fn clone(&self) -> Self {
        self.0.fetch_add(1, Ordering::AcqRel);
        HandleGuard(self.0.clone())
    }
}

impl Drop for HandleGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

/// The process-wide cache. Cheaply cloneable; all clones share state.
#[derive(Clone)]
pub struct BlockCache {
    entries: Arc<RwLock<HashMap<u64, CacheEntry>>>,
    dirty: Arc<RwLock<HashSet<u64>>>,
    handles: HandleCounter,
}

impl Default for BlockCache {
    fn default() -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            dirty: Arc::new(RwLock::new(HashSet::new())),
            handles: HandleCounter::default(),
        }
    }
}

impl BlockCache {
    pub fn handle_counter(&self) -> HandleCounter {
        self.handles.clone()
    }

    pub fn contains(&self, idx: u64) -> bool {
        self.entries.read().contains_key(&idx)
    }

    /// Installs a freshly materialized (not dirty) value, e.g. after reading
    /// it back from the store.
    pub fn install<T>(&self, idx: u64, value: T)
    where
        T: Layout + Clone + Send + 'static,
    {
        self.entries.write().entry(idx).or_insert_with(|| CacheEntry {
            value: Box::new(value),
            snapshot: None,
        });
    }

    pub fn get<T>(&self, idx: u64) -> Option<T>
    where
        T: Layout + Clone + Send + 'static,
    {
        self.entries
            .read()
            .get(&idx)
            .and_then(|e| e.value.as_any().downcast_ref::<T>())
            .cloned()
    }

    /// Installs `value` as the entry for `idx` and marks it dirty, taking a
    /// pre-modification snapshot on the first write within the current
    /// transaction.
    pub fn set<T>(&self, idx: u64, value: T)
    where
        T: Layout + Clone + Send + 'static,
    {
        let mut entries = self.entries.write();
        let mut dirty = self.dirty.write();
        let first_write = dirty.insert(idx);
        match entries.get_mut(&idx) {
            Some(entry) => {
                if first_write && entry.snapshot.is_none() {
                    entry.snapshot = Some(entry.value.clone_erased());
                }
                entry.value = Box::new(value);
            }
            None => {
                entries.insert(
                    idx,
                    CacheEntry {
                        value: Box::new(value),
                        snapshot: None,
                    },
                );
            }
        }
    }

    /// Reads, mutates in place via `f`, and re-marks dirty; returns the new
    /// value. Fails if the entry has never been materialized.
    pub fn update<T>(&self, idx: u64, f: impl FnOnce(&mut T)) -> Result<T>
    where
        T: Layout + Clone + Send + 'static,
    {
        let mut value = self
            .get::<T>(idx)
            .ok_or_else(|| Error::Other(format!("cannot update uncached block {idx}")))?;
        f(&mut value);
        self.set(idx, value.clone());
        Ok(value)
    }

    /// `after_begin` hook: a prior transaction must have fully committed or
    /// rolled back before a new one starts.
    pub fn after_begin(&self) -> Result<()> {
        if !self.dirty.read().is_empty() {
            return Err(Error::Other(
                "block cache has a dirty set left over from an unterminated transaction".into(),
            ));
        }
        Ok(())
    }

    /// `before_commit` hook: encodes and write-through every dirty entry via
    /// `write_through`, which the block manager supplies so it can apply the
    /// GC write barrier.
    pub fn before_commit(
        &self,
        mut write_through: impl FnMut(u64, Vec<u8>, Vec<BlockRef>) -> Result<()>,
    ) -> Result<()> {
        let dirty: Vec<u64> = self.dirty.read().iter().copied().collect();
        for idx in dirty {
            let (payload, refs) = {
                let entries = self.entries.read();
                let entry = entries
                    .get(&idx)
                    .expect("dirty index must have a cache entry");
                entry.value.encode_erased()?
            };
            write_through(idx, payload, refs)?;
        }
        Ok(())
    }

    pub fn after_commit(&self) {
        let mut entries = self.entries.write();
        for idx in self.dirty.write().drain() {
            if let Some(entry) = entries.get_mut(&idx) {
                entry.snapshot = None;
            }
        }
    }

    pub fn after_rollback(&self) {
        let mut entries = self.entries.write();
        for idx in self.dirty.write().drain() {
            if let Some(entry) = entries.get_mut(&idx) {
                if let Some(snapshot) = entry.snapshot.take() {
                    entry.value = snapshot;
                }
            }
        }
    }

    /// Drops every cache entry. Fails while any handle is outstanding.
    pub fn clear(&self) -> Result<()> {
        if self.handles.count() > 0 {
            return Err(Error::ActiveHandles);
        }
        self.entries.write().clear();
        Ok(())
    }
}
