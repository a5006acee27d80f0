// Copyright 2019-2022 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Typed handles onto block-cache entries: an eager variant that
//! materializes on construction and a lazy variant that defers
//! materialization until first access. Both wrap a `BlockRef` plus a
//! reference back to the owning manager and a live-handle guard that blocks
//! GC sweep while any handle exists.

use std::marker::PhantomData;
use std::sync::Arc;

use crate::cache::HandleGuard;
use crate::error::Result;
use crate::layout::{BlockRef, Layout};
use crate::manager::{BlockManager, ManagerCore};

/// A handle that has already materialized its value into the cache.
pub struct BlockHandle<T> {
    core: Arc<ManagerCore>,
    index: BlockRef,
    _guard: HandleGuard,
    _marker: PhantomData<T>,
}

/// A handle that defers materialization until the first [`LazyHandle::get`].
pub struct LazyHandle<T> {
    core: Arc<ManagerCore>,
    index: BlockRef,
    _guard: HandleGuard,
    _marker: PhantomData<T>,
}

impl<T> BlockHandle<T>
where
    T: Layout + Clone + Send + 'static,
{
    /// Opens a handle onto an already-allocated, already-written block.
    pub fn existing(manager: &BlockManager, index: BlockRef) -> Result<Self> {
        let core = manager.core.clone();
        if !core.cache.contains(index.index()) {
            materialize(&core, index)?;
        }
        Ok(Self {
            _guard: manager.handle_counter().guard(),
            core,
            index,
            _marker: PhantomData,
        })
    }

    /// Opens a handle onto `index`, running `init` to populate it the first
    /// time it's ever seen (used to initialize a freshly allocated sentinel
    /// node).
    pub fn existing_or_init(
        manager: &BlockManager,
        index: BlockRef,
        init: impl FnOnce() -> T,
    ) -> Result<Self> {
        let core = manager.core.clone();
        if !core.cache.contains(index.index()) {
            match core.backend.lock().read_object(index.index())? {
                Some((payload, refs)) => {
                    let value = T::decode(&payload, &refs)?;
                    core.cache.install(index.index(), value);
                }
                None => {
                    // Durably write the fresh value through its own
                    // transaction rather than leaving it in the dirty set:
                    // callers construct containers outside any transaction
                    // scope, and a lingering dirty entry would trip
                    // `BlockCache::after_begin`'s leftover-transaction check
                    // on whatever transaction they open next.
                    let value = init();
                    manager.transaction(|_| {
                        core.cache.set(index.index(), value);
                        Ok(())
                    })?;
                }
            }
        }
        Ok(Self {
            _guard: manager.handle_counter().guard(),
            core,
            index,
            _marker: PhantomData,
        })
    }

    /// Allocates a fresh block and installs `value` as its (dirty) content.
    pub fn new_block(manager: &BlockManager, value: T) -> Result<Self> {
        let index = manager.allocate_index()?;
        let core = manager.core.clone();
        core.cache.set(index.index(), value);
        Ok(Self {
            _guard: manager.handle_counter().guard(),
            core,
            index,
            _marker: PhantomData,
        })
    }

    pub fn block_ref(&self) -> BlockRef {
        self.index
    }

    pub fn get(&self) -> T {
        self.core
            .cache
            .get::<T>(self.index.index())
            .expect("handle invariant: entry materialized for the lifetime of the handle")
    }

    pub fn set(&self, value: T) {
        self.core.cache.set(self.index.index(), value);
    }

    pub fn update(&self, f: impl FnOnce(&mut T)) -> Result<T> {
        self.core.cache.update(self.index.index(), f)
    }
}

impl<T> Clone for BlockHandle<T> {
    fn clone(&self) -> Self {
        Self {
            core: self.core.clone(),
            index: self.index,
            _guard: self._guard.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T> LazyHandle<T>
where
    T: Layout + Clone + Send + 'static,
{
    /// Wraps `index` without reading it back yet; `get` materializes lazily.
    pub fn existing(manager: &BlockManager, index: BlockRef) -> Self {
        Self {
            core: manager.core.clone(),
            index,
            _guard: manager.handle_counter().guard(),
            _marker: PhantomData,
        }
    }

    pub fn block_ref(&self) -> BlockRef {
        self.index
    }

    pub fn get(&self) -> Result<T> {
        if let Some(value) = self.core.cache.get::<T>(self.index.index()) {
            return Ok(value);
        }
        materialize(&self.core, self.index)?;
        Ok(self
            .core
            .cache
            .get::<T>(self.index.index())
            .expect("just materialized"))
    }

    pub fn set(&self, value: T) {
        self.core.cache.set(self.index.index(), value);
    }
}

impl<T> Clone for LazyHandle<T> {
    fn clone(&self) -> Self {
        Self {
            core: self.core.clone(),
            index: self.index,
            _guard: self._guard.clone(),
            _marker: PhantomData,
        }
    }
}

fn materialize<T>(core: &Arc<ManagerCore>, index: BlockRef) -> Result<()>
where
    T: Layout + Clone + Send + 'static,
{
    let (payload, refs) = core
        .backend
        .lock()
        .read_object(index.index())?
        .ok_or(crate::error::Error::Empty)?;
    let value = T::decode(&payload, &refs)?;
    core.cache.install(index.index(), value);
    Ok(())
}
