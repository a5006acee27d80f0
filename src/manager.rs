// Copyright 2019-2022 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Block manager: allocates indices, reads/writes block payloads, and
//! exposes the single user-facing transaction primitive.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::backend::Backend;
use crate::cache::{BlockCache, HandleCounter};
use crate::config::StoreConfig;
use crate::error::{Error, Result};
use crate::gc::GcInfo;
use crate::layout::BlockRef;
use crate::metadata::{GcPhase, Metadata};

/// Shared state behind every clone of a [`BlockManager`] and every
/// container / handle built on top of it.
pub(crate) struct ManagerCore {
    pub(crate) backend: Mutex<Backend>,
    pub(crate) cache: BlockCache,
    pub(crate) metadata: Mutex<Metadata>,
    pub(crate) config: StoreConfig,
    allocator: Mutex<Vec<u64>>,
    /// Depth of the flattened transaction nesting.
    nesting: AtomicUsize,
}

/// The block manager. Cheap to clone; every clone shares the same
/// underlying file, cache, and allocator state.
#[derive(Clone)]
pub struct BlockManager {
    pub(crate) core: Arc<ManagerCore>,
}

impl BlockManager {
    /// Opens (creating if necessary) the block store at `path`.
    pub fn open_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with_config(path, StoreConfig::default())
    }

    pub fn open_with_config<P: AsRef<Path>>(path: P, config: StoreConfig) -> Result<Self> {
        let backend = Backend::open(path)?;
        Self::from_backend(backend, config)
    }

    /// Opens an in-memory database; handy for tests.
    pub fn open_in_memory() -> Result<Self> {
        Self::from_backend(Backend::open_in_memory()?, StoreConfig::default())
    }

    /// Opens an in-memory database with a caller-supplied configuration;
    /// handy for tests exercising GC batch-size edge cases.
    pub fn open_in_memory_with_config(config: StoreConfig) -> Result<Self> {
        Self::from_backend(Backend::open_in_memory()?, config)
    }

    fn from_backend(backend: Backend, config: StoreConfig) -> Result<Self> {
        let metadata = if backend.schema_present()? {
            let metadata = backend.read_metadata()?;
            log::info!(
                "opened existing block store, root={} phase={:?}",
                metadata.root_index,
                metadata.gc_phase
            );
            metadata
        } else {
            log::info!("initializing fresh block store schema");
            backend.create_schema()?;
            backend.begin()?;
            let root_index = backend.insert_object(false)?;
            let metadata = Metadata::fresh(root_index);
            backend.insert_metadata(metadata)?;
            backend.commit()?;
            metadata
        };

        Ok(Self {
            core: Arc::new(ManagerCore {
                backend: Mutex::new(backend),
                cache: BlockCache::default(),
                metadata: Mutex::new(metadata),
                config,
                allocator: Mutex::new(Vec::new()),
                nesting: AtomicUsize::new(0),
            }),
        })
    }

    pub fn root(&self) -> BlockRef {
        BlockRef(self.core.metadata.lock().root_index)
    }

    /// Overrides the persisted root index. Kept for tests; does not change
    /// the on-disk schema.
    #[cfg(test)]
    pub(crate) fn set_root(&self, root: BlockRef) -> Result<()> {
        let mut metadata = self.core.metadata.lock();
        metadata.root_index = root.0;
        self.core.backend.lock().write_metadata(*metadata)?;
        Ok(())
    }

    pub(crate) fn handle_counter(&self) -> HandleCounter {
        self.core.cache.handle_counter()
    }

    pub(crate) fn cache(&self) -> &BlockCache {
        &self.core.cache
    }

    pub(crate) fn config(&self) -> &StoreConfig {
        &self.core.config
    }

    /// Runs `f` inside exactly one backing-store transaction. Re-entrant
    /// calls are flattened: only the outermost call issues BEGIN/COMMIT.
    pub fn transaction<R>(&self, f: impl FnOnce(&BlockManager) -> Result<R>) -> Result<R> {
        let depth = self.core.nesting.fetch_add(1, Ordering::AcqRel);
        let is_outer = depth == 0;

        if is_outer {
            self.core.backend.lock().begin()?;
            if let Err(e) = self.core.cache.after_begin() {
                self.core.backend.lock().rollback().ok();
                self.core.nesting.store(0, Ordering::Release);
                return Err(e);
            }
        }

        let result = f(self);

        if !is_outer {
            self.core.nesting.fetch_sub(1, Ordering::AcqRel);
            return result;
        }

        let outcome = match result {
            Ok(value) => self
                .commit_dirty()
                .and_then(|_| self.core.backend.lock().commit())
                .map(|_| {
                    self.core.cache.after_commit();
                    value
                }),
            Err(e) => Err(e),
        };

        if outcome.is_err() {
            self.core.backend.lock().rollback().ok();
            self.core.cache.after_rollback();
        }

        self.core.nesting.store(0, Ordering::Release);
        outcome
    }

    fn commit_dirty(&self) -> Result<()> {
        let core = self.core.clone();
        self.core.cache.before_commit(move |idx, payload, refs| {
            core.write_through(idx, &payload, &refs)
        })
    }

    /// Allocates a fresh block index, batching empty-row insertions in a
    /// private transaction.
    pub fn allocate_index(&self) -> Result<BlockRef> {
        {
            let mut batch = self.core.allocator.lock();
            if let Some(idx) = batch.pop() {
                return Ok(BlockRef(idx));
            }
        }
        self.refill_allocator()?;
        let mut batch = self.core.allocator.lock();
        Ok(BlockRef(batch.pop().expect("refill must not leave batch empty")))
    }

    fn refill_allocator(&self) -> Result<()> {
        let gc_mark = {
            let metadata = self.core.metadata.lock();
            match metadata.gc_phase {
                GcPhase::Sweeping => !metadata.gc_mark,
                _ => metadata.gc_mark,
            }
        };
        let batch_size = self.core.config.allocation_batch_size;
        let backend = self.core.backend.lock();
        backend.begin()?;
        let mut fresh = Vec::with_capacity(batch_size);
        let result: Result<()> = (|| {
            for _ in 0..batch_size {
                fresh.push(backend.insert_object(gc_mark)?);
            }
            Ok(())
        })();
        match result {
            Ok(()) => {
                backend.commit()?;
                self.core.allocator.lock().extend(fresh);
                Ok(())
            }
            Err(e) => {
                backend.rollback().ok();
                Err(e)
            }
        }
    }

    pub fn read(&self, id: BlockRef) -> Result<Option<(Vec<u8>, Vec<BlockRef>)>> {
        self.core.backend.lock().read_object(id.index())
    }

    pub fn write(&self, id: BlockRef, payload: Vec<u8>, refs: Vec<BlockRef>) -> Result<()> {
        self.core.write_through(id.index(), &payload, &refs)
    }

    pub fn gc_info(&self) -> GcInfo {
        GcInfo::from(&*self.core.metadata.lock())
    }

    pub fn gc(&self, callback: &mut dyn crate::gc::GcCallback) -> Result<()> {
        self.core.gc_step(callback, self.handle_counter())
    }

    /// Number of rows currently in the `OBJECT` table. Exposed for tests
    /// verifying GC reclamation; not part of the steady-state application
    /// surface.
    pub fn object_count(&self) -> Result<u64> {
        self.core.backend.lock().object_count()
    }
}

impl ManagerCore {
    /// Drops every batched-but-unissued index. Called when Scanning finishes
    /// and the allocator flips to coloring new blocks with the opposite
    /// mark: a batch allocated under the old color cannot be reused.
    pub(crate) fn clear_allocator_batch(&self) {
        self.allocator.lock().clear();
    }

    /// Write-through used both by direct `BlockManager::write` calls and by
    /// the cache's `before_commit` hook. Observes the Scanning write
    /// barrier: if the block had already been scanned (its prior color is
    /// the opposite of the cycle's default/unscanned color), every new
    /// outbound ref is pushed onto the SCAN queue so a pointer installed
    /// into an already-black object is not missed this cycle.
    pub(crate) fn write_through(&self, id: u64, payload: &[u8], refs: &[BlockRef]) -> Result<()> {
        if payload.len() > self.config.payload_limit {
            return Err(Error::PayloadTooLarge {
                size: payload.len(),
                limit: self.config.payload_limit,
            });
        }
        #[cfg(feature = "metrics")]
        crate::metrics::BLOCK_WRITE_BYTES.observe(payload.len() as f64);

        let metadata = *self.metadata.lock();
        let backend = self.backend.lock();
        if metadata.gc_phase != GcPhase::Scanning {
            backend.update_object(id, payload, refs)?;
        } else {
            let prior_gc = backend.update_object_returning_prior_gc(id, payload, refs)?;
            if prior_gc != metadata.gc_mark {
                for r in refs {
                    backend.scan_insert(r.index())?;
                }
            }
        }
        Ok(())
    }
}
