// Copyright 2019-2022 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Incremental tricolor mark-and-sweep GC: the block manager's
//! Idle/Scanning/Sweeping state machine. `interrupt` is polled between
//! every batch transaction and yields the call when it returns `true`.

use crate::cache::HandleCounter;
use crate::error::Result;
use crate::manager::ManagerCore;
use crate::metadata::GcPhase;

/// A point-in-time snapshot of the GC state, returned by `gc_info()` and
/// handed to [`GcCallback`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GcInfo {
    pub phase: GcPhase,
    pub gc_mark: bool,
    pub block_count_prev: u64,
    pub block_count: u64,
    pub block_count_marked: u64,
    pub max_index: u64,
    pub sweep_index: u64,
}

impl From<&crate::metadata::Metadata> for GcInfo {
    fn from(m: &crate::metadata::Metadata) -> Self {
        GcInfo {
            phase: m.gc_phase,
            gc_mark: m.gc_mark,
            block_count_prev: m.block_count_prev,
            block_count: m.block_count,
            block_count_marked: m.block_count_marked,
            max_index: m.max_index,
            sweep_index: m.sweep_index,
        }
    }
}

/// Observer/driver for a running GC cycle.
pub trait GcCallback {
    /// Fired at every phase boundary (Idle→Scanning, Scanning→Sweeping,
    /// Sweeping→Idle).
    fn notify(&mut self, info: &GcInfo);
    /// Polled between batch transactions; return `true` to yield control
    /// back to the caller (the GC resumes on the next `gc()` call).
    fn interrupt(&mut self, info: &GcInfo) -> bool;
}

/// A callback that never interrupts, running a cycle to completion (or
/// until it's blocked by outstanding handles) in a single `gc()` call.
#[derive(Default)]
pub struct RunToCompletion;

impl GcCallback for RunToCompletion {
    fn notify(&mut self, _info: &GcInfo) {}
    fn interrupt(&mut self, _info: &GcInfo) -> bool {
        false
    }
}

impl ManagerCore {
    pub(crate) fn gc_step(&self, callback: &mut dyn GcCallback, handles: HandleCounter) -> Result<()> {
        loop {
            let phase = self.metadata.lock().gc_phase;
            match phase {
                GcPhase::Idle => {
                    self.gc_begin_scanning()?;
                    callback.notify(&self.gc_info());
                }
                GcPhase::Scanning => {
                    let scan_exhausted = self.gc_scan_batch()?;
                    if scan_exhausted {
                        if self.gc_try_finish_scanning(&handles)? {
                            callback.notify(&self.gc_info());
                        } else {
                            // Live handles still outstanding; caller retries later.
                            return Ok(());
                        }
                    } else if callback.interrupt(&self.gc_info()) {
                        return Ok(());
                    }
                }
                GcPhase::Sweeping => {
                    let done = self.gc_sweep_batch()?;
                    if done {
                        callback.notify(&self.gc_info());
                        return Ok(());
                    } else if callback.interrupt(&self.gc_info()) {
                        return Ok(());
                    }
                }
            }
        }
    }

    fn gc_info(&self) -> GcInfo {
        GcInfo::from(&*self.metadata.lock())
    }

    /// Idle → Scanning, in its own transaction.
    fn gc_begin_scanning(&self) -> Result<()> {
        let backend = self.backend.lock();
        backend.begin()?;
        let result: Result<()> = (|| {
            let mut metadata = *self.metadata.lock();
            backend.scan_insert(metadata.root_index)?;
            metadata.block_count = backend.object_count()?;
            metadata.block_count_marked = 0;
            metadata.gc_phase = GcPhase::Scanning;
            backend.write_metadata(metadata)?;
            *self.metadata.lock() = metadata;
            Ok(())
        })();
        match result {
            Ok(()) => backend.commit(),
            Err(e) => {
                backend.rollback().ok();
                Err(e)
            }
        }
    }

    /// One Scanning sub-batch, in its own transaction. Returns `true` once
    /// the SCAN queue has been drained (the phase is ready to finalize).
    ///
    /// Every block, live or dead, is born this cycle carrying `gc_mark` (the
    /// cycle's default/unscanned color; the Sweeping allocator flips this,
    /// see `refill_allocator`). Visiting a SCAN row recolors it away from
    /// `gc_mark` to `!gc_mark`, marking it reached; rows already at
    /// `!gc_mark` are skipped. Whatever is still at `gc_mark` once the
    /// queue drains was never reached and is what Sweeping deletes.
    fn gc_scan_batch(&self) -> Result<bool> {
        let (scan_batch_size, scan_batch_limit, scan_changes_limit) = {
            let cfg = &self.config;
            (cfg.scan_batch_size, cfg.scan_step_depth, cfg.scan_changes_limit)
        };
        let gc_mark = self.metadata.lock().gc_mark;

        let backend = self.backend.lock();
        backend.begin()?;
        let result: Result<bool> = (|| {
            let mut changes = 0u64;
            let mut exhausted = false;
            for _ in 0..scan_batch_limit {
                if changes >= scan_changes_limit {
                    break;
                }
                if backend.scan_count()? == 0 {
                    exhausted = true;
                    break;
                }
                let ref_lists = backend.scan_recolor_batch(!gc_mark, gc_mark, scan_batch_size)?;
                changes += ref_lists.len() as u64;
                for refs in &ref_lists {
                    for r in refs {
                        backend.scan_insert(r.index())?;
                    }
                }
            }
            if changes > 0 {
                let mut metadata = self.metadata.lock();
                metadata.block_count_marked += changes;
            }
            Ok(exhausted)
        })();
        match result {
            Ok(exhausted) => {
                backend.commit()?;
                #[cfg(feature = "metrics")]
                crate::metrics::GC_SCAN_BATCHES_TOTAL.inc();
                Ok(exhausted)
            }
            Err(e) => {
                backend.rollback().ok();
                Err(e)
            }
        }
    }

    /// Scanning → Sweeping, gated on the live-handle count. Returns `false`
    /// (without transitioning) while handles remain live.
    fn gc_try_finish_scanning(&self, handles: &HandleCounter) -> Result<bool> {
        if handles.count() > 0 {
            return Ok(false);
        }
        let backend = self.backend.lock();
        backend.begin()?;
        let result: Result<()> = (|| {
            self.cache.clear()?;
            let mut metadata = *self.metadata.lock();
            metadata.max_index = backend.max_object_id()?;
            metadata.sweep_index = 0;
            metadata.gc_phase = GcPhase::Sweeping;
            backend.write_metadata(metadata)?;
            *self.metadata.lock() = metadata;
            Ok(())
        })();
        match result {
            Ok(()) => {
                backend.commit()?;
                self.clear_allocator_batch();
                Ok(true)
            }
            Err(e) => {
                backend.rollback().ok();
                Err(e)
            }
        }
    }

    /// One Sweeping batch, in its own transaction. Returns `true` once the
    /// sweep cursor has passed `max_index` and the cycle has flipped back
    /// to Idle.
    fn gc_sweep_batch(&self) -> Result<bool> {
        let sweep_batch_size = self.config.sweep_batch_size;
        let backend = self.backend.lock();
        backend.begin()?;
        let result: Result<bool> = (|| {
            let mut metadata = *self.metadata.lock();
            let next = backend.next_sweep_boundary(metadata.sweep_index, sweep_batch_size)?;
            backend.delete_dead_range(metadata.sweep_index, next, metadata.gc_mark)?;
            metadata.sweep_index = next;
            let finished = metadata.sweep_index > metadata.max_index;
            if finished {
                metadata.gc_mark = !metadata.gc_mark;
                metadata.gc_phase = GcPhase::Idle;
                metadata.block_count_prev = backend.object_count()?;
                metadata.block_count = 0;
                metadata.block_count_marked = 0;
            }
            backend.write_metadata(metadata)?;
            *self.metadata.lock() = metadata;
            Ok(finished)
        })();
        match result {
            Ok(finished) => {
                backend.commit()?;
                #[cfg(feature = "metrics")]
                {
                    crate::metrics::GC_SWEEP_BATCHES_TOTAL.inc();
                    crate::metrics::GC_BLOCK_COUNT.set(self.metadata.lock().block_count as i64);
                }
                Ok(finished)
            }
            Err(e) => {
                backend.rollback().ok();
                Err(e)
            }
        }
    }
}

#[allow(dead_code)]
fn _assert_send_sync() {
    fn assert_send_sync<T: Send + Sync>() {}
    assert_send_sync::<GcInfo>();
}
