// Copyright 2019-2022 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Randomized block-graph churn interleaved with incremental GC cycles,
//! grounded on `examples/original_source/Test/graph_test.cpp`'s
//! `std::mt19937`-driven random-operation harness (open/close tab,
//! create/open/delete child, copy/paste via a clipboard) and spec.md §8
//! scenario 6. Reachability is independently recomputed by walking the
//! final graph from root and checked against `object_count()` after every
//! full GC cycle, the same round-trip invariant `graph_test.cpp` itself
//! checks (there, interactively, via its `print()`/`gc` command loop).

use std::collections::{HashSet, VecDeque};

use block_store::layout::{decode_bincode, encode_bincode};
use block_store::{
    BlockHandle, BlockManager, BlockRef, Layout, Result, RunToCompletion, StoreConfig,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

/// A tab: a list of child refs, mirroring `graph_test.cpp`'s `Item` node
/// (its `text` field is dropped here since these tests only care about
/// reachability, not payload content).
#[derive(Clone, Serialize, Deserialize, Default)]
struct Item {
    children: Vec<BlockRef>,
}

impl Layout for Item {
    fn encode(&self) -> Result<(Vec<u8>, Vec<BlockRef>)> {
        Ok((encode_bincode(&self.children)?, self.children.clone()))
    }

    fn decode(payload: &[u8], _refs: &[BlockRef]) -> Result<Self> {
        Ok(Item {
            children: decode_bincode(payload)?,
        })
    }
}

/// Drives the same seven random operations as `graph_test.cpp`'s
/// `Test::operation` table against a live `BlockManager`, tracking open
/// tabs and a clipboard the way the original does.
struct Harness {
    manager: BlockManager,
    root: BlockRef,
    tabs: Vec<BlockRef>,
    focus: BlockRef,
    clipboard: Vec<BlockRef>,
    rng: StdRng,
}

impl Harness {
    fn new(manager: BlockManager, seed: u64) -> Self {
        let root = manager.root();
        drop(BlockHandle::<Item>::existing_or_init(&manager, root, Item::default).unwrap());
        Harness {
            manager,
            root,
            tabs: vec![root],
            focus: root,
            clipboard: Vec::new(),
            rng: StdRng::seed_from_u64(seed),
        }
    }

    fn focus_children(&self) -> Vec<BlockRef> {
        BlockHandle::<Item>::existing(&self.manager, self.focus)
            .unwrap()
            .get()
            .children
    }

    fn open_random_tab(&mut self) {
        let idx = self.rng.gen_range(0..self.tabs.len());
        self.focus = self.tabs[idx];
    }

    fn close_random_tab(&mut self) {
        if self.tabs.len() <= 1 {
            return;
        }
        let idx = self.rng.gen_range(0..self.tabs.len());
        let closed = self.tabs[idx];
        if closed == self.root {
            return;
        }
        let was_focus = closed == self.focus;
        self.tabs.remove(idx);
        if was_focus {
            self.open_random_tab();
        }
    }

    fn create_random_child(&mut self) {
        let focus = self.focus;
        let manager = self.manager.clone();
        manager
            .transaction(|_| {
                let node = BlockHandle::<Item>::existing(&manager, focus)?;
                let child = BlockHandle::new_block(&manager, Item::default())?;
                node.update(|n| n.children.push(child.block_ref()))?;
                Ok(())
            })
            .unwrap();
    }

    fn open_random_child(&mut self) {
        let children = self.focus_children();
        if children.is_empty() {
            return;
        }
        let idx = self.rng.gen_range(0..children.len());
        self.tabs.push(children[idx]);
    }

    fn delete_random_child(&mut self) {
        let children = self.focus_children();
        if children.is_empty() {
            return;
        }
        let idx = self.rng.gen_range(0..children.len());
        let focus = self.focus;
        let manager = self.manager.clone();
        manager
            .transaction(|_| {
                BlockHandle::<Item>::existing(&manager, focus)?.update(|n| {
                    n.children.remove(idx);
                })?;
                Ok(())
            })
            .unwrap();
    }

    fn copy_random_child(&mut self) {
        let children = self.focus_children();
        if children.is_empty() {
            return;
        }
        let idx = self.rng.gen_range(0..children.len());
        self.clipboard.push(children[idx]);
    }

    fn paste_random(&mut self) {
        if self.clipboard.is_empty() {
            return;
        }
        let idx = self.rng.gen_range(0..self.clipboard.len());
        let pasted = self.clipboard.remove(idx);
        let focus = self.focus;
        let manager = self.manager.clone();
        manager
            .transaction(|_| {
                BlockHandle::<Item>::existing(&manager, focus)?
                    .update(|n| n.children.push(pasted))?;
                Ok(())
            })
            .unwrap();
    }

    fn random_operation(&mut self) {
        match self.rng.gen_range(0..7) {
            0 => self.open_random_tab(),
            1 => self.close_random_tab(),
            2 => self.create_random_child(),
            3 => self.open_random_child(),
            4 => self.delete_random_child(),
            5 => self.copy_random_child(),
            _ => self.paste_random(),
        }
    }

    /// Walks the graph from root independent of the cache, following
    /// persisted `children` refs breadth-first, and returns the set of
    /// reachable block ids. The harness keeps no live `BlockHandle`s
    /// between operations (only `BlockRef`s in `tabs`/`clipboard`), so this
    /// matches exactly what a completed GC cycle should retain.
    fn reachable_from_root(&self) -> HashSet<u64> {
        let mut seen = HashSet::new();
        let mut queue = VecDeque::new();
        queue.push_back(self.root);
        seen.insert(self.root.index());
        while let Some(idx) = queue.pop_front() {
            let (_, refs) = self.manager.read(idx).unwrap().unwrap();
            for r in refs {
                if seen.insert(r.index()) {
                    queue.push_back(r);
                }
            }
        }
        seen
    }
}

fn deterministic_config() -> StoreConfig {
    StoreConfig {
        allocation_batch_size: 4,
        scan_step_depth: 4,
        scan_batch_size: 4,
        sweep_batch_size: 64,
        ..StoreConfig::default()
    }
}

#[test]
fn random_churn_then_full_gc_matches_independent_reachability_walk() {
    let manager = BlockManager::open_in_memory_with_config(deterministic_config()).unwrap();
    let mut harness = Harness::new(manager.clone(), 0xC0FFEE);

    for _ in 0..500 {
        harness.random_operation();
    }

    let expected = harness.reachable_from_root();

    let mut cb = RunToCompletion;
    manager.gc(&mut cb).unwrap();
    assert_eq!(
        manager.gc_info().phase,
        block_store::metadata::GcPhase::Idle
    );

    assert_eq!(manager.object_count().unwrap(), expected.len() as u64);
}

#[test]
fn repeated_churn_and_gc_cycles_never_lose_the_root() {
    let manager = BlockManager::open_in_memory_with_config(deterministic_config()).unwrap();
    let mut harness = Harness::new(manager.clone(), 42);

    for cycle in 0..5 {
        for _ in 0..100 {
            harness.random_operation();
        }
        let expected = harness.reachable_from_root();

        let mut cb = RunToCompletion;
        manager.gc(&mut cb).unwrap();
        assert_eq!(
            manager.gc_info().phase,
            block_store::metadata::GcPhase::Idle,
            "cycle {cycle} did not return to Idle"
        );
        assert_eq!(
            manager.object_count().unwrap(),
            expected.len() as u64,
            "cycle {cycle} left unreachable blocks behind"
        );
        assert!(manager.read(harness.root).unwrap().is_some());

        harness.tabs.retain(|r| expected.contains(&r.index()));
        if harness.tabs.is_empty() {
            harness.tabs.push(harness.root);
        }
        harness.clipboard.retain(|r| expected.contains(&r.index()));
        if !expected.contains(&harness.focus.index()) {
            harness.focus = harness.root;
        }
    }
}
