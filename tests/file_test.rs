// Copyright 2019-2022 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Fresh-file open and GC bootstrap, grounded on
//! `examples/original_source/Test/file_test.cpp` and spec.md §8 scenario 1.

use block_store::{BlockManager, RunToCompletion};

#[test]
fn fresh_file_has_a_single_root_block() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("file_test.db");

    let manager = BlockManager::open_file(&path).unwrap();
    assert_eq!(manager.root().index(), 1);

    let info = manager.gc_info();
    assert_eq!(info.phase, block_store::metadata::GcPhase::Idle);
    assert_eq!(info.block_count_prev, 0);
}

#[test]
fn reopening_an_existing_file_preserves_the_persisted_root() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("file_test.db");

    let root = {
        let manager = BlockManager::open_file(&path).unwrap();
        manager.root()
    };

    let manager = BlockManager::open_file(&path).unwrap();
    assert_eq!(manager.root(), root);

    let mut cb = RunToCompletion;
    manager.gc(&mut cb).unwrap();
    assert_eq!(manager.gc_info().phase, block_store::metadata::GcPhase::Idle);
}
