// Copyright 2019-2022 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use anyhow::Result;
use block_store::{BlockManager, Deque, List, RunToCompletion};
use criterion::{black_box, criterion_group, criterion_main, Criterion};

fn push_back_list(c: &mut Criterion) {
    push_back_list_inner(c).unwrap();
}

fn push_back_list_inner(c: &mut Criterion) -> Result<()> {
    const N: i64 = 1000;

    c.bench_function("list push_back x1000", |b| {
        b.iter(|| {
            let manager = BlockManager::open_in_memory().unwrap();
            let root = manager.root();
            let list: List<i64> = List::new(&manager, root).unwrap();
            manager
                .transaction(|_| {
                    for v in 0..N {
                        list.push_back(black_box(v))?;
                    }
                    Ok(())
                })
                .unwrap();
        })
    });
    Ok(())
}

fn chunked_deque_churn(c: &mut Criterion) {
    chunked_deque_churn_inner(c).unwrap();
}

fn chunked_deque_churn_inner(c: &mut Criterion) -> Result<()> {
    const N: i64 = 1000;

    c.bench_function("deque emplace_back/pop_front churn, k=32", |b| {
        b.iter(|| {
            let manager = BlockManager::open_in_memory().unwrap();
            let root = manager.root();
            let deque: Deque<i64> = Deque::new(&manager, root, 32).unwrap();
            manager
                .transaction(|_| {
                    for v in 0..N {
                        deque.emplace_back(black_box(v))?;
                    }
                    Ok(())
                })
                .unwrap();
            for _ in 0..N {
                deque.pop_front().unwrap();
            }
        })
    });
    Ok(())
}

/// Exercises a full Idle -> Scanning -> Sweeping -> Idle cycle over a
/// churned graph: half the blocks allocated each round are immediately
/// orphaned, so every cycle has real sweeping work to do.
fn gc_cycle_after_churn(c: &mut Criterion) {
    gc_cycle_after_churn_inner(c).unwrap();
}

fn gc_cycle_after_churn_inner(c: &mut Criterion) -> Result<()> {
    use block_store::layout::{decode_bincode, encode_bincode};
    use block_store::{BlockHandle, BlockRef, Layout};
    use serde::{Deserialize, Serialize};

    #[derive(Clone, Serialize, Deserialize, Default)]
    struct Node {
        children: Vec<BlockRef>,
    }

    impl Layout for Node {
        fn encode(&self) -> block_store::Result<(Vec<u8>, Vec<BlockRef>)> {
            Ok((encode_bincode(&self.children)?, self.children.clone()))
        }

        fn decode(payload: &[u8], _refs: &[BlockRef]) -> block_store::Result<Self> {
            Ok(Node {
                children: decode_bincode(payload)?,
            })
        }
    }

    const LIVE: usize = 200;
    const GARBAGE: usize = 200;

    c.bench_function("gc cycle over 200 live / 200 orphaned blocks", |b| {
        b.iter(|| {
            let manager = BlockManager::open_in_memory().unwrap();
            let root_ref = manager.root();
            manager
                .transaction(|_| {
                    let root = BlockHandle::<Node>::existing_or_init(&manager, root_ref, Node::default)?;
                    let mut live = Vec::with_capacity(LIVE);
                    for _ in 0..LIVE {
                        live.push(BlockHandle::new_block(&manager, Node::default())?.block_ref());
                    }
                    root.update(|n| n.children = live)?;
                    for _ in 0..GARBAGE {
                        // Allocated, then immediately unreferenced.
                        BlockHandle::new_block(&manager, Node::default())?;
                    }
                    Ok(())
                })
                .unwrap();

            let mut cb = RunToCompletion;
            manager.gc(black_box(&mut cb)).unwrap();
        })
    });
    Ok(())
}

criterion_group!(
    benches,
    push_back_list,
    chunked_deque_churn,
    gc_cycle_after_churn
);
criterion_main!(benches);
