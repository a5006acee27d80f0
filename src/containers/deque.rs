// Copyright 2019-2022 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Chunked double-ended deque: a doubly linked ring of nodes, each holding
//! up to `K` elements in an inline `Vec<T>`, with arbitrary-position
//! `emplace`/`erase` and a prev/next split policy for when a node is full.
//!
//! This uses one dedicated, permanently empty sentinel node rather than
//! overloading the head node as the sentinel. That makes `end()` uniformly
//! `(sentinel, 0)` whether the deque is empty or not, and lets
//! `advance`/`retreat` share one code path for every node including the
//! sentinel (see the doc comments on those methods).

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::marker::PhantomData;

use crate::error::{Error, Result};
use crate::handle::BlockHandle;
use crate::layout::{decode_bincode, encode_bincode, BlockRef, Layout};
use crate::manager::BlockManager;

#[derive(Clone)]
struct Node<T> {
    next: BlockRef,
    prev: BlockRef,
    data: Vec<T>,
}

impl<T: Serialize + DeserializeOwned + Clone> Layout for Node<T> {
    fn encode(&self) -> Result<(Vec<u8>, Vec<BlockRef>)> {
        let payload = encode_bincode(&(self.next, self.prev, &self.data))?;
        Ok((payload, vec![self.next, self.prev]))
    }

    fn decode(payload: &[u8], _refs: &[BlockRef]) -> Result<Self> {
        let (next, prev, data): (BlockRef, BlockRef, Vec<T>) = decode_bincode(payload)?;
        Ok(Node { next, prev, data })
    }
}

/// Computes the per-node capacity `K` for element type `T`, given a
/// representative `sample` value and the store's `payload_limit`.
/// Variable-length `T` should instead size nodes by a soft byte budget;
/// this helper serves the common fixed-shape-`T` case.
pub fn capacity_for<T: Serialize>(payload_limit: usize, sample: &T) -> Result<usize> {
    let elem_size = bincode::serialized_size(sample)
        .map_err(|e| Error::Other(format!("failed to size deque element: {e}")))? as usize;
    let overhead = 2 * std::mem::size_of::<u64>() + std::mem::size_of::<u64>();
    if elem_size == 0 || payload_limit <= overhead {
        return Ok(0);
    }
    Ok((payload_limit - overhead) / elem_size)
}

/// A persistent chunked deque rooted at a fixed sentinel block. `k <= 1`
/// degenerates to one element per node, behaving like a plain list for the
/// same `T` (spec B4).
pub struct Deque<T> {
    manager: BlockManager,
    root: BlockHandle<Node<T>>,
    k: usize,
    _marker: PhantomData<T>,
}

impl<T> Clone for Deque<T> {
    fn clone(&self) -> Self {
        Self {
            manager: self.manager.clone(),
            root: self.root.clone(),
            k: self.k,
            _marker: PhantomData,
        }
    }
}

impl<T> Deque<T>
where
    T: Serialize + DeserializeOwned + Clone + Send + 'static,
{
    pub fn new(manager: &BlockManager, root: BlockRef, k: usize) -> Result<Self> {
        let k = k.max(1);
        let root = BlockHandle::existing_or_init(manager, root, || Node {
            next: root,
            prev: root,
            data: Vec::new(),
        })?;
        Ok(Self {
            manager: manager.clone(),
            root,
            k,
            _marker: PhantomData,
        })
    }

    pub fn root_ref(&self) -> BlockRef {
        self.root.block_ref()
    }

    pub fn capacity(&self) -> usize {
        self.k
    }

    pub fn is_empty(&self) -> bool {
        self.root.get().next == self.root.block_ref()
    }

    pub fn begin(&self) -> DequeCursor<T> {
        if self.is_empty() {
            self.end()
        } else {
            DequeCursor {
                deque: self.clone(),
                curr: self.root.get().next,
                intra: 0,
            }
        }
    }

    pub fn end(&self) -> DequeCursor<T> {
        DequeCursor {
            deque: self.clone(),
            curr: self.root.block_ref(),
            intra: 0,
        }
    }

    pub fn clear(&self) -> Result<()> {
        if self.is_empty() {
            return Ok(());
        }
        let root_ref = self.root.block_ref();
        self.manager.transaction(|_| {
            self.root.set(Node {
                next: root_ref,
                prev: root_ref,
                data: Vec::new(),
            });
            Ok(())
        })
    }

    fn node(&self, at: BlockRef) -> Result<BlockHandle<Node<T>>> {
        BlockHandle::existing(&self.manager, at)
    }

    pub fn emplace_back(&self, value: T) -> Result<DequeCursor<T>> {
        self.manager.transaction(|_| {
            let tail_ref = self.root.get().prev;
            if tail_ref == self.root.block_ref() {
                let new_node = BlockHandle::new_block(
                    &self.manager,
                    Node {
                        next: self.root.block_ref(),
                        prev: self.root.block_ref(),
                        data: vec![value],
                    },
                )?;
                self.root.update(|s| {
                    s.next = new_node.block_ref();
                    s.prev = new_node.block_ref();
                })?;
                return Ok(DequeCursor {
                    deque: self.clone(),
                    curr: new_node.block_ref(),
                    intra: 0,
                });
            }
            let tail = self.node(tail_ref)?;
            if tail.get().data.len() < self.k {
                let updated = tail.update(|n| n.data.push(value.clone()))?;
                Ok(DequeCursor {
                    deque: self.clone(),
                    curr: tail_ref,
                    intra: updated.data.len() - 1,
                })
            } else {
                let new_node = BlockHandle::new_block(
                    &self.manager,
                    Node {
                        next: self.root.block_ref(),
                        prev: tail_ref,
                        data: vec![value],
                    },
                )?;
                tail.update(|n| n.next = new_node.block_ref())?;
                self.root.update(|s| s.prev = new_node.block_ref())?;
                Ok(DequeCursor {
                    deque: self.clone(),
                    curr: new_node.block_ref(),
                    intra: 0,
                })
            }
        })
    }

    pub fn emplace_front(&self, value: T) -> Result<DequeCursor<T>> {
        self.manager.transaction(|_| {
            let head_ref = self.root.get().next;
            if head_ref == self.root.block_ref() {
                let new_node = BlockHandle::new_block(
                    &self.manager,
                    Node {
                        next: self.root.block_ref(),
                        prev: self.root.block_ref(),
                        data: vec![value],
                    },
                )?;
                self.root.update(|s| {
                    s.next = new_node.block_ref();
                    s.prev = new_node.block_ref();
                })?;
                return Ok(DequeCursor {
                    deque: self.clone(),
                    curr: new_node.block_ref(),
                    intra: 0,
                });
            }
            let head = self.node(head_ref)?;
            if head.get().data.len() < self.k {
                head.update(|n| n.data.insert(0, value.clone()))?;
                Ok(DequeCursor {
                    deque: self.clone(),
                    curr: head_ref,
                    intra: 0,
                })
            } else {
                let new_node = BlockHandle::new_block(
                    &self.manager,
                    Node {
                        next: head_ref,
                        prev: self.root.block_ref(),
                        data: vec![value],
                    },
                )?;
                head.update(|n| n.prev = new_node.block_ref())?;
                self.root.update(|s| s.next = new_node.block_ref())?;
                Ok(DequeCursor {
                    deque: self.clone(),
                    curr: new_node.block_ref(),
                    intra: 0,
                })
            }
        })
    }

    /// Inserts `value` at `pos`. `pos == end()` behaves like `emplace_back`.
    /// Splits the node at `pos` under the prev/next policy when it is
    /// already at capacity.
    pub fn emplace(&self, pos: &DequeCursor<T>, value: T) -> Result<DequeCursor<T>> {
        if pos.curr == self.root.block_ref() {
            return self.emplace_back(value);
        }
        self.manager.transaction(|_| {
            let node = self.node(pos.curr)?;
            let len = node.get().data.len();
            if len < self.k {
                node.update(|n| n.data.insert(pos.intra, value.clone()))?;
                return Ok(DequeCursor {
                    deque: self.clone(),
                    curr: pos.curr,
                    intra: pos.intra,
                });
            }

            let half = self.k / 2;
            if pos.intra <= half {
                let data = node.get().data;
                let mut prev_data = data[..pos.intra].to_vec();
                prev_data.push(value.clone());
                let new_index = prev_data.len() - 1;
                let keep = data[pos.intra..].to_vec();
                let prev_ref_old = node.get().prev;

                let new_prev = BlockHandle::new_block(
                    &self.manager,
                    Node {
                        next: pos.curr,
                        prev: prev_ref_old,
                        data: prev_data,
                    },
                )?;
                if prev_ref_old == self.root.block_ref() {
                    self.root.update(|s| s.next = new_prev.block_ref())?;
                } else {
                    self.node(prev_ref_old)?.update(|n| n.next = new_prev.block_ref())?;
                }
                node.update(|n| {
                    n.data = keep.clone();
                    n.prev = new_prev.block_ref();
                })?;
                Ok(DequeCursor {
                    deque: self.clone(),
                    curr: new_prev.block_ref(),
                    intra: new_index,
                })
            } else {
                let data = node.get().data;
                let mut next_data = vec![value.clone()];
                next_data.extend_from_slice(&data[pos.intra..]);
                let truncated = data[..pos.intra].to_vec();
                let next_ref_old = node.get().next;

                let new_next = BlockHandle::new_block(
                    &self.manager,
                    Node {
                        next: next_ref_old,
                        prev: pos.curr,
                        data: next_data,
                    },
                )?;
                if next_ref_old == self.root.block_ref() {
                    self.root.update(|s| s.prev = new_next.block_ref())?;
                } else {
                    self.node(next_ref_old)?.update(|n| n.prev = new_next.block_ref())?;
                }
                node.update(|n| {
                    n.data = truncated.clone();
                    n.next = new_next.block_ref();
                })?;
                Ok(DequeCursor {
                    deque: self.clone(),
                    curr: new_next.block_ref(),
                    intra: 0,
                })
            }
        })
    }

    /// Removes the element at `pos`, returning a cursor at the following
    /// element.
    pub fn erase(&self, pos: &DequeCursor<T>) -> Result<DequeCursor<T>> {
        if pos.curr == self.root.block_ref() {
            return Err(Error::OutOfRange);
        }
        self.manager.transaction(|_| {
            let node = self.node(pos.curr)?;
            let len = node.get().data.len();
            if len > 1 {
                node.update(|n| {
                    n.data.remove(pos.intra);
                })?;
                if pos.intra == len - 1 {
                    let next_ref = node.get().next;
                    return Ok(DequeCursor {
                        deque: self.clone(),
                        curr: next_ref,
                        intra: 0,
                    });
                }
                return Ok(DequeCursor {
                    deque: self.clone(),
                    curr: pos.curr,
                    intra: pos.intra,
                });
            }

            let (next_ref, prev_ref) = {
                let n = node.get();
                (n.next, n.prev)
            };
            if prev_ref == self.root.block_ref() && next_ref == self.root.block_ref() {
                node.update(|n| n.data.clear())?;
                return Ok(DequeCursor {
                    deque: self.clone(),
                    curr: pos.curr,
                    intra: 0,
                });
            }
            if prev_ref == self.root.block_ref() {
                self.root.update(|s| s.next = next_ref)?;
            } else {
                self.node(prev_ref)?.update(|n| n.next = next_ref)?;
            }
            if next_ref == self.root.block_ref() {
                self.root.update(|s| s.prev = prev_ref)?;
            } else {
                self.node(next_ref)?.update(|n| n.prev = prev_ref)?;
            }
            Ok(DequeCursor {
                deque: self.clone(),
                curr: next_ref,
                intra: 0,
            })
        })
    }

    pub fn pop_front(&self) -> Result<T> {
        if self.is_empty() {
            return Err(Error::Empty);
        }
        let cur = self.begin();
        let value = cur.get()?;
        self.erase(&cur)?;
        Ok(value)
    }

    pub fn pop_back(&self) -> Result<T> {
        if self.is_empty() {
            return Err(Error::Empty);
        }
        let mut cur = self.end();
        cur.retreat()?;
        let value = cur.get()?;
        self.erase(&cur)?;
        Ok(value)
    }
}

/// A `(node, intra_index)` bidirectional cursor over a [`Deque`].
pub struct DequeCursor<T> {
    deque: Deque<T>,
    curr: BlockRef,
    intra: usize,
}

impl<T> Clone for DequeCursor<T> {
    fn clone(&self) -> Self {
        Self {
            deque: self.deque.clone(),
            curr: self.curr,
            intra: self.intra,
        }
    }
}

impl<T> PartialEq for DequeCursor<T> {
    fn eq(&self, other: &Self) -> bool {
        self.curr == other.curr && self.intra == other.intra
    }
}

impl<T> DequeCursor<T>
where
    T: Serialize + DeserializeOwned + Clone + Send + 'static,
{
    pub fn block_ref(&self) -> BlockRef {
        self.curr
    }

    pub fn intra_index(&self) -> usize {
        self.intra
    }

    pub fn get(&self) -> Result<T> {
        let node = self.deque.node(self.curr)?;
        node.get().data.get(self.intra).cloned().ok_or(Error::OutOfRange)
    }

    /// Advances one slot. On the last slot of a node, moves to `(node.next,
    /// 0)`, which is the sentinel, and thus `end()`, exactly when the
    /// current node was the tail.
    pub fn advance(&mut self) -> Result<()> {
        let node = self.deque.node(self.curr)?;
        let data = node.get();
        if self.intra >= data.data.len() {
            return Err(Error::OutOfRange);
        }
        self.intra += 1;
        if self.intra == data.data.len() {
            self.curr = data.next;
            self.intra = 0;
        }
        Ok(())
    }

    /// Decrements, sharing one code path for every starting node including
    /// the sentinel: the sentinel's own `prev` field is meaningful (it's the
    /// tail node, or itself when the deque is empty), so no special case is
    /// needed for `end()` vs. a real node.
    pub fn retreat(&mut self) -> Result<()> {
        if self.intra == 0 {
            let node = self.deque.node(self.curr)?;
            let prev_ref = node.get().prev;
            if prev_ref == self.deque.root.block_ref() {
                return Err(Error::OutOfRange);
            }
            let prev_node = self.deque.node(prev_ref)?;
            self.intra = prev_node.get().data.len();
            self.curr = prev_ref;
        }
        self.intra -= 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manager::BlockManager;

    fn open(k: usize) -> (BlockManager, BlockRef, usize) {
        let manager = BlockManager::open_in_memory().unwrap();
        let root = manager.root();
        (manager, root, k)
    }

    fn collect(deque: &Deque<i32>) -> Vec<i32> {
        let mut cur = deque.begin();
        let mut out = Vec::new();
        while cur != deque.end() {
            out.push(cur.get().unwrap());
            cur.advance().unwrap();
        }
        out
    }

    #[test]
    fn chunked_split_matches_scenario() {
        let (manager, root, k) = open(4);
        let deque: Deque<i32> = Deque::new(&manager, root, k).unwrap();
        manager
            .transaction(|_| {
                for v in 1..=8 {
                    deque.emplace_back(v)?;
                }
                Ok(())
            })
            .unwrap();
        assert_eq!(collect(&deque), (1..=8).collect::<Vec<_>>());

        let mut pos = deque.begin();
        pos.advance().unwrap();
        pos.advance().unwrap();
        deque.emplace(&pos, 99).unwrap();

        assert_eq!(collect(&deque), vec![1, 2, 99, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn k_le_1_behaves_like_a_list() {
        let (manager, root, _) = open(1);
        let deque: Deque<i32> = Deque::new(&manager, root, 1).unwrap();
        deque.emplace_back(1).unwrap();
        deque.emplace_back(2).unwrap();
        deque.emplace_front(0).unwrap();
        assert_eq!(collect(&deque), vec![0, 1, 2]);
        assert_eq!(deque.pop_back().unwrap(), 2);
        assert_eq!(deque.pop_front().unwrap(), 0);
    }

    #[test]
    fn pop_on_empty_is_error() {
        let (manager, root, k) = open(4);
        let deque: Deque<i32> = Deque::new(&manager, root, k).unwrap();
        assert!(matches!(deque.pop_front(), Err(Error::Empty)));
        assert!(matches!(deque.pop_back(), Err(Error::Empty)));
    }

    #[test]
    fn begin_end_reverse_symmetry() {
        let (manager, root, k) = open(3);
        let deque: Deque<i32> = Deque::new(&manager, root, k).unwrap();
        for v in 0..10 {
            deque.emplace_back(v).unwrap();
        }
        let forward = collect(&deque);
        let mut reversed = Vec::new();
        let mut cur = deque.end();
        while cur != deque.begin() {
            cur.retreat().unwrap();
            reversed.push(cur.get().unwrap());
        }
        reversed.reverse();
        assert_eq!(forward, reversed);
    }
}
