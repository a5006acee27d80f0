// Copyright 2019-2022 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Doubly linked list, sentinel-circular: the root block is its own
//! terminator and an empty list has `sentinel.next == sentinel.prev ==
//! sentinel`.

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
    value: T,
}

impl<T: Serialize + DeserializeOwned + Clone> Layout for Node<T> {
    fn encode(&self) -> Result<(Vec<u8>, Vec<BlockRef>)> {
        let payload = encode_bincode(&(self.next, self.prev, &self.value))?;
        Ok((payload, vec![self.next, self.prev]))
    }

    fn decode(payload: &[u8], _refs: &[BlockRef]) -> Result<Self> {
        let (next, prev, value): (BlockRef, BlockRef, T) = decode_bincode(payload)?;
        Ok(Node { next, prev, value })
    }
}

#[derive(Clone)]
struct Sentinel {
    next: BlockRef,
    prev: BlockRef,
}

impl Layout for Sentinel {
    fn encode(&self) -> Result<(Vec<u8>, Vec<BlockRef>)> {
        let payload = encode_bincode(&(self.next, self.prev))?;
        Ok((payload, vec![self.next, self.prev]))
    }

    fn decode(payload: &[u8], _refs: &[BlockRef]) -> Result<Self> {
        let (next, prev): (BlockRef, BlockRef) = decode_bincode(payload)?;
        Ok(Sentinel { next, prev })
    }
}

/// A persistent doubly linked list rooted at a fixed sentinel block.
pub struct List<T> {
    manager: BlockManager,
    root: BlockHandle<Sentinel>,
    _marker: PhantomData<T>,
}

impl<T> Clone for List<T> {
    fn clone(&self) -> Self {
        Self {
            manager: self.manager.clone(),
            root: self.root.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T> List<T>
where
    T: Serialize + DeserializeOwned + Clone + Send + 'static,
{
    /// Opens a list rooted at `root`, initializing an empty sentinel the
    /// first time `root` is seen.
    pub fn new(manager: &BlockManager, root: BlockRef) -> Result<Self> {
        let root = BlockHandle::existing_or_init(manager, root, || Sentinel { next: root, prev: root })?;
        Ok(Self {
            manager: manager.clone(),
            root,
            _marker: PhantomData,
        })
    }

    pub fn root_ref(&self) -> BlockRef {
        self.root.block_ref()
    }

    pub fn is_empty(&self) -> bool {
        self.root.get().next == self.root.block_ref()
    }

    pub fn begin(&self) -> ListCursor<T> {
        ListCursor {
            list: self.clone(),
            curr: self.root.get().next,
        }
    }

    pub fn end(&self) -> ListCursor<T> {
        ListCursor {
            list: self.clone(),
            curr: self.root.block_ref(),
        }
    }

    pub fn front(&self) -> Result<T> {
        if self.is_empty() {
            return Err(Error::Empty);
        }
        self.begin().get()
    }

    pub fn back(&self) -> Result<T> {
        if self.is_empty() {
            return Err(Error::Empty);
        }
        let mut cur = self.end();
        cur.retreat()?;
        cur.get()
    }

    pub fn clear(&self) -> Result<()> {
        if self.is_empty() {
            return Ok(());
        }
        let root_ref = self.root.block_ref();
        self.manager.transaction(|_| {
            self.root.set(Sentinel {
                next: root_ref,
                prev: root_ref,
            });
            Ok(())
        })
    }

    /// Inserts `value` directly before `pos`, returning a cursor at the new
    /// element. `pos == end()` behaves like `push_back`; `pos == begin()`
    /// behaves like `push_front`.
    pub fn emplace(&self, pos: &ListCursor<T>, value: T) -> Result<ListCursor<T>> {
        self.manager.transaction(|_| {
            let next_ref = pos.curr;
            let prev_ref = self.prev_of(next_ref)?;
            let new_node = BlockHandle::new_block(
                &self.manager,
                Node {
                    next: next_ref,
                    prev: prev_ref,
                    value,
                },
            )?;
            self.link_next(prev_ref, new_node.block_ref())?;
            self.link_prev(next_ref, new_node.block_ref())?;
            Ok(ListCursor {
                list: self.clone(),
                curr: new_node.block_ref(),
            })
        })
    }

    /// Removes the element at `pos`, returning a cursor at the following
    /// element. Errors with *OutOfRange* if `pos` is `end()`.
    pub fn erase(&self, pos: &ListCursor<T>) -> Result<ListCursor<T>> {
        if pos.curr == self.root.block_ref() {
            return Err(Error::OutOfRange);
        }
        self.manager.transaction(|_| {
            let node = BlockHandle::<Node<T>>::existing(&self.manager, pos.curr)?;
            let (next_ref, prev_ref) = {
                let n = node.get();
                (n.next, n.prev)
            };
            self.link_next(prev_ref, next_ref)?;
            self.link_prev(next_ref, prev_ref)?;
            Ok(ListCursor {
                list: self.clone(),
                curr: next_ref,
            })
        })
    }

    pub fn push_back(&self, value: T) -> Result<BlockRef> {
        Ok(self.emplace(&self.end(), value)?.block_ref())
    }

    pub fn push_front(&self, value: T) -> Result<BlockRef> {
        Ok(self.emplace(&self.begin(), value)?.block_ref())
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

    pub fn pop_front(&self) -> Result<T> {
        if self.is_empty() {
            return Err(Error::Empty);
        }
        let cur = self.begin();
        let value = cur.get()?;
        self.erase(&cur)?;
        Ok(value)
    }

    fn prev_of(&self, node_ref: BlockRef) -> Result<BlockRef> {
        if node_ref == self.root.block_ref() {
            Ok(self.root.get().prev)
        } else {
            Ok(BlockHandle::<Node<T>>::existing(&self.manager, node_ref)?.get().prev)
        }
    }

    fn link_next(&self, at: BlockRef, next: BlockRef) -> Result<()> {
        if at == self.root.block_ref() {
            self.root.update(|s| s.next = next)?;
        } else {
            BlockHandle::<Node<T>>::existing(&self.manager, at)?.update(|n| n.next = next)?;
        }
        Ok(())
    }

    fn link_prev(&self, at: BlockRef, prev: BlockRef) -> Result<()> {
        if at == self.root.block_ref() {
            self.root.update(|s| s.prev = prev)?;
        } else {
            BlockHandle::<Node<T>>::existing(&self.manager, at)?.update(|n| n.prev = prev)?;
        }
        Ok(())
    }
}

/// A bidirectional cursor over a [`List`]. Not invalidated by insertions
/// elsewhere in the list; invalidated only by erasing the element it sits on.
pub struct ListCursor<T> {
    list: List<T>,
    curr: BlockRef,
}

impl<T> Clone for ListCursor<T> {
    fn clone(&self) -> Self {
        Self {
            list: self.list.clone(),
            curr: self.curr,
        }
    }
}

impl<T> PartialEq for ListCursor<T> {
    fn eq(&self, other: &Self) -> bool {
        self.curr == other.curr
    }
}

impl<T> ListCursor<T>
where
    T: Serialize + DeserializeOwned + Clone + Send + 'static,
{
    pub fn block_ref(&self) -> BlockRef {
        self.curr
    }

    pub fn is_end(&self) -> bool {
        self.curr == self.list.root.block_ref()
    }

    pub fn get(&self) -> Result<T> {
        if self.is_end() {
            return Err(Error::OutOfRange);
        }
        Ok(BlockHandle::<Node<T>>::existing(&self.list.manager, self.curr)?.get().value)
    }

    pub fn advance(&mut self) -> Result<()> {
        if self.is_end() {
            return Err(Error::OutOfRange);
        }
        self.curr = BlockHandle::<Node<T>>::existing(&self.list.manager, self.curr)?.get().next;
        Ok(())
    }

    pub fn retreat(&mut self) -> Result<()> {
        let prev = self.list.prev_of(self.curr)?;
        if prev == self.list.root.block_ref() {
            return Err(Error::OutOfRange);
        }
        self.curr = prev;
        Ok(())
    }
}
