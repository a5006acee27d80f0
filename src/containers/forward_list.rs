// Copyright 2019-2022 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Singly linked forward-list. `before_begin()` and `end()` coincide, both
//! represented by the sentinel.

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
    value: T,
}

impl<T: Serialize + DeserializeOwned + Clone> Layout for Node<T> {
    fn encode(&self) -> Result<(Vec<u8>, Vec<BlockRef>)> {
        let payload = encode_bincode(&(self.next, &self.value))?;
        Ok((payload, vec![self.next]))
    }

    fn decode(payload: &[u8], _refs: &[BlockRef]) -> Result<Self> {
        let (next, value): (BlockRef, T) = decode_bincode(payload)?;
        Ok(Node { next, value })
    }
}

#[derive(Clone)]
struct Sentinel {
    next: BlockRef,
}

impl Layout for Sentinel {
    fn encode(&self) -> Result<(Vec<u8>, Vec<BlockRef>)> {
        Ok((encode_bincode(&self.next)?, vec![self.next]))
    }

    fn decode(payload: &[u8], _refs: &[BlockRef]) -> Result<Self> {
        Ok(Sentinel {
            next: decode_bincode(payload)?,
        })
    }
}

/// A persistent singly linked list rooted at a fixed sentinel block.
pub struct ForwardList<T> {
    manager: BlockManager,
    root: BlockHandle<Sentinel>,
    _marker: PhantomData<T>,
}

impl<T> Clone for ForwardList<T> {
    fn clone(&self) -> Self {
        Self {
            manager: self.manager.clone(),
            root: self.root.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T> ForwardList<T>
where
    T: Serialize + DeserializeOwned + Clone + Send + 'static,
{
    pub fn new(manager: &BlockManager, root: BlockRef) -> Result<Self> {
        let root = BlockHandle::existing_or_init(manager, root, || Sentinel { next: root })?;
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

    pub fn before_begin(&self) -> ForwardListCursor<T> {
        ForwardListCursor {
            list: self.clone(),
            curr: self.root.block_ref(),
        }
    }

    pub fn begin(&self) -> ForwardListCursor<T> {
        ForwardListCursor {
            list: self.clone(),
            curr: self.root.get().next,
        }
    }

    pub fn end(&self) -> ForwardListCursor<T> {
        self.before_begin()
    }

    pub fn front(&self) -> Result<T> {
        if self.is_empty() {
            return Err(Error::Empty);
        }
        self.begin().get()
    }

    pub fn clear(&self) -> Result<()> {
        if self.is_empty() {
            return Ok(());
        }
        let root_ref = self.root.block_ref();
        self.manager.transaction(|_| {
            self.root.set(Sentinel { next: root_ref });
            Ok(())
        })
    }

    pub fn emplace_front(&self, value: T) -> Result<ForwardListCursor<T>> {
        self.manager.transaction(|_| {
            let new_node = BlockHandle::new_block(
                &self.manager,
                Node {
                    next: self.root.get().next,
                    value,
                },
            )?;
            self.root.update(|s| s.next = new_node.block_ref())?;
            Ok(ForwardListCursor {
                list: self.clone(),
                curr: new_node.block_ref(),
            })
        })
    }

    /// Inserts `value` right after `pos`. `pos == before_begin()` behaves
    /// like `emplace_front`.
    pub fn emplace_after(&self, pos: &ForwardListCursor<T>, value: T) -> Result<ForwardListCursor<T>> {
        if pos.curr == self.root.block_ref() {
            return self.emplace_front(value);
        }
        self.manager.transaction(|_| {
            let at = BlockHandle::<Node<T>>::existing(&self.manager, pos.curr)?;
            let new_node = BlockHandle::new_block(
                &self.manager,
                Node {
                    next: at.get().next,
                    value,
                },
            )?;
            at.update(|n| n.next = new_node.block_ref())?;
            Ok(ForwardListCursor {
                list: self.clone(),
                curr: new_node.block_ref(),
            })
        })
    }

    pub fn pop_front(&self) -> Result<T> {
        if self.is_empty() {
            return Err(Error::Empty);
        }
        let front_ref = self.root.get().next;
        let front = BlockHandle::<Node<T>>::existing(&self.manager, front_ref)?;
        let value = front.get().value;
        self.manager.transaction(|_| {
            self.root.update(|s| s.next = front.get().next)?;
            Ok(())
        })?;
        Ok(value)
    }

    /// Removes the element right after `pos`. `pos == before_begin()`
    /// behaves like `pop_front`.
    pub fn erase_after(&self, pos: &ForwardListCursor<T>) -> Result<()> {
        if pos.curr == self.root.block_ref() {
            self.pop_front()?;
            return Ok(());
        }
        let at = BlockHandle::<Node<T>>::existing(&self.manager, pos.curr)?;
        let erased_ref = at.get().next;
        if erased_ref == self.root.block_ref() {
            return Err(Error::OutOfRange);
        }
        let erased = BlockHandle::<Node<T>>::existing(&self.manager, erased_ref)?;
        self.manager.transaction(|_| {
            at.update(|n| n.next = erased.get().next)?;
            Ok(())
        })
    }
}

/// A forward cursor over a [`ForwardList`]. Incrementing `end()` wraps back
/// to `begin()`, matching the underlying ring layout.
pub struct ForwardListCursor<T> {
    list: ForwardList<T>,
    curr: BlockRef,
}

impl<T> Clone for ForwardListCursor<T> {
    fn clone(&self) -> Self {
        Self {
            list: self.list.clone(),
            curr: self.curr,
        }
    }
}

impl<T> PartialEq for ForwardListCursor<T> {
    fn eq(&self, other: &Self) -> bool {
        self.curr == other.curr
    }
}

impl<T> ForwardListCursor<T>
where
    T: Serialize + DeserializeOwned + Clone + Send + 'static,
{
    pub fn block_ref(&self) -> BlockRef {
        self.curr
    }

    pub fn get(&self) -> Result<T> {
        if self.curr == self.list.root.block_ref() {
            return Err(Error::OutOfRange);
        }
        Ok(BlockHandle::<Node<T>>::existing(&self.list.manager, self.curr)?.get().value)
    }

    pub fn advance(&mut self) {
        self.curr = if self.curr == self.list.root.block_ref() {
            self.list.root.get().next
        } else {
            BlockHandle::<Node<T>>::existing(&self.list.manager, self.curr)
                .expect("cursor points at a live node")
                .get()
                .next
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manager::BlockManager;

    fn open() -> (BlockManager, BlockRef) {
        let manager = BlockManager::open_in_memory().unwrap();
        let root = manager.root();
        (manager, root)
    }

    #[test]
    fn emplace_front_then_iterate() {
        let (manager, root) = open();
        let list: ForwardList<String> = ForwardList::new(&manager, root).unwrap();
        manager
            .transaction(|_| {
                list.emplace_front("b".to_string())?;
                list.emplace_front("a".to_string())?;
                Ok(())
            })
            .unwrap();

        let mut cur = list.begin();
        let mut out = Vec::new();
        while cur != list.end() {
            out.push(cur.get().unwrap());
            cur.advance();
        }
        assert_eq!(out, vec!["a", "b"]);
    }

    #[test]
    fn pop_front_on_empty_is_error() {
        let (manager, root) = open();
        let list: ForwardList<String> = ForwardList::new(&manager, root).unwrap();
        assert!(matches!(list.pop_front(), Err(Error::Empty)));
    }

    #[test]
    fn erase_after_before_begin_pops_front() {
        let (manager, root) = open();
        let list: ForwardList<String> = ForwardList::new(&manager, root).unwrap();
        list.emplace_front("a".to_string()).unwrap();
        list.emplace_front("b".to_string()).unwrap();
        list.erase_after(&list.before_begin()).unwrap();
        assert_eq!(list.front().unwrap(), "a");
    }
}
