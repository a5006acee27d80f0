// Copyright 2019-2022 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Block-backed persistent container library: sentinel-circular linking,
//! with the sentinel's own index standing in for "one past the end" in
//! every container here.

pub mod deque;
pub mod forward_list;
pub mod list;

pub use deque::{Deque, DequeCursor};
pub use forward_list::{ForwardList, ForwardListCursor};
pub use list::{List, ListCursor};
