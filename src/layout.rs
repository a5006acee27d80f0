// Copyright 2019-2022 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Byte-layer contract between container node types and the block manager.
//!
//! Each node type implements [`Layout`] by hand, producing the serialized
//! payload plus the ordered list of outbound [`BlockRef`]s it contains, and
//! the inverse. `block_ref` fields serialize into the payload bytes and
//! contribute one entry to the ref list.

use serde::{de::DeserializeOwned, Serialize};

use crate::error::{Error, Result};

/// An opaque 64-bit index of a persisted block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, serde::Deserialize)]
pub struct BlockRef(pub u64);

impl BlockRef {
    /// Sentinel value that never appears in a committed, reachable graph.
    pub const INVALID: BlockRef = BlockRef(u64::MAX);

    pub fn index(self) -> u64 {
        self.0
    }
}

impl From<u64> for BlockRef {
    fn from(v: u64) -> Self {
        BlockRef(v)
    }
}

/// Converts a typed record to and from `(payload, refs)`.
pub trait Layout: Sized {
    fn encode(&self) -> Result<(Vec<u8>, Vec<BlockRef>)>;
    fn decode(payload: &[u8], refs: &[BlockRef]) -> Result<Self>;
}

/// Bincode-backed helper for node types whose only `BlockRef` fields are
/// threaded explicitly by the caller (the common case: `next`/`prev`).
pub fn encode_bincode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    bincode::serialize(value).map_err(|e| Error::Other(format!("layout encode failed: {e}")))
}

pub fn decode_bincode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    bincode::deserialize(bytes).map_err(|e| Error::Other(format!("layout decode failed: {e}")))
}

/// Encodes the `ref` blob: an ordered array of 8-byte little-endian indices,
/// count implicit from length.
pub fn encode_refs(refs: &[BlockRef]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(refs.len() * 8);
    for r in refs {
        buf.extend_from_slice(&r.0.to_le_bytes());
    }
    buf
}

pub fn decode_refs(bytes: &[u8]) -> Result<Vec<BlockRef>> {
    if bytes.len() % 8 != 0 {
        return Err(Error::Other(format!(
            "ref blob length {} is not a multiple of 8",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(8)
        .map(|c| BlockRef(u64::from_le_bytes(c.try_into().unwrap())))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_ref_round_trips_through_bincode() {
        let r = BlockRef(42);
        let bytes = encode_bincode(&r).unwrap();
        assert_eq!(bytes.len(), 8);
        let back: BlockRef = decode_bincode(&bytes).unwrap();
        assert_eq!(back, r);
    }

    #[test]
    fn ref_blob_round_trips() {
        let refs = vec![BlockRef(1), BlockRef(2), BlockRef(u64::MAX)];
        let bytes = encode_refs(&refs);
        assert_eq!(bytes.len(), 24);
        assert_eq!(decode_refs(&bytes).unwrap(), refs);
    }
}
