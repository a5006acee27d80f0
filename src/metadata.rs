// Copyright 2019-2022 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use crate::error::{Error, Result};

/// Schema version this crate writes and expects to read back.
pub const SCHEMA_VERSION: u64 = 2025_09_27_0;

/// Number of tables the schema probe expects (`STATIC`, `OBJECT`, `SCAN`).
pub const EXPECTED_TABLE_COUNT: u64 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GcPhase {
    Idle = 0,
    Scanning = 1,
    Sweeping = 2,
}

impl GcPhase {
    fn from_u8(v: u8) -> Result<Self> {
        match v {
            0 => Ok(GcPhase::Idle),
            1 => Ok(GcPhase::Scanning),
            2 => Ok(GcPhase::Sweeping),
            other => Err(Error::Other(format!("invalid gc phase byte {other}"))),
        }
    }
}

/// The single persistent metadata record, stored as the sole row of `STATIC`.
///
/// Fixed 64-byte encoding: eight `u64` fields packed little-endian, with
/// the mark bit and phase tag sharing the leading bytes of one word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Metadata {
    pub version: u64,
    pub root_index: u64,
    pub gc_mark: bool,
    pub gc_phase: GcPhase,
    pub block_count_prev: u64,
    pub block_count: u64,
    pub block_count_marked: u64,
    pub max_index: u64,
    pub sweep_index: u64,
}

impl Metadata {
    pub fn fresh(root_index: u64) -> Self {
        Self {
            version: SCHEMA_VERSION,
            root_index,
            gc_mark: false,
            gc_phase: GcPhase::Idle,
            block_count_prev: 0,
            block_count: 0,
            block_count_marked: 0,
            max_index: 0,
            sweep_index: 0,
        }
    }

    pub fn to_bytes(self) -> [u8; 64] {
        let mut buf = [0u8; 64];
        buf[0..8].copy_from_slice(&self.version.to_le_bytes());
        buf[8..16].copy_from_slice(&self.root_index.to_le_bytes());
        buf[16] = self.gc_mark as u8;
        buf[17] = self.gc_phase as u8;
        buf[24..32].copy_from_slice(&self.block_count_prev.to_le_bytes());
        buf[32..40].copy_from_slice(&self.block_count.to_le_bytes());
        buf[40..48].copy_from_slice(&self.block_count_marked.to_le_bytes());
        buf[48..56].copy_from_slice(&self.max_index.to_le_bytes());
        buf[56..64].copy_from_slice(&self.sweep_index.to_le_bytes());
        buf
    }

    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        if buf.len() != 64 {
            return Err(Error::Other(format!(
                "metadata record has {} bytes, expected 64",
                buf.len()
            )));
        }
        let word = |range: std::ops::Range<usize>| -> u64 {
            u64::from_le_bytes(buf[range].try_into().unwrap())
        };
        let metadata = Metadata {
            version: word(0..8),
            root_index: word(8..16),
            gc_mark: buf[16] != 0,
            gc_phase: GcPhase::from_u8(buf[17])?,
            block_count_prev: word(24..32),
            block_count: word(32..40),
            block_count_marked: word(40..48),
            max_index: word(48..56),
            sweep_index: word(56..64),
        };
        if metadata.version != SCHEMA_VERSION {
            return Err(Error::UnsupportedSchema {
                found: metadata.version,
                expected: SCHEMA_VERSION,
            });
        }
        Ok(metadata)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_bytes() {
        let meta = Metadata {
            version: SCHEMA_VERSION,
            root_index: 1,
            gc_mark: true,
            gc_phase: GcPhase::Sweeping,
            block_count_prev: 10,
            block_count: 20,
            block_count_marked: 5,
            max_index: 19,
            sweep_index: 3,
        };
        let bytes = meta.to_bytes();
        assert_eq!(bytes.len(), 64);
        assert_eq!(Metadata::from_bytes(&bytes).unwrap(), meta);
    }

    #[test]
    fn rejects_mismatched_version() {
        let mut meta = Metadata::fresh(1);
        meta.version += 1;
        let bytes = meta.to_bytes();
        assert!(matches!(
            Metadata::from_bytes(&bytes),
            Err(Error::UnsupportedSchema { .. })
        ));
    }
}
