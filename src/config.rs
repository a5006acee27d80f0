// Copyright 2019-2022 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

/// Tunable constants for the block manager and its GC.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Hard limit on a block's serialized payload, in bytes.
    pub payload_limit: usize,
    /// Minimum batch size for pre-allocating empty `OBJECT` rows.
    pub allocation_batch_size: usize,
    /// Sub-steps per Scanning transaction before yielding.
    pub scan_step_depth: u64,
    /// Stop a Scanning transaction early once this many rows have changed.
    pub scan_changes_limit: u64,
    /// Rows taken from the SCAN queue per sub-step.
    pub scan_batch_size: u64,
    /// Id-range width processed per Sweeping transaction.
    pub sweep_batch_size: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            payload_limit: 4096,
            allocation_batch_size: 32,
            scan_step_depth: 64,
            scan_changes_limit: 16 * 1024,
            scan_batch_size: 256,
            sweep_batch_size: 256 * 1024,
        }
    }
}
