// Copyright 2019-2022 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Prometheus metrics, gated behind the `metrics` feature.

use lazy_static::lazy_static;
use prometheus::{Histogram, HistogramOpts, IntCounter, IntGauge};

lazy_static! {
    pub static ref BLOCK_WRITE_BYTES: Box<Histogram> = {
        let hist = Box::new(
            Histogram::with_opts(
                HistogramOpts::new("block_write_bytes", "Histogram of written block payload size")
                    .buckets(vec![32., 64., 128., 256., 512., 1024., 2048., 4096.]),
            )
            .unwrap(),
        );
        prometheus::default_registry()
            .register(hist.clone())
            .expect("registering the block_write_bytes metric must succeed");
        hist
    };

    pub static ref GC_SCAN_BATCHES_TOTAL: Box<IntCounter> = {
        let counter = Box::new(
            IntCounter::new("gc_scan_batches_total", "Number of Scanning batches run")
                .unwrap(),
        );
        prometheus::default_registry()
            .register(counter.clone())
            .expect("registering the gc_scan_batches_total metric must succeed");
        counter
    };

    pub static ref GC_SWEEP_BATCHES_TOTAL: Box<IntCounter> = {
        let counter = Box::new(
            IntCounter::new("gc_sweep_batches_total", "Number of Sweeping batches run")
                .unwrap(),
        );
        prometheus::default_registry()
            .register(counter.clone())
            .expect("registering the gc_sweep_batches_total metric must succeed");
        counter
    };

    pub static ref GC_BLOCK_COUNT: Box<IntGauge> = {
        let gauge = Box::new(
            IntGauge::new("gc_block_count", "OBJECT row count observed at the last GC phase boundary")
                .unwrap(),
        );
        prometheus::default_registry()
            .register(gauge.clone())
            .expect("registering the gc_block_count metric must succeed");
        gauge
    };
}
