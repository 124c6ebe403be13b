// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use criterion::{criterion_group, criterion_main, Criterion};
use edgefirst_bufring::{
    capture::CapturePort,
    config::CaptureConfig,
    driver::{PipelineDriver, Stage},
    sim::SimCamera,
};

fn run_ring(config: &CaptureConfig) {
    let (port, pool) = CapturePort::open(SimCamera::new("bench"), config).unwrap();
    let mut driver = PipelineDriver::new(Stage::new(pool, port));
    let report = driver
        .run(config.cycle_count, |_, buffer| {
            let sum: u64 = buffer.data().iter().step_by(8).map(|b| u64::from(*b)).sum();
            std::hint::black_box(sum);
            Ok(())
        })
        .unwrap();
    assert_eq!(Some(report.cycles), config.cycle_count);
    driver.shutdown().unwrap();
}

pub fn benchmark_ring(c: &mut Criterion) {
    let dims = [(320, 240), (640, 480), (1920, 1080)];
    for buffers in [2, 5] {
        let mut group = c.benchmark_group(format!("ring/{buffers}"));
        group.sample_size(10);
        for dim in dims.iter() {
            let config = CaptureConfig {
                width: dim.0,
                height: dim.1,
                buffer_count: buffers,
                cycle_count: Some(300),
                ..Default::default()
            };
            group.bench_with_input(format!("{}x{}", dim.0, dim.1), &config, |b, config| {
                b.iter(|| run_ring(config))
            });
        }
        group.finish();
    }
}

criterion_group!(benches, benchmark_ring);
criterion_main!(benches);
