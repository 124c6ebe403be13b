// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use edgefirst_bufring::sequence::{Observation, SequenceMonitor};

#[test]
fn test_duplicate_then_gap() {
    let mut monitor = SequenceMonitor::new();
    let observed: Vec<_> = [10, 11, 11, 14].iter().map(|s| monitor.observe(*s)).collect();
    assert_eq!(
        observed,
        vec![
            Observation::Seeded,
            Observation::Dropped(0),
            Observation::ReorderOrDuplicate {
                last_seen: 11,
                sequence: 11
            },
            Observation::Dropped(2),
        ]
    );
    assert_eq!(monitor.total_dropped(), 2);
    assert_eq!(monitor.anomalies(), 1);
    assert_eq!(monitor.last_seen(), Some(14));
    assert_eq!(monitor.observed(), 4);
}

#[test]
fn test_reorder_keeps_last_seen() {
    let mut monitor = SequenceMonitor::new();
    monitor.observe(100);
    assert_eq!(
        monitor.observe(90),
        Observation::ReorderOrDuplicate {
            last_seen: 100,
            sequence: 90
        }
    );
    assert_eq!(monitor.last_seen(), Some(100));
    assert_eq!(monitor.observe(101), Observation::Dropped(0));
    assert_eq!(monitor.total_dropped(), 0);
}

#[test]
fn test_wraparound() {
    let max = u64::from(u32::MAX);
    let mut monitor = SequenceMonitor::new();
    monitor.observe(max);
    assert_eq!(monitor.observe(0), Observation::Dropped(0));

    let mut monitor = SequenceMonitor::new();
    monitor.observe(max - 1);
    assert_eq!(monitor.observe(1), Observation::Dropped(2));
}

#[test]
fn test_small_modulus() {
    let mut monitor = SequenceMonitor::with_modulus(16);
    monitor.observe(14);
    assert_eq!(monitor.observe(15), Observation::Dropped(0));
    assert_eq!(monitor.observe(2), Observation::Dropped(2));
    // Past half the modulus forward reads as behind: a reorder, not a drop.
    assert!(matches!(
        monitor.observe(12),
        Observation::ReorderOrDuplicate { .. }
    ));
}

#[test]
fn test_reset() {
    let mut monitor = SequenceMonitor::new().with_starvation_threshold(3);
    monitor.observe(1);
    assert_eq!(monitor.observe(10), Observation::Dropped(8));
    monitor.reset();
    assert_eq!(monitor.last_seen(), None);
    assert_eq!(monitor.total_dropped(), 0);
    assert_eq!(monitor.observe(500), Observation::Seeded);
}
