// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Dropped frame detection from the entity supplied sequence counter.

use tracing::{debug, warn};

/// V4L2 `sequence` is a 32-bit counter.
pub const DEFAULT_MODULUS: u64 = 1 << 32;

/// Result of observing one sequence number.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Observation {
    /// First number of the session, accepted as is.
    Seeded,
    /// In order. The payload is the number of frames skipped, `0` when none.
    Dropped(u64),
    /// Repeated or older than the last number seen. Not counted as a drop
    /// and does not move the monitor forward.
    ReorderOrDuplicate { last_seen: u64, sequence: u64 },
}

/// Tracks the last sequence number seen and derives dropped frame counts.
///
/// Drops are telemetry only; nothing here stops the pipeline.
#[derive(Debug, Clone)]
pub struct SequenceMonitor {
    modulus: u64,
    last_seen: Option<u64>,
    starvation_threshold: u64,
    total_dropped: u64,
    anomalies: u64,
    observed: u64,
}

impl Default for SequenceMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl SequenceMonitor {
    pub fn new() -> Self {
        Self::with_modulus(DEFAULT_MODULUS)
    }

    /// Monitor for a counter that wraps at `modulus`.
    pub fn with_modulus(modulus: u64) -> Self {
        Self {
            modulus: modulus.max(2),
            last_seen: None,
            starvation_threshold: u64::MAX,
            total_dropped: 0,
            anomalies: 0,
            observed: 0,
        }
    }

    /// Logs a warning whenever a single gap reaches `frames`. A persistent
    /// gap of this size usually means the pool is too small for the
    /// processing latency.
    pub fn with_starvation_threshold(mut self, frames: u64) -> Self {
        self.starvation_threshold = frames.max(1);
        self
    }

    pub fn observe(&mut self, sequence: u64) -> Observation {
        let sequence = sequence % self.modulus;
        self.observed += 1;

        let Some(last) = self.last_seen else {
            self.last_seen = Some(sequence);
            debug!(sequence, "sequence seeded");
            return Observation::Seeded;
        };

        // Serial number arithmetic: forward distances in the lower half of
        // the modulus are progress, everything else is reordering.
        let modulus = u128::from(self.modulus);
        let distance =
            ((u128::from(sequence) + modulus - u128::from(last)) % modulus) as u64;
        if distance == 0 || distance > self.modulus / 2 {
            self.anomalies += 1;
            warn!(last_seen = last, sequence, "sequence reorder or duplicate");
            return Observation::ReorderOrDuplicate {
                last_seen: last,
                sequence,
            };
        }

        let dropped = distance - 1;
        self.last_seen = Some(sequence);
        self.total_dropped += dropped;
        if dropped >= self.starvation_threshold {
            warn!(
                dropped,
                sequence, "dropped frames: buffer pool may be starved"
            );
        } else if dropped > 0 {
            debug!(dropped, sequence, "dropped frames");
        }
        Observation::Dropped(dropped)
    }

    pub fn last_seen(&self) -> Option<u64> {
        self.last_seen
    }

    pub fn total_dropped(&self) -> u64 {
        self.total_dropped
    }

    /// Number of reorder or duplicate observations.
    pub fn anomalies(&self) -> u64 {
        self.anomalies
    }

    pub fn observed(&self) -> u64 {
        self.observed
    }

    /// Forgets the session, e.g. after a stream restart.
    pub fn reset(&mut self) {
        self.last_seen = None;
        self.total_dropped = 0;
        self.anomalies = 0;
        self.observed = 0;
    }
}
