// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

use crate::stats::{repetition_rate, Counter, StatsSource};
use std::time::Duration;

/// Per-module reassembly counters.
///
/// Getters return totals since creation. As a [`StatsSource`] it reports
/// `std_udp_recv` lines with the increase since the previous report.
#[derive(Debug, Default)]
pub struct FrameStats {
    frames: Counter,
    missed_packets: Counter,
    corrupted_frames: Counter,
    malformed_packets: Counter,
    duplicate_packets: Counter,
}

impl FrameStats {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one emitted frame.
    #[inline]
    pub fn record_frame(&self, n_missing_packets: u64) {
        if n_missing_packets > 0 {
            self.missed_packets.add(n_missing_packets);
            self.corrupted_frames.inc();
        }
        self.frames.inc();
    }

    #[inline]
    pub fn inc_malformed(&self) {
        self.malformed_packets.inc();
    }

    #[inline]
    pub fn inc_duplicate(&self) {
        self.duplicate_packets.inc();
    }

    #[must_use]
    pub fn frames(&self) -> u64 {
        self.frames.get()
    }

    #[must_use]
    pub fn missed_packets(&self) -> u64 {
        self.missed_packets.get()
    }

    #[must_use]
    pub fn corrupted_frames(&self) -> u64 {
        self.corrupted_frames.get()
    }

    #[must_use]
    pub fn malformed_packets(&self) -> u64 {
        self.malformed_packets.get()
    }

    #[must_use]
    pub fn duplicate_packets(&self) -> u64 {
        self.duplicate_packets.get()
    }
}

impl StatsSource for FrameStats {
    fn measurement(&self) -> &'static str {
        "std_udp_recv"
    }

    fn drain(&self, elapsed: Duration) -> Vec<(&'static str, u64)> {
        let frames = self.frames.take_delta();
        vec![
            ("n_missed_packets", self.missed_packets.take_delta()),
            ("n_corrupted_frames", self.corrupted_frames.take_delta()),
            ("n_malformed_packets", self.malformed_packets.take_delta()),
            ("n_duplicate_packets", self.duplicate_packets.take_delta()),
            ("repetition_rate", repetition_rate(frames, elapsed)),
        ]
    }
}
