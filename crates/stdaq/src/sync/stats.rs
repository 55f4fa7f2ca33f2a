// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

use crate::stats::{repetition_rate, Counter, StatsSource};
use std::time::Duration;

/// Synchronizer counters, reported as `std_data_sync`.
#[derive(Debug, Default)]
pub struct SyncStats {
    completed: Counter,
    duplicate_dropped: Counter,
    evicted: Counter,
    unexpected: Counter,
}

impl SyncStats {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub(crate) fn inc_completed(&self) {
        self.completed.inc();
    }

    #[inline]
    pub(crate) fn inc_duplicate(&self) {
        self.duplicate_dropped.inc();
    }

    #[inline]
    pub(crate) fn inc_evicted(&self) {
        self.evicted.inc();
    }

    #[inline]
    pub(crate) fn inc_unexpected(&self) {
        self.unexpected.inc();
    }

    #[must_use]
    pub fn completed(&self) -> u64 {
        self.completed.get()
    }

    #[must_use]
    pub fn duplicate_dropped(&self) -> u64 {
        self.duplicate_dropped.get()
    }

    #[must_use]
    pub fn evicted(&self) -> u64 {
        self.evicted.get()
    }

    #[must_use]
    pub fn unexpected(&self) -> u64 {
        self.unexpected.get()
    }
}

impl StatsSource for SyncStats {
    fn measurement(&self) -> &'static str {
        "std_data_sync"
    }

    fn drain(&self, elapsed: Duration) -> Vec<(&'static str, u64)> {
        let processed = self.completed.take_delta();
        let lost = self.duplicate_dropped.take_delta() + self.evicted.take_delta();
        vec![
            ("n_processed_images", processed),
            ("n_sync_lost_images", lost),
            ("n_unexpected_modules", self.unexpected.take_delta()),
            ("repetition_rate", repetition_rate(processed, elapsed)),
        ]
    }
}
