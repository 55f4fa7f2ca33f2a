// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Cross-module image synchronization.
//!
//! Every module reports `(image_id, module_id)` once its tile for that image is
//! stored. The synchronizer tracks which expected modules are still missing per
//! image and releases complete images in the order their first module arrived.
//!
//! # Bookkeeping
//!
//! ```text
//! queue (push order):  [ 7: pending ][ 8: complete ][ 9: pending ]
//! pending (by id):     { 7 -> {2,3}, 9 -> {0,1,2,3} }
//! ```
//!
//! - `pop_next_complete()` only ever pops the front: image 8 waits for 7.
//! - A new image that grows the queue past `max_in_flight` entries (complete
//!   ones waiting behind an incomplete front included) evicts the oldest
//!   incomplete image, so one lost module frame cannot stall the queue.
//! - A second arrival of the same module for an image drops the image.

mod mask;
mod stats;

pub use mask::ModuleMask;
pub use stats::SyncStats;

use crate::{ImageId, ModuleId};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

/// Result of one [`ImageSynchronizer::process_arrival`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArrivalOutcome {
    /// Image still waits for other modules
    Pending,
    /// This arrival completed the image; it is queued for `pop_next_complete`
    Completed,
    /// The module had already arrived for this image; the image was dropped
    DuplicateDropped,
    /// Recorded, and the oldest incomplete image was evicted to keep the queue bounded
    EvictedOther(ImageId),
    /// The module is not part of the expected set; nothing was recorded
    UnexpectedModule,
}

#[derive(Debug, Clone, Copy)]
struct QueueEntry {
    image_id: ImageId,
    complete: bool,
}

/// Tracks module arrivals per image and releases complete images in push order.
///
/// Not internally synchronized; see [`SharedSynchronizer`] for a handle that
/// can be used from several threads.
#[derive(Debug)]
pub struct ImageSynchronizer {
    expected: ModuleMask,
    max_in_flight: usize,
    queue: VecDeque<QueueEntry>,
    pending: HashMap<ImageId, ModuleMask>,
    /// Recently completed ids, so late duplicates cannot resurrect them
    completed_ids: HashSet<ImageId>,
    completed_order: VecDeque<ImageId>,
    stats: Arc<SyncStats>,
}

impl ImageSynchronizer {
    /// Synchronizer waiting for every module in `expected`, queueing at most
    /// `max_in_flight` images (minimum 1) while an incomplete one is among them.
    #[must_use]
    pub fn new(expected: ModuleMask, max_in_flight: usize) -> Self {
        let max_in_flight = max_in_flight.max(1);
        Self {
            expected,
            max_in_flight,
            queue: VecDeque::with_capacity(max_in_flight + 1),
            pending: HashMap::with_capacity(max_in_flight + 1),
            completed_ids: HashSet::with_capacity(max_in_flight),
            completed_order: VecDeque::with_capacity(max_in_flight),
            stats: Arc::new(SyncStats::new()),
        }
    }

    /// Count into shared statistics instead of private ones.
    #[must_use]
    pub fn with_stats(mut self, stats: Arc<SyncStats>) -> Self {
        self.stats = stats;
        self
    }

    #[must_use]
    pub fn stats(&self) -> &Arc<SyncStats> {
        &self.stats
    }

    #[must_use]
    pub fn expected(&self) -> ModuleMask {
        self.expected
    }

    /// Images still waiting for modules.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.pending.len()
    }

    /// Complete images waiting to be popped.
    #[must_use]
    pub fn ready(&self) -> usize {
        self.queue.len() - self.pending.len()
    }

    /// Record that `module_id`'s tile for `image_id` is stored.
    pub fn process_arrival(&mut self, image_id: ImageId, module_id: ModuleId) -> ArrivalOutcome {
        if !self.expected.contains(module_id) {
            self.stats.inc_unexpected();
            log::warn!(
                "[SYNC] image {} from unexpected module {}",
                image_id,
                module_id
            );
            return ArrivalOutcome::UnexpectedModule;
        }

        if self.completed_ids.contains(&image_id) {
            self.stats.inc_duplicate();
            log::debug!(
                "[SYNC] late arrival of module {} for completed image {}",
                module_id,
                image_id
            );
            return ArrivalOutcome::DuplicateDropped;
        }

        let is_new = !self.pending.contains_key(&image_id);
        let remaining = self.pending.entry(image_id).or_insert_with(|| {
            self.queue.push_back(QueueEntry {
                image_id,
                complete: false,
            });
            self.expected
        });

        if !remaining.clear(module_id) {
            self.drop_pending(image_id);
            self.stats.inc_duplicate();
            log::warn!(
                "[SYNC] module {} arrived twice for image {}, image dropped",
                module_id,
                image_id
            );
            return ArrivalOutcome::DuplicateDropped;
        }

        if remaining.is_empty() {
            self.complete(image_id);
            return ArrivalOutcome::Completed;
        }

        if is_new && self.queue.len() > self.max_in_flight {
            if let Some(evicted) = self.evict_oldest_pending(image_id) {
                log::debug!(
                    "[SYNC] more than {} images queued, evicted image {}",
                    self.max_in_flight,
                    evicted
                );
                return ArrivalOutcome::EvictedOther(evicted);
            }
        }

        ArrivalOutcome::Pending
    }

    /// Oldest-pushed image, if it is complete. Never blocks.
    pub fn pop_next_complete(&mut self) -> Option<ImageId> {
        match self.queue.front() {
            Some(entry) if entry.complete => {
                let id = entry.image_id;
                self.queue.pop_front();
                Some(id)
            }
            _ => None,
        }
    }

    fn position_pending(&self, image_id: ImageId) -> Option<usize> {
        self.queue
            .iter()
            .position(|e| e.image_id == image_id && !e.complete)
    }

    fn drop_pending(&mut self, image_id: ImageId) {
        self.pending.remove(&image_id);
        let pos = self
            .position_pending(image_id)
            .unwrap_or_else(|| panic!("pending image {image_id} missing from queue"));
        self.queue.remove(pos);
    }

    fn complete(&mut self, image_id: ImageId) {
        self.pending.remove(&image_id);
        let pos = self
            .position_pending(image_id)
            .unwrap_or_else(|| panic!("completed image {image_id} missing from queue"));
        self.queue[pos].complete = true;
        self.stats.inc_completed();

        self.completed_ids.insert(image_id);
        self.completed_order.push_back(image_id);
        if self.completed_order.len() > self.max_in_flight {
            if let Some(old) = self.completed_order.pop_front() {
                self.completed_ids.remove(&old);
            }
        }
    }

    /// Evict the oldest incomplete entry other than `keep`. `None` when every
    /// older entry is complete and only waits to be popped.
    fn evict_oldest_pending(&mut self, keep: ImageId) -> Option<ImageId> {
        let pos = self
            .queue
            .iter()
            .position(|e| !e.complete && e.image_id != keep)?;
        let evicted = self.queue[pos].image_id;
        self.queue.remove(pos);
        self.pending.remove(&evicted);
        self.stats.inc_evicted();
        Some(evicted)
    }

    /// Entries queued for release, complete or not.
    #[must_use]
    pub fn queued(&self) -> usize {
        self.queue.len()
    }
}

/// Cloneable, thread-safe handle to an [`ImageSynchronizer`].
///
/// Each call holds the lock for exactly one operation, so an arrival thread
/// and a completion-poll thread can share the synchronizer.
#[derive(Debug, Clone)]
pub struct SharedSynchronizer {
    inner: Arc<Mutex<ImageSynchronizer>>,
    stats: Arc<SyncStats>,
}

impl SharedSynchronizer {
    #[must_use]
    pub fn new(synchronizer: ImageSynchronizer) -> Self {
        let stats = Arc::clone(synchronizer.stats());
        Self {
            inner: Arc::new(Mutex::new(synchronizer)),
            stats,
        }
    }

    pub fn process_arrival(&self, image_id: ImageId, module_id: ModuleId) -> ArrivalOutcome {
        self.inner.lock().process_arrival(image_id, module_id)
    }

    pub fn pop_next_complete(&self) -> Option<ImageId> {
        self.inner.lock().pop_next_complete()
    }

    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.inner.lock().in_flight()
    }

    /// Statistics, readable without taking the lock.
    #[must_use]
    pub fn stats(&self) -> &Arc<SyncStats> {
        &self.stats
    }
}
