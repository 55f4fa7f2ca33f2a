// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Shared-memory ring store.
//!
//! A named POSIX shared memory arena split into `n_slots` fixed-size slots.
//! Slot `id % n_slots` holds the data for `id`; every process that maps the
//! same name sees the same bytes without copying.
//!
//! ```text
//! +----------------- slot 0 -----------------+---- slot 1 ----+-- ...
//! | meta (meta_bytes) | data (data_bytes)     | meta | data    |
//! +-------------------+-----------------------+------+---------+-- ...
//! ```
//!
//! # Consistency
//!
//! There is no locking. A single writer owns each store; readers learn that a
//! slot is ready through the [`Notifier`](crate::Notifier), which publishes
//! with release/acquire ordering after the write. A reader that holds a slot
//! while the writer wraps around to a congruent id sees the newer bytes.

mod layout;
mod ring;
mod segment;

pub use layout::SlotLayout;
pub use ring::{RingStore, SlotView, SlotViewMut};
pub use segment::ShmSegment;

use std::fmt;
use std::io;

/// Errors that can occur in ring store operations
#[derive(Debug)]
pub enum StoreError {
    /// Shared memory segment creation failed
    SegmentCreate(io::Error),

    /// Shared memory segment open failed
    SegmentOpen(io::Error),

    /// Sizing the segment with ftruncate failed
    SegmentResize(io::Error),

    /// Removing the segment name failed
    SegmentUnlink(io::Error),

    /// Memory mapping failed
    Mmap(io::Error),

    /// Payload too large for slot
    PayloadTooLarge { size: usize, capacity: usize },

    /// Invalid segment name
    InvalidName(String),

    /// Segment not found
    NotFound(String),

    /// Existing segment has a different size than requested
    SizeMismatch {
        name: String,
        expected: usize,
        actual: usize,
    },

    /// Slot geometry is unusable (zero slots, zero-sized slot, overflow)
    InvalidGeometry(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SegmentCreate(e) => write!(f, "Shared memory segment creation failed: {e}"),
            Self::SegmentOpen(e) => write!(f, "Shared memory segment open failed: {e}"),
            Self::SegmentResize(e) => write!(f, "Shared memory segment resize failed: {e}"),
            Self::SegmentUnlink(e) => write!(f, "Shared memory segment unlink failed: {e}"),
            Self::Mmap(e) => write!(f, "Memory mapping failed: {e}"),
            Self::PayloadTooLarge { size, capacity } => {
                write!(
                    f,
                    "Payload too large: {size} bytes exceeds slot capacity {capacity}"
                )
            }
            Self::InvalidName(name) => write!(f, "Invalid segment name: {name}"),
            Self::NotFound(name) => write!(f, "Segment not found: {name}"),
            Self::SizeMismatch {
                name,
                expected,
                actual,
            } => write!(
                f,
                "Segment {name} has size {actual}, expected {expected}"
            ),
            Self::InvalidGeometry(msg) => write!(f, "Invalid slot geometry: {msg}"),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::SegmentCreate(e)
            | Self::SegmentOpen(e)
            | Self::SegmentResize(e)
            | Self::SegmentUnlink(e)
            | Self::Mmap(e) => Some(e),
            _ => None,
        }
    }
}

/// Result type for store operations
pub type Result<T> = std::result::Result<T, StoreError>;
