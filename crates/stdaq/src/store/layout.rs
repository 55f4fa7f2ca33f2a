// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

use super::{Result, StoreError};
use std::ops::Range;

/// Slot geometry of a ring store.
///
/// All addressing is a pure function of the geometry, so writer and reader
/// processes agree on offsets as long as they agree on the three sizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotLayout {
    meta_bytes: usize,
    data_bytes: usize,
    n_slots: usize,
}

impl SlotLayout {
    /// Build a layout, rejecting zero slots, empty slots and size overflow.
    pub fn new(meta_bytes: usize, data_bytes: usize, n_slots: usize) -> Result<Self> {
        if n_slots == 0 {
            return Err(StoreError::InvalidGeometry("n_slots is zero".into()));
        }
        let slot_bytes = meta_bytes
            .checked_add(data_bytes)
            .ok_or_else(|| StoreError::InvalidGeometry("slot size overflows".into()))?;
        if slot_bytes == 0 {
            return Err(StoreError::InvalidGeometry("slot size is zero".into()));
        }
        slot_bytes
            .checked_mul(n_slots)
            .ok_or_else(|| StoreError::InvalidGeometry("store size overflows".into()))?;

        Ok(Self {
            meta_bytes,
            data_bytes,
            n_slots,
        })
    }

    #[inline]
    #[must_use]
    pub fn meta_bytes(&self) -> usize {
        self.meta_bytes
    }

    #[inline]
    #[must_use]
    pub fn data_bytes(&self) -> usize {
        self.data_bytes
    }

    #[inline]
    #[must_use]
    pub fn n_slots(&self) -> usize {
        self.n_slots
    }

    /// Stride between consecutive slots.
    #[inline]
    #[must_use]
    pub fn slot_bytes(&self) -> usize {
        self.meta_bytes + self.data_bytes
    }

    /// Size of the whole mapping.
    #[inline]
    #[must_use]
    pub fn total_bytes(&self) -> usize {
        self.slot_bytes() * self.n_slots
    }

    /// Slot that holds `id`.
    #[inline]
    #[must_use]
    pub fn slot_index(&self, id: u64) -> usize {
        (id % self.n_slots as u64) as usize
    }

    /// Byte range of the whole slot for `id`.
    #[inline]
    #[must_use]
    pub fn slot_range(&self, id: u64) -> Range<usize> {
        let start = self.slot_index(id) * self.slot_bytes();
        start..start + self.slot_bytes()
    }

    /// Byte range of the metadata sub-region for `id`.
    #[inline]
    #[must_use]
    pub fn meta_range(&self, id: u64) -> Range<usize> {
        let start = self.slot_index(id) * self.slot_bytes();
        start..start + self.meta_bytes
    }

    /// Byte range of the data sub-region for `id`.
    #[inline]
    #[must_use]
    pub fn data_range(&self, id: u64) -> Range<usize> {
        let start = self.slot_index(id) * self.slot_bytes() + self.meta_bytes;
        start..start + self.data_bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_bad_geometry() {
        assert!(SlotLayout::new(0, 16, 0).is_err());
        assert!(SlotLayout::new(0, 0, 4).is_err());
        assert!(SlotLayout::new(usize::MAX, 1, 1).is_err());
        assert!(SlotLayout::new(0, usize::MAX / 2, 4).is_err());
    }

    #[test]
    fn test_addressing() {
        let layout = SlotLayout::new(64, 1024, 10).unwrap();
        assert_eq!(layout.slot_bytes(), 1088);
        assert_eq!(layout.total_bytes(), 10_880);

        assert_eq!(layout.slot_index(3), 3);
        assert_eq!(layout.slot_index(13), 3);
        assert_eq!(layout.slot_range(13), 3264..4352);
        assert_eq!(layout.meta_range(13), 3264..3328);
        assert_eq!(layout.data_range(13), 3328..4352);
    }

    #[test]
    fn test_no_meta_region() {
        let layout = SlotLayout::new(0, 100, 5).unwrap();
        assert!(layout.meta_range(7).is_empty());
        assert_eq!(layout.data_range(7), layout.slot_range(7));
    }

    #[test]
    fn test_last_slot_ends_at_total() {
        let layout = SlotLayout::new(8, 24, 1000).unwrap();
        assert_eq!(layout.slot_range(999).end, layout.total_bytes());
        assert_eq!(layout.slot_index(u64::MAX), 615);
        assert_eq!(layout.slot_range(u64::MAX).end, 616 * 32);
    }
}
