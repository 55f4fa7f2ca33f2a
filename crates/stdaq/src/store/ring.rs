// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Ring store over one shared memory segment.
//!
//! # Write Protocol
//!
//! Writer (one per store):
//! 1. `write_split(id, meta, data)` copies metadata then data into slot `id % n_slots`
//! 2. The caller publishes `id` on the paired notifier (Release)
//!
//! Reader:
//! 1. Receives `id` from its subscriber (Acquire)
//! 2. Reads `slot(id)` in place
//!
//! Nothing stops the writer from lapping a slow reader. A view taken for `id`
//! shows `id + k * n_slots` once the writer gets there.

use super::layout::SlotLayout;
use super::segment::ShmSegment;
use super::{Result, StoreError};
use std::ptr;

/// Read view of one slot.
#[derive(Debug, Clone, Copy)]
pub struct SlotView<'a> {
    meta: &'a [u8],
    data: &'a [u8],
}

impl<'a> SlotView<'a> {
    /// Metadata sub-region (empty for stores created without one).
    #[inline]
    #[must_use]
    pub fn meta(&self) -> &'a [u8] {
        self.meta
    }

    /// Data sub-region.
    #[inline]
    #[must_use]
    pub fn data(&self) -> &'a [u8] {
        self.data
    }
}

/// Write view of one slot.
#[derive(Debug)]
pub struct SlotViewMut<'a> {
    meta: &'a mut [u8],
    data: &'a mut [u8],
}

impl SlotViewMut<'_> {
    #[inline]
    pub fn meta(&mut self) -> &mut [u8] {
        &mut *self.meta
    }

    #[inline]
    pub fn data(&mut self) -> &mut [u8] {
        &mut *self.data
    }

    /// Both sub-regions at once.
    #[inline]
    pub fn split(&mut self) -> (&mut [u8], &mut [u8]) {
        (&mut *self.meta, &mut *self.data)
    }
}

/// Named shared-memory arena of fixed-size slots addressed by `id % n_slots`.
///
/// Create with [`RingStore::create`] / [`RingStore::create_split`] in the
/// writer process, attach with [`RingStore::open`] in readers. Dropping a store
/// unmaps it; [`RingStore::destroy`] also removes the name.
pub struct RingStore {
    segment: ShmSegment,
    layout: SlotLayout,
}

impl RingStore {
    /// Create (or attach to) a store whose slots carry only data.
    ///
    /// # Errors
    ///
    /// Returns error if the geometry is invalid or the segment cannot be
    /// created, sized or mapped.
    pub fn create(name: &str, slot_bytes: usize, n_slots: usize) -> Result<Self> {
        Self::create_split(name, 0, slot_bytes, n_slots)
    }

    /// Create (or attach to) a store whose slots carry metadata then data.
    pub fn create_split(
        name: &str,
        meta_bytes: usize,
        data_bytes: usize,
        n_slots: usize,
    ) -> Result<Self> {
        let layout = SlotLayout::new(meta_bytes, data_bytes, n_slots)?;
        let segment = ShmSegment::create(name, layout.total_bytes())?;

        log::info!(
            "[STORE] created {} slots={} meta={} data={} total={}",
            segment.name(),
            n_slots,
            meta_bytes,
            data_bytes,
            layout.total_bytes()
        );

        Ok(Self { segment, layout })
    }

    /// Attach to a store created by another process.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the store does not exist yet.
    pub fn open(name: &str, meta_bytes: usize, data_bytes: usize, n_slots: usize) -> Result<Self> {
        let layout = SlotLayout::new(meta_bytes, data_bytes, n_slots)?;
        let segment = ShmSegment::open(name, layout.total_bytes())?;

        log::debug!("[STORE] attached {} slots={}", segment.name(), n_slots);

        Ok(Self { segment, layout })
    }

    #[inline]
    #[must_use]
    pub fn layout(&self) -> &SlotLayout {
        &self.layout
    }

    /// Normalized shm name (with leading `/`).
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        self.segment.name()
    }

    #[inline]
    fn bytes(&self) -> &[u8] {
        // SAFETY:
        // - the mapping is valid for segment.size() bytes until self is dropped
        // - total_bytes() == segment.size() by construction
        // - other processes may write the region concurrently; readers accept torn
        //   content (single writer, id published through the notifier afterwards)
        unsafe { std::slice::from_raw_parts(self.segment.as_ptr(), self.layout.total_bytes()) }
    }

    #[inline]
    fn bytes_mut(&mut self) -> &mut [u8] {
        // SAFETY:
        // - the mapping is valid for segment.size() bytes until self is dropped
        // - &mut self ensures no other view into this handle is alive
        unsafe { std::slice::from_raw_parts_mut(self.segment.as_ptr(), self.layout.total_bytes()) }
    }

    /// Copy `data` into the data sub-region of the slot for `id`.
    ///
    /// Bytes past `data.len()` keep their previous content.
    ///
    /// # Errors
    ///
    /// Returns `PayloadTooLarge` if `data` does not fit.
    pub fn write(&mut self, id: u64, data: &[u8]) -> Result<()> {
        let capacity = self.layout.data_bytes();
        if data.len() > capacity {
            return Err(StoreError::PayloadTooLarge {
                size: data.len(),
                capacity,
            });
        }

        let start = self.layout.data_range(id).start;
        let dst = &mut self.bytes_mut()[start..start + data.len()];
        copy_into(dst, data);
        Ok(())
    }

    /// Copy `meta` into the metadata sub-region, then `data` into the data sub-region.
    ///
    /// # Errors
    ///
    /// Returns `PayloadTooLarge` if either part does not fit. Nothing is
    /// written in that case.
    pub fn write_split(&mut self, id: u64, meta: &[u8], data: &[u8]) -> Result<()> {
        if meta.len() > self.layout.meta_bytes() {
            return Err(StoreError::PayloadTooLarge {
                size: meta.len(),
                capacity: self.layout.meta_bytes(),
            });
        }
        if data.len() > self.layout.data_bytes() {
            return Err(StoreError::PayloadTooLarge {
                size: data.len(),
                capacity: self.layout.data_bytes(),
            });
        }

        let mut view = self.slot_mut(id);
        let (meta_dst, data_dst) = view.split();
        copy_into(&mut meta_dst[..meta.len()], meta);
        copy_into(&mut data_dst[..data.len()], data);
        Ok(())
    }

    /// Whole slot for `id` (metadata followed by data).
    #[inline]
    #[must_use]
    pub fn get(&self, id: u64) -> &[u8] {
        let range = self.layout.slot_range(id);
        &self.bytes()[range]
    }

    /// Whole slot for `id`, writable in place.
    #[inline]
    pub fn get_mut(&mut self, id: u64) -> &mut [u8] {
        let range = self.layout.slot_range(id);
        &mut self.bytes_mut()[range]
    }

    /// Split read view of the slot for `id`.
    #[inline]
    #[must_use]
    pub fn slot(&self, id: u64) -> SlotView<'_> {
        let (meta, data) = self.get(id).split_at(self.layout.meta_bytes());
        SlotView { meta, data }
    }

    /// Split write view of the slot for `id`.
    #[inline]
    pub fn slot_mut(&mut self, id: u64) -> SlotViewMut<'_> {
        let meta_bytes = self.layout.meta_bytes();
        let (meta, data) = self.get_mut(id).split_at_mut(meta_bytes);
        SlotViewMut { meta, data }
    }

    /// Unmap the store and remove its name.
    ///
    /// Other processes keep their mappings until they drop them.
    pub fn destroy(self) -> Result<()> {
        let name = self.segment.name().to_string();
        drop(self.segment);
        ShmSegment::unlink(&name)?;
        log::info!("[STORE] destroyed {}", name);
        Ok(())
    }
}

impl std::fmt::Debug for RingStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RingStore")
            .field("name", &self.segment.name())
            .field("layout", &self.layout)
            .finish()
    }
}

#[inline]
fn copy_into(dst: &mut [u8], src: &[u8]) {
    debug_assert_eq!(dst.len(), src.len());
    // SAFETY:
    // - dst and src have equal length (asserted above, guaranteed by callers)
    // - src is caller memory, dst is inside the mapping: they never overlap
    unsafe { ptr::copy_nonoverlapping(src.as_ptr(), dst.as_mut_ptr(), src.len()) };
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unique_name() -> String {
        format!("stdaq_ring_test_{}_{}", std::process::id(), fastrand::u64(..))
    }

    #[test]
    fn test_write_then_get() {
        let name = unique_name();
        let mut store = RingStore::create(&name, 16, 4).expect("create");

        store.write(2, b"hello").unwrap();
        assert_eq!(&store.get(2)[..5], b"hello");
        assert_eq!(&store.get(6)[..5], b"hello");

        store.destroy().unwrap();
    }

    #[test]
    fn test_congruent_ids_last_writer_wins() {
        let name = unique_name();
        let mut store = RingStore::create(&name, 8, 10).expect("create");

        store.write(3, &[1; 8]).unwrap();
        store.write(13, &[2; 8]).unwrap();
        assert_eq!(store.get(3), &[2; 8]);
        assert_eq!(store.get(13), &[2; 8]);

        store.destroy().unwrap();
    }

    #[test]
    fn test_payload_too_large() {
        let name = unique_name();
        let mut store = RingStore::create_split(&name, 4, 8, 2).expect("create");

        let err = store.write(0, &[0; 9]).unwrap_err();
        assert!(matches!(
            err,
            StoreError::PayloadTooLarge {
                size: 9,
                capacity: 8
            }
        ));
        assert!(store.write_split(0, &[0; 5], &[0; 8]).is_err());
        assert!(store.write(0, &[7; 8]).is_ok());

        store.destroy().unwrap();
    }

    #[test]
    fn test_split_views() {
        let name = unique_name();
        let mut store = RingStore::create_split(&name, 4, 8, 3).expect("create");

        store.write_split(5, &[9, 9, 9, 9], &[1, 2, 3, 4, 5, 6, 7, 8]).unwrap();
        let view = store.slot(5);
        assert_eq!(view.meta(), &[9, 9, 9, 9]);
        assert_eq!(view.data(), &[1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(store.get(5).len(), 12);

        // Neighbouring slots untouched
        assert!(store.slot(4).data().iter().all(|&b| b == 0));
        assert!(store.slot(6).meta().iter().all(|&b| b == 0));

        {
            let mut view = store.slot_mut(5);
            view.data()[0] = 42;
            view.meta()[3] = 0;
        }
        assert_eq!(store.slot(5).data()[0], 42);
        assert_eq!(store.slot(5).meta(), &[9, 9, 9, 0]);

        store.destroy().unwrap();
    }

    #[test]
    fn test_open_sees_writer_bytes() {
        let name = unique_name();
        let mut writer = RingStore::create_split(&name, 8, 32, 4).expect("create");
        let reader = RingStore::open(&name, 8, 32, 4).expect("open");

        writer.write_split(1, &[1; 8], &[0xAB; 32]).unwrap();
        assert_eq!(reader.slot(1).meta(), &[1; 8]);
        assert_eq!(reader.slot(1).data(), &[0xAB; 32]);

        drop(reader);
        writer.destroy().unwrap();
    }

    #[test]
    fn test_open_missing_store() {
        let err = RingStore::open(&unique_name(), 0, 16, 4).unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[test]
    fn test_destroy_removes_name() {
        let name = unique_name();
        let store = RingStore::create(&name, 16, 2).expect("create");
        assert!(ShmSegment::exists(&name));
        store.destroy().unwrap();
        assert!(!ShmSegment::exists(&name));
    }

    #[test]
    fn test_invalid_geometry() {
        assert!(matches!(
            RingStore::create(&unique_name(), 16, 0),
            Err(StoreError::InvalidGeometry(_))
        ));
    }
}
