// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Module frames: metadata record, reassembly and statistics.
//!
//! A module frame is one detector module's tile of one acquisition, rebuilt
//! from `packets_per_frame` UDP packets. Each emitted frame carries a
//! [`FrameMeta`], stored in the metadata sub-region of the module's store slot.

mod reassembler;
mod stats;

pub use reassembler::{FrameReassembler, FrameState};
pub use stats::FrameStats;

use crate::{ImageId, ModuleId};

/// Bytes of an encoded [`FrameMeta`].
pub const FRAME_META_BYTES: usize = 64;

/// Per-frame metadata.
///
/// # Wire Format (little-endian, 64 bytes)
///
/// ```text
/// 0..8    image_id
/// 8..16   frame_key
/// 16..24  n_missing_packets
/// 24..28  n_packets_per_frame
/// 28..30  module_id
/// 30..32  bit_depth
/// 32..34  pos_y
/// 34..36  pos_x
/// 36..64  reserved (zero)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameMeta {
    pub image_id: ImageId,
    pub frame_key: u64,
    pub n_missing_packets: u64,
    pub n_packets_per_frame: u32,
    pub module_id: ModuleId,
    pub bit_depth: u16,
    pub pos_y: u16,
    pub pos_x: u16,
}

impl FrameMeta {
    #[must_use]
    pub fn encode(&self) -> [u8; FRAME_META_BYTES] {
        let mut out = [0u8; FRAME_META_BYTES];
        out[0..8].copy_from_slice(&self.image_id.to_le_bytes());
        out[8..16].copy_from_slice(&self.frame_key.to_le_bytes());
        out[16..24].copy_from_slice(&self.n_missing_packets.to_le_bytes());
        out[24..28].copy_from_slice(&self.n_packets_per_frame.to_le_bytes());
        out[28..30].copy_from_slice(&self.module_id.to_le_bytes());
        out[30..32].copy_from_slice(&self.bit_depth.to_le_bytes());
        out[32..34].copy_from_slice(&self.pos_y.to_le_bytes());
        out[34..36].copy_from_slice(&self.pos_x.to_le_bytes());
        out
    }

    /// Decode from the start of `buf`. Returns `None` if it is too short.
    #[must_use]
    pub fn decode(buf: &[u8]) -> Option<Self> {
        let buf = buf.get(..FRAME_META_BYTES)?;
        let u64_at = |at: usize| u64::from_le_bytes(buf[at..at + 8].try_into().unwrap_or([0; 8]));
        let u32_at = |at: usize| u32::from_le_bytes(buf[at..at + 4].try_into().unwrap_or([0; 4]));
        let u16_at = |at: usize| u16::from_le_bytes([buf[at], buf[at + 1]]);

        Some(Self {
            image_id: u64_at(0),
            frame_key: u64_at(8),
            n_missing_packets: u64_at(16),
            n_packets_per_frame: u32_at(24),
            module_id: u16_at(28),
            bit_depth: u16_at(30),
            pos_y: u16_at(32),
            pos_x: u16_at(34),
        })
    }

    /// True if every packet of the frame arrived.
    #[inline]
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.n_missing_packets == 0
    }
}

/// One emitted frame: metadata plus the reassembled tile.
#[derive(Debug, Clone, Copy)]
pub struct FrameView<'a> {
    pub meta: FrameMeta,
    pub data: &'a [u8],
}

/// Receiver of emitted frames.
///
/// Called exactly once per frame, in emission order. The data borrow ends
/// when `emit` returns.
pub trait FrameSink {
    fn emit(&mut self, frame: FrameView<'_>);
}

impl<F> FrameSink for F
where
    F: FnMut(FrameView<'_>),
{
    fn emit(&mut self, frame: FrameView<'_>) {
        self(frame);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_meta_layout() {
        let meta = FrameMeta {
            image_id: 0x0102_0304_0506_0708,
            frame_key: 9,
            n_missing_packets: 3,
            n_packets_per_frame: 128,
            module_id: 7,
            bit_depth: 16,
            pos_y: 1,
            pos_x: 2,
        };
        let raw = meta.encode();
        assert_eq!(raw[0], 0x08);
        assert_eq!(raw[7], 0x01);
        assert_eq!(raw[24], 128);
        assert_eq!(raw[28], 7);
        assert!(raw[36..].iter().all(|&b| b == 0));
        assert_eq!(FrameMeta::decode(&raw), Some(meta));
    }

    #[test]
    fn test_decode_short_buffer() {
        assert_eq!(FrameMeta::decode(&[0u8; 63]), None);
        assert!(FrameMeta::decode(&[0u8; 100]).is_some());
    }
}
