// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Packet-to-frame reassembly for one module stream.
//!
//! # State Machine
//!
//! ```text
//!          first packet                     last sequence number
//!  Idle ------------------> InProgress ---------------------------> emit -> Idle
//!                             |    ^
//!          new frame key      |    | same frame key
//!          (emit partial) <---+----+
//! ```
//!
//! A frame is emitted when its last packet arrives, or when a packet of
//! another frame shows up first. The state survives between batches, so a
//! frame split across two `receive_many()` calls is rebuilt in one piece.

use super::stats::FrameStats;
use super::{FrameMeta, FrameSink, FrameView};
use crate::recv::PacketLayout;
use crate::{ImageId, ModuleId};
use std::sync::Arc;

/// Reassembly state carried between batches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameState {
    /// No frame open
    Idle,
    /// Packets of `frame_key` are being collected
    InProgress {
        frame_key: u64,
        image_id: ImageId,
        /// Packets not received yet
        missing_count: u32,
        /// End of the most recently copied payload
        next_offset: usize,
    },
}

/// Rebuilds module frames from packet batches and hands them to a [`FrameSink`].
pub struct FrameReassembler {
    layout: PacketLayout,
    module_id: ModuleId,
    bit_depth: u16,
    state: FrameState,
    pos_y: u16,
    pos_x: u16,
    /// Reassembly buffer, one frame
    buffer: Vec<u8>,
    /// One bit per sequence number of the open frame
    received: Vec<u64>,
    /// Key of the last emitted frame, to drop its late packets
    last_emitted: Option<u64>,
    stats: Arc<FrameStats>,
}

impl FrameReassembler {
    /// # Panics
    ///
    /// Panics if `layout` fails [`PacketLayout::validate`].
    #[must_use]
    pub fn new(layout: PacketLayout, module_id: ModuleId) -> Self {
        if let Err(msg) = layout.validate() {
            panic!("invalid packet layout: {msg}");
        }
        let words = (layout.packets_per_frame as usize).div_ceil(64);
        Self {
            layout,
            module_id,
            bit_depth: 16,
            state: FrameState::Idle,
            pos_y: 0,
            pos_x: 0,
            buffer: vec![0u8; layout.frame_bytes()],
            received: vec![0u64; words],
            last_emitted: None,
            stats: Arc::new(FrameStats::new()),
        }
    }

    /// Bit depth recorded in emitted metadata (default 16).
    #[must_use]
    pub fn with_bit_depth(mut self, bit_depth: u16) -> Self {
        self.bit_depth = bit_depth;
        self
    }

    /// Count into shared statistics instead of private ones.
    #[must_use]
    pub fn with_stats(mut self, stats: Arc<FrameStats>) -> Self {
        self.stats = stats;
        self
    }

    #[inline]
    #[must_use]
    pub fn state(&self) -> FrameState {
        self.state
    }

    #[must_use]
    pub fn stats(&self) -> &Arc<FrameStats> {
        &self.stats
    }

    #[must_use]
    pub fn layout(&self) -> &PacketLayout {
        &self.layout
    }

    #[must_use]
    pub fn module_id(&self) -> ModuleId {
        self.module_id
    }

    /// Feed one batch of raw datagrams, in arrival order.
    pub fn process_batch<'p, I, S>(&mut self, packets: I, sink: &mut S)
    where
        I: IntoIterator<Item = &'p [u8]>,
        S: FrameSink + ?Sized,
    {
        for raw in packets {
            self.process_packet(raw, sink);
        }
    }

    /// Feed one raw datagram.
    pub fn process_packet<S: FrameSink + ?Sized>(&mut self, raw: &[u8], sink: &mut S) {
        let Some(packet) = self.layout.parse(raw) else {
            self.stats.inc_malformed();
            log::debug!(
                "[FRAME] module {} dropped datagram of {} bytes (expected {})",
                self.module_id,
                raw.len(),
                self.layout.packet_bytes
            );
            return;
        };

        let seq = packet.sequence_number;
        if seq >= self.layout.packets_per_frame {
            self.stats.inc_malformed();
            log::debug!(
                "[FRAME] module {} dropped packet {} of frame {} (frame has {})",
                self.module_id,
                seq,
                packet.frame_key,
                self.layout.packets_per_frame
            );
            return;
        }

        let same_frame =
            matches!(self.state, FrameState::InProgress { frame_key, .. } if frame_key == packet.frame_key);

        if !same_frame {
            if self.state == FrameState::Idle && self.last_emitted == Some(packet.frame_key) {
                // Straggler of a frame that was already closed by its last packet
                self.stats.inc_duplicate();
                return;
            }
            self.emit(sink);
            self.begin(packet.frame_key, packet.image_id, packet.pos_y, packet.pos_x);
        }

        let FrameState::InProgress {
            missing_count,
            next_offset,
            ..
        } = &mut self.state
        else {
            unreachable!("frame opened above");
        };

        let word = seq as usize / 64;
        let bit = 1u64 << (seq % 64);
        if self.received[word] & bit != 0 {
            self.stats.inc_duplicate();
        } else {
            self.received[word] |= bit;
            let start = seq as usize * self.layout.payload_bytes;
            let end = start + self.layout.payload_bytes;
            self.buffer[start..end].copy_from_slice(packet.payload);
            *missing_count -= 1;
            *next_offset = end;
        }

        if seq == self.layout.last_sequence() {
            self.emit(sink);
        }
    }

    /// Emit a partially received frame, if any. Use at stream teardown.
    pub fn flush<S: FrameSink + ?Sized>(&mut self, sink: &mut S) {
        self.emit(sink);
    }

    fn begin(&mut self, frame_key: u64, image_id: ImageId, pos_y: u16, pos_x: u16) {
        self.received.fill(0);
        self.pos_y = pos_y;
        self.pos_x = pos_x;
        self.state = FrameState::InProgress {
            frame_key,
            image_id,
            missing_count: self.layout.packets_per_frame,
            next_offset: 0,
        };
    }

    /// Emit the open frame (if any) and go idle.
    fn emit<S: FrameSink + ?Sized>(&mut self, sink: &mut S) {
        let FrameState::InProgress {
            frame_key,
            image_id,
            missing_count,
            ..
        } = self.state
        else {
            return;
        };

        if missing_count > 0 {
            self.zero_missing();
            log::debug!(
                "[FRAME] module {} frame {} (image {}) missing {} packets",
                self.module_id,
                frame_key,
                image_id,
                missing_count
            );
        }

        let meta = FrameMeta {
            image_id,
            frame_key,
            n_missing_packets: u64::from(missing_count),
            n_packets_per_frame: self.layout.packets_per_frame,
            module_id: self.module_id,
            bit_depth: self.bit_depth,
            pos_y: self.pos_y,
            pos_x: self.pos_x,
        };

        sink.emit(FrameView {
            meta,
            data: &self.buffer,
        });
        self.stats.record_frame(u64::from(missing_count));

        self.state = FrameState::Idle;
        self.last_emitted = Some(frame_key);
    }

    /// Clear payload regions of packets that never arrived.
    fn zero_missing(&mut self) {
        let payload = self.layout.payload_bytes;
        for seq in 0..self.layout.packets_per_frame as usize {
            if self.received[seq / 64] & (1u64 << (seq % 64)) == 0 {
                self.buffer[seq * payload..(seq + 1) * payload].fill(0);
            }
        }
    }
}

impl std::fmt::Debug for FrameReassembler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameReassembler")
            .field("module_id", &self.module_id)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAYLOAD: usize = 8;
    const PACKETS: u32 = 4;

    fn layout() -> PacketLayout {
        PacketLayout::minimal(PAYLOAD, PACKETS)
    }

    fn packet(frame_key: u64, seq: u32) -> Vec<u8> {
        let mut raw = Vec::new();
        let fill = (frame_key as u8).wrapping_mul(16).wrapping_add(seq as u8 + 1);
        layout().encode(&mut raw, frame_key, seq, frame_key, &[fill; PAYLOAD]);
        raw
    }

    /// Collects (meta, data) of every emitted frame.
    #[derive(Default)]
    struct Collect(Vec<(FrameMeta, Vec<u8>)>);

    impl FrameSink for Collect {
        fn emit(&mut self, frame: FrameView<'_>) {
            self.0.push((frame.meta, frame.data.to_vec()));
        }
    }

    fn feed(reassembler: &mut FrameReassembler, packets: &[Vec<u8>], sink: &mut Collect) {
        reassembler.process_batch(packets.iter().map(Vec::as_slice), sink);
    }

    #[test]
    fn test_complete_frame_emitted_on_last_packet() {
        let mut r = FrameReassembler::new(layout(), 2);
        let mut sink = Collect::default();

        feed(&mut r, &[packet(1, 0), packet(1, 1), packet(1, 2), packet(1, 3)], &mut sink);

        assert_eq!(sink.0.len(), 1);
        let (meta, data) = &sink.0[0];
        assert_eq!(meta.image_id, 1);
        assert_eq!(meta.module_id, 2);
        assert_eq!(meta.n_missing_packets, 0);
        assert_eq!(meta.n_packets_per_frame, PACKETS);
        assert_eq!(&data[0..PAYLOAD], &[17; PAYLOAD]);
        assert_eq!(&data[3 * PAYLOAD..], &[20; PAYLOAD]);
        assert_eq!(r.state(), FrameState::Idle);
    }

    #[test]
    fn test_key_change_emits_partial_frame_first() {
        let mut r = FrameReassembler::new(layout(), 0);
        let mut sink = Collect::default();

        // Frame A missing seq 2, then frame B begins
        feed(&mut r, &[packet(1, 0), packet(1, 1), packet(1, 3)], &mut sink);
        // seq 3 is the last sequence number, so A is already out
        assert_eq!(sink.0.len(), 1);
        assert_eq!(sink.0[0].0.n_missing_packets, 1);
        // Missing region zero-filled
        assert_eq!(&sink.0[0].1[2 * PAYLOAD..3 * PAYLOAD], &[0; PAYLOAD]);

        feed(&mut r, &[packet(2, 0)], &mut sink);
        assert_eq!(sink.0.len(), 1);
        assert!(matches!(
            r.state(),
            FrameState::InProgress {
                frame_key: 2,
                missing_count: 3,
                next_offset: PAYLOAD,
                ..
            }
        ));
    }

    #[test]
    fn test_new_key_without_last_packet() {
        let mut r = FrameReassembler::new(layout(), 0);
        let mut sink = Collect::default();

        feed(&mut r, &[packet(1, 0), packet(1, 1), packet(2, 0)], &mut sink);

        assert_eq!(sink.0.len(), 1);
        assert_eq!(sink.0[0].0.frame_key, 1);
        assert_eq!(sink.0[0].0.n_missing_packets, 2);

        // B's buffer holds only its own seq 0 payload
        r.flush(&mut sink);
        assert_eq!(sink.0.len(), 2);
        let (meta_b, data_b) = &sink.0[1];
        assert_eq!(meta_b.frame_key, 2);
        assert_eq!(meta_b.n_missing_packets, 3);
        assert_eq!(&data_b[0..PAYLOAD], &[33; PAYLOAD]);
        assert!(data_b[PAYLOAD..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_frame_spanning_batches() {
        let mut r = FrameReassembler::new(layout(), 0);
        let mut sink = Collect::default();

        feed(&mut r, &[packet(5, 0), packet(5, 1)], &mut sink);
        assert!(sink.0.is_empty());
        assert!(matches!(r.state(), FrameState::InProgress { missing_count: 2, .. }));

        feed(&mut r, &[packet(5, 2), packet(5, 3)], &mut sink);
        assert_eq!(sink.0.len(), 1);
        assert_eq!(sink.0[0].0.n_missing_packets, 0);
    }

    #[test]
    fn test_batch_ending_on_boundary_starts_fresh() {
        let mut r = FrameReassembler::new(layout(), 0);
        let mut sink = Collect::default();

        feed(&mut r, &[packet(1, 0), packet(1, 1), packet(1, 2), packet(1, 3)], &mut sink);
        assert_eq!(r.state(), FrameState::Idle);

        feed(&mut r, &[packet(2, 0)], &mut sink);
        assert_eq!(sink.0.len(), 1);
        assert!(matches!(
            r.state(),
            FrameState::InProgress {
                frame_key: 2,
                missing_count: 3,
                ..
            }
        ));
    }

    #[test]
    fn test_duplicate_packet_not_double_counted() {
        let mut r = FrameReassembler::new(layout(), 0);
        let mut sink = Collect::default();

        feed(
            &mut r,
            &[packet(1, 0), packet(1, 0), packet(1, 1), packet(1, 3)],
            &mut sink,
        );
        assert_eq!(sink.0[0].0.n_missing_packets, 1);
        assert_eq!(r.stats().duplicate_packets(), 1);
    }

    #[test]
    fn test_straggler_after_close_dropped() {
        let mut r = FrameReassembler::new(layout(), 0);
        let mut sink = Collect::default();

        feed(
            &mut r,
            &[packet(1, 0), packet(1, 1), packet(1, 3), packet(1, 2)],
            &mut sink,
        );
        assert_eq!(sink.0.len(), 1);
        assert_eq!(r.state(), FrameState::Idle);
        assert_eq!(r.stats().duplicate_packets(), 1);
    }

    #[test]
    fn test_malformed_packets_dropped() {
        let mut r = FrameReassembler::new(layout(), 0);
        let mut sink = Collect::default();

        let mut bad_seq = Vec::new();
        layout().encode(&mut bad_seq, 1, PACKETS, 1, &[0xFF; PAYLOAD]);
        let short = vec![0u8; 5];

        feed(&mut r, &[packet(1, 0), bad_seq, short], &mut sink);
        assert_eq!(r.stats().malformed_packets(), 2);
        assert!(matches!(r.state(), FrameState::InProgress { missing_count: 3, .. }));
    }

    #[test]
    fn test_flush_idle_is_noop() {
        let mut r = FrameReassembler::new(layout(), 0);
        let mut sink = Collect::default();
        r.flush(&mut sink);
        assert!(sink.0.is_empty());
    }

    #[test]
    fn test_stats_counted() {
        let mut r = FrameReassembler::new(layout(), 0);
        let mut sink = Collect::default();

        feed(&mut r, &[packet(1, 0), packet(1, 3), packet(2, 0), packet(2, 1), packet(2, 2), packet(2, 3)], &mut sink);
        let stats = r.stats();
        assert_eq!(stats.frames(), 2);
        assert_eq!(stats.corrupted_frames(), 1);
        assert_eq!(stats.missed_packets(), 2);
    }

    #[test]
    fn test_closure_sink() {
        let mut r = FrameReassembler::new(layout(), 0);
        let mut ids = Vec::new();
        let mut sink = |frame: FrameView<'_>| ids.push(frame.meta.image_id);

        r.process_batch(
            [packet(7, 0), packet(7, 3)].iter().map(Vec::as_slice),
            &mut sink,
        );
        assert_eq!(ids, vec![7]);
    }

    #[test]
    #[should_panic(expected = "invalid packet layout")]
    fn test_rejects_invalid_layout() {
        let _ = FrameReassembler::new(PacketLayout::minimal(8, 0), 0);
    }
}
