// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

#![no_main]

use libfuzzer_sys::fuzz_target;
use stdaq::{FrameReassembler, FrameView, PacketLayout};

const PAYLOAD: usize = 8;
const PACKETS: u32 = 4;

fuzz_target!(|data: &[u8]| {
    let layout = PacketLayout::minimal(PAYLOAD, PACKETS);
    let packet_bytes = layout.packet_bytes;
    let mut reassembler = FrameReassembler::new(layout, 0);

    let mut emitted = 0u64;
    let mut sink = |frame: FrameView<'_>| {
        assert_eq!(frame.data.len(), PAYLOAD * PACKETS as usize);
        assert!(frame.meta.n_missing_packets <= u64::from(PACKETS));
        emitted += 1;
    };

    // Mix well-sized and truncated datagrams
    for chunk in data.chunks(packet_bytes) {
        reassembler.process_packet(chunk, &mut sink);
    }
    reassembler.flush(&mut sink);

    assert_eq!(reassembler.stats().frames(), emitted);
});
