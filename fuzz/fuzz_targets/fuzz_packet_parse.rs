// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

#![no_main]

use libfuzzer_sys::fuzz_target;
use stdaq::PacketLayout;

fuzz_target!(|data: &[u8]| {
    // Jungfrau header (f64 bunchid as image id)
    let _ = PacketLayout::jungfrau().parse(data);

    // Eiger header at every bit depth
    for bit_depth in [4, 8, 16, 32] {
        let _ = PacketLayout::eiger(bit_depth).parse(data);
    }

    let _ = PacketLayout::minimal(8, 4).parse(data);
});
