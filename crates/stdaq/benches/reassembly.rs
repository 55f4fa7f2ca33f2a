// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Reassembly Benchmark
//!
//! Measures the per-frame cost of turning a batch of module packets into a
//! tile, for the Jungfrau layout and the Eiger layout at each bit depth.
//! No sockets are involved; packets are pre-encoded in memory.

#![allow(clippy::uninlined_format_args)]
#![allow(clippy::cast_possible_truncation)]

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::hint::black_box as bb;
use stdaq::{FrameReassembler, FrameView, PacketLayout};

/// Encode `n_frames` consecutive complete frames.
fn encode_frames(layout: &PacketLayout, n_frames: u64) -> Vec<Vec<u8>> {
    let payload = vec![0xA5u8; layout.payload_bytes];
    let mut packets = Vec::with_capacity(n_frames as usize * layout.packets_per_frame as usize);
    for frame in 1..=n_frames {
        for seq in 0..layout.packets_per_frame {
            let mut out = Vec::new();
            layout.encode(&mut out, frame, seq, frame, &payload);
            packets.push(out);
        }
    }
    packets
}

fn bench_layouts(c: &mut Criterion) {
    let mut group = c.benchmark_group("reassembly_by_layout");

    let layouts = [
        ("jungfrau", PacketLayout::jungfrau()),
        ("eiger4", PacketLayout::eiger(4)),
        ("eiger16", PacketLayout::eiger(16)),
        ("eiger32", PacketLayout::eiger(32)),
    ];

    for (name, layout) in layouts {
        let packets = encode_frames(&layout, 8);
        group.throughput(Throughput::Bytes((layout.frame_bytes() * 8) as u64));
        group.bench_with_input(BenchmarkId::from_parameter(name), &packets, |b, packets| {
            b.iter(|| {
                let mut reassembler = FrameReassembler::new(layout, 0);
                let mut frames = 0u64;
                let mut sink = |frame: FrameView<'_>| {
                    bb(frame.data);
                    frames += 1;
                };
                reassembler.process_batch(packets.iter().map(Vec::as_slice), &mut sink);
                bb(frames)
            });
        });
    }

    group.finish();
}

fn bench_packet_loss(c: &mut Criterion) {
    let mut group = c.benchmark_group("reassembly_with_loss");
    let layout = PacketLayout::jungfrau();
    let all = encode_frames(&layout, 8);

    for drop_every in [0usize, 64, 8] {
        let packets: Vec<_> = all
            .iter()
            .enumerate()
            .filter(|(i, _)| drop_every == 0 || i % drop_every != 1)
            .map(|(_, p)| p.clone())
            .collect();

        group.bench_with_input(BenchmarkId::from_parameter(drop_every), &packets, |b, packets| {
            b.iter(|| {
                let mut reassembler = FrameReassembler::new(layout, 0);
                let mut missing = 0u64;
                let mut sink = |frame: FrameView<'_>| {
                    missing += frame.meta.n_missing_packets;
                };
                reassembler.process_batch(packets.iter().map(Vec::as_slice), &mut sink);
                reassembler.flush(&mut sink);
                bb(missing)
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_layouts, bench_packet_loss);
criterion_main!(benches);
