// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # stdaq - detector acquisition buffering layer
//!
//! Ingests per-module UDP packet streams from a multi-module pixel detector,
//! reassembles each module's image tile, stores tiles in shared-memory ring
//! stores that any number of consumer processes can map without copying, and
//! synchronizes the per-module tiles of one acquisition before signaling the
//! image downstream.
//!
//! ## Architecture
//!
//! ```text
//!  module 0 UDP --> PacketReceiver --> FrameReassembler --> ModuleWriter ---+
//!  module 1 UDP --> PacketReceiver --> FrameReassembler --> ModuleWriter ---+
//!       ...                                               (RingStore +     |
//!                                                           Notifier)       |
//!                                                                           v
//!                        ImageAssembler: copy tile into image RingStore slot,
//!                        ImageSynchronizer.process_arrival(image_id, module)
//!                                                                           |
//!                             pop_next_complete() --> image Notifier --> consumers
//! ```
//!
//! ## Key Types
//!
//! | Type | Description |
//! |------|-------------|
//! | [`RingStore`] | Named shared-memory arena addressed by `id mod n_slots` |
//! | [`PacketReceiver`] | Batched (`recvmmsg`) UDP receive for one module port |
//! | [`FrameReassembler`] | Packet-to-frame state machine, survives batch boundaries |
//! | [`ImageSynchronizer`] | Per-image module arrival tracking, in-order completion |
//! | [`Notifier`] | Id-only publish/subscribe over shared memory + futex |
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use stdaq::{ImageSynchronizer, ModuleMask};
//!
//! let mut sync = ImageSynchronizer::new(ModuleMask::first_n(4), 64);
//! for module in 0..4 {
//!     let _ = sync.process_arrival(7, module);
//! }
//! assert_eq!(sync.pop_next_complete(), Some(7));
//! ```

/// Compile-time buffer constants, detector configuration and segment naming.
pub mod config;
/// Crate-level error type wrapping the per-subsystem errors.
pub mod error;
/// Frame metadata, packet-to-frame reassembly and per-module frame statistics.
pub mod frame;
/// Id-only shared-memory notification channel.
pub mod notify;
/// Producer and consumer glue wiring receivers, stores, notifiers and the synchronizer.
pub mod pipeline;
/// Batched UDP reception and wire packet layouts.
pub mod recv;
/// Periodic statistics reporting in InfluxDB line protocol.
pub mod stats;
/// Shared-memory ring store.
pub mod store;
/// Cross-module image synchronization.
pub mod sync;

pub use config::DetectorConfig;
pub use error::{Error, Result};
pub use frame::{FrameMeta, FrameReassembler, FrameSink, FrameState, FrameStats, FrameView};
pub use notify::{NotifySubscriber, Notifier};
pub use pipeline::{ImageAssembler, ModuleStream, ModuleWriter};
pub use recv::{NetError, Packet, PacketBatch, PacketLayout, PacketReceiver, ReceiverConfig};
pub use stats::{PeriodicReporter, StatsSource};
pub use store::{RingStore, SlotLayout, SlotView, SlotViewMut, StoreError};
pub use sync::{ArrivalOutcome, ImageSynchronizer, ModuleMask, SharedSynchronizer, SyncStats};

/// Identifier of one acquisition event across all modules.
pub type ImageId = u64;

/// Identifier of one detector module (one UDP link, one image tile).
pub type ModuleId = u16;

/// stdaq version string.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
