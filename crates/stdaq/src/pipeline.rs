// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Producer and consumer glue.
//!
//! # Producer (one per module)
//!
//! ```text
//! PacketReceiver --batch--> FrameReassembler --frame--> ModuleWriter
//!                                                       |- RingStore.write_split(image_id, meta, tile)
//!                                                       '- Notifier.send(image_id)
//! ```
//!
//! # Consumer (one per detector)
//!
//! ```text
//! NotifySubscriber (per module) --id--> ImageAssembler
//!     |- ImageSynchronizer.process_arrival(image_id, module)
//!     |- accepted arrivals: copy module slot into the image slot at the module's rank
//!     '- pop_next_complete() --> image Notifier.send(image_id)
//! ```
//!
//! The image store slot holds `n_modules` frame metadata records followed by
//! `n_modules` tiles, both in module rank order.

use crate::config::{image_store_name, module_store_name, notify_name, BufferSizing, DetectorConfig, STATS_TIME};
use crate::error::Result;
use crate::frame::{FrameMeta, FrameReassembler, FrameSink, FrameView, FRAME_META_BYTES};
use crate::notify::{NotifySubscriber, Notifier};
use crate::recv::{NetError, PacketReceiver, ReceiverConfig};
use crate::stats::PeriodicReporter;
use crate::store::RingStore;
use crate::sync::{ArrivalOutcome, ImageSynchronizer, ModuleMask};
use crate::{ImageId, ModuleId};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Upper bound on one idle wait of the assembler loop.
const ASSEMBLER_IDLE_WAIT: Duration = Duration::from_millis(5);

// =======================================================================
// Producer side
// =======================================================================

/// Frame sink that stores frames in the module's ring store and announces them.
pub struct ModuleWriter {
    store: RingStore,
    notifier: Notifier,
}

impl ModuleWriter {
    /// Create the store `store_name` (meta + `frame_bytes` per slot) and its notifier.
    pub fn create(store_name: &str, frame_bytes: usize, sizing: &BufferSizing) -> Result<Self> {
        let store = RingStore::create_split(store_name, FRAME_META_BYTES, frame_bytes, sizing.n_slots)?;
        let notifier = Notifier::create(&notify_name(store_name), sizing.notify_slots)?;
        Ok(Self { store, notifier })
    }

    /// Writer for one module of a configured detector.
    pub fn for_module(config: &DetectorConfig, module_id: ModuleId, sizing: &BufferSizing) -> Result<Self> {
        Self::create(
            &module_store_name(&config.detector_name, module_id),
            config.module_n_bytes(),
            sizing,
        )
    }

    #[must_use]
    pub fn store(&self) -> &RingStore {
        &self.store
    }

    /// Frames announced so far.
    #[must_use]
    pub fn sent(&self) -> u64 {
        self.notifier.sent()
    }

    /// Unmap and unlink the store and its notifier.
    pub fn destroy(self) -> Result<()> {
        self.notifier.destroy()?;
        self.store.destroy()?;
        Ok(())
    }
}

impl FrameSink for ModuleWriter {
    fn emit(&mut self, frame: FrameView<'_>) {
        let id = frame.meta.image_id;
        match self.store.write_split(id, &frame.meta.encode(), frame.data) {
            Ok(()) => self.notifier.send(id),
            Err(e) => log::error!(
                "[STORE] module {} frame for image {} not stored: {}",
                frame.meta.module_id,
                id,
                e
            ),
        }
    }
}

/// One module's producer loop: receive, reassemble, store, notify.
pub struct ModuleStream {
    receiver: PacketReceiver,
    reassembler: FrameReassembler,
    writer: ModuleWriter,
    reporter: PeriodicReporter,
}

impl ModuleStream {
    #[must_use]
    pub fn new(receiver: PacketReceiver, reassembler: FrameReassembler, writer: ModuleWriter) -> Self {
        Self {
            receiver,
            reassembler,
            writer,
            reporter: PeriodicReporter::new(STATS_TIME),
        }
    }

    /// Bind the module's port and create its store.
    pub fn from_config(config: &DetectorConfig, module_id: ModuleId, sizing: &BufferSizing) -> Result<Self> {
        config.validate()?;
        let layout = config.packet_layout();
        let receiver = PacketReceiver::bind(config.udp_port(module_id), &ReceiverConfig::for_layout(&layout))?;
        let reassembler = FrameReassembler::new(layout, module_id).with_bit_depth(config.bit_depth);
        let writer = ModuleWriter::for_module(config, module_id, sizing)?;

        log::info!(
            "[UDP] module {} of {} listening on port {}",
            module_id,
            config.detector_name,
            config.udp_port(module_id)
        );

        Ok(Self::new(receiver, reassembler, writer).with_reporter(
            PeriodicReporter::new(STATS_TIME)
                .with_tag("detector_name", &config.detector_name)
                .with_tag("module_id", module_id),
        ))
    }

    #[must_use]
    pub fn with_reporter(mut self, reporter: PeriodicReporter) -> Self {
        self.reporter = reporter;
        self
    }

    #[must_use]
    pub fn reassembler(&self) -> &FrameReassembler {
        &self.reassembler
    }

    #[must_use]
    pub fn writer(&self) -> &ModuleWriter {
        &self.writer
    }

    #[must_use]
    pub fn receiver(&self) -> &PacketReceiver {
        &self.receiver
    }

    /// One receive call plus reassembly. Returns the number of datagrams handled.
    pub fn poll(&mut self) -> std::result::Result<usize, NetError> {
        let batch = self.receiver.receive_many()?;
        let n = batch.len();
        self.reassembler.process_batch(batch.iter(), &mut self.writer);
        self.reporter.maybe_report(&**self.reassembler.stats());
        Ok(n)
    }

    /// Poll until `running` is cleared, then emit any partial frame.
    pub fn run(&mut self, running: &AtomicBool) -> Result<()> {
        while running.load(Ordering::Relaxed) {
            self.poll()?;
        }
        self.reassembler.flush(&mut self.writer);
        self.reporter.report_now(&**self.reassembler.stats());
        Ok(())
    }

    /// Close the socket and remove the module store.
    pub fn shutdown(self) -> Result<()> {
        self.receiver.disconnect();
        self.writer.destroy()
    }
}

// =======================================================================
// Consumer side
// =======================================================================

struct ModuleInput {
    module_id: ModuleId,
    rank: usize,
    store: RingStore,
    subscriber: NotifySubscriber,
}

/// Assembles module tiles into image slots and publishes complete images.
pub struct ImageAssembler {
    inputs: Vec<ModuleInput>,
    tile_bytes: usize,
    image_store: RingStore,
    image_notifier: Notifier,
    sync: ImageSynchronizer,
    reporter: PeriodicReporter,
    overwritten: u64,
}

impl ImageAssembler {
    /// Attach to every module store of `config` and create the image store.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` while a module producer has not created
    /// its store yet; callers retry.
    pub fn attach(config: &DetectorConfig, sizing: &BufferSizing) -> Result<Self> {
        config.validate()?;
        let mask = config.module_mask();
        let n_modules = mask.count();
        let tile_bytes = config.module_n_bytes();

        let inputs = mask
            .iter()
            .enumerate()
            .map(|(rank, module_id)| {
                let name = module_store_name(&config.detector_name, module_id);
                let store = RingStore::open(&name, FRAME_META_BYTES, tile_bytes, sizing.n_slots)?;
                let subscriber = NotifySubscriber::attach(&notify_name(&name), sizing.notify_slots)?;
                Ok(ModuleInput {
                    module_id,
                    rank,
                    store,
                    subscriber,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let image_name = image_store_name(&config.detector_name);
        let image_store = RingStore::create_split(
            &image_name,
            n_modules * FRAME_META_BYTES,
            n_modules * tile_bytes,
            sizing.n_slots,
        )?;
        let image_notifier = Notifier::create(&notify_name(&image_name), sizing.notify_slots)?;

        log::info!(
            "[SYNC] assembling {} modules of {} into {}",
            n_modules,
            config.detector_name,
            image_name
        );

        Ok(Self {
            inputs,
            tile_bytes,
            image_store,
            image_notifier,
            sync: ImageSynchronizer::new(mask, sizing.max_in_flight),
            reporter: PeriodicReporter::new(STATS_TIME).with_tag("detector_name", &config.detector_name),
            overwritten: 0,
        })
    }

    #[must_use]
    pub fn with_reporter(mut self, reporter: PeriodicReporter) -> Self {
        self.reporter = reporter;
        self
    }

    #[must_use]
    pub fn expected(&self) -> ModuleMask {
        self.sync.expected()
    }

    #[must_use]
    pub fn synchronizer(&self) -> &ImageSynchronizer {
        &self.sync
    }

    #[must_use]
    pub fn image_store(&self) -> &RingStore {
        &self.image_store
    }

    /// Module notifications whose slot was already reused when read.
    #[must_use]
    pub fn overwritten(&self) -> u64 {
        self.overwritten
    }

    /// Handle every pending module notification and publish completed images.
    /// Returns the number of module frames handled.
    pub fn poll(&mut self) -> usize {
        let mut handled = 0;
        for input in &mut self.inputs {
            while let Some(id) = input.subscriber.try_recv() {
                handled += 1;
                if !accept_arrival(input, &mut self.image_store, &mut self.sync, self.tile_bytes, id) {
                    self.overwritten += 1;
                }
            }
        }
        while let Some(id) = self.sync.pop_next_complete() {
            self.image_notifier.send(id);
        }
        self.reporter.maybe_report(&**self.sync.stats());
        handled
    }

    /// Poll until `running` is cleared. Waits on the first module's notifier
    /// when idle.
    pub fn run(&mut self, running: &AtomicBool) {
        while running.load(Ordering::Relaxed) {
            if self.poll() > 0 {
                continue;
            }
            let Some(first) = self.inputs.first_mut() else {
                break;
            };
            if let Some(id) = first.subscriber.recv_timeout(ASSEMBLER_IDLE_WAIT) {
                if !accept_arrival(first, &mut self.image_store, &mut self.sync, self.tile_bytes, id) {
                    self.overwritten += 1;
                }
            }
        }
        self.reporter.report_now(&**self.sync.stats());
    }

    /// Remove the image store and its notifier.
    pub fn destroy(self) -> Result<()> {
        self.image_notifier.destroy()?;
        self.image_store.destroy()?;
        Ok(())
    }
}

/// Record one module arrival and copy its tile into the image slot.
///
/// Rejected arrivals (late duplicates of a published image, unexpected
/// modules) leave the image slot untouched. Returns false if the module slot
/// already holds a newer image.
fn accept_arrival(
    input: &ModuleInput,
    image_store: &mut RingStore,
    sync: &mut ImageSynchronizer,
    tile_bytes: usize,
    id: ImageId,
) -> bool {
    let src = input.store.slot(id);
    match FrameMeta::decode(src.meta()) {
        Some(meta) if meta.image_id == id => {}
        other => {
            log::warn!(
                "[SYNC] module {} slot for image {} overwritten (now {:?})",
                input.module_id,
                id,
                other.map(|m| m.image_id)
            );
            return false;
        }
    }

    let outcome = sync.process_arrival(id, input.module_id);
    log_outcome(outcome, id, input.module_id);
    if matches!(outcome, ArrivalOutcome::DuplicateDropped | ArrivalOutcome::UnexpectedModule) {
        return true;
    }

    let mut dst = image_store.slot_mut(id);
    let (meta_dst, data_dst) = dst.split();
    let meta_at = input.rank * FRAME_META_BYTES;
    meta_dst[meta_at..meta_at + FRAME_META_BYTES].copy_from_slice(&src.meta()[..FRAME_META_BYTES]);
    let tile_at = input.rank * tile_bytes;
    data_dst[tile_at..tile_at + tile_bytes].copy_from_slice(src.data());
    true
}

fn log_outcome(outcome: ArrivalOutcome, id: ImageId, module_id: ModuleId) {
    match outcome {
        ArrivalOutcome::Completed => log::trace!("[SYNC] image {} complete", id),
        ArrivalOutcome::EvictedOther(evicted) => {
            log::debug!("[SYNC] image {} evicted by arrival of {}/{}", evicted, id, module_id);
        }
        ArrivalOutcome::Pending | ArrivalOutcome::DuplicateDropped | ArrivalOutcome::UnexpectedModule => {}
    }
}
