// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! stdaq-udp-sync - Image assembler
//!
//! Follows every module store of a detector, copies module tiles into the
//! `{detector}-image` store and announces each image once all modules have
//! delivered it.

use clap::Parser;
use stdaq::config::BufferSizing;
use stdaq::{DetectorConfig, Error, ImageAssembler, StoreError};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

const ATTACH_RETRY: Duration = Duration::from_millis(500);

/// Assemble module frames into images
#[derive(Parser, Debug)]
#[command(name = "stdaq-udp-sync")]
#[command(version = stdaq::VERSION)]
#[command(about = "Synchronize module streams into complete images")]
struct Args {
    /// Detector JSON file
    detector_json: PathBuf,

    /// Ring store depth in slots (must match the receivers)
    #[arg(long, default_value_t = stdaq::config::RAM_BUFFER_N_SLOTS)]
    n_slots: usize,

    /// Incomplete images tracked before the oldest is dropped
    #[arg(long, default_value_t = stdaq::config::SYNC_N_IMAGES_BUFFER)]
    max_in_flight: usize,

    /// Log filter (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn main() {
    let args = Args::parse();
    env_logger::Builder::new().parse_filters(&args.log_level).init();

    if let Err(e) = run(&args) {
        log::error!("[SYNC] {}", e);
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run(args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    let config = DetectorConfig::from_json_file(&args.detector_json)?;
    let sizing = BufferSizing {
        n_slots: args.n_slots,
        max_in_flight: args.max_in_flight,
        ..BufferSizing::default()
    };

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })?;

    // Receivers create the module stores; wait for all of them.
    let mut assembler = loop {
        match ImageAssembler::attach(&config, &sizing) {
            Ok(assembler) => break assembler,
            Err(Error::Store(StoreError::NotFound(name))) => {
                log::info!("[SYNC] waiting for {}", name);
                if !running.load(Ordering::SeqCst) {
                    return Ok(());
                }
                std::thread::sleep(ATTACH_RETRY);
            }
            Err(e) => return Err(e.into()),
        }
    };

    assembler.run(&running);

    let stats = assembler.synchronizer().stats();
    log::info!(
        "[SYNC] stopped: {} images complete, {} evicted, {} duplicates dropped",
        stats.completed(),
        stats.evicted(),
        stats.duplicate_dropped()
    );
    assembler.destroy()?;
    Ok(())
}
