// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! stdaq-udp-recv - Module stream receiver
//!
//! Binds `start_udp_port + module_id`, reassembles module frames and writes
//! them to the `{detector}-{module}` ring store until Ctrl+C.

use clap::Parser;
use stdaq::config::BufferSizing;
use stdaq::{DetectorConfig, ModuleStream};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Receive one module's UDP stream into shared memory
#[derive(Parser, Debug)]
#[command(name = "stdaq-udp-recv")]
#[command(version = stdaq::VERSION)]
#[command(about = "Receive one detector module into its ring store")]
struct Args {
    /// Detector JSON file
    detector_json: PathBuf,

    /// Module to receive
    module_id: u16,

    /// Ring store depth in slots
    #[arg(long, default_value_t = stdaq::config::RAM_BUFFER_N_SLOTS)]
    n_slots: usize,

    /// Log filter (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn main() {
    let args = Args::parse();
    env_logger::Builder::new().parse_filters(&args.log_level).init();

    if let Err(e) = run(&args) {
        log::error!("[UDP] module {}: {}", args.module_id, e);
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run(args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    let config = DetectorConfig::from_json_file(&args.detector_json)?;
    if !config.module_mask().contains(args.module_id) {
        return Err(format!(
            "module {} is not part of {} ({:?})",
            args.module_id,
            config.detector_name,
            config.module_mask()
        )
        .into());
    }

    let sizing = BufferSizing {
        n_slots: args.n_slots,
        ..BufferSizing::default()
    };
    let mut stream = ModuleStream::from_config(&config, args.module_id, &sizing)?;

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })?;

    stream.run(&running)?;

    log::info!(
        "[UDP] module {} stopped after {} frames",
        args.module_id,
        stream.writer().sent()
    );
    stream.shutdown()?;
    Ok(())
}
