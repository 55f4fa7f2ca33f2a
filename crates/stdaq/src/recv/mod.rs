// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Per-module UDP reception.
//!
//! [`PacketReceiver`] owns one bound socket and a pre-sized packet buffer and
//! pulls up to a batch of datagrams per call. [`PacketLayout`] describes how to
//! read the detector header out of each datagram.

mod packet;
mod receiver;

pub use packet::{FieldKind, HeaderField, Packet, PacketLayout, EIGER_MODULE_N_PIXELS, SLS_HEADER_BYTES};
pub use receiver::{PacketBatch, PacketReceiver, ReceiverConfig};

use std::fmt;
use std::io;

/// Errors that can occur while setting up or reading a module socket
///
/// A receive timeout is not an error; it yields an empty batch.
#[derive(Debug)]
pub enum NetError {
    /// Socket creation failed
    Socket(io::Error),

    /// Setting a socket option failed
    Configure(io::Error),

    /// Binding the module port failed
    Bind { port: u16, source: io::Error },

    /// Receive failed for a reason other than timeout or interruption
    Receive(io::Error),
}

impl fmt::Display for NetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Socket(e) => write!(f, "UDP socket creation failed: {e}"),
            Self::Configure(e) => write!(f, "UDP socket configuration failed: {e}"),
            Self::Bind { port, source } => write!(f, "UDP bind to port {port} failed: {source}"),
            Self::Receive(e) => write!(f, "UDP receive failed: {e}"),
        }
    }
}

impl std::error::Error for NetError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Socket(e) | Self::Configure(e) | Self::Receive(e) => Some(e),
            Self::Bind { source, .. } => Some(source),
        }
    }
}

/// Result type for network operations
pub type Result<T> = std::result::Result<T, NetError>;
