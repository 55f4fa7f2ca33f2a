// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Buffer constants and detector configuration.
//!
//! # Architecture
//!
//! - **Level 1 (Static)**: compile-time buffer constants (socket sizing, timeouts,
//!   ring depth, statistics period). **NEVER hardcode these elsewhere!**
//! - **Level 2 (Dynamic)**: [`DetectorConfig`], the per-deployment description of
//!   the detector, passed to constructors. Loading it from the detector JSON file
//!   is available with the `json-config` feature.
//!
//! Segment names are built here and handed to the stores as opaque keys; the
//! stores never derive names themselves.

use crate::recv::PacketLayout;
use crate::sync::ModuleMask;
use crate::ModuleId;
use std::fmt;
use std::time::Duration;

// =======================================================================
// UDP reception
// =======================================================================

/// Bytes of one slot in the kernel receive buffer estimate (largest packet + slack).
pub const BUFFER_UDP_RCVBUF_PACKET_BYTES: usize = 8246;

/// Number of full frames' worth of packets the kernel buffer should absorb.
pub const BUFFER_UDP_RCVBUF_N_SLOTS: usize = 100;

/// SO_RCVBUF request: 128 packets per slot x 100 slots x 8246 bytes.
pub const BUFFER_UDP_RCVBUF_BYTES: usize = 128 * BUFFER_UDP_RCVBUF_N_SLOTS * BUFFER_UDP_RCVBUF_PACKET_BYTES;

/// SO_RCVTIMEO for module sockets. Short so producers can observe stop requests.
pub const BUFFER_UDP_TIMEOUT: Duration = Duration::from_micros(2_000);

// =======================================================================
// Ring stores and synchronization
// =======================================================================

/// Number of slots in each ring store (10 seconds at 100 Hz).
pub const RAM_BUFFER_N_SLOTS: usize = 100 * 10;

/// Maximum number of incomplete images tracked by the synchronizer.
pub const SYNC_N_IMAGES_BUFFER: usize = 1000;

/// Number of ids each notifier ring can hold before slow subscribers lag.
pub const NOTIFY_N_SLOTS: usize = 4096;

/// Interval between statistics lines.
pub const STATS_TIME: Duration = Duration::from_secs(10);

/// Maximum number of modules a [`ModuleMask`] can describe.
pub const MAX_MODULES: usize = 128;

/// Depth of the stores, notifiers and synchronizer of one deployment.
///
/// Defaults to the constants above; tests and small setups shrink it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferSizing {
    /// Slots per ring store
    pub n_slots: usize,
    /// Ids retained per notifier
    pub notify_slots: usize,
    /// Incomplete images the synchronizer tracks
    pub max_in_flight: usize,
}

impl Default for BufferSizing {
    fn default() -> Self {
        Self {
            n_slots: RAM_BUFFER_N_SLOTS,
            notify_slots: NOTIFY_N_SLOTS,
            max_in_flight: SYNC_N_IMAGES_BUFFER,
        }
    }
}

// =======================================================================
// Segment naming
// =======================================================================

/// Ring store name for one module stream: `{detector}-{module}`.
#[must_use]
pub fn module_store_name(detector_name: &str, module_id: ModuleId) -> String {
    format!("{detector_name}-{module_id}")
}

/// Ring store name for assembled images: `{detector}-image`.
#[must_use]
pub fn image_store_name(detector_name: &str) -> String {
    format!("{detector_name}-image")
}

/// Notifier segment paired with a store: `{store}-notify`.
#[must_use]
pub fn notify_name(store_name: &str) -> String {
    format!("{store_name}-notify")
}

// =======================================================================
// Detector configuration
// =======================================================================

/// Detector families with a known packet layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "json-config", derive(serde::Deserialize))]
#[cfg_attr(feature = "json-config", serde(rename_all = "lowercase"))]
pub enum DetectorType {
    /// PSI Jungfrau (fixed 16-bit, 128 packets per module frame).
    Jungfrau,
    /// Dectris/PSI Eiger half-module links (packet count depends on bit depth).
    Eiger,
}

impl fmt::Display for DetectorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Jungfrau => write!(f, "jungfrau"),
            Self::Eiger => write!(f, "eiger"),
        }
    }
}

/// Configuration errors.
#[derive(Debug)]
pub enum ConfigError {
    /// Reading the configuration file failed
    Io(std::io::Error),
    /// The configuration file is not valid JSON for [`DetectorConfig`]
    #[cfg(feature = "json-config")]
    Json(serde_json::Error),
    /// A field holds an unusable value
    Invalid(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "Config I/O error: {e}"),
            #[cfg(feature = "json-config")]
            Self::Json(e) => write!(f, "Config parse error: {e}"),
            Self::Invalid(msg) => write!(f, "Invalid configuration: {msg}"),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            #[cfg(feature = "json-config")]
            Self::Json(e) => Some(e),
            Self::Invalid(_) => None,
        }
    }
}

/// Per-deployment description of the detector.
///
/// Only sizing and addressing are derived from it; the buffering core never
/// reads files on its own.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "json-config", derive(serde::Deserialize))]
pub struct DetectorConfig {
    /// Detector name, used as the prefix of every segment name.
    pub detector_name: String,
    /// Detector family (selects the packet layout).
    pub detector_type: DetectorType,
    /// Number of modules in the detector.
    pub n_modules: usize,
    /// Explicit module membership for sparse/partial detectors.
    /// `None` means modules `0..n_modules`.
    #[cfg_attr(feature = "json-config", serde(default))]
    pub module_ids: Option<Vec<ModuleId>>,
    /// Bits per pixel on the wire.
    pub bit_depth: u16,
    /// Full image height in pixels.
    pub image_pixel_height: usize,
    /// Full image width in pixels.
    pub image_pixel_width: usize,
    /// UDP port of module 0; module `m` listens on `start_udp_port + m`.
    pub start_udp_port: u16,
}

impl DetectorConfig {
    /// Load and validate a detector JSON file.
    #[cfg(feature = "json-config")]
    pub fn from_json_file(path: impl AsRef<std::path::Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(ConfigError::Io)?;
        Self::from_json_str(&content)
    }

    /// Parse and validate a detector JSON document.
    #[cfg(feature = "json-config")]
    pub fn from_json_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(content).map_err(ConfigError::Json)?;
        config.validate()?;
        Ok(config)
    }

    /// Check internal consistency.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.detector_name.is_empty() {
            return Err(ConfigError::Invalid("detector_name must not be empty".into()));
        }
        if self.detector_name.contains('/') {
            return Err(ConfigError::Invalid(format!(
                "detector_name cannot contain '/': {}",
                self.detector_name
            )));
        }
        if self.n_modules == 0 || self.n_modules > MAX_MODULES {
            return Err(ConfigError::Invalid(format!(
                "n_modules must be in 1..={MAX_MODULES}, got {}",
                self.n_modules
            )));
        }
        if let Some(ids) = &self.module_ids {
            if ids.len() != self.n_modules {
                return Err(ConfigError::Invalid(format!(
                    "module_ids lists {} modules but n_modules is {}",
                    ids.len(),
                    self.n_modules
                )));
            }
            if let Some(bad) = ids.iter().find(|&&m| usize::from(m) >= MAX_MODULES) {
                return Err(ConfigError::Invalid(format!(
                    "module id {bad} exceeds mask capacity {MAX_MODULES}"
                )));
            }
            if self.module_mask().count() != ids.len() {
                return Err(ConfigError::Invalid("module_ids contains duplicates".into()));
            }
        }
        if !matches!(self.bit_depth, 4 | 8 | 16 | 32) {
            return Err(ConfigError::Invalid(format!(
                "unsupported bit_depth {}",
                self.bit_depth
            )));
        }
        if self.detector_type == DetectorType::Jungfrau && self.bit_depth != 16 {
            return Err(ConfigError::Invalid("jungfrau streams are 16-bit".into()));
        }
        if self.image_pixel_height == 0 || self.image_pixel_width == 0 {
            return Err(ConfigError::Invalid("image dimensions must be non-zero".into()));
        }
        let last_port = usize::from(self.start_udp_port) + self.max_module_id() as usize;
        if last_port > usize::from(u16::MAX) {
            return Err(ConfigError::Invalid(format!(
                "module ports overflow u16 (start {} + module {})",
                self.start_udp_port,
                self.max_module_id()
            )));
        }
        Ok(())
    }

    /// Expected module membership as a bitmask.
    #[must_use]
    pub fn module_mask(&self) -> ModuleMask {
        match &self.module_ids {
            Some(ids) => ModuleMask::from_modules(ids.iter().copied()),
            None => ModuleMask::first_n(self.n_modules),
        }
    }

    /// UDP port of one module.
    #[must_use]
    pub fn udp_port(&self, module_id: ModuleId) -> u16 {
        self.start_udp_port.wrapping_add(module_id)
    }

    /// Wire layout of this detector's packets.
    #[must_use]
    pub fn packet_layout(&self) -> PacketLayout {
        match self.detector_type {
            DetectorType::Jungfrau => PacketLayout::jungfrau(),
            DetectorType::Eiger => PacketLayout::eiger(self.bit_depth),
        }
    }

    /// Bytes of one reassembled module tile.
    #[must_use]
    pub fn module_n_bytes(&self) -> usize {
        self.packet_layout().frame_bytes()
    }

    /// Bytes of one assembled image (all module tiles back to back).
    #[must_use]
    pub fn image_n_bytes(&self) -> usize {
        self.module_n_bytes() * self.n_modules
    }

    fn max_module_id(&self) -> ModuleId {
        match &self.module_ids {
            Some(ids) => ids.iter().copied().max().unwrap_or(0),
            None => (self.n_modules.saturating_sub(1)) as ModuleId,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn jungfrau_4m() -> DetectorConfig {
        DetectorConfig {
            detector_name: "JF07T32V01".into(),
            detector_type: DetectorType::Jungfrau,
            n_modules: 8,
            module_ids: None,
            bit_depth: 16,
            image_pixel_height: 2 * 512,
            image_pixel_width: 4 * 1024,
            start_udp_port: 50020,
        }
    }

    #[test]
    fn test_segment_names() {
        assert_eq!(module_store_name("JF07T32V01", 3), "JF07T32V01-3");
        assert_eq!(image_store_name("JF07T32V01"), "JF07T32V01-image");
        assert_eq!(notify_name("JF07T32V01-3"), "JF07T32V01-3-notify");
    }

    #[test]
    fn test_rcvbuf_constant() {
        assert_eq!(BUFFER_UDP_RCVBUF_BYTES, 105_548_800);
    }

    #[test]
    fn test_valid_config() {
        let config = jungfrau_4m();
        assert!(config.validate().is_ok());
        assert_eq!(config.module_mask().count(), 8);
        assert_eq!(config.udp_port(3), 50023);
        assert_eq!(config.module_n_bytes(), 1_048_576);
        assert_eq!(config.image_n_bytes(), 8 * 1_048_576);
    }

    #[test]
    fn test_sparse_modules() {
        let mut config = jungfrau_4m();
        config.n_modules = 3;
        config.module_ids = Some(vec![0, 2, 5]);
        assert!(config.validate().is_ok());
        let mask = config.module_mask();
        assert!(mask.contains(5));
        assert!(!mask.contains(1));
    }

    #[test]
    fn test_rejects_duplicate_module_ids() {
        let mut config = jungfrau_4m();
        config.n_modules = 3;
        config.module_ids = Some(vec![0, 2, 2]);
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_rejects_bad_values() {
        let mut config = jungfrau_4m();
        config.n_modules = 0;
        assert!(config.validate().is_err());

        let mut config = jungfrau_4m();
        config.bit_depth = 12;
        assert!(config.validate().is_err());

        let mut config = jungfrau_4m();
        config.detector_name = "a/b".into();
        assert!(config.validate().is_err());

        let mut config = jungfrau_4m();
        config.start_udp_port = u16::MAX;
        assert!(config.validate().is_err());
    }
}
