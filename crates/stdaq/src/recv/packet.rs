// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Wire packet layouts.
//!
//! Detector packets are fixed-size records: a small little-endian header
//! followed by one contiguous chunk of the module tile. A [`PacketLayout`]
//! names where the reassembler finds each header field, so one state machine
//! serves every detector family.
//!
//! # Stock layouts
//!
//! | Layout | Packet | Header | Payload | Packets/frame |
//! |--------|--------|--------|---------|---------------|
//! | `jungfrau()` | 8240 | 48 | 8192 | 128 |
//! | `eiger(16)` | 4144 | 48 | 4096 | 64 |
//!
//! Both share the SLS header: `framenum u64 @0`, `packetnum u32 @12`,
//! `bunchid f64 @16`, `row u16 @34`, `column u16 @36`.

use crate::ImageId;

/// Encoding of one header field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    U16,
    U32,
    U64,
    /// IEEE-754 double truncated toward zero (negative and NaN read as 0)
    F64,
}

impl FieldKind {
    #[inline]
    #[must_use]
    pub const fn width(self) -> usize {
        match self {
            Self::U16 => 2,
            Self::U32 => 4,
            Self::U64 | Self::F64 => 8,
        }
    }
}

/// Location of one little-endian header field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeaderField {
    pub offset: usize,
    pub kind: FieldKind,
}

impl HeaderField {
    #[must_use]
    pub const fn new(offset: usize, kind: FieldKind) -> Self {
        Self { offset, kind }
    }

    #[inline]
    fn end(self) -> usize {
        self.offset + self.kind.width()
    }

    /// Read the field; `raw` must hold at least `end()` bytes.
    #[inline]
    fn read(self, raw: &[u8]) -> u64 {
        let bytes = &raw[self.offset..self.end()];
        match self.kind {
            FieldKind::U16 => u64::from(u16::from_le_bytes([bytes[0], bytes[1]])),
            FieldKind::U32 => u64::from(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])),
            FieldKind::U64 => u64::from_le_bytes(le8(bytes)),
            // `as` saturates and maps NaN to 0
            FieldKind::F64 => f64::from_le_bytes(le8(bytes)) as u64,
        }
    }

    #[inline]
    fn write(self, raw: &mut [u8], value: u64) {
        let dst = &mut raw[self.offset..self.end()];
        match self.kind {
            FieldKind::U16 => dst.copy_from_slice(&(value as u16).to_le_bytes()),
            FieldKind::U32 => dst.copy_from_slice(&(value as u32).to_le_bytes()),
            FieldKind::U64 => dst.copy_from_slice(&value.to_le_bytes()),
            FieldKind::F64 => dst.copy_from_slice(&(value as f64).to_le_bytes()),
        }
    }
}

#[inline]
fn le8(bytes: &[u8]) -> [u8; 8] {
    let mut out = [0u8; 8];
    out.copy_from_slice(&bytes[..8]);
    out
}

/// Packet parsed through a [`PacketLayout`]. Borrows the receive buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Packet<'a> {
    /// Key shared by every packet of one module frame
    pub frame_key: u64,
    /// Position of the payload inside the frame
    pub sequence_number: u32,
    /// Acquisition id the frame belongs to
    pub image_id: ImageId,
    /// Module position hints from the header (0 when absent)
    pub pos_y: u16,
    pub pos_x: u16,
    pub payload: &'a [u8],
}

/// Field offsets and sizes of one detector's packets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketLayout {
    /// Exact datagram size; other sizes are malformed
    pub packet_bytes: usize,
    pub frame_key: HeaderField,
    pub sequence: HeaderField,
    /// `None` means the frame key is the image id
    pub image_id: Option<HeaderField>,
    pub pos_y: Option<HeaderField>,
    pub pos_x: Option<HeaderField>,
    pub payload_offset: usize,
    pub payload_bytes: usize,
    pub packets_per_frame: u32,
}

/// Size of the SLS detector packet header.
pub const SLS_HEADER_BYTES: usize = 48;

/// Pixels in one Eiger half-module link.
pub const EIGER_MODULE_N_PIXELS: usize = 512 * 256;

const FRAMENUM: HeaderField = HeaderField::new(0, FieldKind::U64);
const PACKETNUM: HeaderField = HeaderField::new(12, FieldKind::U32);
const BUNCHID: HeaderField = HeaderField::new(16, FieldKind::F64);
const ROW: HeaderField = HeaderField::new(34, FieldKind::U16);
const COLUMN: HeaderField = HeaderField::new(36, FieldKind::U16);

impl PacketLayout {
    /// Jungfrau: 1024x512 16-bit module in 128 packets of 8192 bytes.
    /// The image id is the bunch id.
    #[must_use]
    pub const fn jungfrau() -> Self {
        Self {
            packet_bytes: SLS_HEADER_BYTES + 8192,
            frame_key: FRAMENUM,
            sequence: PACKETNUM,
            image_id: Some(BUNCHID),
            pos_y: None,
            pos_x: None,
            payload_offset: SLS_HEADER_BYTES,
            payload_bytes: 8192,
            packets_per_frame: 128,
        }
    }

    /// Eiger half-module link at `bit_depth` (4, 8, 16 or 32).
    /// The image id is the frame number.
    #[must_use]
    pub const fn eiger(bit_depth: u16) -> Self {
        let frame_bytes = EIGER_MODULE_N_PIXELS * bit_depth as usize / 8;
        Self {
            packet_bytes: SLS_HEADER_BYTES + 4096,
            frame_key: FRAMENUM,
            sequence: PACKETNUM,
            image_id: None,
            pos_y: Some(COLUMN),
            pos_x: Some(ROW),
            payload_offset: SLS_HEADER_BYTES,
            payload_bytes: 4096,
            packets_per_frame: (frame_bytes / 4096) as u32,
        }
    }

    /// Compact layout: `frame_key u64 @0`, `sequence u32 @8`, payload @16.
    /// Used by simulators and tests.
    #[must_use]
    pub const fn minimal(payload_bytes: usize, packets_per_frame: u32) -> Self {
        Self {
            packet_bytes: 16 + payload_bytes,
            frame_key: HeaderField::new(0, FieldKind::U64),
            sequence: HeaderField::new(8, FieldKind::U32),
            image_id: None,
            pos_y: None,
            pos_x: None,
            payload_offset: 16,
            payload_bytes,
            packets_per_frame,
        }
    }

    /// Size of one reassembled module tile.
    #[inline]
    #[must_use]
    pub const fn frame_bytes(&self) -> usize {
        self.payload_bytes * self.packets_per_frame as usize
    }

    /// Sequence number that closes a frame.
    #[inline]
    #[must_use]
    pub const fn last_sequence(&self) -> u32 {
        self.packets_per_frame.saturating_sub(1)
    }

    /// Check that every field fits inside the packet.
    pub fn validate(&self) -> Result<(), String> {
        if self.packets_per_frame == 0 || self.payload_bytes == 0 {
            return Err("layout has an empty frame".into());
        }
        if self.payload_offset + self.payload_bytes > self.packet_bytes {
            return Err(format!(
                "payload {}+{} exceeds packet size {}",
                self.payload_offset, self.payload_bytes, self.packet_bytes
            ));
        }
        let fields = [Some(self.frame_key), Some(self.sequence), self.image_id, self.pos_y, self.pos_x];
        if let Some(field) = fields.iter().flatten().find(|f| f.end() > self.packet_bytes) {
            return Err(format!("header field at {} exceeds packet size", field.offset));
        }
        Ok(())
    }

    /// Parse one datagram. Returns `None` if its size does not match or the
    /// sequence number does not fit in `u32`.
    #[must_use]
    pub fn parse<'a>(&self, raw: &'a [u8]) -> Option<Packet<'a>> {
        if raw.len() != self.packet_bytes {
            return None;
        }
        let frame_key = self.frame_key.read(raw);
        let sequence_number = u32::try_from(self.sequence.read(raw)).ok()?;
        Some(Packet {
            frame_key,
            sequence_number,
            image_id: self.image_id.map_or(frame_key, |f| f.read(raw)),
            pos_y: self.pos_y.map_or(0, |f| f.read(raw) as u16),
            pos_x: self.pos_x.map_or(0, |f| f.read(raw) as u16),
            payload: &raw[self.payload_offset..self.payload_offset + self.payload_bytes],
        })
    }

    /// Build one datagram into `out` (resized to `packet_bytes`).
    ///
    /// `payload` is truncated or zero-padded to `payload_bytes`.
    pub fn encode(
        &self,
        out: &mut Vec<u8>,
        frame_key: u64,
        sequence_number: u32,
        image_id: ImageId,
        payload: &[u8],
    ) {
        out.clear();
        out.resize(self.packet_bytes, 0);
        self.frame_key.write(out, frame_key);
        self.sequence.write(out, u64::from(sequence_number));
        if let Some(field) = self.image_id {
            field.write(out, image_id);
        }
        let n = payload.len().min(self.payload_bytes);
        out[self.payload_offset..self.payload_offset + n].copy_from_slice(&payload[..n]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stock_layouts() {
        let jf = PacketLayout::jungfrau();
        assert_eq!(jf.packet_bytes, 8240);
        assert_eq!(jf.frame_bytes(), 1024 * 512 * 2);
        assert_eq!(jf.last_sequence(), 127);
        assert!(jf.validate().is_ok());

        assert_eq!(PacketLayout::eiger(16).packets_per_frame, 64);
        assert_eq!(PacketLayout::eiger(32).packets_per_frame, 128);
        assert_eq!(PacketLayout::eiger(8).packets_per_frame, 32);
        assert_eq!(PacketLayout::eiger(4).packets_per_frame, 16);
        assert_eq!(PacketLayout::eiger(16).packet_bytes, 4144);
        assert!(PacketLayout::eiger(32).validate().is_ok());
    }

    #[test]
    fn test_parse_jungfrau_header() {
        let layout = PacketLayout::jungfrau();
        let mut raw = vec![0u8; layout.packet_bytes];
        raw[0..8].copy_from_slice(&1234u64.to_le_bytes());
        raw[12..16].copy_from_slice(&5u32.to_le_bytes());
        raw[16..24].copy_from_slice(&9_876_543.0f64.to_le_bytes());
        raw[48] = 0xAA;

        let packet = layout.parse(&raw).expect("parse");
        assert_eq!(packet.frame_key, 1234);
        assert_eq!(packet.sequence_number, 5);
        assert_eq!(packet.image_id, 9_876_543);
        assert_eq!(packet.payload.len(), 8192);
        assert_eq!(packet.payload[0], 0xAA);
    }

    #[test]
    fn test_eiger_uses_frame_number_and_position() {
        let layout = PacketLayout::eiger(16);
        let mut raw = vec![0u8; layout.packet_bytes];
        raw[0..8].copy_from_slice(&77u64.to_le_bytes());
        raw[34..36].copy_from_slice(&1u16.to_le_bytes());
        raw[36..38].copy_from_slice(&3u16.to_le_bytes());

        let packet = layout.parse(&raw).expect("parse");
        assert_eq!(packet.image_id, 77);
        assert_eq!(packet.pos_x, 1);
        assert_eq!(packet.pos_y, 3);
    }

    #[test]
    fn test_wrong_size_rejected() {
        let layout = PacketLayout::minimal(8, 4);
        assert!(layout.parse(&[0u8; 23]).is_none());
        assert!(layout.parse(&[0u8; 25]).is_none());
        assert!(layout.parse(&[0u8; 24]).is_some());
    }

    #[test]
    fn test_wide_sequence_out_of_range_rejected() {
        let mut layout = PacketLayout::minimal(8, 4);
        layout.sequence = HeaderField::new(8, FieldKind::U64);
        layout.payload_offset = 16;
        assert!(layout.validate().is_ok());

        let mut raw = vec![0u8; layout.packet_bytes];
        raw[8..16].copy_from_slice(&((1u64 << 32) + 3).to_le_bytes());
        assert!(layout.parse(&raw).is_none());

        raw[8..16].copy_from_slice(&3u64.to_le_bytes());
        assert_eq!(layout.parse(&raw).unwrap().sequence_number, 3);
    }

    #[test]
    fn test_negative_bunch_id_reads_zero() {
        let layout = PacketLayout::jungfrau();
        let mut raw = vec![0u8; layout.packet_bytes];
        raw[16..24].copy_from_slice(&(-5.0f64).to_le_bytes());
        assert_eq!(layout.parse(&raw).unwrap().image_id, 0);
    }

    #[test]
    fn test_encode_matches_parse() {
        let layout = PacketLayout::jungfrau();
        let mut raw = Vec::new();
        layout.encode(&mut raw, 10, 127, 42, &[1, 2, 3]);

        let packet = layout.parse(&raw).unwrap();
        assert_eq!(packet.frame_key, 10);
        assert_eq!(packet.sequence_number, 127);
        assert_eq!(packet.image_id, 42);
        assert_eq!(&packet.payload[..4], &[1, 2, 3, 0]);
    }

    #[test]
    fn test_validate_rejects_overlapping_payload() {
        let mut layout = PacketLayout::minimal(8, 4);
        layout.payload_bytes = 16;
        assert!(layout.validate().is_err());

        let mut layout = PacketLayout::minimal(8, 4);
        layout.packets_per_frame = 0;
        assert!(layout.validate().is_err());
    }
}
