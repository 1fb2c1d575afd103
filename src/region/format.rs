//! Byte-level layout of the current region file format.
//!
//! ```text
//! offset 0        magic "SRG1" (4) + version (1) + reserved (3)
//! offset 8        1024 slot descriptors, 13 bytes each, little-endian,
//!                 row-major by chunk position within the region
//! offset 13_320   payload records, appended back to back
//! ```
//!
//! A slot descriptor is `offset u32 | length u32 | compression u8 |
//! checksum u32`. `length` covers the whole record including its prelude;
//! zero length marks an absent chunk. Each record starts with a 12-byte
//! prelude `uncompressed_len u32 | timestamp_secs u64` followed by the
//! compressed payload, and the checksum is a CRC32 over those compressed
//! bytes only.

use crate::codec::CompressionKind;
use crate::constants::geometry::CHUNKS_PER_REGION;
use crate::constants::strata_format::{
    HEADER_LEN, RECORD_PRELUDE_LEN, REGION_MAGIC, REGION_VERSION, SLOT_LEN,
};

/// Byte length of the full slot table.
pub const SLOT_TABLE_LEN: usize = CHUNKS_PER_REGION * SLOT_LEN;

/// File offset of the first payload record.
pub const DATA_START: u64 = (HEADER_LEN + SLOT_TABLE_LEN) as u64;

/// Outcome of inspecting a region file header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderCheck {
    Ok,
    BadMagic([u8; 4]),
    BadVersion(u8),
    Truncated,
}

pub fn encode_header() -> [u8; HEADER_LEN] {
    let mut buf = [0u8; HEADER_LEN];
    buf[0..4].copy_from_slice(&REGION_MAGIC);
    buf[4] = REGION_VERSION;
    buf
}

pub fn check_header(bytes: &[u8]) -> HeaderCheck {
    if bytes.len() < HEADER_LEN {
        return HeaderCheck::Truncated;
    }
    let mut magic = [0u8; 4];
    magic.copy_from_slice(&bytes[0..4]);
    if magic != REGION_MAGIC {
        return HeaderCheck::BadMagic(magic);
    }
    if bytes[4] != REGION_VERSION {
        return HeaderCheck::BadVersion(bytes[4]);
    }
    HeaderCheck::Ok
}

/// Decoded slot table entry for a present chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotDescriptor {
    /// Absolute file offset of the record.
    pub offset: u32,
    /// Total record length, prelude included.
    pub length: u32,
    pub compression: CompressionKind,
    /// CRC32 over the record's compressed payload bytes.
    pub checksum: u32,
}

impl SlotDescriptor {
    /// Compressed payload length, without the prelude.
    pub fn payload_len(&self) -> usize {
        self.length as usize - RECORD_PRELUDE_LEN
    }

    pub fn encode(&self) -> [u8; SLOT_LEN] {
        let mut buf = [0u8; SLOT_LEN];
        buf[0..4].copy_from_slice(&self.offset.to_le_bytes());
        buf[4..8].copy_from_slice(&self.length.to_le_bytes());
        buf[8] = self.compression.as_tag();
        buf[9..13].copy_from_slice(&self.checksum.to_le_bytes());
        buf
    }
}

/// What a raw 13-byte slot decodes to before any file-bounds validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawSlot {
    Empty,
    Present(SlotDescriptor),
    /// Decodes to nonsense on its own, before bounds are even considered.
    Malformed(String),
}

pub fn decode_slot(bytes: &[u8]) -> RawSlot {
    debug_assert_eq!(bytes.len(), SLOT_LEN);
    let offset = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    let length = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
    let checksum = u32::from_le_bytes([bytes[9], bytes[10], bytes[11], bytes[12]]);
    if length == 0 {
        return RawSlot::Empty;
    }
    if (length as usize) < RECORD_PRELUDE_LEN {
        return RawSlot::Malformed(format!("record length {length} shorter than prelude"));
    }
    let compression = match CompressionKind::from_tag(bytes[8]) {
        Ok(kind) => kind,
        Err(_) => return RawSlot::Malformed(format!("unknown compression tag {}", bytes[8])),
    };
    RawSlot::Present(SlotDescriptor {
        offset,
        length,
        compression,
        checksum,
    })
}

/// The zero slot written for absent chunks.
pub fn empty_slot() -> [u8; SLOT_LEN] {
    [0u8; SLOT_LEN]
}

/// Fixed prefix of every payload record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordPrelude {
    pub uncompressed_len: u32,
    pub timestamp_secs: u64,
}

impl RecordPrelude {
    pub fn encode(&self) -> [u8; RECORD_PRELUDE_LEN] {
        let mut buf = [0u8; RECORD_PRELUDE_LEN];
        buf[0..4].copy_from_slice(&self.uncompressed_len.to_le_bytes());
        buf[4..12].copy_from_slice(&self.timestamp_secs.to_le_bytes());
        buf
    }

    pub fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < RECORD_PRELUDE_LEN {
            return None;
        }
        Some(Self {
            uncompressed_len: u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            timestamp_secs: u64::from_le_bytes([
                bytes[4], bytes[5], bytes[6], bytes[7], bytes[8], bytes[9], bytes[10], bytes[11],
            ]),
        })
    }
}

/// Assemble a full record: prelude followed by the compressed payload.
pub fn encode_record(prelude: RecordPrelude, compressed: &[u8]) -> Vec<u8> {
    let mut record = Vec::with_capacity(RECORD_PRELUDE_LEN + compressed.len());
    record.extend_from_slice(&prelude.encode());
    record.extend_from_slice(compressed);
    record
}
