//! World data model shared by the storage, conversion, and prefetch layers.

mod position;

pub use position::{ChunkPos, RegionPos};

use std::time::{SystemTime, UNIX_EPOCH};

use crate::codec::CompressionKind;

/// A chunk as handed out by the storage layer: decompressed, verified payload
/// plus the metadata of the on-disk record it came from.
#[derive(Debug, Clone)]
pub struct ChunkEntry {
    pub pos: ChunkPos,
    /// Decompressed chunk payload.
    pub data: Vec<u8>,
    /// Compression the record uses on disk.
    pub compression: CompressionKind,
    /// CRC32 over the record's compressed bytes, as verified on read.
    pub checksum: u32,
    /// Size of the compressed bytes on disk.
    pub compressed_len: u32,
    /// Seconds since the Unix epoch at the time the record was written.
    pub timestamp_secs: u64,
}

impl ChunkEntry {
    pub fn new(
        pos: ChunkPos,
        data: Vec<u8>,
        compression: CompressionKind,
        checksum: u32,
        compressed_len: u32,
        timestamp_secs: u64,
    ) -> Self {
        Self {
            pos,
            data,
            compression,
            checksum,
            compressed_len,
            timestamp_secs,
        }
    }

    /// Payload size in bytes, the unit the prefetch cache budgets in.
    pub fn byte_len(&self) -> usize {
        self.data.len()
    }

    pub fn uncompressed_len(&self) -> u32 {
        self.data.len() as u32
    }
}

/// Seconds since the Unix epoch. Clock-before-epoch degrades to zero rather
/// than panicking.
pub fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
