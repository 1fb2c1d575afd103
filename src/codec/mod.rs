//! Compression codecs for chunk payloads.
//!
//! Every on-disk record is tagged with a [`CompressionKind`], so readers never
//! guess: the tag picks the codec, the stored uncompressed length bounds the
//! output, and a CRC32 over the compressed bytes (computed by the region
//! layer) catches torn or bit-flipped records before they are decompressed.

use std::io::{Read, Write};

use flate2::read::{GzDecoder, ZlibDecoder};
use flate2::write::{GzEncoder, ZlibEncoder};
use flate2::Compression;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

/// Compression applied to a stored chunk payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CompressionKind {
    None,
    Zlib,
    Gzip,
    Lz4,
    Zstd,
}

impl CompressionKind {
    /// Wire tag used in region slot descriptors.
    pub fn as_tag(&self) -> u8 {
        match self {
            CompressionKind::None => 0,
            CompressionKind::Zlib => 1,
            CompressionKind::Gzip => 2,
            CompressionKind::Lz4 => 3,
            CompressionKind::Zstd => 4,
        }
    }

    pub fn from_tag(tag: u8) -> Result<Self, CodecError> {
        match tag {
            0 => Ok(CompressionKind::None),
            1 => Ok(CompressionKind::Zlib),
            2 => Ok(CompressionKind::Gzip),
            3 => Ok(CompressionKind::Lz4),
            4 => Ok(CompressionKind::Zstd),
            other => Err(CodecError::UnknownKind { tag: other }),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            CompressionKind::None => "none",
            CompressionKind::Zlib => "zlib",
            CompressionKind::Gzip => "gzip",
            CompressionKind::Lz4 => "lz4",
            CompressionKind::Zstd => "zstd",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("codec I/O failure: {0}")]
    Io(#[from] std::io::Error),
    #[error("corrupt compressed stream: {detail}")]
    Corrupt { detail: String },
    #[error("unknown compression tag {tag}")]
    UnknownKind { tag: u8 },
    #[error("decompressed size mismatch: expected {expected} bytes, got {actual}")]
    SizeMismatch { expected: usize, actual: usize },
}

/// A single compression scheme. Implementations must be stateless so one
/// instance can serve concurrent readers and writers.
pub trait ChunkCodec: Send + Sync {
    fn kind(&self) -> CompressionKind;

    fn compress(&self, raw: &[u8]) -> Result<Vec<u8>, CodecError>;

    /// Decompress `bytes`, which must expand to exactly `expected_len` bytes.
    /// Streams that produce more or fewer bytes are rejected, which bounds
    /// memory even for hostile input.
    fn decompress(&self, bytes: &[u8], expected_len: usize) -> Result<Vec<u8>, CodecError>;
}

fn check_len(out: Vec<u8>, expected_len: usize) -> Result<Vec<u8>, CodecError> {
    if out.len() != expected_len {
        return Err(CodecError::SizeMismatch {
            expected: expected_len,
            actual: out.len(),
        });
    }
    Ok(out)
}

/// Identity codec for payloads that do not compress well.
pub struct NoneCodec;

impl ChunkCodec for NoneCodec {
    fn kind(&self) -> CompressionKind {
        CompressionKind::None
    }

    fn compress(&self, raw: &[u8]) -> Result<Vec<u8>, CodecError> {
        Ok(raw.to_vec())
    }

    fn decompress(&self, bytes: &[u8], expected_len: usize) -> Result<Vec<u8>, CodecError> {
        check_len(bytes.to_vec(), expected_len)
    }
}

pub struct ZlibCodec {
    level: Compression,
}

impl ZlibCodec {
    pub fn new(level: u32) -> Self {
        Self {
            level: Compression::new(level),
        }
    }
}

impl Default for ZlibCodec {
    fn default() -> Self {
        Self {
            level: Compression::default(),
        }
    }
}

impl ChunkCodec for ZlibCodec {
    fn kind(&self) -> CompressionKind {
        CompressionKind::Zlib
    }

    fn compress(&self, raw: &[u8]) -> Result<Vec<u8>, CodecError> {
        let mut encoder = ZlibEncoder::new(Vec::new(), self.level);
        encoder.write_all(raw)?;
        Ok(encoder.finish()?)
    }

    fn decompress(&self, bytes: &[u8], expected_len: usize) -> Result<Vec<u8>, CodecError> {
        let mut out = Vec::with_capacity(expected_len);
        let mut decoder = ZlibDecoder::new(bytes).take(expected_len as u64 + 1);
        decoder.read_to_end(&mut out)?;
        check_len(out, expected_len)
    }
}

pub struct GzipCodec {
    level: Compression,
}

impl GzipCodec {
    pub fn new(level: u32) -> Self {
        Self {
            level: Compression::new(level),
        }
    }
}

impl Default for GzipCodec {
    fn default() -> Self {
        Self {
            level: Compression::default(),
        }
    }
}

impl ChunkCodec for GzipCodec {
    fn kind(&self) -> CompressionKind {
        CompressionKind::Gzip
    }

    fn compress(&self, raw: &[u8]) -> Result<Vec<u8>, CodecError> {
        let mut encoder = GzEncoder::new(Vec::new(), self.level);
        encoder.write_all(raw)?;
        Ok(encoder.finish()?)
    }

    fn decompress(&self, bytes: &[u8], expected_len: usize) -> Result<Vec<u8>, CodecError> {
        let mut out = Vec::with_capacity(expected_len);
        let mut decoder = GzDecoder::new(bytes).take(expected_len as u64 + 1);
        decoder.read_to_end(&mut out)?;
        check_len(out, expected_len)
    }
}

pub struct Lz4Codec;

impl ChunkCodec for Lz4Codec {
    fn kind(&self) -> CompressionKind {
        CompressionKind::Lz4
    }

    fn compress(&self, raw: &[u8]) -> Result<Vec<u8>, CodecError> {
        Ok(lz4_flex::compress_prepend_size(raw))
    }

    fn decompress(&self, bytes: &[u8], expected_len: usize) -> Result<Vec<u8>, CodecError> {
        let out = lz4_flex::decompress_size_prepended(bytes).map_err(|e| CodecError::Corrupt {
            detail: e.to_string(),
        })?;
        check_len(out, expected_len)
    }
}

pub struct ZstdCodec {
    level: i32,
}

impl ZstdCodec {
    pub fn new(level: i32) -> Self {
        Self { level }
    }
}

impl Default for ZstdCodec {
    fn default() -> Self {
        Self { level: 3 }
    }
}

impl ChunkCodec for ZstdCodec {
    fn kind(&self) -> CompressionKind {
        CompressionKind::Zstd
    }

    fn compress(&self, raw: &[u8]) -> Result<Vec<u8>, CodecError> {
        Ok(zstd::bulk::compress(raw, self.level)?)
    }

    fn decompress(&self, bytes: &[u8], expected_len: usize) -> Result<Vec<u8>, CodecError> {
        let out = zstd::bulk::decompress(bytes, expected_len)?;
        check_len(out, expected_len)
    }
}

/// Registry of codecs keyed by wire tag. Readers must be able to open records
/// written with any kind, so the default set registers every codec regardless
/// of which one new writes use.
pub struct CodecSet {
    codecs: FxHashMap<u8, Box<dyn ChunkCodec>>,
}

impl CodecSet {
    pub fn with_defaults() -> Self {
        let mut set = Self {
            codecs: FxHashMap::default(),
        };
        set.register(Box::new(NoneCodec));
        set.register(Box::new(ZlibCodec::default()));
        set.register(Box::new(GzipCodec::default()));
        set.register(Box::new(Lz4Codec));
        set.register(Box::new(ZstdCodec::default()));
        set
    }

    pub fn register(&mut self, codec: Box<dyn ChunkCodec>) {
        self.codecs.insert(codec.kind().as_tag(), codec);
    }

    pub fn get(&self, kind: CompressionKind) -> Result<&dyn ChunkCodec, CodecError> {
        self.codecs
            .get(&kind.as_tag())
            .map(|c| c.as_ref())
            .ok_or(CodecError::UnknownKind {
                tag: kind.as_tag(),
            })
    }

    pub fn compress(&self, kind: CompressionKind, raw: &[u8]) -> Result<Vec<u8>, CodecError> {
        self.get(kind)?.compress(raw)
    }

    pub fn decompress(
        &self,
        kind: CompressionKind,
        bytes: &[u8],
        expected_len: usize,
    ) -> Result<Vec<u8>, CodecError> {
        self.get(kind)?.decompress(bytes, expected_len)
    }
}

impl Default for CodecSet {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// CRC32 over a compressed payload, the integrity check stored in every slot
/// descriptor.
pub fn checksum_of(bytes: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(bytes);
    hasher.finalize()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_payload() -> Vec<u8> {
        // Repetitive enough to compress, long enough to cross block sizes.
        let mut data = Vec::with_capacity(20_000);
        for i in 0..20_000u32 {
            data.push((i % 251) as u8);
        }
        data
    }

    #[test]
    fn test_round_trip_every_kind() {
        let set = CodecSet::with_defaults();
        let raw = sample_payload();
        for kind in [
            CompressionKind::None,
            CompressionKind::Zlib,
            CompressionKind::Gzip,
            CompressionKind::Lz4,
            CompressionKind::Zstd,
        ] {
            let packed = set
                .compress(kind, &raw)
                .unwrap_or_else(|e| panic!("{} compress failed: {e}", kind.name()));
            let unpacked = set
                .decompress(kind, &packed, raw.len())
                .unwrap_or_else(|e| panic!("{} decompress failed: {e}", kind.name()));
            assert_eq!(unpacked, raw, "{} round trip changed data", kind.name());
        }
    }

    #[test]
    fn test_tag_round_trip() {
        for kind in [
            CompressionKind::None,
            CompressionKind::Zlib,
            CompressionKind::Gzip,
            CompressionKind::Lz4,
            CompressionKind::Zstd,
        ] {
            let tag = kind.as_tag();
            assert_eq!(
                CompressionKind::from_tag(tag).expect("Known tag should parse"),
                kind
            );
        }
    }

    #[test]
    fn test_unknown_tag_rejected() {
        match CompressionKind::from_tag(200) {
            Err(CodecError::UnknownKind { tag: 200 }) => {}
            other => panic!("Expected UnknownKind, got {other:?}"),
        }
    }

    #[test]
    fn test_wrong_expected_len_rejected() {
        let set = CodecSet::with_defaults();
        let raw = sample_payload();
        let packed = set
            .compress(CompressionKind::Zstd, &raw)
            .expect("Compress should succeed");
        let result = set.decompress(CompressionKind::Zstd, &packed, raw.len() - 1);
        assert!(result.is_err(), "Short expected length must be rejected");
    }

    #[test]
    fn test_corrupt_stream_rejected() {
        let set = CodecSet::with_defaults();
        let raw = sample_payload();
        let mut packed = set
            .compress(CompressionKind::Zlib, &raw)
            .expect("Compress should succeed");
        // Damage the stream body, not just the trailing checksum.
        let mid = packed.len() / 2;
        packed[mid] ^= 0xFF;
        packed[mid + 1] ^= 0xFF;
        let result = set.decompress(CompressionKind::Zlib, &packed, raw.len());
        assert!(result.is_err(), "Corrupt stream must be rejected");
    }

    #[test]
    fn test_checksum_detects_flip() {
        let raw = sample_payload();
        let before = checksum_of(&raw);
        let mut flipped = raw.clone();
        flipped[7] ^= 0x01;
        assert_ne!(before, checksum_of(&flipped));
    }
}
