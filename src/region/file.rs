//! A single open region file.
//!
//! Concurrency protocol: the slot index lives behind a `RwLock`, and a reader
//! holds the read guard from slot lookup through the payload read so a record
//! can never be rewritten under it. Writers serialize on a separate mutex.
//! Appends write the payload before taking the index write lock, then patch
//! the 13-byte descriptor under it; in-place rewrites hold the write lock
//! across the payload write because they reuse the offset a reader might be
//! about to read. Descriptors are written to disk after their payload, so a
//! crash mid-write loses at most the write in flight.
//!
//! Freed space from relocated records is not reclaimed. Offsets are `u32`,
//! which caps a region file at 4 GiB of record space.

use std::fs::{File, OpenOptions};
use std::path::Path;

use parking_lot::{Mutex, RwLock};

use crate::codec::{checksum_of, CompressionKind};
use crate::constants::geometry::{CHUNKS_PER_REGION, REGION_SIZE};
use crate::constants::strata_format::{
    HEADER_LEN, MAX_UNCOMPRESSED_LEN, RECORD_PRELUDE_LEN, SLOT_LEN,
};
use crate::error::{StorageError, StorageResult};
use crate::region::format::{
    self, HeaderCheck, RawSlot, RecordPrelude, SlotDescriptor, DATA_START,
};
use crate::region::{read_exact_at, write_all_at};
use crate::world::{ChunkPos, RegionPos};

#[derive(Debug, Clone)]
enum Slot {
    Empty,
    Present {
        desc: SlotDescriptor,
        /// Bytes available at `desc.offset` before the next record starts.
        capacity: u32,
    },
    /// Failed validation at open. Reads fail, writes allocate fresh space.
    Corrupt(String),
}

struct IndexState {
    slots: Vec<Slot>,
    /// Append cursor, one past the last byte of record space.
    end_offset: u64,
}

/// A record as stored on disk, checksum-verified but not yet decompressed.
#[derive(Debug)]
pub struct StoredRecord {
    pub compression: CompressionKind,
    pub uncompressed_len: u32,
    pub checksum: u32,
    pub timestamp_secs: u64,
    pub compressed: Vec<u8>,
}

pub struct RegionFile {
    pos: RegionPos,
    file: File,
    index: RwLock<IndexState>,
    writer: Mutex<()>,
}

impl RegionFile {
    /// Open a region file, creating and initializing it when `create` is set.
    pub fn open(path: &Path, pos: RegionPos, create: bool) -> StorageResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(create)
            .open(path)?;
        let len = file.metadata()?.len();
        let index = if len == 0 {
            Self::init_new(&file)?
        } else {
            Self::load_index(&file, len, pos)?
        };
        Ok(Self {
            pos,
            file,
            index: RwLock::new(index),
            writer: Mutex::new(()),
        })
    }

    fn init_new(file: &File) -> StorageResult<IndexState> {
        let mut prefix = vec![0u8; DATA_START as usize];
        prefix[..HEADER_LEN].copy_from_slice(&format::encode_header());
        write_all_at(file, &prefix, 0)?;
        Ok(IndexState {
            slots: vec![Slot::Empty; CHUNKS_PER_REGION],
            end_offset: DATA_START,
        })
    }

    fn load_index(file: &File, len: u64, pos: RegionPos) -> StorageResult<IndexState> {
        if len < DATA_START {
            return Err(StorageError::unsupported(format!(
                "region {pos} is truncated: {len} bytes, header needs {DATA_START}"
            )));
        }
        let mut prefix = vec![0u8; DATA_START as usize];
        read_exact_at(file, &mut prefix, 0)?;
        match format::check_header(&prefix) {
            HeaderCheck::Ok => {}
            HeaderCheck::BadMagic(magic) => {
                return Err(StorageError::unsupported(format!(
                    "region {pos} has unknown magic {magic:02x?}"
                )))
            }
            HeaderCheck::BadVersion(version) => {
                return Err(StorageError::unsupported(format!(
                    "region {pos} has format version {version}, this build reads version {}",
                    crate::constants::strata_format::REGION_VERSION
                )))
            }
            HeaderCheck::Truncated => {
                return Err(StorageError::unsupported(format!(
                    "region {pos} header is truncated"
                )))
            }
        }

        let mut slots = Vec::with_capacity(CHUNKS_PER_REGION);
        for i in 0..CHUNKS_PER_REGION {
            let raw = &prefix[HEADER_LEN + i * SLOT_LEN..HEADER_LEN + (i + 1) * SLOT_LEN];
            let slot = match format::decode_slot(raw) {
                RawSlot::Empty => Slot::Empty,
                RawSlot::Malformed(detail) => Slot::Corrupt(detail),
                RawSlot::Present(desc) => {
                    let start = desc.offset as u64;
                    let end = start + desc.length as u64;
                    if start < DATA_START || end > len {
                        Slot::Corrupt(format!(
                            "record at {start}..{end} falls outside file of {len} bytes"
                        ))
                    } else {
                        // Capacity is refined below once neighbors are known.
                        Slot::Present {
                            desc,
                            capacity: desc.length,
                        }
                    }
                }
            };
            slots.push(slot);
        }

        // Derive per-record capacity from the gap to the next record, and
        // flag records that overlap their neighbor.
        let mut by_offset: Vec<(usize, u32, u32)> = slots
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| match slot {
                Slot::Present { desc, .. } => Some((i, desc.offset, desc.length)),
                _ => None,
            })
            .collect();
        by_offset.sort_by_key(|&(_, offset, _)| offset);
        let mut end_offset = DATA_START;
        for window in 0..by_offset.len() {
            let (idx, offset, length) = by_offset[window];
            end_offset = end_offset.max(offset as u64 + length as u64);
            let capacity = match by_offset.get(window + 1) {
                Some(&(_, next_offset, _)) => {
                    if next_offset < offset + length {
                        slots[idx] = Slot::Corrupt(format!(
                            "record at {offset} overlaps the record at {next_offset}"
                        ));
                        continue;
                    }
                    next_offset - offset
                }
                None => length,
            };
            if let Slot::Present { capacity: cap, .. } = &mut slots[idx] {
                *cap = capacity;
            }
        }

        Ok(IndexState { slots, end_offset })
    }

    pub fn region_pos(&self) -> RegionPos {
        self.pos
    }

    /// Read a chunk's record, verifying its checksum. Decompression is the
    /// caller's job; the slot's compression kind rides along.
    pub fn read_record(&self, pos: ChunkPos) -> StorageResult<StoredRecord> {
        debug_assert_eq!(pos.region(), self.pos);
        let idx = pos.local_index();
        let guard = self.index.read();
        let desc = match &guard.slots[idx] {
            Slot::Empty => return Err(StorageError::NotFound { pos }),
            Slot::Corrupt(detail) => return Err(StorageError::integrity(pos, detail.clone())),
            Slot::Present { desc, .. } => *desc,
        };
        let mut record = vec![0u8; desc.length as usize];
        read_exact_at(&self.file, &mut record, desc.offset as u64)?;
        drop(guard);

        let prelude = RecordPrelude::decode(&record)
            .ok_or_else(|| StorageError::integrity(pos, "record shorter than its prelude"))?;
        let compressed = record.split_off(RECORD_PRELUDE_LEN);
        let computed = checksum_of(&compressed);
        if computed != desc.checksum {
            return Err(StorageError::integrity(
                pos,
                format!(
                    "checksum mismatch: stored {:08x}, computed {computed:08x}",
                    desc.checksum
                ),
            ));
        }
        if prelude.uncompressed_len as usize > MAX_UNCOMPRESSED_LEN {
            return Err(StorageError::integrity(
                pos,
                format!(
                    "implausible uncompressed length {}",
                    prelude.uncompressed_len
                ),
            ));
        }
        Ok(StoredRecord {
            compression: desc.compression,
            uncompressed_len: prelude.uncompressed_len,
            checksum: desc.checksum,
            timestamp_secs: prelude.timestamp_secs,
            compressed,
        })
    }

    /// Store a chunk's compressed payload. Rewrites in place when the new
    /// record fits the old record's capacity, appends otherwise.
    pub fn write_record(
        &self,
        pos: ChunkPos,
        compression: CompressionKind,
        uncompressed_len: u32,
        timestamp_secs: u64,
        compressed: &[u8],
    ) -> StorageResult<()> {
        debug_assert_eq!(pos.region(), self.pos);
        let idx = pos.local_index();
        let prelude = RecordPrelude {
            uncompressed_len,
            timestamp_secs,
        };
        let record = format::encode_record(prelude, compressed);
        let total = record.len() as u64;
        if total > u32::MAX as u64 {
            return Err(StorageError::unsupported(format!(
                "record for chunk {pos} exceeds the 4 GiB format limit"
            )));
        }
        let checksum = checksum_of(compressed);

        let _serial = self.writer.lock();
        let in_place = {
            let guard = self.index.read();
            match &guard.slots[idx] {
                Slot::Present { desc, capacity } if total <= *capacity as u64 => {
                    Some((desc.offset, *capacity))
                }
                _ => None,
            }
        };

        if let Some((offset, capacity)) = in_place {
            // Reusing a live offset: keep readers out for the whole write.
            let mut guard = self.index.write();
            write_all_at(&self.file, &record, offset as u64)?;
            let desc = SlotDescriptor {
                offset,
                length: total as u32,
                compression,
                checksum,
            };
            write_all_at(&self.file, &desc.encode(), Self::slot_table_offset(idx))?;
            guard.slots[idx] = Slot::Present { desc, capacity };
        } else {
            let end = self.index.read().end_offset;
            if end + total > u32::MAX as u64 {
                return Err(StorageError::unsupported(format!(
                    "region {} is full: record space exceeds the 4 GiB format limit",
                    self.pos
                )));
            }
            // Fresh space: no reader can see it until the descriptor lands.
            write_all_at(&self.file, &record, end)?;
            let desc = SlotDescriptor {
                offset: end as u32,
                length: total as u32,
                compression,
                checksum,
            };
            let mut guard = self.index.write();
            write_all_at(&self.file, &desc.encode(), Self::slot_table_offset(idx))?;
            guard.slots[idx] = Slot::Present {
                desc,
                capacity: total as u32,
            };
            guard.end_offset = end + total;
        }
        Ok(())
    }

    fn slot_table_offset(idx: usize) -> u64 {
        (HEADER_LEN + idx * SLOT_LEN) as u64
    }

    pub fn contains(&self, pos: ChunkPos) -> bool {
        debug_assert_eq!(pos.region(), self.pos);
        matches!(
            self.index.read().slots[pos.local_index()],
            Slot::Present { .. }
        )
    }

    /// Positions of every chunk with a live record, corrupt slots included
    /// so that converters notice them instead of silently dropping them.
    pub fn chunk_positions(&self) -> Vec<ChunkPos> {
        let origin = self.pos.origin_chunk();
        let guard = self.index.read();
        guard
            .slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| !matches!(slot, Slot::Empty))
            .map(|(idx, _)| {
                origin.offset(
                    (idx % REGION_SIZE as usize) as i32,
                    (idx / REGION_SIZE as usize) as i32,
                )
            })
            .collect()
    }

    pub fn chunk_count(&self) -> usize {
        self.index
            .read()
            .slots
            .iter()
            .filter(|slot| matches!(slot, Slot::Present { .. }))
            .count()
    }

    /// Flush file contents and metadata to stable storage.
    pub fn flush(&self) -> StorageResult<()> {
        self.file.sync_all()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Seek, SeekFrom, Write};
    use tempfile::TempDir;

    fn region_path(dir: &TempDir, pos: RegionPos) -> std::path::PathBuf {
        dir.path().join(pos.file_name())
    }

    fn write_plain(file: &RegionFile, pos: ChunkPos, data: &[u8], ts: u64) {
        file.write_record(pos, CompressionKind::None, data.len() as u32, ts, data)
            .expect("Write should succeed");
    }

    #[test]
    fn test_write_then_read_round_trip() {
        let dir = TempDir::new().expect("Temp dir should be created");
        let region = RegionPos::new(0, 0);
        let file =
            RegionFile::open(&region_path(&dir, region), region, true).expect("Open should succeed");

        let pos = ChunkPos::new(3, 7);
        write_plain(&file, pos, b"hello chunk", 1234);
        let record = file.read_record(pos).expect("Read should succeed");
        assert_eq!(record.compressed, b"hello chunk");
        assert_eq!(record.uncompressed_len, 11);
        assert_eq!(record.timestamp_secs, 1234);
        assert_eq!(record.compression, CompressionKind::None);
    }

    #[test]
    fn test_missing_chunk_is_not_found() {
        let dir = TempDir::new().expect("Temp dir should be created");
        let region = RegionPos::new(0, 0);
        let file =
            RegionFile::open(&region_path(&dir, region), region, true).expect("Open should succeed");

        match file.read_record(ChunkPos::new(1, 1)) {
            Err(StorageError::NotFound { pos }) => assert_eq!(pos, ChunkPos::new(1, 1)),
            other => panic!("Expected NotFound, got {other:?}"),
        }
    }

    #[test]
    fn test_reopen_preserves_records() {
        let dir = TempDir::new().expect("Temp dir should be created");
        let region = RegionPos::new(-1, -1);
        let path = region_path(&dir, region);
        let pos = ChunkPos::new(-1, -1);
        {
            let file = RegionFile::open(&path, region, true).expect("Open should succeed");
            write_plain(&file, pos, b"persisted", 99);
            file.flush().expect("Flush should succeed");
        }
        let file = RegionFile::open(&path, region, false).expect("Reopen should succeed");
        let record = file.read_record(pos).expect("Read should succeed");
        assert_eq!(record.compressed, b"persisted");
        assert_eq!(record.timestamp_secs, 99);
    }

    #[test]
    fn test_in_place_rewrite_keeps_file_compact() {
        let dir = TempDir::new().expect("Temp dir should be created");
        let region = RegionPos::new(0, 0);
        let path = region_path(&dir, region);
        let file = RegionFile::open(&path, region, true).expect("Open should succeed");

        let pos = ChunkPos::new(0, 0);
        write_plain(&file, pos, &[7u8; 256], 1);
        let len_after_first = std::fs::metadata(&path).expect("Stat should succeed").len();

        // Same size fits the existing record's capacity.
        write_plain(&file, pos, &[9u8; 256], 2);
        let len_after_rewrite = std::fs::metadata(&path).expect("Stat should succeed").len();
        assert_eq!(len_after_first, len_after_rewrite);

        let record = file.read_record(pos).expect("Read should succeed");
        assert_eq!(record.compressed, vec![9u8; 256]);
        assert_eq!(record.timestamp_secs, 2);
    }

    #[test]
    fn test_grown_record_relocates() {
        let dir = TempDir::new().expect("Temp dir should be created");
        let region = RegionPos::new(0, 0);
        let path = region_path(&dir, region);
        let file = RegionFile::open(&path, region, true).expect("Open should succeed");

        let pos = ChunkPos::new(5, 5);
        write_plain(&file, pos, &[1u8; 64], 1);
        let small_len = std::fs::metadata(&path).expect("Stat should succeed").len();
        write_plain(&file, pos, &[2u8; 4096], 2);
        let grown_len = std::fs::metadata(&path).expect("Stat should succeed").len();
        assert!(grown_len > small_len, "Larger rewrite should append");

        let record = file.read_record(pos).expect("Read should succeed");
        assert_eq!(record.compressed, vec![2u8; 4096]);
    }

    #[test]
    fn test_flipped_payload_byte_fails_checksum() {
        let dir = TempDir::new().expect("Temp dir should be created");
        let region = RegionPos::new(0, 0);
        let path = region_path(&dir, region);
        let pos = ChunkPos::new(2, 2);
        {
            let file = RegionFile::open(&path, region, true).expect("Open should succeed");
            write_plain(&file, pos, &[0xAB; 128], 1);
            file.flush().expect("Flush should succeed");
        }

        // Flip one byte inside the record's payload section.
        let mut raw = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .expect("Raw open should succeed");
        let corrupt_at = DATA_START + RECORD_PRELUDE_LEN as u64 + 40;
        raw.seek(SeekFrom::Start(corrupt_at)).expect("Seek should succeed");
        let mut byte = [0u8; 1];
        raw.read_exact(&mut byte).expect("Read should succeed");
        byte[0] ^= 0xFF;
        raw.seek(SeekFrom::Start(corrupt_at)).expect("Seek should succeed");
        raw.write_all(&byte).expect("Write should succeed");
        drop(raw);

        let file = RegionFile::open(&path, region, false).expect("Reopen should succeed");
        match file.read_record(pos) {
            Err(StorageError::Integrity { pos: p, detail }) => {
                assert_eq!(p, pos);
                assert!(detail.contains("checksum"), "unexpected detail: {detail}");
            }
            other => panic!("Expected Integrity, got {other:?}"),
        }
    }

    #[test]
    fn test_unknown_magic_refused() {
        let dir = TempDir::new().expect("Temp dir should be created");
        let region = RegionPos::new(0, 0);
        let path = region_path(&dir, region);
        {
            let file = RegionFile::open(&path, region, true).expect("Open should succeed");
            write_plain(&file, ChunkPos::new(0, 0), b"x", 1);
        }
        let mut raw = OpenOptions::new()
            .write(true)
            .open(&path)
            .expect("Raw open should succeed");
        raw.write_all(b"WHAT").expect("Write should succeed");
        drop(raw);

        match RegionFile::open(&path, region, false) {
            Err(StorageError::UnsupportedFormat { detail }) => {
                assert!(detail.contains("magic"), "unexpected detail: {detail}");
            }
            other => panic!("Expected UnsupportedFormat, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_future_version_refused() {
        let dir = TempDir::new().expect("Temp dir should be created");
        let region = RegionPos::new(0, 0);
        let path = region_path(&dir, region);
        {
            RegionFile::open(&path, region, true).expect("Open should succeed");
        }
        let mut raw = OpenOptions::new()
            .write(true)
            .open(&path)
            .expect("Raw open should succeed");
        raw.seek(SeekFrom::Start(4)).expect("Seek should succeed");
        raw.write_all(&[9]).expect("Write should succeed");
        drop(raw);

        match RegionFile::open(&path, region, false) {
            Err(StorageError::UnsupportedFormat { detail }) => {
                assert!(detail.contains("version"), "unexpected detail: {detail}");
            }
            other => panic!("Expected UnsupportedFormat, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_chunk_positions_and_count() {
        let dir = TempDir::new().expect("Temp dir should be created");
        let region = RegionPos::new(1, 0);
        let file =
            RegionFile::open(&region_path(&dir, region), region, true).expect("Open should succeed");

        let a = ChunkPos::new(32, 0);
        let b = ChunkPos::new(63, 31);
        write_plain(&file, a, b"a", 1);
        write_plain(&file, b, b"b", 2);

        let mut positions = file.chunk_positions();
        positions.sort();
        assert_eq!(positions, vec![a, b]);
        assert_eq!(file.chunk_count(), 2);
        assert!(file.contains(a));
        assert!(!file.contains(ChunkPos::new(40, 9)));
    }
}
