//! Read adapter for the legacy sector-based region format.
//!
//! ```text
//! offset 0       1024 big-endian u32 locations: sector_offset << 8 | sector_count
//! offset 4096    1024 big-endian u32 timestamps, seconds since the epoch
//! offset 8192    records, each aligned to a 4096-byte sector:
//!                u32 big-endian length | u8 scheme | length-1 payload bytes
//! ```
//!
//! Schemes are 1 = gzip, 2 = zlib, 3 = uncompressed. The format carries no
//! checksums and no uncompressed sizes, so reads validate structure only and
//! cap inflation at a fixed bound. Legacy files are never modified in place;
//! the converter retires them whole.
//!
//! [`LegacyRegionWriter`] exists for fixtures and tooling that need to
//! fabricate worlds in the old format.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use flate2::read::{GzDecoder, ZlibDecoder};
use flate2::write::{GzEncoder, ZlibEncoder};
use flate2::Compression;
use rustc_hash::FxHashMap;

use crate::codec::{checksum_of, CompressionKind};
use crate::constants::geometry::{CHUNKS_PER_REGION, REGION_SIZE};
use crate::constants::legacy_format::{
    FILE_EXT, HEADER_LEN, MAX_UNCOMPRESSED_LEN, SCHEME_GZIP, SCHEME_NONE, SCHEME_ZLIB, SECTOR_LEN,
};
use crate::error::{StorageError, StorageResult};
use crate::region::{read_exact_at, scan_region_files};
use crate::world::{epoch_secs, ChunkEntry, ChunkPos, RegionPos};

fn scheme_kind(scheme: u8) -> Option<CompressionKind> {
    match scheme {
        SCHEME_GZIP => Some(CompressionKind::Gzip),
        SCHEME_ZLIB => Some(CompressionKind::Zlib),
        SCHEME_NONE => Some(CompressionKind::None),
        _ => None,
    }
}

fn inflate(pos: ChunkPos, scheme: u8, bytes: &[u8]) -> StorageResult<Vec<u8>> {
    let mut out = Vec::new();
    let cap = MAX_UNCOMPRESSED_LEN as u64 + 1;
    match scheme {
        SCHEME_GZIP => {
            GzDecoder::new(bytes)
                .take(cap)
                .read_to_end(&mut out)
                .map_err(|e| {
                    StorageError::integrity(pos, format!("legacy gzip stream failed: {e}"))
                })?;
        }
        SCHEME_ZLIB => {
            ZlibDecoder::new(bytes)
                .take(cap)
                .read_to_end(&mut out)
                .map_err(|e| {
                    StorageError::integrity(pos, format!("legacy zlib stream failed: {e}"))
                })?;
        }
        SCHEME_NONE => out.extend_from_slice(bytes),
        other => {
            return Err(StorageError::unsupported(format!(
                "legacy chunk {pos} uses unknown compression scheme {other}"
            )))
        }
    }
    if out.len() > MAX_UNCOMPRESSED_LEN {
        return Err(StorageError::integrity(
            pos,
            format!("legacy chunk inflates past the {MAX_UNCOMPRESSED_LEN} byte limit"),
        ));
    }
    Ok(out)
}

/// A single legacy region file, header loaded at open. The file is immutable
/// from this adapter's point of view, so no locking is needed.
pub struct LegacyRegionFile {
    pos: RegionPos,
    file: File,
    file_len: u64,
    /// Decoded locations: (first sector, sector count), zeroes for absent.
    locations: Vec<(u32, u8)>,
    timestamps: Vec<u32>,
}

impl LegacyRegionFile {
    pub fn open(path: &Path, pos: RegionPos) -> StorageResult<Self> {
        let file = File::open(path)?;
        let file_len = file.metadata()?.len();
        if file_len < HEADER_LEN as u64 {
            return Err(StorageError::unsupported(format!(
                "legacy region {pos} is truncated: {file_len} bytes, header needs {HEADER_LEN}"
            )));
        }
        let mut header = vec![0u8; HEADER_LEN];
        read_exact_at(&file, &mut header, 0)?;

        let mut locations = Vec::with_capacity(CHUNKS_PER_REGION);
        let mut timestamps = Vec::with_capacity(CHUNKS_PER_REGION);
        for i in 0..CHUNKS_PER_REGION {
            let loc = u32::from_be_bytes([
                header[i * 4],
                header[i * 4 + 1],
                header[i * 4 + 2],
                header[i * 4 + 3],
            ]);
            locations.push((loc >> 8, (loc & 0xFF) as u8));
            let t = SECTOR_LEN + i * 4;
            timestamps.push(u32::from_be_bytes([
                header[t],
                header[t + 1],
                header[t + 2],
                header[t + 3],
            ]));
        }
        Ok(Self {
            pos,
            file,
            file_len,
            locations,
            timestamps,
        })
    }

    pub fn region_pos(&self) -> RegionPos {
        self.pos
    }

    pub fn contains(&self, pos: ChunkPos) -> bool {
        debug_assert_eq!(pos.region(), self.pos);
        let (sector, count) = self.locations[pos.local_index()];
        sector != 0 && count != 0
    }

    /// Header timestamp for a present chunk, seconds since the epoch.
    pub fn timestamp(&self, pos: ChunkPos) -> Option<u64> {
        if self.contains(pos) {
            Some(self.timestamps[pos.local_index()] as u64)
        } else {
            None
        }
    }

    pub fn chunk_positions(&self) -> Vec<ChunkPos> {
        let origin = self.pos.origin_chunk();
        self.locations
            .iter()
            .enumerate()
            .filter(|(_, (sector, count))| *sector != 0 && *count != 0)
            .map(|(idx, _)| {
                origin.offset(
                    (idx % REGION_SIZE as usize) as i32,
                    (idx / REGION_SIZE as usize) as i32,
                )
            })
            .collect()
    }

    pub fn chunk_count(&self) -> usize {
        self.locations
            .iter()
            .filter(|(sector, count)| *sector != 0 && *count != 0)
            .count()
    }

    /// Read and inflate a chunk. The entry's compression records which legacy
    /// scheme the payload used, so callers can report on what they migrated.
    pub fn read_chunk(&self, pos: ChunkPos) -> StorageResult<ChunkEntry> {
        debug_assert_eq!(pos.region(), self.pos);
        let idx = pos.local_index();
        let (sector, count) = self.locations[idx];
        if sector == 0 || count == 0 {
            return Err(StorageError::NotFound { pos });
        }
        if sector < 2 {
            return Err(StorageError::integrity(
                pos,
                format!("legacy record claims sector {sector} inside the header"),
            ));
        }
        let start = sector as u64 * SECTOR_LEN as u64;
        let reserved = count as u64 * SECTOR_LEN as u64;
        if start + reserved > self.file_len {
            return Err(StorageError::integrity(
                pos,
                format!(
                    "legacy record at sector {sector} ({count} sectors) passes end of file"
                ),
            ));
        }

        let mut head = [0u8; 5];
        read_exact_at(&self.file, &mut head, start)?;
        let length = u32::from_be_bytes([head[0], head[1], head[2], head[3]]) as u64;
        let scheme = head[4];
        if length == 0 || length + 4 > reserved {
            return Err(StorageError::integrity(
                pos,
                format!("legacy record length {length} does not fit its {count} sectors"),
            ));
        }
        let mut payload = vec![0u8; length as usize - 1];
        read_exact_at(&self.file, &mut payload, start + 5)?;

        let kind = scheme_kind(scheme).ok_or_else(|| {
            StorageError::unsupported(format!(
                "legacy chunk {pos} uses unknown compression scheme {scheme}"
            ))
        })?;
        let data = inflate(pos, scheme, &payload)?;
        // The legacy record carries no checksum; compute one over the packed
        // bytes so the entry's metadata is uniform across formats.
        Ok(ChunkEntry::new(
            pos,
            data,
            kind,
            checksum_of(&payload),
            payload.len() as u32,
            self.timestamps[idx] as u64,
        ))
    }
}

/// Read-only store over a directory's legacy region files.
pub struct LegacyRegionStore {
    dir: PathBuf,
    files: DashMap<RegionPos, Arc<LegacyRegionFile>>,
}

impl LegacyRegionStore {
    /// Open the adapter over `dir`. The directory is not created; a missing
    /// directory simply means no legacy regions.
    pub fn open(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
            files: DashMap::new(),
        }
    }

    fn region_path(&self, region: RegionPos) -> PathBuf {
        self.dir.join(region.legacy_file_name())
    }

    fn handle(&self, region: RegionPos) -> StorageResult<Option<Arc<LegacyRegionFile>>> {
        if let Some(file) = self.files.get(&region) {
            return Ok(Some(file.clone()));
        }
        let path = self.region_path(region);
        if !path.exists() {
            return Ok(None);
        }
        let file = Arc::new(LegacyRegionFile::open(&path, region)?);
        self.files.insert(region, file.clone());
        Ok(Some(file))
    }

    pub fn read_chunk(&self, pos: ChunkPos) -> StorageResult<ChunkEntry> {
        let file = self
            .handle(pos.region())?
            .ok_or(StorageError::NotFound { pos })?;
        file.read_chunk(pos)
    }

    pub fn contains_chunk(&self, pos: ChunkPos) -> StorageResult<bool> {
        Ok(match self.handle(pos.region())? {
            Some(file) => file.contains(pos),
            None => false,
        })
    }

    pub fn chunk_positions_in(&self, region: RegionPos) -> StorageResult<Vec<ChunkPos>> {
        Ok(match self.handle(region)? {
            Some(file) => file.chunk_positions(),
            None => Vec::new(),
        })
    }

    pub fn region_exists(&self, region: RegionPos) -> bool {
        self.region_path(region).exists()
    }

    /// Every legacy region present on disk, sorted.
    pub fn region_positions(&self) -> StorageResult<Vec<RegionPos>> {
        scan_region_files(&self.dir, FILE_EXT)
    }

    /// Remove a fully converted region file, either into `backup_dir` or for
    /// good. The open handle is dropped first so the file is not moved out
    /// from under a reader.
    pub fn retire_region(
        &self,
        region: RegionPos,
        backup_dir: Option<&Path>,
    ) -> StorageResult<()> {
        self.files.remove(&region);
        let path = self.region_path(region);
        if !path.exists() {
            return Ok(());
        }
        match backup_dir {
            Some(backup) => {
                std::fs::create_dir_all(backup)?;
                std::fs::rename(&path, backup.join(region.legacy_file_name()))?;
            }
            None => std::fs::remove_file(&path)?,
        }
        Ok(())
    }
}

/// Builds legacy region files. Records are buffered in memory and laid out
/// when [`LegacyRegionWriter::write_to`] is called.
pub struct LegacyRegionWriter {
    region: RegionPos,
    records: FxHashMap<usize, (u8, Vec<u8>, u32)>,
}

impl LegacyRegionWriter {
    pub fn new(region: RegionPos) -> Self {
        Self {
            region,
            records: FxHashMap::default(),
        }
    }

    pub fn put_chunk(&mut self, pos: ChunkPos, raw: &[u8], scheme: u8) -> StorageResult<()> {
        self.put_chunk_at(pos, raw, scheme, epoch_secs() as u32)
    }

    pub fn put_chunk_at(
        &mut self,
        pos: ChunkPos,
        raw: &[u8],
        scheme: u8,
        timestamp_secs: u32,
    ) -> StorageResult<()> {
        debug_assert_eq!(pos.region(), self.region);
        use std::io::Write;
        let packed = match scheme {
            SCHEME_GZIP => {
                let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
                encoder.write_all(raw)?;
                encoder.finish()?
            }
            SCHEME_ZLIB => {
                let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
                encoder.write_all(raw)?;
                encoder.finish()?
            }
            SCHEME_NONE => raw.to_vec(),
            other => {
                return Err(StorageError::unsupported(format!(
                    "cannot write legacy scheme {other}"
                )))
            }
        };
        self.records
            .insert(pos.local_index(), (scheme, packed, timestamp_secs));
        Ok(())
    }

    /// Lay out the header and sector-aligned records and write the file.
    pub fn write_to(&self, path: &Path) -> StorageResult<()> {
        let mut locations = vec![0u32; CHUNKS_PER_REGION];
        let mut timestamps = vec![0u32; CHUNKS_PER_REGION];
        let mut body: Vec<u8> = Vec::new();

        let mut indices: Vec<usize> = self.records.keys().copied().collect();
        indices.sort_unstable();
        let mut cursor = 2u32;
        for idx in indices {
            let (scheme, packed, ts) = &self.records[&idx];
            let record_len = 4 + 1 + packed.len();
            let sectors = record_len.div_ceil(SECTOR_LEN);
            if sectors > u8::MAX as usize {
                return Err(StorageError::unsupported(format!(
                    "legacy record of {record_len} bytes exceeds the 255 sector limit"
                )));
            }
            locations[idx] = (cursor << 8) | sectors as u32;
            timestamps[idx] = *ts;

            body.extend_from_slice(&(packed.len() as u32 + 1).to_be_bytes());
            body.push(*scheme);
            body.extend_from_slice(packed);
            body.resize(((cursor - 2) as usize + sectors) * SECTOR_LEN, 0);
            cursor += sectors as u32;
        }

        let mut out = Vec::with_capacity(HEADER_LEN + body.len());
        for loc in &locations {
            out.extend_from_slice(&loc.to_be_bytes());
        }
        for ts in &timestamps {
            out.extend_from_slice(&ts.to_be_bytes());
        }
        out.extend_from_slice(&body);
        std::fs::write(path, out)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Seek, SeekFrom, Write};
    use tempfile::TempDir;

    fn build_region(dir: &Path, region: RegionPos, chunks: &[(ChunkPos, Vec<u8>, u8, u32)]) {
        let mut writer = LegacyRegionWriter::new(region);
        for (pos, data, scheme, ts) in chunks {
            writer
                .put_chunk_at(*pos, data, *scheme, *ts)
                .expect("Put should succeed");
        }
        writer
            .write_to(&dir.join(region.legacy_file_name()))
            .expect("Write should succeed");
    }

    #[test]
    fn test_writer_reader_round_trip_all_schemes() {
        let dir = TempDir::new().expect("Temp dir should be created");
        let region = RegionPos::new(0, 0);
        let payload: Vec<u8> = (0..5000u32).map(|i| (i % 83) as u8).collect();
        build_region(
            dir.path(),
            region,
            &[
                (ChunkPos::new(0, 0), payload.clone(), SCHEME_GZIP, 111),
                (ChunkPos::new(1, 0), payload.clone(), SCHEME_ZLIB, 222),
                (ChunkPos::new(2, 0), payload.clone(), SCHEME_NONE, 333),
            ],
        );

        let file = LegacyRegionFile::open(&dir.path().join(region.legacy_file_name()), region)
            .expect("Open should succeed");
        assert_eq!(file.chunk_count(), 3);

        for (x, kind, ts) in [
            (0, CompressionKind::Gzip, 111),
            (1, CompressionKind::Zlib, 222),
            (2, CompressionKind::None, 333),
        ] {
            let entry = file
                .read_chunk(ChunkPos::new(x, 0))
                .expect("Read should succeed");
            assert_eq!(entry.data, payload);
            assert_eq!(entry.compression, kind);
            assert_eq!(entry.timestamp_secs, ts);
            assert_eq!(file.timestamp(ChunkPos::new(x, 0)), Some(ts));
        }
        assert_eq!(file.timestamp(ChunkPos::new(9, 9)), None);
    }

    #[test]
    fn test_absent_chunk_is_not_found() {
        let dir = TempDir::new().expect("Temp dir should be created");
        let region = RegionPos::new(0, 0);
        build_region(
            dir.path(),
            region,
            &[(ChunkPos::new(0, 0), b"only".to_vec(), SCHEME_NONE, 1)],
        );
        let file = LegacyRegionFile::open(&dir.path().join(region.legacy_file_name()), region)
            .expect("Open should succeed");
        match file.read_chunk(ChunkPos::new(9, 9)) {
            Err(StorageError::NotFound { pos }) => assert_eq!(pos, ChunkPos::new(9, 9)),
            other => panic!("Expected NotFound, got {other:?}"),
        }
    }

    #[test]
    fn test_truncated_header_refused() {
        let dir = TempDir::new().expect("Temp dir should be created");
        let path = dir.path().join("r.0.0.rgn");
        std::fs::write(&path, vec![0u8; 100]).expect("Write should succeed");
        match LegacyRegionFile::open(&path, RegionPos::new(0, 0)) {
            Err(StorageError::UnsupportedFormat { detail }) => {
                assert!(detail.contains("truncated"), "unexpected detail: {detail}");
            }
            other => {
                panic!("Expected UnsupportedFormat, got {:?}", other.map(|_| ()))
            }
        }
    }

    #[test]
    fn test_unknown_scheme_refused() {
        let dir = TempDir::new().expect("Temp dir should be created");
        let region = RegionPos::new(0, 0);
        build_region(
            dir.path(),
            region,
            &[(ChunkPos::new(0, 0), b"data".to_vec(), SCHEME_NONE, 1)],
        );
        let path = dir.path().join(region.legacy_file_name());

        // First record sits at sector 2; its scheme byte follows the length.
        let mut raw = std::fs::OpenOptions::new()
            .write(true)
            .open(&path)
            .expect("Raw open should succeed");
        raw.seek(SeekFrom::Start(HEADER_LEN as u64 + 4))
            .expect("Seek should succeed");
        raw.write_all(&[77]).expect("Write should succeed");
        drop(raw);

        let file = LegacyRegionFile::open(&path, region).expect("Open should succeed");
        match file.read_chunk(ChunkPos::new(0, 0)) {
            Err(StorageError::UnsupportedFormat { detail }) => {
                assert!(detail.contains("77"), "unexpected detail: {detail}");
            }
            other => panic!("Expected UnsupportedFormat, got {other:?}"),
        }
    }

    #[test]
    fn test_store_scans_only_legacy_files() {
        let dir = TempDir::new().expect("Temp dir should be created");
        let region = RegionPos::new(-2, 5);
        build_region(
            dir.path(),
            region,
            &[(ChunkPos::new(-64, 160), b"x".to_vec(), SCHEME_ZLIB, 1)],
        );
        std::fs::write(dir.path().join("r.0.0.srg"), b"not legacy")
            .expect("Write should succeed");

        let store = LegacyRegionStore::open(dir.path());
        assert_eq!(
            store.region_positions().expect("Scan should succeed"),
            vec![region]
        );
        assert!(store
            .contains_chunk(ChunkPos::new(-64, 160))
            .expect("Contains should succeed"));
    }

    #[test]
    fn test_retire_moves_file_into_backup() {
        let dir = TempDir::new().expect("Temp dir should be created");
        let region = RegionPos::new(0, 0);
        build_region(
            dir.path(),
            region,
            &[(ChunkPos::new(0, 0), b"keep me".to_vec(), SCHEME_NONE, 1)],
        );

        let store = LegacyRegionStore::open(dir.path());
        store
            .read_chunk(ChunkPos::new(0, 0))
            .expect("Read should succeed");
        let backup = dir.path().join("backup");
        store
            .retire_region(region, Some(&backup))
            .expect("Retire should succeed");

        assert!(!dir.path().join(region.legacy_file_name()).exists());
        assert!(backup.join(region.legacy_file_name()).exists());
        assert!(store.region_positions().expect("Scan should succeed").is_empty());
    }

    #[test]
    fn test_retire_without_backup_deletes() {
        let dir = TempDir::new().expect("Temp dir should be created");
        let region = RegionPos::new(1, 1);
        build_region(
            dir.path(),
            region,
            &[(ChunkPos::new(40, 40), b"bye".to_vec(), SCHEME_NONE, 1)],
        );
        let store = LegacyRegionStore::open(dir.path());
        store.retire_region(region, None).expect("Retire should succeed");
        assert!(!dir.path().join(region.legacy_file_name()).exists());
    }
}
