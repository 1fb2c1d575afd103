//! Store for current-format region files.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::codec::{CodecSet, CompressionKind};
use crate::constants::strata_format::{FILE_EXT, MAX_UNCOMPRESSED_LEN};
use crate::error::{StorageError, StorageResult};
use crate::region::file::RegionFile;
use crate::region::{codec_error, scan_region_files};
use crate::world::{epoch_secs, ChunkEntry, ChunkPos, RegionPos};

/// Concurrent access point for a directory of current-format region files.
///
/// Open files are cached in a [`DashMap`] so that readers and writers of
/// different regions never contend; per-region ordering is the region file's
/// business.
pub struct RegionStore {
    dir: PathBuf,
    files: DashMap<RegionPos, Arc<RegionFile>>,
    codecs: Arc<CodecSet>,
    write_kind: CompressionKind,
}

impl RegionStore {
    /// Open a store rooted at `dir`, creating the directory if needed.
    /// `write_kind` is the compression applied to new records; reads accept
    /// any kind the codec set knows.
    pub fn open(
        dir: &Path,
        codecs: Arc<CodecSet>,
        write_kind: CompressionKind,
    ) -> StorageResult<Self> {
        std::fs::create_dir_all(dir)?;
        Ok(Self {
            dir: dir.to_path_buf(),
            files: DashMap::new(),
            codecs,
            write_kind,
        })
    }

    fn region_path(&self, region: RegionPos) -> PathBuf {
        self.dir.join(region.file_name())
    }

    /// Handle for a region that must exist on disk. Reads must not create
    /// empty region files, so an absent file yields `None`.
    fn peek_handle(&self, region: RegionPos) -> StorageResult<Option<Arc<RegionFile>>> {
        if let Some(file) = self.files.get(&region) {
            return Ok(Some(file.clone()));
        }
        let path = self.region_path(region);
        if !path.exists() {
            return Ok(None);
        }
        self.open_handle(region).map(Some)
    }

    fn open_handle(&self, region: RegionPos) -> StorageResult<Arc<RegionFile>> {
        match self.files.entry(region) {
            Entry::Occupied(entry) => Ok(entry.get().clone()),
            Entry::Vacant(entry) => {
                let file = Arc::new(RegionFile::open(&self.region_path(region), region, true)?);
                entry.insert(file.clone());
                Ok(file)
            }
        }
    }

    /// Read, verify and decompress a chunk.
    pub fn read_chunk(&self, pos: ChunkPos) -> StorageResult<ChunkEntry> {
        let file = self
            .peek_handle(pos.region())?
            .ok_or(StorageError::NotFound { pos })?;
        let record = file.read_record(pos)?;
        let data = self
            .codecs
            .decompress(
                record.compression,
                &record.compressed,
                record.uncompressed_len as usize,
            )
            .map_err(|e| codec_error(pos, e))?;
        Ok(ChunkEntry::new(
            pos,
            data,
            record.compression,
            record.checksum,
            record.compressed.len() as u32,
            record.timestamp_secs,
        ))
    }

    /// Store a chunk payload with the current wall-clock timestamp.
    pub fn write_chunk(&self, pos: ChunkPos, data: &[u8]) -> StorageResult<()> {
        self.write_chunk_at(pos, data, epoch_secs())
    }

    /// Store a chunk payload with an explicit timestamp. Conversion uses this
    /// to carry legacy write times across formats.
    pub fn write_chunk_at(
        &self,
        pos: ChunkPos,
        data: &[u8],
        timestamp_secs: u64,
    ) -> StorageResult<()> {
        if data.len() > MAX_UNCOMPRESSED_LEN {
            return Err(StorageError::unsupported(format!(
                "chunk {pos} payload of {} bytes exceeds the {MAX_UNCOMPRESSED_LEN} byte limit",
                data.len()
            )));
        }
        let compressed = self
            .codecs
            .compress(self.write_kind, data)
            .map_err(|e| codec_error(pos, e))?;
        let file = self.open_handle(pos.region())?;
        file.write_record(
            pos,
            self.write_kind,
            data.len() as u32,
            timestamp_secs,
            &compressed,
        )
    }

    pub fn contains_chunk(&self, pos: ChunkPos) -> StorageResult<bool> {
        Ok(match self.peek_handle(pos.region())? {
            Some(file) => file.contains(pos),
            None => false,
        })
    }

    /// Chunks present in one region, empty if the region file does not exist.
    pub fn chunk_positions_in(&self, region: RegionPos) -> StorageResult<Vec<ChunkPos>> {
        Ok(match self.peek_handle(region)? {
            Some(file) => file.chunk_positions(),
            None => Vec::new(),
        })
    }

    /// Every current-format region present on disk, sorted.
    pub fn region_positions(&self) -> StorageResult<Vec<RegionPos>> {
        scan_region_files(&self.dir, FILE_EXT)
    }

    pub fn flush_region(&self, region: RegionPos) -> StorageResult<()> {
        if let Some(file) = self.files.get(&region) {
            file.flush()?;
        }
        Ok(())
    }

    /// Sync every open region file to stable storage.
    pub fn flush_all(&self) -> StorageResult<()> {
        for entry in self.files.iter() {
            entry.value().flush()?;
        }
        Ok(())
    }

    /// Flush everything and release the open file handles. The store stays
    /// usable; files reopen lazily on the next access.
    pub fn close(&self) -> StorageResult<()> {
        self.flush_all()?;
        self.files.clear();
        Ok(())
    }

    /// Number of region files currently held open.
    pub fn open_file_count(&self) -> usize {
        self.files.len()
    }
}
