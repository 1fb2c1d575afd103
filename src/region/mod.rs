//! Region-file storage: the current append-based format, the legacy
//! sector-based format, and the stores that manage open files of each.

pub mod format;

mod file;
mod legacy;
mod store;

pub use file::{RegionFile, StoredRecord};
pub use legacy::{LegacyRegionFile, LegacyRegionStore, LegacyRegionWriter};
pub use store::RegionStore;

use std::fs::File;
use std::path::Path;

use crate::codec::CodecError;
use crate::error::{StorageError, StorageResult};
use crate::world::{ChunkPos, RegionPos};

#[cfg(unix)]
pub(crate) fn read_exact_at(file: &File, buf: &mut [u8], offset: u64) -> std::io::Result<()> {
    use std::os::unix::fs::FileExt;
    file.read_exact_at(buf, offset)
}

#[cfg(unix)]
pub(crate) fn write_all_at(file: &File, buf: &[u8], offset: u64) -> std::io::Result<()> {
    use std::os::unix::fs::FileExt;
    file.write_all_at(buf, offset)
}

#[cfg(windows)]
pub(crate) fn read_exact_at(file: &File, mut buf: &mut [u8], mut offset: u64) -> std::io::Result<()> {
    use std::os::windows::fs::FileExt;
    while !buf.is_empty() {
        match file.seek_read(buf, offset) {
            Ok(0) => {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "region record truncated",
                ))
            }
            Ok(n) => {
                buf = &mut std::mem::take(&mut buf)[n..];
                offset += n as u64;
            }
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

#[cfg(windows)]
pub(crate) fn write_all_at(file: &File, mut buf: &[u8], mut offset: u64) -> std::io::Result<()> {
    use std::os::windows::fs::FileExt;
    while !buf.is_empty() {
        match file.seek_write(buf, offset) {
            Ok(0) => {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::WriteZero,
                    "failed to write region record",
                ))
            }
            Ok(n) => {
                buf = &buf[n..];
                offset += n as u64;
            }
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// Which on-disk format a chunk is served from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreFormat {
    Current,
    Legacy,
}

impl StoreFormat {
    pub fn name(&self) -> &'static str {
        match self {
            StoreFormat::Current => "current",
            StoreFormat::Legacy => "legacy",
        }
    }
}

/// Lift a codec failure into a storage error carrying the chunk position.
pub(crate) fn codec_error(pos: ChunkPos, err: CodecError) -> StorageError {
    match err {
        CodecError::Io(e) => StorageError::Io(e),
        CodecError::UnknownKind { tag } => StorageError::unsupported(format!(
            "chunk {pos} uses unregistered compression tag {tag}"
        )),
        CodecError::Corrupt { detail } => {
            StorageError::integrity(pos, format!("decompression failed: {detail}"))
        }
        CodecError::SizeMismatch { expected, actual } => StorageError::integrity(
            pos,
            format!("decompressed {actual} bytes, record claims {expected}"),
        ),
    }
}

/// List region positions in `dir` whose file name carries `ext`. A missing
/// directory reads as empty, matching a world with no regions yet.
pub(crate) fn scan_region_files(dir: &Path, ext: &str) -> StorageResult<Vec<RegionPos>> {
    let mut found = Vec::new();
    if !dir.exists() {
        return Ok(found);
    }
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if let Some((pos, file_ext)) = RegionPos::from_file_name(name) {
            if file_ext == ext {
                found.push(pos);
            }
        }
    }
    found.sort();
    Ok(found)
}
