//! World manifest sidecar.
//!
//! A small bincode file at the world root recording when the world was
//! created, when it was last opened, and which conversion mode last ran.
//! The major version gates opening: a world written by an incompatible
//! build is refused instead of half-read.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::constants::manifest::{FILE_NAME, VERSION_MAJOR, VERSION_MINOR};
use crate::convert::ConversionMode;
use crate::error::{StorageError, StorageResult};
use crate::world::epoch_secs;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestVersion {
    pub major: u16,
    pub minor: u16,
}

impl ManifestVersion {
    pub fn current() -> Self {
        Self {
            major: VERSION_MAJOR,
            minor: VERSION_MINOR,
        }
    }

    /// Minor revisions stay readable; a different major does not.
    pub fn is_compatible(&self) -> bool {
        self.major == VERSION_MAJOR
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorldManifest {
    pub version: ManifestVersion,
    pub created_at_epoch: u64,
    pub last_opened_epoch: u64,
    pub conversion_mode: ConversionMode,
}

impl WorldManifest {
    pub fn new(mode: ConversionMode) -> Self {
        let now = epoch_secs();
        Self {
            version: ManifestVersion::current(),
            created_at_epoch: now,
            last_opened_epoch: now,
            conversion_mode: mode,
        }
    }

    pub fn path_in(world_root: &Path) -> std::path::PathBuf {
        world_root.join(FILE_NAME)
    }

    /// Load the manifest if one exists, refusing incompatible versions.
    pub fn load(path: &Path) -> StorageResult<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let bytes = std::fs::read(path)?;
        let manifest: WorldManifest = bincode::deserialize(&bytes).map_err(|e| {
            StorageError::unsupported(format!("world manifest is unreadable: {e}"))
        })?;
        if !manifest.version.is_compatible() {
            return Err(StorageError::unsupported(format!(
                "world manifest version {}.{} is not readable by this build ({}.{})",
                manifest.version.major, manifest.version.minor, VERSION_MAJOR, VERSION_MINOR
            )));
        }
        Ok(Some(manifest))
    }

    /// Write atomically: serialize to a sibling temp file, then rename over
    /// the old manifest so a crash never leaves a half-written one.
    pub fn store(&self, path: &Path) -> StorageResult<()> {
        let bytes = bincode::serialize(self).map_err(|e| {
            StorageError::unsupported(format!("world manifest failed to encode: {e}"))
        })?;
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, &bytes)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Load an existing manifest or create a fresh one, stamping the open
    /// time and the mode this session runs under, and persist the result.
    pub fn open_world(world_root: &Path, mode: ConversionMode) -> StorageResult<Self> {
        let path = Self::path_in(world_root);
        let mut manifest = match Self::load(&path)? {
            Some(existing) => existing,
            None => Self::new(mode),
        };
        manifest.last_opened_epoch = epoch_secs();
        manifest.conversion_mode = mode;
        manifest.store(&path)?;
        Ok(manifest)
    }
}
