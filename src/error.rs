//! Engine-wide error taxonomy.
//!
//! Five categories cover every failure the storage stack can surface.
//! `NotFound` is routine for callers that generate missing chunks;
//! `Integrity` is never routine and never silently tolerated.

use crate::world::{ChunkPos, RegionPos};

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors surfaced by the region stores, the conversion manager and the
/// prefetch read path.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// The chunk is absent from the store that was resolved for it.
    #[error("chunk {pos} not found")]
    NotFound { pos: ChunkPos },

    /// Stored bytes failed checksum or structural verification.
    #[error("integrity failure for chunk {pos}: {detail}")]
    Integrity { pos: ChunkPos, detail: String },

    /// A migration step failed; the region keeps its pre-conversion state.
    #[error("conversion failed for region {region}: {reason}")]
    Conversion { region: RegionPos, reason: String },

    /// Unrecognized magic, version or compression tag.
    #[error("unsupported format: {detail}")]
    UnsupportedFormat { detail: String },

    /// Underlying filesystem failure.
    #[error("I/O failure: {0}")]
    Io(#[from] std::io::Error),
}

impl StorageError {
    /// Chunk-absent probe, for callers that treat `NotFound` as "generate new".
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound { .. })
    }

    pub(crate) fn integrity(pos: ChunkPos, detail: impl Into<String>) -> Self {
        StorageError::Integrity {
            pos,
            detail: detail.into(),
        }
    }

    pub(crate) fn conversion(region: RegionPos, reason: impl Into<String>) -> Self {
        StorageError::Conversion {
            region,
            reason: reason.into(),
        }
    }

    pub(crate) fn unsupported(detail: impl Into<String>) -> Self {
        StorageError::UnsupportedFormat {
            detail: detail.into(),
        }
    }
}
