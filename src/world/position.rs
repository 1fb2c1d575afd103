//! Chunk and region coordinates.
//!
//! All conversions use floor division so that negative coordinates land in
//! the correct region: chunk (-1, -1) belongs to region (-1, -1), not (0, 0).

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::constants::geometry::REGION_SIZE;
use crate::constants::{legacy_format, strata_format};

/// Position of a chunk in the world grid, in chunk units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChunkPos {
    pub x: i32,
    pub z: i32,
}

impl ChunkPos {
    pub const fn new(x: i32, z: i32) -> Self {
        Self { x, z }
    }

    /// Region that owns this chunk.
    pub fn region(&self) -> RegionPos {
        RegionPos {
            x: self.x.div_euclid(REGION_SIZE),
            z: self.z.div_euclid(REGION_SIZE),
        }
    }

    /// Offset of this chunk within its region, each component in `0..REGION_SIZE`.
    pub fn local(&self) -> (u32, u32) {
        (
            self.x.rem_euclid(REGION_SIZE) as u32,
            self.z.rem_euclid(REGION_SIZE) as u32,
        )
    }

    /// Row-major slot index within the region header, in `0..CHUNKS_PER_REGION`.
    pub fn local_index(&self) -> usize {
        let (lx, lz) = self.local();
        (lz as usize) * REGION_SIZE as usize + lx as usize
    }

    pub fn offset(&self, dx: i32, dz: i32) -> Self {
        Self {
            x: self.x + dx,
            z: self.z + dz,
        }
    }

    /// Chebyshev (chessboard) distance, the radius metric used for prefetch
    /// tunnels and autopilot radii.
    pub fn chebyshev_distance(&self, other: &ChunkPos) -> u32 {
        let dx = (self.x - other.x).unsigned_abs();
        let dz = (self.z - other.z).unsigned_abs();
        dx.max(dz)
    }
}

impl fmt::Display for ChunkPos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.z)
    }
}

/// Position of a region file in the region grid, in region units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RegionPos {
    pub x: i32,
    pub z: i32,
}

impl RegionPos {
    pub const fn new(x: i32, z: i32) -> Self {
        Self { x, z }
    }

    /// Chunk at the region's minimum corner.
    pub fn origin_chunk(&self) -> ChunkPos {
        ChunkPos {
            x: self.x * REGION_SIZE,
            z: self.z * REGION_SIZE,
        }
    }

    /// Iterate every chunk position covered by this region, row-major.
    pub fn chunks(&self) -> impl Iterator<Item = ChunkPos> {
        let origin = self.origin_chunk();
        (0..REGION_SIZE)
            .flat_map(move |lz| (0..REGION_SIZE).map(move |lx| origin.offset(lx, lz)))
    }

    /// File name for the current on-disk format, e.g. `r.-1.3.srg`.
    pub fn file_name(&self) -> String {
        format!("r.{}.{}.{}", self.x, self.z, strata_format::FILE_EXT)
    }

    /// File name for the legacy on-disk format, e.g. `r.-1.3.rgn`.
    pub fn legacy_file_name(&self) -> String {
        format!("r.{}.{}.{}", self.x, self.z, legacy_format::FILE_EXT)
    }

    /// Parse a region position out of a file name of either format.
    ///
    /// Returns the position and the extension that was seen. Anything that
    /// does not match `r.<x>.<z>.<ext>` yields `None`.
    pub fn from_file_name(name: &str) -> Option<(Self, &str)> {
        let mut parts = name.split('.');
        if parts.next() != Some("r") {
            return None;
        }
        let x = parts.next()?.parse::<i32>().ok()?;
        let z = parts.next()?.parse::<i32>().ok()?;
        let ext = parts.next()?;
        if parts.next().is_some() {
            return None;
        }
        Some((Self { x, z }, ext))
    }
}

impl fmt::Display for RegionPos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.z)
    }
}
