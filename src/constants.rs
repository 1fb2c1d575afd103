// Strata Engine Constants - SINGLE SOURCE OF TRUTH
//
// This file contains ALL tunable numbers used throughout the engine.
// Every module pulls from here so the on-disk format, the converter and
// the prefetch layer can never disagree about geometry.

/// Region and chunk geometry
pub mod geometry {
    /// Chunks per region edge. One region file covers a 32x32 chunk square.
    pub const REGION_SIZE: i32 = 32;

    /// Total chunk slots per region file.
    pub const CHUNKS_PER_REGION: usize = (REGION_SIZE * REGION_SIZE) as usize;

    /// World units per chunk edge. Movement samples arrive in world units;
    /// predictions are emitted in chunk coordinates.
    pub const CHUNK_EDGE: i32 = 16;
}

/// Current ("strata") region file format
pub mod strata_format {
    /// Magic bytes at offset 0 of every region file.
    pub const REGION_MAGIC: [u8; 4] = *b"SRG1";

    /// Format version byte following the magic.
    pub const REGION_VERSION: u8 = 1;

    /// Header length: magic (4) + version (1) + reserved (3).
    pub const HEADER_LEN: usize = 8;

    /// One slot descriptor: offset u32 + length u32 + compression u8 + checksum u32.
    pub const SLOT_LEN: usize = 13;

    /// Payload record prelude: uncompressed_len u32 + timestamp_secs u64.
    pub const RECORD_PRELUDE_LEN: usize = 12;

    /// Upper bound on a single chunk's uncompressed payload. A prelude that
    /// claims more than this is treated as corrupt instead of allocated.
    pub const MAX_UNCOMPRESSED_LEN: usize = 64 * 1024 * 1024;

    /// File extension for current-format region files.
    pub const FILE_EXT: &str = "srg";
}

/// Legacy ("sector") region file format, read-only
pub mod legacy_format {
    /// Sector granularity of the legacy layout.
    pub const SECTOR_LEN: usize = 4096;

    /// Legacy header: 1024 big-endian locations + 1024 big-endian timestamps.
    pub const HEADER_LEN: usize = SECTOR_LEN * 2;

    /// Legacy per-record compression scheme bytes.
    pub const SCHEME_GZIP: u8 = 1;
    pub const SCHEME_ZLIB: u8 = 2;
    pub const SCHEME_NONE: u8 = 3;

    /// Upper bound on a decompressed legacy chunk. The legacy record does not
    /// store the uncompressed size, so inflation is capped instead.
    pub const MAX_UNCOMPRESSED_LEN: usize = 64 * 1024 * 1024;

    /// File extension for legacy region files.
    pub const FILE_EXT: &str = "rgn";
}

/// Autopilot radius policy
pub mod radius {
    /// Per-grade look-ahead/view ceilings, in chunks.
    pub const LOW_END_MAX: u32 = 16;
    pub const GAMING_MAX: u32 = 48;
    pub const HIGH_PERFORMANCE_MAX: u32 = 96;

    /// Floor applied while the host is struggling.
    pub const HARD_FLOOR: u32 = 16;

    /// Fixed radius while the host is critical, independent of any request.
    pub const CRITICAL_RADIUS: u32 = 8;
}

/// Default health thresholds (milliseconds per tick / ticks per second)
pub mod health {
    pub const STRUGGLING_MSPT: f64 = 50.0;
    pub const STRUGGLING_TPS: f64 = 18.0;
    pub const CRITICAL_MSPT: f64 = 100.0;
    pub const CRITICAL_TPS: f64 = 10.0;

    /// Snapshots older than this are ignored and the host is assumed healthy.
    pub const STALE_AFTER_SECS: u64 = 5;
}

/// World manifest sidecar
pub mod manifest {
    /// File name of the manifest at the world root.
    pub const FILE_NAME: &str = "strata.manifest";

    /// Current manifest major version; a mismatch refuses to open the world.
    pub const VERSION_MAJOR: u16 = 1;
    pub const VERSION_MINOR: u16 = 0;
}
