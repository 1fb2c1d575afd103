//! Arbitration and migration between the two on-disk formats.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rayon::prelude::*;
use serde::Serialize;

use crate::convert::{ConversionMode, ConversionQueue};
use crate::error::{StorageError, StorageResult};
use crate::region::{LegacyRegionStore, RegionStore, StoreFormat};
use crate::world::{ChunkEntry, ChunkPos, RegionPos};

/// Outcome of a whole-world conversion pass.
#[derive(Debug, Clone)]
pub struct ConversionReport {
    pub regions: usize,
    pub chunks: usize,
    pub elapsed: Duration,
}

/// Outcome of migrating one region.
#[derive(Debug, Clone)]
pub struct RegionMigration {
    pub region: RegionPos,
    /// Chunks rewritten into the current format.
    pub converted: usize,
    /// Chunks left alone because the current format already had them.
    pub skipped: usize,
    pub elapsed: Duration,
}

/// Point-in-time view of conversion progress, for status surfaces.
#[derive(Debug, Clone, Serialize)]
pub struct ConversionStatus {
    pub mode: ConversionMode,
    pub chunks_converted: u64,
    pub regions_converted: u64,
    pub legacy_regions_remaining: usize,
    pub queue_depth: usize,
    pub failed_regions: usize,
}

/// Serves chunk reads across both formats and migrates legacy data to the
/// current one according to the configured [`ConversionMode`].
///
/// The arbiter rule is fixed: a chunk present in the current format always
/// wins, so a half-converted region is a valid state, never a split brain.
/// Writes land in the current format in every mode.
pub struct ConversionManager {
    mode: ConversionMode,
    current: Arc<RegionStore>,
    legacy: Arc<LegacyRegionStore>,
    queue: Arc<ConversionQueue>,
    /// Retired legacy files move here instead of being deleted, when set.
    backup_dir: Option<PathBuf>,
    chunks_converted: AtomicU64,
    regions_converted: AtomicU64,
}

impl ConversionManager {
    pub fn new(
        mode: ConversionMode,
        current: Arc<RegionStore>,
        legacy: Arc<LegacyRegionStore>,
        queue: Arc<ConversionQueue>,
        keep_legacy: bool,
        backup_root: &Path,
    ) -> Self {
        let backup_dir = keep_legacy.then(|| {
            let stamp = chrono::Local::now().format("%Y%m%d-%H%M%S");
            backup_root.join(format!("legacy-{stamp}"))
        });
        Self {
            mode,
            current,
            legacy,
            queue,
            backup_dir,
            chunks_converted: AtomicU64::new(0),
            regions_converted: AtomicU64::new(0),
        }
    }

    pub fn mode(&self) -> ConversionMode {
        self.mode
    }

    pub fn queue(&self) -> Arc<ConversionQueue> {
        self.queue.clone()
    }

    /// Which format currently holds this chunk, if any.
    pub fn resolve_format(&self, pos: ChunkPos) -> StorageResult<Option<StoreFormat>> {
        if self.current.contains_chunk(pos)? {
            return Ok(Some(StoreFormat::Current));
        }
        if self.legacy.contains_chunk(pos)? {
            return Ok(Some(StoreFormat::Legacy));
        }
        Ok(None)
    }

    /// Read a chunk, applying the mode's policy when only legacy data exists.
    pub fn read(&self, pos: ChunkPos) -> StorageResult<ChunkEntry> {
        if self.current.contains_chunk(pos)? {
            return self.current.read_chunk(pos);
        }
        match self.mode {
            ConversionMode::Manual => Err(StorageError::NotFound { pos }),
            ConversionMode::OnDemand => {
                if !self.legacy.contains_chunk(pos)? {
                    return Err(StorageError::NotFound { pos });
                }
                self.migrate_chunk(pos)?;
                self.current.read_chunk(pos)
            }
            ConversionMode::Background => {
                let entry = self.legacy.read_chunk(pos)?;
                if self.queue.enqueue(pos.region()) {
                    log::debug!("queued legacy region {} for conversion", pos.region());
                }
                Ok(entry)
            }
            ConversionMode::Full => {
                if self.legacy.contains_chunk(pos)? {
                    Err(StorageError::conversion(
                        pos.region(),
                        "legacy data present after full conversion",
                    ))
                } else {
                    Err(StorageError::NotFound { pos })
                }
            }
        }
    }

    /// Read from one specific format, bypassing arbitration. This is the
    /// manual-mode escape hatch; it works in every mode.
    pub fn read_in(&self, pos: ChunkPos, format: StoreFormat) -> StorageResult<ChunkEntry> {
        match format {
            StoreFormat::Current => self.current.read_chunk(pos),
            StoreFormat::Legacy => self.legacy.read_chunk(pos),
        }
    }

    /// Writes always land in the current format.
    pub fn write(&self, pos: ChunkPos, data: &[u8]) -> StorageResult<()> {
        self.current.write_chunk(pos, data)
    }

    /// Convert a single chunk, preserving its legacy timestamp. Returns
    /// `false` when the current format already has the chunk, which makes
    /// repeated calls harmless.
    pub fn migrate_chunk(&self, pos: ChunkPos) -> StorageResult<bool> {
        if self.current.contains_chunk(pos)? {
            return Ok(false);
        }
        let entry = self.legacy.read_chunk(pos)?;
        self.current
            .write_chunk_at(pos, &entry.data, entry.timestamp_secs)?;
        self.chunks_converted.fetch_add(1, Ordering::Relaxed);
        self.maybe_retire_region(pos.region())?;
        Ok(true)
    }

    /// Convert every remaining chunk of one region, then retire its file.
    /// Chunks already present in the current format are skipped, so a rerun
    /// after a mid-region failure picks up where the last attempt stopped.
    pub fn migrate_region(&self, region: RegionPos) -> StorageResult<RegionMigration> {
        let started = Instant::now();
        let positions = self.legacy.chunk_positions_in(region)?;
        if positions.is_empty() && !self.legacy.region_exists(region) {
            return Ok(RegionMigration {
                region,
                converted: 0,
                skipped: 0,
                elapsed: started.elapsed(),
            });
        }
        let mut converted = 0usize;
        let mut skipped = 0usize;
        for pos in positions {
            if self.current.contains_chunk(pos)? {
                skipped += 1;
                continue;
            }
            let entry = self.legacy.read_chunk(pos).map_err(|e| {
                StorageError::conversion(region, format!("chunk {pos} unreadable: {e}"))
            })?;
            self.current
                .write_chunk_at(pos, &entry.data, entry.timestamp_secs)
                .map_err(|e| {
                    StorageError::conversion(region, format!("chunk {pos} rewrite failed: {e}"))
                })?;
            converted += 1;
        }
        self.retire_region(region)?;
        self.chunks_converted
            .fetch_add(converted as u64, Ordering::Relaxed);
        self.regions_converted.fetch_add(1, Ordering::Relaxed);
        let outcome = RegionMigration {
            region,
            converted,
            skipped,
            elapsed: started.elapsed(),
        };
        log::info!(
            "converted region {region}: {converted} chunks ({skipped} already current) in {:?}",
            outcome.elapsed
        );
        Ok(outcome)
    }

    /// Convert the whole world, regions in parallel. Fails on the first
    /// region that cannot be converted.
    pub fn convert_all(&self) -> StorageResult<ConversionReport> {
        let started = Instant::now();
        let regions = self.legacy.region_positions()?;
        if regions.is_empty() {
            return Ok(ConversionReport {
                regions: 0,
                chunks: 0,
                elapsed: started.elapsed(),
            });
        }
        log::info!("full conversion: {} legacy region(s)", regions.len());
        let chunks: usize = regions
            .par_iter()
            .map(|region| self.migrate_region(*region))
            .collect::<StorageResult<Vec<RegionMigration>>>()?
            .into_iter()
            .map(|outcome| outcome.converted)
            .sum();
        let report = ConversionReport {
            regions: regions.len(),
            chunks,
            elapsed: started.elapsed(),
        };
        log::info!(
            "full conversion finished: {} chunks across {} regions in {:?}",
            report.chunks,
            report.regions,
            report.elapsed
        );
        Ok(report)
    }

    /// Confirm no legacy regions remain. Full mode calls this after its
    /// conversion pass and treats a failure as fatal for the open.
    pub fn verify_no_legacy(&self) -> StorageResult<()> {
        let leftover = self.legacy.region_positions()?;
        match leftover.first() {
            None => Ok(()),
            Some(region) => Err(StorageError::conversion(
                *region,
                format!(
                    "{} legacy region(s) remain after full conversion",
                    leftover.len()
                ),
            )),
        }
    }

    /// Retire the region's legacy file once no unconverted chunk remains.
    fn maybe_retire_region(&self, region: RegionPos) -> StorageResult<()> {
        if !self.legacy.region_exists(region) {
            return Ok(());
        }
        for pos in self.legacy.chunk_positions_in(region)? {
            if !self.current.contains_chunk(pos)? {
                return Ok(());
            }
        }
        self.retire_region(region)
    }

    fn retire_region(&self, region: RegionPos) -> StorageResult<()> {
        if !self.legacy.region_exists(region) {
            return Ok(());
        }
        // Converted data must be durable before its source goes away.
        self.current.flush_region(region)?;
        self.legacy
            .retire_region(region, self.backup_dir.as_deref())?;
        match &self.backup_dir {
            Some(dir) => log::info!("retired legacy region {region} into {}", dir.display()),
            None => log::info!("retired legacy region {region}"),
        }
        Ok(())
    }

    pub fn status(&self) -> StorageResult<ConversionStatus> {
        Ok(ConversionStatus {
            mode: self.mode,
            chunks_converted: self.chunks_converted.load(Ordering::Relaxed),
            regions_converted: self.regions_converted.load(Ordering::Relaxed),
            legacy_regions_remaining: self.legacy.region_positions()?.len(),
            queue_depth: self.queue.len(),
            failed_regions: self.queue.failed_count(),
        })
    }

    /// Sync every open current-format region file to disk.
    pub fn flush_all(&self) -> StorageResult<()> {
        self.current.flush_all()
    }
}
