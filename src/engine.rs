//! Engine facade tying the storage stack together.
//!
//! [`StrataEngine::open`] wires the region stores, conversion manager,
//! autopilot, idle-gated background converter, and prefetch pipeline from a
//! single [`EngineConfig`], and [`shutdown`] tears them down in the reverse
//! order.
//!
//! [`shutdown`]: StrataEngine::shutdown

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::autopilot::{AutopilotStatus, AutopilotTicker, HealthFeed, ResourceAutopilot, ResourceGrade};
use crate::codec::{CodecSet, CompressionKind};
use crate::convert::{
    BackgroundConverter, ConversionManager, ConversionMode, ConversionQueue, ConversionReport,
    ConversionStatus, ConverterConfig, IdleDetector, IdlePolicy,
};
use crate::error::StorageResult;
use crate::manifest::WorldManifest;
use crate::prefetch::{
    ByteBoundedCache, Intent, IntentPredictor, MovementMode, PredictorConfig, PrefetchConfig,
    PrefetchEngine, PrefetchStatus, SubjectId,
};
use crate::region::{LegacyRegionStore, RegionStore, StoreFormat};
use crate::world::{ChunkEntry, ChunkPos};

/// Engine configuration, loadable from TOML. Every field has a default so a
/// partial file (or none at all) works.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// World directory holding `region/`, `backup/`, and the manifest.
    pub world_root: PathBuf,
    pub conversion_mode: ConversionMode,
    /// Move retired legacy files into `backup/` instead of deleting them.
    pub keep_legacy: bool,
    /// Compression applied to newly written chunks.
    pub write_compression: CompressionKind,
    /// Radius the operator asks for; the autopilot clamps it to hardware.
    pub requested_radius: u32,
    /// Skip hardware probing and pin the grade.
    pub grade_override: Option<ResourceGrade>,
    pub autopilot_tick_secs: u64,
    pub idle_max_cpu_percent: f64,
    pub idle_min_quiet_secs: u64,
    pub idle_min_tps: f64,
    pub converter_poll_secs: u64,
    pub converter_max_retries: u32,
    pub prefetch_workers: usize,
    pub cache_bytes: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let idle = IdlePolicy::default();
        let converter = ConverterConfig::default();
        let prefetch = PrefetchConfig::default();
        Self {
            world_root: PathBuf::from("world"),
            conversion_mode: ConversionMode::default(),
            keep_legacy: false,
            write_compression: CompressionKind::Lz4,
            requested_radius: 32,
            grade_override: None,
            autopilot_tick_secs: 1,
            idle_max_cpu_percent: idle.max_cpu_percent,
            idle_min_quiet_secs: idle.min_quiet.as_secs(),
            idle_min_tps: idle.min_tps,
            converter_poll_secs: converter.poll_interval.as_secs(),
            converter_max_retries: converter.max_retries,
            prefetch_workers: prefetch.workers,
            cache_bytes: prefetch.cache_bytes,
        }
    }
}

impl EngineConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config: Self = toml::from_str(&raw)
            .with_context(|| format!("parsing config {}", path.display()))?;
        Ok(config)
    }

    fn idle_policy(&self) -> IdlePolicy {
        IdlePolicy {
            max_cpu_percent: self.idle_max_cpu_percent,
            min_quiet: Duration::from_secs(self.idle_min_quiet_secs),
            min_tps: self.idle_min_tps,
        }
    }

    fn converter_config(&self) -> ConverterConfig {
        ConverterConfig {
            poll_interval: Duration::from_secs(self.converter_poll_secs),
            max_retries: self.converter_max_retries,
        }
    }
}

/// Aggregated view over the running subsystems.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub conversion: ConversionStatus,
    pub autopilot: AutopilotStatus,
    pub prefetch: PrefetchStatus,
}

/// One open world: storage, conversion, autopilot, and prefetch.
pub struct StrataEngine {
    config: EngineConfig,
    manifest: WorldManifest,
    manager: Arc<ConversionManager>,
    health: Arc<HealthFeed>,
    autopilot: Arc<ResourceAutopilot>,
    ticker: Mutex<Option<AutopilotTicker>>,
    idle: Arc<IdleDetector>,
    converter: Mutex<Option<BackgroundConverter>>,
    prefetch: PrefetchEngine,
    predictor: IntentPredictor,
}

impl StrataEngine {
    pub fn open(config: EngineConfig) -> StorageResult<Self> {
        std::fs::create_dir_all(&config.world_root)?;
        let manifest = WorldManifest::open_world(&config.world_root, config.conversion_mode)?;

        let region_dir = config.world_root.join("region");
        let codecs = Arc::new(CodecSet::with_defaults());
        let current = Arc::new(RegionStore::open(
            &region_dir,
            codecs,
            config.write_compression,
        )?);
        let legacy = Arc::new(LegacyRegionStore::open(&region_dir));
        let manager = Arc::new(ConversionManager::new(
            config.conversion_mode,
            current,
            legacy,
            Arc::new(ConversionQueue::new()),
            config.keep_legacy,
            &config.world_root.join("backup"),
        ));

        // Full mode blocks startup until the world is wholly converted.
        if config.conversion_mode == ConversionMode::Full {
            let report = manager.convert_all()?;
            manager.verify_no_legacy()?;
            log::info!(
                "full conversion finished: {} chunks in {} regions ({:?})",
                report.chunks,
                report.regions,
                report.elapsed
            );
        }

        let health = Arc::new(HealthFeed::new());
        let grade = config.grade_override.unwrap_or_else(ResourceGrade::probe);
        let autopilot = Arc::new(ResourceAutopilot::new(
            grade,
            config.requested_radius,
            health.clone(),
        ));
        let ticker = autopilot
            .spawn_ticker(Duration::from_secs(config.autopilot_tick_secs.max(1)))?;

        let idle = Arc::new(IdleDetector::with_system_cpu(
            config.idle_policy(),
            health.clone(),
        ));
        let converter = if config.conversion_mode == ConversionMode::Background {
            Some(BackgroundConverter::spawn(
                manager.clone(),
                idle.clone(),
                config.converter_config(),
            )?)
        } else {
            None
        };

        let cache = Arc::new(ByteBoundedCache::new(config.cache_bytes));
        let prefetch = PrefetchEngine::new(
            manager.clone(),
            cache,
            PrefetchConfig {
                workers: config.prefetch_workers,
                cache_bytes: config.cache_bytes,
            },
        )?;
        let predictor = IntentPredictor::new(PredictorConfig::default());

        log::info!(
            "world {} open: mode {}, grade {}, radius {}",
            config.world_root.display(),
            config.conversion_mode.name(),
            grade.name(),
            autopilot.effective_radius()
        );

        Ok(Self {
            config,
            manifest,
            manager,
            health,
            autopilot,
            ticker: Mutex::new(Some(ticker)),
            idle,
            converter: Mutex::new(converter),
            prefetch,
            predictor,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn manifest(&self) -> &WorldManifest {
        &self.manifest
    }

    /// Feed the engine a fresh performance sample. The autopilot and idle
    /// detector both key off this.
    pub fn health_feed(&self) -> Arc<HealthFeed> {
        self.health.clone()
    }

    pub fn effective_radius(&self) -> u32 {
        self.autopilot.effective_radius()
    }

    /// Ask for a different streaming radius. The autopilot still clamps it
    /// to the hardware grade and current health.
    pub fn set_requested_radius(&self, radius: u32) {
        self.autopilot.set_requested_radius(radius);
    }

    /// Cache-first chunk read through the conversion arbiter.
    pub fn read_chunk(&self, pos: ChunkPos) -> StorageResult<Arc<ChunkEntry>> {
        self.idle.note_activity();
        self.prefetch.read_through(pos)
    }

    /// Read from one specific store, bypassing arbitration and the cache.
    pub fn read_chunk_in(&self, pos: ChunkPos, format: StoreFormat) -> StorageResult<ChunkEntry> {
        self.idle.note_activity();
        self.manager.read_in(pos, format)
    }

    /// Write always lands in the current format, whatever mode is active.
    pub fn write_chunk(&self, pos: ChunkPos, data: &[u8]) -> StorageResult<()> {
        self.idle.note_activity();
        self.manager.write(pos, data)?;
        self.prefetch.invalidate(pos);
        Ok(())
    }

    /// Feed a subject movement sample; predicted chunks are queued for
    /// prefetch, bounded by the autopilot's current radius.
    pub fn on_movement(&self, subject: SubjectId, x: f64, z: f64, mode: MovementMode) -> Intent {
        self.idle.note_activity();
        let intent = self
            .predictor
            .update(subject, x, z, mode, self.autopilot.effective_radius());
        if intent.teleported {
            self.prefetch.cancel_subject(subject);
        }
        if !intent.chunks.is_empty() {
            self.prefetch.request(subject, &intent.chunks);
        }
        intent
    }

    /// Drop a subject's movement history and void its queued prefetches.
    pub fn forget_subject(&self, subject: SubjectId) {
        self.predictor.forget(subject);
        self.prefetch.cancel_subject(subject);
    }

    /// Convert every legacy region now, whatever the configured mode. This
    /// is the operator entry point Manual mode relies on.
    pub fn convert_legacy(&self) -> StorageResult<ConversionReport> {
        self.manager.convert_all()
    }

    pub fn status(&self) -> StorageResult<EngineStatus> {
        Ok(EngineStatus {
            conversion: self.manager.status()?,
            autopilot: self.autopilot.status(),
            prefetch: self.prefetch.status(),
        })
    }

    pub fn flush(&self) -> StorageResult<()> {
        self.manager.flush_all()
    }

    /// Stop the background threads and sync everything to disk. Safe to
    /// call more than once; [`Drop`] runs a best-effort pass as well.
    pub fn shutdown(&self) -> StorageResult<()> {
        if let Some(converter) = self.converter.lock().take() {
            converter.stop();
        }
        if let Some(ticker) = self.ticker.lock().take() {
            ticker.stop();
        }
        self.prefetch.stop();
        self.manager.flush_all()?;
        self.manifest
            .store(&WorldManifest::path_in(&self.config.world_root))?;
        Ok(())
    }
}

impl Drop for StrataEngine {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            log::error!("engine shutdown failed: {e}");
        }
    }
}
