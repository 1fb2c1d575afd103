// End-to-end conversion flows over a real on-disk world: legacy files go
// in, the engine serves reads in every mode, and retired files leave the
// region directory exactly when they should.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use strata_engine::constants::legacy_format::{SCHEME_GZIP, SCHEME_ZLIB};
use strata_engine::error::StorageError;
use strata_engine::region::LegacyRegionWriter;
use strata_engine::{ChunkPos, ConversionMode, EngineConfig, RegionPos, StrataEngine};
use tempfile::TempDir;

fn world_config(root: &Path, mode: ConversionMode) -> EngineConfig {
    EngineConfig {
        world_root: root.to_path_buf(),
        conversion_mode: mode,
        // Keep worker pools quiet so tests control every load.
        prefetch_workers: 0,
        ..EngineConfig::default()
    }
}

/// Write one legacy region file holding the given chunks.
fn seed_legacy_region(
    world_root: &Path,
    region: RegionPos,
    chunks: &[(ChunkPos, &[u8])],
) -> PathBuf {
    let region_dir = world_root.join("region");
    std::fs::create_dir_all(&region_dir).expect("Region dir should be created");
    let mut writer = LegacyRegionWriter::new(region);
    for (i, (pos, data)) in chunks.iter().enumerate() {
        let scheme = if i % 2 == 0 { SCHEME_ZLIB } else { SCHEME_GZIP };
        writer
            .put_chunk(*pos, data, scheme)
            .expect("Legacy chunk should be staged");
    }
    let path = region_dir.join(region.legacy_file_name());
    writer.write_to(&path).expect("Legacy region should be written");
    path
}

#[test]
fn test_on_demand_read_converts_and_retires() {
    let root = TempDir::new().expect("Temp dir should be created");
    let region = RegionPos::new(0, 0);
    let a = ChunkPos::new(3, 4);
    let b = ChunkPos::new(9, 9);
    let legacy_path = seed_legacy_region(
        root.path(),
        region,
        &[(a, b"chunk a payload"), (b, b"chunk b payload")],
    );

    let engine = StrataEngine::open(world_config(root.path(), ConversionMode::OnDemand))
        .expect("Engine should open");

    let entry = engine.read_chunk(a).expect("Read should succeed");
    assert_eq!(entry.data, b"chunk a payload");
    // One chunk still unconverted, so the legacy file must survive.
    assert!(legacy_path.exists());

    let entry = engine.read_chunk(b).expect("Read should succeed");
    assert_eq!(entry.data, b"chunk b payload");
    assert!(
        !legacy_path.exists(),
        "Fully converted legacy region should be retired"
    );
    assert!(root.path().join("region").join(region.file_name()).exists());

    let status = engine.status().expect("Status should succeed");
    assert_eq!(status.conversion.chunks_converted, 2);
    assert_eq!(status.conversion.legacy_regions_remaining, 0);
}

#[test]
fn test_full_mode_converts_everything_at_startup() {
    let root = TempDir::new().expect("Temp dir should be created");
    seed_legacy_region(
        root.path(),
        RegionPos::new(0, 0),
        &[(ChunkPos::new(1, 1), b"one"), (ChunkPos::new(2, 2), b"two")],
    );
    seed_legacy_region(
        root.path(),
        RegionPos::new(-1, 0),
        &[(ChunkPos::new(-5, 7), b"three")],
    );

    let engine = StrataEngine::open(world_config(root.path(), ConversionMode::Full))
        .expect("Engine should open");

    let status = engine.status().expect("Status should succeed");
    assert_eq!(status.conversion.chunks_converted, 3);
    assert_eq!(status.conversion.regions_converted, 2);
    assert_eq!(status.conversion.legacy_regions_remaining, 0);
    assert_eq!(
        engine
            .read_chunk(ChunkPos::new(-5, 7))
            .expect("Read should succeed")
            .data,
        b"three"
    );
}

#[test]
fn test_manual_mode_hides_legacy_until_operator_converts() {
    let root = TempDir::new().expect("Temp dir should be created");
    let pos = ChunkPos::new(6, 6);
    seed_legacy_region(root.path(), RegionPos::new(0, 0), &[(pos, b"parked")]);

    let engine = StrataEngine::open(world_config(root.path(), ConversionMode::Manual))
        .expect("Engine should open");

    let err = engine
        .read_chunk(pos)
        .expect_err("Unconverted chunk should be invisible in manual mode");
    assert!(err.is_not_found(), "Expected NotFound, got {err}");

    let report = engine.convert_legacy().expect("Conversion should succeed");
    assert_eq!(report.chunks, 1);
    assert_eq!(
        engine.read_chunk(pos).expect("Read should succeed").data,
        b"parked"
    );
}

#[test]
fn test_background_mode_serves_legacy_and_drains_queue() {
    let root = TempDir::new().expect("Temp dir should be created");
    let pos = ChunkPos::new(2, 3);
    seed_legacy_region(root.path(), RegionPos::new(0, 0), &[(pos, b"drained")]);

    let mut config = world_config(root.path(), ConversionMode::Background);
    // Make idle trivially reachable so the converter runs inside the test.
    config.idle_min_quiet_secs = 0;
    config.idle_max_cpu_percent = 100.0;
    config.idle_min_tps = 0.0;
    config.converter_poll_secs = 1;
    let engine = StrataEngine::open(config).expect("Engine should open");

    // The read itself is served from legacy, before any conversion.
    assert_eq!(
        engine.read_chunk(pos).expect("Read should succeed").data,
        b"drained"
    );

    let deadline = Instant::now() + Duration::from_secs(20);
    loop {
        let status = engine.status().expect("Status should succeed");
        if status.conversion.legacy_regions_remaining == 0 && status.conversion.queue_depth == 0 {
            break;
        }
        assert!(
            Instant::now() < deadline,
            "Background converter did not drain the queue"
        );
        std::thread::sleep(Duration::from_millis(50));
    }
    assert_eq!(
        engine.read_chunk(pos).expect("Read should succeed").data,
        b"drained"
    );
}

#[test]
fn test_keep_legacy_moves_retired_files_to_backup() {
    let root = TempDir::new().expect("Temp dir should be created");
    let region = RegionPos::new(0, 0);
    seed_legacy_region(root.path(), region, &[(ChunkPos::new(0, 0), b"kept")]);

    let mut config = world_config(root.path(), ConversionMode::Full);
    config.keep_legacy = true;
    let engine = StrataEngine::open(config).expect("Engine should open");
    drop(engine);

    assert!(!root.path().join("region").join(region.legacy_file_name()).exists());
    let backups: Vec<_> = std::fs::read_dir(root.path().join("backup"))
        .expect("Backup dir should exist")
        .collect::<Result<_, _>>()
        .expect("Backup dir should be readable");
    assert_eq!(backups.len(), 1);
    assert!(backups[0].path().join(region.legacy_file_name()).exists());
}

#[test]
fn test_current_data_survives_reopen_and_mode_change() {
    let root = TempDir::new().expect("Temp dir should be created");
    let pos = ChunkPos::new(12, -3);

    {
        let engine = StrataEngine::open(world_config(root.path(), ConversionMode::Background))
            .expect("Engine should open");
        engine.write_chunk(pos, b"durable").expect("Write should succeed");
        engine.shutdown().expect("Shutdown should succeed");
    }

    let engine = StrataEngine::open(world_config(root.path(), ConversionMode::Manual))
        .expect("Engine should reopen");
    assert_eq!(
        engine.read_chunk(pos).expect("Read should succeed").data,
        b"durable"
    );
    assert_eq!(engine.manifest().conversion_mode, ConversionMode::Manual);
}

#[test]
fn test_corrupt_current_chunk_reports_integrity() {
    let root = TempDir::new().expect("Temp dir should be created");
    let pos = ChunkPos::new(0, 0);

    {
        let engine = StrataEngine::open(world_config(root.path(), ConversionMode::OnDemand))
            .expect("Engine should open");
        // Incompressible payload so a byte flip always lands in the record.
        let mut rng = StdRng::seed_from_u64(0xfeed_beef);
        let noise: Vec<u8> = (0..4096).map(|_| rng.gen()).collect();
        engine.write_chunk(pos, &noise).expect("Write should succeed");
        engine.shutdown().expect("Shutdown should succeed");
    }

    let region_path = root
        .path()
        .join("region")
        .join(RegionPos::new(0, 0).file_name());
    let mut bytes = std::fs::read(&region_path).expect("Region file should be readable");
    let last = bytes.len() - 1;
    bytes[last] ^= 0xff;
    std::fs::write(&region_path, &bytes).expect("Region file should be writable");

    let engine = StrataEngine::open(world_config(root.path(), ConversionMode::OnDemand))
        .expect("Engine should reopen");
    match engine.read_chunk(pos) {
        Err(StorageError::Integrity { .. }) => {}
        other => panic!("Expected Integrity error, got {other:?}"),
    }
}

#[test]
fn test_status_serializes_to_json() {
    let root = TempDir::new().expect("Temp dir should be created");
    let engine = StrataEngine::open(world_config(root.path(), ConversionMode::Background))
        .expect("Engine should open");
    let status = engine.status().expect("Status should succeed");
    let json = serde_json::to_string(&status).expect("Status should serialize");
    assert!(json.contains("conversion"));
    assert!(json.contains("autopilot"));
    assert!(json.contains("prefetch"));
}
