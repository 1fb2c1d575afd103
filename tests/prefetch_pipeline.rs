// Movement-driven prefetch over a live engine: predictions from real
// movement samples flow through the worker pool into the cache, teleports
// void them, and the autopilot radius bounds how far they reach.

use std::path::Path;
use std::time::{Duration, Instant};

use strata_engine::autopilot::ResourceGrade;
use strata_engine::prefetch::{Intent, MovementMode};
use strata_engine::{ChunkPos, ConversionMode, EngineConfig, StrataEngine};
use tempfile::TempDir;

fn engine_with(root: &Path, workers: usize, grade: ResourceGrade, radius: u32) -> StrataEngine {
    StrataEngine::open(EngineConfig {
        world_root: root.to_path_buf(),
        conversion_mode: ConversionMode::OnDemand,
        prefetch_workers: workers,
        grade_override: Some(grade),
        requested_radius: radius,
        ..EngineConfig::default()
    })
    .expect("Engine should open")
}

fn chunk_of(x: f64, z: f64) -> ChunkPos {
    ChunkPos::new(
        (x / 16.0).floor() as i32,
        (z / 16.0).floor() as i32,
    )
}

/// Walk a subject through evenly spaced samples, pausing long enough for
/// the predictor to accept each one, and return the last intent.
fn walk(engine: &StrataEngine, subject: u64, samples: &[(f64, f64)], mode: MovementMode) -> Intent {
    let mut last = Intent {
        chunks: Vec::new(),
        teleported: false,
    };
    for (i, (x, z)) in samples.iter().enumerate() {
        if i > 0 {
            std::thread::sleep(Duration::from_millis(210));
        }
        last = engine.on_movement(subject, *x, *z, mode);
    }
    last
}

#[test]
fn test_movement_fills_cache_ahead_of_subject() {
    let root = TempDir::new().expect("Temp dir should be created");
    let engine = engine_with(root.path(), 2, ResourceGrade::HighPerformance, 32);

    // A strip of chunks along +x, wide enough for the prediction tunnel.
    for x in 0..=20 {
        for z in -1..=1 {
            engine
                .write_chunk(ChunkPos::new(x, z), &[x as u8 + 1; 128])
                .expect("Write should succeed");
        }
    }

    let intent = walk(
        &engine,
        1,
        &[(0.0, 8.0), (8.0, 8.0), (16.0, 8.0)],
        MovementMode::Walking,
    );
    assert!(!intent.teleported);
    assert!(
        !intent.chunks.is_empty(),
        "Steady eastward movement should predict chunks"
    );
    let here = chunk_of(16.0, 8.0);
    assert!(
        intent.chunks.iter().all(|c| c.x > here.x || c.z != here.z),
        "The chunk the subject stands in is never prefetched"
    );

    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        let status = engine.status().expect("Status should succeed");
        if status.prefetch.completed + status.prefetch.failed >= status.prefetch.issued
            && status.prefetch.issued > 0
        {
            break;
        }
        assert!(Instant::now() < deadline, "Prefetch workers did not finish");
        std::thread::sleep(Duration::from_millis(10));
    }

    let status = engine.status().expect("Status should succeed");
    assert_eq!(status.prefetch.failed, 0, "Every predicted chunk exists on disk");
    assert!(status.prefetch.cache_chunks as u64 >= status.prefetch.completed);

    // A foreground read of a predicted chunk is now a cache hit.
    engine
        .read_chunk(intent.chunks[0])
        .expect("Read should succeed");
    assert!(engine.status().expect("Status should succeed").prefetch.hits >= 1);
}

#[test]
fn test_teleport_clears_prediction_state() {
    let root = TempDir::new().expect("Temp dir should be created");
    let engine = engine_with(root.path(), 0, ResourceGrade::HighPerformance, 32);
    for x in 0..=4 {
        engine
            .write_chunk(ChunkPos::new(x, 0), b"strip")
            .expect("Write should succeed");
    }

    let intent = walk(
        &engine,
        7,
        &[(0.0, 8.0), (8.0, 8.0)],
        MovementMode::Walking,
    );
    assert!(!intent.teleported);

    std::thread::sleep(Duration::from_millis(210));
    let jump = engine.on_movement(7, 5000.0, 5000.0, MovementMode::Walking);
    assert!(jump.teleported, "A 5000-unit hop in 210ms is a teleport");
    assert!(jump.chunks.is_empty(), "Teleports never predict chunks");

    // History restarts at the new position; the next steady samples
    // predict around it, not around the old track.
    let resumed = walk(
        &engine,
        7,
        &[(5008.0, 5000.0), (5016.0, 5000.0)],
        MovementMode::Walking,
    );
    let here = chunk_of(5016.0, 5000.0);
    assert!(!resumed.chunks.is_empty());
    for chunk in &resumed.chunks {
        assert!(
            chunk.chebyshev_distance(&here) <= 34,
            "Prediction {chunk} strayed from the post-teleport position"
        );
    }
}

#[test]
fn test_autopilot_radius_bounds_prediction_reach() {
    let samples = [(0.0, 0.0), (18.0, 0.0), (36.0, 0.0)];

    let low_root = TempDir::new().expect("Temp dir should be created");
    let low = engine_with(low_root.path(), 0, ResourceGrade::LowEnd, 96);
    assert_eq!(low.effective_radius(), 16);
    let low_intent = walk(&low, 1, &samples, MovementMode::Flying);

    let high_root = TempDir::new().expect("Temp dir should be created");
    let high = engine_with(high_root.path(), 0, ResourceGrade::HighPerformance, 96);
    assert_eq!(high.effective_radius(), 96);
    let high_intent = walk(&high, 1, &samples, MovementMode::Flying);

    let here = chunk_of(36.0, 0.0);
    let reach_of = |intent: &Intent| {
        intent
            .chunks
            .iter()
            .map(|c| c.chebyshev_distance(&here))
            .max()
            .unwrap_or(0)
    };
    let low_reach = reach_of(&low_intent);
    let high_reach = reach_of(&high_intent);
    assert!(
        low_reach <= 16,
        "Low-end grade must clamp prediction to its radius, got {low_reach}"
    );
    assert!(
        high_reach > low_reach,
        "Same movement on a bigger grade should reach farther ({high_reach} vs {low_reach})"
    );
}

#[test]
fn test_write_invalidates_cached_chunk() {
    let root = TempDir::new().expect("Temp dir should be created");
    let engine = engine_with(root.path(), 0, ResourceGrade::Gaming, 32);
    let pos = ChunkPos::new(4, -2);

    engine.write_chunk(pos, b"first").expect("Write should succeed");
    assert_eq!(
        engine.read_chunk(pos).expect("Read should succeed").data,
        b"first"
    );
    engine.write_chunk(pos, b"second").expect("Write should succeed");
    assert_eq!(
        engine.read_chunk(pos).expect("Read should succeed").data,
        b"second",
        "A write must drop the stale cached copy"
    );

    let status = engine.status().expect("Status should succeed");
    assert_eq!(status.prefetch.misses, 2);
    engine.shutdown().expect("Shutdown should succeed");
}
