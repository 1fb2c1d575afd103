//! Movement-based intent prediction.
//!
//! Each tracked subject keeps a short ring of position samples. Velocity
//! over that window, boosted by the declared movement mode, projects a
//! tunnel of chunks along the travel direction. Implausible jumps are
//! treated as teleports: history is void, and so is any prefetch intent
//! issued for the old position.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use rustc_hash::FxHashSet;

use crate::constants::geometry::CHUNK_EDGE;
use crate::world::ChunkPos;

/// Identifier of a tracked mover, assigned by the embedding application.
pub type SubjectId = u64;

/// Declared movement mode; faster modes look farther ahead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MovementMode {
    Walking,
    Sprinting,
    Flying,
}

impl MovementMode {
    pub fn boost(&self) -> f64 {
        match self {
            MovementMode::Walking => 1.0,
            MovementMode::Sprinting => 1.6,
            MovementMode::Flying => 2.5,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            MovementMode::Walking => "walking",
            MovementMode::Sprinting => "sprinting",
            MovementMode::Flying => "flying",
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct MovementSample {
    x: f64,
    z: f64,
    at: Instant,
}

#[derive(Debug, Clone)]
pub struct PredictorConfig {
    /// Samples kept per subject.
    pub history_len: usize,
    /// Minimum baseline between samples for a velocity estimate.
    pub min_sample_interval: Duration,
    /// Fastest legitimate movement, world units per second. Anything faster
    /// is a teleport.
    pub max_plausible_speed: f64,
    /// How many seconds of travel to cover ahead of the subject.
    pub lookahead_secs: f64,
    /// Chebyshev half-width of the predicted tunnel, in chunks.
    pub tunnel_radius: i32,
    /// Speeds below this are noise, not movement.
    pub min_speed: f64,
}

impl Default for PredictorConfig {
    fn default() -> Self {
        Self {
            history_len: 16,
            min_sample_interval: Duration::from_millis(100),
            max_plausible_speed: 100.0,
            lookahead_secs: 3.0,
            tunnel_radius: 1,
            min_speed: 0.1,
        }
    }
}

/// What one movement update predicts.
#[derive(Debug, Clone, PartialEq)]
pub struct Intent {
    /// Chunks worth prefetching, ordered near to far, current chunk excluded.
    pub chunks: Vec<ChunkPos>,
    /// The subject jumped; outstanding prefetch for it is now pointless.
    pub teleported: bool,
}

impl Intent {
    fn empty() -> Self {
        Self {
            chunks: Vec::new(),
            teleported: false,
        }
    }

    fn teleport() -> Self {
        Self {
            chunks: Vec::new(),
            teleported: true,
        }
    }
}

fn chunk_at(x: f64, z: f64) -> ChunkPos {
    ChunkPos::new(
        (x / CHUNK_EDGE as f64).floor() as i32,
        (z / CHUNK_EDGE as f64).floor() as i32,
    )
}

struct SubjectTrack {
    samples: VecDeque<MovementSample>,
}

/// Per-subject movement tracker and tunnel predictor.
pub struct IntentPredictor {
    config: PredictorConfig,
    subjects: DashMap<SubjectId, SubjectTrack>,
}

impl IntentPredictor {
    pub fn new(config: PredictorConfig) -> Self {
        Self {
            config,
            subjects: DashMap::new(),
        }
    }

    /// Feed a movement sample and predict. `limit` caps how many chunks
    /// ahead the tunnel may reach; zero disables prediction entirely.
    pub fn update(
        &self,
        subject: SubjectId,
        x: f64,
        z: f64,
        mode: MovementMode,
        limit: u32,
    ) -> Intent {
        self.update_at(subject, x, z, mode, limit, Instant::now())
    }

    /// Clock-explicit variant of [`update`], the seam tests drive.
    ///
    /// [`update`]: IntentPredictor::update
    pub fn update_at(
        &self,
        subject: SubjectId,
        x: f64,
        z: f64,
        mode: MovementMode,
        limit: u32,
        at: Instant,
    ) -> Intent {
        let mut track = self.subjects.entry(subject).or_insert_with(|| SubjectTrack {
            samples: VecDeque::with_capacity(self.config.history_len),
        });

        let sample = MovementSample { x, z, at };
        if let Some(last) = track.samples.back() {
            let dt = at.duration_since(last.at);
            let dt_eff = dt.max(self.config.min_sample_interval).as_secs_f64();
            let jump = ((x - last.x).powi(2) + (z - last.z).powi(2)).sqrt();
            if jump > self.config.max_plausible_speed * dt_eff {
                log::debug!(
                    "subject {subject} jumped {jump:.0} units in {dt_eff:.2}s, treating as teleport"
                );
                track.samples.clear();
                track.samples.push_back(sample);
                return Intent::teleport();
            }
        }
        track.samples.push_back(sample);
        while track.samples.len() > self.config.history_len {
            track.samples.pop_front();
        }

        let newest = sample;
        let Some(oldest) = track.samples.front().copied() else {
            return Intent::empty();
        };
        let baseline = newest.at.duration_since(oldest.at);
        if baseline < self.config.min_sample_interval {
            return Intent::empty();
        }
        drop(track);

        let secs = baseline.as_secs_f64();
        let dx = newest.x - oldest.x;
        let dz = newest.z - oldest.z;
        let distance = (dx * dx + dz * dz).sqrt();
        let speed = distance / secs;
        if speed < self.config.min_speed {
            return Intent::empty();
        }

        let dir_x = dx / distance;
        let dir_z = dz / distance;
        let reach_units = speed * mode.boost() * self.config.lookahead_secs;
        let reach_chunks = ((reach_units / CHUNK_EDGE as f64).ceil() as u32)
            .max(1)
            .min(limit);

        let here = chunk_at(x, z);
        let r = self.config.tunnel_radius;
        let mut seen = FxHashSet::default();
        let mut chunks = Vec::new();
        for step in 1..=reach_chunks as i64 {
            let px = x + dir_x * (step * CHUNK_EDGE as i64) as f64;
            let pz = z + dir_z * (step * CHUNK_EDGE as i64) as f64;
            let center = chunk_at(px, pz);
            for off_z in -r..=r {
                for off_x in -r..=r {
                    let candidate = center.offset(off_x, off_z);
                    // The square around a far center may reach past the cap.
                    if candidate.chebyshev_distance(&here) > limit {
                        continue;
                    }
                    if candidate != here && seen.insert(candidate) {
                        chunks.push(candidate);
                    }
                }
            }
        }
        Intent {
            chunks,
            teleported: false,
        }
    }

    /// Drop a subject's history, e.g. when it disconnects.
    pub fn forget(&self, subject: SubjectId) {
        self.subjects.remove(&subject);
    }

    pub fn tracked_subjects(&self) -> usize {
        self.subjects.len()
    }
}
