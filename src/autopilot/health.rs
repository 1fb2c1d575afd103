//! Host health reporting and classification.
//!
//! The embedding application publishes tick timings into a [`HealthFeed`];
//! the autopilot and the idle detector read classified states back out.
//! A feed nobody publishes to, or one gone stale, reads as healthy: the
//! engine must not throttle itself on missing data.

use std::time::{Duration, Instant};

use parking_lot::RwLock;
use serde::Serialize;

use crate::constants::health::{
    CRITICAL_MSPT, CRITICAL_TPS, STALE_AFTER_SECS, STRUGGLING_MSPT, STRUGGLING_TPS,
};

/// One published measurement of the host's tick loop.
#[derive(Debug, Clone, Copy)]
pub struct HealthSnapshot {
    /// Milliseconds spent per tick.
    pub mspt_ms: f64,
    /// Ticks per second actually achieved.
    pub tps: f64,
    pub captured_at: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum HealthState {
    Healthy,
    Struggling,
    Critical,
}

impl HealthState {
    /// Either metric crossing a bar is enough to demote the state.
    pub fn classify(snapshot: &HealthSnapshot) -> Self {
        if snapshot.mspt_ms >= CRITICAL_MSPT || snapshot.tps <= CRITICAL_TPS {
            HealthState::Critical
        } else if snapshot.mspt_ms >= STRUGGLING_MSPT || snapshot.tps <= STRUGGLING_TPS {
            HealthState::Struggling
        } else {
            HealthState::Healthy
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            HealthState::Healthy => "healthy",
            HealthState::Struggling => "struggling",
            HealthState::Critical => "critical",
        }
    }
}

/// Latest-value channel between the host application and the engine.
pub struct HealthFeed {
    latest: RwLock<Option<HealthSnapshot>>,
}

impl HealthFeed {
    pub fn new() -> Self {
        Self {
            latest: RwLock::new(None),
        }
    }

    pub fn publish(&self, mspt_ms: f64, tps: f64) {
        self.publish_snapshot(HealthSnapshot {
            mspt_ms,
            tps,
            captured_at: Instant::now(),
        });
    }

    pub fn publish_snapshot(&self, snapshot: HealthSnapshot) {
        *self.latest.write() = Some(snapshot);
    }

    pub fn snapshot(&self) -> Option<HealthSnapshot> {
        *self.latest.read()
    }

    /// The latest snapshot, unless it has aged out.
    pub fn fresh(&self) -> Option<HealthSnapshot> {
        self.snapshot().filter(|s| {
            s.captured_at.elapsed() <= Duration::from_secs(STALE_AFTER_SECS)
        })
    }

    /// Classified state of the freshest data, healthy when silent or stale.
    pub fn state(&self) -> HealthState {
        self.fresh()
            .map(|s| HealthState::classify(&s))
            .unwrap_or(HealthState::Healthy)
    }
}

impl Default for HealthFeed {
    fn default() -> Self {
        Self::new()
    }
}
