//! Resource autopilot: clamps the requested streaming radius to what the
//! host can actually sustain.
//!
//! The ceiling is fixed at startup from the hardware grade; the live health
//! state then picks the operating point below it. The published radius is a
//! single atomic so hot paths read it without locking.

mod grade;
mod health;

pub use grade::ResourceGrade;
pub use health::{HealthFeed, HealthSnapshot, HealthState};

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use serde::Serialize;

use crate::constants::radius::{CRITICAL_RADIUS, HARD_FLOOR};

/// Point-in-time view of the autopilot, for status surfaces.
#[derive(Debug, Clone, Serialize)]
pub struct AutopilotStatus {
    pub grade: ResourceGrade,
    pub health: HealthState,
    pub requested_radius: u32,
    pub ceiling: u32,
    pub effective_radius: u32,
}

/// Governs the effective radius from hardware grade and live health.
///
/// The radius law, applied on every tick:
/// ceiling = min(requested, grade max); healthy runs at the ceiling,
/// struggling at max(hard floor, ceiling / 2), critical at a fixed small
/// radius regardless of what was asked for. There is no hysteresis; a
/// recovered host gets its full radius back on the next tick.
pub struct ResourceAutopilot {
    grade: ResourceGrade,
    requested_radius: AtomicU32,
    health: Arc<HealthFeed>,
    effective: AtomicU32,
}

impl ResourceAutopilot {
    pub fn new(grade: ResourceGrade, requested_radius: u32, health: Arc<HealthFeed>) -> Self {
        let pilot = Self {
            grade,
            requested_radius: AtomicU32::new(requested_radius),
            health,
            effective: AtomicU32::new(0),
        };
        pilot.tick();
        pilot
    }

    pub fn grade(&self) -> ResourceGrade {
        self.grade
    }

    pub fn requested_radius(&self) -> u32 {
        self.requested_radius.load(Ordering::Relaxed)
    }

    /// Change the requested radius at runtime; the published value follows
    /// immediately, not on the next scheduled tick.
    pub fn set_requested_radius(&self, radius: u32) {
        self.requested_radius.store(radius, Ordering::Relaxed);
        self.tick();
    }

    /// Hard ceiling: the request clamped to the hardware tier.
    pub fn ceiling(&self) -> u32 {
        self.requested_radius().min(self.grade.max_radius())
    }

    fn radius_for(&self, state: HealthState) -> u32 {
        let ceiling = self.ceiling();
        match state {
            HealthState::Healthy => ceiling,
            HealthState::Struggling => HARD_FLOOR.max(ceiling / 2),
            HealthState::Critical => CRITICAL_RADIUS,
        }
    }

    /// Re-evaluate health and publish the resulting radius. Returns it.
    pub fn tick(&self) -> u32 {
        let state = self.health.state();
        let radius = self.radius_for(state);
        let previous = self.effective.swap(radius, Ordering::Relaxed);
        if previous != radius {
            log::info!(
                "effective radius {previous} -> {radius} (host {})",
                state.name()
            );
        }
        radius
    }

    /// The radius published by the most recent tick. Lock-free.
    pub fn effective_radius(&self) -> u32 {
        self.effective.load(Ordering::Relaxed)
    }

    pub fn status(&self) -> AutopilotStatus {
        AutopilotStatus {
            grade: self.grade,
            health: self.health.state(),
            requested_radius: self.requested_radius(),
            ceiling: self.ceiling(),
            effective_radius: self.effective_radius(),
        }
    }

    /// Spawn a thread that ticks this autopilot at a fixed cadence. The
    /// returned guard stops the thread when dropped.
    pub fn spawn_ticker(
        self: &Arc<Self>,
        interval: Duration,
    ) -> std::io::Result<AutopilotTicker> {
        let pilot = Arc::clone(self);
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let handle = std::thread::Builder::new()
            .name("strata-autopilot".into())
            .spawn(move || loop {
                match stop_rx.recv_timeout(interval) {
                    Ok(_) | Err(RecvTimeoutError::Disconnected) => break,
                    Err(RecvTimeoutError::Timeout) => {
                        pilot.tick();
                    }
                }
            })?;
        Ok(AutopilotTicker {
            stop_tx: Mutex::new(Some(stop_tx)),
            handle: Mutex::new(Some(handle)),
        })
    }
}

/// Guard for the autopilot's ticker thread.
pub struct AutopilotTicker {
    stop_tx: Mutex<Option<Sender<()>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl AutopilotTicker {
    pub fn stop(&self) {
        if let Some(tx) = self.stop_tx.lock().take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.lock().take() {
            if handle.join().is_err() {
                log::error!("autopilot ticker thread panicked");
            }
        }
    }
}

impl Drop for AutopilotTicker {
    fn drop(&mut self) {
        self.stop();
    }
}
