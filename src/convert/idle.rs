//! Idle detection for the background converter.
//!
//! Conversion only runs when all three gates hold: system CPU below the
//! policy ceiling, no engine activity for the quiet period, and the health
//! feed (when fresh) reporting a comfortable tick rate. Any gate that cannot
//! be evaluated reads as "not idle", except a silent health feed, which
//! means nothing latency-sensitive is running.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::autopilot::HealthFeed;

/// Thresholds for considering the host idle.
#[derive(Debug, Clone, Copy)]
pub struct IdlePolicy {
    /// Whole-system CPU utilization ceiling, percent.
    pub max_cpu_percent: f64,
    /// Time since the last engine operation before conversion may run.
    pub min_quiet: Duration,
    /// Minimum tick rate; a host below this is busy keeping up already.
    pub min_tps: f64,
}

impl Default for IdlePolicy {
    fn default() -> Self {
        Self {
            max_cpu_percent: 35.0,
            min_quiet: Duration::from_secs(30),
            min_tps: 19.0,
        }
    }
}

/// Source of whole-system CPU utilization. Injectable so tests can script
/// load patterns instead of generating them.
pub trait CpuUsageSource: Send {
    /// Utilization since the previous call, 0 to 100. `None` until two
    /// samples exist or when the source cannot tell.
    fn sample_percent(&mut self) -> Option<f64>;
}

/// CPU usage from `/proc/stat` deltas. On platforms without procfs the
/// sampler reports zero load, leaving the other two gates in charge.
pub struct CpuSampler {
    #[cfg(target_os = "linux")]
    last: Option<(u64, u64)>,
}

impl CpuSampler {
    pub fn new() -> Self {
        Self {
            #[cfg(target_os = "linux")]
            last: None,
        }
    }
}

impl Default for CpuSampler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(target_os = "linux")]
impl CpuUsageSource for CpuSampler {
    fn sample_percent(&mut self) -> Option<f64> {
        let stat = std::fs::read_to_string("/proc/stat").ok()?;
        let line = stat.lines().next()?;
        if !line.starts_with("cpu ") {
            return None;
        }
        let fields: Vec<u64> = line
            .split_whitespace()
            .skip(1)
            .filter_map(|f| f.parse().ok())
            .collect();
        if fields.len() < 5 {
            return None;
        }
        // idle + iowait counts as idle time.
        let idle = fields[3] + fields[4];
        let total: u64 = fields.iter().sum();
        let previous = self.last.replace((idle, total));
        let (last_idle, last_total) = previous?;
        let d_total = total.saturating_sub(last_total);
        let d_idle = idle.saturating_sub(last_idle);
        if d_total == 0 {
            return None;
        }
        Some(100.0 * (1.0 - d_idle as f64 / d_total as f64))
    }
}

#[cfg(not(target_os = "linux"))]
impl CpuUsageSource for CpuSampler {
    fn sample_percent(&mut self) -> Option<f64> {
        Some(0.0)
    }
}

/// Decides whether background conversion may run right now.
pub struct IdleDetector {
    policy: IdlePolicy,
    cpu: Mutex<Box<dyn CpuUsageSource>>,
    last_activity: Mutex<Instant>,
    health: Arc<HealthFeed>,
}

impl IdleDetector {
    pub fn new(
        policy: IdlePolicy,
        cpu: Box<dyn CpuUsageSource>,
        health: Arc<HealthFeed>,
    ) -> Self {
        Self {
            policy,
            cpu: Mutex::new(cpu),
            last_activity: Mutex::new(Instant::now()),
            health,
        }
    }

    pub fn with_system_cpu(policy: IdlePolicy, health: Arc<HealthFeed>) -> Self {
        Self::new(policy, Box::new(CpuSampler::new()), health)
    }

    /// Record foreground engine activity, restarting the quiet period.
    pub fn note_activity(&self) {
        *self.last_activity.lock() = Instant::now();
    }

    /// All three gates must pass.
    pub fn is_idle(&self) -> bool {
        if self.last_activity.lock().elapsed() < self.policy.min_quiet {
            return false;
        }
        if let Some(snapshot) = self.health.fresh() {
            if snapshot.tps < self.policy.min_tps {
                return false;
            }
        }
        match self.cpu.lock().sample_percent() {
            Some(percent) => percent <= self.policy.max_cpu_percent,
            None => false,
        }
    }
}
