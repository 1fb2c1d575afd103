//! Hardware grading.

use serde::{Deserialize, Serialize};

use crate::constants::radius::{GAMING_MAX, HIGH_PERFORMANCE_MAX, LOW_END_MAX};

const GIB: u64 = 1024 * 1024 * 1024;

/// Coarse hardware tier, probed once at startup. Ordered weakest to
/// strongest so callers can compare grades directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ResourceGrade {
    LowEnd,
    Gaming,
    HighPerformance,
}

impl ResourceGrade {
    /// Radius ceiling this tier is allowed to sustain, in chunks.
    pub fn max_radius(&self) -> u32 {
        match self {
            ResourceGrade::LowEnd => LOW_END_MAX,
            ResourceGrade::Gaming => GAMING_MAX,
            ResourceGrade::HighPerformance => HIGH_PERFORMANCE_MAX,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ResourceGrade::LowEnd => "low-end",
            ResourceGrade::Gaming => "gaming",
            ResourceGrade::HighPerformance => "high-performance",
        }
    }

    /// Grade the running host from core count and physical memory.
    pub fn probe() -> Self {
        let grade = Self::classify(num_cpus::get(), total_memory_bytes());
        log::info!(
            "hardware grade: {} ({} cores)",
            grade.name(),
            num_cpus::get()
        );
        grade
    }

    /// Both dimensions must clear a tier's bar. When memory cannot be
    /// probed, cores alone decide.
    pub fn classify(cores: usize, total_memory: Option<u64>) -> Self {
        let memory_at_least = |bytes: u64| total_memory.map_or(true, |m| m >= bytes);
        if cores >= 12 && memory_at_least(16 * GIB) {
            ResourceGrade::HighPerformance
        } else if cores >= 6 && memory_at_least(8 * GIB) {
            ResourceGrade::Gaming
        } else {
            ResourceGrade::LowEnd
        }
    }
}

#[cfg(target_os = "linux")]
fn total_memory_bytes() -> Option<u64> {
    let meminfo = std::fs::read_to_string("/proc/meminfo").ok()?;
    let line = meminfo.lines().find(|l| l.starts_with("MemTotal:"))?;
    let kib: u64 = line.split_whitespace().nth(1)?.parse().ok()?;
    Some(kib * 1024)
}

#[cfg(not(target_os = "linux"))]
fn total_memory_bytes() -> Option<u64> {
    None
}
