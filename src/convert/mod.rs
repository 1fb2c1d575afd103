//! Legacy-to-current format conversion.
//!
//! The [`ConversionManager`] arbitrates reads between the two formats and
//! performs the actual migrations; the [`BackgroundConverter`] drains a
//! shared [`ConversionQueue`] on a worker thread whenever the
//! [`IdleDetector`] says the host can spare the cycles.

mod background;
mod idle;
mod manager;

pub use background::{BackgroundConverter, ConversionWorker, ConverterConfig};
pub use idle::{CpuSampler, CpuUsageSource, IdleDetector, IdlePolicy};
pub use manager::{ConversionManager, ConversionReport, ConversionStatus, RegionMigration};

use std::collections::VecDeque;

use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};

use crate::world::RegionPos;

/// How legacy regions get converted to the current format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConversionMode {
    /// Convert each chunk synchronously the first time it is read.
    OnDemand,
    /// Serve legacy chunks as-is and convert whole regions when idle.
    Background,
    /// Convert the entire world at open; refuse to run with legacy leftovers.
    Full,
    /// Never convert implicitly. Legacy data is reachable only through the
    /// explicit per-format read API.
    Manual,
}

impl ConversionMode {
    pub fn name(&self) -> &'static str {
        match self {
            ConversionMode::OnDemand => "on-demand",
            ConversionMode::Background => "background",
            ConversionMode::Full => "full",
            ConversionMode::Manual => "manual",
        }
    }
}

impl Default for ConversionMode {
    fn default() -> Self {
        ConversionMode::Background
    }
}

struct QueueState {
    pending: VecDeque<RegionPos>,
    queued: FxHashSet<RegionPos>,
    retries: FxHashMap<RegionPos, u32>,
    failed: FxHashSet<RegionPos>,
}

/// Work queue of regions awaiting conversion. Shared between the manager,
/// which discovers legacy regions on the read path, and the background
/// worker, which drains them.
///
/// A region that exhausts its retries lands in the failed set and is never
/// re-queued; its chunks stay readable through the legacy adapter.
pub struct ConversionQueue {
    state: Mutex<QueueState>,
}

impl ConversionQueue {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                pending: VecDeque::new(),
                queued: FxHashSet::default(),
                retries: FxHashMap::default(),
                failed: FxHashSet::default(),
            }),
        }
    }

    /// Queue a region unless it is already pending or has permanently failed.
    /// Returns whether the region was added.
    pub fn enqueue(&self, region: RegionPos) -> bool {
        let mut state = self.state.lock();
        if state.failed.contains(&region) || !state.queued.insert(region) {
            return false;
        }
        state.pending.push_back(region);
        true
    }

    pub fn next(&self) -> Option<RegionPos> {
        let mut state = self.state.lock();
        let region = state.pending.pop_front()?;
        state.queued.remove(&region);
        Some(region)
    }

    pub fn note_success(&self, region: RegionPos) {
        self.state.lock().retries.remove(&region);
    }

    /// Record a failed attempt. The region is re-queued until `max_retries`
    /// attempts have burned, then parked in the failed set. Returns whether
    /// it was re-queued.
    pub fn note_failure(&self, region: RegionPos, max_retries: u32) -> bool {
        let mut state = self.state.lock();
        let attempts = state.retries.entry(region).or_insert(0);
        *attempts += 1;
        if *attempts >= max_retries {
            state.retries.remove(&region);
            state.failed.insert(region);
            return false;
        }
        if state.queued.insert(region) {
            state.pending.push_back(region);
        }
        true
    }

    pub fn len(&self) -> usize {
        self.state.lock().pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().pending.is_empty()
    }

    pub fn failed_count(&self) -> usize {
        self.state.lock().failed.len()
    }

    pub fn failed_regions(&self) -> Vec<RegionPos> {
        let mut failed: Vec<RegionPos> = self.state.lock().failed.iter().copied().collect();
        failed.sort();
        failed
    }
}

impl Default for ConversionQueue {
    fn default() -> Self {
        Self::new()
    }
}
