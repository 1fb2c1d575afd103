//! Asynchronous prefetch over the conversion manager.
//!
//! Predicted chunks are queued to a small worker pool that pulls them
//! through the same arbitrated read path foreground reads use, then parks
//! them in the shared cache. Prefetch is advisory: a chunk that fails to
//! load is logged and dropped, never surfaced to the caller.
//!
//! Cancellation is generation-based. Every subject carries a generation
//! counter; queued jobs remember the generation they were issued under, and
//! a teleport bumps the counter so workers discard whatever is still queued
//! for the old position.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{unbounded, Receiver, Sender};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;

use crate::convert::ConversionManager;
use crate::error::StorageResult;
use crate::prefetch::cache::ChunkCache;
use crate::prefetch::predictor::SubjectId;
use crate::world::{ChunkEntry, ChunkPos};

#[derive(Debug, Clone, Copy)]
pub struct PrefetchConfig {
    /// Worker threads pulling predicted chunks.
    pub workers: usize,
    /// Cache budget in payload bytes.
    pub cache_bytes: usize,
}

impl Default for PrefetchConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            cache_bytes: 64 * 1024 * 1024,
        }
    }
}

/// Counters for the prefetch pipeline, for status surfaces.
#[derive(Debug, Clone, Serialize)]
pub struct PrefetchStatus {
    pub cache_chunks: usize,
    pub cache_bytes: usize,
    pub hits: u64,
    pub misses: u64,
    pub issued: u64,
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    issued: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    cancelled: AtomicU64,
}

struct Job {
    pos: ChunkPos,
    subject: SubjectId,
    generation: u64,
}

struct Shared {
    manager: Arc<ConversionManager>,
    cache: Arc<dyn ChunkCache>,
    inflight: DashMap<ChunkPos, ()>,
    generations: DashMap<SubjectId, u64>,
    counters: Counters,
}

impl Shared {
    fn generation_of(&self, subject: SubjectId) -> u64 {
        self.generations.get(&subject).map(|g| *g).unwrap_or(0)
    }

    /// Handle one queued job. Split out of the worker loop so tests can
    /// drive it synchronously.
    fn process(&self, job: Job) {
        if job.generation < self.generation_of(job.subject) {
            self.inflight.remove(&job.pos);
            self.counters.cancelled.fetch_add(1, Ordering::Relaxed);
            return;
        }
        if !self.cache.contains(&job.pos) {
            match self.manager.read(job.pos) {
                Ok(entry) => {
                    self.cache.put(Arc::new(entry));
                    self.counters.completed.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    log::debug!("prefetch of chunk {} failed: {e}", job.pos);
                    self.counters.failed.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
        self.inflight.remove(&job.pos);
    }
}

/// Owns the prefetch cache and worker pool.
pub struct PrefetchEngine {
    shared: Arc<Shared>,
    job_tx: Mutex<Option<Sender<Job>>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl PrefetchEngine {
    pub fn new(
        manager: Arc<ConversionManager>,
        cache: Arc<dyn ChunkCache>,
        config: PrefetchConfig,
    ) -> std::io::Result<Self> {
        let shared = Arc::new(Shared {
            manager,
            cache,
            inflight: DashMap::new(),
            generations: DashMap::new(),
            counters: Counters::default(),
        });
        let (job_tx, job_rx) = unbounded::<Job>();
        let mut handles = Vec::with_capacity(config.workers);
        for n in 0..config.workers {
            let shared = shared.clone();
            let rx: Receiver<Job> = job_rx.clone();
            let handle = std::thread::Builder::new()
                .name(format!("strata-prefetch-{n}"))
                .spawn(move || {
                    // The loop ends when the engine drops its sender.
                    for job in rx.iter() {
                        shared.process(job);
                    }
                })?;
            handles.push(handle);
        }
        Ok(Self {
            shared,
            job_tx: Mutex::new(Some(job_tx)),
            handles: Mutex::new(handles),
        })
    }

    /// Cache-first read. Misses go through the arbitrated read path and
    /// populate the cache on the way back.
    pub fn read_through(&self, pos: ChunkPos) -> StorageResult<Arc<ChunkEntry>> {
        if let Some(entry) = self.shared.cache.get(&pos) {
            self.shared.counters.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(entry);
        }
        self.shared.counters.misses.fetch_add(1, Ordering::Relaxed);
        let entry = Arc::new(self.shared.manager.read(pos)?);
        self.shared.cache.put(entry.clone());
        Ok(entry)
    }

    /// Queue predicted chunks for a subject. Chunks already cached or
    /// already queued are skipped.
    pub fn request(&self, subject: SubjectId, chunks: &[ChunkPos]) {
        let generation = self.shared.generation_of(subject);
        let guard = self.job_tx.lock();
        let Some(tx) = guard.as_ref() else {
            return;
        };
        for &pos in chunks {
            if self.shared.cache.contains(&pos) {
                continue;
            }
            if self.shared.inflight.insert(pos, ()).is_some() {
                continue;
            }
            self.shared.counters.issued.fetch_add(1, Ordering::Relaxed);
            let _ = tx.send(Job {
                pos,
                subject,
                generation,
            });
        }
    }

    /// Void whatever is still queued for a subject, e.g. after a teleport.
    pub fn cancel_subject(&self, subject: SubjectId) {
        *self.shared.generations.entry(subject).or_insert(0) += 1;
    }

    /// Drop a cached chunk, e.g. because it was just rewritten.
    pub fn invalidate(&self, pos: ChunkPos) {
        self.shared.cache.remove(&pos);
    }

    pub fn status(&self) -> PrefetchStatus {
        let c = &self.shared.counters;
        PrefetchStatus {
            cache_chunks: self.shared.cache.len(),
            cache_bytes: self.shared.cache.bytes(),
            hits: c.hits.load(Ordering::Relaxed),
            misses: c.misses.load(Ordering::Relaxed),
            issued: c.issued.load(Ordering::Relaxed),
            completed: c.completed.load(Ordering::Relaxed),
            failed: c.failed.load(Ordering::Relaxed),
            cancelled: c.cancelled.load(Ordering::Relaxed),
        }
    }

    /// Stop the workers, letting queued jobs drain first.
    pub fn stop(&self) {
        self.job_tx.lock().take();
        let handles: Vec<_> = self.handles.lock().drain(..).collect();
        for handle in handles {
            if handle.join().is_err() {
                log::error!("prefetch worker thread panicked");
            }
        }
    }
}

impl Drop for PrefetchEngine {
    fn drop(&mut self) {
        self.stop();
    }
}
