//! Byte-budgeted chunk cache.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use crate::world::{ChunkEntry, ChunkPos};

/// Cache interface the prefetch engine works against. Entries are shared
/// `Arc`s, so evicting one never invalidates a reader already holding it.
pub trait ChunkCache: Send + Sync {
    fn get(&self, pos: &ChunkPos) -> Option<Arc<ChunkEntry>>;
    fn put(&self, entry: Arc<ChunkEntry>);
    fn remove(&self, pos: &ChunkPos);
    fn contains(&self, pos: &ChunkPos) -> bool;
    /// Cached chunk count.
    fn len(&self) -> usize;
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
    /// Payload bytes currently held.
    fn bytes(&self) -> usize;
    fn clear(&self);
}

struct CacheSlot {
    entry: Arc<ChunkEntry>,
    stamp: u64,
}

struct CacheInner {
    map: FxHashMap<ChunkPos, CacheSlot>,
    /// Access order, oldest stamp first. Stamps are unique, so this doubles
    /// as the eviction queue.
    by_stamp: BTreeMap<u64, ChunkPos>,
    bytes: usize,
    next_stamp: u64,
}

impl CacheInner {
    fn touch(&mut self, pos: ChunkPos) {
        let stamp = self.next_stamp;
        self.next_stamp += 1;
        if let Some(slot) = self.map.get_mut(&pos) {
            self.by_stamp.remove(&slot.stamp);
            slot.stamp = stamp;
            self.by_stamp.insert(stamp, pos);
        }
    }

    fn drop_slot(&mut self, pos: &ChunkPos) {
        if let Some(slot) = self.map.remove(pos) {
            self.by_stamp.remove(&slot.stamp);
            self.bytes -= slot.entry.byte_len();
        }
    }
}

/// Least-recently-used cache bounded by payload bytes rather than entry
/// count, since chunk sizes vary by orders of magnitude.
pub struct ByteBoundedCache {
    budget: usize,
    inner: Mutex<CacheInner>,
}

impl ByteBoundedCache {
    pub fn new(budget: usize) -> Self {
        Self {
            budget,
            inner: Mutex::new(CacheInner {
                map: FxHashMap::default(),
                by_stamp: BTreeMap::new(),
                bytes: 0,
                next_stamp: 0,
            }),
        }
    }

    pub fn budget(&self) -> usize {
        self.budget
    }
}

impl ChunkCache for ByteBoundedCache {
    fn get(&self, pos: &ChunkPos) -> Option<Arc<ChunkEntry>> {
        let mut inner = self.inner.lock();
        let entry = inner.map.get(pos).map(|slot| slot.entry.clone())?;
        inner.touch(*pos);
        Some(entry)
    }

    fn put(&self, entry: Arc<ChunkEntry>) {
        let size = entry.byte_len();
        if size > self.budget {
            // Caching it would evict everything else for one entry.
            log::debug!(
                "chunk {} ({size} bytes) exceeds the cache budget, not caching",
                entry.pos
            );
            return;
        }
        let mut inner = self.inner.lock();
        let pos = entry.pos;
        inner.drop_slot(&pos);
        let stamp = inner.next_stamp;
        inner.next_stamp += 1;
        inner.map.insert(pos, CacheSlot { entry, stamp });
        inner.by_stamp.insert(stamp, pos);
        inner.bytes += size;

        while inner.bytes > self.budget {
            let Some((_, victim)) = inner.by_stamp.pop_first() else {
                break;
            };
            if let Some(slot) = inner.map.remove(&victim) {
                inner.bytes -= slot.entry.byte_len();
            }
        }
    }

    fn remove(&self, pos: &ChunkPos) {
        self.inner.lock().drop_slot(pos);
    }

    fn contains(&self, pos: &ChunkPos) -> bool {
        self.inner.lock().map.contains_key(pos)
    }

    fn len(&self) -> usize {
        self.inner.lock().map.len()
    }

    fn bytes(&self) -> usize {
        self.inner.lock().bytes
    }

    fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.map.clear();
        inner.by_stamp.clear();
        inner.bytes = 0;
    }
}
