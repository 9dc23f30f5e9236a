//! Per-reader cache of decoded chunk samples
//!
//! Keys are series references. The map is split into shards, each behind
//! its own lock, and every entry is a slot with a lock of its own. A lookup
//! holds the shard lock only long enough to find or create the slot; the
//! decode runs under the slot lock, so concurrent queries for the same
//! series wait for a single decode while other series proceed.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::trace;

use crate::index::chunks::ChunkSamples;
use crate::index::error::IndexResult;
use crate::index::types::SeriesRef;

/// Default number of shards
pub const DEFAULT_CACHE_SHARDS: usize = 16;

type Slot = Arc<Mutex<Option<Arc<ChunkSamples>>>>;

/// Sharded get-or-compute-once map of `ChunkSamples`
#[derive(Debug)]
pub struct SampleCache {
    shards: Vec<Mutex<HashMap<SeriesRef, Slot>>>,
}

impl Default for SampleCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_SHARDS)
    }
}

impl SampleCache {
    pub fn new(shards: usize) -> Self {
        let shards = shards.max(1);
        Self {
            shards: (0..shards).map(|_| Mutex::new(HashMap::new())).collect(),
        }
    }

    fn shard(&self, key: SeriesRef) -> &Mutex<HashMap<SeriesRef, Slot>> {
        &self.shards[(key % self.shards.len() as u64) as usize]
    }

    fn slot(&self, key: SeriesRef) -> Slot {
        let mut shard = self.shard(key).lock();
        Arc::clone(shard.entry(key).or_default())
    }

    /// Cached samples for `key`, decoding them with `init` on first use.
    ///
    /// A failed `init` removes the slot again so a later call retries and
    /// failing keys do not accumulate.
    pub fn get_or_try_insert_with<F>(&self, key: SeriesRef, init: F) -> IndexResult<Arc<ChunkSamples>>
    where
        F: FnOnce() -> IndexResult<ChunkSamples>,
    {
        let slot = self.slot(key);
        let mut entry = slot.lock();
        if let Some(samples) = entry.as_ref() {
            return Ok(Arc::clone(samples));
        }
        match init() {
            Ok(samples) => {
                let samples = Arc::new(samples);
                trace!(series = key, samples = samples.len(), "Cached chunk samples");
                *entry = Some(Arc::clone(&samples));
                Ok(samples)
            }
            Err(e) => {
                drop(entry);
                self.evict_empty(key, &slot);
                Err(e)
            }
        }
    }

    /// Remove `slot` if it is still the entry for `key` and holds nothing.
    /// Locks shard then slot, the same order as `get`; a slot locked by a
    /// concurrent retry is left alone.
    fn evict_empty(&self, key: SeriesRef, slot: &Slot) {
        let mut shard = self.shard(key).lock();
        let unused = match shard.get(&key) {
            Some(current) if Arc::ptr_eq(current, slot) => {
                current.try_lock().is_some_and(|entry| entry.is_none())
            }
            _ => false,
        };
        if unused {
            shard.remove(&key);
        }
    }

    /// Number of slots, filled or not
    #[cfg(test)]
    fn slot_count(&self) -> usize {
        self.shards.iter().map(|shard| shard.lock().len()).sum()
    }

    /// Cached samples for `key`, if already decoded
    pub fn get(&self, key: SeriesRef) -> Option<Arc<ChunkSamples>> {
        let slot = self.shard(key).lock().get(&key).cloned()?;
        let entry = slot.lock();
        entry.clone()
    }

    pub fn contains(&self, key: SeriesRef) -> bool {
        self.get(key).is_some()
    }

    /// Number of series with decoded samples
    pub fn len(&self) -> usize {
        self.shards
            .iter()
            .map(|shard| {
                shard
                    .lock()
                    .values()
                    .filter(|slot| slot.lock().is_some())
                    .count()
            })
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        for shard in &self.shards {
            shard.lock().clear();
        }
    }
}
