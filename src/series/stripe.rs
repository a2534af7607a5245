//! Striped series index
//!
//! ## Lock Discipline
//! - Lookups and inserts take one shard lock at a time
//! - Garbage collection holds `gc_lock`, then the hash shard, then the
//!   ref shard; it is the only path nesting shard locks
//! - Iteration holds `gc_lock` for its whole duration, so it never
//!   interleaves with garbage collection

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::thread;

use crossbeam::channel;
use crossbeam::utils::CachePadded;
use parking_lot::{Mutex, RwLock};

use crate::model::{Exemplar, Labels, SeriesRef};

use super::{MemSeries, SeriesHashmap};

#[derive(Default)]
struct Shard {
    /// Series keyed by ref (ref shard role)
    series: HashMap<SeriesRef, Arc<MemSeries>>,
    /// Series keyed by label hash (hash shard role)
    hashes: SeriesHashmap,
    /// Latest exemplar per series (ref shard role)
    exemplars: HashMap<SeriesRef, Exemplar>,
}

/// Concurrent index of series by ref and by label hash
pub struct StripeSeries {
    size: usize,
    mask: u64,
    shards: Box<[CachePadded<RwLock<Shard>>]>,
    gc_lock: Mutex<()>,
}

impl StripeSeries {
    /// Create an index with `size` shards (a power of two)
    pub fn new(size: usize) -> Self {
        debug_assert!(size.is_power_of_two());
        let shards = (0..size)
            .map(|_| CachePadded::new(RwLock::new(Shard::default())))
            .collect();
        Self {
            size,
            mask: size as u64 - 1,
            shards,
            gc_lock: Mutex::new(()),
        }
    }

    fn hash_shard(&self, hash: u64) -> usize {
        (hash & self.mask) as usize
    }

    fn ref_shard(&self, ref_id: SeriesRef) -> usize {
        (ref_id.0 & self.mask) as usize
    }

    pub fn get_by_id(&self, ref_id: SeriesRef) -> Option<Arc<MemSeries>> {
        self.shards[self.ref_shard(ref_id)]
            .read()
            .series
            .get(&ref_id)
            .cloned()
    }

    pub fn get_by_hash(&self, hash: u64, labels: &Labels) -> Option<Arc<MemSeries>> {
        self.shards[self.hash_shard(hash)]
            .read()
            .hashes
            .get(hash, labels)
            .cloned()
    }

    /// Insert or replace a series under both its ref and its hash
    pub fn set(&self, hash: u64, series: Arc<MemSeries>) {
        self.shards[self.ref_shard(series.ref_id())]
            .write()
            .series
            .insert(series.ref_id(), Arc::clone(&series));
        self.shards[self.hash_shard(hash)]
            .write()
            .hashes
            .set(hash, series);
    }

    /// Return the series with `labels`, inserting `series` if there is none.
    ///
    /// The hash shard decides the winner, so two callers racing on the same
    /// labels always end up with the same series. The flag is `true` when
    /// `series` was inserted.
    pub fn get_or_set(
        &self,
        hash: u64,
        labels: &Labels,
        series: Arc<MemSeries>,
    ) -> (Arc<MemSeries>, bool) {
        {
            let mut shard = self.shards[self.hash_shard(hash)].write();
            if let Some(existing) = shard.hashes.get(hash, labels) {
                return (Arc::clone(existing), false);
            }
            shard.hashes.set(hash, Arc::clone(&series));
        }
        self.shards[self.ref_shard(series.ref_id())]
            .write()
            .series
            .insert(series.ref_id(), Arc::clone(&series));
        (series, true)
    }

    /// Remove a series from both indexes
    pub fn delete(&self, hash: u64, ref_id: SeriesRef) -> Option<Arc<MemSeries>> {
        self.shards[self.hash_shard(hash)]
            .write()
            .hashes
            .delete(hash, ref_id);
        let mut shard = self.shards[self.ref_shard(ref_id)].write();
        shard.exemplars.remove(&ref_id);
        shard.series.remove(&ref_id)
    }

    /// Remove every series whose last timestamp is older than `mint`.
    ///
    /// Returns the refs of the removed series. A series whose insertion is
    /// still in progress (present by hash, not yet by ref) is left alone.
    pub fn gc(&self, mint: i64) -> HashSet<SeriesRef> {
        let _gc = self.gc_lock.lock();
        let mut deleted = HashSet::new();

        for hash_idx in 0..self.size {
            let mut hash_shard = self.shards[hash_idx].write();
            let candidates: Vec<(u64, Arc<MemSeries>)> = hash_shard
                .hashes
                .iter()
                .map(|(hash, series)| (hash, Arc::clone(series)))
                .collect();

            for (hash, series) in candidates {
                // Hold the series lock so a concurrent commit cannot revive it mid-removal
                let state = series.lock();
                if state.last_ts >= mint {
                    continue;
                }
                let ref_id = series.ref_id();
                let ref_idx = self.ref_shard(ref_id);

                let removed = if ref_idx == hash_idx {
                    evict(&mut hash_shard, ref_id)
                } else {
                    evict(&mut self.shards[ref_idx].write(), ref_id)
                };
                if removed {
                    hash_shard.hashes.delete(hash, ref_id);
                    deleted.insert(ref_id);
                }
                drop(state);
            }
        }
        deleted
    }

    pub fn latest_exemplar(&self, ref_id: SeriesRef) -> Option<Exemplar> {
        self.shards[self.ref_shard(ref_id)]
            .read()
            .exemplars
            .get(&ref_id)
            .cloned()
    }

    pub fn set_latest_exemplar(&self, ref_id: SeriesRef, exemplar: Exemplar) {
        let mut shard = self.shards[self.ref_shard(ref_id)].write();
        // Exemplars of series that are gone are not kept
        if shard.series.contains_key(&ref_id) {
            shard.exemplars.insert(ref_id, exemplar);
        }
    }

    /// Number of series in the index
    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.read().series.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stream every series to `f`.
    ///
    /// A producer thread walks the shards, holding one shard read lock at a
    /// time (plus, briefly, the series' hash shard), and hands series over
    /// a channel bounded by `capacity`. `f` runs on the calling thread
    /// with the GC lock held: it must not call back into the index, nor
    /// wait on a lock whose holders may call [`StripeSeries::gc`].
    pub fn for_each<F>(&self, capacity: usize, mut f: F)
    where
        F: FnMut(Arc<MemSeries>),
    {
        let _gc = self.gc_lock.lock();
        let (tx, rx) = channel::bounded(capacity.max(1));

        thread::scope(|scope| {
            scope.spawn(move || {
                for i in 0..self.size {
                    let shard = self.shards[i].read();
                    for series in shard.series.values() {
                        let j = self.hash_shard(series.labels().hash());
                        let _hash_shard = (j != i).then(|| self.shards[j].read());
                        if tx.send(Arc::clone(series)).is_err() {
                            return;
                        }
                    }
                }
            });
            for series in rx.iter() {
                f(series);
            }
        });
    }
}

/// Remove `ref_id` and its exemplar from a ref shard; `false` if absent
fn evict(shard: &mut Shard, ref_id: SeriesRef) -> bool {
    if shard.series.remove(&ref_id).is_none() {
        return false;
    }
    shard.exemplars.remove(&ref_id);
    true
}
