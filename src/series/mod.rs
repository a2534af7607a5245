//! Series Index Module
//!
//! In-memory index of every active series.
//!
//! ## Responsibilities
//! - Resolve series by ref and by label hash (collision-aware)
//! - Track the last timestamp and metadata of every series
//! - Keep the latest exemplar per series for de-duplication
//! - Garbage collect series that stopped receiving data
//!
//! ## Data Structure Choice
//! Using N power-of-two shards, each a HashMap set behind its own RwLock:
//! - A series lives in the shard of its ref *and* the shard of its hash
//! - Shards are cache-padded to avoid false sharing between writers
//! - Only garbage collection ever holds two shard locks at once

mod hashmap;
mod stripe;

use parking_lot::{Mutex, MutexGuard};

use crate::model::{Labels, Metadata, SeriesRef};

pub use hashmap::SeriesHashmap;
pub use stripe::StripeSeries;

/// A series tracked by the index
#[derive(Debug)]
pub struct MemSeries {
    ref_id: SeriesRef,
    labels: Labels,
    state: Mutex<SeriesState>,
}

#[derive(Debug)]
pub(crate) struct SeriesState {
    /// Highest timestamp logged for the series
    pub(crate) last_ts: i64,
    pub(crate) metadata: Option<Metadata>,
}

impl MemSeries {
    pub fn new(ref_id: SeriesRef, labels: Labels, last_ts: i64) -> Self {
        Self {
            ref_id,
            labels,
            state: Mutex::new(SeriesState {
                last_ts,
                metadata: None,
            }),
        }
    }

    pub fn ref_id(&self) -> SeriesRef {
        self.ref_id
    }

    pub fn labels(&self) -> &Labels {
        &self.labels
    }

    pub fn last_ts(&self) -> i64 {
        self.state.lock().last_ts
    }

    /// Move the last timestamp forward to `ts`.
    ///
    /// Returns `false` (and changes nothing) if `ts` is older.
    pub fn update_timestamp(&self, ts: i64) -> bool {
        let mut state = self.state.lock();
        if ts < state.last_ts {
            return false;
        }
        state.last_ts = ts;
        true
    }

    pub fn metadata(&self) -> Option<Metadata> {
        self.state.lock().metadata.clone()
    }

    pub fn set_metadata(&self, metadata: Metadata) {
        self.state.lock().metadata = Some(metadata);
    }

    /// Whether `metadata` differs from what the series holds
    pub fn metadata_differs(&self, metadata: &Metadata) -> bool {
        self.state.lock().metadata.as_ref() != Some(metadata)
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, SeriesState> {
        self.state.lock()
    }
}
