//! Hash-keyed series lookup that survives 64-bit hash collisions

use std::collections::HashMap;
use std::sync::Arc;

use crate::model::{Labels, SeriesRef};

use super::MemSeries;

/// Maps label hashes to series.
///
/// Almost every hash has exactly one series, stored in `unique`. Series
/// whose hash collides with a different label set go to `conflicts`.
#[derive(Debug, Default)]
pub struct SeriesHashmap {
    unique: HashMap<u64, Arc<MemSeries>>,
    conflicts: HashMap<u64, Vec<Arc<MemSeries>>>,
}

impl SeriesHashmap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Series with exactly these labels
    pub fn get(&self, hash: u64, labels: &Labels) -> Option<&Arc<MemSeries>> {
        if let Some(series) = self.unique.get(&hash) {
            if series.labels() == labels {
                return Some(series);
            }
        }
        self.conflicts
            .get(&hash)?
            .iter()
            .find(|s| s.labels() == labels)
    }

    /// Insert or replace the series with the same labels
    pub fn set(&mut self, hash: u64, series: Arc<MemSeries>) {
        match self.unique.get(&hash) {
            None => {
                self.unique.insert(hash, series);
            }
            Some(existing) if existing.labels() == series.labels() => {
                self.unique.insert(hash, series);
            }
            Some(_) => {
                let list = self.conflicts.entry(hash).or_default();
                match list.iter_mut().find(|s| s.labels() == series.labels()) {
                    Some(slot) => *slot = series,
                    None => list.push(series),
                }
            }
        }
    }

    /// Remove the series with the given ref under `hash`.
    ///
    /// When the unique slot is freed, the first conflicting series is
    /// promoted into it.
    pub fn delete(&mut self, hash: u64, ref_id: SeriesRef) -> Option<Arc<MemSeries>> {
        if self.unique.get(&hash).map(|s| s.ref_id()) == Some(ref_id) {
            let removed = self.unique.remove(&hash);
            if let Some(list) = self.conflicts.get_mut(&hash) {
                let promoted = list.remove(0);
                if list.is_empty() {
                    self.conflicts.remove(&hash);
                }
                self.unique.insert(hash, promoted);
            }
            return removed;
        }

        let list = self.conflicts.get_mut(&hash)?;
        let pos = list.iter().position(|s| s.ref_id() == ref_id)?;
        let removed = list.remove(pos);
        if list.is_empty() {
            self.conflicts.remove(&hash);
        }
        Some(removed)
    }

    /// Every `(hash, series)` pair
    pub fn iter(&self) -> impl Iterator<Item = (u64, &Arc<MemSeries>)> {
        self.unique
            .iter()
            .map(|(h, s)| (*h, s))
            .chain(
                self.conflicts
                    .iter()
                    .flat_map(|(h, list)| list.iter().map(move |s| (*h, s))),
            )
    }

    pub fn len(&self) -> usize {
        self.unique.len() + self.conflicts.values().map(Vec::len).sum::<usize>()
    }

    pub fn is_empty(&self) -> bool {
        self.unique.is_empty()
    }
}
