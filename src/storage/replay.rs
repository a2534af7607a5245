//! WAL replay
//!
//! Rebuilds the series index from the last checkpoint and the segments
//! after it. Each segment is decoded by a producer thread into a bounded
//! queue and applied in order by the replaying thread; the first decode
//! error travels on a separate one-slot queue.

use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;

use crossbeam::channel;
use tracing::{info, warn};

use crate::error::{Result, WalError};
use crate::model::SeriesRef;
use crate::series::MemSeries;
use crate::wal::{last_checkpoint, list_segments, Record, RepairResult, SegmentReader};

use super::Storage;

/// What replay found in the log
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReplayStats {
    /// Index of the checkpoint replayed first, if any
    pub checkpoint: Option<u64>,
    pub segments_replayed: usize,
    pub series_created: usize,
    /// Series records whose label set was already known under another ref
    pub duplicate_series: usize,
    /// Float and histogram samples applied
    pub samples_replayed: usize,
    /// Samples dropped because their series was unknown
    pub unknown_series_samples: usize,
    pub exemplars_replayed: usize,
    pub metadata_replayed: usize,
    pub tombstones_applied: usize,
    /// Set when replay hit corruption and the log was repaired
    pub repaired: Option<RepairResult>,
}

/// Replay state shared by every segment of one replay
struct Replayer<'a> {
    storage: &'a Storage,
    stats: &'a mut ReplayStats,
    /// Duplicate ref -> ref of the series owning the label set
    duplicates: HashMap<SeriesRef, SeriesRef>,
}

impl Storage {
    /// Replay the checkpoint and segments into memory.
    ///
    /// A checkpoint that cannot be read is a hard error: it is never
    /// repaired.
    pub(super) fn replay_wal(&self, stats: &mut ReplayStats) -> Result<()> {
        info!("replaying WAL, this may take a while");
        let dir = self.wal.dir();
        let mut replayer = Replayer {
            storage: self,
            stats,
            duplicates: HashMap::new(),
        };

        let mut start = 0;
        if let Some((cp_dir, index)) = last_checkpoint(dir)? {
            let reader = SegmentReader::open_dir(&cp_dir)?;
            replayer
                .replay_segment(reader, index)
                .map_err(|e| WalError::Checkpoint(format!("load checkpoint {}: {}", index, e)))?;
            replayer.stats.checkpoint = Some(index);
            info!(checkpoint = index, "WAL checkpoint loaded");
            start = index + 1;
        }

        let segments: Vec<_> = list_segments(dir)?
            .into_iter()
            .filter(|(index, _)| *index >= start)
            .collect();
        let last = segments.last().map(|(index, _)| *index).unwrap_or(0);
        for (index, path) in segments {
            replayer.replay_segment(SegmentReader::open(index, &path), index)?;
            replayer.stats.segments_replayed += 1;
            info!(segment = index, max_segment = last, "WAL segment loaded");
        }
        Ok(())
    }
}

impl Replayer<'_> {
    fn replay_segment(&mut self, mut reader: SegmentReader, segment: u64) -> Result<()> {
        let capacity = self.storage.config.replay_queue_capacity.max(1);
        let (tx, rx) = channel::bounded::<Record>(capacity);
        let (err_tx, err_rx) = channel::bounded::<WalError>(1);
        let unknown_before = self.stats.unknown_series_samples;

        thread::scope(|scope| {
            scope.spawn(move || loop {
                match reader.next_record() {
                    Ok(Some(record)) => {
                        if tx.send(record).is_err() {
                            return;
                        }
                    }
                    Ok(None) => return,
                    Err(e) => {
                        let _ = err_tx.send(e);
                        return;
                    }
                }
            });

            // Records apply in arrival order: samples assume their series came first
            for record in rx.iter() {
                self.apply(record, segment);
            }
        });

        let unknown = self.stats.unknown_series_samples - unknown_before;
        if unknown > 0 {
            warn!(
                segment,
                count = unknown,
                "found samples referencing non-existing series"
            );
        }

        match err_rx.try_recv() {
            Ok(err) => Err(err),
            Err(_) => Ok(()),
        }
    }

    fn apply(&mut self, record: Record, segment: u64) {
        match record {
            Record::Series(series) => {
                for entry in series {
                    self.storage
                        .next_ref
                        .fetch_max(entry.ref_id.0, Ordering::SeqCst);
                    let hash = entry.labels.hash();
                    match self.storage.series.get_by_hash(hash, &entry.labels) {
                        Some(existing) if existing.ref_id() == entry.ref_id => {}
                        Some(existing) => {
                            // Keep the duplicate ref in checkpoints until this segment is gone
                            self.duplicates.insert(entry.ref_id, existing.ref_id());
                            self.storage.deleted.lock().insert(entry.ref_id, segment);
                            self.stats.duplicate_series += 1;
                        }
                        None => {
                            // Without samples the series stays at 0 and goes at the next GC
                            let series = Arc::new(MemSeries::new(entry.ref_id, entry.labels, 0));
                            self.storage.series.set(hash, series);
                            self.storage.metrics.active_series.inc();
                            self.storage.metrics.created_series.inc();
                            self.stats.series_created += 1;
                        }
                    }
                }
            }
            Record::Samples(samples) => {
                for sample in samples {
                    self.advance(sample.ref_id, sample.t, segment);
                }
            }
            Record::HistogramSamples(samples) | Record::CustomBucketsHistogramSamples(samples) => {
                for sample in samples {
                    self.advance(sample.ref_id, sample.t, segment);
                }
            }
            Record::FloatHistogramSamples(samples)
            | Record::CustomBucketsFloatHistogramSamples(samples) => {
                for sample in samples {
                    self.advance(sample.ref_id, sample.t, segment);
                }
            }
            Record::Tombstones(refs) => {
                for ref_id in refs {
                    self.storage
                        .next_ref
                        .fetch_max(ref_id.0, Ordering::SeqCst);
                    // A duplicate ref never owned its label set: only its horizon moves
                    if self.duplicates.contains_key(&ref_id) {
                        self.storage.deleted.lock().insert(ref_id, segment);
                        continue;
                    }
                    if let Some(series) = self.storage.series.get_by_id(ref_id) {
                        self.storage.series.delete(series.labels().hash(), ref_id);
                        self.storage.metrics.active_series.dec();
                        self.stats.tombstones_applied += 1;
                    }
                    self.storage.deleted.lock().insert(ref_id, segment);
                }
            }
            Record::Exemplars(exemplars) => {
                for entry in exemplars {
                    let ref_id = self.resolve(entry.ref_id, segment);
                    if self.storage.series.get_by_id(ref_id).is_none() {
                        continue;
                    }
                    let newer = self
                        .storage
                        .series
                        .latest_exemplar(ref_id)
                        .map_or(true, |prev| prev.ts <= entry.t);
                    if newer {
                        self.storage
                            .series
                            .set_latest_exemplar(ref_id, entry.to_exemplar());
                    }
                    self.stats.exemplars_replayed += 1;
                }
            }
            Record::Metadata(metadata) => {
                for entry in metadata {
                    let ref_id = self.resolve(entry.ref_id, segment);
                    if let Some(series) = self.storage.series.get_by_id(ref_id) {
                        series.set_metadata(entry.metadata);
                        self.stats.metadata_replayed += 1;
                    }
                }
            }
        }
    }

    /// Map a duplicate ref to the series owning its label set, refreshing
    /// how long the duplicate must be kept.
    fn resolve(&mut self, ref_id: SeriesRef, segment: u64) -> SeriesRef {
        match self.duplicates.get(&ref_id) {
            Some(&target) => {
                self.storage.deleted.lock().insert(ref_id, segment);
                target
            }
            None => ref_id,
        }
    }

    fn advance(&mut self, ref_id: SeriesRef, t: i64, segment: u64) {
        let ref_id = self.resolve(ref_id, segment);
        match self.storage.series.get_by_id(ref_id) {
            Some(series) => {
                if t > series.last_ts() {
                    series.update_timestamp(t);
                }
                self.stats.samples_replayed += 1;
            }
            None => self.stats.unknown_series_samples += 1,
        }
    }
}
