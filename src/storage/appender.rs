//! Append transactions
//!
//! An `Appender` buffers series, samples, histograms, exemplars and metadata
//! and writes them to the log on `commit`. Buffers come from (and go back
//! to) the storage's free-list.

use std::sync::Arc;

use bytes::BytesMut;
use serde::Serialize;
use tracing::warn;

use crate::error::{Result, WalError};
use crate::model::{
    Exemplar, HistogramValue, Labels, Metadata, SeriesRef, EXEMPLAR_MAX_LABEL_SET_LENGTH,
};
use crate::series::MemSeries;
use crate::wal::{
    encode_entries, RecordType, RefExemplar, RefFloatHistogramSample, RefHistogramSample,
    RefMetadata, RefSample, RefSeries, Wal,
};

use super::Storage;

/// Buffered records of one transaction.
///
/// Each `*_series` vector runs parallel to the record vector it is named
/// after; always push to both together.
#[derive(Default)]
pub(crate) struct Pending {
    series: Vec<RefSeries>,
    samples: Vec<RefSample>,
    sample_series: Vec<Arc<MemSeries>>,
    histograms: Vec<RefHistogramSample>,
    histogram_series: Vec<Arc<MemSeries>>,
    float_histograms: Vec<RefFloatHistogramSample>,
    float_histogram_series: Vec<Arc<MemSeries>>,
    exemplars: Vec<RefExemplar>,
    metadata: Vec<RefMetadata>,
    metadata_series: Vec<Arc<MemSeries>>,
    /// Encode buffer reused across records
    buf: BytesMut,
}

impl Pending {
    pub(crate) fn clear(&mut self) {
        self.series.clear();
        self.samples.clear();
        self.sample_series.clear();
        self.histograms.clear();
        self.histogram_series.clear();
        self.float_histograms.clear();
        self.float_histogram_series.clear();
        self.exemplars.clear();
        self.metadata.clear();
        self.metadata_series.clear();
        self.buf.clear();
    }

    fn is_empty(&self) -> bool {
        self.series.is_empty()
            && self.samples.is_empty()
            && self.histograms.is_empty()
            && self.float_histograms.is_empty()
            && self.exemplars.is_empty()
            && self.metadata.is_empty()
    }
}

/// A transaction against the storage.
///
/// Not shared between threads; obtain one per writer with
/// `Storage::appender`.
pub struct Appender<'a> {
    storage: &'a Storage,
    pending: Pending,
}

impl<'a> Appender<'a> {
    pub(super) fn new(storage: &'a Storage, pending: Pending) -> Self {
        Self { storage, pending }
    }

    /// Buffer a float sample.
    ///
    /// If `ref_id` does not name a known series, the series is resolved by
    /// `labels` (and created if needed). Returns the resolved ref.
    pub fn append(&mut self, ref_id: SeriesRef, labels: &Labels, t: i64, v: f64) -> Result<SeriesRef> {
        self.storage.ensure_open()?;
        let series = self.resolve_or_create(ref_id, labels)?;
        let ref_id = series.ref_id();

        self.pending.samples.push(RefSample { ref_id, t, v });
        self.pending.sample_series.push(series);
        self.storage.metrics.samples_appended.inc();
        Ok(ref_id)
    }

    /// Buffer a sample for a series already held by the caller.
    ///
    /// Touches neither the series index nor the close lock, so it is safe
    /// inside `StripeSeries::for_each`. The caller checks for close.
    pub(super) fn append_known(&mut self, series: &Arc<MemSeries>, t: i64, v: f64) {
        self.pending.samples.push(RefSample {
            ref_id: series.ref_id(),
            t,
            v,
        });
        self.pending.sample_series.push(Arc::clone(series));
        self.storage.metrics.samples_appended.inc();
    }

    /// Buffer a native histogram sample after validating it
    pub fn append_histogram(
        &mut self,
        ref_id: SeriesRef,
        labels: &Labels,
        t: i64,
        histogram: HistogramValue,
    ) -> Result<SeriesRef> {
        self.storage.ensure_open()?;
        histogram.validate()?;
        let series = self.resolve_or_create(ref_id, labels)?;
        let ref_id = series.ref_id();

        match histogram {
            HistogramValue::Int(h) => {
                self.pending
                    .histograms
                    .push(RefHistogramSample { ref_id, t, h });
                self.pending.histogram_series.push(series);
            }
            HistogramValue::Float(fh) => {
                self.pending
                    .float_histograms
                    .push(RefFloatHistogramSample { ref_id, t, fh });
                self.pending.float_histogram_series.push(series);
            }
        }
        self.storage.metrics.samples_appended.inc();
        Ok(ref_id)
    }

    /// Buffer an exemplar for an existing series.
    ///
    /// An exemplar equal to the latest one of the series, or older than it,
    /// is accepted without being buffered and `SeriesRef(0)` is returned.
    pub fn append_exemplar(&mut self, ref_id: SeriesRef, mut exemplar: Exemplar) -> Result<SeriesRef> {
        self.storage.ensure_open()?;
        let series = self.storage.series.get_by_id(ref_id).ok_or_else(|| {
            WalError::UnknownSeries(format!(
                "unknown series ref when trying to add exemplar: {}",
                ref_id
            ))
        })?;

        exemplar.labels = exemplar.labels.without_empty();
        if let Some(name) = exemplar.labels.duplicate_name() {
            return Err(WalError::InvalidExemplar(format!(
                "label name {:?} is not unique",
                name
            )));
        }
        // Quotes, equal signs and commas used for rendering are not counted
        let length = exemplar.labels.char_len();
        if length > EXEMPLAR_MAX_LABEL_SET_LENGTH {
            return Err(WalError::ExemplarLabelLength {
                length,
                max: EXEMPLAR_MAX_LABEL_SET_LENGTH,
            });
        }

        let ref_id = series.ref_id();
        if let Some(prev) = self.storage.series.latest_exemplar(ref_id) {
            if prev.equals(&exemplar) || prev.ts > exemplar.ts {
                return Ok(SeriesRef::UNRESOLVED);
            }
        }

        self.pending.exemplars.push(RefExemplar {
            ref_id,
            t: exemplar.ts,
            v: exemplar.value,
            labels: exemplar.labels.clone(),
        });
        self.storage.series.set_latest_exemplar(ref_id, exemplar);
        self.storage.metrics.exemplars_appended.inc();
        Ok(ref_id)
    }

    /// Buffer a metadata change.
    ///
    /// The series is resolved by ref, falling back to `labels`. Nothing is
    /// buffered if the metadata equals what the series already has.
    pub fn update_metadata(
        &mut self,
        ref_id: SeriesRef,
        labels: &Labels,
        metadata: Metadata,
    ) -> Result<SeriesRef> {
        self.storage.ensure_open()?;
        let series = self
            .storage
            .series
            .get_by_id(ref_id)
            .or_else(|| self.storage.series.get_by_hash(labels.hash(), labels))
            .ok_or_else(|| {
                WalError::UnknownSeries(format!(
                    "unknown series when trying to add metadata with ref {} and labels {}",
                    ref_id, labels
                ))
            })?;

        let ref_id = series.ref_id();
        if series.metadata_differs(&metadata) {
            self.pending.metadata.push(RefMetadata { ref_id, metadata });
            self.pending.metadata_series.push(series);
            self.storage.metrics.metadata_updates.inc();
        }
        Ok(ref_id)
    }

    /// Write every buffered record to the log.
    ///
    /// On an I/O error the buffers are kept, so the same commit can be
    /// retried.
    pub fn commit(&mut self) -> Result<()> {
        let storage = self.storage;
        let closed = storage.close_lock.read();
        if *closed {
            return Err(WalError::Closed);
        }
        self.log()?;

        // Timestamps and metadata move before close can run
        let pending = &mut self.pending;
        for (sample, series) in pending.samples.iter().zip(&pending.sample_series) {
            if !series.update_timestamp(sample.t) {
                storage.metrics.out_of_order_samples.inc();
            }
        }
        for (sample, series) in pending.histograms.iter().zip(&pending.histogram_series) {
            if !series.update_timestamp(sample.t) {
                storage.metrics.out_of_order_samples.inc();
            }
        }
        for (sample, series) in pending
            .float_histograms
            .iter()
            .zip(&pending.float_histogram_series)
        {
            if !series.update_timestamp(sample.t) {
                storage.metrics.out_of_order_samples.inc();
            }
        }
        for (m, series) in pending.metadata.iter().zip(&pending.metadata_series) {
            series.set_metadata(m.metadata.clone());
        }

        pending.clear();
        drop(closed);
        storage.notify();
        Ok(())
    }

    /// Discard buffered data.
    ///
    /// Series created by this appender already live in memory and a later
    /// commit may reference them, so their records are still written.
    pub fn rollback(&mut self) -> Result<()> {
        let storage = self.storage;
        {
            let closed = storage.close_lock.read();
            if *closed {
                return Err(WalError::Closed);
            }
            self.log_series()?;
        }
        self.pending.clear();
        Ok(())
    }

    // =========================================================================
    // Internal
    // =========================================================================

    /// Resolve `ref_id`, or find/create the series for `labels`
    fn resolve_or_create(&mut self, ref_id: SeriesRef, labels: &Labels) -> Result<Arc<MemSeries>> {
        if let Some(series) = self.storage.series.get_by_id(ref_id) {
            return Ok(series);
        }

        let labels = labels.without_empty();
        if labels.is_empty() {
            return Err(WalError::InvalidSample("empty labelset".to_string()));
        }
        if let Some(name) = labels.duplicate_name() {
            return Err(WalError::InvalidSample(format!(
                "label name {:?} is not unique",
                name
            )));
        }

        let hash = labels.hash();
        if let Some(series) = self.storage.series.get_by_hash(hash, &labels) {
            return Ok(series);
        }

        let candidate = Arc::new(MemSeries::new(
            self.storage.allocate_ref(),
            labels.clone(),
            i64::MIN,
        ));
        let (series, created) = self.storage.series.get_or_set(hash, &labels, candidate);
        if created {
            self.pending.series.push(RefSeries {
                ref_id: series.ref_id(),
                labels,
            });
            self.storage.metrics.active_series.inc();
            self.storage.metrics.created_series.inc();
        }
        Ok(series)
    }

    /// Log buffered records in replay order: series, metadata, samples,
    /// histograms (custom-bucket variants after the standard ones), then
    /// exemplars, which must follow the samples they annotate.
    fn log(&mut self) -> Result<()> {
        let wal = &self.storage.wal;
        let pending = &mut self.pending;
        let buf = &mut pending.buf;

        log_entries(wal, buf, RecordType::Series, &pending.series)?;
        log_entries(wal, buf, RecordType::Metadata, &pending.metadata)?;
        log_entries(wal, buf, RecordType::Samples, &pending.samples)?;

        let (custom, standard): (Vec<_>, Vec<_>) = pending
            .histograms
            .iter()
            .partition(|s| s.h.uses_custom_buckets());
        log_entries(wal, buf, RecordType::HistogramSamples, &standard)?;
        log_entries(wal, buf, RecordType::CustomBucketsHistogramSamples, &custom)?;

        let (custom, standard): (Vec<_>, Vec<_>) = pending
            .float_histograms
            .iter()
            .partition(|s| s.fh.uses_custom_buckets());
        log_entries(wal, buf, RecordType::FloatHistogramSamples, &standard)?;
        log_entries(wal, buf, RecordType::CustomBucketsFloatHistogramSamples, &custom)?;

        log_entries(wal, buf, RecordType::Exemplars, &pending.exemplars)
    }

    fn log_series(&mut self) -> Result<()> {
        let pending = &mut self.pending;
        log_entries(
            &self.storage.wal,
            &mut pending.buf,
            RecordType::Series,
            &pending.series,
        )?;
        pending.series.clear();
        Ok(())
    }

    /// Whether anything is buffered
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

impl Drop for Appender<'_> {
    fn drop(&mut self) {
        // Series created here are already in memory; make them durable
        if !self.pending.series.is_empty() {
            let result = if self.storage.is_closed() {
                Err(WalError::Closed)
            } else {
                self.log_series()
            };
            if let Err(e) = result {
                warn!(
                    error = %e,
                    series = self.pending.series.len(),
                    "failed to log series of dropped appender"
                );
            }
        }
        let pending = std::mem::take(&mut self.pending);
        self.storage.release(pending);
    }
}

fn log_entries<T: Serialize>(
    wal: &Wal,
    buf: &mut BytesMut,
    record_type: RecordType,
    entries: &[T],
) -> Result<()> {
    if entries.is_empty() {
        return Ok(());
    }
    buf.clear();
    encode_entries(record_type, entries, buf)?;
    wal.log(buf)
}
