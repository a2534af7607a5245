//! Checkpoints
//!
//! A checkpoint compacts a range of segments (plus the previous checkpoint)
//! into a directory `checkpoint.NNNNNNNN`, keeping only series that are still
//! wanted and data at or after a minimum timestamp. It is built under a
//! `.tmp` name and renamed into place once complete.

use std::collections::HashMap;
use std::fs::{self, File};
use std::path::{Path, PathBuf};

use bytes::BytesMut;
use tracing::{debug, info, warn};

use crate::error::{Result, WalError};
use crate::model::SeriesRef;

use super::reader::SegmentReader;
use super::record::{Record, RefMetadata};
use super::segment::SegmentFile;
use super::Wal;

const CHECKPOINT_PREFIX: &str = "checkpoint.";

/// Counters describing what a checkpoint kept and dropped
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CheckpointStats {
    pub dropped_series: usize,
    pub dropped_samples: usize,
    pub dropped_tombstones: usize,
    pub dropped_exemplars: usize,
    pub dropped_metadata: usize,
    pub dropped_histograms: usize,
    pub total_series: usize,
    pub total_samples: usize,
    pub total_tombstones: usize,
    pub total_exemplars: usize,
    pub total_metadata: usize,
    pub total_histograms: usize,
}

/// Directory of the checkpoint covering segments up to `index`
pub fn checkpoint_dir(dir: &Path, index: u64) -> PathBuf {
    dir.join(format!("{}{:08}", CHECKPOINT_PREFIX, index))
}

fn parse_checkpoint_name(name: &str) -> Option<u64> {
    let digits = name.strip_prefix(CHECKPOINT_PREFIX)?;
    if digits.len() != 8 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// All finished checkpoint directories in `dir`, sorted by index
fn list_checkpoints(dir: &Path) -> Result<Vec<(u64, PathBuf)>> {
    let mut checkpoints = Vec::new();
    if !dir.exists() {
        return Ok(checkpoints);
    }
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let index = path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(parse_checkpoint_name);
        if let Some(index) = index {
            checkpoints.push((index, path));
        }
    }
    checkpoints.sort_by_key(|(index, _)| *index);
    Ok(checkpoints)
}

fn tmp_checkpoint_dir(dir: &Path, index: u64) -> PathBuf {
    dir.join(format!("{}{:08}.tmp", CHECKPOINT_PREFIX, index))
}

/// Remove checkpoint directories left half-built by a crash.
///
/// Returns how many were removed.
pub(super) fn remove_tmp_checkpoints(dir: &Path) -> Result<usize> {
    let mut removed = 0;
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let leftover = path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(|n| n.strip_suffix(".tmp"))
            .and_then(parse_checkpoint_name)
            .is_some();
        if leftover && path.is_dir() {
            fs::remove_dir_all(&path)?;
            warn!(dir = %path.display(), "removed unfinished checkpoint");
            removed += 1;
        }
    }
    Ok(removed)
}

/// The most recent checkpoint in `dir` and the segment index it covers
pub fn last_checkpoint(dir: &Path) -> Result<Option<(PathBuf, u64)>> {
    Ok(list_checkpoints(dir)?
        .pop()
        .map(|(index, path)| (path, index)))
}

/// Delete every checkpoint with index below `max_index`.
///
/// Attempts all deletions and returns the first error encountered.
pub fn delete_checkpoints(dir: &Path, max_index: u64) -> Result<()> {
    let mut first_err = None;
    for (index, path) in list_checkpoints(dir)? {
        if index >= max_index {
            break;
        }
        if let Err(e) = fs::remove_dir_all(&path) {
            warn!(checkpoint = index, error = %e, "failed to delete checkpoint");
            first_err.get_or_insert(e);
        }
    }
    match first_err {
        Some(e) => Err(e.into()),
        None => Ok(()),
    }
}

/// Writes compacted records into a checkpoint directory, rolling segments
/// the same way the log does.
struct CheckpointWriter {
    dir: PathBuf,
    segment_size: u64,
    current: SegmentFile,
    buf: BytesMut,
}

impl CheckpointWriter {
    fn new(dir: PathBuf, segment_size: u64) -> Result<Self> {
        let current = SegmentFile::create(&dir, 0)?;
        Ok(Self {
            dir,
            segment_size,
            current,
            buf: BytesMut::new(),
        })
    }

    fn write(&mut self, record: &Record) -> Result<()> {
        self.buf.clear();
        record.encode(&mut self.buf)?;

        let frame = super::segment::FRAME_HEADER_SIZE + self.buf.len() as u64;
        if self.current.size() > 0 && self.current.size() + frame > self.segment_size {
            self.current.sync()?;
            self.current = SegmentFile::create(&self.dir, self.current.index() + 1)?;
        }
        self.current.write_frame(&self.buf)
    }

    fn finish(mut self) -> Result<()> {
        self.current.sync()
    }
}

/// Compact segments `from..=to` into `checkpoint.{to}`.
///
/// Series records survive if `keep(ref)` holds; samples, exemplars and
/// histograms survive if their timestamp is `>= mint`; tombstones survive if
/// their ref is still kept. The latest metadata of each kept series is
/// written once at the end.
///
/// If a checkpoint already exists, its content is carried over and reading
/// resumes right after it; requesting a `from` past that point is an error.
pub fn checkpoint<F>(wal: &Wal, from: u64, to: u64, keep: F, mint: i64) -> Result<CheckpointStats>
where
    F: Fn(SeriesRef) -> bool,
{
    info!(from, to, mint, "creating checkpoint");
    let dir = wal.dir();

    let mut sources = Vec::new();
    let mut from = from;
    if let Some((cp_dir, index)) = last_checkpoint(dir)? {
        let last = index + 1;
        if from > last {
            return Err(WalError::Checkpoint(format!(
                "unexpected gap to last checkpoint. expected:{}, requested:{}",
                last, from
            )));
        }
        from = last;
        sources.push(SegmentReader::open_dir(&cp_dir)?);
    }
    sources.push(SegmentReader::open_range(dir, from, to)?);

    let final_dir = checkpoint_dir(dir, to);
    let tmp_dir = tmp_checkpoint_dir(dir, to);
    if tmp_dir.exists() {
        fs::remove_dir_all(&tmp_dir)?;
    }
    fs::create_dir_all(&tmp_dir)?;

    let result = write_checkpoint(&mut sources, &tmp_dir, wal.segment_size(), &keep, mint);
    drop(sources);
    let stats = match result {
        Ok(stats) => stats,
        Err(e) => {
            let _ = fs::remove_dir_all(&tmp_dir);
            return Err(WalError::Checkpoint(e.to_string()));
        }
    };

    if final_dir.exists() {
        fs::remove_dir_all(&final_dir)?;
    }
    fs::rename(&tmp_dir, &final_dir)?;
    if let Ok(parent) = File::open(dir) {
        let _ = parent.sync_all();
    }

    debug!(
        checkpoint = to,
        total_series = stats.total_series,
        dropped_series = stats.dropped_series,
        total_samples = stats.total_samples,
        dropped_samples = stats.dropped_samples,
        "checkpoint complete"
    );
    Ok(stats)
}

fn write_checkpoint<F>(
    sources: &mut [SegmentReader],
    tmp_dir: &Path,
    segment_size: u64,
    keep: &F,
    mint: i64,
) -> Result<CheckpointStats>
where
    F: Fn(SeriesRef) -> bool,
{
    let mut writer = CheckpointWriter::new(tmp_dir.to_path_buf(), segment_size)?;
    let mut stats = CheckpointStats::default();
    let mut latest_metadata: HashMap<SeriesRef, RefMetadata> = HashMap::new();

    for reader in sources.iter_mut() {
        while let Some(record) = reader.next_record()? {
            let kept = match record {
                Record::Series(series) => {
                    let total = series.len();
                    let kept: Vec<_> = series.into_iter().filter(|s| keep(s.ref_id)).collect();
                    stats.total_series += total;
                    stats.dropped_series += total - kept.len();
                    Record::Series(kept)
                }
                Record::Samples(samples) => {
                    let total = samples.len();
                    let kept: Vec<_> = samples.into_iter().filter(|s| s.t >= mint).collect();
                    stats.total_samples += total;
                    stats.dropped_samples += total - kept.len();
                    Record::Samples(kept)
                }
                Record::Tombstones(refs) => {
                    let total = refs.len();
                    let kept: Vec<_> = refs.into_iter().filter(|r| keep(*r)).collect();
                    stats.total_tombstones += total;
                    stats.dropped_tombstones += total - kept.len();
                    Record::Tombstones(kept)
                }
                Record::Exemplars(exemplars) => {
                    let total = exemplars.len();
                    let kept: Vec<_> = exemplars.into_iter().filter(|e| e.t >= mint).collect();
                    stats.total_exemplars += total;
                    stats.dropped_exemplars += total - kept.len();
                    Record::Exemplars(kept)
                }
                Record::Metadata(metadata) => {
                    stats.total_metadata += metadata.len();
                    for m in metadata {
                        if keep(m.ref_id) {
                            latest_metadata.insert(m.ref_id, m);
                        } else {
                            stats.dropped_metadata += 1;
                        }
                    }
                    continue;
                }
                Record::HistogramSamples(hs) => {
                    Record::HistogramSamples(filter_histograms(hs, mint, &mut stats, |h| h.t))
                }
                Record::CustomBucketsHistogramSamples(hs) => Record::CustomBucketsHistogramSamples(
                    filter_histograms(hs, mint, &mut stats, |h| h.t),
                ),
                Record::FloatHistogramSamples(hs) => {
                    Record::FloatHistogramSamples(filter_histograms(hs, mint, &mut stats, |h| h.t))
                }
                Record::CustomBucketsFloatHistogramSamples(hs) => {
                    Record::CustomBucketsFloatHistogramSamples(filter_histograms(
                        hs,
                        mint,
                        &mut stats,
                        |h| h.t,
                    ))
                }
            };
            if !kept.is_empty() {
                writer.write(&kept)?;
            }
        }
    }

    if !latest_metadata.is_empty() {
        let mut metadata: Vec<_> = latest_metadata.into_values().collect();
        metadata.sort_by_key(|m| m.ref_id);
        // Superseded entries count as dropped too
        stats.dropped_metadata += stats.total_metadata - stats.dropped_metadata - metadata.len();
        writer.write(&Record::Metadata(metadata))?;
    }

    writer.finish()?;
    Ok(stats)
}

fn filter_histograms<T>(
    samples: Vec<T>,
    mint: i64,
    stats: &mut CheckpointStats,
    timestamp: impl Fn(&T) -> i64,
) -> Vec<T> {
    let total = samples.len();
    let kept: Vec<T> = samples
        .into_iter()
        .filter(|s| timestamp(s) >= mint)
        .collect();
    stats.total_histograms += total;
    stats.dropped_histograms += total - kept.len();
    kept
}
