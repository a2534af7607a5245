//! Tests for WAL Checkpoints
//!
//! These tests verify:
//! - Series and tombstones filtered by the keep predicate
//! - Samples filtered by the minimum timestamp
//! - Only the latest metadata per series survives
//! - A previous checkpoint is carried into the next one
//! - Gaps to the last checkpoint are rejected
//! - Unfinished checkpoint directories are removed on open

use agentwal::model::{Metadata, MetricType};
use agentwal::wal::{
    self, checkpoint, checkpoint_dir, delete_checkpoints, last_checkpoint, Record, RefMetadata,
    SegmentReader, Wal,
};
use agentwal::{SeriesRef, WalError};
use tempfile::TempDir;

use crate::{log_record, open_wal, sample, series};

// =============================================================================
// Helper Functions
// =============================================================================

fn read_checkpoint(wal: &Wal, index: u64) -> Vec<Record> {
    let mut reader = SegmentReader::open_dir(&checkpoint_dir(wal.dir(), index)).unwrap();
    let mut records = Vec::new();
    while let Some(record) = reader.next_record().unwrap() {
        records.push(record);
    }
    records
}

fn metadata(ref_id: u64, help: &str) -> RefMetadata {
    RefMetadata {
        ref_id: SeriesRef(ref_id),
        metadata: Metadata {
            metric_type: MetricType::Gauge,
            unit: String::new(),
            help: help.to_string(),
        },
    }
}

/// Segment 0: two series and samples; segment 1: more samples and a
/// tombstone for series 1. Segment 2 is left active.
fn two_segment_wal(temp: &TempDir) -> Wal {
    let wal = open_wal(temp.path());
    log_record(&wal, &Record::Series(vec![series(1, "a"), series(2, "b")]));
    log_record(
        &wal,
        &Record::Samples(vec![sample(1, 10, 1.0), sample(2, 100, 2.0)]),
    );
    wal.next_segment().unwrap();
    log_record(
        &wal,
        &Record::Samples(vec![sample(1, 20, 1.0), sample(2, 200, 2.0)]),
    );
    log_record(&wal, &Record::Tombstones(vec![SeriesRef(1)]));
    wal.next_segment().unwrap();
    wal
}

// =============================================================================
// Filtering Tests
// =============================================================================

#[test]
fn test_checkpoint_filters_series_and_samples() {
    let temp = TempDir::new().unwrap();
    let wal = two_segment_wal(&temp);

    let stats = checkpoint(&wal, 0, 1, |r| r == SeriesRef(2), 50).unwrap();

    assert_eq!(stats.total_series, 2);
    assert_eq!(stats.dropped_series, 1);
    assert_eq!(stats.total_samples, 4);
    assert_eq!(stats.dropped_samples, 2);
    assert_eq!(stats.total_tombstones, 1);
    assert_eq!(stats.dropped_tombstones, 1);

    assert_eq!(
        read_checkpoint(&wal, 1),
        vec![
            Record::Series(vec![series(2, "b")]),
            Record::Samples(vec![sample(2, 100, 2.0)]),
            Record::Samples(vec![sample(2, 200, 2.0)]),
        ]
    );

    let (path, index) = last_checkpoint(wal.dir()).unwrap().unwrap();
    assert_eq!(index, 1);
    assert_eq!(path, checkpoint_dir(wal.dir(), 1));
    // No temporary directory is left behind
    assert!(!wal.dir().join("checkpoint.00000001.tmp").exists());
}

#[test]
fn test_checkpoint_keeps_latest_metadata() {
    let temp = TempDir::new().unwrap();
    let wal = open_wal(temp.path());
    log_record(&wal, &Record::Series(vec![series(1, "a"), series(2, "b")]));
    log_record(&wal, &Record::Metadata(vec![metadata(2, "old"), metadata(1, "gone")]));
    log_record(&wal, &Record::Metadata(vec![metadata(2, "new")]));
    wal.next_segment().unwrap();

    let stats = checkpoint(&wal, 0, 0, |r| r == SeriesRef(2), 0).unwrap();
    assert_eq!(stats.total_metadata, 3);
    assert_eq!(stats.dropped_metadata, 2);

    let records = read_checkpoint(&wal, 0);
    assert_eq!(
        records.last(),
        Some(&Record::Metadata(vec![metadata(2, "new")]))
    );
    let metadata_records = records
        .iter()
        .filter(|r| matches!(r, Record::Metadata(_)))
        .count();
    assert_eq!(metadata_records, 1);
}

// =============================================================================
// Checkpoint Chain Tests
// =============================================================================

#[test]
fn test_checkpoint_carries_previous() {
    let temp = TempDir::new().unwrap();
    let wal = two_segment_wal(&temp);
    checkpoint(&wal, 0, 1, |_| true, 0).unwrap();
    wal.truncate(2).unwrap();

    log_record(&wal, &Record::Series(vec![series(3, "c")]));
    wal.next_segment().unwrap();
    log_record(&wal, &Record::Samples(vec![sample(3, 300, 3.0)]));
    wal.next_segment().unwrap();

    checkpoint(&wal, 2, 3, |_| true, 0).unwrap();
    delete_checkpoints(wal.dir(), 3).unwrap();

    let records = read_checkpoint(&wal, 3);
    let refs: Vec<SeriesRef> = records
        .iter()
        .flat_map(|r| match r {
            Record::Series(s) => s.iter().map(|s| s.ref_id).collect::<Vec<_>>(),
            _ => Vec::new(),
        })
        .collect();
    assert_eq!(refs, vec![SeriesRef(1), SeriesRef(2), SeriesRef(3)]);

    assert_eq!(last_checkpoint(wal.dir()).unwrap().unwrap().1, 3);
    assert!(!checkpoint_dir(wal.dir(), 1).exists());
}

#[test]
fn test_checkpoint_gap_rejected() {
    let temp = TempDir::new().unwrap();
    let wal = two_segment_wal(&temp);
    checkpoint(&wal, 0, 1, |_| true, 0).unwrap();

    let err = checkpoint(&wal, 5, 6, |_| true, 0).unwrap_err();
    assert!(matches!(err, WalError::Checkpoint(_)));
}

#[test]
fn test_read_all_starts_from_checkpoint() {
    let temp = TempDir::new().unwrap();
    let wal = two_segment_wal(&temp);
    checkpoint(&wal, 0, 1, |r| r == SeriesRef(2), 0).unwrap();
    wal.truncate(2).unwrap();
    log_record(&wal, &Record::Samples(vec![sample(2, 300, 3.0)]));
    wal.close().unwrap();

    let records = wal::read_all(temp.path()).unwrap();
    assert_eq!(records.first(), Some(&Record::Series(vec![series(2, "b")])));
    assert_eq!(
        records.last(),
        Some(&Record::Samples(vec![sample(2, 300, 3.0)]))
    );
}

#[test]
fn test_unfinished_checkpoint_removed_on_open() {
    let temp = TempDir::new().unwrap();
    let wal = two_segment_wal(&temp);
    checkpoint(&wal, 0, 1, |_| true, 0).unwrap();
    wal.close().unwrap();

    // A crash mid-build leaves the temporary directory behind
    let leftover = temp.path().join("checkpoint.00000003.tmp");
    std::fs::create_dir_all(&leftover).unwrap();
    std::fs::write(leftover.join("00000000"), b"partial").unwrap();

    let wal = open_wal(temp.path());
    assert!(!leftover.exists());
    // Finished checkpoints are untouched
    assert!(checkpoint_dir(temp.path(), 1).exists());
    assert_eq!(last_checkpoint(temp.path()).unwrap().unwrap().1, 1);
    wal.close().unwrap();
}
