//! Tests for Replay on Open
//!
//! These tests verify:
//! - Series and timestamps are restored from the log
//! - The ref counter continues after the highest logged ref
//! - Duplicate series records are mapped to one series
//! - Tombstones for a duplicate ref leave the owning series alone
//! - Exemplars and metadata survive a restart
//! - Corrupted segments are repaired, unreadable checkpoints discard the log

use std::fs::{self, OpenOptions};
use std::io::Write;

use agentwal::config::WalSyncStrategy;
use agentwal::wal::{self, Record, RefSample, RefSeries, Wal};
use agentwal::{Exemplar, Metadata, MetricType, SeriesRef, Storage, WalError};
use bytes::BytesMut;
use tempfile::TempDir;

use crate::{labels, open_storage, series_labels, test_config};

// =============================================================================
// Helper Functions
// =============================================================================

/// Write raw records into the log directory of `dir`
fn write_raw(dir: &std::path::Path, records: &[Record]) {
    let wal = Wal::open(&dir.join("wal"), 1024 * 1024, WalSyncStrategy::EveryWrite).unwrap();
    let mut buf = BytesMut::new();
    for record in records {
        buf.clear();
        record.encode(&mut buf).unwrap();
        wal.log(&buf).unwrap();
    }
    wal.close().unwrap();
}

fn exemplar(ts: i64) -> Exemplar {
    Exemplar {
        labels: labels(&[("trace_id", "abc")]),
        value: 1.0,
        ts,
        has_ts: true,
    }
}

// =============================================================================
// Basic Replay Tests
// =============================================================================

#[test]
fn test_existing_wal_restores_series() {
    let temp = TempDir::new().unwrap();
    let l = series_labels("foo");
    {
        let storage = open_storage(temp.path());
        let mut app = storage.appender();
        let r = app.append(SeriesRef(0), &l, 0, 1.0).unwrap();
        app.append(r, &l, 10, 2.0).unwrap();
        app.commit().unwrap();
        drop(app);
        storage.close().unwrap();
    }

    let storage = open_storage(temp.path());
    let series = storage.lookup(&l).unwrap();
    assert_eq!(series.last_ts(), 10);
    assert_eq!(storage.series_count(), 1);
    assert_eq!(storage.metrics().active_series.get(), 1);

    let stats = storage.replay_stats();
    assert_eq!(stats.series_created, 1);
    assert_eq!(stats.samples_replayed, 2);
    assert!(stats.repaired.is_none());
}

#[test]
fn test_existing_wal_continues_refs() {
    let temp = TempDir::new().unwrap();
    {
        let storage = open_storage(temp.path());
        let mut app = storage.appender();
        for name in ["a", "b", "c"] {
            app.append(SeriesRef(0), &series_labels(name), 10, 1.0)
                .unwrap();
        }
        app.commit().unwrap();
    }

    let storage = open_storage(temp.path());
    assert_eq!(storage.next_ref(), 3);

    let mut app = storage.appender();
    let r = app.append(SeriesRef(0), &series_labels("d"), 10, 1.0).unwrap();
    assert_eq!(r, SeriesRef(4));
    // Known labels keep their ref
    let r = app.append(SeriesRef(0), &series_labels("a"), 11, 1.0).unwrap();
    assert_eq!(r, SeriesRef(1));
}

#[test]
fn test_samples_for_unknown_series_skipped() {
    let temp = TempDir::new().unwrap();
    write_raw(
        temp.path(),
        &[Record::Samples(vec![RefSample {
            ref_id: SeriesRef(42),
            t: 10,
            v: 1.0,
        }])],
    );

    let storage = open_storage(temp.path());
    assert_eq!(storage.series_count(), 0);
    assert_eq!(storage.replay_stats().unknown_series_samples, 1);
}

// =============================================================================
// Duplicate Series Tests
// =============================================================================

#[test]
fn test_duplicate_series_records_merged() {
    let temp = TempDir::new().unwrap();
    let l = series_labels("foo");
    write_raw(
        temp.path(),
        &[
            Record::Series(vec![RefSeries {
                ref_id: SeriesRef(1),
                labels: l.clone(),
            }]),
            Record::Samples(vec![RefSample {
                ref_id: SeriesRef(1),
                t: 5,
                v: 1.0,
            }]),
            Record::Series(vec![RefSeries {
                ref_id: SeriesRef(2),
                labels: l.clone(),
            }]),
            Record::Samples(vec![RefSample {
                ref_id: SeriesRef(2),
                t: 20,
                v: 2.0,
            }]),
        ],
    );

    let storage = open_storage(temp.path());
    assert_eq!(storage.series_count(), 1);
    let series = storage.lookup(&l).unwrap();
    assert_eq!(series.ref_id(), SeriesRef(1));
    assert_eq!(series.last_ts(), 20);

    assert_eq!(storage.replay_stats().duplicate_series, 1);
    assert_eq!(storage.deleted_series().get(&SeriesRef(2)), Some(&0));
    // The duplicate ref is never handed out again
    assert_eq!(storage.next_ref(), 2);
}

#[test]
fn test_tombstone_for_duplicate_keeps_owner() {
    let temp = TempDir::new().unwrap();
    let l = series_labels("foo");
    write_raw(
        temp.path(),
        &[
            Record::Series(vec![RefSeries {
                ref_id: SeriesRef(1),
                labels: l.clone(),
            }]),
            Record::Series(vec![RefSeries {
                ref_id: SeriesRef(2),
                labels: l.clone(),
            }]),
            Record::Tombstones(vec![SeriesRef(2)]),
        ],
    );

    let storage = open_storage(temp.path());
    assert_eq!(storage.series_count(), 1);
    assert_eq!(storage.lookup(&l).unwrap().ref_id(), SeriesRef(1));
    assert_eq!(storage.replay_stats().tombstones_applied, 0);
    assert_eq!(storage.deleted_series().get(&SeriesRef(2)), Some(&0));
    assert!(!storage.deleted_series().contains_key(&SeriesRef(1)));
}

// =============================================================================
// Exemplar / Metadata Tests
// =============================================================================

#[test]
fn test_exemplars_and_metadata_restored() {
    let temp = TempDir::new().unwrap();
    let l = series_labels("foo");
    let metadata = Metadata {
        metric_type: MetricType::Counter,
        unit: "bytes".to_string(),
        help: "Bytes sent".to_string(),
    };
    let r = {
        let storage = open_storage(temp.path());
        let mut app = storage.appender();
        let r = app.append(SeriesRef(0), &l, 10, 1.0).unwrap();
        app.append_exemplar(r, exemplar(10)).unwrap();
        app.update_metadata(r, &l, metadata.clone()).unwrap();
        app.commit().unwrap();
        r
    };

    let storage = open_storage(temp.path());
    let series = storage.get_series(r).unwrap();
    assert_eq!(series.metadata(), Some(metadata.clone()));
    assert_eq!(storage.replay_stats().exemplars_replayed, 1);
    assert_eq!(storage.replay_stats().metadata_replayed, 1);

    let mut app = storage.appender();
    // Already the latest exemplar of the series
    assert_eq!(app.append_exemplar(r, exemplar(10)).unwrap(), SeriesRef(0));
    // Unchanged metadata is not logged again
    app.update_metadata(r, &l, metadata).unwrap();
    assert!(app.is_empty());
}

#[test]
fn test_histogram_samples_advance_timestamp() {
    let temp = TempDir::new().unwrap();
    let l = series_labels("latency");
    {
        let storage = open_storage(temp.path());
        let mut app = storage.appender();
        app.append_histogram(
            SeriesRef(0),
            &l,
            30,
            agentwal::HistogramValue::Int(agentwal::Histogram::default()),
        )
        .unwrap();
        app.commit().unwrap();
    }

    let storage = open_storage(temp.path());
    assert_eq!(storage.lookup(&l).unwrap().last_ts(), 30);
}

// =============================================================================
// Corruption Tests
// =============================================================================

#[test]
fn test_corrupted_segment_repaired() {
    let temp = TempDir::new().unwrap();
    let wal_dir = temp.path().join("wal");
    fs::create_dir_all(&wal_dir).unwrap();
    fs::write(wal::segment_path(&wal_dir, 0), b"hello world").unwrap();

    let storage = open_storage(temp.path());
    let repaired = storage.replay_stats().repaired.clone().unwrap();
    assert_eq!(repaired.segment, 0);
    assert_eq!(repaired.offset, 0);
    assert_eq!(storage.series_count(), 0);

    // The repaired log takes new writes and replays them
    let l = series_labels("foo");
    let mut app = storage.appender();
    app.append(SeriesRef(0), &l, 10, 1.0).unwrap();
    app.commit().unwrap();
    drop(app);
    storage.close().unwrap();
    drop(storage);

    let storage = open_storage(temp.path());
    assert!(storage.replay_stats().repaired.is_none());
    assert_eq!(storage.lookup(&l).unwrap().last_ts(), 10);
}

#[test]
fn test_corruption_keeps_earlier_records() {
    let temp = TempDir::new().unwrap();
    let l = series_labels("foo");
    {
        let storage = open_storage(temp.path());
        let mut app = storage.appender();
        app.append(SeriesRef(0), &l, 10, 1.0).unwrap();
        app.commit().unwrap();
    }

    let path = wal::segment_path(&temp.path().join("wal"), 0);
    let mut file = OpenOptions::new().append(true).open(&path).unwrap();
    file.write_all(b"hello world").unwrap();
    drop(file);

    let storage = open_storage(temp.path());
    assert!(storage.replay_stats().repaired.is_some());
    assert_eq!(storage.lookup(&l).unwrap().last_ts(), 10);
}

#[test]
fn test_unreadable_checkpoint_discards_log() {
    let temp = TempDir::new().unwrap();
    let wal_dir = temp.path().join("wal");
    let cp_dir = wal::checkpoint_dir(&wal_dir, 0);
    fs::create_dir_all(&cp_dir).unwrap();
    fs::write(wal::segment_path(&cp_dir, 0), b"hello world").unwrap();
    write_raw(temp.path(), &[Record::Series(vec![RefSeries {
        ref_id: SeriesRef(1),
        labels: series_labels("foo"),
    }])]);

    let err = Storage::open(test_config(temp.path())).err().unwrap();
    match err {
        WalError::Unrecoverable(inner) => assert!(matches!(*inner, WalError::Checkpoint(_))),
        other => panic!("expected unrecoverable error, got {:?}", other),
    }

    assert!(wal::list_segments(&wal_dir).unwrap().is_empty());
    assert!(wal::last_checkpoint(&wal_dir).unwrap().is_none());

    // Starting over works
    let storage = open_storage(temp.path());
    assert_eq!(storage.series_count(), 0);
}
