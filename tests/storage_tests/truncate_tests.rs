//! Tests for Truncation
//!
//! These tests verify:
//! - Stale series are removed and tombstoned
//! - Tombstones are honoured on replay
//! - Old segments are folded into a checkpoint
//! - Deleted series are forgotten once no segment references them

use agentwal::wal::{self, Record};
use agentwal::{SeriesRef, WalError};
use tempfile::TempDir;

use crate::{open_storage, series_labels, wal_records};

#[test]
fn test_truncate_removes_stale_series() {
    let temp = TempDir::new().unwrap();
    let stale = series_labels("stale");
    let live = series_labels("live");
    let stale_ref = {
        let storage = open_storage(temp.path());
        let mut app = storage.appender();
        let stale_ref = app.append(SeriesRef(0), &stale, 10, 1.0).unwrap();
        app.append(SeriesRef(0), &live, 100, 1.0).unwrap();
        app.commit().unwrap();
        drop(app);

        storage.truncate(50).unwrap();
        assert_eq!(storage.series_count(), 1);
        assert!(storage.lookup(&stale).is_none());
        assert!(storage.lookup(&live).is_some());
        assert_eq!(storage.metrics().active_series.get(), 1);
        assert_eq!(storage.deleted_series().get(&stale_ref), Some(&0));
        stale_ref
    };

    let storage = open_storage(temp.path());
    assert_eq!(storage.series_count(), 1);
    assert!(storage.lookup(&stale).is_none());
    assert_eq!(storage.lookup(&live).unwrap().last_ts(), 100);
    assert_eq!(storage.replay_stats().tombstones_applied, 1);
    assert!(storage.deleted_series().contains_key(&stale_ref));
}

#[test]
fn test_truncate_beyond_all_series() {
    let temp = TempDir::new().unwrap();
    let storage = open_storage(temp.path());
    let mut app = storage.appender();
    let a = app.append(SeriesRef(0), &series_labels("a"), 10, 1.0).unwrap();
    let b = app.append(SeriesRef(0), &series_labels("b"), 20, 1.0).unwrap();
    app.commit().unwrap();
    drop(app);

    storage.truncate(i64::MAX).unwrap();
    assert_eq!(storage.series_count(), 0);
    assert_eq!(storage.metrics().active_series.get(), 0);
    assert_eq!(storage.metrics().deleted_series.get(), 2);

    let records = wal_records(temp.path());
    let series: Vec<SeriesRef> = records
        .iter()
        .flat_map(|r| match r {
            Record::Series(s) => s.iter().map(|s| s.ref_id).collect::<Vec<_>>(),
            _ => Vec::new(),
        })
        .collect();
    let tombstones: Vec<SeriesRef> = records
        .iter()
        .flat_map(|r| match r {
            Record::Tombstones(refs) => refs.clone(),
            _ => Vec::new(),
        })
        .collect();
    assert_eq!(series, vec![a, b]);
    assert_eq!(tombstones, vec![a, b]);
}

#[test]
fn test_truncate_creates_checkpoint() {
    let temp = TempDir::new().unwrap();
    let l = series_labels("live");
    {
        let storage = open_storage(temp.path());
        let mut app = storage.appender();
        app.append(SeriesRef(0), &series_labels("stale"), 10, 1.0)
            .unwrap();
        // Every truncate starts a new segment; the fourth one checkpoints
        for i in 1..=4 {
            app.append(SeriesRef(0), &l, i * 100, 1.0).unwrap();
            app.commit().unwrap();
            storage.truncate(50).unwrap();
        }
        drop(app);

        let wal_dir = storage.wal_dir().to_path_buf();
        assert_eq!(wal::last_checkpoint(&wal_dir).unwrap().unwrap().1, 1);
        assert_eq!(wal::segments(&wal_dir).unwrap(), Some((2, 4)));

        // The stale series was only referenced by checkpointed segments
        assert!(storage.deleted_series().is_empty());
        assert_eq!(storage.metrics().removed_series.get(), 1);
    }

    let storage = open_storage(temp.path());
    assert_eq!(storage.replay_stats().checkpoint, Some(1));
    assert_eq!(storage.series_count(), 1);
    assert_eq!(storage.lookup(&l).unwrap().last_ts(), 400);
    assert!(storage.lookup(&series_labels("stale")).is_none());
}

#[test]
fn test_series_recreated_after_truncate() {
    let temp = TempDir::new().unwrap();
    let l = series_labels("foo");
    {
        let storage = open_storage(temp.path());
        let mut app = storage.appender();
        let first = app.append(SeriesRef(0), &l, 10, 1.0).unwrap();
        app.commit().unwrap();

        storage.truncate(100).unwrap();
        assert!(storage.lookup(&l).is_none());

        let second = app.append(SeriesRef(0), &l, 200, 1.0).unwrap();
        app.commit().unwrap();
        assert_ne!(first, second);
        assert_eq!(second, SeriesRef(2));
    }

    let storage = open_storage(temp.path());
    let series = storage.lookup(&l).unwrap();
    assert_eq!(series.ref_id(), SeriesRef(2));
    assert_eq!(series.last_ts(), 200);
    assert_eq!(storage.series_count(), 1);
    assert_eq!(storage.next_ref(), 2);
}

#[test]
fn test_truncate_after_close() {
    let temp = TempDir::new().unwrap();
    let storage = open_storage(temp.path());
    storage.close().unwrap();

    assert!(matches!(storage.truncate(0), Err(WalError::Closed)));
}
