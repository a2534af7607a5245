//! Tests for WAL Reader
//!
//! These tests verify:
//! - Empty segments
//! - Partial write handling
//! - Checksum and decode failures reported at the frame start

use std::fs::{self, OpenOptions};
use std::io::Write;

use agentwal::wal::{self, Record, SegmentReader};
use agentwal::WalError;
use tempfile::TempDir;

use crate::{encode, log_record, open_wal, sample, series};

fn corruption_position(err: WalError) -> (u64, u64) {
    match err {
        WalError::Corruption {
            segment, offset, ..
        } => (segment, offset),
        other => panic!("expected corruption, got {:?}", other),
    }
}

#[test]
fn test_read_empty_segment() {
    let temp = TempDir::new().unwrap();
    let wal = open_wal(temp.path());
    wal.close().unwrap();

    let mut reader = SegmentReader::open_dir(temp.path()).unwrap();
    assert!(reader.next_record().unwrap().is_none());
}

#[test]
fn test_partial_frame_is_corruption() {
    let temp = TempDir::new().unwrap();
    let record = Record::Series(vec![series(1, "up")]);
    let wal = open_wal(temp.path());
    log_record(&wal, &record);
    wal.close().unwrap();

    // Torn write: only part of a frame header made it to disk
    let path = wal::segment_path(temp.path(), 0);
    let mut file = OpenOptions::new().append(true).open(&path).unwrap();
    file.write_all(&[1, 2, 3]).unwrap();

    let mut reader = SegmentReader::open_dir(temp.path()).unwrap();
    assert_eq!(reader.next_record().unwrap(), Some(record.clone()));

    let err = reader.next_record().unwrap_err();
    let frame_len = wal::FRAME_HEADER_SIZE + encode(&record).len() as u64;
    assert_eq!(corruption_position(err), (0, frame_len));
}

#[test]
fn test_checksum_mismatch_reports_frame_offset() {
    let temp = TempDir::new().unwrap();
    let first = Record::Series(vec![series(1, "up")]);
    let second = Record::Samples(vec![sample(1, 10, 1.0)]);
    let wal = open_wal(temp.path());
    log_record(&wal, &first);
    log_record(&wal, &second);
    wal.close().unwrap();

    let path = wal::segment_path(temp.path(), 0);
    let mut bytes = fs::read(&path).unwrap();
    let last = bytes.len() - 1;
    bytes[last] ^= 0xff;
    fs::write(&path, bytes).unwrap();

    let mut reader = SegmentReader::open_dir(temp.path()).unwrap();
    assert!(reader.next_record().unwrap().is_some());
    let err = reader.next_record().unwrap_err();
    let offset = wal::FRAME_HEADER_SIZE + encode(&first).len() as u64;
    assert_eq!(corruption_position(err), (0, offset));
}

#[test]
fn test_garbage_segment_is_corruption() {
    let temp = TempDir::new().unwrap();
    fs::write(wal::segment_path(temp.path(), 0), b"hello world").unwrap();

    let err = wal::read_all(temp.path()).unwrap_err();
    assert_eq!(corruption_position(err), (0, 0));
}

#[test]
fn test_unknown_record_type_is_corruption() {
    let temp = TempDir::new().unwrap();
    let payload = [5u8, 0, 0, 0, 0, 0, 0, 0, 0];
    let mut frame = Vec::new();
    frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    frame.extend_from_slice(&crc32fast::hash(&payload).to_le_bytes());
    frame.extend_from_slice(&payload);
    fs::write(wal::segment_path(temp.path(), 3), frame).unwrap();

    let err = wal::read_all(temp.path()).unwrap_err();
    assert_eq!(corruption_position(err), (3, 0));
}
