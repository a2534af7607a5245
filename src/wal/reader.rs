//! WAL Reader
//!
//! Reads frames sequentially across one or more segment files and reports
//! the exact position of anything that fails to verify.

use std::collections::VecDeque;
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};

use bytes::{Bytes, BytesMut};

use crate::error::{Result, WalError};

use super::checkpoint::last_checkpoint;
use super::record::Record;
use super::segment::{list_segments, FRAME_HEADER_SIZE, MAX_RECORD_SIZE};

/// Sequential reader over a list of segments
pub struct SegmentReader {
    /// Segments not opened yet, in read order
    pending: VecDeque<(u64, PathBuf)>,
    /// Currently open segment
    current: Option<(u64, BufReader<File>)>,
    /// Offset of the next frame in the current segment
    offset: u64,
    /// Segment and offset of the last frame returned
    record_segment: u64,
    record_offset: u64,
}

impl SegmentReader {
    pub fn new(segments: Vec<(u64, PathBuf)>) -> Self {
        Self {
            pending: segments.into(),
            current: None,
            offset: 0,
            record_segment: 0,
            record_offset: 0,
        }
    }

    /// Reader over a single segment file
    pub fn open(index: u64, path: &Path) -> Self {
        Self::new(vec![(index, path.to_path_buf())])
    }

    /// Reader over every segment in `dir` (used for checkpoint directories)
    pub fn open_dir(dir: &Path) -> Result<Self> {
        Ok(Self::new(list_segments(dir)?))
    }

    /// Reader over the segments of `dir` with index in `from..=to`
    pub fn open_range(dir: &Path, from: u64, to: u64) -> Result<Self> {
        let segments = list_segments(dir)?
            .into_iter()
            .filter(|(index, _)| (from..=to).contains(index))
            .collect();
        Ok(Self::new(segments))
    }

    /// Segment of the last returned frame
    pub fn segment(&self) -> u64 {
        self.record_segment
    }

    /// Start offset of the last returned frame
    pub fn offset(&self) -> u64 {
        self.record_offset
    }

    /// Next verified frame payload, `None` once every segment is exhausted
    pub fn next_frame(&mut self) -> Result<Option<Bytes>> {
        loop {
            if self.current.is_none() {
                let Some((index, path)) = self.pending.pop_front() else {
                    return Ok(None);
                };
                let file = File::open(&path)?;
                self.current = Some((index, BufReader::new(file)));
                self.offset = 0;
            }
            let Some((index, reader)) = self.current.as_mut() else {
                continue;
            };
            let index = *index;
            let start = self.offset;

            let mut header = [0u8; FRAME_HEADER_SIZE as usize];
            match read_full(reader, &mut header)? {
                0 => {
                    // Clean end of segment
                    self.current = None;
                    continue;
                }
                n if n < header.len() => {
                    return Err(corruption(index, start, "truncated frame header"));
                }
                _ => {}
            }

            let len = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
            let crc = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);
            if len == 0 || len > MAX_RECORD_SIZE {
                return Err(corruption(
                    index,
                    start,
                    &format!("invalid record length {}", len),
                ));
            }

            let mut payload = BytesMut::zeroed(len as usize);
            match reader.read_exact(&mut payload) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    return Err(corruption(index, start, "truncated record"));
                }
                Err(e) => return Err(e.into()),
            }
            if crc32fast::hash(&payload) != crc {
                return Err(corruption(index, start, "checksum mismatch"));
            }

            self.offset = start + FRAME_HEADER_SIZE + len as u64;
            self.record_segment = index;
            self.record_offset = start;
            return Ok(Some(payload.freeze()));
        }
    }

    /// Next decoded record; a payload that does not decode is corruption
    /// at the frame that carried it.
    pub fn next_record(&mut self) -> Result<Option<Record>> {
        let Some(payload) = self.next_frame()? else {
            return Ok(None);
        };
        Record::decode(&payload).map(Some).map_err(|e| {
            corruption(self.record_segment, self.record_offset, &e.to_string())
        })
    }
}

/// Read every record of the log in `dir`: the latest checkpoint first, then
/// the segments after it.
pub fn read_all(dir: &Path) -> Result<Vec<Record>> {
    let mut records = Vec::new();
    let mut start = 0;

    if let Some((cp_dir, index)) = last_checkpoint(dir)? {
        let mut reader = SegmentReader::open_dir(&cp_dir)?;
        while let Some(record) = reader.next_record()? {
            records.push(record);
        }
        start = index + 1;
    }

    let segments = list_segments(dir)?
        .into_iter()
        .filter(|(index, _)| *index >= start)
        .collect();
    let mut reader = SegmentReader::new(segments);
    while let Some(record) = reader.next_record()? {
        records.push(record);
    }
    Ok(records)
}

fn corruption(segment: u64, offset: u64, reason: &str) -> WalError {
    WalError::Corruption {
        segment,
        offset,
        reason: reason.to_string(),
    }
}

/// Fill `buf` as far as possible; returns the number of bytes read
fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(filled)
}
