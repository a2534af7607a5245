//! WAL Segments
//!
//! Segment files are named by their zero-padded 8-digit index and hold a
//! sequence of frames: `[len: u32 LE][crc32: u32 LE][payload]`.

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::error::Result;

/// Size of the frame header (length + checksum)
pub const FRAME_HEADER_SIZE: u64 = 8;

/// Upper bound on a single record; larger lengths are treated as corruption
pub const MAX_RECORD_SIZE: u32 = 1 << 30;

/// Path of the segment with the given index inside `dir`
pub fn segment_path(dir: &Path, index: u64) -> PathBuf {
    dir.join(format!("{:08}", index))
}

/// Parse a segment index from a file name (exactly 8 ASCII digits)
pub fn parse_segment_name(name: &str) -> Option<u64> {
    if name.len() != 8 || !name.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    name.parse().ok()
}

/// All segment files in `dir`, sorted by index
pub fn list_segments(dir: &Path) -> Result<Vec<(u64, PathBuf)>> {
    let mut segments = Vec::new();
    if !dir.exists() {
        return Ok(segments);
    }
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let index = path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(parse_segment_name);
        if let Some(index) = index {
            segments.push((index, path));
        }
    }
    segments.sort_by_key(|(index, _)| *index);
    Ok(segments)
}

/// First and last segment index in `dir`, `None` when there are no segments
pub fn segments(dir: &Path) -> Result<Option<(u64, u64)>> {
    let segments = list_segments(dir)?;
    Ok(match (segments.first(), segments.last()) {
        (Some((first, _)), Some((last, _))) => Some((*first, *last)),
        _ => None,
    })
}

/// A segment file open for appending frames
pub(crate) struct SegmentFile {
    index: u64,
    /// Buffered writer for performance
    writer: BufWriter<File>,
    /// Bytes in the file, including buffered ones
    size: u64,
}

impl SegmentFile {
    /// Create (or reopen for append) the segment `index` in `dir`
    pub fn create(dir: &Path, index: u64) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(segment_path(dir, index))?;
        let size = file.metadata()?.len();
        Ok(Self {
            index,
            writer: BufWriter::new(file),
            size,
        })
    }

    pub fn index(&self) -> u64 {
        self.index
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// Write one frame around `payload`
    pub fn write_frame(&mut self, payload: &[u8]) -> Result<()> {
        let len = payload.len() as u32;
        let crc = crc32fast::hash(payload);

        self.writer.write_all(&len.to_le_bytes())?;
        self.writer.write_all(&crc.to_le_bytes())?;
        self.writer.write_all(payload)?;

        self.size += FRAME_HEADER_SIZE + payload.len() as u64;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }

    /// Flush buffered frames and fsync the file
    pub fn sync(&mut self) -> Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        Ok(())
    }
}
