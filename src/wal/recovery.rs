//! WAL Recovery
//!
//! Repairs a log after replay hit a corrupted frame.

use std::fs::{self, OpenOptions};

use tracing::{debug, info, warn};

use crate::error::{Result, WalError};

use super::segment::{list_segments, segment_path, SegmentFile};
use super::Wal;

/// Result of a repair operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepairResult {
    /// Segment that held the corrupted frame
    pub segment: u64,
    /// Offset the segment was truncated to
    pub offset: u64,
    /// Number of later segments deleted
    pub segments_deleted: usize,
    /// Bytes cut from the corrupted segment
    pub bytes_truncated: u64,
}

impl Wal {
    /// Repair the log after a `Corruption` error.
    ///
    /// This will:
    /// 1. Stop writing to the active segment
    /// 2. Delete every segment after the corrupted one
    /// 3. Truncate the corrupted segment at the offset of the bad frame
    /// 4. Continue writing in a fresh segment after it
    ///
    /// Everything before the corruption is kept.
    pub fn repair(&self, err: &WalError) -> Result<RepairResult> {
        let (segment, offset) = match err {
            WalError::Corruption {
                segment, offset, ..
            } => (*segment, *offset),
            other => {
                return Err(WalError::Repair(format!(
                    "cannot repair non-corruption error: {}",
                    other
                )))
            }
        };
        warn!(segment, offset, "starting corruption repair");

        let mut state = self.state.lock();
        let segments = list_segments(&self.dir)?;
        match segments.first() {
            None => return Err(WalError::Repair("no segments found".to_string())),
            Some((first, _)) if segment < *first => {
                return Err(WalError::Repair(format!(
                    "corruption in segment {} is before first segment {}",
                    segment, first
                )))
            }
            _ => {}
        }

        if let Some(mut active) = state.active.take() {
            active.flush()?;
        }

        let mut segments_deleted = 0;
        for (index, path) in segments.iter().filter(|(index, _)| *index > segment) {
            debug!(segment = *index, "deleting segment after corruption");
            fs::remove_file(path)?;
            segments_deleted += 1;
        }

        let file = OpenOptions::new()
            .write(true)
            .open(segment_path(&self.dir, segment))?;
        let len = file.metadata()?.len();
        let offset = offset.min(len);
        file.set_len(offset)?;
        file.sync_all()?;

        state.active = Some(SegmentFile::create(&self.dir, segment + 1)?);
        state.unsynced = 0;

        let result = RepairResult {
            segment,
            offset,
            segments_deleted,
            bytes_truncated: len - offset,
        };
        info!(
            segment,
            offset,
            segments_deleted,
            bytes_truncated = result.bytes_truncated,
            "repaired WAL"
        );
        Ok(result)
    }
}
