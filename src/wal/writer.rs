//! WAL Writer
//!
//! Handles appending records to the active segment and rolling segments.

use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::config::WalSyncStrategy;
use crate::error::{Result, WalError};

use super::checkpoint;
use super::segment::{self, list_segments, SegmentFile, FRAME_HEADER_SIZE};

/// Segmented write-ahead log
///
/// ## Concurrency:
/// - `state`: Protected by a Mutex; one record is written at a time
/// - All methods use `&self`
pub struct Wal {
    /// Directory holding the segments and checkpoints
    pub(super) dir: PathBuf,
    /// Size after which the active segment is rolled
    pub(super) segment_size: u64,
    /// How often the active segment is fsynced
    sync_strategy: WalSyncStrategy,
    pub(super) state: Mutex<WriterState>,
}

pub(super) struct WriterState {
    /// `None` once the log is closed
    pub(super) active: Option<SegmentFile>,
    /// Records written since the last fsync
    pub(super) unsynced: usize,
}

impl Wal {
    /// Open the log in `dir`, creating it if needed.
    ///
    /// Writing always starts in a fresh segment after the last existing one,
    /// so a torn tail of a previous run is never appended to.
    pub fn open(dir: &Path, segment_size: u64, sync_strategy: WalSyncStrategy) -> Result<Self> {
        fs::create_dir_all(dir)?;
        checkpoint::remove_tmp_checkpoints(dir)?;

        let next = match segment::segments(dir)? {
            Some((_, last)) => last + 1,
            None => 0,
        };
        let active = SegmentFile::create(dir, next)?;
        debug!(dir = %dir.display(), segment = next, "opened WAL");

        Ok(Self {
            dir: dir.to_path_buf(),
            segment_size,
            sync_strategy,
            state: Mutex::new(WriterState {
                active: Some(active),
                unsynced: 0,
            }),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn segment_size(&self) -> u64 {
        self.segment_size
    }

    /// Append one encoded record as a single frame
    pub fn log(&self, record: &[u8]) -> Result<()> {
        let mut state = self.state.lock();
        let state = &mut *state;

        let needs_roll = {
            let active = state.active.as_ref().ok_or(WalError::Closed)?;
            let frame = FRAME_HEADER_SIZE + record.len() as u64;
            active.size() > 0 && active.size() + frame > self.segment_size
        };
        if needs_roll {
            self.roll(state)?;
        }

        let active = state.active.as_mut().ok_or(WalError::Closed)?;
        active.write_frame(record)?;
        state.unsynced += 1;

        let sync = match self.sync_strategy {
            WalSyncStrategy::EveryWrite => true,
            WalSyncStrategy::EveryNEntries { count } => state.unsynced >= count,
        };
        if sync {
            active.sync()?;
            state.unsynced = 0;
        } else {
            active.flush()?;
        }
        Ok(())
    }

    /// Close the active segment and start the next one; returns the new index
    pub fn next_segment(&self) -> Result<u64> {
        let mut state = self.state.lock();
        self.roll(&mut state)
    }

    fn roll(&self, state: &mut WriterState) -> Result<u64> {
        let active = state.active.as_mut().ok_or(WalError::Closed)?;
        active.sync()?;
        let next = SegmentFile::create(&self.dir, active.index() + 1)?;
        let index = next.index();
        *active = next;
        state.unsynced = 0;
        debug!(segment = index, "rolled WAL segment");
        Ok(index)
    }

    /// First and last segment index on disk
    pub fn segment_range(&self) -> Result<Option<(u64, u64)>> {
        segment::segments(&self.dir)
    }

    /// Index of the segment currently written to
    pub fn active_segment(&self) -> Option<u64> {
        self.state.lock().active.as_ref().map(|a| a.index())
    }

    /// Delete every segment with index below `index`
    pub fn truncate(&self, index: u64) -> Result<()> {
        for (i, path) in list_segments(&self.dir)? {
            if i >= index {
                break;
            }
            fs::remove_file(&path)?;
        }
        Ok(())
    }

    /// Flush, fsync and release the active segment
    pub fn close(&self) -> Result<()> {
        let mut state = self.state.lock();
        let mut active = state.active.take().ok_or(WalError::Closed)?;
        active.sync()
    }
}

impl Drop for Wal {
    fn drop(&mut self) {
        if let Some(active) = self.state.get_mut().active.as_mut() {
            if let Err(e) = active.sync() {
                warn!(error = %e, "failed to sync WAL segment on drop");
            }
        }
    }
}
