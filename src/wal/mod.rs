//! Write-Ahead Log (WAL) Module
//!
//! Provides durability through append-only, segmented logging.
//!
//! ## Responsibilities
//! - Append encoded records to the active segment, rolling by size
//! - CRC32 checksums for corruption detection
//! - Repair after corruption (truncate at the bad frame)
//! - Checkpoints that compact old segments
//!
//! ## Directory Layout
//! ```text
//! wal/
//! ├── checkpoint.00000004/     compacted segments 0..=4
//! │   └── 00000000
//! ├── 00000005
//! ├── 00000006
//! └── 00000007                 active segment
//! ```
//!
//! ## Frame Format
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │ Frame                                       │
//! │ ┌─────────┬─────────┬──────────┬──────────┐ │
//! │ │ Len (4) │ CRC (4) │ Type (1) │ Body     │ │
//! │ └─────────┴─────────┴──────────┴──────────┘ │
//! └─────────────────────────────────────────────┘
//! ```
//! `Len` and `CRC` cover the payload (type byte + bincode body).

mod checkpoint;
mod reader;
mod record;
mod recovery;
mod segment;
mod writer;

pub use checkpoint::{
    checkpoint, checkpoint_dir, delete_checkpoints, last_checkpoint, CheckpointStats,
};
pub use reader::{read_all, SegmentReader};
pub use record::{
    encode_entries, Record, RecordType, RefExemplar, RefFloatHistogramSample, RefHistogramSample,
    RefMetadata, RefSample, RefSeries,
};
pub use recovery::RepairResult;
pub use segment::{list_segments, segment_path, segments, FRAME_HEADER_SIZE, MAX_RECORD_SIZE};
pub use writer::Wal;
