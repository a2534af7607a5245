//! Tests for the WAL-backed storage
//!
//! These tests verify:
//! - Append transactions (commit, rollback, validation)
//! - Replay of the log on open, including duplicates and corruption
//! - Truncation, garbage collection and checkpoints
//! - Shutdown: staleness markers and close semantics

mod replay_tests;
mod truncate_tests;

use std::path::Path;
use std::time::Duration;

use agentwal::config::WalSyncStrategy;
use agentwal::wal::{self, Record};
use agentwal::{Config, Labels, Storage};

// =============================================================================
// Helper Functions
// =============================================================================

pub fn test_config(dir: &Path) -> Config {
    Config::builder()
        .data_dir(dir)
        .wal_sync_strategy(WalSyncStrategy::EveryWrite)
        .stripe_size(16)
        .staleness_wait_timeout(Duration::from_millis(200))
        .staleness_poll_interval(Duration::from_millis(10))
        .build()
}

pub fn open_storage(dir: &Path) -> Storage {
    Storage::open(test_config(dir)).unwrap()
}

pub fn labels(pairs: &[(&str, &str)]) -> Labels {
    Labels::from_pairs(pairs.iter().copied())
}

pub fn series_labels(name: &str) -> Labels {
    labels(&[("__name__", name), ("job", "test")])
}

/// Every record currently in the log of `dir`
pub fn wal_records(dir: &Path) -> Vec<Record> {
    wal::read_all(&dir.join("wal")).unwrap()
}

pub fn record_types(records: &[Record]) -> Vec<wal::RecordType> {
    records.iter().map(|r| r.record_type()).collect()
}
