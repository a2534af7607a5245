//! Configuration for agentwal
//!
//! Centralized configuration with sensible defaults.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Result, WalError};

/// Main configuration for a WAL storage instance
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Storage Configuration
    // -------------------------------------------------------------------------
    /// Root directory of the storage.
    /// Internal structure:
    ///   {data_dir}/
    ///     └── wal/
    ///         ├── 00000007              (segment files)
    ///         ├── 00000008
    ///         └── checkpoint.00000006/  (compacted snapshot)
    pub data_dir: PathBuf,

    // -------------------------------------------------------------------------
    // Log Configuration
    // -------------------------------------------------------------------------
    /// Sync strategy: how often to fsync the active segment
    pub wal_sync_strategy: WalSyncStrategy,

    /// Size in bytes after which the active segment is rolled
    pub segment_size: u64,

    // -------------------------------------------------------------------------
    // Series Index Configuration
    // -------------------------------------------------------------------------
    /// Number of shards in the series index (must be a power of two)
    pub stripe_size: usize,

    /// Bound of the decoded-batch queue used while replaying a segment
    pub replay_queue_capacity: usize,

    /// Max number of recycled appender buffer sets kept around
    pub appender_pool_limit: usize,

    // -------------------------------------------------------------------------
    // Shutdown Configuration
    // -------------------------------------------------------------------------
    /// How long `write_staleness_markers` waits for remote write to catch up
    pub staleness_wait_timeout: Duration,

    /// Poll interval while waiting for remote write to catch up
    pub staleness_poll_interval: Duration,
}

/// WAL sync strategy
#[derive(Debug, Clone, Copy)]
pub enum WalSyncStrategy {
    /// fsync after every logged record (safest, slowest)
    EveryWrite,

    /// fsync after N logged records (balanced durability/performance)
    EveryNEntries { count: usize },
}

/// Default segment size: 128 MB
pub const DEFAULT_SEGMENT_SIZE: u64 = 128 * 1024 * 1024;

/// Default shard count of the series index
pub const DEFAULT_STRIPE_SIZE: usize = 4096;

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./agentwal_data"),
            wal_sync_strategy: WalSyncStrategy::EveryNEntries { count: 100 },
            segment_size: DEFAULT_SEGMENT_SIZE,
            stripe_size: DEFAULT_STRIPE_SIZE,
            replay_queue_capacity: 10,
            appender_pool_limit: 64,
            staleness_wait_timeout: Duration::from_secs(60),
            staleness_poll_interval: Duration::from_secs(5),
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Directory holding the segment files and checkpoints
    pub fn wal_dir(&self) -> PathBuf {
        self.data_dir.join("wal")
    }

    /// Reject values the storage cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.stripe_size == 0 || !self.stripe_size.is_power_of_two() {
            return Err(WalError::Config(format!(
                "stripe_size must be a power of two, got {}",
                self.stripe_size
            )));
        }
        if self.segment_size == 0 {
            return Err(WalError::Config("segment_size must be non-zero".to_string()));
        }
        if self.replay_queue_capacity == 0 {
            return Err(WalError::Config(
                "replay_queue_capacity must be non-zero".to_string(),
            ));
        }
        if let WalSyncStrategy::EveryNEntries { count: 0 } = self.wal_sync_strategy {
            return Err(WalError::Config(
                "EveryNEntries sync count must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the data directory (root for all storage)
    pub fn data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.data_dir = path.into();
        self
    }

    /// Set the WAL sync strategy
    pub fn wal_sync_strategy(mut self, strategy: WalSyncStrategy) -> Self {
        self.config.wal_sync_strategy = strategy;
        self
    }

    /// Set the segment roll threshold (in bytes)
    pub fn segment_size(mut self, size: u64) -> Self {
        self.config.segment_size = size;
        self
    }

    /// Set the number of series index shards
    pub fn stripe_size(mut self, size: usize) -> Self {
        self.config.stripe_size = size;
        self
    }

    /// Set the replay queue bound
    pub fn replay_queue_capacity(mut self, capacity: usize) -> Self {
        self.config.replay_queue_capacity = capacity;
        self
    }

    /// Set how many appender buffer sets are recycled
    pub fn appender_pool_limit(mut self, limit: usize) -> Self {
        self.config.appender_pool_limit = limit;
        self
    }

    /// Set the staleness marker wait timeout
    pub fn staleness_wait_timeout(mut self, timeout: Duration) -> Self {
        self.config.staleness_wait_timeout = timeout;
        self
    }

    /// Set the staleness marker poll interval
    pub fn staleness_poll_interval(mut self, interval: Duration) -> Self {
        self.config.staleness_poll_interval = interval;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
