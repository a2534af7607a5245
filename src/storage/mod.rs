//! Storage Module
//!
//! The WAL-backed series storage of the agent.
//!
//! ## Responsibilities
//! - Replay the log (checkpoint first, then segments) on open
//! - Hand out appenders that batch samples and commit them to the log
//! - Garbage collect stale series and checkpoint old segments
//! - Write staleness markers on shutdown
//!
//! ## Lifecycle
//! ```text
//!   open ──► replay ──┬─► (corruption) ──► repair ──┬─► ready
//!                     │                            └─► discard log, error
//!                     └─► ready
//!
//!   ready: appender() / commit() / truncate(mint) ... close()
//! ```

mod appender;
mod replay;

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use bytes::BytesMut;
use parking_lot::{Mutex, RwLock};
use prometheus::Registry;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::error::{Result, WalError};
use crate::metrics::StorageMetrics;
use crate::model::{stale_nan, Labels, SeriesRef};
use crate::series::{MemSeries, StripeSeries};
use crate::wal::{self, encode_entries, RecordType, Wal};

pub use appender::Appender;
pub use replay::ReplayStats;

use appender::Pending;

/// Bound of the queue feeding series to `write_staleness_markers`
const STALENESS_QUEUE_CAPACITY: usize = 128;

/// Observer invoked after every successful commit
pub trait WriteNotified: Send + Sync {
    fn notify(&self);
}

/// WAL-backed storage for series and samples
///
/// ## Concurrency:
/// - `close_lock`: commits, rollbacks and truncation hold it shared; `close`
///   holds it exclusively, so in-flight writes finish before the log closes
/// - `series`: sharded index, safe for concurrent appenders
/// - `deleted`: only mutated by truncation and replay
/// - All methods use `&self`
pub struct Storage {
    config: Config,

    /// Durable log (internal Mutex around the active segment)
    wal: Wal,

    /// `true` once closed
    close_lock: RwLock<bool>,

    /// In-memory series index
    series: StripeSeries,

    /// Last allocated series ref (atomic, lock-free)
    next_ref: AtomicU64,

    /// Series removed from memory, mapped to the last segment that may still
    /// reference them
    deleted: Mutex<HashMap<SeriesRef, u64>>,

    metrics: StorageMetrics,

    notifier: RwLock<Option<Arc<dyn WriteNotified>>>,

    /// Free-list of cleared appender buffers
    pool: Mutex<Vec<Pending>>,

    replay_stats: ReplayStats,
}

impl Storage {
    /// Open or create storage in `config.data_dir`
    ///
    /// On startup:
    /// 1. Validate the configuration
    /// 2. Open the log (writing starts in a fresh segment)
    /// 3. Replay the last checkpoint and every later segment
    /// 4. On replay failure, repair the log; if that fails too, discard
    ///    the whole log and return the original error
    pub fn open(config: Config) -> Result<Self> {
        Self::open_inner(config, None)
    }

    /// Like `open`, exporting the storage metrics to `registry`
    pub fn open_with_registry(config: Config, registry: &Registry) -> Result<Self> {
        Self::open_inner(config, Some(registry.clone()))
    }

    fn open_inner(config: Config, registry: Option<Registry>) -> Result<Self> {
        // Step 1: Reject invalid configuration before touching the disk
        config.validate()?;

        // Step 2: Open the log and metrics
        let wal_dir = config.wal_dir();
        let wal = Wal::open(&wal_dir, config.segment_size, config.wal_sync_strategy)?;
        let metrics = StorageMetrics::new(registry)?;

        let mut storage = Self {
            series: StripeSeries::new(config.stripe_size),
            config,
            wal,
            close_lock: RwLock::new(false),
            next_ref: AtomicU64::new(0),
            deleted: Mutex::new(HashMap::new()),
            metrics,
            notifier: RwLock::new(None),
            pool: Mutex::new(Vec::new()),
            replay_stats: ReplayStats::default(),
        };

        // Step 3: Replay
        let mut stats = ReplayStats::default();
        if let Err(err) = storage.replay_wal(&mut stats) {
            // Step 4: Repair, or discard everything as a last resort
            warn!(
                error = %err,
                corruption = err.is_corruption(),
                "encountered WAL read error, attempting repair"
            );
            match storage.wal.repair(&err) {
                Ok(result) => stats.repaired = Some(result),
                Err(repair_err) => {
                    warn!(error = %repair_err, "repair failed, truncating WAL");
                    if let Err(e) = storage.wal.truncate(u64::MAX) {
                        error!(error = %e, "failed to truncate WAL");
                    }
                    if let Err(e) = wal::delete_checkpoints(&wal_dir, u64::MAX) {
                        error!(error = %e, "failed to delete checkpoints");
                    }
                    return Err(WalError::Unrecoverable(Box::new(err)));
                }
            }
        }

        storage
            .metrics
            .deleted_series
            .set(storage.deleted.lock().len() as i64);
        info!(
            checkpoint = ?stats.checkpoint,
            segments = stats.segments_replayed,
            series = storage.series.len(),
            duplicates = stats.duplicate_series,
            samples = stats.samples_replayed,
            "WAL replay complete"
        );
        storage.replay_stats = stats;
        Ok(storage)
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// New append transaction
    pub fn appender(&self) -> Appender<'_> {
        let pending = self.pool.lock().pop().unwrap_or_default();
        Appender::new(self, pending)
    }

    /// Return cleared buffers to the free-list
    fn release(&self, mut pending: Pending) {
        pending.clear();
        let mut pool = self.pool.lock();
        if pool.len() < self.config.appender_pool_limit {
            pool.push(pending);
        }
    }

    /// Install the observer notified after every successful commit
    pub fn set_notifier(&self, notifier: Arc<dyn WriteNotified>) {
        *self.notifier.write() = Some(notifier);
    }

    fn notify(&self) {
        if let Some(notifier) = self.notifier.read().as_ref() {
            notifier.notify();
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if *self.close_lock.read() {
            return Err(WalError::Closed);
        }
        Ok(())
    }

    /// Allocate the next series ref
    fn allocate_ref(&self) -> SeriesRef {
        SeriesRef(self.next_ref.fetch_add(1, Ordering::SeqCst) + 1)
    }

    // =========================================================================
    // Truncation
    // =========================================================================

    /// Remove series without samples since `mint` and checkpoint the older
    /// two thirds of the segments.
    ///
    /// Expected to be called by a single periodic caller.
    pub fn truncate(&self, mint: i64) -> Result<()> {
        let closed = self.close_lock.read();
        if *closed {
            return Err(WalError::Closed);
        }
        let start = Instant::now();

        self.gc(mint)?;
        info!(duration = ?start.elapsed(), "series GC completed");

        let Some((first, last)) = self.wal.segment_range()? else {
            return Ok(());
        };

        // Start a new segment so low-volume instances don't keep more log than needed
        self.wal.next_segment()?;

        // Never consider the last segment for the checkpoint
        if last == 0 {
            return Ok(());
        }
        let last = last - 1;
        if last <= first {
            return Ok(());
        }
        // The lower two thirds of segments should contain mostly obsolete samples
        let target = first + (last - first) * 2 / 3;
        if target <= first {
            return Ok(());
        }

        let keep = |ref_id: SeriesRef| {
            if self.series.get_by_id(ref_id).is_some() {
                return true;
            }
            matches!(self.deleted.lock().get(&ref_id), Some(&horizon) if horizon > target)
        };
        wal::checkpoint(&self.wal, first, target, keep, mint)?;

        if let Err(e) = self.wal.truncate(target + 1) {
            error!(error = %e, "truncating segments failed");
        }

        // Segments up to the checkpoint are gone; stop tracking series only they referenced
        {
            let mut deleted = self.deleted.lock();
            let before = deleted.len();
            deleted.retain(|_, horizon| *horizon > target);
            self.metrics
                .removed_series
                .inc_by((before - deleted.len()) as u64);
            self.metrics.deleted_series.set(deleted.len() as i64);
        }

        if let Err(e) = wal::delete_checkpoints(self.wal.dir(), target) {
            error!(error = %e, "delete old checkpoints failed");
        }
        info!(
            first,
            last = target,
            duration = ?start.elapsed(),
            "WAL checkpoint complete"
        );
        drop(closed);
        Ok(())
    }

    /// Drop stale series from memory and log tombstones for them
    fn gc(&self, mint: i64) -> Result<()> {
        let last = self
            .wal
            .segment_range()?
            .map(|(_, last)| last)
            .unwrap_or(0);

        let deleted = self.series.gc(mint);
        if deleted.is_empty() {
            return Ok(());
        }
        self.metrics.active_series.sub(deleted.len() as i64);

        {
            let mut tracked = self.deleted.lock();
            for ref_id in &deleted {
                tracked.insert(*ref_id, last);
            }
            self.metrics.deleted_series.set(tracked.len() as i64);
        }

        let mut refs: Vec<SeriesRef> = deleted.into_iter().collect();
        refs.sort();
        let mut buf = BytesMut::new();
        let logged = encode_entries(RecordType::Tombstones, &refs, &mut buf)
            .and_then(|()| self.wal.log(&buf));
        if let Err(e) = logged {
            warn!(error = %e, series = refs.len(), "failed to log tombstones");
        }
        Ok(())
    }

    // =========================================================================
    // Shutdown
    // =========================================================================

    /// Append one stale marker per series, commit, and wait until
    /// `remote_ts` reports that remote write caught up (or time runs out).
    ///
    /// Fails with [`WalError::Closed`] after close.
    pub fn write_staleness_markers<F>(&self, remote_ts: F) -> Result<()>
    where
        F: Fn() -> i64,
    {
        // The sweep holds the GC lock, which truncate takes under the close lock
        self.ensure_open()?;
        let mut last_ts = None;
        let mut app = self.appender();

        self.series.for_each(STALENESS_QUEUE_CAPACITY, |series| {
            let ts = now_millis();
            app.append_known(&series, ts, stale_nan());
            // Remote write timestamps only have second precision
            last_ts = Some((ts / 1000) * 1000);
        });

        app.commit()?;
        drop(app);

        if let Some(last_ts) = last_ts {
            self.wait_for_remote(last_ts, remote_ts);
        }
        Ok(())
    }

    fn wait_for_remote<F>(&self, last_ts: i64, remote_ts: F)
    where
        F: Fn() -> i64,
    {
        info!("waiting for remote write to write staleness markers...");
        let start = Instant::now();
        let timeout = self.config.staleness_wait_timeout;
        loop {
            let written = remote_ts();
            if written >= last_ts {
                info!(duration = ?start.elapsed(), "remote write wrote staleness markers");
                return;
            }
            let elapsed = start.elapsed();
            if elapsed >= timeout {
                error!("timed out waiting for staleness markers to be written");
                return;
            }
            info!(
                remote_ts = written,
                last_ts, "remote write hasn't written staleness markers yet"
            );
            let remaining = timeout - elapsed;
            thread::sleep(self.config.staleness_poll_interval.min(remaining));
        }
    }

    /// Close the storage; later operations fail with `WalError::Closed`.
    ///
    /// Waits for in-flight commits to finish.
    pub fn close(&self) -> Result<()> {
        let mut closed = self.close_lock.write();
        if *closed {
            return Err(WalError::AlreadyClosed);
        }
        *closed = true;
        self.metrics.unregister();
        self.wal.close()
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Root data directory
    pub fn directory(&self) -> &Path {
        &self.config.data_dir
    }

    pub fn wal_dir(&self) -> &Path {
        self.wal.dir()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn metrics(&self) -> &StorageMetrics {
        &self.metrics
    }

    pub fn replay_stats(&self) -> &ReplayStats {
        &self.replay_stats
    }

    pub fn get_series(&self, ref_id: SeriesRef) -> Option<Arc<MemSeries>> {
        self.series.get_by_id(ref_id)
    }

    /// Series with exactly these labels
    pub fn lookup(&self, labels: &Labels) -> Option<Arc<MemSeries>> {
        self.series.get_by_hash(labels.hash(), labels)
    }

    pub fn series_count(&self) -> usize {
        self.series.len()
    }

    /// Last allocated series ref
    pub fn next_ref(&self) -> u64 {
        self.next_ref.load(Ordering::SeqCst)
    }

    /// Snapshot of the series kept for checkpoints after removal
    pub fn deleted_series(&self) -> HashMap<SeriesRef, u64> {
        self.deleted.lock().clone()
    }

    pub fn is_closed(&self) -> bool {
        *self.close_lock.read()
    }
}

impl Drop for Storage {
    fn drop(&mut self) {
        if !*self.close_lock.get_mut() {
            if let Err(e) = self.close() {
                warn!(error = %e, "failed to close WAL storage on drop");
            }
        }
    }
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
