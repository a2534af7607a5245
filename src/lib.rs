//! # agentwal
//!
//! Durable write-ahead log storage for a telemetry agent:
//! - Segmented WAL with CRC32-checked frames and checkpoints
//! - Sharded in-memory series index with garbage collection
//! - Batched append transactions (samples, histograms, exemplars, metadata)
//! - Replay with corruption repair on startup
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │            Scrapers / receivers (many appenders)             │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │ append / commit / rollback
//! ┌─────────────────────▼───────────────────────────────────────┐
//! │                        Storage                               │
//! │        (close lock: commits shared, close exclusive)         │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//!          ┌────────────┴────────────┐
//!          │                         │
//!          ▼                         ▼
//!   ┌─────────────┐          ┌──────────────┐
//!   │     WAL     │          │ StripeSeries │
//!   │  (Segments) │          │ (N RwLocks)  │
//!   └──────┬──────┘          └──────────────┘
//!          │ truncate(mint)
//!          ▼
//!   ┌─────────────┐
//!   │ Checkpoint  │
//!   └─────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod config;
pub mod error;

pub mod metrics;
pub mod model;
pub mod series;
pub mod storage;
pub mod wal;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use config::{Config, WalSyncStrategy};
pub use error::{Result, WalError};
pub use model::{
    Exemplar, FloatHistogram, Histogram, HistogramValue, Label, Labels, Metadata, MetricType,
    SeriesRef,
};
pub use storage::{Appender, ReplayStats, Storage, WriteNotified};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of agentwal
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
