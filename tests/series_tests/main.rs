//! Tests for the series index
//!
//! These tests verify:
//! - Concurrent get_or_set calls converge on one series
//! - Hash collisions keep distinct label sets apart
//! - Garbage collection against concurrent writers
//! - Iteration while writers insert


use std::sync::Arc;

use agentwal::series::MemSeries;
use agentwal::{Labels, SeriesRef};

// =============================================================================
// Helper Functions
// =============================================================================

pub fn labels(name: &str) -> Labels {
    Labels::from_pairs([("__name__", name), ("instance", "localhost:9090")])
}

pub fn new_series(id: u64, name: &str, last_ts: i64) -> Arc<MemSeries> {
    Arc::new(MemSeries::new(SeriesRef(id), labels(name), last_ts))
}
