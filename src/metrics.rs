//! Storage metrics
//!
//! Gauges and counters describing the series index and the appended data.
//! Metrics are always tracked; they are only exported when a registry is
//! supplied at open time.

use prometheus::core::Collector;
use prometheus::{IntCounter, IntGauge, Registry};
use tracing::warn;

use crate::error::Result;

#[derive(Clone)]
pub struct StorageMetrics {
    /// Series currently held in memory
    pub active_series: IntGauge,
    /// Series removed from memory but still referenced by WAL segments
    pub deleted_series: IntGauge,
    pub out_of_order_samples: IntCounter,
    pub created_series: IntCounter,
    pub removed_series: IntCounter,
    pub samples_appended: IntCounter,
    pub exemplars_appended: IntCounter,
    pub metadata_updates: IntCounter,
    registry: Option<Registry>,
}

impl StorageMetrics {
    pub fn new(registry: Option<Registry>) -> Result<Self> {
        let metrics = Self {
            active_series: IntGauge::new(
                "agent_wal_storage_active_series",
                "Current number of active series being tracked by the WAL storage",
            )?,
            deleted_series: IntGauge::new(
                "agent_wal_storage_deleted_series",
                "Current number of series marked for deletion from memory",
            )?,
            out_of_order_samples: IntCounter::new(
                "agent_wal_out_of_order_samples_total",
                "Total number of out of order samples ingestion failed attempts.",
            )?,
            created_series: IntCounter::new(
                "agent_wal_storage_created_series_total",
                "Total number of created series appended to the WAL",
            )?,
            removed_series: IntCounter::new(
                "agent_wal_storage_removed_series_total",
                "Total number of created series removed from the WAL",
            )?,
            samples_appended: IntCounter::new(
                "agent_wal_samples_appended_total",
                "Total number of samples appended to the WAL",
            )?,
            exemplars_appended: IntCounter::new(
                "agent_wal_exemplars_appended_total",
                "Total number of exemplars appended to the WAL",
            )?,
            metadata_updates: IntCounter::new(
                "agent_wal_metadata_updates_total",
                "Total number of metadata updates sent through the WAL",
            )?,
            registry,
        };

        if let Some(registry) = &metrics.registry {
            for collector in metrics.collectors() {
                match registry.register(collector) {
                    Ok(()) | Err(prometheus::Error::AlreadyReg) => {}
                    Err(e) => return Err(e.into()),
                }
            }
        }
        Ok(metrics)
    }

    fn collectors(&self) -> Vec<Box<dyn Collector>> {
        vec![
            Box::new(self.active_series.clone()),
            Box::new(self.deleted_series.clone()),
            Box::new(self.out_of_order_samples.clone()),
            Box::new(self.created_series.clone()),
            Box::new(self.removed_series.clone()),
            Box::new(self.samples_appended.clone()),
            Box::new(self.exemplars_appended.clone()),
            Box::new(self.metadata_updates.clone()),
        ]
    }

    /// Remove the metrics from the registry they were exported to
    pub fn unregister(&self) {
        let Some(registry) = &self.registry else {
            return;
        };
        for collector in self.collectors() {
            if let Err(e) = registry.unregister(collector) {
                warn!(error = %e, "failed to unregister WAL storage metric");
            }
        }
    }
}
