//! Exemplars and series metadata

use serde::{Deserialize, Serialize};

use super::Labels;

/// Max number of characters (names + values) allowed in an exemplar label set.
/// Quotes, equal signs and commas used when rendering are not counted.
pub const EXEMPLAR_MAX_LABEL_SET_LENGTH: usize = 128;

/// A sample-level annotation, typically carrying a trace id
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Exemplar {
    pub labels: Labels,
    pub value: f64,
    pub ts: i64,
    pub has_ts: bool,
}

impl Exemplar {
    /// Same labels, timestamp and value
    pub fn equals(&self, other: &Exemplar) -> bool {
        self.labels == other.labels && self.ts == other.ts && self.value == other.value
    }
}

/// Kind of metric a series belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MetricType {
    #[default]
    Unknown,
    Counter,
    Gauge,
    Histogram,
    GaugeHistogram,
    Summary,
    Info,
    StateSet,
}

/// Descriptive metadata attached to a series
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Metadata {
    pub metric_type: MetricType,
    pub unit: String,
    pub help: String,
}
