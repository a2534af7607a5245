//! Data Model
//!
//! Value types flowing through the storage: label sets, samples, exemplars,
//! metadata and native histograms.

mod exemplar;
mod histogram;
mod labels;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use exemplar::{Exemplar, Metadata, MetricType, EXEMPLAR_MAX_LABEL_SET_LENGTH};
pub use histogram::{
    CounterResetHint, FloatHistogram, Histogram, HistogramValue, Span, CUSTOM_BUCKETS_SCHEMA,
};
pub use labels::{Label, Labels};

/// Compact identifier of a series, unique for the lifetime of the process.
///
/// `SeriesRef(0)` means "not resolved yet"; allocated refs start at 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SeriesRef(pub u64);

impl SeriesRef {
    pub const UNRESOLVED: SeriesRef = SeriesRef(0);
}

impl fmt::Display for SeriesRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Bit pattern of the stale marker NaN
pub const STALE_NAN_BITS: u64 = 0x7ff0_0000_0000_0002;

/// Sample value signalling that a series is no longer produced
pub fn stale_nan() -> f64 {
    f64::from_bits(STALE_NAN_BITS)
}

/// Whether `v` is the stale marker (plain NaN is not)
pub fn is_stale_nan(v: f64) -> bool {
    v.to_bits() == STALE_NAN_BITS
}
