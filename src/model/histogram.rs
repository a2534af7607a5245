//! Native histograms
//!
//! Two flavours share one layout: `Histogram` stores integer bucket counts as
//! deltas to the previous bucket, `FloatHistogram` stores absolute float
//! counts. Either may use custom bucket boundaries instead of an exponential
//! schema, in which case it is logged under a separate record type.

use serde::{Deserialize, Serialize};

use crate::error::{Result, WalError};

/// Schema marking a histogram with explicit (custom) bucket boundaries
pub const CUSTOM_BUCKETS_SCHEMA: i32 = -53;

/// Valid range for exponential schemas
pub const MIN_EXPONENTIAL_SCHEMA: i32 = -4;
pub const MAX_EXPONENTIAL_SCHEMA: i32 = 8;

/// Hint about counter resets between consecutive histograms of a series
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CounterResetHint {
    #[default]
    Unknown,
    CounterReset,
    NotCounterReset,
    Gauge,
}

/// A run of consecutive buckets, `offset` buckets after the previous span
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub offset: i32,
    pub length: u32,
}

impl Span {
    pub fn new(offset: i32, length: u32) -> Self {
        Self { offset, length }
    }
}

/// Integer native histogram
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Histogram {
    pub counter_reset_hint: CounterResetHint,
    pub schema: i32,
    pub zero_threshold: f64,
    pub zero_count: u64,
    pub count: u64,
    pub sum: f64,
    pub positive_spans: Vec<Span>,
    pub negative_spans: Vec<Span>,
    /// Delta-encoded: each entry is the difference to the previous bucket
    pub positive_buckets: Vec<i64>,
    pub negative_buckets: Vec<i64>,
    /// Upper bounds of the custom buckets (only with `CUSTOM_BUCKETS_SCHEMA`)
    pub custom_values: Vec<f64>,
}

/// Float native histogram
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FloatHistogram {
    pub counter_reset_hint: CounterResetHint,
    pub schema: i32,
    pub zero_threshold: f64,
    pub zero_count: f64,
    pub count: f64,
    pub sum: f64,
    pub positive_spans: Vec<Span>,
    pub negative_spans: Vec<Span>,
    /// Absolute bucket counts
    pub positive_buckets: Vec<f64>,
    pub negative_buckets: Vec<f64>,
    pub custom_values: Vec<f64>,
}

/// A histogram sample of either flavour
#[derive(Debug, Clone, PartialEq)]
pub enum HistogramValue {
    Int(Histogram),
    Float(FloatHistogram),
}

impl HistogramValue {
    pub fn validate(&self) -> Result<()> {
        match self {
            HistogramValue::Int(h) => h.validate(),
            HistogramValue::Float(fh) => fh.validate(),
        }
    }
}

impl Histogram {
    pub fn uses_custom_buckets(&self) -> bool {
        self.schema == CUSTOM_BUCKETS_SCHEMA
    }

    /// Check the structural invariants of the histogram
    pub fn validate(&self) -> Result<()> {
        validate_layout(
            self.schema,
            &self.custom_values,
            &self.positive_spans,
            self.positive_buckets.len(),
            &self.negative_spans,
            self.negative_buckets.len(),
            self.zero_count == 0 && self.zero_threshold == 0.0,
        )?;

        let negative = delta_bucket_total(&self.negative_buckets, "negative")?;
        let positive = delta_bucket_total(&self.positive_buckets, "positive")?;
        let sum_of_buckets = negative
            .checked_add(positive)
            .and_then(|total| total.checked_add(self.zero_count))
            .ok_or_else(|| {
                WalError::InvalidHistogram("observation count of buckets overflows".to_string())
            })?;

        if self.sum.is_nan() {
            // A NaN observation lands in no bucket, so count may exceed the bucket sum.
            if sum_of_buckets > self.count {
                return Err(WalError::InvalidHistogram(format!(
                    "{} observations found in buckets, but the Count field is {}",
                    sum_of_buckets, self.count
                )));
            }
        } else if sum_of_buckets != self.count {
            return Err(WalError::InvalidHistogram(format!(
                "{} observations found in buckets, but the Count field is {}",
                sum_of_buckets, self.count
            )));
        }
        Ok(())
    }
}

impl FloatHistogram {
    pub fn uses_custom_buckets(&self) -> bool {
        self.schema == CUSTOM_BUCKETS_SCHEMA
    }

    /// Check the structural invariants of the histogram.
    ///
    /// The total count is not compared with the bucket sum: float rounding
    /// makes that comparison unreliable.
    pub fn validate(&self) -> Result<()> {
        validate_layout(
            self.schema,
            &self.custom_values,
            &self.positive_spans,
            self.positive_buckets.len(),
            &self.negative_spans,
            self.negative_buckets.len(),
            self.zero_count == 0.0 && self.zero_threshold == 0.0,
        )?;

        for (side, buckets) in [
            ("negative", &self.negative_buckets),
            ("positive", &self.positive_buckets),
        ] {
            if let Some((i, c)) = buckets.iter().enumerate().find(|(_, c)| **c < 0.0) {
                return Err(WalError::InvalidHistogram(format!(
                    "{} side: bucket number {} has observation count of {}",
                    side,
                    i + 1,
                    c
                )));
            }
        }
        if self.zero_count < 0.0 || self.count < 0.0 {
            return Err(WalError::InvalidHistogram(
                "zero count and total count must not be negative".to_string(),
            ));
        }
        Ok(())
    }
}

// =============================================================================
// Shared checks
// =============================================================================

fn validate_layout(
    schema: i32,
    custom_values: &[f64],
    positive_spans: &[Span],
    positive_buckets: usize,
    negative_spans: &[Span],
    negative_buckets: usize,
    zero_bucket_empty: bool,
) -> Result<()> {
    if schema == CUSTOM_BUCKETS_SCHEMA {
        if !negative_spans.is_empty() || negative_buckets != 0 {
            return Err(WalError::InvalidHistogram(
                "custom buckets: must not have negative spans or buckets".to_string(),
            ));
        }
        if !zero_bucket_empty {
            return Err(WalError::InvalidHistogram(
                "custom buckets: must have zero threshold and zero count of 0".to_string(),
            ));
        }
        validate_custom_bounds(custom_values, positive_spans)?;
    } else {
        if !(MIN_EXPONENTIAL_SCHEMA..=MAX_EXPONENTIAL_SCHEMA).contains(&schema) {
            return Err(WalError::InvalidHistogram(format!(
                "schema {} out of range [{}, {}]",
                schema, MIN_EXPONENTIAL_SCHEMA, MAX_EXPONENTIAL_SCHEMA
            )));
        }
        if !custom_values.is_empty() {
            return Err(WalError::InvalidHistogram(
                "histogram with exponential schema must not have custom bounds".to_string(),
            ));
        }
        check_spans(negative_spans, negative_buckets, "negative")?;
    }
    check_spans(positive_spans, positive_buckets, "positive")
}

/// Spans after the first must have a non-negative offset, and the span
/// lengths must add up to the number of buckets.
fn check_spans(spans: &[Span], buckets: usize, side: &str) -> Result<()> {
    let mut span_buckets = 0usize;
    for (i, span) in spans.iter().enumerate() {
        if i > 0 && span.offset < 0 {
            return Err(WalError::InvalidHistogram(format!(
                "{} side: span number {} with offset {}",
                side,
                i + 1,
                span.offset
            )));
        }
        span_buckets += span.length as usize;
    }
    if span_buckets != buckets {
        return Err(WalError::InvalidHistogram(format!(
            "{} side: spans need {} buckets, have {} buckets",
            side, span_buckets, buckets
        )));
    }
    Ok(())
}

fn validate_custom_bounds(bounds: &[f64], spans: &[Span]) -> Result<()> {
    if bounds.is_empty() {
        return Err(WalError::InvalidHistogram(
            "custom buckets: no custom bounds defined".to_string(),
        ));
    }
    let mut prev = f64::NEG_INFINITY;
    for (i, bound) in bounds.iter().enumerate() {
        if bound.is_nan() || *bound <= prev {
            return Err(WalError::InvalidHistogram(format!(
                "custom buckets: bound number {} ({}) is not strictly increasing",
                i + 1,
                bound
            )));
        }
        prev = *bound;
    }
    if prev == f64::INFINITY {
        return Err(WalError::InvalidHistogram(
            "custom buckets: last +Inf bound must not be explicitly defined".to_string(),
        ));
    }

    // Bucket indexes are absolute positions into bounds plus the implicit +Inf bucket.
    let mut end: i64 = 0;
    for (i, span) in spans.iter().enumerate() {
        if span.offset < 0 {
            return Err(WalError::InvalidHistogram(format!(
                "custom buckets: span number {} with offset {}",
                i + 1,
                span.offset
            )));
        }
        end += i64::from(span.offset) + i64::from(span.length);
    }
    if end > bounds.len() as i64 + 1 {
        return Err(WalError::InvalidHistogram(format!(
            "custom buckets: spans reach bucket {} but only {} buckets exist",
            end,
            bounds.len() + 1
        )));
    }
    Ok(())
}

/// Total observation count of delta-encoded buckets; every absolute count must be >= 0.
fn delta_bucket_total(deltas: &[i64], side: &str) -> Result<u64> {
    let mut current: i64 = 0;
    let mut total: u64 = 0;
    for (i, delta) in deltas.iter().enumerate() {
        current = current.checked_add(*delta).ok_or_else(|| {
            WalError::InvalidHistogram(format!("{} side: bucket count overflow", side))
        })?;
        if current < 0 {
            return Err(WalError::InvalidHistogram(format!(
                "{} side: bucket number {} has observation count of {}",
                side,
                i + 1,
                current
            )));
        }
        total = total.checked_add(current as u64).ok_or_else(|| {
            WalError::InvalidHistogram(format!("{} side: observation count overflow", side))
        })?;
    }
    Ok(total)
}
