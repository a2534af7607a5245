//! WAL Record definitions
//!
//! Defines the typed records stored inside frames, and their encoding:
//! one tag byte identifying the record type followed by the bincode body.

use bytes::{BufMut, BytesMut};
use serde::{Deserialize, Serialize};

use crate::error::{Result, WalError};
use crate::model::{Exemplar, FloatHistogram, Histogram, Labels, Metadata, SeriesRef};

/// Tag byte at the start of every record payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum RecordType {
    Series = 1,
    Samples = 2,
    Tombstones = 3,
    Exemplars = 4,
    Metadata = 6,
    HistogramSamples = 7,
    FloatHistogramSamples = 8,
    CustomBucketsHistogramSamples = 9,
    CustomBucketsFloatHistogramSamples = 10,
}

impl RecordType {
    pub fn from_byte(byte: u8) -> Option<Self> {
        Some(match byte {
            1 => RecordType::Series,
            2 => RecordType::Samples,
            3 => RecordType::Tombstones,
            4 => RecordType::Exemplars,
            6 => RecordType::Metadata,
            7 => RecordType::HistogramSamples,
            8 => RecordType::FloatHistogramSamples,
            9 => RecordType::CustomBucketsHistogramSamples,
            10 => RecordType::CustomBucketsFloatHistogramSamples,
            _ => return None,
        })
    }
}

// =============================================================================
// Record Entries
// =============================================================================

/// A series definition: binds a ref to its label set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefSeries {
    pub ref_id: SeriesRef,
    pub labels: Labels,
}

/// A float sample
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RefSample {
    pub ref_id: SeriesRef,
    pub t: i64,
    pub v: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefExemplar {
    pub ref_id: SeriesRef,
    pub t: i64,
    pub v: f64,
    pub labels: Labels,
}

impl RefExemplar {
    pub fn to_exemplar(&self) -> Exemplar {
        Exemplar {
            labels: self.labels.clone(),
            value: self.v,
            ts: self.t,
            has_ts: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefMetadata {
    pub ref_id: SeriesRef,
    pub metadata: Metadata,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefHistogramSample {
    pub ref_id: SeriesRef,
    pub t: i64,
    pub h: Histogram,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefFloatHistogramSample {
    pub ref_id: SeriesRef,
    pub t: i64,
    pub fh: FloatHistogram,
}

/// A decoded WAL record
#[derive(Debug, Clone, PartialEq)]
pub enum Record {
    Series(Vec<RefSeries>),
    Samples(Vec<RefSample>),
    /// Refs of series removed from the index by garbage collection
    Tombstones(Vec<SeriesRef>),
    Exemplars(Vec<RefExemplar>),
    Metadata(Vec<RefMetadata>),
    HistogramSamples(Vec<RefHistogramSample>),
    FloatHistogramSamples(Vec<RefFloatHistogramSample>),
    CustomBucketsHistogramSamples(Vec<RefHistogramSample>),
    CustomBucketsFloatHistogramSamples(Vec<RefFloatHistogramSample>),
}

impl Record {
    pub fn record_type(&self) -> RecordType {
        match self {
            Record::Series(_) => RecordType::Series,
            Record::Samples(_) => RecordType::Samples,
            Record::Tombstones(_) => RecordType::Tombstones,
            Record::Exemplars(_) => RecordType::Exemplars,
            Record::Metadata(_) => RecordType::Metadata,
            Record::HistogramSamples(_) => RecordType::HistogramSamples,
            Record::FloatHistogramSamples(_) => RecordType::FloatHistogramSamples,
            Record::CustomBucketsHistogramSamples(_) => RecordType::CustomBucketsHistogramSamples,
            Record::CustomBucketsFloatHistogramSamples(_) => {
                RecordType::CustomBucketsFloatHistogramSamples
            }
        }
    }

    /// Number of entries carried by the record
    pub fn len(&self) -> usize {
        match self {
            Record::Series(v) => v.len(),
            Record::Samples(v) => v.len(),
            Record::Tombstones(v) => v.len(),
            Record::Exemplars(v) => v.len(),
            Record::Metadata(v) => v.len(),
            Record::HistogramSamples(v) | Record::CustomBucketsHistogramSamples(v) => v.len(),
            Record::FloatHistogramSamples(v) | Record::CustomBucketsFloatHistogramSamples(v) => {
                v.len()
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append the encoded record (tag byte + body) to `buf`
    pub fn encode(&self, buf: &mut BytesMut) -> Result<()> {
        let record_type = self.record_type();
        match self {
            Record::Series(v) => encode_entries(record_type, v, buf),
            Record::Samples(v) => encode_entries(record_type, v, buf),
            Record::Tombstones(v) => encode_entries(record_type, v, buf),
            Record::Exemplars(v) => encode_entries(record_type, v, buf),
            Record::Metadata(v) => encode_entries(record_type, v, buf),
            Record::HistogramSamples(v) | Record::CustomBucketsHistogramSamples(v) => {
                encode_entries(record_type, v, buf)
            }
            Record::FloatHistogramSamples(v) | Record::CustomBucketsFloatHistogramSamples(v) => {
                encode_entries(record_type, v, buf)
            }
        }
    }

    /// Decode a record payload; an unknown tag or a malformed body is a
    /// `Serialization` error which readers turn into corruption.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let (&tag, body) = bytes
            .split_first()
            .ok_or_else(|| WalError::Serialization("empty record".to_string()))?;
        let record_type = RecordType::from_byte(tag)
            .ok_or_else(|| WalError::Serialization(format!("invalid record type {}", tag)))?;

        Ok(match record_type {
            RecordType::Series => Record::Series(bincode::deserialize(body)?),
            RecordType::Samples => Record::Samples(bincode::deserialize(body)?),
            RecordType::Tombstones => Record::Tombstones(bincode::deserialize(body)?),
            RecordType::Exemplars => Record::Exemplars(bincode::deserialize(body)?),
            RecordType::Metadata => Record::Metadata(bincode::deserialize(body)?),
            RecordType::HistogramSamples => Record::HistogramSamples(bincode::deserialize(body)?),
            RecordType::FloatHistogramSamples => {
                Record::FloatHistogramSamples(bincode::deserialize(body)?)
            }
            RecordType::CustomBucketsHistogramSamples => {
                Record::CustomBucketsHistogramSamples(bincode::deserialize(body)?)
            }
            RecordType::CustomBucketsFloatHistogramSamples => {
                Record::CustomBucketsFloatHistogramSamples(bincode::deserialize(body)?)
            }
        })
    }
}

/// Encode borrowed entries as a record of `record_type`.
///
/// A slice encodes exactly like the `Vec` it would be decoded into, so
/// callers holding buffers can log them without building a `Record`.
pub fn encode_entries<T: Serialize>(
    record_type: RecordType,
    entries: &[T],
    buf: &mut BytesMut,
) -> Result<()> {
    buf.put_u8(record_type as u8);
    bincode::serialize_into((&mut *buf).writer(), entries)?;
    Ok(())
}
