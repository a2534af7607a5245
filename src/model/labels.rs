//! Label sets
//!
//! A series is identified by its label set. Labels are kept sorted by name so
//! that equality and hashing do not depend on insertion order.

use std::fmt;

use serde::{Deserialize, Serialize};
use xxhash_rust::xxh64::xxh64;

/// Separator byte between names and values when hashing (never valid UTF-8)
const SEPARATOR: u8 = 0xff;

/// A single name/value pair
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Label {
    pub name: String,
    pub value: String,
}

impl Label {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// An immutable, name-sorted set of labels
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Labels(Vec<Label>);

impl Labels {
    /// Build a label set; sorting is stable so duplicate names stay adjacent
    pub fn new(mut labels: Vec<Label>) -> Self {
        labels.sort_by(|a, b| a.name.cmp(&b.name));
        Self(labels)
    }

    /// Build a label set from `(name, value)` pairs
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self::new(
            pairs
                .into_iter()
                .map(|(name, value)| Label::new(name, value))
                .collect(),
        )
    }

    pub fn empty() -> Self {
        Self(Vec::new())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Label> {
        self.0.iter()
    }

    /// Value of the label with the given name
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|l| l.name == name)
            .map(|l| l.value.as_str())
    }

    /// Stable 64-bit hash of the label set (xxh64 over `name 0xff value 0xff ...`)
    pub fn hash(&self) -> u64 {
        let size: usize = self.0.iter().map(|l| l.name.len() + l.value.len() + 2).sum();
        let mut buf = Vec::with_capacity(size);
        for label in &self.0 {
            buf.extend_from_slice(label.name.as_bytes());
            buf.push(SEPARATOR);
            buf.extend_from_slice(label.value.as_bytes());
            buf.push(SEPARATOR);
        }
        xxh64(&buf, 0)
    }

    /// Copy of the set without labels whose value is empty
    pub fn without_empty(&self) -> Labels {
        Self(
            self.0
                .iter()
                .filter(|l| !l.value.is_empty())
                .cloned()
                .collect(),
        )
    }

    /// First label name that occurs more than once, if any
    pub fn duplicate_name(&self) -> Option<&str> {
        self.0
            .windows(2)
            .find(|pair| pair[0].name == pair[1].name)
            .map(|pair| pair[0].name.as_str())
    }

    /// Number of characters across all names and values
    pub fn char_len(&self) -> usize {
        self.0
            .iter()
            .map(|l| l.name.chars().count() + l.value.chars().count())
            .sum()
    }
}

impl fmt::Display for Labels {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, label) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}={:?}", label.name, label.value)?;
        }
        write!(f, "}}")
    }
}

impl FromIterator<Label> for Labels {
    fn from_iter<T: IntoIterator<Item = Label>>(iter: T) -> Self {
        Self::new(iter.into_iter().collect())
    }
}
