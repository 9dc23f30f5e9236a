//! Core data types shared by the writer, reader and symbolizer
//!
//! - `Label` / `LabelSet`: sorted, name-unique label pairs identifying a series
//! - `ChunkMeta`: time range and checksum of one chunk of log data
//! - `ShardAnnotation`: fingerprint-prefix sharding of a query
//! - `SeriesRef` / `Fingerprint`: series identity inside one file / across files

use serde::{Deserialize, Serialize};
use std::fmt;
use xxhash_rust::xxh64::Xxh64;

use crate::index::error::{IndexError, IndexResult};

/// Position of a series inside one index file (record offset / 16)
pub type SeriesRef = u64;

/// Stable hash of a label set
pub type Fingerprint = u64;

const SEPARATOR: u8 = 0xff;

/// One name/value pair
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
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

/// Ordered set of labels with unique names
///
/// Always sorted by name. Constructors drop earlier duplicates of a name, so
/// the last value given for a name wins.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LabelSet {
    labels: Vec<Label>,
}

impl LabelSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from any iterator of name/value pairs
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self::from_labels(
            pairs
                .into_iter()
                .map(|(name, value)| Label::new(name, value))
                .collect(),
        )
    }

    /// Build from owned labels, sorting and de-duplicating names
    pub fn from_labels(mut labels: Vec<Label>) -> Self {
        // Stable sort keeps insertion order among equal names; keep the last.
        labels.sort_by(|a, b| a.name.cmp(&b.name));
        let mut deduped: Vec<Label> = Vec::with_capacity(labels.len());
        for label in labels {
            match deduped.last_mut() {
                Some(last) if last.name == label.name => *last = label,
                _ => deduped.push(label),
            }
        }
        Self { labels: deduped }
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Label> {
        self.labels.iter()
    }

    pub fn as_slice(&self) -> &[Label] {
        &self.labels
    }

    pub fn into_labels(self) -> Vec<Label> {
        self.labels
    }

    /// Value for `name`, if present
    pub fn get(&self, name: &str) -> Option<&str> {
        self.labels
            .binary_search_by(|l| l.name.as_str().cmp(name))
            .ok()
            .map(|i| self.labels[i].value.as_str())
    }

    pub fn has(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn clear(&mut self) {
        self.labels.clear();
    }

    /// Append without re-sorting; callers check order with `is_sorted_unique`.
    pub(crate) fn push_unchecked(&mut self, label: Label) {
        self.labels.push(label);
    }

    pub(crate) fn is_sorted_unique(&self) -> bool {
        self.labels.windows(2).all(|w| w[0].name < w[1].name)
    }

    /// Stable xxh64 hash over `name 0xff value 0xff ...`
    pub fn stable_hash(&self) -> Fingerprint {
        let mut hasher = Xxh64::new(0);
        for label in &self.labels {
            hasher.update(label.name.as_bytes());
            hasher.update(&[SEPARATOR]);
            hasher.update(label.value.as_bytes());
            hasher.update(&[SEPARATOR]);
        }
        hasher.digest()
    }

    /// Labels as a name -> value map
    pub fn to_map(&self) -> std::collections::BTreeMap<String, String> {
        self.labels
            .iter()
            .map(|l| (l.name.clone(), l.value.clone()))
            .collect()
    }
}

impl fmt::Display for LabelSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, label) in self.labels.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}={:?}", label.name, label.value)?;
        }
        write!(f, "}}")
    }
}

impl<'a> IntoIterator for &'a LabelSet {
    type Item = &'a Label;
    type IntoIter = std::slice::Iter<'a, Label>;

    fn into_iter(self) -> Self::IntoIter {
        self.labels.iter()
    }
}

impl Serialize for LabelSet {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_map().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for LabelSet {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let map = std::collections::BTreeMap::<String, String>::deserialize(deserializer)?;
        Ok(Self::from_pairs(map))
    }
}

/// Metadata of one chunk referenced by a series
///
/// Only the chunk's time bounds and identity live in the index; the payload
/// is stored elsewhere.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChunkMeta {
    /// Earliest entry timestamp (ms)
    pub min_time: i64,
    /// Latest entry timestamp (ms)
    pub max_time: i64,
    /// Checksum of the chunk payload
    pub checksum: u32,
    /// Payload size in KiB
    #[serde(default)]
    pub kb: u32,
    /// Number of log entries
    #[serde(default)]
    pub entries: u32,
}

impl ChunkMeta {
    pub fn new(min_time: i64, max_time: i64, checksum: u32) -> Self {
        Self {
            min_time,
            max_time,
            checksum,
            kb: 0,
            entries: 0,
        }
    }

    /// Inclusive overlap with `[mint, maxt]`
    pub fn overlaps(&self, mint: i64, maxt: i64) -> bool {
        self.min_time <= maxt && self.max_time >= mint
    }
}

/// Selects the series whose fingerprint falls into one of `of` equal slices
/// of the hash space. `of` must be a power of two.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardAnnotation {
    pub shard: u32,
    pub of: u32,
}

impl ShardAnnotation {
    pub fn new(shard: u32, of: u32) -> IndexResult<Self> {
        let annotation = Self { shard, of };
        annotation.validate()?;
        Ok(annotation)
    }

    pub fn validate(&self) -> IndexResult<()> {
        if self.of == 0 || !self.of.is_power_of_two() {
            return Err(IndexError::InvalidArgument(format!(
                "shard factor {} is not a power of two",
                self.of
            )));
        }
        if self.shard >= self.of {
            return Err(IndexError::InvalidArgument(format!(
                "shard {} out of range for factor {}",
                self.shard, self.of
            )));
        }
        Ok(())
    }

    fn required_bits(&self) -> u32 {
        self.of.trailing_zeros()
    }

    pub fn matches(&self, fp: Fingerprint) -> bool {
        let bits = self.required_bits();
        if bits == 0 {
            return true;
        }
        fp >> (64 - bits) == u64::from(self.shard)
    }

    /// Inclusive fingerprint range covered by this shard
    pub fn bounds(&self) -> (Fingerprint, Fingerprint) {
        let bits = self.required_bits();
        if bits == 0 {
            return (0, u64::MAX);
        }
        let shift = 64 - bits;
        let lo = u64::from(self.shard) << shift;
        let hi = lo | (u64::MAX >> bits);
        (lo, hi)
    }
}

impl fmt::Display for ShardAnnotation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_of_{}", self.shard, self.of)
    }
}
