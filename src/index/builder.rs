//! Compaction-style index population
//!
//! `IndexWriter` needs its input presorted: symbols first in ascending
//! order, then series by fingerprint. `IndexBuilder` accepts series in any
//! order, merges duplicate label sets and drives the writer.

use std::collections::{BTreeSet, HashMap};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::index::error::{IndexError, IndexResult};
use crate::index::types::{ChunkMeta, LabelSet};
use crate::index::writer::{IndexSummary, IndexWriter, WriterOptions};

/// One series as accepted by the builder and the `build` command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesEntry {
    pub labels: LabelSet,
    #[serde(default)]
    pub chunks: Vec<ChunkMeta>,
}

#[derive(Debug, Default)]
pub struct IndexBuilder {
    series: HashMap<LabelSet, Vec<ChunkMeta>>,
    opts: WriterOptions,
}

impl IndexBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(opts: WriterOptions) -> Self {
        Self {
            series: HashMap::new(),
            opts,
        }
    }

    /// Add chunks for `lset`. Chunks of a label set seen before are merged
    /// into its existing list. A rejected call leaves the builder unchanged.
    pub fn add_series(
        &mut self,
        lset: LabelSet,
        chunks: impl IntoIterator<Item = ChunkMeta>,
    ) -> IndexResult<()> {
        if lset.is_empty() {
            return Err(IndexError::InvalidArgument(
                "series must have at least one label".into(),
            ));
        }
        let chunks: Vec<ChunkMeta> = chunks.into_iter().collect();
        if let Some(c) = chunks.iter().find(|c| c.min_time > c.max_time) {
            return Err(IndexError::InvalidArgument(format!(
                "chunk min time {} after max time {}",
                c.min_time, c.max_time
            )));
        }
        self.series.entry(lset).or_default().extend(chunks);
        Ok(())
    }

    pub fn add_entry(&mut self, entry: SeriesEntry) -> IndexResult<()> {
        self.add_series(entry.labels, entry.chunks)
    }

    /// Number of distinct label sets
    pub fn len(&self) -> usize {
        self.series.len()
    }

    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }

    /// Write every accumulated series to `path`
    pub fn build(self, path: impl AsRef<Path>, skip_postings: bool) -> IndexResult<IndexSummary> {
        let path = path.as_ref();

        let mut symbols = BTreeSet::new();
        for lset in self.series.keys() {
            for label in lset {
                symbols.insert(label.name.as_str());
                symbols.insert(label.value.as_str());
            }
        }

        let mut series: Vec<(u64, &LabelSet, Vec<ChunkMeta>)> = self
            .series
            .iter()
            .map(|(lset, chunks)| (lset.stable_hash(), lset, normalize_chunks(chunks)))
            .collect();
        series.sort_unstable_by(|a, b| (a.0, a.1).cmp(&(b.0, b.1)));
        debug!(
            path = %path.display(),
            symbols = symbols.len(),
            series = series.len(),
            "Building index"
        );

        let mut writer = IndexWriter::with_options(path, self.opts.clone())?;
        for sym in &symbols {
            writer.add_symbol(sym)?;
        }
        for (i, (fp, lset, chunks)) in series.iter().enumerate() {
            writer.add_series(i as u64, lset, *fp, chunks)?;
        }
        let summary = writer.close(skip_postings)?;
        info!(
            path = %summary.path.display(),
            series = summary.series,
            symbols = summary.symbols,
            bytes = summary.size_bytes,
            "Built index"
        );
        Ok(summary)
    }
}

/// Sort chunks by time and drop exact duplicates
fn normalize_chunks(chunks: &[ChunkMeta]) -> Vec<ChunkMeta> {
    let mut out = chunks.to_vec();
    out.sort_unstable_by_key(|c| (c.min_time, c.max_time, c.checksum));
    out.dedup_by_key(|c| (c.min_time, c.max_time, c.checksum));
    out
}
