//! Index reader
//!
//! Opens a finished index from a file (memory mapped or read into memory)
//! or from an owned buffer, validates header, TOC and by default every
//! section checksum, and answers queries against it.
//!
//! # Lifecycle
//!
//! ```text
//! open ──validate──▶ Ready ──close──▶ Closed
//!   └──── error ────▶ (nothing returned, mapping and fd released)
//! ```
//!
//! Queries on a closed reader fail with `ReaderClosed`. Iterators handed
//! out before `close` hold their own reference to the bytes and stay valid.
//!
//! # Concurrency
//!
//! All queries take `&self` and may run from any number of threads. The
//! only shared mutable state is the chunk sample cache, which decodes each
//! series at most once (see `cache.rs`).

use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use memmap2::Mmap;
use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::index::cache::{SampleCache, DEFAULT_CACHE_SHARDS};
use crate::index::chunks::{decode_clipped, ChunkSamples, DEFAULT_CHUNK_SAMPLE_INTERVAL_MS};
use crate::index::encoding::{crc32c, Decbuf};
use crate::index::error::{IndexError, IndexResult};
use crate::index::format::{
    read_header, IndexBytes, Section, Toc, FOOTER_LEN, HEADER_LEN, SERIES_ALIGNMENT, TOC_LEN,
};
use crate::index::matcher::ValuePredicate;
use crate::index::postings::{
    empty_postings, merge, BoxPostings, ListPostings, ShardedPostings, ALL_POSTINGS_KEY,
};
use crate::index::symbols::{SymbolIter, SymbolTable};
use crate::index::types::{ChunkMeta, Fingerprint, Label, LabelSet, SeriesRef, ShardAnnotation};

/// Options for opening an index
#[derive(Debug, Clone)]
pub struct ReaderOptions {
    /// Verify every section checksum on open
    pub verify_checksums: bool,
    /// Map the file instead of reading it into memory
    pub use_mmap: bool,
    /// Shards of the chunk sample cache
    pub sample_cache_shards: usize,
    /// Sampling interval for series stored without a sample table
    pub chunk_sample_interval_ms: i64,
}

impl Default for ReaderOptions {
    fn default() -> Self {
        Self {
            verify_checksums: true,
            use_mmap: true,
            sample_cache_shards: DEFAULT_CACHE_SHARDS,
            chunk_sample_interval_ms: DEFAULT_CHUNK_SAMPLE_INTERVAL_MS,
        }
    }
}

impl ReaderOptions {
    /// Full verification without mapping; used to check freshly written files
    pub fn verifying() -> Self {
        Self {
            verify_checksums: true,
            use_mmap: false,
            ..Self::default()
        }
    }
}

/// Immutable view of an open index plus its sample cache
struct ReaderState {
    bytes: Arc<IndexBytes>,
    version: u8,
    toc: Toc,
    symbols: SymbolTable,
    /// name -> [(value, offset)] sorted by value
    postings: BTreeMap<String, Vec<(String, u64)>>,
    has_postings: bool,
    /// name -> offset of its label index
    label_indices: BTreeMap<String, u64>,
    fingerprint_offsets: Vec<(Fingerprint, u64)>,
    series_extent: (usize, usize),
    postings_extent: (usize, usize),
    cache: SampleCache,
    sample_interval_ms: i64,
}

impl ReaderState {
    fn new(bytes: Arc<IndexBytes>, opts: &ReaderOptions) -> IndexResult<Self> {
        let version = read_header(&bytes)?;
        let toc = Toc::read(&bytes)?;
        let toc_start = bytes.len() - FOOTER_LEN - TOC_LEN;

        if opts.verify_checksums {
            for section in Section::ALL {
                let (start, end) = toc.extent(section, toc_start);
                let computed = crc32c(&bytes[start..end]);
                let stored = toc.entry(section).checksum;
                if computed != stored {
                    return Err(IndexError::corrupt(format!(
                        "{} section checksum mismatch: stored={:#010x}, computed={:#010x}",
                        section.name(),
                        stored,
                        computed
                    )));
                }
            }
        }

        let symbols = SymbolTable::new(Arc::clone(&bytes), toc.offset(Section::Symbols))?;

        let label_indices = read_label_table(&bytes, &toc, toc_start)?;
        let (postings_table_start, postings_table_end) =
            toc.extent(Section::PostingsTable, toc_start);
        let has_postings = postings_table_end > postings_table_start;
        let postings = if has_postings {
            read_postings_table(&bytes, postings_table_start)?
        } else {
            BTreeMap::new()
        };
        let fingerprint_offsets = read_fingerprint_offsets(&bytes, &toc, toc_start)?;

        Ok(Self {
            version,
            series_extent: toc.extent(Section::Series, toc_start),
            postings_extent: toc.extent(Section::Postings, toc_start),
            toc,
            symbols,
            postings,
            has_postings,
            label_indices,
            fingerprint_offsets,
            cache: SampleCache::new(opts.sample_cache_shards),
            sample_interval_ms: opts.chunk_sample_interval_ms,
            bytes,
        })
    }

    fn series_offset(&self, series_ref: SeriesRef) -> IndexResult<usize> {
        let offset = series_ref
            .checked_mul(SERIES_ALIGNMENT as u64)
            .map(|o| o as usize)
            .filter(|&o| o >= self.series_extent.0 && o < self.series_extent.1);
        offset.ok_or_else(|| IndexError::NotFound(format!("series reference {}", series_ref)))
    }

    fn read_postings_list(&self, offset: u64) -> IndexResult<Vec<SeriesRef>> {
        let offset = offset as usize;
        if offset < self.postings_extent.0 || offset >= self.postings_extent.1 {
            return Err(IndexError::corrupt(format!(
                "postings offset {} outside postings section",
                offset
            )));
        }
        let mut d = Decbuf::section_at(&self.bytes, offset)?;
        let n = d.be32()? as usize;
        if d.len() != n * 4 {
            return Err(IndexError::corrupt(format!(
                "postings list of {} entries has {} bytes",
                n,
                d.len()
            )));
        }
        let mut list = Vec::with_capacity(n);
        for _ in 0..n {
            list.push(SeriesRef::from(d.be32()?));
        }
        Ok(list)
    }

    fn postings_offset(&self, name: &str, value: &str) -> Option<u64> {
        let values = self.postings.get(name)?;
        values
            .binary_search_by(|(v, _)| v.as_str().cmp(value))
            .ok()
            .map(|i| values[i].1)
    }

    /// Stored fingerprint of a series, read without checksum verification
    fn series_fingerprint(&self, series_ref: SeriesRef) -> IndexResult<Fingerprint> {
        let offset = self.series_offset(series_ref)?;
        let mut d = Decbuf::new(&self.bytes[offset..self.series_extent.1]);
        d.uvarint()?;
        d.be64()
    }

    /// Reference window covering every series whose fingerprint is in
    /// `[lo, hi]`
    fn shard_ref_range(&self, lo: Fingerprint, hi: Fingerprint) -> (SeriesRef, SeriesRef) {
        let fps = &self.fingerprint_offsets;
        let align = SERIES_ALIGNMENT as u64;
        let i = fps.partition_point(|&(fp, _)| fp < lo);
        let min_ref = if i == 0 { 0 } else { fps[i - 1].1 / align };
        let j = fps.partition_point(|&(fp, _)| fp <= hi);
        let max_ref = fps.get(j).map_or(u64::MAX, |&(_, offset)| offset / align);
        (min_ref, max_ref)
    }

    fn series(
        &self,
        series_ref: SeriesRef,
        mint: i64,
        maxt: i64,
        lset: &mut LabelSet,
        chunks: &mut Vec<ChunkMeta>,
    ) -> IndexResult<Fingerprint> {
        let offset = self.series_offset(series_ref)?;
        let mut d = Decbuf::uvarint_record_at(&self.bytes[..self.series_extent.1], offset)?;

        let fp = d.be64()?;
        let nlabels = d.uvarint()? as usize;
        lset.clear();
        for _ in 0..nlabels {
            let name = self.symbols.lookup_str(d.uvarint32()?)?;
            let value = self.symbols.lookup_str(d.uvarint32()?)?;
            lset.push_unchecked(Label::new(name, value));
        }
        if !lset.is_sorted_unique() {
            return Err(IndexError::corrupt(format!(
                "series {} has unsorted labels",
                series_ref
            )));
        }

        let nchunks = d.uvarint()? as usize;
        let sample_len = d.uvarint()? as usize;
        let rest = d.remaining();
        let sample_bytes = rest.get(..sample_len).ok_or_else(|| {
            IndexError::corrupt(format!("series {} sample table truncated", series_ref))
        })?;
        let chunk_bytes = &rest[sample_len..];

        chunks.clear();
        if nchunks == 0 || mint > maxt {
            return Ok(fp);
        }

        let samples = self.cache.get_or_try_insert_with(series_ref, || {
            if sample_bytes.is_empty() {
                ChunkSamples::from_encoded(chunk_bytes, nchunks, self.sample_interval_ms)
            } else {
                ChunkSamples::decode(&mut Decbuf::new(sample_bytes), nchunks)
            }
        })?;
        if let Some(start) = samples.for_query_starting(mint) {
            decode_clipped(chunk_bytes, start, nchunks, mint, maxt, chunks)?;
        }
        Ok(fp)
    }

    fn legacy_label_values(&self, name: &str) -> IndexResult<Vec<String>> {
        let Some(&offset) = self.label_indices.get(name) else {
            return Ok(Vec::new());
        };
        let mut d = Decbuf::section_at(&self.bytes, offset as usize)?;
        let names = d.be32()?;
        if names != 1 {
            return Err(IndexError::corrupt(format!(
                "label index for {:?} has {} names",
                name, names
            )));
        }
        let n = d.be32()? as usize;
        let mut values = Vec::with_capacity(n.min(d.len() / 4));
        for _ in 0..n {
            values.push(self.symbols.lookup(d.be32()?)?);
        }
        Ok(values)
    }

    /// References of every series in file order, by walking the section
    fn walk_series(&self) -> IndexResult<Vec<SeriesRef>> {
        let (start, end) = self.series_extent;
        let align = SERIES_ALIGNMENT;
        let mut refs = Vec::new();
        let mut pos = start.div_ceil(align) * align;
        while pos < end {
            let mut d = Decbuf::new(&self.bytes[pos..end]);
            let len = d.uvarint()? as usize;
            let header = (end - pos) - d.len();
            refs.push((pos / align) as SeriesRef);
            let next = (pos + header)
                .checked_add(len)
                .and_then(|n| n.checked_add(4))
                .filter(|&n| n <= end)
                .ok_or_else(|| {
                    IndexError::corrupt(format!(
                        "series record at {} with length {} exceeds section",
                        pos, len
                    ))
                })?;
            pos = next.div_ceil(align) * align;
        }
        Ok(refs)
    }
}

fn read_label_table(bytes: &[u8], toc: &Toc, toc_start: usize) -> IndexResult<BTreeMap<String, u64>> {
    let (start, end) = toc.extent(Section::LabelIndicesTable, toc_start);
    let mut out = BTreeMap::new();
    if start == end {
        return Ok(out);
    }
    let mut d = Decbuf::section_at(bytes, start)?;
    let n = d.be32()?;
    for _ in 0..n {
        let keys = d.uvarint()?;
        if keys != 1 {
            return Err(IndexError::corrupt(format!(
                "unexpected key count {} in label indices table",
                keys
            )));
        }
        let name = d.uvarint_str()?.to_string();
        let offset = d.uvarint()?;
        out.insert(name, offset);
    }
    Ok(out)
}

fn read_postings_table(bytes: &[u8], start: usize) -> IndexResult<BTreeMap<String, Vec<(String, u64)>>> {
    let mut d = Decbuf::section_at(bytes, start)?;
    let n = d.be32()?;
    let mut out: BTreeMap<String, Vec<(String, u64)>> = BTreeMap::new();
    let mut last: Option<(&str, &str)> = None;
    for _ in 0..n {
        let keys = d.uvarint()?;
        if keys != 2 {
            return Err(IndexError::corrupt(format!(
                "unexpected key count {} in postings table",
                keys
            )));
        }
        let name = d.uvarint_str()?;
        let value = d.uvarint_str()?;
        let offset = d.uvarint()?;
        if let Some(prev) = last {
            if (name, value) <= prev {
                return Err(IndexError::corrupt("postings table is not sorted"));
            }
        }
        last = Some((name, value));
        out.entry(name.to_string())
            .or_default()
            .push((value.to_string(), offset));
    }
    Ok(out)
}

fn read_fingerprint_offsets(
    bytes: &[u8],
    toc: &Toc,
    toc_start: usize,
) -> IndexResult<Vec<(Fingerprint, u64)>> {
    let (start, end) = toc.extent(Section::FingerprintOffsets, toc_start);
    if start == end {
        return Ok(Vec::new());
    }
    let mut d = Decbuf::section_at(bytes, start)?;
    let n = d.be32()? as usize;
    let mut out = Vec::with_capacity(n.min(d.len() / 16));
    for _ in 0..n {
        out.push((d.be64()?, d.be64()?));
    }
    Ok(out)
}

/// Reader over one index file
pub struct IndexReader {
    state: RwLock<Option<Arc<ReaderState>>>,
    path: Option<PathBuf>,
}

impl IndexReader {
    /// Open `path` with default options
    pub fn open(path: impl AsRef<Path>) -> IndexResult<Self> {
        Self::open_with(path, &ReaderOptions::default())
    }

    pub fn open_with(path: impl AsRef<Path>, opts: &ReaderOptions) -> IndexResult<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let len = file.metadata()?.len();
        if len < (HEADER_LEN + TOC_LEN + FOOTER_LEN) as u64 {
            warn!(path = %path.display(), len, "Rejecting index file");
            return Err(IndexError::corrupt(format!(
                "file of {} bytes is too small for an index",
                len
            )));
        }

        let bytes = if opts.use_mmap {
            // The file is never written after it has been published.
            let map = unsafe { Mmap::map(&file)? };
            IndexBytes::Mapped(map)
        } else {
            let mut buf = Vec::with_capacity(len as usize);
            (&file).read_to_end(&mut buf)?;
            IndexBytes::Owned(buf)
        };
        // A mapping stays valid without the descriptor.
        drop(file);

        match ReaderState::new(Arc::new(bytes), opts) {
            Ok(state) => {
                debug!(
                    path = %path.display(),
                    symbols = state.symbols.len(),
                    mapped = opts.use_mmap,
                    "Opened index"
                );
                Ok(Self {
                    state: RwLock::new(Some(Arc::new(state))),
                    path: Some(path.to_path_buf()),
                })
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Rejecting index file");
                Err(e)
            }
        }
    }

    /// Read an index held in memory
    pub fn from_bytes(bytes: Vec<u8>) -> IndexResult<Self> {
        Self::from_bytes_with(bytes, &ReaderOptions::default())
    }

    pub fn from_bytes_with(bytes: Vec<u8>, opts: &ReaderOptions) -> IndexResult<Self> {
        let state = ReaderState::new(Arc::new(IndexBytes::Owned(bytes)), opts)?;
        Ok(Self {
            state: RwLock::new(Some(Arc::new(state))),
            path: None,
        })
    }

    fn state(&self) -> IndexResult<Arc<ReaderState>> {
        self.state.read().clone().ok_or(IndexError::ReaderClosed)
    }

    /// Path the index was opened from, if any
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn version(&self) -> IndexResult<u8> {
        Ok(self.state()?.version)
    }

    pub fn toc(&self) -> IndexResult<Toc> {
        Ok(self.state()?.toc.clone())
    }

    /// Total size of the index in bytes
    pub fn size_bytes(&self) -> IndexResult<usize> {
        Ok(self.state()?.bytes.len())
    }

    /// Whether postings were written; indexes closed with `skip_postings`
    /// only support access by reference and label values
    pub fn has_postings(&self) -> IndexResult<bool> {
        Ok(self.state()?.has_postings)
    }

    /// All symbols in ascending order
    pub fn symbols(&self) -> IndexResult<SymbolIter> {
        Ok(self.state()?.symbols.iter())
    }

    /// Number of symbols
    pub fn symbol_count(&self) -> IndexResult<usize> {
        Ok(self.state()?.symbols.len())
    }

    /// Symbol at `symbol_ref`
    pub fn lookup_symbol(&self, symbol_ref: u32) -> IndexResult<String> {
        self.state()?.symbols.lookup(symbol_ref)
    }

    /// Sorted label names
    pub fn label_names(&self) -> IndexResult<Vec<String>> {
        let state = self.state()?;
        let names = if state.has_postings {
            state
                .postings
                .keys()
                .filter(|n| n.as_str() != ALL_POSTINGS_KEY.0)
                .cloned()
                .collect()
        } else {
            state.label_indices.keys().cloned().collect()
        };
        Ok(names)
    }

    /// Sorted values of `name`; empty when the name is unknown
    pub fn label_values(&self, name: &str) -> IndexResult<Vec<String>> {
        let state = self.state()?;
        if !state.has_postings {
            return state.legacy_label_values(name);
        }
        Ok(state
            .postings
            .get(name)
            .map(|values| values.iter().map(|(v, _)| v.clone()).collect())
            .unwrap_or_default())
    }

    /// Values of `name` read from the label indices section
    pub fn legacy_label_values(&self, name: &str) -> IndexResult<Vec<String>> {
        self.state()?.legacy_label_values(name)
    }

    /// Union of the postings of `values` under `name`, optionally limited to
    /// one shard. Unknown values contribute nothing.
    pub fn postings(
        &self,
        name: &str,
        shard: Option<&ShardAnnotation>,
        values: &[&str],
    ) -> IndexResult<BoxPostings> {
        let state = self.state()?;
        let mut lists = Vec::with_capacity(values.len());
        for value in values {
            if let Some(offset) = state.postings_offset(name, value) {
                lists.push(ListPostings::boxed(state.read_postings_list(offset)?));
            }
        }
        let merged = merge(lists);
        Ok(match shard {
            Some(shard) => Self::sharded(&state, merged, shard)?,
            None => merged,
        })
    }

    /// Every series, optionally limited to one shard
    pub fn all_postings(&self, shard: Option<&ShardAnnotation>) -> IndexResult<BoxPostings> {
        self.postings(ALL_POSTINGS_KEY.0, shard, &[ALL_POSTINGS_KEY.1])
    }

    /// Union of the postings of every value of `name` accepted by `pred`
    pub fn postings_matching(
        &self,
        name: &str,
        shard: Option<&ShardAnnotation>,
        pred: &dyn ValuePredicate,
    ) -> IndexResult<BoxPostings> {
        let state = self.state()?;
        let Some(values) = state.postings.get(name) else {
            return Ok(empty_postings());
        };
        let mut lists = Vec::new();
        for (value, offset) in values {
            if pred.matches(value) {
                lists.push(ListPostings::boxed(state.read_postings_list(*offset)?));
            }
        }
        let merged = merge(lists);
        Ok(match shard {
            Some(shard) => Self::sharded(&state, merged, shard)?,
            None => merged,
        })
    }

    /// Limit `inner` to the series of `shard`
    pub fn shard_postings(&self, inner: BoxPostings, shard: &ShardAnnotation) -> IndexResult<BoxPostings> {
        Self::sharded(&self.state()?, inner, shard)
    }

    fn sharded(
        state: &Arc<ReaderState>,
        inner: BoxPostings,
        shard: &ShardAnnotation,
    ) -> IndexResult<BoxPostings> {
        shard.validate()?;
        let (lo, hi) = shard.bounds();
        let (min_ref, max_ref) = state.shard_ref_range(lo, hi);
        let state = Arc::clone(state);
        let shard = *shard;
        Ok(Box::new(ShardedPostings::new(
            inner,
            min_ref,
            max_ref,
            move |r| Ok(shard.matches(state.series_fingerprint(r)?)),
        )))
    }

    /// Decode series `series_ref` into `lset` and the chunks overlapping
    /// `[mint, maxt]` into `chunks`. Both buffers are cleared first.
    /// Returns the series fingerprint.
    pub fn series(
        &self,
        series_ref: SeriesRef,
        mint: i64,
        maxt: i64,
        lset: &mut LabelSet,
        chunks: &mut Vec<ChunkMeta>,
    ) -> IndexResult<Fingerprint> {
        self.state()?.series(series_ref, mint, maxt, lset, chunks)
    }

    /// Number of series, counted by walking the series section
    pub fn series_count(&self) -> IndexResult<usize> {
        Ok(self.state()?.walk_series()?.len())
    }

    /// References of every series in file order
    pub fn series_refs(&self) -> IndexResult<Vec<SeriesRef>> {
        self.state()?.walk_series()
    }

    /// Number of series whose chunk samples are cached
    pub fn cached_sample_series(&self) -> IndexResult<usize> {
        Ok(self.state()?.cache.len())
    }

    /// Whether samples for `series_ref` are cached
    pub fn has_cached_samples(&self, series_ref: SeriesRef) -> IndexResult<bool> {
        Ok(self.state()?.cache.contains(series_ref))
    }

    /// Release the index. Closing twice is a no-op.
    pub fn close(&self) -> IndexResult<()> {
        if self.state.write().take().is_some() {
            debug!(path = ?self.path, "Closed index");
        }
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.state.read().is_none()
    }
}

impl std::fmt::Debug for IndexReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexReader")
            .field("path", &self.path)
            .field("closed", &self.is_closed())
            .finish()
    }
}
