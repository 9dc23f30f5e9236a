//! Index writer
//!
//! Builds one index file in a single pass:
//!
//! 1. `add_symbol` for every label name and value, strictly ascending
//! 2. `add_series` for every series, ascending by `(fingerprint, labels)`
//! 3. `close` writes label indices, postings, lookup tables and the TOC
//!
//! Everything goes to `<path>.tmp`. `close` syncs the temp file, opens it
//! with `IndexReader` to verify every checksum and only then renames it to
//! `path`. A writer dropped before a successful close removes its temp file.
//!
//! # Design Notes
//!
//! Single-threaded by contract; there is no internal locking. Ordering
//! violations are detected before any byte of the offending series is
//! written, so a `BuildOrder` error leaves the writer usable. An I/O error
//! poisons it.

use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::index::chunks::{
    encode_chunk_metas, ChunkSamples, DEFAULT_CHUNK_SAMPLE_INTERVAL_MS,
    DEFAULT_CHUNK_SAMPLE_THRESHOLD,
};
use crate::index::encoding::{crc32c, Crc32c, Encbuf};
use crate::index::error::{IndexError, IndexResult};
use crate::index::format::{encode_header, IndexBytes, Section, Toc, MAGIC_INDEX, SERIES_ALIGNMENT};
use crate::index::postings::MemPostings;
use crate::index::reader::{IndexReader, ReaderOptions};
use crate::index::symbols::SymbolTable;
use crate::index::types::{ChunkMeta, Fingerprint, LabelSet, SeriesRef};

/// Every n-th series is recorded in the fingerprint offsets table
pub const DEFAULT_FINGERPRINT_INTERVAL: usize = 1024;

/// Tuning knobs for `IndexWriter`
#[derive(Debug, Clone)]
pub struct WriterOptions {
    /// Series with at least this many chunks get a stored sample table
    pub chunk_sample_threshold: usize,
    /// Running max-time growth that starts a new sample
    pub chunk_sample_interval_ms: i64,
    /// Spacing of fingerprint offsets entries
    pub fingerprint_interval: usize,
    /// fsync the file before publishing it
    pub fsync: bool,
}

impl Default for WriterOptions {
    fn default() -> Self {
        Self {
            chunk_sample_threshold: DEFAULT_CHUNK_SAMPLE_THRESHOLD,
            chunk_sample_interval_ms: DEFAULT_CHUNK_SAMPLE_INTERVAL_MS,
            fingerprint_interval: DEFAULT_FINGERPRINT_INTERVAL,
            fsync: true,
        }
    }
}

/// Outcome of a successful `close`
#[derive(Debug, Clone, Serialize)]
pub struct IndexSummary {
    pub path: PathBuf,
    pub symbols: usize,
    pub series: usize,
    pub postings_lists: usize,
    pub size_bytes: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Stage {
    Symbols,
    Series,
    Done,
}

/// Buffered file writer tracking the position and a running section checksum
struct FileWriter {
    out: BufWriter<File>,
    pos: u64,
    crc: Crc32c,
}

impl FileWriter {
    fn create(path: &Path) -> IndexResult<Self> {
        Ok(Self {
            out: BufWriter::new(File::create(path)?),
            pos: 0,
            crc: Crc32c::new(),
        })
    }

    fn write(&mut self, bytes: &[u8]) -> IndexResult<()> {
        self.out.write_all(bytes)?;
        self.crc.update(bytes);
        self.pos += bytes.len() as u64;
        Ok(())
    }

    fn pad_to(&mut self, align: usize) -> IndexResult<()> {
        let rem = (self.pos % align as u64) as usize;
        if rem != 0 {
            const ZEROS: [u8; SERIES_ALIGNMENT] = [0; SERIES_ALIGNMENT];
            self.write(&ZEROS[..align - rem])?;
        }
        Ok(())
    }

    /// Checksum of everything written since the previous call
    fn take_crc(&mut self) -> u32 {
        let crc = self.crc.finalize();
        self.crc = Crc32c::new();
        crc
    }

    fn finish(mut self, fsync: bool) -> IndexResult<u64> {
        self.out.flush()?;
        let file = self.out.into_inner().map_err(|e| e.into_error())?;
        if fsync {
            file.sync_all()?;
        }
        Ok(self.pos)
    }
}

/// Single-pass writer for one index file
pub struct IndexWriter {
    path: PathBuf,
    tmp_path: PathBuf,
    opts: WriterOptions,
    f: Option<FileWriter>,
    stage: Stage,
    toc: Toc,
    current_section: Option<Section>,

    symbol_buf: Encbuf,
    last_symbol: Option<String>,
    symbol_count: usize,
    symbols: Option<SymbolTable>,

    last_series: Option<(Fingerprint, LabelSet)>,
    last_ref: Option<SeriesRef>,
    series_count: usize,
    postings: MemPostings,
    label_value_refs: BTreeMap<String, BTreeSet<u32>>,
    fingerprint_offsets: Vec<(Fingerprint, u64)>,

    buf: Encbuf,
    chunk_buf: Encbuf,
    sample_buf: Encbuf,
    poisoned: bool,
    completed: bool,
}

impl IndexWriter {
    /// Start writing an index at `path` with default options
    pub fn create(path: impl AsRef<Path>) -> IndexResult<Self> {
        Self::with_options(path, WriterOptions::default())
    }

    pub fn with_options(path: impl AsRef<Path>, opts: WriterOptions) -> IndexResult<Self> {
        let path = path.as_ref().to_path_buf();
        if opts.fingerprint_interval == 0 {
            return Err(IndexError::InvalidArgument(
                "fingerprint interval must be positive".into(),
            ));
        }
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let tmp_path = tmp_path_for(&path);
        let mut f = FileWriter::create(&tmp_path)?;

        let mut header = Encbuf::new();
        encode_header(&mut header);
        if let Err(e) = f.write(header.get()) {
            drop(f);
            let _ = std::fs::remove_file(&tmp_path);
            return Err(e);
        }
        f.take_crc();

        debug!(path = %path.display(), "Creating index");

        Ok(Self {
            path,
            tmp_path,
            opts,
            f: Some(f),
            stage: Stage::Symbols,
            toc: Toc::default(),
            current_section: None,
            symbol_buf: Encbuf::new(),
            last_symbol: None,
            symbol_count: 0,
            symbols: None,
            last_series: None,
            last_ref: None,
            series_count: 0,
            postings: MemPostings::new(),
            label_value_refs: BTreeMap::new(),
            fingerprint_offsets: Vec::new(),
            buf: Encbuf::new(),
            chunk_buf: Encbuf::new(),
            sample_buf: Encbuf::new(),
            poisoned: false,
            completed: false,
        })
    }

    /// Final location of the index
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn check_usable(&self) -> IndexResult<()> {
        if self.poisoned {
            return Err(IndexError::InvalidArgument(
                "index writer failed earlier and cannot continue".into(),
            ));
        }
        Ok(())
    }

    /// Run `op` against the file, poisoning the writer on failure
    fn io<T>(&mut self, op: impl FnOnce(&mut FileWriter) -> IndexResult<T>) -> IndexResult<T> {
        let Some(f) = self.f.as_mut() else {
            return Err(IndexError::InvalidArgument("index writer already closed".into()));
        };
        let res = op(f);
        if res.is_err() {
            self.poisoned = true;
        }
        res
    }

    /// Close the checksum of the running section and open `section`
    fn begin_section(&mut self, section: Section) -> IndexResult<()> {
        let (pos, crc) = self.io(|f| Ok((f.pos, f.take_crc())))?;
        if let Some(prev) = self.current_section.replace(section) {
            self.toc.sections[prev as usize].checksum = crc;
        }
        self.toc.sections[section as usize].offset = pos;
        Ok(())
    }

    fn write_section(&mut self, content: &[u8]) -> IndexResult<()> {
        let mut frame = Encbuf::with_capacity(content.len() + 8);
        frame.put_be32_len(content.len())?;
        frame.put_bytes(content);
        frame.put_be32(crc32c(content));
        self.io(|f| f.write(frame.get()))
    }

    /// Add the next symbol. Symbols must be strictly ascending and all
    /// symbols must be added before the first series.
    pub fn add_symbol(&mut self, sym: &str) -> IndexResult<()> {
        self.check_usable()?;
        if self.stage != Stage::Symbols {
            return Err(IndexError::BuildOrder(format!(
                "symbol {:?} added after series",
                sym
            )));
        }
        if let Some(last) = &self.last_symbol {
            if sym <= last.as_str() {
                return Err(IndexError::BuildOrder(format!(
                    "symbol {:?} is not greater than previous symbol {:?}",
                    sym, last
                )));
            }
        }
        self.symbol_buf.put_uvarint_str(sym);
        self.symbol_count += 1;
        self.last_symbol = Some(sym.to_string());
        Ok(())
    }

    fn finish_symbols(&mut self) -> IndexResult<()> {
        self.begin_section(Section::Symbols)?;

        let mut content = Encbuf::with_capacity(self.symbol_buf.len() + 4);
        content.put_be32_len(self.symbol_count)?;
        content.put_bytes(self.symbol_buf.get());
        self.write_section(content.get())?;

        let mut section = Encbuf::new();
        section.put_be32_len(content.len())?;
        section.put_bytes(content.get());
        section.put_crc32c_from(4);
        let table = SymbolTable::new(Arc::new(IndexBytes::Owned(section.into_inner())), 0)?;

        debug!(symbols = table.len(), "Finished symbols");
        self.symbols = Some(table);
        self.symbol_buf = Encbuf::new();
        self.stage = Stage::Series;
        self.begin_section(Section::Series)
    }

    /// Add a series. Returns the reference the series gets in this file.
    ///
    /// `series_ref` must be strictly increasing across calls, series must
    /// arrive ascending by `(fp, labels)` and `chunks` must be sorted by
    /// `min_time` with `min_time <= max_time` each.
    pub fn add_series(
        &mut self,
        series_ref: SeriesRef,
        lset: &LabelSet,
        fp: Fingerprint,
        chunks: &[ChunkMeta],
    ) -> IndexResult<SeriesRef> {
        self.check_usable()?;
        match self.stage {
            Stage::Symbols => self.finish_symbols()?,
            Stage::Series => {}
            Stage::Done => {
                return Err(IndexError::BuildOrder("series added after close".into()));
            }
        }

        if let Some(last) = self.last_ref {
            if series_ref <= last {
                return Err(IndexError::BuildOrder(format!(
                    "series reference {} is not greater than previous reference {}",
                    series_ref, last
                )));
            }
        }
        if let Some((last_fp, last_lset)) = &self.last_series {
            if (fp, lset) <= (*last_fp, last_lset) {
                return Err(IndexError::BuildOrder(format!(
                    "series {} (fingerprint {:#018x}) out of order",
                    lset, fp
                )));
            }
        }
        validate_chunks(lset, chunks)?;
        let refs = self.resolve_labels(lset)?;

        self.encode_series(fp, &refs, chunks);

        let data = std::mem::take(&mut self.buf);
        let mut record = Encbuf::with_capacity(data.len() + 10);
        record.put_uvarint(data.len() as u64);
        record.put_bytes(data.get());
        record.put_be32(crc32c(data.get()));
        self.buf = data;

        let offset = self.io(|f| {
            f.pad_to(SERIES_ALIGNMENT)?;
            let offset = f.pos;
            f.write(record.get())?;
            Ok(offset)
        })?;
        let reference = offset / SERIES_ALIGNMENT as u64;
        if reference > u64::from(u32::MAX) {
            self.poisoned = true;
            return Err(IndexError::InvalidArgument(format!(
                "series offset {} exceeds the addressable range",
                offset
            )));
        }

        self.postings.add(reference, lset);
        for (label, &(_, value_ref)) in lset.iter().zip(&refs) {
            self.label_value_refs
                .entry(label.name.clone())
                .or_default()
                .insert(value_ref);
        }
        if self.series_count % self.opts.fingerprint_interval == 0 {
            self.fingerprint_offsets.push((fp, offset));
        }
        self.series_count += 1;
        self.last_ref = Some(series_ref);
        self.last_series = Some((fp, lset.clone()));
        Ok(reference)
    }

    fn resolve_labels(&self, lset: &LabelSet) -> IndexResult<Vec<(u32, u32)>> {
        let Some(symbols) = self.symbols.as_ref() else {
            return Err(IndexError::BuildOrder("symbols not finalized".into()));
        };
        let resolve = |s: &str| {
            symbols.reverse_lookup(s).map_err(|e| match e {
                IndexError::NotFound(_) => IndexError::BuildOrder(format!(
                    "series {} references unknown symbol {:?}",
                    lset, s
                )),
                other => other,
            })
        };
        let mut refs = Vec::with_capacity(lset.len());
        for label in lset {
            refs.push((resolve(&label.name)?, resolve(&label.value)?));
        }
        Ok(refs)
    }

    /// Encode the record body of one series into `self.buf`
    fn encode_series(&mut self, fp: Fingerprint, refs: &[(u32, u32)], chunks: &[ChunkMeta]) {
        self.buf.reset();
        self.chunk_buf.reset();
        self.sample_buf.reset();

        self.buf.put_be64(fp);
        self.buf.put_uvarint(refs.len() as u64);
        for &(name, value) in refs {
            self.buf.put_uvarint(u64::from(name));
            self.buf.put_uvarint(u64::from(value));
        }

        self.buf.put_uvarint(chunks.len() as u64);
        let offsets = encode_chunk_metas(&mut self.chunk_buf, chunks);
        if !chunks.is_empty() && chunks.len() >= self.opts.chunk_sample_threshold {
            let samples = ChunkSamples::build(chunks, &offsets, self.opts.chunk_sample_interval_ms);
            samples.encode(&mut self.sample_buf);
        }
        self.buf.put_uvarint(self.sample_buf.len() as u64);
        self.buf.put_bytes(self.sample_buf.get());
        self.buf.put_bytes(self.chunk_buf.get());
    }

    /// Write the remaining sections, verify the file and publish it.
    ///
    /// With `skip_postings` the postings and postings table sections are
    /// left empty; series stay reachable by reference and label values
    /// through the label indices.
    pub fn close(mut self, skip_postings: bool) -> IndexResult<IndexSummary> {
        self.check_usable()?;
        if self.stage == Stage::Symbols {
            self.finish_symbols()?;
        }
        self.stage = Stage::Done;

        let label_offsets = self.write_label_indices()?;
        let postings_offsets = if skip_postings {
            self.begin_section(Section::Postings)?;
            Vec::new()
        } else {
            self.write_postings()?
        };
        self.write_label_table(&label_offsets)?;
        self.begin_section(Section::PostingsTable)?;
        if !skip_postings {
            self.write_postings_table(&postings_offsets)?;
        }
        self.write_fingerprint_offsets()?;

        // Closes the checksum of the last section.
        let crc = self.io(|f| Ok(f.take_crc()))?;
        if let Some(last) = self.current_section.take() {
            self.toc.sections[last as usize].checksum = crc;
        }

        let mut tail = Encbuf::new();
        self.toc.encode(&mut tail);
        tail.put_be32(MAGIC_INDEX);
        self.io(|f| f.write(tail.get()))?;

        let fsync = self.opts.fsync;
        let Some(f) = self.f.take() else {
            return Err(IndexError::InvalidArgument("index writer already closed".into()));
        };
        let size_bytes = match f.finish(fsync) {
            Ok(size) => size,
            Err(e) => {
                self.poisoned = true;
                return Err(e);
            }
        };

        // Never publish a file that does not read back.
        let check = IndexReader::open_with(&self.tmp_path, &ReaderOptions::verifying())?;
        check.close()?;

        std::fs::rename(&self.tmp_path, &self.path)?;
        self.completed = true;

        let summary = IndexSummary {
            path: self.path.clone(),
            symbols: self.symbol_count,
            series: self.series_count,
            postings_lists: postings_offsets.len(),
            size_bytes,
        };
        info!(
            path = %summary.path.display(),
            series = summary.series,
            symbols = summary.symbols,
            size_bytes = summary.size_bytes,
            "Index written"
        );
        Ok(summary)
    }

    fn write_label_indices(&mut self) -> IndexResult<Vec<(String, u64)>> {
        self.begin_section(Section::LabelIndices)?;
        let label_value_refs = std::mem::take(&mut self.label_value_refs);
        let mut offsets = Vec::with_capacity(label_value_refs.len());
        let mut content = Encbuf::new();
        for (name, values) in &label_value_refs {
            let offset = self.io(|f| Ok(f.pos))?;
            content.reset();
            content.put_be32(1);
            content.put_be32_len(values.len())?;
            for &v in values {
                content.put_be32(v);
            }
            self.write_section(content.get())?;
            offsets.push((name.clone(), offset));
        }
        Ok(offsets)
    }

    fn write_postings(&mut self) -> IndexResult<Vec<(String, String, u64)>> {
        self.begin_section(Section::Postings)?;
        let keys = self.postings.sorted_keys();
        let mut offsets = Vec::with_capacity(keys.len());
        let mut content = Encbuf::new();
        for (name, value) in keys {
            let Some(list) = self.postings.list(&name, &value) else {
                continue;
            };
            content.reset();
            content.put_be32_len(list.len())?;
            for &r in list {
                // Bounded by the check in `add_series`.
                content.put_be32(r as u32);
            }
            let offset = self.io(|f| Ok(f.pos))?;
            self.write_section(content.get())?;
            offsets.push((name, value, offset));
        }
        debug!(lists = offsets.len(), "Wrote postings");
        Ok(offsets)
    }

    fn write_label_table(&mut self, offsets: &[(String, u64)]) -> IndexResult<()> {
        self.begin_section(Section::LabelIndicesTable)?;
        let mut content = Encbuf::new();
        content.put_be32_len(offsets.len())?;
        for (name, offset) in offsets {
            content.put_uvarint(1);
            content.put_uvarint_str(name);
            content.put_uvarint(*offset);
        }
        self.write_section(content.get())
    }

    fn write_postings_table(&mut self, offsets: &[(String, String, u64)]) -> IndexResult<()> {
        let mut content = Encbuf::new();
        content.put_be32_len(offsets.len())?;
        for (name, value, offset) in offsets {
            content.put_uvarint(2);
            content.put_uvarint_str(name);
            content.put_uvarint_str(value);
            content.put_uvarint(*offset);
        }
        self.write_section(content.get())
    }

    fn write_fingerprint_offsets(&mut self) -> IndexResult<()> {
        self.begin_section(Section::FingerprintOffsets)?;
        let mut content = Encbuf::new();
        content.put_be32_len(self.fingerprint_offsets.len())?;
        for &(fp, offset) in &self.fingerprint_offsets {
            content.put_be64(fp);
            content.put_be64(offset);
        }
        self.write_section(content.get())
    }
}

impl Drop for IndexWriter {
    fn drop(&mut self) {
        if self.completed {
            return;
        }
        // Release the handle before unlinking.
        self.f.take();
        if let Err(e) = std::fs::remove_file(&self.tmp_path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %self.tmp_path.display(), error = %e, "Failed to remove unfinished index");
            }
        }
    }
}

fn tmp_path_for(path: &Path) -> PathBuf {
    let mut s = path.as_os_str().to_owned();
    s.push(".tmp");
    PathBuf::from(s)
}

fn validate_chunks(lset: &LabelSet, chunks: &[ChunkMeta]) -> IndexResult<()> {
    let mut prev_min = i64::MIN;
    for (i, c) in chunks.iter().enumerate() {
        if c.min_time > c.max_time {
            return Err(IndexError::BuildOrder(format!(
                "series {}: chunk {} has min time {} after max time {}",
                lset, i, c.min_time, c.max_time
            )));
        }
        if c.min_time < prev_min {
            return Err(IndexError::BuildOrder(format!(
                "series {}: chunk {} is not sorted by min time",
                lset, i
            )));
        }
        prev_min = c.min_time;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn write_symbols(w: &mut IndexWriter, syms: &[&str]) {
        let mut sorted = syms.to_vec();
        sorted.sort();
        sorted.dedup();
        for s in sorted {
            w.add_symbol(s).unwrap();
        }
    }

    #[test]
    fn test_symbols_must_ascend() {
        let dir = tempdir().unwrap();
        let mut w = IndexWriter::create(dir.path().join("index")).unwrap();
        w.add_symbol("a").unwrap();
        w.add_symbol("b").unwrap();
        assert!(matches!(w.add_symbol("b"), Err(IndexError::BuildOrder(_))));
        assert!(matches!(w.add_symbol("a"), Err(IndexError::BuildOrder(_))));
        // Still usable after a rejected symbol.
        w.add_symbol("c").unwrap();
        w.close(false).unwrap();
    }

    #[test]
    fn test_series_order_enforced() {
        let dir = tempdir().unwrap();
        let mut w = IndexWriter::create(dir.path().join("index")).unwrap();
        write_symbols(&mut w, &["a", "1", "2"]);

        let first = LabelSet::from_pairs([("a", "1")]);
        let second = LabelSet::from_pairs([("a", "2")]);
        w.add_series(1, &first, 10, &[]).unwrap();

        // Reference must grow.
        let err = w.add_series(1, &second, 20, &[]).unwrap_err();
        assert!(matches!(err, IndexError::BuildOrder(_)));
        // Fingerprint must not go backwards.
        let err = w.add_series(2, &second, 5, &[]).unwrap_err();
        assert!(matches!(err, IndexError::BuildOrder(_)));
        // Same fingerprint, labels must ascend.
        w.add_series(2, &second, 10, &[]).unwrap();

        // Symbols are frozen once series started.
        assert!(matches!(w.add_symbol("z"), Err(IndexError::BuildOrder(_))));
        w.close(false).unwrap();
    }

    #[test]
    fn test_unknown_symbol_rejected() {
        let dir = tempdir().unwrap();
        let mut w = IndexWriter::create(dir.path().join("index")).unwrap();
        write_symbols(&mut w, &["a", "1"]);
        let lset = LabelSet::from_pairs([("a", "2")]);
        let err = w.add_series(1, &lset, 1, &[]).unwrap_err();
        assert!(matches!(err, IndexError::BuildOrder(_)));
        assert!(err.to_string().contains("unknown symbol"));
    }

    #[test]
    fn test_chunks_validated() {
        let dir = tempdir().unwrap();
        let mut w = IndexWriter::create(dir.path().join("index")).unwrap();
        write_symbols(&mut w, &["a", "1"]);
        let lset = LabelSet::from_pairs([("a", "1")]);

        let inverted = [ChunkMeta::new(10, 5, 0)];
        assert!(matches!(w.add_series(1, &lset, 1, &inverted), Err(IndexError::BuildOrder(_))));

        let unsorted = [ChunkMeta::new(10, 20, 0), ChunkMeta::new(5, 30, 0)];
        assert!(matches!(w.add_series(1, &lset, 1, &unsorted), Err(IndexError::BuildOrder(_))));

        let overlapping = [ChunkMeta::new(5, 30, 0), ChunkMeta::new(10, 20, 0)];
        w.add_series(1, &lset, 1, &overlapping).unwrap();
    }

    #[test]
    fn test_series_references_are_aligned_offsets() {
        let dir = tempdir().unwrap();
        let mut w = IndexWriter::create(dir.path().join("index")).unwrap();
        write_symbols(&mut w, &["a", "1", "2", "3"]);
        let mut refs = Vec::new();
        for (i, v) in ["1", "2", "3"].iter().enumerate() {
            let lset = LabelSet::from_pairs([("a", *v)]);
            refs.push(w.add_series(i as u64 + 1, &lset, i as u64, &[]).unwrap());
        }
        assert!(refs.windows(2).all(|w| w[0] < w[1]));
        assert!(refs[0] > 0);
        w.close(false).unwrap();
    }

    #[test]
    fn test_close_publishes_atomically() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("index");
        let mut w = IndexWriter::create(&path).unwrap();
        write_symbols(&mut w, &["a", "1"]);
        w.add_series(1, &LabelSet::from_pairs([("a", "1")]), 1, &[]).unwrap();

        assert!(tmp_path_for(&path).exists());
        assert!(!path.exists());

        let summary = w.close(false).unwrap();
        assert!(path.exists());
        assert!(!tmp_path_for(&path).exists());
        assert_eq!(summary.series, 1);
        assert_eq!(summary.symbols, 2);
        // ("", "") and a=1
        assert_eq!(summary.postings_lists, 2);
        assert_eq!(summary.size_bytes, std::fs::metadata(&path).unwrap().len());
    }

    #[test]
    fn test_dropped_writer_leaves_nothing() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("index");
        {
            let mut w = IndexWriter::create(&path).unwrap();
            w.add_symbol("a").unwrap();
        }
        assert!(!path.exists());
        assert!(!tmp_path_for(&path).exists());
    }

    #[test]
    fn test_invalid_options() {
        let dir = tempdir().unwrap();
        let opts = WriterOptions {
            fingerprint_interval: 0,
            ..Default::default()
        };
        assert!(IndexWriter::with_options(dir.path().join("index"), opts).is_err());
    }
}
