//! Chunk metadata encoding and chunk samples
//!
//! Chunk metas are delta encoded against the previous chunk's max time:
//!
//! ```text
//! varint(min_time - prev_max_time) | uvarint(max_time - min_time)
//! uvarint kb | uvarint entries | be32 checksum
//! ```
//!
//! Decoding therefore has to start at a position whose predecessor's max
//! time is known. A `ChunkSample` records such positions: chunk index, byte
//! offset, the max time of the chunk before it and the running maximum of
//! max times up to it. Samples are taken at the first chunk, the last chunk,
//! and whenever the running maximum has grown by at least the sampling
//! interval since the previous sample.
//!
//! Because `largest_maxt` never decreases, every chunk before sample `i`
//! ends at or before sample `i`'s `largest_maxt`. A query for `[mint, ..]`
//! can start at the sample preceding the first sample whose `largest_maxt`
//! reaches `mint` without missing a chunk.

use crate::index::encoding::{Decbuf, Encbuf};
use crate::index::error::{IndexError, IndexResult};
use crate::index::types::ChunkMeta;

/// Minimum chunk count for which the writer stores a sample table
pub const DEFAULT_CHUNK_SAMPLE_THRESHOLD: usize = 8;

/// Growth of the running max time that triggers a new sample (1h)
pub const DEFAULT_CHUNK_SAMPLE_INTERVAL_MS: i64 = 3_600_000;

/// Append one chunk meta, delta encoded against `prev_max_time`
pub fn encode_chunk_meta(enc: &mut Encbuf, chunk: &ChunkMeta, prev_max_time: i64) {
    enc.put_varint(chunk.min_time.wrapping_sub(prev_max_time));
    enc.put_uvarint(chunk.max_time.wrapping_sub(chunk.min_time) as u64);
    enc.put_uvarint(u64::from(chunk.kb));
    enc.put_uvarint(u64::from(chunk.entries));
    enc.put_be32(chunk.checksum);
}

/// Read one chunk meta written by `encode_chunk_meta`
pub fn decode_chunk_meta(d: &mut Decbuf<'_>, prev_max_time: i64) -> IndexResult<ChunkMeta> {
    let min_time = prev_max_time.wrapping_add(d.varint()?);
    let max_time = min_time.wrapping_add(d.uvarint()? as i64);
    let kb = d.uvarint32()?;
    let entries = d.uvarint32()?;
    let checksum = d.be32()?;
    Ok(ChunkMeta {
        min_time,
        max_time,
        checksum,
        kb,
        entries,
    })
}

/// Encode `chunks` in order, returning the byte offset of each meta
pub fn encode_chunk_metas(enc: &mut Encbuf, chunks: &[ChunkMeta]) -> Vec<usize> {
    let base = enc.len();
    let mut offsets = Vec::with_capacity(chunks.len());
    let mut prev_max = 0i64;
    for chunk in chunks {
        offsets.push(enc.len() - base);
        encode_chunk_meta(enc, chunk, prev_max);
        prev_max = chunk.max_time;
    }
    offsets
}

/// A position in a series' chunk list from which decoding can resume
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkSample {
    /// Largest max time among chunks `0..=idx`
    pub largest_maxt: i64,
    /// Chunk index
    pub idx: usize,
    /// Byte offset of the chunk's meta, relative to the first chunk meta
    pub offset: usize,
    /// Max time of chunk `idx - 1`, or 0 for the first chunk
    pub prev_chunk_maxt: i64,
}

/// Samples of one series, in chunk order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChunkSamples {
    samples: Vec<ChunkSample>,
}

impl ChunkSamples {
    pub fn from_samples(samples: Vec<ChunkSample>) -> Self {
        Self { samples }
    }

    /// Sample `chunks`, given the byte offset of each encoded meta
    pub fn build(chunks: &[ChunkMeta], offsets: &[usize], interval_ms: i64) -> Self {
        let mut samples: Vec<ChunkSample> = Vec::new();
        let mut largest_maxt = i64::MIN;
        let last = chunks.len().saturating_sub(1);

        for (i, (chunk, &offset)) in chunks.iter().zip(offsets).enumerate() {
            largest_maxt = largest_maxt.max(chunk.max_time);
            let take = match samples.last() {
                None => true,
                Some(prev) => {
                    i == last || largest_maxt.saturating_sub(prev.largest_maxt) >= interval_ms
                }
            };
            if take {
                samples.push(ChunkSample {
                    largest_maxt,
                    idx: i,
                    offset,
                    prev_chunk_maxt: if i == 0 { 0 } else { chunks[i - 1].max_time },
                });
            }
        }
        Self { samples }
    }

    /// Sample an encoded chunk list by decoding it once
    pub fn from_encoded(chunk_bytes: &[u8], count: usize, interval_ms: i64) -> IndexResult<Self> {
        let mut d = Decbuf::new(chunk_bytes);
        // Every chunk meta takes at least two bytes.
        let cap = count.min(chunk_bytes.len() / 2);
        let mut chunks = Vec::with_capacity(cap);
        let mut offsets = Vec::with_capacity(cap);
        let mut prev_max = 0i64;
        for _ in 0..count {
            offsets.push(chunk_bytes.len() - d.len());
            let chunk = decode_chunk_meta(&mut d, prev_max)?;
            prev_max = chunk.max_time;
            chunks.push(chunk);
        }
        Ok(Self::build(&chunks, &offsets, interval_ms))
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn as_slice(&self) -> &[ChunkSample] {
        &self.samples
    }

    pub fn encode(&self, enc: &mut Encbuf) {
        enc.put_uvarint(self.samples.len() as u64);
        for s in &self.samples {
            enc.put_uvarint(s.idx as u64);
            enc.put_uvarint(s.offset as u64);
            enc.put_varint(s.largest_maxt);
            enc.put_varint(s.prev_chunk_maxt);
        }
    }

    /// Decode a table written by `encode`, checking it against the chunk count
    pub fn decode(d: &mut Decbuf<'_>, chunk_count: usize) -> IndexResult<Self> {
        let n = d.uvarint()? as usize;
        if n > chunk_count {
            return Err(IndexError::corrupt(format!(
                "{} chunk samples for {} chunks",
                n, chunk_count
            )));
        }
        let mut samples = Vec::with_capacity(n.min(d.len() / 4));
        for _ in 0..n {
            let idx = d.uvarint()? as usize;
            let offset = d.uvarint()? as usize;
            let largest_maxt = d.varint()?;
            let prev_chunk_maxt = d.varint()?;
            if idx >= chunk_count {
                return Err(IndexError::corrupt(format!(
                    "chunk sample index {} out of range for {} chunks",
                    idx, chunk_count
                )));
            }
            samples.push(ChunkSample {
                largest_maxt,
                idx,
                offset,
                prev_chunk_maxt,
            });
        }
        Ok(Self { samples })
    }

    /// Sample to start decoding from for a query beginning at `mint`, or
    /// `None` when every chunk ends before `mint`
    pub fn for_query_starting(&self, mint: i64) -> Option<&ChunkSample> {
        let i = self.samples.partition_point(|s| s.largest_maxt < mint);
        if i == self.samples.len() {
            return None;
        }
        self.samples.get(i.saturating_sub(1))
    }
}

/// Decode chunks `start.idx..count` from `chunk_bytes`, keeping those that
/// overlap `[mint, maxt]`. Stops at the first chunk starting after `maxt`.
pub fn decode_clipped(
    chunk_bytes: &[u8],
    start: &ChunkSample,
    count: usize,
    mint: i64,
    maxt: i64,
    out: &mut Vec<ChunkMeta>,
) -> IndexResult<()> {
    let tail = chunk_bytes.get(start.offset..).ok_or_else(|| {
        IndexError::corrupt(format!(
            "chunk sample offset {} exceeds {} chunk bytes",
            start.offset,
            chunk_bytes.len()
        ))
    })?;
    let mut d = Decbuf::new(tail);
    let mut prev_max = start.prev_chunk_maxt;
    for _ in start.idx..count {
        let chunk = decode_chunk_meta(&mut d, prev_max)?;
        prev_max = chunk.max_time;
        if chunk.min_time > maxt {
            break;
        }
        if chunk.overlaps(mint, maxt) {
            out.push(chunk);
        }
    }
    Ok(())
}

/// Start of the chunk list, for series decoded without samples
pub const FIRST_CHUNK: ChunkSample = ChunkSample {
    largest_maxt: i64::MIN,
    idx: 0,
    offset: 0,
    prev_chunk_maxt: 0,
};
