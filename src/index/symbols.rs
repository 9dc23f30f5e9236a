//! Sorted, deduplicated symbol storage
//!
//! Every label name and value in an index is stored once in the symbols
//! section, and series records refer to them by position. The table keeps
//! the byte position of every `SYMBOL_FACTOR`-th symbol, so that:
//!
//! - `lookup(ref)` jumps to the nearest sample and scans at most
//!   `SYMBOL_FACTOR - 1` entries
//! - `reverse_lookup(s)` binary searches the samples, then scans one run
//!
//! The table never changes once written.

use std::cmp::Ordering;
use std::sync::Arc;

use crate::index::encoding::Decbuf;
use crate::index::error::{IndexError, IndexResult};
use crate::index::format::IndexBytes;

/// Distance between sampled symbol positions
pub const SYMBOL_FACTOR: usize = 32;

/// Read-only view of a symbols section
#[derive(Debug, Clone)]
pub struct SymbolTable {
    bytes: Arc<IndexBytes>,
    /// Absolute position of the first symbol entry
    start: usize,
    /// Absolute position one past the last symbol entry
    end: usize,
    /// Absolute positions of symbols 0, 32, 64, ...
    offsets: Vec<usize>,
    count: usize,
}

impl SymbolTable {
    /// Open the section at `offset`, verifying its length prefix, count and
    /// checksum.
    pub fn new(bytes: Arc<IndexBytes>, offset: usize) -> IndexResult<Self> {
        let (start, end, count, offsets) = {
            let mut d = Decbuf::section_at(&bytes, offset)?;
            let content_start = offset + 4;
            let content_len = d.len();
            let count = d.be32()? as usize;
            let mut offsets = Vec::with_capacity(count.min(d.len()).div_ceil(SYMBOL_FACTOR));
            let start = content_start + 4;

            for i in 0..count {
                if i % SYMBOL_FACTOR == 0 {
                    offsets.push(content_start + (content_len - d.len()));
                }
                d.uvarint_bytes()?;
            }
            if !d.is_empty() {
                return Err(IndexError::corrupt(format!(
                    "{} trailing bytes after {} symbols",
                    d.len(),
                    count
                )));
            }
            (start, content_start + content_len, count, offsets)
        };

        Ok(Self {
            bytes,
            start,
            end,
            offsets,
            count,
        })
    }

    /// Number of symbols
    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Memory held by the sampled offset table
    pub fn size(&self) -> usize {
        self.offsets.len() * std::mem::size_of::<usize>()
    }

    fn run_at(&self, pos: usize) -> Decbuf<'_> {
        Decbuf::new(&self.bytes[pos..self.end])
    }

    /// Symbol at position `symbol_ref`
    pub fn lookup(&self, symbol_ref: u32) -> IndexResult<String> {
        self.lookup_str(symbol_ref).map(str::to_owned)
    }

    /// Borrowing form of `lookup`
    pub fn lookup_str(&self, symbol_ref: u32) -> IndexResult<&str> {
        let idx = symbol_ref as usize;
        if idx >= self.count {
            return Err(IndexError::NotFound(format!("symbol reference {}", symbol_ref)));
        }
        let mut d = self.run_at(self.offsets[idx / SYMBOL_FACTOR]);
        for _ in 0..idx % SYMBOL_FACTOR {
            d.uvarint_bytes()?;
        }
        d.uvarint_str()
    }

    /// Position of `sym`
    pub fn reverse_lookup(&self, sym: &str) -> IndexResult<u32> {
        if self.offsets.is_empty() {
            return Err(IndexError::NotFound(format!("symbol {:?}", sym)));
        }

        // Last sample not greater than `sym`.
        let mut lo = 0usize;
        let mut hi = self.offsets.len();
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            let sample = self.run_at(self.offsets[mid]).uvarint_str()?;
            if sample <= sym {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        if lo == 0 {
            return Err(IndexError::NotFound(format!("symbol {:?}", sym)));
        }
        let run = lo - 1;

        let mut d = self.run_at(self.offsets[run]);
        let first = run * SYMBOL_FACTOR;
        let last = (first + SYMBOL_FACTOR).min(self.count);
        for idx in first..last {
            let candidate = d.uvarint_str()?;
            match candidate.cmp(sym) {
                Ordering::Equal => return Ok(idx as u32),
                Ordering::Greater => break,
                Ordering::Less => {}
            }
        }
        Err(IndexError::NotFound(format!("symbol {:?}", sym)))
    }

    /// Ascending iterator over all symbols; each call starts from the beginning
    pub fn iter(&self) -> SymbolIter {
        SymbolIter {
            bytes: Arc::clone(&self.bytes),
            pos: self.start,
            end: self.end,
            remaining: self.count,
        }
    }
}

/// Owned iterator over a symbol table
///
/// Holds its own handle on the index bytes, so it may outlive the borrow of
/// the reader that produced it.
#[derive(Debug)]
pub struct SymbolIter {
    bytes: Arc<IndexBytes>,
    pos: usize,
    end: usize,
    remaining: usize,
}

impl Iterator for SymbolIter {
    type Item = IndexResult<String>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let window = &self.bytes[self.pos..self.end];
        let mut d = Decbuf::new(window);
        match d.uvarint_str() {
            Ok(s) => {
                self.pos += window.len() - d.len();
                self.remaining -= 1;
                Some(Ok(s.to_owned()))
            }
            Err(e) => {
                self.remaining = 0;
                Some(Err(e))
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.remaining))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::encoding::{crc32c, Encbuf};

    fn table_in_larger_buffer() -> (Vec<u8>, usize) {
        let mut buf = Encbuf::new();
        // Symbols rarely start at offset zero.
        buf.put_uvarint_str("something");

        let start = buf.len();
        buf.put_be32(204);
        buf.put_be32(100);
        for i in 0..100u32 {
            let c = char::from_u32(i).unwrap().to_string();
            buf.put_uvarint_str(&c);
        }
        let checksum = crc32c(&buf.get()[start + 4..]);
        buf.put_be32(checksum);
        (buf.into_inner(), start)
    }

    #[test]
    fn test_symbols() {
        let (bytes, start) = table_in_larger_buffer();
        let table = SymbolTable::new(Arc::new(IndexBytes::Owned(bytes)), start).unwrap();

        // Only four sampled offsets are kept for 100 symbols.
        assert_eq!(table.size(), 32);
        assert_eq!(table.len(), 100);

        for i in (0..100u32).rev() {
            let expected = char::from_u32(i).unwrap().to_string();
            assert_eq!(table.lookup(i).unwrap(), expected);
        }
        assert!(table.lookup(100).unwrap_err().is_not_found());

        for i in (0..100u32).rev() {
            let sym = char::from_u32(i).unwrap().to_string();
            assert_eq!(table.reverse_lookup(&sym).unwrap(), i);
        }
        let missing = char::from_u32(100).unwrap().to_string();
        assert!(table.reverse_lookup(&missing).unwrap_err().is_not_found());

        for (i, sym) in table.iter().enumerate() {
            assert_eq!(sym.unwrap(), char::from_u32(i as u32).unwrap().to_string());
        }
        assert_eq!(table.iter().count(), 100);
    }

    #[test]
    fn test_symbols_checksum_mismatch() {
        let (mut bytes, start) = table_in_larger_buffer();
        bytes[start + 20] ^= 0x40;
        let err = SymbolTable::new(Arc::new(IndexBytes::Owned(bytes)), start).unwrap_err();
        assert!(err.is_corruption());
    }

    #[test]
    fn test_symbols_truncated() {
        let (bytes, start) = table_in_larger_buffer();
        let truncated = bytes[..bytes.len() - 10].to_vec();
        let err = SymbolTable::new(Arc::new(IndexBytes::Owned(truncated)), start).unwrap_err();
        assert!(err.is_corruption());
    }

    #[test]
    fn test_empty_table() {
        let mut buf = Encbuf::new();
        buf.put_be32(4);
        buf.put_be32(0);
        buf.put_crc32c_from(4);
        let table = SymbolTable::new(Arc::new(IndexBytes::Owned(buf.into_inner())), 0).unwrap();
        assert!(table.is_empty());
        assert_eq!(table.size(), 0);
        assert!(table.reverse_lookup("a").is_err());
        assert!(table.iter().next().is_none());
    }

    #[test]
    fn test_reverse_lookup_between_samples() {
        let symbols: Vec<String> = (0..70).map(|i| format!("sym{:03}", i * 2)).collect();
        let mut buf = Encbuf::new();
        let mut body = Encbuf::new();
        body.put_be32(symbols.len() as u32);
        for s in &symbols {
            body.put_uvarint_str(s);
        }
        buf.put_be32(body.len() as u32);
        buf.put_bytes(body.get());
        buf.put_crc32c_from(4);

        let table = SymbolTable::new(Arc::new(IndexBytes::Owned(buf.into_inner())), 0).unwrap();
        assert_eq!(table.reverse_lookup("sym064").unwrap(), 32);
        assert_eq!(table.reverse_lookup("sym138").unwrap(), 69);
        assert!(table.reverse_lookup("sym063").is_err());
        assert!(table.reverse_lookup("aaa").is_err());
        assert!(table.reverse_lookup("zzz").is_err());
    }
}
