//! Index file layout: header, table of contents and backing bytes
//!
//! Layout:
//! ```text
//! ┌─────────────────────────────────────────┐
//! │ HEADER (5 bytes)                        │
//! │   magic: be32 = 0xBAAAD700              │
//! │   version: u8                           │
//! ├─────────────────────────────────────────┤
//! │ SYMBOLS                                 │
//! │ SERIES          (16-byte aligned)       │
//! │ LABEL INDICES                           │
//! │ POSTINGS                                │
//! │ LABEL INDICES TABLE                     │
//! │ POSTINGS TABLE                          │
//! │ FINGERPRINT OFFSETS                     │
//! ├─────────────────────────────────────────┤
//! │ TOC                                     │
//! │   per section: offset be64, crc be32    │
//! │   toc_checksum: be32                    │
//! ├─────────────────────────────────────────┤
//! │ FOOTER                                  │
//! │   magic: be32                           │
//! └─────────────────────────────────────────┘
//! ```
//!
//! A section spans from its own offset to the next section's offset, so
//! padding is covered by the section checksum.

use crate::index::encoding::{crc32c, Decbuf, Encbuf};
use crate::index::error::{IndexError, IndexResult};
use memmap2::Mmap;
use std::ops::Deref;

/// Magic number opening and closing every index file
pub const MAGIC_INDEX: u32 = 0xBAAA_D700;

/// Current format version
pub const FORMAT_V1: u8 = 1;

/// Header size in bytes
pub const HEADER_LEN: usize = 5;

/// Series records are aligned so that `offset / 16` is a compact reference
pub const SERIES_ALIGNMENT: usize = 16;

/// Number of sections referenced by the TOC
pub const SECTION_COUNT: usize = 7;

/// Size of the TOC including its own checksum
pub const TOC_LEN: usize = SECTION_COUNT * 12 + 4;

/// Footer size in bytes
pub const FOOTER_LEN: usize = 4;

/// Sections in file order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Section {
    Symbols = 0,
    Series = 1,
    LabelIndices = 2,
    Postings = 3,
    LabelIndicesTable = 4,
    PostingsTable = 5,
    FingerprintOffsets = 6,
}

impl Section {
    pub const ALL: [Section; SECTION_COUNT] = [
        Section::Symbols,
        Section::Series,
        Section::LabelIndices,
        Section::Postings,
        Section::LabelIndicesTable,
        Section::PostingsTable,
        Section::FingerprintOffsets,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Section::Symbols => "symbols",
            Section::Series => "series",
            Section::LabelIndices => "label indices",
            Section::Postings => "postings",
            Section::LabelIndicesTable => "label indices table",
            Section::PostingsTable => "postings table",
            Section::FingerprintOffsets => "fingerprint offsets",
        }
    }
}

/// Offset and checksum of one section
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SectionEntry {
    pub offset: u64,
    pub checksum: u32,
}

/// Table of contents written at the end of the file
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Toc {
    pub sections: [SectionEntry; SECTION_COUNT],
}

impl Toc {
    pub fn entry(&self, section: Section) -> SectionEntry {
        self.sections[section as usize]
    }

    pub fn offset(&self, section: Section) -> usize {
        self.sections[section as usize].offset as usize
    }

    /// Byte range of a section; `toc_start` closes the last one
    pub fn extent(&self, section: Section, toc_start: usize) -> (usize, usize) {
        let idx = section as usize;
        let start = self.sections[idx].offset as usize;
        let end = if idx + 1 < SECTION_COUNT {
            self.sections[idx + 1].offset as usize
        } else {
            toc_start
        };
        (start, end)
    }

    pub fn encode(&self, enc: &mut Encbuf) {
        let start = enc.len();
        for entry in &self.sections {
            enc.put_be64(entry.offset);
            enc.put_be32(entry.checksum);
        }
        enc.put_crc32c_from(start);
    }

    /// Read the TOC from the tail of a complete file and validate its
    /// offsets against the file size.
    pub fn read(bytes: &[u8]) -> IndexResult<Self> {
        if bytes.len() < HEADER_LEN + TOC_LEN + FOOTER_LEN {
            return Err(IndexError::corrupt(format!(
                "file of {} bytes is too small for an index",
                bytes.len()
            )));
        }
        let footer_start = bytes.len() - FOOTER_LEN;
        let footer = &bytes[footer_start..];
        let magic = u32::from_be_bytes([footer[0], footer[1], footer[2], footer[3]]);
        if magic != MAGIC_INDEX {
            return Err(IndexError::corrupt(format!(
                "invalid footer magic: {:#010x}",
                magic
            )));
        }

        let toc_start = footer_start - TOC_LEN;
        let raw = &bytes[toc_start..footer_start];
        let (body, crc) = raw.split_at(TOC_LEN - 4);
        let stored = u32::from_be_bytes([crc[0], crc[1], crc[2], crc[3]]);
        let computed = crc32c(body);
        if stored != computed {
            return Err(IndexError::corrupt(format!(
                "TOC checksum mismatch: stored={:#010x}, computed={:#010x}",
                stored, computed
            )));
        }

        let mut d = Decbuf::new(body);
        let mut toc = Toc::default();
        for entry in toc.sections.iter_mut() {
            entry.offset = d.be64()?;
            entry.checksum = d.be32()?;
        }

        let mut prev = HEADER_LEN as u64;
        for (section, entry) in Section::ALL.iter().zip(toc.sections.iter()) {
            if entry.offset < prev || entry.offset > toc_start as u64 {
                return Err(IndexError::corrupt(format!(
                    "{} section offset {} out of order",
                    section.name(),
                    entry.offset
                )));
            }
            prev = entry.offset;
        }

        Ok(toc)
    }
}

/// Write the file header
pub fn encode_header(enc: &mut Encbuf) {
    enc.put_be32(MAGIC_INDEX);
    enc.put_u8(FORMAT_V1);
}

/// Validate the header and return the format version
pub fn read_header(bytes: &[u8]) -> IndexResult<u8> {
    let mut d = Decbuf::new(bytes);
    let magic = d
        .be32()
        .map_err(|_| IndexError::corrupt("file too small for header"))?;
    if magic != MAGIC_INDEX {
        return Err(IndexError::corrupt(format!("invalid magic: {:#010x}", magic)));
    }
    let version = d.u8()?;
    if version != FORMAT_V1 {
        return Err(IndexError::corrupt(format!(
            "unsupported format version: {}",
            version
        )));
    }
    Ok(version)
}

/// Bytes backing an open index: a read-only mapping or an owned buffer
pub enum IndexBytes {
    Mapped(Mmap),
    Owned(Vec<u8>),
}

impl Deref for IndexBytes {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match self {
            IndexBytes::Mapped(m) => m,
            IndexBytes::Owned(v) => v,
        }
    }
}

impl std::fmt::Debug for IndexBytes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self {
            IndexBytes::Mapped(_) => "Mapped",
            IndexBytes::Owned(_) => "Owned",
        };
        f.debug_struct("IndexBytes")
            .field("kind", &kind)
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_file() -> Vec<u8> {
        let mut enc = Encbuf::new();
        encode_header(&mut enc);
        enc.put_bytes(&[0u8; 32]);
        let mut toc = Toc::default();
        for (i, entry) in toc.sections.iter_mut().enumerate() {
            entry.offset = (HEADER_LEN + i * 4) as u64;
            entry.checksum = i as u32;
        }
        toc.encode(&mut enc);
        enc.put_be32(MAGIC_INDEX);
        enc.into_inner()
    }

    #[test]
    fn test_header_roundtrip() {
        let mut enc = Encbuf::new();
        encode_header(&mut enc);
        assert_eq!(enc.len(), HEADER_LEN);
        assert_eq!(read_header(enc.get()).unwrap(), FORMAT_V1);
    }

    #[test]
    fn test_header_rejects_bad_magic_and_version() {
        let mut bytes = vec![0, 0, 0xD7, 0x00, FORMAT_V1];
        assert!(read_header(&bytes).unwrap_err().is_corruption());

        bytes[..4].copy_from_slice(&MAGIC_INDEX.to_be_bytes());
        bytes[4] = 9;
        let err = read_header(&bytes).unwrap_err();
        assert!(err.to_string().contains("unsupported format version"));
    }

    #[test]
    fn test_toc_read() {
        let bytes = sample_file();
        let toc = Toc::read(&bytes).unwrap();
        assert_eq!(toc.offset(Section::Symbols), HEADER_LEN);
        assert_eq!(toc.entry(Section::Postings).checksum, 3);

        let toc_start = bytes.len() - FOOTER_LEN - TOC_LEN;
        let (start, end) = toc.extent(Section::FingerprintOffsets, toc_start);
        assert_eq!(start, HEADER_LEN + 24);
        assert_eq!(end, toc_start);
    }

    #[test]
    fn test_toc_detects_corruption() {
        let mut bytes = sample_file();
        let toc_start = bytes.len() - FOOTER_LEN - TOC_LEN;
        bytes[toc_start + 3] ^= 0x01;
        assert!(Toc::read(&bytes).unwrap_err().is_corruption());

        let mut bytes = sample_file();
        let last = bytes.len() - 1;
        bytes[last] = 0;
        assert!(Toc::read(&bytes).unwrap_err().is_corruption());

        assert!(Toc::read(b"corrupted contents").is_err());
    }
}
