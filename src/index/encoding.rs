//! Binary encoding helpers for the index format
//!
//! - `Encbuf`: append-only byte buffer with big-endian and varint writers
//! - `Decbuf`: bounds-checked cursor that turns truncation into `Corrupt`
//! - CRC32-Castagnoli, the checksum used by every index section
//!
//! Varints follow the LEB128 layout (7 bits per byte, little-endian groups);
//! signed varints are zig-zag encoded.

use crate::index::error::{IndexError, IndexResult};

/// Longest encoding of a 32-bit varint
pub const MAX_VARINT_LEN32: usize = 5;

/// Longest encoding of a 64-bit varint
pub const MAX_VARINT_LEN64: usize = 10;

const CASTAGNOLI_POLY: u32 = 0x82F6_3B78;

const fn castagnoli_table() -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = i as u32;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 1 != 0 {
                (crc >> 1) ^ CASTAGNOLI_POLY
            } else {
                crc >> 1
            };
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

static CASTAGNOLI_TABLE: [u32; 256] = castagnoli_table();

/// Incremental CRC32-Castagnoli hasher
#[derive(Debug, Clone, Copy, Default)]
pub struct Crc32c {
    state: u32,
}

impl Crc32c {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, data: &[u8]) {
        let mut crc = !self.state;
        for &byte in data {
            crc = CASTAGNOLI_TABLE[((crc ^ byte as u32) & 0xff) as usize] ^ (crc >> 8);
        }
        self.state = !crc;
    }

    pub fn finalize(&self) -> u32 {
        self.state
    }
}

/// One-shot CRC32-Castagnoli
pub fn crc32c(data: &[u8]) -> u32 {
    let mut hasher = Crc32c::new();
    hasher.update(data);
    hasher.finalize()
}

/// Number of bytes `v` occupies as an unsigned varint
pub fn uvarint_len(mut v: u64) -> usize {
    let mut n = 1;
    while v >= 0x80 {
        v >>= 7;
        n += 1;
    }
    n
}

/// Append-only encoding buffer
#[derive(Debug, Default, Clone)]
pub struct Encbuf {
    buf: Vec<u8>,
}

impl Encbuf {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    pub fn reset(&mut self) {
        self.buf.clear();
    }

    pub fn get(&self) -> &[u8] {
        &self.buf
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.buf
    }

    pub fn put_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    pub fn put_be32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    pub fn put_be64(&mut self, v: u64) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    /// Write a length or count as be32, failing if it does not fit
    pub fn put_be32_len(&mut self, v: usize) -> IndexResult<()> {
        let v = u32::try_from(v).map_err(|_| {
            IndexError::InvalidArgument(format!("value {} does not fit in 32 bits", v))
        })?;
        self.put_be32(v);
        Ok(())
    }

    pub fn put_uvarint(&mut self, mut v: u64) {
        while v >= 0x80 {
            self.buf.push((v as u8) | 0x80);
            v >>= 7;
        }
        self.buf.push(v as u8);
    }

    pub fn put_varint(&mut self, v: i64) {
        let zigzag = ((v << 1) ^ (v >> 63)) as u64;
        self.put_uvarint(zigzag);
    }

    pub fn put_bytes(&mut self, b: &[u8]) {
        self.buf.extend_from_slice(b);
    }

    pub fn put_uvarint_bytes(&mut self, b: &[u8]) {
        self.put_uvarint(b.len() as u64);
        self.put_bytes(b);
    }

    pub fn put_uvarint_str(&mut self, s: &str) {
        self.put_uvarint_bytes(s.as_bytes());
    }

    /// Append the CRC32-Castagnoli of everything from `start` to the end
    pub fn put_crc32c_from(&mut self, start: usize) {
        let crc = crc32c(&self.buf[start..]);
        self.put_be32(crc);
    }
}

/// Bounds-checked decoding cursor over a byte slice
#[derive(Debug, Clone, Copy)]
pub struct Decbuf<'a> {
    b: &'a [u8],
}

impl<'a> Decbuf<'a> {
    pub fn new(b: &'a [u8]) -> Self {
        Self { b }
    }

    /// Open a `be32 len | content | be32 crc` section starting at `offset`,
    /// verifying the checksum over `content`.
    pub fn section_at(bytes: &'a [u8], offset: usize) -> IndexResult<Self> {
        let head = bytes
            .get(offset..offset.saturating_add(4))
            .ok_or_else(|| IndexError::corrupt(format!("section at {} out of range", offset)))?;
        let len = u32::from_be_bytes([head[0], head[1], head[2], head[3]]) as usize;
        let start = offset + 4;
        Self::verified(bytes, start, len)
    }

    /// Open a `uvarint len | content | be32 crc` record starting at `offset`.
    pub fn uvarint_record_at(bytes: &'a [u8], offset: usize) -> IndexResult<Self> {
        let tail = bytes
            .get(offset..)
            .ok_or_else(|| IndexError::corrupt(format!("record at {} out of range", offset)))?;
        let mut head = Decbuf::new(tail);
        let len = head.uvarint()? as usize;
        let start = offset + (tail.len() - head.len());
        Self::verified(bytes, start, len)
    }

    fn verified(bytes: &'a [u8], start: usize, len: usize) -> IndexResult<Self> {
        let end = start
            .checked_add(len)
            .and_then(|e| e.checked_add(4))
            .filter(|&e| e <= bytes.len())
            .ok_or_else(|| {
                IndexError::corrupt(format!(
                    "section at {} with length {} exceeds {} bytes",
                    start,
                    len,
                    bytes.len()
                ))
            })?;
        let content = &bytes[start..start + len];
        let stored = u32::from_be_bytes([
            bytes[end - 4],
            bytes[end - 3],
            bytes[end - 2],
            bytes[end - 1],
        ]);
        let computed = crc32c(content);
        if stored != computed {
            return Err(IndexError::corrupt(format!(
                "checksum mismatch at {}: stored={:#010x}, computed={:#010x}",
                start, stored, computed
            )));
        }
        Ok(Self::new(content))
    }

    pub fn len(&self) -> usize {
        self.b.len()
    }

    pub fn is_empty(&self) -> bool {
        self.b.is_empty()
    }

    /// Remaining undecoded bytes
    pub fn remaining(&self) -> &'a [u8] {
        self.b
    }

    fn take(&mut self, n: usize) -> IndexResult<&'a [u8]> {
        if self.b.len() < n {
            return Err(IndexError::corrupt(format!(
                "unexpected end of data: need {} bytes, have {}",
                n,
                self.b.len()
            )));
        }
        let (head, tail) = self.b.split_at(n);
        self.b = tail;
        Ok(head)
    }

    pub fn u8(&mut self) -> IndexResult<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn be32(&mut self) -> IndexResult<u32> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn be64(&mut self) -> IndexResult<u64> {
        let b = self.take(8)?;
        Ok(u64::from_be_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ]))
    }

    pub fn uvarint(&mut self) -> IndexResult<u64> {
        let b = self.b;
        let mut value: u64 = 0;
        for (i, &byte) in b.iter().enumerate() {
            if i == MAX_VARINT_LEN64 {
                break;
            }
            if i == MAX_VARINT_LEN64 - 1 && byte > 1 {
                return Err(IndexError::corrupt("varint overflows 64 bits"));
            }
            value |= u64::from(byte & 0x7f) << (7 * i);
            if byte < 0x80 {
                self.b = &b[i + 1..];
                return Ok(value);
            }
        }
        Err(IndexError::corrupt("invalid or truncated varint"))
    }

    pub fn uvarint32(&mut self) -> IndexResult<u32> {
        let v = self.uvarint()?;
        u32::try_from(v).map_err(|_| IndexError::corrupt(format!("varint {} exceeds 32 bits", v)))
    }

    pub fn varint(&mut self) -> IndexResult<i64> {
        let zigzag = self.uvarint()?;
        Ok(((zigzag >> 1) as i64) ^ -((zigzag & 1) as i64))
    }

    pub fn uvarint_bytes(&mut self) -> IndexResult<&'a [u8]> {
        let len = self.uvarint()? as usize;
        self.take(len)
    }

    pub fn uvarint_str(&mut self) -> IndexResult<&'a str> {
        let bytes = self.uvarint_bytes()?;
        std::str::from_utf8(bytes).map_err(|e| IndexError::corrupt(format!("invalid UTF-8: {}", e)))
    }
}
