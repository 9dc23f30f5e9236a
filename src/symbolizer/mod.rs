//! Label interning for chunk-level label storage
//!
//! A `Symbolizer` turns label sets into `SymbolPair` sequences during a
//! build. Every distinct string is stored once in an arena and names and
//! values share one id space. Label names are normalized on the way in;
//! values are kept verbatim, so a string used in both roles may get two ids.
//!
//! Two standalone stream formats exist:
//!
//! ```text
//! checkpoint:  uvarint n | (uvarint len | bytes)*
//! serialized:  u8 codec | uvarint rawLen | uvarint payloadLen | payload | be32 crc32(all preceding bytes)
//! ```
//!
//! Loading either yields a `FrozenSymbolizer`, which answers lookups but
//! rejects interning with `IndexError::ReadOnly`.

pub mod compression;

use std::io::Write;

use tracing::debug;

use crate::index::encoding::{uvarint_len, Decbuf, Encbuf, MAX_VARINT_LEN32};
use crate::index::{IndexError, IndexResult};
use crate::index::{Label, LabelSet};

pub use compression::Codec;

/// Ids of one label's name and value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SymbolPair {
    pub name: u32,
    pub value: u32,
}

impl SymbolPair {
    pub fn new(name: u32, value: u32) -> Self {
        Self { name, value }
    }
}

/// Rewrite every character outside `[A-Za-z0-9_]` to `_`
pub fn normalize_label_name(name: &str) -> std::borrow::Cow<'_, str> {
    if name.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_') {
        return std::borrow::Cow::Borrowed(name);
    }
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect::<String>()
        .into()
}

/// Append-only string storage with sorted reverse lookup
#[derive(Debug, Clone, Default)]
struct Arena {
    data: String,
    spans: Vec<(usize, usize)>,
    /// Ids ordered by their string
    sorted: Vec<u32>,
}

impl Arena {
    fn len(&self) -> usize {
        self.spans.len()
    }

    fn get(&self, id: u32) -> Option<&str> {
        let &(start, end) = self.spans.get(id as usize)?;
        Some(&self.data[start..end])
    }

    fn search(&self, s: &str) -> Result<usize, usize> {
        self.sorted
            .binary_search_by(|&id| self.get(id).unwrap_or_default().cmp(s))
    }

    fn find(&self, s: &str) -> Option<u32> {
        self.search(s).ok().map(|i| self.sorted[i])
    }

    fn intern(&mut self, s: &str) -> IndexResult<u32> {
        match self.search(s) {
            Ok(i) => Ok(self.sorted[i]),
            Err(i) => {
                let id = u32::try_from(self.spans.len()).map_err(|_| {
                    IndexError::InvalidArgument("symbolizer holds too many strings".into())
                })?;
                let start = self.data.len();
                self.data.push_str(s);
                self.spans.push((start, self.data.len()));
                self.sorted.insert(i, id);
                Ok(id)
            }
        }
    }

    fn raw_len(&self) -> usize {
        self.data.len()
    }

    fn clear(&mut self) {
        self.data.clear();
        self.spans.clear();
        self.sorted.clear();
    }

    fn encode_checkpoint(&self, enc: &mut Encbuf) {
        enc.put_uvarint(self.spans.len() as u64);
        for &(start, end) in &self.spans {
            enc.put_uvarint_str(&self.data[start..end]);
        }
    }

    fn decode_checkpoint(bytes: &[u8]) -> IndexResult<Self> {
        let mut d = Decbuf::new(bytes);
        let n = d.uvarint()? as usize;
        let mut arena = Arena::default();
        for _ in 0..n {
            let s = d.uvarint_str()?;
            let start = arena.data.len();
            arena.data.push_str(s);
            arena.spans.push((start, arena.data.len()));
        }
        if !d.is_empty() {
            return Err(IndexError::corrupt(format!(
                "{} trailing bytes after symbolizer checkpoint",
                d.len()
            )));
        }
        let mut sorted: Vec<u32> = (0..n as u32).collect();
        sorted.sort_by(|&a, &b| arena.get(a).cmp(&arena.get(b)));
        arena.sorted = sorted;
        Ok(arena)
    }
}

/// Read access shared by the build-phase and frozen symbolizers
pub trait SymbolLookup {
    /// String with id `id`
    fn symbol(&self, id: u32) -> IndexResult<&str>;

    /// Number of distinct strings
    fn num_symbols(&self) -> usize;

    /// Rebuild the labels of `pairs` into `buf`, reusing its allocation
    fn lookup_into(&self, pairs: &[SymbolPair], buf: &mut LabelSet) -> IndexResult<()> {
        let mut labels = std::mem::take(buf).into_labels();
        labels.clear();
        for pair in pairs {
            labels.push(Label::new(self.symbol(pair.name)?, self.symbol(pair.value)?));
        }
        *buf = LabelSet::from_labels(labels);
        Ok(())
    }

    fn lookup(&self, pairs: &[SymbolPair]) -> IndexResult<LabelSet> {
        let mut out = LabelSet::new();
        self.lookup_into(pairs, &mut out)?;
        Ok(out)
    }
}

/// Turns label sets into symbol pairs
pub trait LabelInterner: SymbolLookup {
    fn intern(&mut self, lset: &LabelSet) -> IndexResult<Vec<SymbolPair>>;
}

fn not_found(id: u32) -> IndexError {
    IndexError::NotFound(format!("symbol id {}", id))
}

/// Build-phase symbolizer
#[derive(Debug, Clone, Default)]
pub struct Symbolizer {
    arena: Arena,
}

impl Symbolizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Intern `lset`, returning one pair per label in label order
    pub fn add(&mut self, lset: &LabelSet) -> IndexResult<Vec<SymbolPair>> {
        let mut pairs = Vec::with_capacity(lset.len());
        for label in lset {
            let name = self.arena.intern(&normalize_label_name(&label.name))?;
            let value = self.arena.intern(&label.value)?;
            pairs.push(SymbolPair::new(name, value));
        }
        Ok(pairs)
    }

    /// Id of `s` if it has been interned
    pub fn id_of(&self, s: &str) -> Option<u32> {
        self.arena.find(s)
    }

    pub fn len(&self) -> usize {
        self.arena.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arena.len() == 0
    }

    /// Total bytes of interned strings
    pub fn uncompressed_size(&self) -> usize {
        self.arena.raw_len()
    }

    /// Upper bound of the checkpoint stream size
    pub fn checkpoint_size(&self) -> usize {
        MAX_VARINT_LEN32 + self.arena.len() * MAX_VARINT_LEN32 + self.arena.raw_len()
    }

    pub fn checkpoint(&self) -> Vec<u8> {
        let mut enc = Encbuf::with_capacity(self.checkpoint_size());
        self.arena.encode_checkpoint(&mut enc);
        enc.into_inner()
    }

    /// Write a checkpoint to `w`, returning the bytes written
    pub fn checkpoint_to<W: Write>(&self, w: &mut W) -> IndexResult<usize> {
        let bytes = self.checkpoint();
        w.write_all(&bytes)?;
        Ok(bytes.len())
    }

    /// Checkpoint compressed with `codec`, framed with the codec id, both
    /// lengths and a CRC32 over the whole frame
    pub fn serialize(&self, codec: Codec) -> IndexResult<Vec<u8>> {
        let raw = self.checkpoint();
        let payload = codec.compress(&raw)?;
        let mut enc = Encbuf::with_capacity(
            1 + uvarint_len(raw.len() as u64)
                + uvarint_len(payload.len() as u64)
                + payload.len()
                + 4,
        );
        enc.put_u8(codec.id());
        enc.put_uvarint(raw.len() as u64);
        enc.put_uvarint_bytes(&payload);
        let crc = crc32fast::hash(enc.get());
        enc.put_be32(crc);
        debug!(
            codec = %codec,
            symbols = self.arena.len(),
            raw = raw.len(),
            compressed = payload.len(),
            "Serialized symbolizer"
        );
        Ok(enc.into_inner())
    }

    /// Write the serialized form to `w`, returning the bytes written
    pub fn serialize_to<W: Write>(&self, w: &mut W, codec: Codec) -> IndexResult<usize> {
        let bytes = self.serialize(codec)?;
        w.write_all(&bytes)?;
        Ok(bytes.len())
    }

    /// Drop every interned string, keeping the allocations
    pub fn reset(&mut self) {
        self.arena.clear();
    }

    /// End the build phase
    pub fn freeze(self) -> FrozenSymbolizer {
        FrozenSymbolizer { arena: self.arena }
    }
}

impl SymbolLookup for Symbolizer {
    fn symbol(&self, id: u32) -> IndexResult<&str> {
        self.arena.get(id).ok_or_else(|| not_found(id))
    }

    fn num_symbols(&self) -> usize {
        self.arena.len()
    }
}

impl LabelInterner for Symbolizer {
    fn intern(&mut self, lset: &LabelSet) -> IndexResult<Vec<SymbolPair>> {
        self.add(lset)
    }
}

/// Lookup-only symbolizer loaded from a checkpoint or serialized stream
#[derive(Debug, Clone)]
pub struct FrozenSymbolizer {
    arena: Arena,
}

impl FrozenSymbolizer {
    pub fn from_checkpoint(bytes: &[u8]) -> IndexResult<Self> {
        Ok(Self {
            arena: Arena::decode_checkpoint(bytes)?,
        })
    }

    pub fn from_serialized(bytes: &[u8]) -> IndexResult<Self> {
        let mut d = Decbuf::new(bytes);
        let codec_id = d.u8()?;
        let raw_len = d.uvarint()?;
        let payload = d.uvarint_bytes()?;
        let framed = &bytes[..bytes.len() - d.len()];
        let stored = d.be32()?;
        if !d.is_empty() {
            return Err(IndexError::corrupt(format!(
                "{} trailing bytes after serialized symbolizer",
                d.len()
            )));
        }
        let computed = crc32fast::hash(framed);
        if stored != computed {
            return Err(IndexError::corrupt(format!(
                "symbolizer checksum mismatch: stored={:#010x}, computed={:#010x}",
                stored, computed
            )));
        }
        let codec = Codec::from_id(codec_id)?;
        let raw_len = usize::try_from(raw_len)
            .map_err(|_| IndexError::corrupt(format!("symbolizer length {} too large", raw_len)))?;
        let raw = codec.decompress(payload, raw_len)?;
        Self::from_checkpoint(&raw)
    }

    /// Id of `s` if present
    pub fn id_of(&self, s: &str) -> Option<u32> {
        self.arena.find(s)
    }

    pub fn len(&self) -> usize {
        self.arena.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arena.len() == 0
    }
}

impl SymbolLookup for FrozenSymbolizer {
    fn symbol(&self, id: u32) -> IndexResult<&str> {
        self.arena.get(id).ok_or_else(|| not_found(id))
    }

    fn num_symbols(&self) -> usize {
        self.arena.len()
    }
}

impl LabelInterner for FrozenSymbolizer {
    fn intern(&mut self, _lset: &LabelSet) -> IndexResult<Vec<SymbolPair>> {
        Err(IndexError::ReadOnly)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pairs(ids: &[(u32, u32)]) -> Vec<SymbolPair> {
        ids.iter().map(|&(n, v)| SymbolPair::new(n, v)).collect()
    }

    fn reload_all(s: &Symbolizer) -> Vec<FrozenSymbolizer> {
        let mut out = vec![FrozenSymbolizer::from_checkpoint(&s.checkpoint()).unwrap()];
        for codec in Codec::ALL {
            let bytes = s.serialize(codec).unwrap();
            out.push(FrozenSymbolizer::from_serialized(&bytes).unwrap());
        }
        out
    }

    #[test]
    fn test_symbolizer() {
        struct Case {
            name: &'static str,
            sets: Vec<LabelSet>,
            expected: Vec<Vec<SymbolPair>>,
            num_labels: usize,
            checkpoint_size: usize,
            uncompressed_size: usize,
        }
        let cases = vec![
            Case {
                name: "no labels",
                sets: vec![],
                expected: vec![],
                num_labels: 0,
                checkpoint_size: MAX_VARINT_LEN32,
                uncompressed_size: 0,
            },
            Case {
                name: "no duplicate labels",
                sets: vec![
                    LabelSet::from_pairs([("foo", "bar")]),
                    LabelSet::from_pairs([("fizz", "buzz"), ("ping", "pong")]),
                ],
                expected: vec![pairs(&[(0, 1)]), pairs(&[(2, 3), (4, 5)])],
                num_labels: 6,
                checkpoint_size: MAX_VARINT_LEN32 + 6 * MAX_VARINT_LEN32 + 22,
                uncompressed_size: 22,
            },
            Case {
                name: "with duplicate labels",
                sets: vec![
                    LabelSet::from_pairs([("foo", "bar"), ("bar", "foo")]),
                    LabelSet::from_pairs([("foo", "bar"), ("fizz", "buzz"), ("ping", "pong")]),
                ],
                expected: vec![pairs(&[(0, 1), (1, 0)]), pairs(&[(2, 3), (1, 0), (4, 5)])],
                num_labels: 6,
                checkpoint_size: MAX_VARINT_LEN32 + 6 * MAX_VARINT_LEN32 + 22,
                uncompressed_size: 22,
            },
        ];

        for case in cases {
            let mut s = Symbolizer::new();
            for (lset, expected) in case.sets.iter().zip(&case.expected) {
                let got = s.add(lset).unwrap();
                assert_eq!(&got, expected, "{}", case.name);
                assert_eq!(&s.lookup(&got).unwrap(), lset, "{}", case.name);
            }
            assert_eq!(s.len(), case.num_labels, "{}", case.name);
            assert_eq!(s.checkpoint_size(), case.checkpoint_size, "{}", case.name);
            assert_eq!(s.uncompressed_size(), case.uncompressed_size, "{}", case.name);

            let mut buf = Vec::new();
            let written = s.checkpoint_to(&mut buf).unwrap();
            assert!(written <= case.checkpoint_size, "{}", case.name);

            for loaded in reload_all(&s) {
                for (lset, expected) in case.sets.iter().zip(&case.expected) {
                    assert_eq!(&loaded.lookup(expected).unwrap(), lset, "{}", case.name);
                }
            }
        }
    }

    #[test]
    fn test_unknown_id() {
        let s = Symbolizer::new();
        let err = s.lookup(&pairs(&[(0, 0)])).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_label_name_normalization() {
        assert_eq!(normalize_label_name("foo-bar"), "foo_bar");
        assert_eq!(normalize_label_name("a.b/c d"), "a_b_c_d");
        assert_eq!(normalize_label_name("fizz_buzz"), "fizz_buzz");
        assert_eq!(normalize_label_name(&normalize_label_name("x-y")), "x_y");

        let mut s = Symbolizer::new();
        let input = LabelSet::from_pairs([("foo-bar", "value1"), ("fizz_buzz", "value2")]);
        let expected = LabelSet::from_pairs([("foo_bar", "value1"), ("fizz_buzz", "value2")]);
        let got = s.add(&input).unwrap();
        assert_eq!(s.lookup(&got).unwrap(), expected);
        for loaded in reload_all(&s) {
            assert_eq!(loaded.lookup(&got).unwrap(), expected);
        }
    }

    #[test]
    fn test_same_string_as_name_and_value() {
        let mut s = Symbolizer::new();
        let input = LabelSet::from_pairs([("foo-bar", "foo-bar"), ("test-label", "test-label")]);
        let symbols = s.add(&input).unwrap();

        let check = |l: &LabelSet| {
            assert_eq!(l.get("foo_bar"), Some("foo-bar"));
            assert_eq!(l.get("test_label"), Some("test-label"));
            assert!(!l.has("foo-bar"));
            assert!(!l.has("test-label"));
        };
        check(&s.lookup(&symbols).unwrap());

        // Each string is stored once per role.
        assert_eq!(s.len(), 4);
        assert!(s.id_of("foo_bar").is_some());
        assert!(s.id_of("foo-bar").is_some());

        for mut loaded in reload_all(&s) {
            check(&loaded.lookup(&symbols).unwrap());

            let before = loaded.len();
            let err = loaded
                .intern(&LabelSet::from_pairs([("foo-bar2", "foo-bar2")]))
                .unwrap_err();
            assert!(matches!(err, IndexError::ReadOnly));
            assert_eq!(loaded.len(), before);
            assert!(loaded.id_of("foo_bar2").is_none());
        }
    }

    #[test]
    fn test_lookup_reuses_buffer() {
        let mut s = Symbolizer::new();
        let a = s.add(&LabelSet::from_pairs([("job", "api"), ("env", "prod")])).unwrap();
        let b = s.add(&LabelSet::from_pairs([("job", "web")])).unwrap();

        let mut buf = LabelSet::new();
        s.lookup_into(&a, &mut buf).unwrap();
        assert_eq!(buf.len(), 2);
        s.lookup_into(&b, &mut buf).unwrap();
        assert_eq!(buf, LabelSet::from_pairs([("job", "web")]));
    }

    #[test]
    fn test_interner_trait_objects() {
        let mut s = Symbolizer::new();
        let lset = LabelSet::from_pairs([("app", "loki")]);
        let symbols = {
            let interner: &mut dyn LabelInterner = &mut s;
            interner.intern(&lset).unwrap()
        };
        let mut frozen = s.freeze();
        assert_eq!(frozen.num_symbols(), 2);
        assert_eq!(frozen.lookup(&symbols).unwrap(), lset);
        let interner: &mut dyn LabelInterner = &mut frozen;
        assert!(matches!(interner.intern(&lset), Err(IndexError::ReadOnly)));
    }

    #[test]
    fn test_reset() {
        let mut s = Symbolizer::new();
        s.add(&LabelSet::from_pairs([("a", "b")])).unwrap();
        s.reset();
        assert!(s.is_empty());
        assert_eq!(s.uncompressed_size(), 0);
        let got = s.add(&LabelSet::from_pairs([("c", "d")])).unwrap();
        assert_eq!(got, pairs(&[(0, 1)]));
    }

    #[test]
    fn test_corrupt_streams() {
        let mut s = Symbolizer::new();
        s.add(&LabelSet::from_pairs([("job", "api"), ("env", "prod")])).unwrap();

        let mut bytes = s.serialize(Codec::Lz4).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        assert!(FrozenSymbolizer::from_serialized(&bytes).unwrap_err().is_corruption());

        let mut bytes = s.serialize(Codec::None).unwrap();
        bytes[0] = 7;
        assert!(FrozenSymbolizer::from_serialized(&bytes).unwrap_err().is_corruption());

        let checkpoint = s.checkpoint();
        let truncated = &checkpoint[..checkpoint.len() - 2];
        assert!(FrozenSymbolizer::from_checkpoint(truncated).unwrap_err().is_corruption());

        let mut padded = checkpoint.clone();
        padded.push(0);
        assert!(FrozenSymbolizer::from_checkpoint(&padded).unwrap_err().is_corruption());
    }

    /// Rebuild a serialized frame with other header fields, optionally
    /// keeping the original checksum
    fn reframe(original: &[u8], codec_id: u8, raw_len: u64, keep_crc: bool) -> Vec<u8> {
        let mut d = Decbuf::new(original);
        d.u8().unwrap();
        d.uvarint().unwrap();
        let payload = d.uvarint_bytes().unwrap();
        let old_crc = d.be32().unwrap();

        let mut enc = Encbuf::new();
        enc.put_u8(codec_id);
        enc.put_uvarint(raw_len);
        enc.put_uvarint_bytes(payload);
        let crc = if keep_crc { old_crc } else { crc32fast::hash(enc.get()) };
        enc.put_be32(crc);
        enc.into_inner()
    }

    #[test]
    fn test_tampered_header_fields() {
        let mut s = Symbolizer::new();
        s.add(&LabelSet::from_pairs([("job", "api")])).unwrap();
        let bytes = s.serialize(Codec::Lz4).unwrap();
        let raw_len = s.checkpoint().len() as u64;

        // Unchanged fields reproduce the original frame.
        assert_eq!(reframe(&bytes, Codec::Lz4.id(), raw_len, false), bytes);

        // The checksum covers the length and the codec id.
        let huge = reframe(&bytes, Codec::Lz4.id(), 1 << 62, true);
        assert!(FrozenSymbolizer::from_serialized(&huge).unwrap_err().is_corruption());
        let swapped = reframe(&bytes, Codec::Zstd.id(), raw_len, true);
        assert!(FrozenSymbolizer::from_serialized(&swapped).unwrap_err().is_corruption());

        // A consistent frame with an impossible length fails without allocating it.
        let huge = reframe(&bytes, Codec::Lz4.id(), 1 << 62, false);
        assert!(FrozenSymbolizer::from_serialized(&huge).unwrap_err().is_corruption());
        let huge = reframe(&bytes, Codec::None.id(), u64::MAX, false);
        assert!(FrozenSymbolizer::from_serialized(&huge).unwrap_err().is_corruption());

        let mut trailing = bytes.clone();
        trailing.push(0);
        assert!(FrozenSymbolizer::from_serialized(&trailing).unwrap_err().is_corruption());
    }
}
