//! Block codecs for serialized symbolizers
//!
//! The codec id is written ahead of the payload so a reader never needs to
//! be told which codec produced a stream.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::index::{IndexError, IndexResult};

const ZSTD_LEVEL: i32 = 3;

/// Largest expansion of one lz4 block
const LZ4_MAX_RATIO: usize = 255;

/// Largest expansion of one zstd frame: a 1-byte RLE block regenerates a
/// full 128 KiB block behind a 3-byte header
const ZSTD_MAX_RATIO: usize = 128 * 1024 / 4;

/// Upper bound for any decoded checkpoint
pub const MAX_CHECKPOINT_LEN: usize = u32::MAX as usize;

/// Block compressor applied to a symbolizer checkpoint
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum Codec {
    None = 0,
    #[default]
    Lz4 = 1,
    Zstd = 2,
}

impl Codec {
    pub const ALL: [Codec; 3] = [Codec::None, Codec::Lz4, Codec::Zstd];

    pub fn id(self) -> u8 {
        self as u8
    }

    pub fn from_id(id: u8) -> IndexResult<Self> {
        match id {
            0 => Ok(Codec::None),
            1 => Ok(Codec::Lz4),
            2 => Ok(Codec::Zstd),
            other => Err(IndexError::corrupt(format!("unknown codec id {}", other))),
        }
    }

    pub fn compress(self, data: &[u8]) -> IndexResult<Vec<u8>> {
        match self {
            Codec::None => Ok(data.to_vec()),
            Codec::Lz4 => Ok(lz4_flex::compress(data)),
            Codec::Zstd => zstd::bulk::compress(data, ZSTD_LEVEL)
                .map_err(|e| IndexError::Compression(format!("zstd: {}", e))),
        }
    }

    /// Most bytes `compressed_len` bytes of this codec can decode to
    pub fn max_decompressed_len(self, compressed_len: usize) -> usize {
        let bound = match self {
            Codec::None => compressed_len,
            Codec::Lz4 => compressed_len.saturating_mul(LZ4_MAX_RATIO),
            Codec::Zstd => compressed_len.saturating_mul(ZSTD_MAX_RATIO),
        };
        bound.min(MAX_CHECKPOINT_LEN)
    }

    /// Decompress `data` into exactly `raw_len` bytes.
    ///
    /// `raw_len` is checked against what `data` could possibly expand to
    /// before anything is allocated.
    pub fn decompress(self, data: &[u8], raw_len: usize) -> IndexResult<Vec<u8>> {
        let bound = self.max_decompressed_len(data.len());
        if raw_len > bound {
            return Err(IndexError::corrupt(format!(
                "{} stream of {} bytes cannot decode to {} bytes (at most {})",
                self,
                data.len(),
                raw_len,
                bound
            )));
        }
        let out = match self {
            Codec::None => data.to_vec(),
            Codec::Lz4 => lz4_flex::decompress(data, raw_len)
                .map_err(|e| IndexError::Compression(format!("lz4: {}", e)))?,
            Codec::Zstd => zstd::bulk::decompress(data, raw_len)
                .map_err(|e| IndexError::Compression(format!("zstd: {}", e)))?,
        };
        if out.len() != raw_len {
            return Err(IndexError::Compression(format!(
                "{} stream decoded to {} bytes, expected {}",
                self,
                out.len(),
                raw_len
            )));
        }
        Ok(out)
    }
}

impl fmt::Display for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Codec::None => "none",
            Codec::Lz4 => "lz4",
            Codec::Zstd => "zstd",
        };
        f.write_str(name)
    }
}

impl FromStr for Codec {
    type Err = IndexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "none" => Ok(Codec::None),
            "lz4" => Ok(Codec::Lz4),
            "zstd" => Ok(Codec::Zstd),
            other => Err(IndexError::InvalidArgument(format!("unknown codec {:?}", other))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codecs_roundtrip() {
        let data: Vec<u8> = b"service_name=api,namespace=prod,".repeat(64);
        for codec in Codec::ALL {
            let packed = codec.compress(&data).unwrap();
            let unpacked = codec.decompress(&packed, data.len()).unwrap();
            assert_eq!(unpacked, data, "codec {}", codec);
            if codec != Codec::None {
                assert!(packed.len() < data.len(), "codec {} did not compress", codec);
            }
        }
    }

    #[test]
    fn test_wrong_length_is_rejected() {
        let packed = Codec::Lz4.compress(b"hello hello hello").unwrap();
        assert!(Codec::Lz4.decompress(&packed, 5).is_err());
        assert!(Codec::None.decompress(b"abc", 4).is_err());
    }

    #[test]
    fn test_impossible_length_is_rejected_before_decoding() {
        let packed = Codec::Lz4.compress(b"job=api").unwrap();
        let err = Codec::Lz4.decompress(&packed, 1 << 62).unwrap_err();
        assert!(err.is_corruption());

        let packed = Codec::Zstd.compress(b"job=api").unwrap();
        let err = Codec::Zstd.decompress(&packed, usize::MAX).unwrap_err();
        assert!(err.is_corruption());

        assert_eq!(Codec::None.max_decompressed_len(10), 10);
        assert_eq!(Codec::Lz4.max_decompressed_len(10), 2550);
        assert_eq!(Codec::Zstd.max_decompressed_len(usize::MAX), MAX_CHECKPOINT_LEN);
    }

    #[test]
    fn test_codec_names_and_ids() {
        for codec in Codec::ALL {
            assert_eq!(codec.to_string().parse::<Codec>().unwrap(), codec);
            assert_eq!(Codec::from_id(codec.id()).unwrap(), codec);
        }
        assert_eq!("LZ4".parse::<Codec>().unwrap(), Codec::Lz4);
        assert!("snappy".parse::<Codec>().is_err());
        assert!(Codec::from_id(9).unwrap_err().is_corruption());
    }
}
