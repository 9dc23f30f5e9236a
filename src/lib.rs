//! # tsindex
//!
//! Series index for log storage: one immutable file per index holding a
//! symbol table, series records with chunk metadata and postings lists.
//!
//! ## Features
//!
//! - **Checksummed layout**: every section and series record carries a CRC32C
//! - **Atomic publish**: indexes are written to a temp file, verified, then renamed
//! - **Sub-linear chunk lookup**: chunk samples jump near a time range
//! - **Concurrent readers**: memory-mapped, lock-free apart from the sample cache
//! - **Label interning**: a symbolizer with checkpoint and compressed forms
//!
//! ## Modules
//!
//! - [`index`]: writer, reader, postings and matchers
//! - [`symbolizer`]: label interning for chunk-level label storage
//! - [`config`]: TOML and environment configuration
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use tsindex::index::*;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut builder = IndexBuilder::new();
//!     builder.add_series(
//!         LabelSet::from_pairs([("app", "api"), ("env", "prod")]),
//!         [ChunkMeta::new(1_000, 2_000, 0xdead_beef)],
//!     )?;
//!     builder.build("/tmp/index", false)?;
//!
//!     let reader = IndexReader::open("/tmp/index")?;
//!     let mut postings = postings_for_matchers(&reader, None, &[Matcher::equal("app", "api")])?;
//!
//!     let mut lset = LabelSet::new();
//!     let mut chunks = Vec::new();
//!     while postings.next() {
//!         reader.series(postings.at(), 0, i64::MAX, &mut lset, &mut chunks)?;
//!         println!("{} has {} chunks", lset, chunks.len());
//!     }
//!
//!     reader.close()?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod index;
pub mod symbolizer;

// Re-export top-level types for convenience
pub use index::{
    postings_for_matchers, ChunkMeta, IndexBuilder, IndexError, IndexReader, IndexResult,
    IndexSummary, IndexWriter, LabelSet, Matcher, Postings, ReaderOptions, SeriesRef,
    ShardAnnotation, WriterOptions,
};

pub use symbolizer::{Codec, FrozenSymbolizer, LabelInterner, SymbolLookup, SymbolPair, Symbolizer};

pub use config::{Config, ConfigError, LoggingConfig, ReaderConfig, SymbolizerConfig, WriterConfig};
