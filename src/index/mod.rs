//! Series index
//!
//! One immutable, checksummed file per index, holding the symbol table,
//! series records with chunk metadata, and postings lists:
//!
//! - **IndexWriter**: single-pass build of a new file, published atomically
//! - **IndexReader**: concurrent queries over an mmap'd or in-memory file
//! - **Postings**: sorted series-reference iterators and their set algebra
//! - **SymbolTable**: sorted string table addressed by index
//!
//! # Architecture
//!
//! ```text
//! Query: {job="api", env!="dev"} over [mint, maxt]
//!        ↓
//! Postings table: (job, api) → [ref...], (env, dev) → [ref...]
//!        ↓
//! Intersect / subtract → ascending series references
//!        ↓
//! Series(ref): labels via symbol table, chunk metas clipped to [mint, maxt]
//!              (chunk samples skip straight to the first relevant chunk)
//! ```

pub mod builder;
mod cache;
pub mod chunks;
pub mod encoding;
mod error;
pub mod format;
pub mod matcher;
pub mod postings;
pub mod reader;
pub mod symbols;
mod types;
pub mod writer;

pub use builder::{IndexBuilder, SeriesEntry};
pub use error::{IndexError, IndexResult};
pub use matcher::{postings_for_matchers, MatchType, Matcher, ValuePredicate};
pub use postings::{expand_postings, BoxPostings, MemPostings, Postings};
pub use reader::{IndexReader, ReaderOptions};
pub use symbols::SymbolTable;
pub use types::{ChunkMeta, Fingerprint, Label, LabelSet, SeriesRef, ShardAnnotation};
pub use writer::{IndexSummary, IndexWriter, WriterOptions};
