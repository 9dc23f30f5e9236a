//! tsindex CLI
//!
//! Command-line interface for series index files:
//! - Build an index from a JSON series list
//! - Inspect layout, symbols and labels
//! - Select series with label matchers
//! - Serialize a symbolizer
//! - Generate a default config file

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use tsindex::config::{generate_default_config, Config, LoggingConfig};
use tsindex::index::format::{Section, FOOTER_LEN, TOC_LEN};
use tsindex::index::{
    postings_for_matchers, IndexBuilder, IndexReader, LabelSet, Matcher, SeriesEntry,
    ShardAnnotation,
};
use tsindex::symbolizer::{Codec, Symbolizer};

#[derive(Parser)]
#[command(name = "tsindex")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Build and query series index files")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file (default: search the standard locations)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Output format (table, json)
    #[arg(short, long, default_value = "table", global = true)]
    pub format: String,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Build an index from a JSON array of {labels, chunks} objects
    Build {
        /// Input JSON file
        #[arg(short, long)]
        input: PathBuf,
        /// Index file to create
        #[arg(short, long)]
        output: PathBuf,
        /// Leave out postings; series stay reachable by reference
        #[arg(long)]
        skip_postings: bool,
    },

    /// Show header, sections and counts of an index
    Inspect {
        file: PathBuf,
    },

    /// List the symbol table
    Symbols {
        file: PathBuf,
    },

    /// List label names, or the values of one label
    Labels {
        file: PathBuf,
        name: Option<String>,
    },

    /// Print series selected by label matchers
    Series {
        file: PathBuf,
        /// Matchers like job="api", env!=dev, pod=~"web-.*"
        #[arg(short, long = "match", required = true)]
        matchers: Vec<String>,
        /// Start of the time range (ms)
        #[arg(long, default_value_t = i64::MIN)]
        mint: i64,
        /// End of the time range (ms)
        #[arg(long, default_value_t = i64::MAX)]
        maxt: i64,
        /// Shard to select
        #[arg(long, requires = "of")]
        shard: Option<u32>,
        /// Shard count (power of two)
        #[arg(long, requires = "shard")]
        of: Option<u32>,
    },

    /// Intern the label sets of a JSON series list and write a serialized symbolizer
    Symbolize {
        #[arg(short, long)]
        input: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
        /// Codec (none, lz4, zstd); defaults to the configured codec
        #[arg(long)]
        codec: Option<Codec>,
    },

    /// Generate default config file
    Config {
        /// Output path (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(Serialize)]
struct SectionReport {
    name: &'static str,
    offset: usize,
    length: usize,
    checksum: String,
}

#[derive(Serialize)]
struct InspectReport {
    path: PathBuf,
    version: u8,
    size_bytes: usize,
    symbols: usize,
    series: usize,
    has_postings: bool,
    label_names: Vec<String>,
    sections: Vec<SectionReport>,
}

#[derive(Serialize)]
struct SeriesReport {
    series_ref: u64,
    fingerprint: String,
    labels: LabelSet,
    chunks: Vec<tsindex::ChunkMeta>,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load_with_env(path)?,
        None => Config::load_default(),
    };
    init_logging(&config.logging)?;

    let json = cli.format == "json";

    match cli.command {
        Commands::Build {
            input,
            output,
            skip_postings,
        } => {
            let entries = read_series(&input)?;
            let mut builder = IndexBuilder::with_options(config.writer_options());
            for entry in entries {
                builder.add_entry(entry)?;
            }
            let summary = builder.build(&output, skip_postings)?;

            if json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                println!("Wrote {}", summary.path.display());
                println!("  Series:         {}", summary.series);
                println!("  Symbols:        {}", summary.symbols);
                println!("  Postings lists: {}", summary.postings_lists);
                println!("  Size:           {} bytes", summary.size_bytes);
            }
        }

        Commands::Inspect { file } => {
            let reader = open(&file, &config)?;
            let size = reader.size_bytes()?;
            let toc = reader.toc()?;
            let toc_start = size - FOOTER_LEN - TOC_LEN;
            let sections = Section::ALL
                .iter()
                .map(|&section| {
                    let (start, end) = toc.extent(section, toc_start);
                    SectionReport {
                        name: section.name(),
                        offset: start,
                        length: end - start,
                        checksum: format!("{:#010x}", toc.entry(section).checksum),
                    }
                })
                .collect();
            let report = InspectReport {
                path: file.clone(),
                version: reader.version()?,
                size_bytes: size,
                symbols: reader.symbol_count()?,
                series: reader.series_count()?,
                has_postings: reader.has_postings()?,
                label_names: reader.label_names()?,
                sections,
            };
            reader.close()?;

            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("{} (format v{}, {} bytes)", report.path.display(), report.version, report.size_bytes);
                println!();
                println!("{:<22} {:>12} {:>12} {:>12}", "Section", "Offset", "Length", "CRC32C");
                println!("{}", "-".repeat(61));
                for s in &report.sections {
                    println!("{:<22} {:>12} {:>12} {:>12}", s.name, s.offset, s.length, s.checksum);
                }
                println!();
                println!("Symbols:      {}", report.symbols);
                println!("Series:       {}", report.series);
                println!("Postings:     {}", if report.has_postings { "yes" } else { "skipped" });
                println!("Label names:  {}", report.label_names.join(", "));
            }
        }

        Commands::Symbols { file } => {
            let reader = open(&file, &config)?;
            let symbols = reader.symbols()?.collect::<Result<Vec<_>, _>>()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&symbols)?);
            } else {
                for (i, sym) in symbols.iter().enumerate() {
                    println!("{:>8}  {}", i, sym);
                }
            }
        }

        Commands::Labels { file, name } => {
            let reader = open(&file, &config)?;
            let values = match &name {
                Some(name) => reader.label_values(name)?,
                None => reader.label_names()?,
            };
            if json {
                println!("{}", serde_json::to_string_pretty(&values)?);
            } else if values.is_empty() {
                match name {
                    Some(name) => println!("No values for label {:?}", name),
                    None => println!("No labels"),
                }
            } else {
                for v in values {
                    println!("{}", v);
                }
            }
        }

        Commands::Series {
            file,
            matchers,
            mint,
            maxt,
            shard,
            of,
        } => {
            let matchers = matchers
                .iter()
                .map(|m| m.parse::<Matcher>())
                .collect::<Result<Vec<_>, _>>()?;
            let shard = match (shard, of) {
                (Some(shard), Some(of)) => Some(ShardAnnotation::new(shard, of)?),
                _ => None,
            };

            let reader = open(&file, &config)?;
            let mut postings = postings_for_matchers(&reader, shard.as_ref(), &matchers)?;
            let mut lset = LabelSet::new();
            let mut chunks = Vec::new();
            let mut count = 0usize;
            while postings.next() {
                let series_ref = postings.at();
                let fp = reader.series(series_ref, mint, maxt, &mut lset, &mut chunks)?;
                count += 1;
                if json {
                    let report = SeriesReport {
                        series_ref,
                        fingerprint: format!("{:016x}", fp),
                        labels: lset.clone(),
                        chunks: chunks.clone(),
                    };
                    println!("{}", serde_json::to_string(&report)?);
                } else {
                    println!("{} {:016x} chunks={}", lset, fp, chunks.len());
                    for c in &chunks {
                        println!(
                            "    [{}, {}] checksum={:#010x} kb={} entries={}",
                            c.min_time, c.max_time, c.checksum, c.kb, c.entries
                        );
                    }
                }
            }
            if let Some(e) = postings.err() {
                bail!("postings iteration failed: {}", e);
            }
            if !json {
                println!();
                println!("{} series", count);
            }
        }

        Commands::Symbolize {
            input,
            output,
            codec,
        } => {
            let codec = codec.unwrap_or(config.symbolizer.codec);
            let entries = read_series(&input)?;
            let mut symbolizer = Symbolizer::new();
            for entry in &entries {
                symbolizer.add(&entry.labels)?;
            }
            let bytes = symbolizer.serialize(codec)?;
            std::fs::write(&output, &bytes)
                .with_context(|| format!("writing {}", output.display()))?;

            println!(
                "Interned {} strings ({} bytes raw) from {} series; wrote {} bytes with {}",
                symbolizer.len(),
                symbolizer.uncompressed_size(),
                entries.len(),
                bytes.len(),
                codec
            );
        }

        Commands::Config { output } => {
            let content = generate_default_config();
            match output {
                Some(path) => {
                    std::fs::write(&path, content)?;
                    println!("Config written to {}", path.display());
                }
                None => print!("{}", content),
            }
        }
    }

    Ok(())
}

fn open(path: &Path, config: &Config) -> anyhow::Result<IndexReader> {
    IndexReader::open_with(path, &config.reader_options())
        .with_context(|| format!("opening index {}", path.display()))
}

fn read_series(path: &Path) -> anyhow::Result<Vec<SeriesEntry>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    let entries = serde_json::from_str(&content)
        .with_context(|| format!("parsing {}", path.display()))?;
    Ok(entries)
}

fn init_logging(config: &LoggingConfig) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("tsindex={}", config.level)));

    // Logs go to stderr unless a file is configured; stdout carries command output.
    let writer = match &config.file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("opening log file {}", path))?;
            BoxMakeWriter::new(std::sync::Mutex::new(file))
        }
        None => BoxMakeWriter::new(std::io::stderr),
    };

    let registry = tracing_subscriber::registry().with(filter);
    if config.format == "json" {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(writer))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(writer))
            .init();
    }
    Ok(())
}
