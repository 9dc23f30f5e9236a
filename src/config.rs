//! Configuration System
//!
//! Handles loading configuration from files and environment variables.
//! Supports TOML config files and environment variable overrides.

use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::index::chunks::{DEFAULT_CHUNK_SAMPLE_INTERVAL_MS, DEFAULT_CHUNK_SAMPLE_THRESHOLD};
use crate::index::writer::DEFAULT_FINGERPRINT_INTERVAL;
use crate::index::{ReaderOptions, WriterOptions};
use crate::symbolizer::Codec;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub writer: WriterConfig,

    #[serde(default)]
    pub reader: ReaderConfig,

    #[serde(default)]
    pub symbolizer: SymbolizerConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Index writer configuration
#[derive(Debug, Clone, Deserialize)]
pub struct WriterConfig {
    #[serde(default = "default_chunk_sample_threshold")]
    pub chunk_sample_threshold: usize,

    #[serde(default = "default_chunk_sample_interval")]
    pub chunk_sample_interval_ms: i64,

    #[serde(default = "default_fingerprint_interval")]
    pub fingerprint_interval: usize,

    #[serde(default = "default_true")]
    pub fsync: bool,
}

fn default_chunk_sample_threshold() -> usize {
    DEFAULT_CHUNK_SAMPLE_THRESHOLD
}

fn default_chunk_sample_interval() -> i64 {
    DEFAULT_CHUNK_SAMPLE_INTERVAL_MS // 1 hour
}

fn default_fingerprint_interval() -> usize {
    DEFAULT_FINGERPRINT_INTERVAL
}

fn default_true() -> bool {
    true
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            chunk_sample_threshold: default_chunk_sample_threshold(),
            chunk_sample_interval_ms: default_chunk_sample_interval(),
            fingerprint_interval: default_fingerprint_interval(),
            fsync: default_true(),
        }
    }
}

impl From<&WriterConfig> for WriterOptions {
    fn from(config: &WriterConfig) -> Self {
        Self {
            chunk_sample_threshold: config.chunk_sample_threshold,
            chunk_sample_interval_ms: config.chunk_sample_interval_ms,
            fingerprint_interval: config.fingerprint_interval,
            fsync: config.fsync,
        }
    }
}

/// Index reader configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ReaderConfig {
    #[serde(default = "default_true")]
    pub verify_checksums: bool,

    #[serde(default = "default_true")]
    pub use_mmap: bool,

    #[serde(default = "default_sample_cache_shards")]
    pub sample_cache_shards: usize,

    /// Sampling interval for series written without a sample table
    #[serde(default = "default_chunk_sample_interval")]
    pub chunk_sample_interval_ms: i64,
}

fn default_sample_cache_shards() -> usize {
    16
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            verify_checksums: default_true(),
            use_mmap: default_true(),
            sample_cache_shards: default_sample_cache_shards(),
            chunk_sample_interval_ms: default_chunk_sample_interval(),
        }
    }
}

impl From<&ReaderConfig> for ReaderOptions {
    fn from(config: &ReaderConfig) -> Self {
        Self {
            verify_checksums: config.verify_checksums,
            use_mmap: config.use_mmap,
            sample_cache_shards: config.sample_cache_shards,
            chunk_sample_interval_ms: config.chunk_sample_interval_ms,
        }
    }
}

/// Symbolizer serialization configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SymbolizerConfig {
    #[serde(default)]
    pub codec: Codec,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default = "default_log_format")]
    pub format: String,

    pub file: Option<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            file: None,
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        Self::parse(&content).map_err(|error| ConfigError::Parse {
            path: path.to_path_buf(),
            error,
        })
    }

    fn parse(content: &str) -> Result<Self, String> {
        toml::from_str(content).map_err(|e| e.to_string())
    }

    /// Load configuration from environment variables only
    pub fn from_env() -> Self {
        let mut config = Config::default();
        config.apply_env_overrides();
        config
    }

    /// Load configuration with environment variable overrides
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load from default locations or environment
    pub fn load_default() -> Self {
        let config_paths = [
            dirs::config_dir().map(|p| p.join("tsindex").join("config.toml")),
            Some(PathBuf::from("/etc/tsindex/config.toml")),
            Some(PathBuf::from("./config.toml")),
        ];

        for path_opt in config_paths.iter().flatten() {
            if path_opt.exists() {
                match Self::load_with_env(path_opt) {
                    Ok(config) => {
                        tracing::info!("Loaded config from {:?}", path_opt);
                        return config;
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load config from {:?}: {}", path_opt, e);
                    }
                }
            }
        }

        tracing::info!("Using default config with environment overrides");
        Self::from_env()
    }

    /// Options for `IndexWriter`
    pub fn writer_options(&self) -> WriterOptions {
        WriterOptions::from(&self.writer)
    }

    /// Options for `IndexReader`
    pub fn reader_options(&self) -> ReaderOptions {
        ReaderOptions::from(&self.reader)
    }

    /// Apply environment variable overrides to an existing config
    fn apply_env_overrides(&mut self) {
        // Writer overrides
        if let Ok(v) = std::env::var("TSINDEX_CHUNK_SAMPLE_THRESHOLD") {
            if let Ok(n) = v.parse() {
                self.writer.chunk_sample_threshold = n;
            }
        }
        if let Ok(v) = std::env::var("TSINDEX_CHUNK_SAMPLE_INTERVAL_MS") {
            if let Ok(ms) = v.parse() {
                self.writer.chunk_sample_interval_ms = ms;
                self.reader.chunk_sample_interval_ms = ms;
            }
        }

        // Reader overrides
        if let Ok(v) = std::env::var("TSINDEX_VERIFY_CHECKSUMS") {
            if let Ok(b) = v.parse() {
                self.reader.verify_checksums = b;
            }
        }
        if let Ok(v) = std::env::var("TSINDEX_USE_MMAP") {
            if let Ok(b) = v.parse() {
                self.reader.use_mmap = b;
            }
        }

        // Symbolizer overrides
        if let Ok(v) = std::env::var("TSINDEX_CODEC") {
            match v.parse() {
                Ok(codec) => self.symbolizer.codec = codec,
                Err(e) => tracing::warn!("Ignoring TSINDEX_CODEC: {}", e),
            }
        }

        // Logging overrides
        if let Ok(level) = std::env::var("TSINDEX_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(format) = std::env::var("TSINDEX_LOG_FORMAT") {
            self.logging.format = format;
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {error}")]
    Io { path: PathBuf, error: String },

    #[error("Failed to parse config file {path:?}: {error}")]
    Parse { path: PathBuf, error: String },
}

/// Generate a default config file content
pub fn generate_default_config() -> String {
    r#"# tsindex Configuration
#
# Environment variables override these settings:
# - TSINDEX_CHUNK_SAMPLE_THRESHOLD
# - TSINDEX_CHUNK_SAMPLE_INTERVAL_MS
# - TSINDEX_VERIFY_CHECKSUMS
# - TSINDEX_USE_MMAP
# - TSINDEX_CODEC
# - TSINDEX_LOG_LEVEL
# - TSINDEX_LOG_FORMAT

[writer]
# Series with at least this many chunks store a chunk sample table
chunk_sample_threshold = 8

# Growth of the largest chunk max time that starts a new sample (ms)
chunk_sample_interval_ms = 3600000

# Record every n-th series in the fingerprint offsets table
fingerprint_interval = 1024

# fsync index files before publishing them
fsync = true

[reader]
# Verify every section checksum when opening an index
verify_checksums = true

# Memory-map index files instead of reading them into memory
use_mmap = true

# Lock shards of the chunk sample cache
sample_cache_shards = 16

# Sampling interval for series written without a sample table (ms)
chunk_sample_interval_ms = 3600000

[symbolizer]
# Codec for serialized symbolizers: none, lz4, zstd
codec = "lz4"

[logging]
# Log level: trace, debug, info, warn, error
level = "info"

# Log format: pretty (for development) or json (for production)
format = "pretty"

# Optional log file path
# file = "/var/log/tsindex/tsindex.log"
"#
    .to_string()
}
