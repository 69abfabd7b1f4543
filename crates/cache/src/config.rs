//! Cache configuration
//!
//! Sizes for the memory tier and the bitmap pool are expressed as fractions
//! of a heap limit rather than absolute values, so one knob scales the whole
//! cache. Configuration can be loaded from a file, environment variables, or
//! created programmatically.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::memory_budget::MemoryBudget;

const MB: usize = 1024 * 1024;

/// Configuration for the tiered page cache
#[derive(Debug, Clone, PartialEq)]
pub struct CacheConfig {
    /// Maximum heap the process is allowed to use, in bytes
    pub heap_limit: usize,
    /// Share of the heap given to the memory tier
    pub memory_fraction: f64,
    /// Share of the heap given to pooled pixel buffers
    pub bitmap_pool_fraction: f64,
    /// Upper bound on pooled pixel buffers
    pub bitmap_pool_max_slots: usize,
    /// Directory holding one folder per cached document
    pub cache_root: PathBuf,
    /// Documents kept on disk under the maximize-performance strategy
    pub max_cached_documents: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            heap_limit: 1024 * MB,
            memory_fraction: 1.0 / 8.0,
            bitmap_pool_fraction: 1.0 / 16.0,
            bitmap_pool_max_slots: 10,
            cache_root: Self::default_cache_root(),
            max_cached_documents: 5,
        }
    }
}

impl CacheConfig {
    /// Sets the heap limit in megabytes.
    pub fn with_heap_limit_mb(mut self, mb: usize) -> Self {
        self.heap_limit = mb * MB;
        self
    }

    /// Sets the cache root directory.
    pub fn with_cache_root<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.cache_root = path.as_ref().to_path_buf();
        self
    }

    /// Sets the number of documents kept on disk.
    pub fn with_max_cached_documents(mut self, count: usize) -> Self {
        self.max_cached_documents = count;
        self
    }

    /// Sets the memory tier's share of the heap.
    pub fn with_memory_fraction(mut self, fraction: f64) -> Self {
        self.memory_fraction = fraction;
        self
    }

    /// Returns the default cache root for the current platform.
    ///
    /// - macOS: ~/Library/Caches/pdf-viewer/pages
    /// - Linux: ~/.cache/pdf-viewer/pages
    /// - Windows: %LOCALAPPDATA%\pdf-viewer\pages
    pub fn default_cache_root() -> PathBuf {
        if let Some(cache_dir) = dirs::cache_dir() {
            cache_dir.join("pdf-viewer").join("pages")
        } else {
            PathBuf::from("cache/pages")
        }
    }

    /// Returns the default directory for downloaded documents.
    ///
    /// A sibling of [`CacheConfig::default_cache_root`], never inside it,
    /// so cache strategies do not treat it as a document folder.
    pub fn default_download_dir() -> PathBuf {
        if let Some(cache_dir) = dirs::cache_dir() {
            cache_dir.join("pdf-viewer").join("downloads")
        } else {
            PathBuf::from("cache/downloads")
        }
    }

    /// Memory budget derived from the heap limit and fractions
    pub fn budget(&self) -> MemoryBudget {
        MemoryBudget::new(self.heap_limit, self.memory_fraction, self.bitmap_pool_fraction)
    }

    /// Check that the fractions are usable
    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid = |f: f64| f > 0.0 && f <= 1.0;
        if !valid(self.memory_fraction) {
            return Err(ConfigError::InvalidValue("memory_fraction".to_string()));
        }
        if !valid(self.bitmap_pool_fraction) {
            return Err(ConfigError::InvalidValue("bitmap_pool_fraction".to_string()));
        }
        if self.heap_limit == 0 {
            return Err(ConfigError::InvalidValue("heap_limit_mb".to_string()));
        }
        Ok(())
    }

    /// Loads configuration from environment variables.
    ///
    /// Environment variables:
    /// - `PDF_VIEWER_HEAP_LIMIT_MB`: heap limit in MB (default: 1024)
    /// - `PDF_VIEWER_CACHE_DIR`: cache root directory
    /// - `PDF_VIEWER_MAX_CACHED_DOCS`: documents kept on disk (default: 5)
    ///
    /// # Errors
    /// Returns an error if any environment variable contains an invalid value.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("PDF_VIEWER_HEAP_LIMIT_MB") {
            config.heap_limit = parse_usize("PDF_VIEWER_HEAP_LIMIT_MB", &val)? * MB;
        }

        if let Ok(val) = std::env::var("PDF_VIEWER_CACHE_DIR") {
            config.cache_root = PathBuf::from(val);
        }

        if let Ok(val) = std::env::var("PDF_VIEWER_MAX_CACHED_DOCS") {
            config.max_cached_documents = parse_usize("PDF_VIEWER_MAX_CACHED_DOCS", &val)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from a `key = value` file.
    ///
    /// Expected file format:
    /// ```text
    /// heap_limit_mb = 1024
    /// memory_fraction = 0.125
    /// bitmap_pool_fraction = 0.0625
    /// bitmap_pool_max_slots = 10
    /// max_cached_documents = 5
    /// cache_root = "/path/to/cache"
    /// ```
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path.as_ref())?;
        Self::parse(&contents)
    }

    /// Parses configuration from `key = value` lines. Unknown keys are ignored.
    pub fn parse(contents: &str) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        for line in contents.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let key = key.trim();
            let value = value.trim().trim_matches('"');

            match key {
                "heap_limit_mb" => config.heap_limit = parse_usize(key, value)? * MB,
                "memory_fraction" => config.memory_fraction = parse_f64(key, value)?,
                "bitmap_pool_fraction" => config.bitmap_pool_fraction = parse_f64(key, value)?,
                "bitmap_pool_max_slots" => config.bitmap_pool_max_slots = parse_usize(key, value)?,
                "max_cached_documents" => config.max_cached_documents = parse_usize(key, value)?,
                "cache_root" => config.cache_root = PathBuf::from(value),
                _ => {}
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Saves configuration to a `key = value` file.
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        fs::write(path.as_ref(), self.to_config_string())?;
        Ok(())
    }

    fn to_config_string(&self) -> String {
        format!(
            "# PDF Viewer Cache Configuration\n\
             heap_limit_mb = {}\n\
             memory_fraction = {}\n\
             bitmap_pool_fraction = {}\n\
             bitmap_pool_max_slots = {}\n\
             max_cached_documents = {}\n\
             cache_root = \"{}\"\n",
            self.heap_limit / MB,
            self.memory_fraction,
            self.bitmap_pool_fraction,
            self.bitmap_pool_max_slots,
            self.max_cached_documents,
            self.cache_root.display()
        )
    }
}

fn parse_usize(key: &str, value: &str) -> Result<usize, ConfigError> {
    value
        .parse::<usize>()
        .map_err(|_| ConfigError::InvalidValue(key.to_string()))
}

fn parse_f64(key: &str, value: &str) -> Result<f64, ConfigError> {
    value
        .parse::<f64>()
        .map_err(|_| ConfigError::InvalidValue(key.to_string()))
}

/// Errors that can occur during configuration operations.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Invalid value for a configuration parameter
    #[error("invalid value for configuration key: {0}")]
    InvalidValue(String),
    /// I/O error reading or writing the configuration file
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}
