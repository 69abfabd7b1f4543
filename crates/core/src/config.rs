//! Per-session viewer configuration
//!
//! Every knob a viewer session reads lives here and is passed in at
//! construction. Two sessions with different configurations never see each
//! other's settings.

use std::collections::BTreeMap;
use std::time::Duration;

use pdf_viewer_cache::{CacheConfig, CacheStrategy, DiskEncoding};
use pdf_viewer_render::DEFAULT_MAX_OPEN_PAGES;
use pdf_viewer_scheduler::DEFAULT_LABEL_HIDE_DELAY;

use crate::error::{ViewerError, ViewerResult};

/// Resolution multiplier applied to foreground renders
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RenderQuality {
    #[default]
    Normal,
    High,
    Ultra,
}

impl RenderQuality {
    pub fn multiplier(self) -> u32 {
        match self {
            RenderQuality::Normal => 1,
            RenderQuality::High => 2,
            RenderQuality::Ultra => 3,
        }
    }

    /// Scale a target size, saturating instead of overflowing
    pub fn scale(self, width: u32, height: u32) -> (u32, u32) {
        let m = self.multiplier();
        (width.saturating_mul(m), height.saturating_mul(m))
    }
}

/// Settings for remote document downloads
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadConfig {
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    /// Size of each read from the response body
    pub chunk_size: usize,
    /// Attempts made for retryable failures, including the first
    pub max_attempts: u32,
    pub retry_delay: Duration,
    /// Extra request headers
    pub headers: BTreeMap<String, String>,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(15),
            read_timeout: Duration::from_secs(30),
            chunk_size: 8 * 1024,
            max_attempts: 3,
            retry_delay: Duration::from_secs(2),
            headers: BTreeMap::new(),
        }
    }
}

impl DownloadConfig {
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_retry(mut self, max_attempts: u32, retry_delay: Duration) -> Self {
        self.max_attempts = max_attempts.max(1);
        self.retry_delay = retry_delay;
        self
    }

    pub fn with_timeouts(mut self, connect: Duration, read: Duration) -> Self {
        self.connect_timeout = connect;
        self.read_timeout = read;
        self
    }
}

/// Configuration for one viewer session
#[derive(Debug, Clone, PartialEq)]
pub struct ViewerConfig {
    /// Bound on simultaneously open page handles
    pub max_open_pages: usize,
    /// Disk cache policy applied when the document is opened
    pub cache_strategy: CacheStrategy,
    /// Memory budget, cache root and document limit
    pub cache: CacheConfig,
    /// Encoding of page files in the disk tier
    pub disk_encoding: DiskEncoding,
    /// Size factor applied to prefetch renders
    pub prefetch_scale: f32,
    pub quality: RenderQuality,
    /// Number of render worker threads
    pub render_workers: usize,
    /// How long the page label stays up after scrolling settles
    pub label_hide_delay: Duration,
    pub download: DownloadConfig,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            max_open_pages: DEFAULT_MAX_OPEN_PAGES,
            cache_strategy: CacheStrategy::default(),
            cache: CacheConfig::default(),
            disk_encoding: DiskEncoding::default(),
            prefetch_scale: 0.5,
            quality: RenderQuality::default(),
            render_workers: 2,
            label_hide_delay: DEFAULT_LABEL_HIDE_DELAY,
            download: DownloadConfig::default(),
        }
    }
}

impl ViewerConfig {
    pub fn with_cache(mut self, cache: CacheConfig) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_cache_strategy(mut self, strategy: CacheStrategy) -> Self {
        self.cache_strategy = strategy;
        self
    }

    pub fn with_max_open_pages(mut self, count: usize) -> Self {
        self.max_open_pages = count;
        self
    }

    pub fn with_disk_encoding(mut self, encoding: DiskEncoding) -> Self {
        self.disk_encoding = encoding;
        self
    }

    pub fn with_quality(mut self, quality: RenderQuality) -> Self {
        self.quality = quality;
        self
    }

    pub fn with_render_workers(mut self, count: usize) -> Self {
        self.render_workers = count;
        self
    }

    pub fn with_prefetch_scale(mut self, scale: f32) -> Self {
        self.prefetch_scale = scale;
        self
    }

    pub fn with_label_hide_delay(mut self, delay: Duration) -> Self {
        self.label_hide_delay = delay;
        self
    }

    pub fn with_download(mut self, download: DownloadConfig) -> Self {
        self.download = download;
        self
    }

    /// Check the configuration for values a session cannot run with
    pub fn validate(&self) -> ViewerResult<()> {
        if self.max_open_pages == 0 {
            return Err(invalid("max_open_pages must be at least 1"));
        }
        if self.render_workers == 0 {
            return Err(invalid("render_workers must be at least 1"));
        }
        if !(self.prefetch_scale > 0.0 && self.prefetch_scale <= 1.0) {
            return Err(invalid("prefetch_scale must be in (0, 1]"));
        }
        if self.download.chunk_size == 0 {
            return Err(invalid("download chunk_size must be positive"));
        }
        self.cache
            .validate()
            .map_err(|e| ViewerError::InvalidConfig(e.to_string()))
    }
}

fn invalid(message: &str) -> ViewerError {
    ViewerError::InvalidConfig(message.to_string())
}
