//! PDF Viewer Cache Library
//!
//! Two-tier cache of rendered pages: a byte-budget LRU in memory and one
//! folder per document on disk, governed by a document-level strategy.
//!
//! # Example
//!
//! ```no_run
//! use pdf_viewer_cache::{
//!     CacheConfig, CacheIdentifier, CacheStrategy, DiskEncoding, DiskWriter, MemoryTier,
//!     TieredBitmapCache,
//! };
//! use std::sync::Arc;
//!
//! let config = CacheConfig::default();
//! let memory = Arc::new(MemoryTier::new(config.budget().memory_tier_bytes()));
//! let cache = TieredBitmapCache::open(
//!     CacheIdentifier::for_url("https://example.com/manual.pdf"),
//!     &config.cache_root,
//!     CacheStrategy::MaximizePerformance,
//!     config.max_cached_documents,
//!     DiskEncoding::Png,
//!     memory,
//!     DiskWriter::for_root(&config.cache_root)?,
//! )?;
//!
//! if cache.get(0).is_none() {
//!     // render page 0, then cache.put(0, bitmap)
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod config;
pub mod disk;
pub mod error;
pub mod identity;
pub mod memory_budget;
pub mod ram;
pub mod strategy;
pub mod tiered;
pub mod writer;

pub use config::{CacheConfig, ConfigError};
pub use disk::{DiskEncoding, DiskTier, DEFAULT_JPEG_QUALITY};
pub use error::{CacheError, CacheResult};
pub use identity::CacheIdentifier;
pub use memory_budget::{prefetch_radius, MemoryBudget};
pub use ram::{MemoryStats, MemoryTier, PageKey};
pub use strategy::{apply_strategy, apply_strategy_with, CacheStrategy};
pub use tiered::{TieredBitmapCache, TieredStats};
pub use writer::{DiskWriter, WriterStats};
