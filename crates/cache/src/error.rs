//! Cache error types

use std::io;
use std::path::PathBuf;

/// Errors raised by the disk tier and cache maintenance
///
/// Disk persistence failures never reach render callers; the tiered cache
/// logs them and keeps serving from memory.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("cache I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("document folder {} no longer exists", .0.display())]
    FolderMissing(PathBuf),

    #[error("failed to encode page {page}: {reason}")]
    Encode { page: usize, reason: String },

    #[error("failed to decode {}: {reason}", path.display())]
    Decode { path: PathBuf, reason: String },

    #[error("invalid cache configuration: {0}")]
    InvalidConfig(String),
}

/// Result type for cache operations
pub type CacheResult<T> = Result<T, CacheError>;
