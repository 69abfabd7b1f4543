//! Document-level disk cache strategies
//!
//! Applied once per document open, before any page of the new document is
//! written. The unit of eviction is a whole document folder.

use std::fmt;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{CacheError, CacheResult};
use crate::identity::CacheIdentifier;

/// How the disk tier treats other documents' folders
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CacheStrategy {
    /// Keep only the current document on disk
    MinimizeCache,
    /// Keep the most recently opened documents, evicting the oldest folder
    #[default]
    MaximizePerformance,
    /// Never write to disk
    DisableCache,
}

impl CacheStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            CacheStrategy::MinimizeCache => "minimize",
            CacheStrategy::MaximizePerformance => "maximize",
            CacheStrategy::DisableCache => "disable",
        }
    }

    /// Whether the disk tier is used at all
    pub fn uses_disk(self) -> bool {
        !matches!(self, CacheStrategy::DisableCache)
    }
}

impl fmt::Display for CacheStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CacheStrategy {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "minimize" | "minimize_cache" => Ok(CacheStrategy::MinimizeCache),
            "maximize" | "maximize_performance" => Ok(CacheStrategy::MaximizePerformance),
            "disable" | "disable_cache" => Ok(CacheStrategy::DisableCache),
            other => Err(CacheError::InvalidConfig(format!("unknown cache strategy: {other}"))),
        }
    }
}

/// Enforce `strategy` on the cache root for a newly opened document
///
/// Returns the folders that were removed. A folder that cannot be removed is
/// logged and skipped; only failing to list the cache root is an error.
///
/// # Arguments
/// * `strategy` - Strategy to enforce
/// * `cache_root` - Directory holding one folder per document
/// * `current` - Identifier of the document being opened
/// * `max_documents` - Bound on other documents kept under `MaximizePerformance`
pub fn apply_strategy(
    strategy: CacheStrategy,
    cache_root: &Path,
    current: &CacheIdentifier,
    max_documents: usize,
) -> CacheResult<Vec<PathBuf>> {
    apply_strategy_with(strategy, cache_root, current, max_documents, |_| {})
}

/// [`apply_strategy`], calling `before_remove` on each folder right before
/// it is deleted
pub fn apply_strategy_with(
    strategy: CacheStrategy,
    cache_root: &Path,
    current: &CacheIdentifier,
    max_documents: usize,
    mut before_remove: impl FnMut(&Path),
) -> CacheResult<Vec<PathBuf>> {
    let mut evict = |path: PathBuf| {
        before_remove(&path);
        remove_folder(path)
    };

    match strategy {
        CacheStrategy::DisableCache => Ok(Vec::new()),
        CacheStrategy::MinimizeCache => {
            let siblings = sibling_folders(cache_root, current)?;
            Ok(siblings.into_iter().filter_map(|(path, _)| evict(path)).collect())
        }
        CacheStrategy::MaximizePerformance => {
            let current_dir = cache_root.join(current.as_str());
            fs::create_dir_all(&current_dir)?;
            touch(&current_dir)?;

            let mut siblings = sibling_folders(cache_root, current)?;
            siblings.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));

            let limit = max_documents.max(1);
            let excess = (siblings.len() + 1).saturating_sub(limit);
            Ok(siblings
                .into_iter()
                .take(excess)
                .filter_map(|(path, _)| evict(path))
                .collect())
        }
    }
}

/// Cached document folders other than `current`, with their modification times
fn sibling_folders(
    cache_root: &Path,
    current: &CacheIdentifier,
) -> CacheResult<Vec<(PathBuf, SystemTime)>> {
    let entries = match fs::read_dir(cache_root) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut folders = Vec::new();
    for entry in entries {
        let entry = entry?;
        if entry.file_name() == current.as_str() {
            continue;
        }
        let Ok(metadata) = entry.metadata() else {
            continue;
        };
        if metadata.is_dir() {
            let modified = metadata.modified().unwrap_or(UNIX_EPOCH);
            folders.push((entry.path(), modified));
        }
    }
    Ok(folders)
}

fn touch(dir: &Path) -> io::Result<()> {
    File::open(dir)?.set_modified(SystemTime::now())
}

fn remove_folder(path: PathBuf) -> Option<PathBuf> {
    match fs::remove_dir_all(&path) {
        Ok(()) => {
            tracing::debug!(path = %path.display(), "evicted cached document");
            Some(path)
        }
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "failed to evict cached document");
            None
        }
    }
}
