//! Two-tier page cache for one document
//!
//! Reads check the memory tier, then the disk tier; a disk hit is promoted
//! back into memory. Writes land in memory immediately and are persisted by
//! the background [`DiskWriter`]. Persistence failures are logged only, since
//! the memory tier stays authoritative for the session.

use parking_lot::Mutex;
use pdf_viewer_render::Bitmap;
use std::path::Path;
use std::sync::Arc;

use crate::disk::{DiskEncoding, DiskTier};
use crate::error::CacheResult;
use crate::identity::CacheIdentifier;
use crate::ram::{MemoryTier, PageKey};
use crate::strategy::{apply_strategy_with, CacheStrategy};
use crate::writer::DiskWriter;

/// Lookup statistics for one document's cache
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TieredStats {
    pub memory_hits: u64,
    pub disk_hits: u64,
    pub misses: u64,
    /// Disk files that could not be decoded
    pub disk_errors: u64,
    pub puts: u64,
}

impl TieredStats {
    pub fn hit_rate(&self) -> f64 {
        let hits = self.memory_hits + self.disk_hits;
        let total = hits + self.misses;
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }
}

/// Memory + disk cache of rendered pages, scoped to one document
pub struct TieredBitmapCache {
    identifier: CacheIdentifier,
    memory: Arc<MemoryTier>,
    disk: Option<(DiskTier, DiskWriter)>,
    stats: Mutex<TieredStats>,
}

impl TieredBitmapCache {
    /// Cache backed by memory only
    pub fn memory_only(identifier: CacheIdentifier, memory: Arc<MemoryTier>) -> Self {
        Self {
            identifier,
            memory,
            disk: None,
            stats: Mutex::new(TieredStats::default()),
        }
    }

    /// Cache backed by memory and a disk folder
    pub fn with_disk(
        identifier: CacheIdentifier,
        memory: Arc<MemoryTier>,
        disk: DiskTier,
        writer: DiskWriter,
    ) -> Self {
        Self {
            identifier,
            memory,
            disk: Some((disk, writer)),
            stats: Mutex::new(TieredStats::default()),
        }
    }

    /// Open the cache for a newly opened document
    ///
    /// Applies `strategy` to the cache root first, dropping the writer's
    /// queued pages for each evicted folder before it is deleted, then
    /// creates this document's folder. With [`CacheStrategy::DisableCache`]
    /// no disk tier is attached and nothing is created on disk.
    ///
    /// # Arguments
    /// * `identifier` - The document's cache identifier
    /// * `cache_root` - Directory holding one folder per document
    /// * `strategy` - Disk strategy for this session
    /// * `max_documents` - Documents kept under `MaximizePerformance`
    /// * `encoding` - Page file encoding
    /// * `memory` - Shared memory tier
    /// * `writer` - Background writer shared by every session under `cache_root`
    pub fn open(
        identifier: CacheIdentifier,
        cache_root: &Path,
        strategy: CacheStrategy,
        max_documents: usize,
        encoding: DiskEncoding,
        memory: Arc<MemoryTier>,
        writer: DiskWriter,
    ) -> CacheResult<Self> {
        if !strategy.uses_disk() {
            return Ok(Self::memory_only(identifier, memory));
        }

        let removed = apply_strategy_with(strategy, cache_root, &identifier, max_documents, |dir| {
            writer.discard_dir(dir);
        })?;
        if !removed.is_empty() {
            tracing::debug!(%identifier, %strategy, removed = removed.len(), "cache strategy applied");
        }

        let disk = DiskTier::new(cache_root, &identifier, encoding);
        writer.restore_dir(disk.dir());
        disk.create_dir()?;
        Ok(Self::with_disk(identifier, memory, disk, writer))
    }

    pub fn identifier(&self) -> &CacheIdentifier {
        &self.identifier
    }

    fn key(&self, page: usize) -> PageKey {
        PageKey::new(self.identifier.clone(), page)
    }

    /// Look a page up in memory, then on disk
    pub fn get(&self, page: usize) -> Option<Bitmap> {
        let key = self.key(page);
        if let Some(bitmap) = self.memory.get(&key) {
            self.stats.lock().memory_hits += 1;
            return Some(bitmap);
        }

        let Some((disk, _)) = &self.disk else {
            self.stats.lock().misses += 1;
            return None;
        };

        match disk.read(page) {
            Ok(Some(bitmap)) => {
                self.memory.put(key, bitmap.clone());
                self.stats.lock().disk_hits += 1;
                Some(bitmap)
            }
            Ok(None) => {
                self.stats.lock().misses += 1;
                None
            }
            Err(e) => {
                tracing::warn!(page, identifier = %self.identifier, error = %e, "unreadable disk cache entry");
                let mut stats = self.stats.lock();
                stats.disk_errors += 1;
                stats.misses += 1;
                None
            }
        }
    }

    /// Store a page in memory and queue it for disk
    pub fn put(&self, page: usize, bitmap: Bitmap) {
        if let Some((disk, writer)) = &self.disk {
            writer.enqueue(disk.clone(), page, bitmap.clone());
        }
        self.memory.put(self.key(page), bitmap);
        self.stats.lock().puts += 1;
    }

    /// Cheap presence check that never decodes
    ///
    /// True when the page file exists or is queued for writing. Without a
    /// disk tier this falls back to the memory tier.
    pub fn exists(&self, page: usize) -> bool {
        match &self.disk {
            Some((disk, writer)) => writer.is_pending(&disk.page_path(page)) || disk.exists(page),
            None => self.memory.contains(&self.key(page)),
        }
    }

    /// Drop this document's pages from the memory tier
    pub fn evict_memory(&self) -> usize {
        self.memory.remove_document(&self.identifier)
    }

    /// Wait for queued disk writes to finish
    pub fn flush(&self) {
        if let Some((_, writer)) = &self.disk {
            writer.flush();
        }
    }

    pub fn disk(&self) -> Option<&DiskTier> {
        self.disk.as_ref().map(|(disk, _)| disk)
    }

    pub fn stats(&self) -> TieredStats {
        *self.stats.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bitmap(fill: u8) -> Bitmap {
        Bitmap::from_rgba(3, 3, vec![fill; 36]).unwrap()
    }

    fn open(root: &Path, name: &str, strategy: CacheStrategy, memory: Arc<MemoryTier>) -> TieredBitmapCache {
        TieredBitmapCache::open(
            CacheIdentifier::for_url(name),
            root,
            strategy,
            2,
            DiskEncoding::Png,
            memory,
            DiskWriter::for_root(root).unwrap(),
        )
        .unwrap()
    }

    #[test]
    fn test_put_then_get_hits_memory() {
        let root = tempfile::tempdir().unwrap();
        let cache = open(root.path(), "a", CacheStrategy::MaximizePerformance, Arc::new(MemoryTier::new(1 << 20)));

        cache.put(1, bitmap(7));
        assert_eq!(cache.get(1), Some(bitmap(7)));
        assert!(cache.exists(1));
        assert_eq!(cache.stats().memory_hits, 1);
    }

    #[test]
    fn test_disk_hit_repopulates_memory() {
        let root = tempfile::tempdir().unwrap();
        let memory = Arc::new(MemoryTier::new(1 << 20));
        let cache = open(root.path(), "a", CacheStrategy::MaximizePerformance, memory.clone());

        cache.put(4, bitmap(9));
        cache.flush();
        cache.evict_memory();

        assert_eq!(cache.get(4), Some(bitmap(9)));
        assert_eq!(cache.stats().disk_hits, 1);
        assert_eq!(cache.get(4), Some(bitmap(9)));
        assert_eq!(cache.stats().memory_hits, 1);
    }

    #[test]
    fn test_pages_survive_reopen() {
        let root = tempfile::tempdir().unwrap();
        {
            let cache = open(root.path(), "a", CacheStrategy::MaximizePerformance, Arc::new(MemoryTier::new(1 << 20)));
            cache.put(0, bitmap(1));
            cache.flush();
        }

        let cache = open(root.path(), "a", CacheStrategy::MaximizePerformance, Arc::new(MemoryTier::new(1 << 20)));
        assert!(cache.exists(0));
        assert_eq!(cache.get(0), Some(bitmap(1)));
    }

    #[test]
    fn test_documents_do_not_share_pages() {
        let root = tempfile::tempdir().unwrap();
        let memory = Arc::new(MemoryTier::new(1 << 20));
        let a = open(root.path(), "a", CacheStrategy::MaximizePerformance, memory.clone());
        let b = open(root.path(), "b", CacheStrategy::MaximizePerformance, memory);

        a.put(0, bitmap(1));
        assert_eq!(b.get(0), None);
        assert!(!b.exists(0));
    }

    #[test]
    fn test_minimize_removes_previous_document() {
        let root = tempfile::tempdir().unwrap();
        let memory = Arc::new(MemoryTier::new(1 << 20));
        let a = open(root.path(), "a", CacheStrategy::MinimizeCache, memory.clone());
        a.put(0, bitmap(1));
        a.flush();
        let a_dir = a.disk().unwrap().dir().to_path_buf();

        let b = open(root.path(), "b", CacheStrategy::MinimizeCache, memory);
        b.put(0, bitmap(2));
        b.flush();

        assert!(!a_dir.exists());
        assert!(b.disk().unwrap().dir().exists());
    }

    #[test]
    fn test_minimize_drops_unflushed_pages_of_evicted_document() {
        let root = tempfile::tempdir().unwrap();
        let memory = Arc::new(MemoryTier::new(1 << 20));
        let a = open(root.path(), "a", CacheStrategy::MinimizeCache, memory.clone());
        for page in 0..20 {
            a.put(page, bitmap(page as u8));
        }
        let a_dir = a.disk().unwrap().dir().to_path_buf();

        let b = open(root.path(), "b", CacheStrategy::MinimizeCache, memory);
        a.put(20, bitmap(1));
        drop(a);
        b.flush();

        assert!(!a_dir.exists());
        assert!(b.disk().unwrap().dir().exists());
        assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_disable_cache_never_touches_disk() {
        let root = tempfile::tempdir().unwrap();
        let cache_root = root.path().join("pages");
        let cache = open(&cache_root, "a", CacheStrategy::DisableCache, Arc::new(MemoryTier::new(1 << 20)));

        cache.put(0, bitmap(1));
        assert!(cache.disk().is_none());
        assert_eq!(cache.get(0), Some(bitmap(1)));
        assert!(cache.exists(0));
        assert!(!cache_root.exists());
    }

    #[test]
    fn test_corrupt_disk_entry_is_a_miss() {
        let root = tempfile::tempdir().unwrap();
        let cache = open(root.path(), "a", CacheStrategy::MaximizePerformance, Arc::new(MemoryTier::new(1 << 20)));
        let path = cache.disk().unwrap().page_path(2);
        std::fs::write(&path, b"garbage").unwrap();

        assert_eq!(cache.get(2), None);
        assert_eq!(cache.stats().disk_errors, 1);
    }
}
