//! Memory tier with byte-budget LRU eviction
//!
//! Holds rendered page bitmaps keyed by document and page. Recency is
//! updated on every hit; when an insertion would exceed the byte budget the
//! least recently used bitmaps are evicted first.

use lru::LruCache;
use parking_lot::Mutex;
use pdf_viewer_render::Bitmap;

use crate::identity::CacheIdentifier;

/// Key of one cached page
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PageKey {
    pub identifier: CacheIdentifier,
    pub page: usize,
}

impl PageKey {
    pub fn new(identifier: CacheIdentifier, page: usize) -> Self {
        Self { identifier, page }
    }
}

/// Statistics about memory tier usage
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryStats {
    /// Number of bitmaps currently held
    pub entries: usize,

    /// Bytes held by cached bitmaps
    pub bytes_used: usize,

    /// Byte budget
    pub byte_limit: usize,

    pub hits: u64,
    pub misses: u64,

    /// Bitmaps evicted to stay within budget
    pub evictions: u64,

    /// Bitmaps refused because they alone exceed the budget
    pub rejected: u64,
}

impl MemoryStats {
    /// Calculate the cache hit rate (0.0 to 1.0)
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

struct TierState {
    entries: LruCache<PageKey, Bitmap>,
    stats: MemoryStats,
}

impl TierState {
    fn remove(&mut self, key: &PageKey) -> Option<Bitmap> {
        let bitmap = self.entries.pop(key)?;
        self.stats.bytes_used = self.stats.bytes_used.saturating_sub(bitmap.byte_size());
        self.stats.entries = self.entries.len();
        Some(bitmap)
    }

    fn evict_to_fit(&mut self, incoming: usize) {
        while self.stats.bytes_used + incoming > self.stats.byte_limit {
            let Some((key, bitmap)) = self.entries.pop_lru() else {
                break;
            };
            self.stats.bytes_used = self.stats.bytes_used.saturating_sub(bitmap.byte_size());
            self.stats.evictions += 1;
            tracing::trace!(identifier = %key.identifier, page = key.page, "evicted from memory tier");
        }
        self.stats.entries = self.entries.len();
    }
}

/// Byte-bounded LRU of page bitmaps, shared by every session in a process
pub struct MemoryTier {
    state: Mutex<TierState>,
}

impl MemoryTier {
    /// Create an empty tier
    ///
    /// # Arguments
    /// * `byte_limit` - Maximum bytes of bitmap data held at once
    pub fn new(byte_limit: usize) -> Self {
        Self {
            state: Mutex::new(TierState {
                entries: LruCache::unbounded(),
                stats: MemoryStats {
                    byte_limit,
                    ..Default::default()
                },
            }),
        }
    }

    /// Store a bitmap, evicting least recently used bitmaps to make room
    ///
    /// Returns `false` if the bitmap is larger than the whole budget and was
    /// not stored.
    pub fn put(&self, key: PageKey, bitmap: Bitmap) -> bool {
        let mut state = self.state.lock();
        let size = bitmap.byte_size();

        state.remove(&key);
        if size > state.stats.byte_limit {
            state.stats.rejected += 1;
            tracing::debug!(page = key.page, bytes = size, "bitmap exceeds memory tier budget");
            return false;
        }

        state.evict_to_fit(size);
        state.entries.put(key, bitmap);
        state.stats.bytes_used += size;
        state.stats.entries = state.entries.len();
        true
    }

    /// Fetch a bitmap and mark it most recently used
    pub fn get(&self, key: &PageKey) -> Option<Bitmap> {
        let mut state = self.state.lock();
        match state.entries.get(key).cloned() {
            Some(bitmap) => {
                state.stats.hits += 1;
                Some(bitmap)
            }
            None => {
                state.stats.misses += 1;
                None
            }
        }
    }

    /// Check for a bitmap without touching recency or statistics
    pub fn contains(&self, key: &PageKey) -> bool {
        self.state.lock().entries.contains(key)
    }

    /// Drop every bitmap belonging to one document
    pub fn remove_document(&self, identifier: &CacheIdentifier) -> usize {
        let mut state = self.state.lock();
        let keys: Vec<PageKey> = state
            .entries
            .iter()
            .filter(|(k, _)| &k.identifier == identifier)
            .map(|(k, _)| k.clone())
            .collect();
        for key in &keys {
            state.remove(key);
        }
        keys.len()
    }

    pub fn stats(&self) -> MemoryStats {
        self.state.lock().stats
    }

    /// Bytes currently held
    pub fn bytes_used(&self) -> usize {
        self.state.lock().stats.bytes_used
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(page: usize) -> PageKey {
        PageKey::new(CacheIdentifier::for_url("https://example.com/doc.pdf"), page)
    }

    // 4x1 RGBA, 16 bytes
    fn bitmap(fill: u8) -> Bitmap {
        Bitmap::from_rgba(4, 1, vec![fill; 16]).unwrap()
    }

    #[test]
    fn test_put_and_get() {
        let tier = MemoryTier::new(1024);
        assert!(tier.put(key(0), bitmap(1)));

        assert_eq!(tier.get(&key(0)), Some(bitmap(1)));
        assert_eq!(tier.get(&key(1)), None);

        let stats = tier.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.bytes_used, 16);
    }

    #[test]
    fn test_evicts_least_recently_used() {
        let tier = MemoryTier::new(48);
        tier.put(key(0), bitmap(0));
        tier.put(key(1), bitmap(1));
        tier.put(key(2), bitmap(2));

        // Page 0 becomes most recent; page 1 is now the eviction candidate
        tier.get(&key(0));
        tier.put(key(3), bitmap(3));

        assert!(tier.contains(&key(0)));
        assert!(!tier.contains(&key(1)));
        assert!(tier.contains(&key(3)));
        assert_eq!(tier.stats().evictions, 1);
        assert!(tier.bytes_used() <= 48);
    }

    #[test]
    fn test_replacing_entry_does_not_double_count() {
        let tier = MemoryTier::new(1024);
        tier.put(key(0), bitmap(0));
        tier.put(key(0), bitmap(9));

        assert_eq!(tier.bytes_used(), 16);
        assert_eq!(tier.get(&key(0)), Some(bitmap(9)));
    }

    #[test]
    fn test_oversized_bitmap_is_rejected() {
        let tier = MemoryTier::new(8);
        assert!(!tier.put(key(0), bitmap(0)));
        assert_eq!(tier.stats().rejected, 1);
        assert_eq!(tier.bytes_used(), 0);
    }

    #[test]
    fn test_remove_document() {
        let tier = MemoryTier::new(1024);
        let other = PageKey::new(CacheIdentifier::for_url("https://example.com/other.pdf"), 0);
        tier.put(key(0), bitmap(0));
        tier.put(key(1), bitmap(1));
        tier.put(other.clone(), bitmap(2));

        assert_eq!(tier.remove_document(&key(0).identifier), 2);
        assert!(tier.contains(&other));
        assert_eq!(tier.bytes_used(), 16);
    }
}
