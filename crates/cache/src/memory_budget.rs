//! Memory budget for the page cache
//!
//! Splits a heap limit into a memory-tier budget and a bitmap-pool budget,
//! and sizes speculative prefetching by how much of the heap is still free.

const MIB: usize = 1024 * 1024;
const GIB: usize = 1024 * MIB;

/// Heap split between the cache's memory consumers
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MemoryBudget {
    heap_limit: usize,
    memory_fraction: f64,
    pool_fraction: f64,
}

impl MemoryBudget {
    /// Create a budget over `heap_limit` bytes
    ///
    /// # Arguments
    /// * `heap_limit` - Total bytes the process may use
    /// * `memory_fraction` - Share of the heap for the memory tier
    /// * `pool_fraction` - Share of the heap for pooled pixel buffers
    pub fn new(heap_limit: usize, memory_fraction: f64, pool_fraction: f64) -> Self {
        Self {
            heap_limit,
            memory_fraction,
            pool_fraction,
        }
    }

    pub fn heap_limit(&self) -> usize {
        self.heap_limit
    }

    /// Byte budget of the memory tier
    pub fn memory_tier_bytes(&self) -> usize {
        (self.heap_limit as f64 * self.memory_fraction) as usize
    }

    /// Byte budget of the bitmap pool
    pub fn bitmap_pool_bytes(&self) -> usize {
        (self.heap_limit as f64 * self.pool_fraction) as usize
    }

    /// Heap still free when `in_use` bytes are held by the cache
    pub fn available(&self, in_use: usize) -> usize {
        self.heap_limit.saturating_sub(in_use)
    }
}

/// How many pages on each side of the current page are worth prefetching
///
/// Large documents and tight memory both shrink the radius. Memory must
/// strictly exceed each threshold.
pub fn prefetch_radius(available_memory: usize, page_count: usize) -> usize {
    if available_memory > GIB && page_count < 100 {
        10
    } else if available_memory > 512 * MIB && page_count < 200 {
        5
    } else {
        3
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_budget_split() {
        let budget = MemoryBudget::new(GIB, 0.125, 0.0625);
        assert_eq!(budget.memory_tier_bytes(), 128 * MIB);
        assert_eq!(budget.bitmap_pool_bytes(), 64 * MIB);
    }

    #[test]
    fn test_available_saturates() {
        let budget = MemoryBudget::new(100, 0.5, 0.5);
        assert_eq!(budget.available(30), 70);
        assert_eq!(budget.available(300), 0);
    }

    #[test]
    fn test_prefetch_radius_tiers() {
        assert_eq!(prefetch_radius(2 * GIB, 50), 10);
        assert_eq!(prefetch_radius(2 * GIB, 150), 5);
        assert_eq!(prefetch_radius(600 * MIB, 50), 5);
        assert_eq!(prefetch_radius(600 * MIB, 250), 3);
        assert_eq!(prefetch_radius(100 * MIB, 10), 3);
    }

    #[test]
    fn test_prefetch_radius_thresholds_are_exclusive() {
        assert_eq!(prefetch_radius(GIB, 50), 5);
        assert_eq!(prefetch_radius(GIB + 1, 50), 10);
        assert_eq!(prefetch_radius(512 * MIB, 50), 3);
        assert_eq!(prefetch_radius(512 * MIB + 1, 50), 5);
        assert_eq!(prefetch_radius(2 * GIB, 100), 5);
        assert_eq!(prefetch_radius(2 * GIB, 200), 3);
    }
}
