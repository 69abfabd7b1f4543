//! Bounded pool of open page handles
//!
//! Opening a page against the backend is expensive and each open page pins
//! native memory, so at most `capacity` handles are kept open per document.
//! Eviction is by insertion order: when a new page must be opened and the
//! pool is full, the handle that was opened first is closed, no matter how
//! recently it was used.

use std::collections::VecDeque;

use crate::backend::{RasterDocument, RasterPage};
use crate::{RenderError, RenderResult};

/// Default bound on simultaneously open page handles
pub const DEFAULT_MAX_OPEN_PAGES: usize = 5;

/// Page-handle pool statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Handles opened through the backend
    pub opened: u64,
    /// Requests served by an already open handle
    pub reused: u64,
    /// Handles closed to make room
    pub evicted: u64,
    /// Largest number of handles ever open at once
    pub peak: usize,
}

/// FIFO pool of open page handles for one document
pub struct PageHandlePool {
    capacity: usize,
    handles: VecDeque<Box<dyn RasterPage>>,
    stats: PoolStats,
}

impl PageHandlePool {
    /// Create an empty pool holding at most `capacity` handles (minimum 1)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            handles: VecDeque::with_capacity(capacity),
            stats: PoolStats::default(),
        }
    }

    /// Return the open handle for `index`, opening it if needed
    ///
    /// The range check happens before anything is opened or evicted, so an
    /// out-of-range request leaves the pool untouched.
    ///
    /// # Arguments
    /// * `document` - Backend document the page belongs to
    /// * `index` - Zero-based page index
    pub fn open(
        &mut self,
        document: &mut dyn RasterDocument,
        index: usize,
    ) -> RenderResult<&mut Box<dyn RasterPage>> {
        let page_count = document.page_count();
        if index >= page_count {
            return Err(RenderError::PageOutOfRange { index, page_count });
        }

        if let Some(pos) = self.position(index) {
            self.stats.reused += 1;
            return Ok(&mut self.handles[pos]);
        }

        while self.handles.len() >= self.capacity {
            let Some(mut oldest) = self.handles.pop_front() else {
                break;
            };
            let evicted = oldest.index();
            if let Err(e) = oldest.close() {
                tracing::warn!(page = evicted, error = %e, "failed to close evicted page");
            }
            self.stats.evicted += 1;
            tracing::trace!(page = evicted, "evicted page handle");
        }

        let page = document.open_page(index)?;
        self.handles.push_back(page);
        self.stats.opened += 1;
        self.stats.peak = self.stats.peak.max(self.handles.len());

        let last = self.handles.len() - 1;
        Ok(&mut self.handles[last])
    }

    /// Close every handle
    ///
    /// Every handle is closed even if some fail. Failures are logged and
    /// counted, never propagated.
    pub fn close_all(&mut self) -> usize {
        let mut failures = 0;
        for mut handle in self.handles.drain(..) {
            if let Err(e) = handle.close() {
                failures += 1;
                tracing::warn!(page = handle.index(), error = %e, "failed to close page");
            }
        }
        failures
    }

    fn position(&self, index: usize) -> Option<usize> {
        self.handles.iter().position(|h| h.index() == index)
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn contains(&self, index: usize) -> bool {
        self.position(index).is_some()
    }

    /// Open page indices, oldest first
    pub fn open_indices(&self) -> Vec<usize> {
        self.handles.iter().map(|h| h.index()).collect()
    }

    pub fn stats(&self) -> PoolStats {
        self.stats
    }
}

impl Default for PageHandlePool {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_OPEN_PAGES)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{ByteSource, RasterBackend};
    use crate::testing::FakeBackend;

    fn open_document(backend: &FakeBackend) -> Box<dyn RasterDocument> {
        backend.open(&ByteSource::File("doc.pdf".into())).unwrap()
    }

    #[test]
    fn test_reuses_open_handle() {
        let backend = FakeBackend::new(10);
        let mut document = open_document(&backend);
        let mut pool = PageHandlePool::new(3);

        pool.open(document.as_mut(), 2).unwrap();
        pool.open(document.as_mut(), 2).unwrap();

        assert_eq!(backend.pages_opened(), 1);
        assert_eq!(pool.stats().reused, 1);
    }

    #[test]
    fn test_evicts_in_insertion_order() {
        let backend = FakeBackend::new(10);
        let mut document = open_document(&backend);
        let mut pool = PageHandlePool::new(3);

        pool.open(document.as_mut(), 0).unwrap();
        pool.open(document.as_mut(), 1).unwrap();
        pool.open(document.as_mut(), 2).unwrap();
        // Touching page 0 again does not refresh its position
        pool.open(document.as_mut(), 0).unwrap();
        pool.open(document.as_mut(), 3).unwrap();

        assert_eq!(pool.open_indices(), vec![1, 2, 3]);
        assert!(!pool.contains(0));
        assert_eq!(pool.stats().evicted, 1);
        assert_eq!(backend.pages_closed(), 1);
    }

    #[test]
    fn test_never_exceeds_capacity() {
        let backend = FakeBackend::new(50);
        let mut document = open_document(&backend);
        let mut pool = PageHandlePool::new(DEFAULT_MAX_OPEN_PAGES);

        for index in (0..50).chain((0..50).rev()).step_by(3) {
            pool.open(document.as_mut(), index).unwrap();
            assert!(pool.len() <= DEFAULT_MAX_OPEN_PAGES);
        }

        assert_eq!(pool.stats().peak, DEFAULT_MAX_OPEN_PAGES);
        assert_eq!(backend.peak_open_pages(), DEFAULT_MAX_OPEN_PAGES);
    }

    #[test]
    fn test_out_of_range_leaves_pool_untouched() {
        let backend = FakeBackend::new(4);
        let mut document = open_document(&backend);
        let mut pool = PageHandlePool::new(1);
        pool.open(document.as_mut(), 0).unwrap();

        let err = pool.open(document.as_mut(), 4).err().expect("expected error");
        assert_eq!(err, RenderError::PageOutOfRange { index: 4, page_count: 4 });
        assert_eq!(pool.open_indices(), vec![0]);
        assert_eq!(backend.pages_closed(), 0);
    }

    #[test]
    fn test_open_failure_is_reported() {
        let backend = FakeBackend::new(4);
        backend.fail_page_open(2);
        let mut document = open_document(&backend);
        let mut pool = PageHandlePool::new(2);

        let err = pool.open(document.as_mut(), 2).err().expect("expected error");
        assert!(matches!(err, RenderError::PageOpenFailed { index: 2, .. }));
        assert!(pool.is_empty());
    }

    #[test]
    fn test_close_all_tolerates_failures() {
        let backend = FakeBackend::new(4).failing_page_close();
        let mut document = open_document(&backend);
        let mut pool = PageHandlePool::new(4);
        pool.open(document.as_mut(), 0).unwrap();
        pool.open(document.as_mut(), 1).unwrap();

        assert_eq!(pool.close_all(), 2);
        assert!(pool.is_empty());
        assert_eq!(backend.open_pages(), 0);
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        assert_eq!(PageHandlePool::new(0).capacity(), 1);
    }
}
