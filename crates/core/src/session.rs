//! Document session
//!
//! Wraps the single [`DocumentHandle`] of a viewer session in one lock.
//! Page opens, renders and closing all go through that lock, so the backend
//! never sees two operations on the same document at once.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use pdf_viewer_render::{ByteSource, DocumentHandle, PageSize, PoolStats, RasterBackend, RenderResult};

use crate::error::{ViewerError, ViewerResult};

/// One open document and the lock guarding it
pub struct DocumentSession {
    handle: Mutex<DocumentHandle>,
    page_count: usize,
    closed: AtomicBool,
    dimensions: Mutex<HashMap<usize, PageSize>>,
}

impl DocumentSession {
    /// Open a document
    ///
    /// # Arguments
    /// * `backend` - Rasterizer used for this document
    /// * `source` - Document bytes
    /// * `max_open_pages` - Bound on simultaneously open page handles
    pub fn open(backend: &dyn RasterBackend, source: &ByteSource, max_open_pages: usize) -> ViewerResult<Self> {
        let handle = DocumentHandle::open(backend, source, max_open_pages)?;
        Ok(Self {
            page_count: handle.page_count(),
            handle: Mutex::new(handle),
            closed: AtomicBool::new(false),
            dimensions: Mutex::new(HashMap::new()),
        })
    }

    pub fn page_count(&self) -> usize {
        self.page_count
    }

    /// True once [`close`](Self::close) has started
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Fail with a range error unless `index < page_count`
    pub fn check_range(&self, index: usize) -> ViewerResult<()> {
        if index < self.page_count {
            Ok(())
        } else {
            Err(ViewerError::Range {
                index,
                page_count: self.page_count,
            })
        }
    }

    /// Run `f` against the document handle under the session lock
    pub fn with_handle<T>(&self, f: impl FnOnce(&mut DocumentHandle) -> RenderResult<T>) -> ViewerResult<T> {
        if self.is_closed() {
            return Err(ViewerError::RendererClosed);
        }
        let mut handle = self.handle.lock();
        if handle.is_closed() {
            return Err(ViewerError::RendererClosed);
        }
        Ok(f(&mut handle)?)
    }

    /// Page size, served from the dimension cache after the first lookup
    pub fn page_dimensions(&self, index: usize) -> ViewerResult<PageSize> {
        self.check_range(index)?;
        if let Some(size) = self.dimensions.lock().get(&index) {
            return Ok(*size);
        }

        let size = self.with_handle(|handle| handle.page_dimensions(index))?;
        self.dimensions.lock().insert(index, size);
        Ok(size)
    }

    /// Dimensions already looked up, without touching the backend
    pub fn cached_dimensions(&self, index: usize) -> Option<PageSize> {
        self.dimensions.lock().get(&index).copied()
    }

    /// Number of open page handles
    ///
    /// Waits for any render holding the session lock.
    pub fn open_page_count(&self) -> usize {
        self.handle.lock().open_page_count()
    }

    pub fn handle_stats(&self) -> PoolStats {
        self.handle.lock().pages().stats()
    }

    /// Close every page handle and the document
    ///
    /// Marks the session closed first so queued work fails fast, then waits
    /// for the lock. Later calls return `Ok(())`.
    pub fn close(&self) -> ViewerResult<()> {
        self.closed.store(true, Ordering::Release);
        let result = self.handle.lock().close();
        self.dimensions.lock().clear();
        result.map_err(ViewerError::from)
    }
}
