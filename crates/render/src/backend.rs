//! Raster backend contract and the document handle that owns it
//!
//! The backend is an external rasterizer (PDFium, a platform renderer, a
//! test double). It is assumed to be single-threaded and stateful: only one
//! page open or render may run against a document at a time. Callers are
//! expected to hold a [`DocumentHandle`] behind a single lock.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use crate::bitmap::PixelBuffer;
use crate::handle_pool::PageHandlePool;
use crate::{RenderError, RenderResult};

/// Byte-addressable document source handed to the backend
#[derive(Clone, PartialEq, Eq)]
pub enum ByteSource {
    /// A local file
    File(PathBuf),
    /// An in-memory copy of the document
    Memory(Arc<[u8]>),
}

impl fmt::Debug for ByteSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ByteSource::File(path) => f.debug_tuple("File").field(path).finish(),
            ByteSource::Memory(bytes) => write!(f, "Memory({} bytes)", bytes.len()),
        }
    }
}

/// Page dimensions in backend units (points for PDF)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PageSize {
    pub width: u32,
    pub height: u32,
}

impl PageSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

/// Sub-rectangle of the target buffer to draw into
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClipRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Opens documents from a byte source
pub trait RasterBackend: Send + Sync {
    fn open(&self, source: &ByteSource) -> RenderResult<Box<dyn RasterDocument>>;
}

/// An open backend document
pub trait RasterDocument: Send {
    fn page_count(&self) -> usize;

    /// Open one page. Fails with [`RenderError::PageOpenFailed`].
    fn open_page(&mut self, index: usize) -> RenderResult<Box<dyn RasterPage>>;

    /// Release the document and its underlying descriptor. Must be idempotent.
    fn close(&mut self) -> RenderResult<()>;
}

/// An open backend page
pub trait RasterPage: Send {
    fn index(&self) -> usize;

    fn dimensions(&self) -> PageSize;

    /// Draw the page scaled to the full target buffer, restricted to `clip`
    /// when given. Synchronous.
    fn render(&mut self, target: &mut PixelBuffer, clip: Option<ClipRect>) -> RenderResult<()>;

    /// Release the page. Must be idempotent.
    fn close(&mut self) -> RenderResult<()>;
}

/// Owner of an open backend document and its page handles
///
/// Exactly one handle exists per viewer session. Once closed, every
/// operation fails with [`RenderError::DocumentClosed`]. Closing is
/// idempotent and also happens on drop.
pub struct DocumentHandle {
    document: Option<Box<dyn RasterDocument>>,
    page_count: usize,
    pages: PageHandlePool,
}

impl DocumentHandle {
    /// Open a document through the backend
    ///
    /// # Arguments
    /// * `backend` - Rasterizer that understands the document format
    /// * `source` - Where the document bytes live
    /// * `max_open_pages` - Bound on simultaneously open page handles
    pub fn open(
        backend: &dyn RasterBackend,
        source: &ByteSource,
        max_open_pages: usize,
    ) -> RenderResult<Self> {
        let document = backend.open(source)?;
        let page_count = document.page_count();
        tracing::debug!(?source, page_count, "document opened");

        Ok(Self {
            document: Some(document),
            page_count,
            pages: PageHandlePool::new(max_open_pages),
        })
    }

    /// Number of pages, fixed at open time
    pub fn page_count(&self) -> usize {
        self.page_count
    }

    pub fn is_closed(&self) -> bool {
        self.document.is_none()
    }

    /// Number of currently open page handles
    pub fn open_page_count(&self) -> usize {
        self.pages.len()
    }

    /// The page-handle pool (read-only view)
    pub fn pages(&self) -> &PageHandlePool {
        &self.pages
    }

    /// Get an open page handle, opening it (and possibly evicting the oldest
    /// handle) on first use
    pub fn page(&mut self, index: usize) -> RenderResult<&mut Box<dyn RasterPage>> {
        let document = self
            .document
            .as_deref_mut()
            .ok_or(RenderError::DocumentClosed)?;
        self.pages.open(document, index)
    }

    /// Dimensions of a page
    pub fn page_dimensions(&mut self, index: usize) -> RenderResult<PageSize> {
        Ok(self.page(index)?.dimensions())
    }

    /// Render a page into `target`
    pub fn render_page(
        &mut self,
        index: usize,
        target: &mut PixelBuffer,
        clip: Option<ClipRect>,
    ) -> RenderResult<()> {
        self.page(index)?.render(target, clip)
    }

    /// Close every page handle, then the document
    ///
    /// Every release is attempted even if an earlier one fails; page-close
    /// failures are logged, a document-close failure is returned. Calling
    /// this again is a no-op.
    pub fn close(&mut self) -> RenderResult<()> {
        let Some(mut document) = self.document.take() else {
            return Ok(());
        };

        let page_failures = self.pages.close_all();
        let result = document.close();

        match &result {
            Ok(()) => tracing::debug!(page_failures, "document closed"),
            Err(e) => tracing::warn!(error = %e, page_failures, "document close failed"),
        }
        result.map_err(|e| RenderError::CloseFailed(e.to_string()))
    }
}

impl Drop for DocumentHandle {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::warn!(error = %e, "error closing document on drop");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeBackend;
    use crate::PixelFormat;

    #[test]
    fn test_open_reports_page_count() {
        let backend = FakeBackend::new(7);
        let handle = DocumentHandle::open(&backend, &ByteSource::File("a.pdf".into()), 5).unwrap();
        assert_eq!(handle.page_count(), 7);
        assert!(!handle.is_closed());
    }

    #[test]
    fn test_render_page_draws_into_target() {
        let backend = FakeBackend::new(3);
        let mut handle = DocumentHandle::open(&backend, &ByteSource::File("a.pdf".into()), 5).unwrap();
        let mut target = PixelBuffer::new(4, 4, PixelFormat::Rgba8888).unwrap();

        handle.render_page(2, &mut target, None).unwrap();
        assert_eq!(&target.data()[..4], &FakeBackend::page_color(2));
    }

    #[test]
    fn test_out_of_range_opens_nothing() {
        let backend = FakeBackend::new(3);
        let mut handle = DocumentHandle::open(&backend, &ByteSource::File("a.pdf".into()), 5).unwrap();

        let err = handle.page_dimensions(3).unwrap_err();
        assert_eq!(err, RenderError::PageOutOfRange { index: 3, page_count: 3 });
        assert_eq!(handle.open_page_count(), 0);
        assert_eq!(backend.pages_opened(), 0);
    }

    #[test]
    fn test_close_is_idempotent_and_releases_everything() {
        let backend = FakeBackend::new(4);
        let mut handle = DocumentHandle::open(&backend, &ByteSource::File("a.pdf".into()), 5).unwrap();
        handle.page_dimensions(0).unwrap();
        handle.page_dimensions(1).unwrap();

        handle.close().unwrap();
        handle.close().unwrap();

        assert!(handle.is_closed());
        assert_eq!(handle.open_page_count(), 0);
        assert_eq!(backend.pages_closed(), 2);
        assert_eq!(backend.documents_closed(), 1);
        assert_eq!(handle.page_dimensions(0), Err(RenderError::DocumentClosed));
    }

    #[test]
    fn test_drop_closes_document() {
        let backend = FakeBackend::new(2);
        {
            let mut handle =
                DocumentHandle::open(&backend, &ByteSource::File("a.pdf".into()), 5).unwrap();
            handle.page_dimensions(1).unwrap();
        }
        assert_eq!(backend.documents_closed(), 1);
        assert_eq!(backend.pages_closed(), 1);
    }

    #[test]
    fn test_page_close_failures_do_not_abort_close() {
        let backend = FakeBackend::new(3).failing_page_close();
        let mut handle = DocumentHandle::open(&backend, &ByteSource::File("a.pdf".into()), 5).unwrap();
        handle.page_dimensions(0).unwrap();
        handle.page_dimensions(1).unwrap();

        handle.close().unwrap();
        assert_eq!(backend.documents_closed(), 1);
        assert_eq!(handle.open_page_count(), 0);
    }
}
