//! PDF Viewer Render Library
//!
//! Raster backend contract, the bounded pool of open page handles and
//! pooled pixel buffers that page renders are drawn into.

pub mod backend;
pub mod bitmap;
pub mod handle_pool;
#[cfg(feature = "pdfium")]
pub mod pdfium;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use backend::{ByteSource, ClipRect, DocumentHandle, PageSize, RasterBackend, RasterDocument, RasterPage};
pub use bitmap::{Bitmap, BitmapPool, BitmapPoolStats, PixelBuffer, PixelFormat};
pub use handle_pool::{PageHandlePool, PoolStats, DEFAULT_MAX_OPEN_PAGES};
#[cfg(feature = "pdfium")]
pub use pdfium::PdfiumBackend;

/// Errors raised by the raster backend and the page-handle pool
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RenderError {
    /// Failed to open the document
    #[error("failed to open document: {0}")]
    OpenFailed(String),

    /// Page index is not within `0..page_count`
    #[error("page {index} out of range (page count {page_count})")]
    PageOutOfRange { index: usize, page_count: usize },

    /// The owning document has already been closed
    #[error("document is closed")]
    DocumentClosed,

    /// The backend could not open the page
    #[error("failed to open page {index}: {reason}")]
    PageOpenFailed { index: usize, reason: String },

    /// The backend render call failed
    #[error("failed to render page {index}: {reason}")]
    RenderFailed { index: usize, reason: String },

    /// A pixel buffer of the requested size could not be allocated
    #[error("out of memory allocating {bytes} byte pixel buffer")]
    OutOfMemory { bytes: usize },

    /// Closing a page or the document failed
    #[error("failed to close: {0}")]
    CloseFailed(String),
}

/// Result type for render operations
pub type RenderResult<T> = Result<T, RenderError>;
