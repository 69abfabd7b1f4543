//! PDF Viewer Core Library
//!
//! Document sessions, render scheduling and remote document downloads.
//!
//! A [`PdfViewer`] owns one open document. Page requests are answered from
//! the tiered cache when possible and otherwise rendered on a small worker
//! pool, one render at a time against the document. Scroll signals drive
//! speculative prefetching. [`StreamingDownloader`] fetches remote documents
//! before they are opened.

pub mod config;
pub mod downloader;
pub mod error;
pub mod render;
pub mod session;
pub mod source;
pub mod viewer;

pub use config::{DownloadConfig, RenderQuality, ViewerConfig};
pub use downloader::{DownloadHandle, DownloadState, StreamingDownloader};
pub use error::{DownloadError, DownloadErrorKind, ViewerError, ViewerResult};
pub use render::{RenderHandle, RenderOutcome, RenderScheduler, RenderStats};
pub use session::DocumentSession;
pub use source::{clear_stale_downloads, validate_document, DocumentSource, PDF_SIGNATURE};
pub use viewer::PdfViewer;
