//! Viewer error types

use std::fmt;
use std::io;

use pdf_viewer_render::RenderError;

/// Errors delivered to viewer callers
#[derive(Debug, thiserror::Error)]
pub enum ViewerError {
    /// Opening or closing a document or page failed
    #[error("resource error: {0}")]
    Resource(RenderError),

    /// Page index is not within `0..page_count`
    #[error("page {index} out of range (page count {page_count})")]
    Range { index: usize, page_count: usize },

    /// The backend failed to render a page, or its buffer could not be allocated
    #[error("render error: {0}")]
    Render(RenderError),

    #[error(transparent)]
    Download(#[from] DownloadError),

    /// The session was closed while the request was outstanding
    #[error("renderer is closed")]
    RendererClosed,

    /// The file is not a well-formed document
    #[error("invalid document: {0}")]
    InvalidDocument(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl ViewerError {
    /// Whether retrying the same request can succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            ViewerError::Render(_) => true,
            ViewerError::Download(e) => e.is_retryable(),
            _ => false,
        }
    }
}

impl From<RenderError> for ViewerError {
    fn from(err: RenderError) -> Self {
        match err {
            RenderError::PageOutOfRange { index, page_count } => ViewerError::Range { index, page_count },
            RenderError::DocumentClosed => ViewerError::RendererClosed,
            RenderError::RenderFailed { .. } | RenderError::OutOfMemory { .. } => ViewerError::Render(err),
            RenderError::OpenFailed(_)
            | RenderError::PageOpenFailed { .. }
            | RenderError::CloseFailed(_) => ViewerError::Resource(err),
        }
    }
}

/// Result type for viewer operations
pub type ViewerResult<T> = Result<T, ViewerError>;

/// Classification of a failed download
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DownloadErrorKind {
    NoConnectivity,
    Timeout,
    NotFound,
    InvalidContentType,
    IncompleteDownload,
    Corrupted,
    Unknown,
}

impl DownloadErrorKind {
    /// Only connectivity problems and timeouts are worth retrying
    pub fn is_retryable(self) -> bool {
        matches!(self, DownloadErrorKind::NoConnectivity | DownloadErrorKind::Timeout)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DownloadErrorKind::NoConnectivity => "no connectivity",
            DownloadErrorKind::Timeout => "timeout",
            DownloadErrorKind::NotFound => "not found",
            DownloadErrorKind::InvalidContentType => "invalid content type",
            DownloadErrorKind::IncompleteDownload => "incomplete download",
            DownloadErrorKind::Corrupted => "corrupted",
            DownloadErrorKind::Unknown => "unknown",
        }
    }
}

impl fmt::Display for DownloadErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failed download
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("download failed ({kind}): {message}")]
pub struct DownloadError {
    pub kind: DownloadErrorKind,
    pub message: String,
}

impl DownloadError {
    pub fn new(kind: DownloadErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }

    /// Classify an I/O error raised while reading the response or writing the file
    pub fn from_io(err: &io::Error) -> Self {
        let kind = match err.kind() {
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => DownloadErrorKind::Timeout,
            io::ErrorKind::UnexpectedEof
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe => DownloadErrorKind::IncompleteDownload,
            io::ErrorKind::ConnectionRefused | io::ErrorKind::NotConnected => {
                DownloadErrorKind::NoConnectivity
            }
            _ => DownloadErrorKind::Unknown,
        };
        Self::new(kind, err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_error_mapping() {
        let range: ViewerError = RenderError::PageOutOfRange { index: 10, page_count: 10 }.into();
        assert!(matches!(range, ViewerError::Range { index: 10, page_count: 10 }));

        let closed: ViewerError = RenderError::DocumentClosed.into();
        assert!(matches!(closed, ViewerError::RendererClosed));

        let open: ViewerError = RenderError::PageOpenFailed { index: 1, reason: "bad".into() }.into();
        assert!(matches!(open, ViewerError::Resource(_)));
        assert!(!open.is_retryable());

        let oom: ViewerError = RenderError::OutOfMemory { bytes: 42 }.into();
        assert!(matches!(oom, ViewerError::Render(_)));
        assert!(oom.is_retryable());
    }

    #[test]
    fn test_download_retryable_kinds() {
        assert!(DownloadErrorKind::NoConnectivity.is_retryable());
        assert!(DownloadErrorKind::Timeout.is_retryable());
        for kind in [
            DownloadErrorKind::NotFound,
            DownloadErrorKind::InvalidContentType,
            DownloadErrorKind::IncompleteDownload,
            DownloadErrorKind::Corrupted,
            DownloadErrorKind::Unknown,
        ] {
            assert!(!kind.is_retryable(), "{kind} should be terminal");
        }
    }

    #[test]
    fn test_download_error_from_io() {
        let timeout = io::Error::new(io::ErrorKind::TimedOut, "slow");
        assert_eq!(DownloadError::from_io(&timeout).kind, DownloadErrorKind::Timeout);

        let eof = io::Error::new(io::ErrorKind::UnexpectedEof, "short");
        assert_eq!(DownloadError::from_io(&eof).kind, DownloadErrorKind::IncompleteDownload);

        let other = io::Error::new(io::ErrorKind::PermissionDenied, "nope");
        assert_eq!(DownloadError::from_io(&other).kind, DownloadErrorKind::Unknown);
    }

    #[test]
    fn test_download_error_display() {
        let err = ViewerError::from(DownloadError::new(DownloadErrorKind::NotFound, "HTTP 404"));
        assert_eq!(err.to_string(), "download failed (not found): HTTP 404");
    }
}
