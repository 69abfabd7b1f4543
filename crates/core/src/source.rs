//! Document sources and validation

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use pdf_viewer_cache::CacheIdentifier;

use crate::error::{ViewerError, ViewerResult};

/// Signature every PDF carries near the start of the file
pub const PDF_SIGNATURE: &[u8] = b"%PDF";

/// How far into the file the signature may appear
pub const SIGNATURE_SEARCH_LEN: usize = 1024;

const DOWNLOAD_SUFFIX: &str = ".pdf";

/// Where a document comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentSource {
    LocalFile(PathBuf),
    Remote {
        url: String,
        headers: BTreeMap<String, String>,
    },
}

impl DocumentSource {
    pub fn local(path: impl Into<PathBuf>) -> Self {
        DocumentSource::LocalFile(path.into())
    }

    pub fn remote(url: impl Into<String>) -> Self {
        DocumentSource::Remote {
            url: url.into(),
            headers: BTreeMap::new(),
        }
    }

    /// Parse a command-line style argument: `http(s)://` means remote
    pub fn parse(arg: &str) -> Self {
        let lower = arg.to_ascii_lowercase();
        if lower.starts_with("http://") || lower.starts_with("https://") {
            Self::remote(arg)
        } else {
            Self::local(arg)
        }
    }

    pub fn is_remote(&self) -> bool {
        matches!(self, DocumentSource::Remote { .. })
    }

    /// Identifier naming this document's disk cache folder
    pub fn cache_identifier(&self) -> CacheIdentifier {
        match self {
            DocumentSource::LocalFile(path) => CacheIdentifier::for_path(path),
            DocumentSource::Remote { url, .. } => CacheIdentifier::for_url(url),
        }
    }

    /// Local file a remote document is downloaded to
    ///
    /// Returns `None` for local sources.
    pub fn download_path(&self, download_dir: &Path) -> Option<PathBuf> {
        match self {
            DocumentSource::LocalFile(_) => None,
            DocumentSource::Remote { .. } => Some(
                download_dir.join(format!("{}{DOWNLOAD_SUFFIX}", self.cache_identifier())),
            ),
        }
    }
}

/// Check that a file looks like a PDF before handing it to the backend
///
/// The file must be at least four bytes long and carry `%PDF` within its
/// first kilobyte.
pub fn validate_document(path: &Path) -> ViewerResult<()> {
    let invalid = |reason: String| ViewerError::InvalidDocument(format!("{}: {reason}", path.display()));

    let mut file = File::open(path).map_err(|e| invalid(e.to_string()))?;
    let len = file.metadata().map_err(|e| invalid(e.to_string()))?.len();
    if len < PDF_SIGNATURE.len() as u64 {
        return Err(invalid(format!("file too small ({len} bytes)")));
    }

    let mut head = Vec::with_capacity(SIGNATURE_SEARCH_LEN);
    file.by_ref()
        .take(SIGNATURE_SEARCH_LEN as u64)
        .read_to_end(&mut head)
        .map_err(|e| invalid(e.to_string()))?;

    match find_signature(&head) {
        Some(offset) => {
            tracing::debug!(path = %path.display(), offset, "PDF signature found");
            Ok(())
        }
        None => Err(invalid(format!(
            "PDF signature not found in first {SIGNATURE_SEARCH_LEN} bytes"
        ))),
    }
}

fn find_signature(head: &[u8]) -> Option<usize> {
    head.windows(PDF_SIGNATURE.len())
        .position(|window| window == PDF_SIGNATURE)
}

/// Remove downloaded documents in `dir` other than `keep`
///
/// Only files this crate names are touched: `url_<sha256 hex>.pdf` and its
/// `.part` leftovers. Any other file, including user PDFs sharing the
/// directory, is left alone. Returns the number of files removed.
pub fn clear_stale_downloads(dir: &Path, keep: Option<&Path>) -> io::Result<usize> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e),
    };

    let keep_name = keep.and_then(Path::file_name);
    let mut removed = 0;
    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        let name = entry.file_name();
        let owned = name.to_str().is_some_and(is_download_file_name);
        if !owned || !entry.file_type()?.is_file() || Some(name.as_os_str()) == keep_name {
            continue;
        }

        match fs::remove_file(&path) {
            Ok(()) => removed += 1,
            Err(e) => tracing::warn!(path = %path.display(), error = %e, "failed to remove stale download"),
        }
    }
    Ok(removed)
}

/// Whether `name` is a file [`DocumentSource::download_path`] could produce,
/// or its partial download
fn is_download_file_name(name: &str) -> bool {
    let stem = name
        .strip_suffix(".part")
        .unwrap_or(name)
        .strip_suffix(DOWNLOAD_SUFFIX);
    stem.is_some_and(CacheIdentifier::is_url_identifier)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_source() {
        assert!(DocumentSource::parse("https://example.com/a.pdf").is_remote());
        assert!(DocumentSource::parse("HTTP://example.com/a.pdf").is_remote());
        assert!(!DocumentSource::parse("/tmp/a.pdf").is_remote());
    }

    #[test]
    fn test_cache_identifier_prefixes() {
        let remote = DocumentSource::remote("https://example.com/a.pdf");
        assert!(remote.cache_identifier().as_str().starts_with("url_"));

        let local = DocumentSource::local("/tmp/a.pdf");
        assert!(local.cache_identifier().as_str().starts_with("file_"));
    }

    #[test]
    fn test_download_path_is_stable() {
        let dir = Path::new("/downloads");
        let source = DocumentSource::remote("https://example.com/a.pdf");
        let first = source.download_path(dir).unwrap();
        assert_eq!(first, source.download_path(dir).unwrap());
        assert_eq!(first.extension().unwrap(), "pdf");
        assert!(DocumentSource::local("/tmp/a.pdf").download_path(dir).is_none());
    }

    #[test]
    fn test_validate_document() {
        let dir = TempDir::new().unwrap();

        let good = dir.path().join("good.pdf");
        fs::write(&good, b"%PDF-1.7\n%\xE2\xE3\xCF\xD3\n").unwrap();
        assert!(validate_document(&good).is_ok());

        let offset = dir.path().join("offset.pdf");
        let mut bytes = vec![b' '; 500];
        bytes.extend_from_slice(b"%PDF-1.4");
        fs::write(&offset, &bytes).unwrap();
        assert!(validate_document(&offset).is_ok());

        let tiny = dir.path().join("tiny.pdf");
        fs::write(&tiny, b"%PD").unwrap();
        assert!(matches!(validate_document(&tiny), Err(ViewerError::InvalidDocument(_))));

        let html = dir.path().join("page.pdf");
        fs::write(&html, b"<html><body>Not found</body></html>").unwrap();
        assert!(matches!(validate_document(&html), Err(ViewerError::InvalidDocument(_))));

        let late = dir.path().join("late.pdf");
        let mut bytes = vec![b' '; SIGNATURE_SEARCH_LEN];
        bytes.extend_from_slice(b"%PDF");
        fs::write(&late, &bytes).unwrap();
        assert!(validate_document(&late).is_err());

        assert!(validate_document(&dir.path().join("missing.pdf")).is_err());
    }

    fn download_name(url: &str) -> String {
        let dir = Path::new("/downloads");
        let path = DocumentSource::remote(url).download_path(dir).unwrap();
        path.file_name().unwrap().to_string_lossy().into_owned()
    }

    #[test]
    fn test_clear_stale_downloads() {
        let dir = TempDir::new().unwrap();
        let current = download_name("https://example.com/current.pdf");
        let old = download_name("https://example.com/old.pdf");
        let partial = format!("{}.part", download_name("https://example.com/partial.pdf"));
        for name in [current.as_str(), old.as_str(), partial.as_str(), "thesis.pdf", "notes.txt"] {
            fs::write(dir.path().join(name), b"x").unwrap();
        }
        fs::create_dir(dir.path().join(download_name("https://example.com/dir.pdf"))).unwrap();

        let removed = clear_stale_downloads(dir.path(), Some(&dir.path().join(&current))).unwrap();
        assert_eq!(removed, 2);
        assert!(dir.path().join(&current).exists());
        assert!(!dir.path().join(&old).exists());
        assert!(!dir.path().join(&partial).exists());
        assert!(dir.path().join("thesis.pdf").exists());
        assert!(dir.path().join("notes.txt").exists());
    }

    #[test]
    fn test_download_file_names() {
        let name = download_name("https://example.com/a.pdf");
        assert!(is_download_file_name(&name));
        assert!(is_download_file_name(&format!("{name}.part")));
        assert!(!is_download_file_name(&name.to_uppercase()));
        assert!(!is_download_file_name("url_abc.pdf"));
        assert!(!is_download_file_name("report.pdf"));
        assert!(!is_download_file_name(&name.replace(".pdf", ".txt")));
        assert!(!is_download_file_name(&name.replace("url_", "file_")));
    }

    #[test]
    fn test_clear_stale_downloads_missing_dir() {
        let dir = TempDir::new().unwrap();
        assert_eq!(clear_stale_downloads(&dir.path().join("nope"), None).unwrap(), 0);
    }
}
