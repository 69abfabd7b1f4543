//! Content-derived cache identifiers
//!
//! An identifier names one document's folder under the cache root. It is a
//! source-kind prefix followed by the SHA-256 of the canonical source string,
//! so the same document maps to the same folder across runs and different
//! documents never share one.

use sha2::{Digest, Sha256};
use std::fmt;
use std::path::Path;

const URL_PREFIX: &str = "url_";
const FILE_PREFIX: &str = "file_";

/// Folder name scoping one document's cached pages
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheIdentifier(String);

impl CacheIdentifier {
    /// Identifier for a remote document
    pub fn for_url(url: &str) -> Self {
        Self(format!("{URL_PREFIX}{}", sha256_hex(url.trim())))
    }

    /// Identifier for a local file
    ///
    /// The path is canonicalized when it exists so that different spellings
    /// of the same file share a folder.
    pub fn for_path(path: &Path) -> Self {
        let canonical = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
        Self(format!(
            "{FILE_PREFIX}{}",
            sha256_hex(&canonical.to_string_lossy())
        ))
    }

    /// Accept an existing folder name as an identifier
    ///
    /// Returns `None` for names that could escape the cache root.
    pub fn from_raw(name: &str) -> Option<Self> {
        let usable = !name.is_empty()
            && name != "."
            && name != ".."
            && !name.contains(['/', '\\']);
        usable.then(|| Self(name.to_string()))
    }

    /// Whether `name` has the exact shape [`CacheIdentifier::for_url`] produces
    pub fn is_url_identifier(name: &str) -> bool {
        name.strip_prefix(URL_PREFIX).is_some_and(|hash| {
            hash.len() == 64 && hash.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
        })
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn sha256_hex(input: &str) -> String {
    hex::encode(Sha256::digest(input.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_identifier_is_stable() {
        let a = CacheIdentifier::for_url("https://example.com/a.pdf");
        let b = CacheIdentifier::for_url("https://example.com/a.pdf");
        assert_eq!(a, b);
        assert!(a.as_str().starts_with("url_"));
        assert_eq!(a.as_str().len(), "url_".len() + 64);
    }

    #[test]
    fn test_different_sources_do_not_collide() {
        let a = CacheIdentifier::for_url("https://example.com/a.pdf");
        let b = CacheIdentifier::for_url("https://example.com/b.pdf");
        assert_ne!(a, b);
    }

    #[test]
    fn test_file_identifier_canonicalizes() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("doc.pdf");
        std::fs::write(&file, b"%PDF-1.7").unwrap();
        let dotted = dir.path().join(".").join("doc.pdf");

        let id = CacheIdentifier::for_path(&file);
        assert_eq!(id, CacheIdentifier::for_path(&dotted));
        assert!(id.as_str().starts_with("file_"));
    }

    #[test]
    fn test_file_and_url_prefixes_differ() {
        let path = CacheIdentifier::for_path(Path::new("/nonexistent/doc.pdf"));
        let url = CacheIdentifier::for_url("/nonexistent/doc.pdf");
        assert_ne!(path, url);
    }

    #[test]
    fn test_from_raw_rejects_traversal() {
        assert!(CacheIdentifier::from_raw("url_abc").is_some());
        assert!(CacheIdentifier::from_raw("..").is_none());
        assert!(CacheIdentifier::from_raw("a/b").is_none());
        assert!(CacheIdentifier::from_raw("").is_none());
    }

    #[test]
    fn test_url_identifier_shape() {
        let id = CacheIdentifier::for_url("https://example.com/a.pdf");
        assert!(CacheIdentifier::is_url_identifier(id.as_str()));
        assert!(!CacheIdentifier::is_url_identifier("url_abc"));
        assert!(!CacheIdentifier::is_url_identifier(&id.as_str().to_uppercase()));
        assert!(!CacheIdentifier::is_url_identifier(
            CacheIdentifier::for_path(Path::new("/tmp/a.pdf")).as_str()
        ));
    }
}
