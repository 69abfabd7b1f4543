//! Streaming document downloader
//!
//! Downloads are read in fixed-size chunks into `<dest>.part` and renamed
//! over the destination once the body is complete, so a failed or cancelled
//! download never leaves a truncated document behind. Progress is reported
//! as a sequence of [`DownloadState`] values delivered in order on a single
//! channel.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use pdf_viewer_scheduler::CancellationToken;

use crate::config::DownloadConfig;
use crate::error::{DownloadError, DownloadErrorKind, ViewerError, ViewerResult};
use crate::source::{clear_stale_downloads, validate_document, DocumentSource};

/// Progress of one download attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadState {
    NotStarted,
    /// `total_bytes` is `None` when the server did not report a length
    InProgress {
        bytes_read: u64,
        total_bytes: Option<u64>,
    },
    Succeeded(PathBuf),
    Failed(DownloadError),
}

impl DownloadState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, DownloadState::Succeeded(_) | DownloadState::Failed(_))
    }
}

/// HTTP downloader for remote documents
#[derive(Clone)]
pub struct StreamingDownloader {
    agent: ureq::Agent,
    config: DownloadConfig,
}

impl StreamingDownloader {
    pub fn new(config: DownloadConfig) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(config.connect_timeout)
            .timeout_read(config.read_timeout)
            .build();
        Self { agent, config }
    }

    pub fn config(&self) -> &DownloadConfig {
        &self.config
    }

    /// Start a download on a background thread
    ///
    /// States arrive through the returned handle in the order they happen.
    pub fn download(&self, url: &str, dest: &Path) -> ViewerResult<DownloadHandle> {
        self.download_with_headers(url, &BTreeMap::new(), dest)
    }

    /// [`download`](Self::download) with extra request headers
    pub fn download_with_headers(
        &self,
        url: &str,
        headers: &BTreeMap<String, String>,
        dest: &Path,
    ) -> ViewerResult<DownloadHandle> {
        let (sender, receiver) = mpsc::channel();
        let token = CancellationToken::new();

        let downloader = self.clone();
        let url = url.to_string();
        let headers = headers.clone();
        let dest = dest.to_path_buf();
        let thread_token = token.clone();
        let thread = thread::Builder::new()
            .name("pdf-viewer-download".to_string())
            .spawn(move || {
                let _ = downloader.download_blocking(&url, &headers, &dest, &thread_token, |state| {
                    let _ = sender.send(state);
                });
            })?;

        Ok(DownloadHandle {
            receiver,
            token,
            thread: Some(thread),
        })
    }

    /// Download on the calling thread, retrying retryable failures
    ///
    /// Each attempt reports `NotStarted` followed by `InProgress` states. A
    /// single `Succeeded` or `Failed` ends the sequence.
    ///
    /// # Arguments
    /// * `url` - Document URL
    /// * `headers` - Request headers added to the configured ones
    /// * `dest` - Final location of the document
    /// * `token` - Cancels the download between chunks
    /// * `notify` - Receives every state change
    pub fn download_blocking(
        &self,
        url: &str,
        headers: &BTreeMap<String, String>,
        dest: &Path,
        token: &CancellationToken,
        mut notify: impl FnMut(DownloadState),
    ) -> Result<PathBuf, DownloadError> {
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            notify(DownloadState::NotStarted);
            match self.attempt(url, headers, dest, token, &mut notify) {
                Ok(path) => {
                    tracing::debug!(url, path = %path.display(), attempt, "download finished");
                    notify(DownloadState::Succeeded(path.clone()));
                    return Ok(path);
                }
                Err(e) if e.is_retryable() && attempt < max_attempts && !token.is_cancelled() => {
                    tracing::warn!(url, attempt, error = %e, "download failed, retrying");
                    if !sleep_unless_cancelled(self.config.retry_delay, token) {
                        let e = cancelled();
                        notify(DownloadState::Failed(e.clone()));
                        return Err(e);
                    }
                    attempt += 1;
                }
                Err(e) => {
                    tracing::error!(url, attempt, error = %e, "download failed");
                    notify(DownloadState::Failed(e.clone()));
                    return Err(e);
                }
            }
        }
    }

    /// Make a remote document available locally
    ///
    /// A previously downloaded copy that still validates is reused. Other
    /// downloads in `download_dir` are removed. The result is validated
    /// before it is returned; an invalid body is deleted and reported as
    /// [`DownloadErrorKind::Corrupted`]. Local sources are validated and
    /// returned as they are.
    pub fn fetch(
        &self,
        source: &DocumentSource,
        download_dir: &Path,
        notify: impl FnMut(DownloadState),
    ) -> ViewerResult<PathBuf> {
        let (url, headers) = match source {
            DocumentSource::LocalFile(path) => {
                validate_document(path)?;
                return Ok(path.clone());
            }
            DocumentSource::Remote { url, headers } => (url, headers),
        };
        let dest = source
            .download_path(download_dir)
            .ok_or_else(|| ViewerError::InvalidDocument(url.clone()))?;

        if let Err(e) = clear_stale_downloads(download_dir, Some(&dest)) {
            tracing::warn!(dir = %download_dir.display(), error = %e, "failed to clear stale downloads");
        }
        if dest.is_file() && validate_document(&dest).is_ok() {
            tracing::debug!(url, path = %dest.display(), "reusing downloaded document");
            return Ok(dest);
        }

        let token = CancellationToken::new();
        let path = self.download_blocking(url, headers, &dest, &token, notify)?;
        if let Err(e) = validate_document(&path) {
            let _ = fs::remove_file(&path);
            return Err(DownloadError::new(DownloadErrorKind::Corrupted, e.to_string()).into());
        }
        Ok(path)
    }

    fn attempt(
        &self,
        url: &str,
        headers: &BTreeMap<String, String>,
        dest: &Path,
        token: &CancellationToken,
        notify: &mut impl FnMut(DownloadState),
    ) -> Result<PathBuf, DownloadError> {
        let mut request = self.agent.get(url);
        for (name, value) in self.config.headers.iter().chain(headers) {
            request = request.set(name, value);
        }
        let response = request.call().map_err(classify)?;

        if let Some(content_type) = response.header("Content-Type") {
            if !is_document_content_type(content_type) {
                return Err(DownloadError::new(
                    DownloadErrorKind::InvalidContentType,
                    format!("unexpected content type {content_type}"),
                ));
            }
        }
        let total_bytes = response
            .header("Content-Length")
            .and_then(|value| value.trim().parse::<u64>().ok())
            .filter(|&len| len > 0);

        remove_stale(dest).map_err(|e| write_error(dest, &e))?;
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).map_err(|e| write_error(parent, &e))?;
        }

        let part = part_path(dest);
        let result = self
            .stream_body(response.into_reader(), &part, total_bytes, token, notify)
            .and_then(|bytes_read| match total_bytes {
                Some(total) if bytes_read != total => Err(DownloadError::new(
                    DownloadErrorKind::IncompleteDownload,
                    format!("received {bytes_read} of {total} bytes"),
                )),
                _ => fs::rename(&part, dest).map_err(|e| write_error(dest, &e)),
            });

        match result {
            Ok(()) => Ok(dest.to_path_buf()),
            Err(e) => {
                let _ = fs::remove_file(&part);
                Err(e)
            }
        }
    }

    fn stream_body(
        &self,
        mut reader: impl Read,
        part: &Path,
        total_bytes: Option<u64>,
        token: &CancellationToken,
        notify: &mut impl FnMut(DownloadState),
    ) -> Result<u64, DownloadError> {
        let file = File::create(part).map_err(|e| write_error(part, &e))?;
        let mut writer = BufWriter::new(file);
        let mut chunk = vec![0u8; self.config.chunk_size.max(1)];
        let mut bytes_read = 0u64;

        notify(DownloadState::InProgress {
            bytes_read,
            total_bytes,
        });
        loop {
            if token.is_cancelled() {
                return Err(cancelled());
            }
            let n = match reader.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(DownloadError::from_io(&e)),
            };
            writer.write_all(&chunk[..n]).map_err(|e| write_error(part, &e))?;
            bytes_read += n as u64;
            notify(DownloadState::InProgress {
                bytes_read,
                total_bytes,
            });
        }

        writer.flush().map_err(|e| write_error(part, &e))?;
        Ok(bytes_read)
    }
}

/// Receiving end of a background download
///
/// Iterating yields every state until the download ends. Dropping the handle
/// cancels the download.
pub struct DownloadHandle {
    receiver: mpsc::Receiver<DownloadState>,
    token: CancellationToken,
    thread: Option<JoinHandle<()>>,
}

impl DownloadHandle {
    /// Stop after the current chunk
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Block until the download ends, passing each state to `on_state`
    pub fn wait(mut self, mut on_state: impl FnMut(&DownloadState)) -> Result<PathBuf, DownloadError> {
        let mut outcome = None;
        for state in self.receiver.iter() {
            on_state(&state);
            match state {
                DownloadState::Succeeded(path) => outcome = Some(Ok(path)),
                DownloadState::Failed(e) => outcome = Some(Err(e)),
                _ => {}
            }
            if outcome.is_some() {
                break;
            }
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::error!("download thread panicked");
            }
        }
        outcome.unwrap_or_else(|| {
            Err(DownloadError::new(
                DownloadErrorKind::Unknown,
                "download ended without a result",
            ))
        })
    }
}

impl Iterator for DownloadHandle {
    type Item = DownloadState;

    fn next(&mut self) -> Option<DownloadState> {
        self.receiver.recv().ok()
    }
}

impl Drop for DownloadHandle {
    fn drop(&mut self) {
        if self.thread.is_some() {
            self.token.cancel();
        }
    }
}

fn classify(err: ureq::Error) -> DownloadError {
    match err {
        ureq::Error::Status(code, response) => {
            let kind = match code {
                404 | 410 => DownloadErrorKind::NotFound,
                408 | 504 => DownloadErrorKind::Timeout,
                _ => DownloadErrorKind::Unknown,
            };
            DownloadError::new(kind, format!("HTTP {code} {}", response.status_text()))
        }
        ureq::Error::Transport(transport) => {
            let io_kind = std::error::Error::source(&transport)
                .and_then(|source| source.downcast_ref::<io::Error>())
                .map(io::Error::kind);
            let kind = match (transport.kind(), io_kind) {
                (_, Some(io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock)) => DownloadErrorKind::Timeout,
                (ureq::ErrorKind::Dns | ureq::ErrorKind::ConnectionFailed | ureq::ErrorKind::ProxyConnect, _) => {
                    DownloadErrorKind::NoConnectivity
                }
                (ureq::ErrorKind::Io, Some(kind)) => DownloadError::from_io(&io::Error::from(kind)).kind,
                _ => DownloadErrorKind::Unknown,
            };
            DownloadError::new(kind, transport.to_string())
        }
    }
}

/// Servers that answer with an error page usually send `text/*`
fn is_document_content_type(content_type: &str) -> bool {
    let essence = content_type.split(';').next().unwrap_or_default().trim();
    !essence.to_ascii_lowercase().starts_with("text/")
}

fn part_path(dest: &Path) -> PathBuf {
    let mut name = dest.as_os_str().to_os_string();
    name.push(".part");
    PathBuf::from(name)
}

fn remove_stale(dest: &Path) -> io::Result<()> {
    match fs::remove_file(dest) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

fn write_error(path: &Path, err: &io::Error) -> DownloadError {
    DownloadError::new(
        DownloadErrorKind::Unknown,
        format!("failed to write {}: {err}", path.display()),
    )
}

fn cancelled() -> DownloadError {
    DownloadError::new(DownloadErrorKind::Unknown, "download cancelled")
}

fn sleep_unless_cancelled(delay: Duration, token: &CancellationToken) -> bool {
    let deadline = Instant::now() + delay;
    while !token.is_cancelled() {
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        thread::sleep((deadline - now).min(Duration::from_millis(50)));
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_type_filter() {
        assert!(is_document_content_type("application/pdf"));
        assert!(is_document_content_type("application/octet-stream"));
        assert!(is_document_content_type("binary/octet-stream; charset=binary"));
        assert!(!is_document_content_type("text/html; charset=utf-8"));
        assert!(!is_document_content_type("TEXT/PLAIN"));
    }

    #[test]
    fn test_part_path() {
        assert_eq!(part_path(Path::new("/tmp/doc.pdf")), PathBuf::from("/tmp/doc.pdf.part"));
    }

    #[test]
    fn test_sleep_unless_cancelled() {
        let token = CancellationToken::new();
        assert!(sleep_unless_cancelled(Duration::from_millis(1), &token));

        token.cancel();
        let started = Instant::now();
        assert!(!sleep_unless_cancelled(Duration::from_secs(30), &token));
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_download_state_terminal() {
        assert!(!DownloadState::NotStarted.is_terminal());
        assert!(!DownloadState::InProgress { bytes_read: 1, total_bytes: None }.is_terminal());
        assert!(DownloadState::Succeeded(PathBuf::from("a.pdf")).is_terminal());
        assert!(DownloadState::Failed(cancelled()).is_terminal());
    }

    #[test]
    fn test_unreachable_host_is_no_connectivity() {
        // Port 9 on loopback is closed on any sane test machine
        let downloader = StreamingDownloader::new(DownloadConfig::default().with_retry(1, Duration::ZERO));
        let dir = tempfile::TempDir::new().unwrap();
        let err = downloader
            .download_blocking(
                "http://127.0.0.1:9/doc.pdf",
                &BTreeMap::new(),
                &dir.path().join("doc.pdf"),
                &CancellationToken::new(),
                |_| {},
            )
            .unwrap_err();
        assert_eq!(err.kind, DownloadErrorKind::NoConnectivity);
    }
}
