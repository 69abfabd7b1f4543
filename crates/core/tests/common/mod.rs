#![allow(dead_code)]

use std::fs;
use std::io::{Read, Write};
use std::net::{Shutdown, TcpListener, TcpStream};
use std::path::Path;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use pdf_viewer_cache::{CacheConfig, CacheIdentifier, CacheStrategy};
use pdf_viewer_core::{PdfViewer, ViewerConfig};
use pdf_viewer_render::testing::FakeBackend;
use pdf_viewer_render::ByteSource;

pub const WAIT: Duration = Duration::from_secs(5);

pub const MINIMAL_PDF: &[u8] = b"%PDF-1.4\n1 0 obj << /Type /Catalog >> endobj\ntrailer << /Root 1 0 R >>\n%%EOF\n";

pub fn config(cache_root: &Path, strategy: CacheStrategy) -> ViewerConfig {
    ViewerConfig::default()
        .with_cache(CacheConfig::default().with_cache_root(cache_root))
        .with_cache_strategy(strategy)
}

pub fn open_viewer(backend: &FakeBackend, name: &str, config: ViewerConfig) -> PdfViewer {
    PdfViewer::open(
        backend,
        &ByteSource::Memory(Arc::from(MINIMAL_PDF)),
        CacheIdentifier::for_url(name),
        config,
    )
    .unwrap()
}

/// Names of the document folders under a cache root
pub fn cache_folders(root: &Path) -> Vec<String> {
    let Ok(entries) = fs::read_dir(root) else {
        return Vec::new();
    };
    let mut names: Vec<String> = entries
        .filter_map(Result::ok)
        .filter(|entry| entry.path().is_dir())
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

/// Raw HTTP/1.1 response that closes the connection after the body
pub fn http_response(status: &str, headers: &[(&str, &str)], body: &[u8]) -> Vec<u8> {
    let mut response = format!("HTTP/1.1 {status}\r\nConnection: close\r\n");
    for (name, value) in headers {
        response.push_str(&format!("{name}: {value}\r\n"));
    }
    response.push_str("\r\n");

    let mut bytes = response.into_bytes();
    bytes.extend_from_slice(body);
    bytes
}

pub fn pdf_response(body: &[u8]) -> Vec<u8> {
    let length = body.len().to_string();
    http_response(
        "200 OK",
        &[("Content-Type", "application/pdf"), ("Content-Length", &length)],
        body,
    )
}

/// Serve one scripted response per connection, in order
///
/// Returns the base URL and a handle yielding the number of connections
/// served. Only join the handle when every response is expected to be used.
pub fn serve(responses: Vec<Vec<u8>>) -> (String, JoinHandle<usize>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let base_url = format!("http://{}", listener.local_addr().unwrap());

    let handle = thread::spawn(move || {
        let mut served = 0;
        for response in responses {
            let Ok((mut stream, _)) = listener.accept() else {
                break;
            };
            read_request(&mut stream);
            let _ = stream.write_all(&response);
            let _ = stream.flush();
            let _ = stream.shutdown(Shutdown::Both);
            served += 1;
        }
        served
    });

    (base_url, handle)
}

fn read_request(stream: &mut TcpStream) {
    let _ = stream.set_read_timeout(Some(WAIT));
    let mut request = Vec::new();
    let mut buf = [0u8; 1024];
    while !request.windows(4).any(|w| w == b"\r\n\r\n") {
        match stream.read(&mut buf) {
            Ok(0) | Err(_) => break,
            Ok(n) => request.extend_from_slice(&buf[..n]),
        }
    }
}
