//! Scriptable in-memory raster backend for tests
//!
//! Pages render as a solid color derived from their index. Renders can be
//! held at a gate to keep them in flight, and every open/close/render is
//! counted so tests can assert on resource usage.

use parking_lot::{Condvar, Mutex};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::backend::{ByteSource, ClipRect, PageSize, RasterBackend, RasterDocument, RasterPage};
use crate::bitmap::PixelBuffer;
use crate::{RenderError, RenderResult};

#[derive(Default)]
struct Counters {
    documents_opened: usize,
    documents_closed: usize,
    pages_opened: usize,
    pages_closed: usize,
    open_pages: usize,
    peak_open_pages: usize,
    renders_started: usize,
    renders_finished: usize,
    in_flight: usize,
    peak_in_flight: usize,
    gate_closed: bool,
}

struct Shared {
    counters: Mutex<Counters>,
    changed: Condvar,
    page_count: usize,
    page_size: PageSize,
    failing_pages: Mutex<HashSet<usize>>,
    failing_renders: Mutex<HashSet<usize>>,
    fail_page_close: bool,
}

/// Test double implementing [`RasterBackend`]
#[derive(Clone)]
pub struct FakeBackend {
    shared: Arc<Shared>,
}

impl FakeBackend {
    /// Backend whose documents have `page_count` pages of 600x800
    pub fn new(page_count: usize) -> Self {
        Self::with_page_size(page_count, PageSize::new(600, 800))
    }

    pub fn with_page_size(page_count: usize, page_size: PageSize) -> Self {
        Self {
            shared: Arc::new(Shared {
                counters: Mutex::new(Counters::default()),
                changed: Condvar::new(),
                page_count,
                page_size,
                failing_pages: Mutex::new(HashSet::new()),
                failing_renders: Mutex::new(HashSet::new()),
                fail_page_close: false,
            }),
        }
    }

    /// Make every page close report an error
    pub fn failing_page_close(self) -> Self {
        let shared = Shared {
            counters: Mutex::new(Counters::default()),
            changed: Condvar::new(),
            page_count: self.shared.page_count,
            page_size: self.shared.page_size,
            failing_pages: Mutex::new(HashSet::new()),
            failing_renders: Mutex::new(HashSet::new()),
            fail_page_close: true,
        };
        Self {
            shared: Arc::new(shared),
        }
    }

    /// Make opening `index` fail
    pub fn fail_page_open(&self, index: usize) {
        self.shared.failing_pages.lock().insert(index);
    }

    /// Make rendering `index` fail
    pub fn fail_render(&self, index: usize) {
        self.shared.failing_renders.lock().insert(index);
    }

    /// Color every pixel of page `index` is rendered with
    pub fn page_color(index: usize) -> [u8; 4] {
        [(index % 251) as u8, (index * 7 % 251) as u8, (index * 13 % 251) as u8, 255]
    }

    /// Block renders at the gate until [`FakeBackend::open_gate`]
    pub fn close_gate(&self) {
        self.shared.counters.lock().gate_closed = true;
    }

    pub fn open_gate(&self) {
        self.shared.counters.lock().gate_closed = false;
        self.shared.changed.notify_all();
    }

    /// Wait until at least `count` renders have started
    pub fn wait_for_renders_started(&self, count: usize, timeout: Duration) -> bool {
        self.wait_until(timeout, |c| c.renders_started >= count)
    }

    /// Wait until at least `count` renders have finished
    pub fn wait_for_renders_finished(&self, count: usize, timeout: Duration) -> bool {
        self.wait_until(timeout, |c| c.renders_finished >= count)
    }

    fn wait_until(&self, timeout: Duration, done: impl Fn(&Counters) -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        let mut counters = self.shared.counters.lock();
        while !done(&counters) {
            if self.shared.changed.wait_until(&mut counters, deadline).timed_out() {
                return done(&counters);
            }
        }
        true
    }

    pub fn documents_opened(&self) -> usize {
        self.shared.counters.lock().documents_opened
    }

    pub fn documents_closed(&self) -> usize {
        self.shared.counters.lock().documents_closed
    }

    pub fn pages_opened(&self) -> usize {
        self.shared.counters.lock().pages_opened
    }

    pub fn pages_closed(&self) -> usize {
        self.shared.counters.lock().pages_closed
    }

    /// Pages currently open across all documents
    pub fn open_pages(&self) -> usize {
        self.shared.counters.lock().open_pages
    }

    /// Highest number of pages ever open at once
    pub fn peak_open_pages(&self) -> usize {
        self.shared.counters.lock().peak_open_pages
    }

    pub fn renders_started(&self) -> usize {
        self.shared.counters.lock().renders_started
    }

    /// Highest number of renders ever running at once
    pub fn peak_concurrent_renders(&self) -> usize {
        self.shared.counters.lock().peak_in_flight
    }

    fn bump(&self, update: impl FnOnce(&mut Counters)) {
        update(&mut self.shared.counters.lock());
        self.shared.changed.notify_all();
    }
}

impl RasterBackend for FakeBackend {
    fn open(&self, _source: &ByteSource) -> RenderResult<Box<dyn RasterDocument>> {
        self.bump(|c| c.documents_opened += 1);
        Ok(Box::new(FakeDocument {
            backend: self.clone(),
            closed: false,
        }))
    }
}

struct FakeDocument {
    backend: FakeBackend,
    closed: bool,
}

impl RasterDocument for FakeDocument {
    fn page_count(&self) -> usize {
        self.backend.shared.page_count
    }

    fn open_page(&mut self, index: usize) -> RenderResult<Box<dyn RasterPage>> {
        if self.closed {
            return Err(RenderError::DocumentClosed);
        }
        if self.backend.shared.failing_pages.lock().contains(&index) {
            return Err(RenderError::PageOpenFailed {
                index,
                reason: "scripted failure".into(),
            });
        }
        self.backend.bump(|c| {
            c.pages_opened += 1;
            c.open_pages += 1;
            c.peak_open_pages = c.peak_open_pages.max(c.open_pages);
        });
        Ok(Box::new(FakePage {
            backend: self.backend.clone(),
            index,
            closed: false,
        }))
    }

    fn close(&mut self) -> RenderResult<()> {
        if !self.closed {
            self.closed = true;
            self.backend.bump(|c| c.documents_closed += 1);
        }
        Ok(())
    }
}

struct FakePage {
    backend: FakeBackend,
    index: usize,
    closed: bool,
}

impl RasterPage for FakePage {
    fn index(&self) -> usize {
        self.index
    }

    fn dimensions(&self) -> PageSize {
        self.backend.shared.page_size
    }

    fn render(&mut self, target: &mut PixelBuffer, _clip: Option<ClipRect>) -> RenderResult<()> {
        let shared = &self.backend.shared;
        {
            let mut counters = shared.counters.lock();
            counters.renders_started += 1;
            counters.in_flight += 1;
            counters.peak_in_flight = counters.peak_in_flight.max(counters.in_flight);
            shared.changed.notify_all();
            while counters.gate_closed {
                shared.changed.wait(&mut counters);
            }
        }

        let result = if shared.failing_renders.lock().contains(&self.index) {
            Err(RenderError::RenderFailed {
                index: self.index,
                reason: "scripted failure".into(),
            })
        } else {
            target.erase(FakeBackend::page_color(self.index));
            Ok(())
        };

        self.backend.bump(|c| {
            c.in_flight -= 1;
            c.renders_finished += 1;
        });
        result
    }

    fn close(&mut self) -> RenderResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.backend.bump(|c| {
            c.pages_closed += 1;
            c.open_pages -= 1;
        });
        if self.backend.shared.fail_page_close {
            return Err(RenderError::CloseFailed(format!("page {} already closed", self.index)));
        }
        Ok(())
    }
}

impl Drop for FakePage {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
