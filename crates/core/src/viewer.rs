//! Viewer facade
//!
//! [`PdfViewer`] is what a UI adapter talks to: it owns one document session
//! with its cache, render scheduler and scroll-driven prefetch state.

use parking_lot::Mutex;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use pdf_viewer_cache::{
    prefetch_radius, CacheIdentifier, DiskWriter, MemoryBudget, MemoryTier, TieredBitmapCache, TieredStats,
};
use pdf_viewer_render::{BitmapPool, ByteSource, PageSize, PoolStats, RasterBackend};
use pdf_viewer_scheduler::{PageLabel, PrefetchController, RenderPriority, VisiblePages};

use crate::config::ViewerConfig;
use crate::error::ViewerResult;
use crate::render::{RenderHandle, RenderScheduler, RenderStats};
use crate::session::DocumentSession;
use crate::source::{validate_document, DocumentSource};

/// One open document, ready to render
///
/// # Example
///
/// ```no_run
/// # #[cfg(feature = "pdfium")]
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// use pdf_viewer_core::{PdfViewer, ViewerConfig};
/// use pdf_viewer_render::PdfiumBackend;
/// use std::path::Path;
///
/// let backend = PdfiumBackend::new()?;
/// let viewer = PdfViewer::open_file(&backend, Path::new("manual.pdf"), ViewerConfig::default())?;
///
/// if let Some(outcome) = viewer.request_page(0, 1200, 1600, true).wait() {
///     let bitmap = outcome.into_result()?;
///     println!("page 1 ready: {:?}", bitmap.map(|b| (b.width(), b.height())));
/// }
/// viewer.close()?;
/// # Ok(())
/// # }
/// # #[cfg(not(feature = "pdfium"))]
/// # fn main() {}
/// ```
pub struct PdfViewer {
    config: ViewerConfig,
    session: Arc<DocumentSession>,
    cache: Arc<TieredBitmapCache>,
    memory: Arc<MemoryTier>,
    budget: MemoryBudget,
    renderer: RenderScheduler,
    prefetch: Mutex<PrefetchController>,
    /// Size of the last foreground request, reused for prefetches
    last_target: Mutex<Option<(u32, u32)>>,
}

impl PdfViewer {
    /// Open a document
    ///
    /// A cache root that cannot be prepared downgrades the session to a
    /// memory-only cache instead of failing the open.
    ///
    /// # Arguments
    /// * `backend` - Rasterizer for the document
    /// * `source` - Document bytes
    /// * `identifier` - Names the document's disk cache folder
    /// * `config` - Session configuration
    pub fn open(
        backend: &dyn RasterBackend,
        source: &ByteSource,
        identifier: CacheIdentifier,
        config: ViewerConfig,
    ) -> ViewerResult<Self> {
        config.validate()?;

        let session = Arc::new(DocumentSession::open(backend, source, config.max_open_pages)?);
        let budget = config.cache.budget();
        let memory = Arc::new(MemoryTier::new(budget.memory_tier_bytes()));
        let cache = Arc::new(open_cache(&config, identifier, memory.clone())?);
        let buffers = BitmapPool::new(config.cache.bitmap_pool_max_slots, budget.bitmap_pool_bytes());
        let renderer = RenderScheduler::new(
            session.clone(),
            cache.clone(),
            buffers,
            config.render_workers,
            config.prefetch_scale,
        )?;
        let prefetch =
            PrefetchController::new(session.page_count()).with_label_hide_delay(config.label_hide_delay);

        tracing::debug!(
            identifier = %cache.identifier(),
            page_count = session.page_count(),
            strategy = %config.cache_strategy,
            "viewer opened"
        );

        Ok(Self {
            config,
            session,
            cache,
            memory,
            budget,
            renderer,
            prefetch: Mutex::new(prefetch),
            last_target: Mutex::new(None),
        })
    }

    /// Validate and open a local file
    pub fn open_file(backend: &dyn RasterBackend, path: &Path, config: ViewerConfig) -> ViewerResult<Self> {
        Self::open_document(backend, &DocumentSource::local(path), path, config)
    }

    /// Open the local copy of `source`
    ///
    /// The cache identity follows `source`, so a remote document keeps its
    /// cache folder across downloads.
    pub fn open_document(
        backend: &dyn RasterBackend,
        source: &DocumentSource,
        local_path: &Path,
        config: ViewerConfig,
    ) -> ViewerResult<Self> {
        validate_document(local_path)?;
        Self::open(
            backend,
            &ByteSource::File(local_path.to_path_buf()),
            source.cache_identifier(),
            config,
        )
    }

    pub fn page_count(&self) -> usize {
        self.session.page_count()
    }

    pub fn identifier(&self) -> &CacheIdentifier {
        self.cache.identifier()
    }

    pub fn config(&self) -> &ViewerConfig {
        &self.config
    }

    /// Request a page bitmap
    ///
    /// Foreground requests are scaled by the configured render quality.
    pub fn request_page(&self, index: usize, width: u32, height: u32, is_foreground: bool) -> RenderHandle {
        if is_foreground {
            let (width, height) = self.config.quality.scale(width, height);
            *self.last_target.lock() = Some((width, height));
            self.renderer.render(index, width, height, RenderPriority::Foreground)
        } else {
            self.renderer.render(index, width, height, RenderPriority::Prefetch)
        }
    }

    /// Whether a page is cached on disk, without decoding it
    pub fn page_exists_in_cache(&self, index: usize) -> bool {
        index < self.page_count() && self.cache.exists(index)
    }

    /// Feed one scroll frame to the prefetch controller
    ///
    /// Returns the page label to show when it changed.
    pub fn on_scroll(
        &self,
        first_visible: Option<usize>,
        first_complete: Option<usize>,
        last_visible: Option<usize>,
        last_complete: Option<usize>,
        delta_y: f32,
    ) -> Option<PageLabel> {
        let visible = VisiblePages::new(first_visible, first_complete, last_visible, last_complete);
        self.prefetch.lock().on_scroll(visible, delta_y)
    }

    /// Scrolling started again after an idle period
    pub fn on_scroll_resumed(&self) {
        self.prefetch.lock().on_scroll_resumed();
    }

    /// Scrolling stopped; prefetch the middle of the visible range
    pub fn on_scroll_idle(&self, first_visible: usize, last_visible: usize) -> Option<RenderHandle> {
        let page = self.prefetch.lock().on_scroll_idle(first_visible, last_visible)?;
        let (width, height) = self.prefetch_target(page)?;
        Some(self.renderer.render(page, width, height, RenderPriority::Prefetch))
    }

    /// Hide the page label once its timer has run out
    ///
    /// Returns `true` when the label should be hidden now.
    pub fn poll_page_label(&self, now: Instant) -> bool {
        self.prefetch.lock().poll_label(now)
    }

    pub fn page_label_visible(&self) -> bool {
        self.prefetch.lock().label_visible()
    }

    /// Page size; later lookups skip the backend
    pub fn page_dimensions(&self, index: usize) -> ViewerResult<PageSize> {
        self.session.page_dimensions(index)
    }

    /// Pages on each side of the current page worth prefetching right now
    pub fn prefetch_radius(&self) -> usize {
        let available = self.budget.available(self.memory.bytes_used());
        prefetch_radius(available, self.page_count())
    }

    /// Queue prefetches for uncached pages around `page`
    ///
    /// Pages that already have a job are left alone, since a prefetch would
    /// replace it.
    pub fn prefetch_around(&self, page: usize) -> Vec<RenderHandle> {
        let page_count = self.page_count();
        if page >= page_count {
            return Vec::new();
        }

        let radius = self.prefetch_radius();
        let first = page.saturating_sub(radius);
        let last = page.saturating_add(radius).min(page_count - 1);

        (first..=last)
            .filter(|&index| !self.page_exists_in_cache(index) && !self.renderer.is_scheduled(index))
            .filter_map(|index| {
                let (width, height) = self.prefetch_target(index)?;
                Some(self.renderer.render(index, width, height, RenderPriority::Prefetch))
            })
            .collect()
    }

    fn prefetch_target(&self, page: usize) -> Option<(u32, u32)> {
        if let Some(target) = *self.last_target.lock() {
            return Some(target);
        }
        match self.session.page_dimensions(page) {
            Ok(size) => Some((size.width, size.height)),
            Err(e) => {
                tracing::debug!(page, error = %e, "no prefetch size available");
                None
            }
        }
    }

    pub fn cache_stats(&self) -> TieredStats {
        self.cache.stats()
    }

    pub fn render_stats(&self) -> RenderStats {
        self.renderer.stats()
    }

    /// Number of open page handles
    pub fn open_page_count(&self) -> usize {
        self.session.open_page_count()
    }

    pub fn handle_stats(&self) -> PoolStats {
        self.session.handle_stats()
    }

    /// Wait for queued disk-cache writes
    pub fn flush_cache(&self) {
        self.cache.flush();
    }

    pub fn is_closed(&self) -> bool {
        self.renderer.is_closed()
    }

    /// Cancel outstanding renders, close page handles, then the document
    ///
    /// Safe to call more than once.
    pub fn close(&self) -> ViewerResult<()> {
        self.renderer.close()
    }
}

fn open_cache(
    config: &ViewerConfig,
    identifier: CacheIdentifier,
    memory: Arc<MemoryTier>,
) -> ViewerResult<TieredBitmapCache> {
    if !config.cache_strategy.uses_disk() {
        return Ok(TieredBitmapCache::memory_only(identifier, memory));
    }

    let writer = DiskWriter::for_root(&config.cache.cache_root)?;
    let opened = TieredBitmapCache::open(
        identifier.clone(),
        &config.cache.cache_root,
        config.cache_strategy,
        config.cache.max_cached_documents,
        config.disk_encoding,
        memory.clone(),
        writer,
    );
    Ok(opened.unwrap_or_else(|e| {
        tracing::warn!(
            %identifier,
            root = %config.cache.cache_root.display(),
            error = %e,
            "disk cache unavailable, using memory only"
        );
        TieredBitmapCache::memory_only(identifier, memory)
    }))
}
