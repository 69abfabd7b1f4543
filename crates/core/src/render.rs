//! Page render scheduling
//!
//! [`RenderScheduler`] answers render requests from the tiered cache when it
//! can and otherwise queues a job on the worker pool. Each page has at most
//! one live job; any new request replaces the previous job for its page and
//! only the latest job may write to the cache or deliver a result.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::time::Duration;

use pdf_viewer_cache::TieredBitmapCache;
use pdf_viewer_render::{Bitmap, BitmapPool, BitmapPoolStats, PixelFormat};
use pdf_viewer_scheduler::{
    CancellationToken, Job, JobExecutor, JobId, JobScheduler, RenderPriority, RenderRequest,
    SchedulerStats, WorkerPool, WorkerPoolConfig,
};

use crate::error::{ViewerError, ViewerResult};
use crate::session::DocumentSession;

/// Result delivered for a render request
#[derive(Debug)]
pub enum RenderOutcome {
    /// The rendered (or cached) page
    Ready(Bitmap),
    /// The job ended without a bitmap; ask again later
    NotReady,
    Failed(ViewerError),
}

impl RenderOutcome {
    pub fn bitmap(&self) -> Option<&Bitmap> {
        match self {
            RenderOutcome::Ready(bitmap) => Some(bitmap),
            _ => None,
        }
    }

    pub fn into_result(self) -> ViewerResult<Option<Bitmap>> {
        match self {
            RenderOutcome::Ready(bitmap) => Ok(Some(bitmap)),
            RenderOutcome::NotReady => Ok(None),
            RenderOutcome::Failed(e) => Err(e),
        }
    }
}

/// Receiving end of one render request
///
/// At most one outcome is ever delivered. A request that was superseded or
/// cancelled delivers nothing: [`wait`](Self::wait) returns `None`.
#[derive(Debug)]
pub struct RenderHandle {
    page: usize,
    receiver: mpsc::Receiver<RenderOutcome>,
}

impl RenderHandle {
    fn pending(page: usize) -> (mpsc::Sender<RenderOutcome>, Self) {
        let (sender, receiver) = mpsc::channel();
        (sender, Self { page, receiver })
    }

    fn settled(page: usize, outcome: RenderOutcome) -> Self {
        let (sender, handle) = Self::pending(page);
        // The receiver is alive, so this cannot fail
        let _ = sender.send(outcome);
        handle
    }

    pub fn page(&self) -> usize {
        self.page
    }

    /// Block until the outcome arrives or the request is dropped
    pub fn wait(self) -> Option<RenderOutcome> {
        self.receiver.recv().ok()
    }

    /// Wait at most `timeout`
    ///
    /// `Err(Disconnected)` means the request was superseded or cancelled.
    pub fn wait_timeout(&self, timeout: Duration) -> Result<RenderOutcome, RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }

}

/// Render counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RenderStats {
    pub requests: u64,
    pub cache_hits: u64,
    pub rendered: u64,
    pub failed: u64,
    /// Jobs replaced by a newer request for the same page
    pub superseded: u64,
    /// Finished renders thrown away because their job was no longer current
    pub discarded: u64,
}

struct PageJob {
    job_id: JobId,
    priority: RenderPriority,
    sender: mpsc::Sender<RenderOutcome>,
}

struct Shared {
    session: Arc<DocumentSession>,
    cache: Arc<TieredBitmapCache>,
    buffers: BitmapPool,
    jobs: Arc<JobScheduler>,
    table: Mutex<HashMap<usize, PageJob>>,
    prefetch_scale: f32,
    closed: AtomicBool,
    stats: Mutex<RenderStats>,
}

/// Schedules page renders for one document session
pub struct RenderScheduler {
    shared: Arc<Shared>,
    workers: Mutex<Option<WorkerPool>>,
}

impl RenderScheduler {
    /// Start the render workers
    ///
    /// # Arguments
    /// * `session` - Document to render from
    /// * `cache` - Cache consulted before and filled after each render
    /// * `buffers` - Pool the pixel buffers are borrowed from
    /// * `workers` - Number of worker threads
    /// * `prefetch_scale` - Size factor applied to prefetch renders
    pub fn new(
        session: Arc<DocumentSession>,
        cache: Arc<TieredBitmapCache>,
        buffers: BitmapPool,
        workers: usize,
        prefetch_scale: f32,
    ) -> ViewerResult<Self> {
        let jobs = Arc::new(JobScheduler::new());
        let shared = Arc::new(Shared {
            session,
            cache,
            buffers,
            jobs: jobs.clone(),
            table: Mutex::new(HashMap::new()),
            prefetch_scale,
            closed: AtomicBool::new(false),
            stats: Mutex::new(RenderStats::default()),
        });

        let executor: JobExecutor = {
            let shared = shared.clone();
            Arc::new(move |job: &Job, token: &CancellationToken| shared.execute(job, token))
        };
        let pool = WorkerPool::new(jobs, executor, WorkerPoolConfig::new(workers))?;

        Ok(Self {
            shared,
            workers: Mutex::new(Some(pool)),
        })
    }

    /// Request a render of `page` at `width` x `height`
    ///
    /// Out-of-range pages and closed sessions fail immediately. Cached pages
    /// are returned without creating a job. Otherwise any job already
    /// scheduled for the page is cancelled and its handle delivers nothing.
    /// Prefetch renders are scaled down.
    pub fn render(&self, page: usize, width: u32, height: u32, priority: RenderPriority) -> RenderHandle {
        let shared = &self.shared;
        shared.stats.lock().requests += 1;

        if self.is_closed() {
            return RenderHandle::settled(page, RenderOutcome::Failed(ViewerError::RendererClosed));
        }
        if let Err(e) = shared.session.check_range(page) {
            return RenderHandle::settled(page, RenderOutcome::Failed(e));
        }
        if let Some(bitmap) = shared.cache.get(page) {
            shared.stats.lock().cache_hits += 1;
            return RenderHandle::settled(page, RenderOutcome::Ready(bitmap));
        }

        let (width, height) = match priority {
            RenderPriority::Foreground => (width, height),
            RenderPriority::Prefetch => (
                scale_dimension(width, shared.prefetch_scale),
                scale_dimension(height, shared.prefetch_scale),
            ),
        };

        let mut table = shared.table.lock();
        // close() empties the table after setting the flag; checking under
        // the lock keeps new jobs out of a closed scheduler
        if self.is_closed() {
            return RenderHandle::settled(page, RenderOutcome::Failed(ViewerError::RendererClosed));
        }

        if let Some(replaced) = table.remove(&page) {
            shared.jobs.cancel_job(replaced.job_id);
            shared.stats.lock().superseded += 1;
            tracing::debug!(page, job_id = replaced.job_id, replaced = ?replaced.priority, ?priority, "render superseded");
        }

        let (sender, handle) = RenderHandle::pending(page);
        let (job_id, _token) = shared.jobs.submit(priority, RenderRequest::new(page, width, height));
        table.insert(
            page,
            PageJob {
                job_id,
                priority,
                sender,
            },
        );
        handle
    }

    /// Drop the job for one page without delivering a result
    pub fn cancel(&self, page: usize) -> bool {
        let removed = self.shared.table.lock().remove(&page);
        match removed {
            Some(job) => {
                self.shared.jobs.cancel_job(job.job_id);
                true
            }
            None => false,
        }
    }

    /// Drop every outstanding job
    pub fn cancel_all(&self) -> usize {
        let removed = std::mem::take(&mut *self.shared.table.lock());
        self.shared.jobs.cancel_all();
        removed.len()
    }

    /// Whether `page` has an outstanding job
    pub fn is_scheduled(&self, page: usize) -> bool {
        self.shared.table.lock().contains_key(&page)
    }

    /// Pages with an outstanding job, in ascending order
    pub fn pending_pages(&self) -> Vec<usize> {
        let mut pages: Vec<usize> = self.shared.table.lock().keys().copied().collect();
        pages.sort_unstable();
        pages
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    /// Cancel all jobs, stop the workers, then close the document
    ///
    /// Blocks until a render already inside the backend returns; its result
    /// is discarded. Later calls return `Ok(())`.
    pub fn close(&self) -> ViewerResult<()> {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let outstanding = std::mem::take(&mut *self.shared.table.lock());
        let queued = self.shared.jobs.shutdown();
        tracing::debug!(outstanding = outstanding.len(), queued = queued.len(), "render scheduler closing");
        drop(outstanding);

        if let Some(pool) = self.workers.lock().take() {
            pool.shutdown();
        }
        self.shared.session.close()
    }

    pub fn stats(&self) -> RenderStats {
        *self.shared.stats.lock()
    }

    pub fn scheduler_stats(&self) -> SchedulerStats {
        self.shared.jobs.stats()
    }

    pub fn buffer_stats(&self) -> BitmapPoolStats {
        self.shared.buffers.stats()
    }
}

impl Drop for RenderScheduler {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::warn!(error = %e, "error closing render scheduler on drop");
        }
    }
}

impl Shared {
    fn is_current(&self, page: usize, job_id: JobId) -> bool {
        self.table
            .lock()
            .get(&page)
            .is_some_and(|entry| entry.job_id == job_id)
    }

    fn execute(&self, job: &Job, token: &CancellationToken) {
        let page = job.request.page;
        if token.is_cancelled() || !self.is_current(page, job.id) {
            tracing::trace!(page, job_id = job.id, "skipping stale render job");
            return;
        }

        let RenderRequest { width, height, .. } = job.request;
        let result = self.session.with_handle(|handle| {
            if token.is_cancelled() {
                return Ok(None);
            }
            let mut buffer = self.buffers.checkout(width, height, PixelFormat::Rgba8888)?;
            match handle.render_page(page, &mut buffer, None) {
                Ok(()) => Ok(Some(buffer.into_bitmap())),
                Err(e) => {
                    self.buffers.checkin(buffer);
                    Err(e)
                }
            }
        });

        self.finish(job, token, result);
    }

    fn finish(&self, job: &Job, token: &CancellationToken, result: ViewerResult<Option<Bitmap>>) {
        let page = job.request.page;
        let mut table = self.table.lock();

        let current = !token.is_cancelled() && table.get(&page).is_some_and(|entry| entry.job_id == job.id);
        let entry = if current { table.remove(&page) } else { None };
        let Some(entry) = entry else {
            drop(table);
            self.stats.lock().discarded += 1;
            if let Ok(Some(bitmap)) = result {
                self.buffers.recycle(bitmap);
            }
            tracing::trace!(page, job_id = job.id, "discarding superseded render");
            return;
        };

        match result {
            Ok(Some(bitmap)) => {
                // Still under the table lock, so no newer job for this page
                // can have written to the cache yet
                self.cache.put(page, bitmap.clone());
                drop(table);
                self.stats.lock().rendered += 1;
                let _ = entry.sender.send(RenderOutcome::Ready(bitmap));
            }
            Ok(None) => {
                drop(table);
                let _ = entry.sender.send(RenderOutcome::NotReady);
            }
            Err(e) => {
                drop(table);
                self.stats.lock().failed += 1;
                tracing::warn!(page, error = %e, "page render failed");
                let _ = entry.sender.send(RenderOutcome::Failed(e));
            }
        }
    }
}

fn scale_dimension(value: u32, scale: f32) -> u32 {
    ((value as f32 * scale).round() as u32).max(1)
}
