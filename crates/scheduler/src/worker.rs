//! Render worker pool
//!
//! Worker threads pull jobs from the [`JobScheduler`] and hand them to an
//! executor callback. Jobs whose token was cancelled before they started are
//! passed to the executor anyway so it can settle the request; the executor
//! decides whether to do any work.

use std::io;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::{CancellationToken, Job, JobScheduler};

/// Callback invoked for each job a worker takes
///
/// It should check `token.is_cancelled()` before and after expensive work.
pub type JobExecutor = Arc<dyn Fn(&Job, &CancellationToken) + Send + Sync>;

/// Configuration for the worker pool.
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    /// Number of worker threads to spawn.
    pub num_workers: usize,

    /// Longest a worker waits for a job before rechecking for shutdown.
    /// Default: 100ms.
    pub poll_interval: Duration,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self::new(2)
    }
}

impl WorkerPoolConfig {
    pub fn new(num_workers: usize) -> Self {
        Self {
            num_workers: num_workers.max(1),
            poll_interval: Duration::from_millis(100),
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

/// Pool of worker threads executing scheduler jobs
///
/// Dropping the pool shuts it down and joins every worker.
///
/// # Example
///
/// ```
/// use pdf_viewer_scheduler::{
///     CancellationToken, Job, JobScheduler, RenderPriority, RenderRequest, WorkerPool,
///     WorkerPoolConfig,
/// };
/// use std::sync::Arc;
///
/// let scheduler = Arc::new(JobScheduler::new());
/// let executor = Arc::new(|job: &Job, token: &CancellationToken| {
///     if token.is_cancelled() {
///         return;
///     }
///     println!("rendering page {}", job.request.page);
/// });
///
/// let pool = WorkerPool::new(scheduler.clone(), executor, WorkerPoolConfig::new(2))?;
/// scheduler.submit(RenderPriority::Foreground, RenderRequest::new(0, 600, 800));
/// pool.shutdown();
/// # Ok::<(), std::io::Error>(())
/// ```
pub struct WorkerPool {
    workers: Vec<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
    scheduler: Arc<JobScheduler>,
}

impl WorkerPool {
    /// Start the worker threads
    ///
    /// # Arguments
    ///
    /// * `scheduler` - Job scheduler to pull jobs from
    /// * `executor` - Callback executing each job
    /// * `config` - Worker pool configuration
    pub fn new(
        scheduler: Arc<JobScheduler>,
        executor: JobExecutor,
        config: WorkerPoolConfig,
    ) -> io::Result<Self> {
        let shutdown = Arc::new(AtomicBool::new(false));
        let mut pool = Self {
            workers: Vec::with_capacity(config.num_workers),
            shutdown: shutdown.clone(),
            scheduler: scheduler.clone(),
        };

        for id in 0..config.num_workers {
            let scheduler = scheduler.clone();
            let executor = executor.clone();
            let shutdown = shutdown.clone();
            let poll_interval = config.poll_interval;
            let handle = thread::Builder::new()
                .name(format!("pdf-viewer-render-{id}"))
                .spawn(move || run(scheduler, executor, shutdown, poll_interval))?;
            pool.workers.push(handle);
        }

        Ok(pool)
    }

    /// Stop the workers and wait for them to finish their current jobs
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        self.scheduler.shutdown();

        let current = thread::current().id();
        for handle in self.workers.drain(..) {
            // A worker dropping the last reference to the pool cannot join itself
            if handle.thread().id() == current {
                continue;
            }
            if handle.join().is_err() {
                tracing::error!("render worker panicked");
            }
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        if !self.workers.is_empty() {
            self.stop();
        }
    }
}

fn run(
    scheduler: Arc<JobScheduler>,
    executor: JobExecutor,
    shutdown: Arc<AtomicBool>,
    poll_interval: Duration,
) {
    while !shutdown.load(Ordering::Acquire) {
        let Some(job) = scheduler.next_job_timeout(poll_interval) else {
            continue;
        };

        let token = scheduler.get_cancellation_token(job.id).unwrap_or_default();
        executor(&job, &token);
        scheduler.complete_job(job.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{RenderPriority, RenderRequest};
    use parking_lot::Mutex;
    use std::sync::atomic::AtomicUsize;
    use std::time::Instant;

    fn wait_for(mut done: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if done() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn test_worker_pool_config() {
        let config = WorkerPoolConfig::new(0).with_poll_interval(Duration::from_millis(50));
        assert_eq!(config.num_workers, 1);
        assert_eq!(config.poll_interval, Duration::from_millis(50));
    }

    #[test]
    fn test_worker_pool_executes_jobs() {
        let scheduler = Arc::new(JobScheduler::new());
        let executed = Arc::new(AtomicUsize::new(0));
        let counter = executed.clone();
        let executor: JobExecutor = Arc::new(move |_job, _token| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let pool = WorkerPool::new(scheduler.clone(), executor, WorkerPoolConfig::new(2)).unwrap();
        for page in 0..5 {
            scheduler.submit(RenderPriority::Foreground, RenderRequest::new(page, 10, 10));
        }

        assert!(wait_for(|| executed.load(Ordering::SeqCst) == 5));
        pool.shutdown();
        assert_eq!(scheduler.stats().jobs_completed, 5);
    }

    #[test]
    fn test_single_worker_respects_priority() {
        let scheduler = Arc::new(JobScheduler::new());
        scheduler.submit(RenderPriority::Prefetch, RenderRequest::new(1, 10, 10));
        scheduler.submit(RenderPriority::Foreground, RenderRequest::new(2, 10, 10));

        let order = Arc::new(Mutex::new(Vec::new()));
        let seen = order.clone();
        let executor: JobExecutor = Arc::new(move |job, _token| seen.lock().push(job.request.page));

        let pool = WorkerPool::new(scheduler, executor, WorkerPoolConfig::new(1)).unwrap();
        assert!(wait_for(|| order.lock().len() == 2));
        drop(pool);

        assert_eq!(*order.lock(), vec![2, 1]);
    }

    #[test]
    fn test_executor_sees_cancelled_token() {
        let scheduler = Arc::new(JobScheduler::new());
        let (job_id, _) = scheduler.submit(RenderPriority::Foreground, RenderRequest::new(0, 10, 10));
        // Cancel while running is simulated by cancelling the token only
        scheduler.get_cancellation_token(job_id).unwrap().cancel();

        let cancelled = Arc::new(AtomicUsize::new(0));
        let counter = cancelled.clone();
        let executor: JobExecutor = Arc::new(move |_job, token| {
            if token.is_cancelled() {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        let pool = WorkerPool::new(scheduler, executor, WorkerPoolConfig::new(1)).unwrap();
        assert!(wait_for(|| cancelled.load(Ordering::SeqCst) == 1));
        pool.shutdown();
    }

    #[test]
    fn test_shutdown_is_prompt() {
        let scheduler = Arc::new(JobScheduler::new());
        let executor: JobExecutor = Arc::new(|_job, _token| {});
        let pool = WorkerPool::new(
            scheduler,
            executor,
            WorkerPoolConfig::new(3).with_poll_interval(Duration::from_secs(30)),
        )
        .unwrap();

        let started = Instant::now();
        pool.shutdown();
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
