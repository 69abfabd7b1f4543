//! Job scheduler implementation
//!
//! Ties the priority queue to the cancellation registry: every submitted job
//! gets a token that stays registered until the job completes or is removed
//! from the queue.

use parking_lot::Mutex;
use std::time::Duration;

use crate::cancel::{CancellationRegistry, CancellationToken};
use crate::priority::{Job, JobId, PriorityQueue, RenderPriority, RenderRequest};

/// Job scheduler statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    /// Total jobs submitted
    pub jobs_submitted: u64,

    /// Total jobs that ran to completion (cancelled or not)
    pub jobs_completed: u64,

    /// Total jobs removed from the queue before running
    pub jobs_cancelled: u64,

    /// Current queue size
    pub queue_size: usize,
}

impl SchedulerStats {
    /// Jobs submitted but neither completed nor cancelled
    pub fn pending_jobs(&self) -> u64 {
        self.jobs_submitted
            .saturating_sub(self.jobs_completed)
            .saturating_sub(self.jobs_cancelled)
    }
}

/// Priority scheduler with cooperative cancellation
///
/// # Example
///
/// ```
/// use pdf_viewer_scheduler::{JobScheduler, RenderPriority, RenderRequest};
///
/// let scheduler = JobScheduler::new();
/// let (job_id, token) = scheduler.submit(RenderPriority::Foreground, RenderRequest::new(0, 600, 800));
///
/// if let Some(job) = scheduler.next_job() {
///     assert_eq!(job.id, job_id);
///     if !token.is_cancelled() {
///         // ... render job.request ...
///     }
///     scheduler.complete_job(job.id);
/// }
/// ```
pub struct JobScheduler {
    queue: PriorityQueue,
    stats: Mutex<SchedulerStats>,
    cancellation: CancellationRegistry,
}

impl JobScheduler {
    pub fn new() -> Self {
        Self {
            queue: PriorityQueue::new(),
            stats: Mutex::new(SchedulerStats::default()),
            cancellation: CancellationRegistry::new(),
        }
    }

    /// Submit a job
    ///
    /// Returns the job id and its cancellation token.
    pub fn submit(&self, priority: RenderPriority, request: RenderRequest) -> (JobId, CancellationToken) {
        // The token must exist before a worker can pop the job
        let (job_id, token) = self
            .queue
            .push_with(priority, request, |id| self.cancellation.register(id));

        self.stats.lock().jobs_submitted += 1;
        tracing::trace!(job_id, page = request.page, ?priority, "job submitted");
        (job_id, token)
    }

    /// Take the next job without waiting
    ///
    /// The job's token stays registered until [`JobScheduler::complete_job`].
    pub fn next_job(&self) -> Option<Job> {
        self.queue.pop()
    }

    /// Take the next job, waiting up to `timeout`
    pub fn next_job_timeout(&self, timeout: Duration) -> Option<Job> {
        self.queue.pop_timeout(timeout)
    }

    /// Mark a job as finished and release its token
    pub fn complete_job(&self, job_id: JobId) {
        self.stats.lock().jobs_completed += 1;
        self.cancellation.unregister(job_id);
    }

    /// Cancel one job
    ///
    /// A queued job is removed outright. A running job only has its token
    /// cancelled; the runner is expected to notice. Returns `true` if the
    /// job was found in either state.
    pub fn cancel_job(&self, job_id: JobId) -> bool {
        let token_found = self.cancellation.cancel(job_id);
        let removed = self.queue.remove_if(|job| job.id == job_id);

        if removed.is_empty() {
            token_found
        } else {
            self.stats.lock().jobs_cancelled += removed.len() as u64;
            self.cancellation.unregister(job_id);
            true
        }
    }

    /// Remove every queued job and cancel every running one
    pub fn cancel_all(&self) -> Vec<Job> {
        let removed = self.queue.drain();
        self.cancellation.cancel_all();
        for job in &removed {
            self.cancellation.unregister(job.id);
        }
        self.stats.lock().jobs_cancelled += removed.len() as u64;
        removed
    }

    /// Cancel everything and release workers blocked waiting for jobs
    pub fn shutdown(&self) -> Vec<Job> {
        let removed = self.cancel_all();
        self.queue.close();
        removed
    }

    pub fn pending_jobs(&self) -> usize {
        self.queue.len()
    }

    pub fn has_pending_jobs(&self) -> bool {
        !self.queue.is_empty()
    }

    pub fn stats(&self) -> SchedulerStats {
        let mut stats = *self.stats.lock();
        stats.queue_size = self.queue.len();
        stats
    }

    /// Token of a job that has not yet completed
    pub fn get_cancellation_token(&self, job_id: JobId) -> Option<CancellationToken> {
        self.cancellation.get(job_id)
    }
}

impl Default for JobScheduler {
    fn default() -> Self {
        Self::new()
    }
}
