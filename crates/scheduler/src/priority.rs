//! Render job priority queue
//!
//! Foreground jobs (pages on screen) always run before prefetch jobs. Within
//! one priority, jobs run in submission order.

use parking_lot::{Condvar, Mutex};
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::time::{Duration, Instant};

/// Job priority levels
///
/// Higher values run first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RenderPriority {
    /// Speculative render of a page likely to be viewed next
    Prefetch = 0,

    /// Render of a page currently on screen
    Foreground = 1,
}

/// Unique identifier for a job
pub type JobId = u64;

/// What a render job should produce
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RenderRequest {
    /// Zero-based page index
    pub page: usize,
    /// Target bitmap width in pixels
    pub width: u32,
    /// Target bitmap height in pixels
    pub height: u32,
}

impl RenderRequest {
    pub fn new(page: usize, width: u32, height: u32) -> Self {
        Self {
            page,
            width,
            height,
        }
    }
}

/// A queued job
#[derive(Debug, Clone)]
pub struct Job {
    pub id: JobId,
    pub priority: RenderPriority,
    pub request: RenderRequest,

    /// Submission sequence number for FIFO ordering within one priority
    insertion_order: u64,
}

impl Job {
    pub fn new(id: JobId, priority: RenderPriority, request: RenderRequest, insertion_order: u64) -> Self {
        Self {
            id,
            priority,
            request,
            insertion_order,
        }
    }
}

impl PartialEq for Job {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Job {}

impl PartialOrd for Job {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Job {
    fn cmp(&self, other: &Self) -> Ordering {
        match self.priority.cmp(&other.priority) {
            // BinaryHeap is a max heap, so earlier insertions must compare greater
            Ordering::Equal => other.insertion_order.cmp(&self.insertion_order),
            other => other,
        }
    }
}

struct QueueState {
    heap: BinaryHeap<Job>,
    next_job_id: JobId,
    insertion_counter: u64,
    closed: bool,
}

/// Thread-safe priority queue of render jobs
///
/// Consumers can block on [`PriorityQueue::pop_timeout`] instead of polling.
pub struct PriorityQueue {
    state: Mutex<QueueState>,
    available: Condvar,
}

impl PriorityQueue {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                heap: BinaryHeap::new(),
                next_job_id: 1,
                insertion_counter: 0,
                closed: false,
            }),
            available: Condvar::new(),
        }
    }

    /// Add a job, running `on_assign` with the new id before any consumer
    /// can see the job
    pub fn push_with<T>(
        &self,
        priority: RenderPriority,
        request: RenderRequest,
        on_assign: impl FnOnce(JobId) -> T,
    ) -> (JobId, T) {
        let mut state = self.state.lock();
        let job_id = state.next_job_id;
        state.next_job_id += 1;

        let insertion_order = state.insertion_counter;
        state.insertion_counter += 1;

        let assigned = on_assign(job_id);
        state.heap.push(Job::new(job_id, priority, request, insertion_order));
        drop(state);
        self.available.notify_one();

        (job_id, assigned)
    }

    /// Remove the highest priority job without waiting
    pub fn pop(&self) -> Option<Job> {
        self.state.lock().heap.pop()
    }

    /// Remove the highest priority job, waiting up to `timeout` for one
    ///
    /// Returns `None` on timeout or once the queue has been closed.
    pub fn pop_timeout(&self, timeout: Duration) -> Option<Job> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        loop {
            if state.closed {
                return None;
            }
            if let Some(job) = state.heap.pop() {
                return Some(job);
            }
            if self.available.wait_until(&mut state, deadline).timed_out() {
                return if state.closed { None } else { state.heap.pop() };
            }
        }
    }

    pub fn len(&self) -> usize {
        self.state.lock().heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().heap.is_empty()
    }

    /// Drop every queued job, returning them
    pub fn drain(&self) -> Vec<Job> {
        let mut state = self.state.lock();
        std::mem::take(&mut state.heap).into_vec()
    }

    /// Remove all jobs matching a predicate, returning them
    pub fn remove_if<F>(&self, predicate: F) -> Vec<Job>
    where
        F: Fn(&Job) -> bool,
    {
        let mut state = self.state.lock();
        let (removed, remaining): (Vec<Job>, Vec<Job>) =
            std::mem::take(&mut state.heap).into_iter().partition(|job| predicate(job));
        state.heap = remaining.into_iter().collect();
        removed
    }

    /// Wake every waiting consumer and make further waits return `None`
    pub fn close(&self) {
        self.state.lock().closed = true;
        self.available.notify_all();
    }
}

impl Default for PriorityQueue {
    fn default() -> Self {
        Self::new()
    }
}
