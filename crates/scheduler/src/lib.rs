//! PDF Viewer Scheduler Library
//!
//! Priority scheduling of page renders with cooperative cancellation.
//!
//! Foreground jobs (pages on screen) always run before prefetch jobs, and
//! jobs of equal priority run in submission order. Each job carries a
//! [`CancellationToken`] that the worker checks around the render call.
//! [`PrefetchController`] turns scroll signals into prefetch requests.
//!
//! # Example
//!
//! ```
//! use pdf_viewer_scheduler::{JobScheduler, RenderPriority, RenderRequest};
//!
//! let scheduler = JobScheduler::new();
//!
//! // A page scrolled into view
//! let (job_id, token) = scheduler.submit(RenderPriority::Foreground, RenderRequest::new(3, 600, 800));
//!
//! if let Some(job) = scheduler.next_job() {
//!     println!("Rendering page {} for job {}", job.request.page, job.id);
//!     // ... render unless token.is_cancelled() ...
//!     scheduler.complete_job(job.id);
//! }
//!
//! // A newer request for the page replaces this job
//! scheduler.cancel_job(job_id);
//! # let _ = token;
//! ```

mod cancel;
mod prefetch;
mod priority;
mod scheduler;
mod worker;

pub use cancel::{CancellationRegistry, CancellationToken};
pub use prefetch::{
    PageLabel, PrefetchController, ScrollDirection, VisiblePages, DEFAULT_LABEL_HIDE_DELAY,
};
pub use priority::{Job, JobId, PriorityQueue, RenderPriority, RenderRequest};
pub use scheduler::{JobScheduler, SchedulerStats};
pub use worker::{JobExecutor, WorkerPool, WorkerPoolConfig};
