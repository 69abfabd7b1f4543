//! Background disk writer
//!
//! Disk-tier writes never run on the render path. They are queued here and
//! performed by one dedicated thread. Writes for the same page file coalesce
//! while queued: only the most recent bitmap is written.
//!
//! Every session under one cache root shares a single writer (see
//! [`DiskWriter::for_root`]), so a strategy evicting another document's
//! folder also sees and drops that document's queued writes.

use parking_lot::{Condvar, Mutex};
use pdf_viewer_render::Bitmap;
use std::collections::{HashMap, HashSet, VecDeque};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock, Weak};
use std::thread::{self, JoinHandle};

use crate::disk::DiskTier;
use crate::error::CacheError;

/// Disk writer statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriterStats {
    /// Writes enqueued
    pub queued: u64,
    /// Queued writes replaced by a newer bitmap for the same page
    pub coalesced: u64,
    /// Writes dropped because their document folder was evicted
    pub discarded: u64,
    pub written: u64,
    pub failed: u64,
}

struct PendingWrite {
    tier: DiskTier,
    page: usize,
    bitmap: Bitmap,
}

#[derive(Default)]
struct Queue {
    pending: HashMap<PathBuf, PendingWrite>,
    order: VecDeque<PathBuf>,
    in_progress: Option<PathBuf>,
    /// Evicted document folders; writes into them are dropped
    closed: HashSet<PathBuf>,
    shutdown: bool,
    stats: WriterStats,
}

struct Shared {
    queue: Mutex<Queue>,
    work: Condvar,
    idle: Condvar,
}

/// Handle to the background writer thread
///
/// Cloning shares the same thread. The thread drains the queue and exits
/// when the last handle is dropped.
#[derive(Clone)]
pub struct DiskWriter {
    shared: Arc<Shared>,
    thread: Arc<WriterThread>,
}

struct WriterThread {
    shared: Arc<Shared>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

type Registry = Mutex<HashMap<PathBuf, Weak<WriterThread>>>;

fn registry() -> &'static Registry {
    static WRITERS: OnceLock<Registry> = OnceLock::new();
    WRITERS.get_or_init(Registry::default)
}

impl DiskWriter {
    /// The writer shared by every session under `cache_root`
    ///
    /// Starts a new thread when no live writer exists for that root. Roots
    /// are compared by path as given.
    pub fn for_root(cache_root: &Path) -> io::Result<Self> {
        let mut writers = registry().lock();
        writers.retain(|_, thread| thread.strong_count() > 0);
        if let Some(thread) = writers.get(cache_root).and_then(Weak::upgrade) {
            return Ok(Self {
                shared: thread.shared.clone(),
                thread,
            });
        }

        let writer = Self::new()?;
        writers.insert(cache_root.to_path_buf(), Arc::downgrade(&writer.thread));
        Ok(writer)
    }

    /// Start a private writer thread
    pub fn new() -> io::Result<Self> {
        let shared = Arc::new(Shared {
            queue: Mutex::new(Queue::default()),
            work: Condvar::new(),
            idle: Condvar::new(),
        });

        let worker = shared.clone();
        let handle = thread::Builder::new()
            .name("pdf-viewer-disk-writer".to_string())
            .spawn(move || Self::run(worker))?;

        Ok(Self {
            thread: Arc::new(WriterThread {
                shared: shared.clone(),
                handle: Mutex::new(Some(handle)),
            }),
            shared,
        })
    }

    /// Queue a page write, replacing any queued write for the same file
    pub fn enqueue(&self, tier: DiskTier, page: usize, bitmap: Bitmap) {
        let path = tier.page_path(page);
        let mut queue = self.shared.queue.lock();
        if queue.closed.contains(tier.dir()) {
            queue.stats.discarded += 1;
            tracing::trace!(page, dir = %tier.dir().display(), "write into evicted folder dropped");
            return;
        }
        queue.stats.queued += 1;

        let write = PendingWrite { tier, page, bitmap };
        if queue.pending.insert(path.clone(), write).is_some() {
            queue.stats.coalesced += 1;
        } else {
            queue.order.push_back(path);
        }
        drop(queue);
        self.shared.work.notify_one();
    }

    /// Whether a write for this file is queued or running
    pub fn is_pending(&self, path: &Path) -> bool {
        let queue = self.shared.queue.lock();
        queue.pending.contains_key(path) || queue.in_progress.as_deref() == Some(path)
    }

    /// Drop every queued write into `dir` and refuse new ones until
    /// [`DiskWriter::restore_dir`]
    ///
    /// Returns once no write into `dir` is running, so the folder can be
    /// deleted without racing the writer thread.
    pub fn discard_dir(&self, dir: &Path) -> usize {
        let mut queue = self.shared.queue.lock();
        queue.closed.insert(dir.to_path_buf());
        let before = queue.pending.len();
        queue.pending.retain(|path, _| !path.starts_with(dir));
        let Queue { pending, order, .. } = &mut *queue;
        order.retain(|path| pending.contains_key(path));

        let discarded = before - queue.pending.len();
        queue.stats.discarded += discarded as u64;
        if queue.pending.is_empty() && queue.in_progress.is_none() {
            self.shared.idle.notify_all();
        }
        while queue.in_progress.as_deref().is_some_and(|path| path.starts_with(dir)) {
            self.shared.idle.wait(&mut queue);
        }
        discarded
    }

    /// Accept writes into `dir` again after it was discarded
    pub fn restore_dir(&self, dir: &Path) {
        self.shared.queue.lock().closed.remove(dir);
    }

    /// Block until every queued write has been attempted
    pub fn flush(&self) {
        let mut queue = self.shared.queue.lock();
        while !queue.order.is_empty() || queue.in_progress.is_some() {
            self.shared.idle.wait(&mut queue);
        }
    }

    pub fn stats(&self) -> WriterStats {
        self.shared.queue.lock().stats
    }

    fn run(shared: Arc<Shared>) {
        loop {
            let (path, write) = {
                let mut queue = shared.queue.lock();
                loop {
                    if let Some(path) = queue.order.pop_front() {
                        if let Some(write) = queue.pending.remove(&path) {
                            queue.in_progress = Some(path.clone());
                            break (path, write);
                        }
                        continue;
                    }
                    shared.idle.notify_all();
                    if queue.shutdown {
                        return;
                    }
                    shared.work.wait(&mut queue);
                }
            };

            let result = write.tier.write(write.page, &write.bitmap);

            let mut queue = shared.queue.lock();
            queue.in_progress = None;
            shared.idle.notify_all();
            match result {
                Ok(()) => queue.stats.written += 1,
                Err(CacheError::FolderMissing(dir)) => {
                    queue.stats.discarded += 1;
                    tracing::debug!(page = write.page, dir = %dir.display(), "document folder gone, write dropped");
                }
                Err(e) => {
                    queue.stats.failed += 1;
                    tracing::warn!(page = write.page, path = %path.display(), error = %e, "disk cache write failed");
                }
            }
        }
    }
}

impl Drop for WriterThread {
    fn drop(&mut self) {
        self.shared.queue.lock().shutdown = true;
        self.shared.work.notify_all();
        if let Some(handle) = self.handle.lock().take() {
            if handle.join().is_err() {
                tracing::error!("disk writer thread panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disk::DiskEncoding;
    use crate::identity::CacheIdentifier;

    fn bitmap(fill: u8) -> Bitmap {
        Bitmap::from_rgba(2, 2, vec![fill; 16]).unwrap()
    }

    fn tier(root: &Path, name: &str) -> DiskTier {
        let tier = DiskTier::new(root, &CacheIdentifier::for_url(name), DiskEncoding::Png);
        tier.create_dir().unwrap();
        tier
    }

    #[test]
    fn test_writes_reach_disk() {
        let root = tempfile::tempdir().unwrap();
        let writer = DiskWriter::new().unwrap();
        let tier = tier(root.path(), "a");

        writer.enqueue(tier.clone(), 0, bitmap(10));
        writer.enqueue(tier.clone(), 1, bitmap(20));
        writer.flush();

        assert_eq!(tier.read(0).unwrap(), Some(bitmap(10)));
        assert_eq!(tier.read(1).unwrap(), Some(bitmap(20)));
        assert_eq!(writer.stats().written, 2);
    }

    #[test]
    fn test_latest_write_wins() {
        let root = tempfile::tempdir().unwrap();
        let writer = DiskWriter::new().unwrap();
        let tier = tier(root.path(), "a");

        for fill in 0..20 {
            writer.enqueue(tier.clone(), 5, bitmap(fill));
        }
        writer.flush();

        assert_eq!(tier.read(5).unwrap(), Some(bitmap(19)));
        let stats = writer.stats();
        assert_eq!(stats.queued, 20);
        assert_eq!(stats.written + stats.coalesced, 20);
        assert!(!writer.is_pending(&tier.page_path(5)));
    }

    #[test]
    fn test_failed_write_is_counted_not_raised() {
        let root = tempfile::tempdir().unwrap();
        // A regular file where the document folder should be
        let blocker = root.path().join("blocked");
        std::fs::write(&blocker, b"x").unwrap();
        let tier = DiskTier::new(
            root.path(),
            &CacheIdentifier::from_raw("blocked").unwrap(),
            DiskEncoding::Png,
        );

        let writer = DiskWriter::new().unwrap();
        writer.enqueue(tier, 0, bitmap(1));
        writer.flush();

        assert_eq!(writer.stats().failed, 1);
    }

    #[test]
    fn test_drop_drains_queue() {
        let root = tempfile::tempdir().unwrap();
        let tier = tier(root.path(), "a");
        {
            let writer = DiskWriter::new().unwrap();
            writer.enqueue(tier.clone(), 0, bitmap(3));
        }
        assert!(tier.exists(0));
    }

    #[test]
    fn test_discarded_dir_drops_queued_and_later_writes() {
        let root = tempfile::tempdir().unwrap();
        let writer = DiskWriter::new().unwrap();
        let evicted = tier(root.path(), "a");
        let kept = tier(root.path(), "b");

        for page in 0..5 {
            writer.enqueue(evicted.clone(), page, bitmap(1));
        }
        writer.discard_dir(evicted.dir());
        std::fs::remove_dir_all(evicted.dir()).unwrap();
        writer.enqueue(evicted.clone(), 9, bitmap(2));
        writer.enqueue(kept.clone(), 0, bitmap(3));
        writer.flush();

        assert!(!evicted.dir().exists());
        assert!(kept.exists(0));
        assert_eq!(writer.stats().failed, 0);

        writer.restore_dir(evicted.dir());
        evicted.create_dir().unwrap();
        writer.enqueue(evicted.clone(), 0, bitmap(4));
        writer.flush();
        assert!(evicted.exists(0));
    }

    #[test]
    fn test_write_into_removed_folder_is_dropped() {
        let root = tempfile::tempdir().unwrap();
        let writer = DiskWriter::new().unwrap();
        let tier = tier(root.path(), "a");
        std::fs::remove_dir_all(tier.dir()).unwrap();

        writer.enqueue(tier.clone(), 0, bitmap(1));
        writer.flush();

        assert!(!tier.dir().exists());
        let stats = writer.stats();
        assert_eq!((stats.written, stats.failed, stats.discarded), (0, 0, 1));
    }

    #[test]
    fn test_for_root_shares_one_writer() {
        let root = tempfile::tempdir().unwrap();
        let first = DiskWriter::for_root(root.path()).unwrap();
        let second = DiskWriter::for_root(root.path()).unwrap();
        let other_root = tempfile::tempdir().unwrap();
        let other = DiskWriter::for_root(other_root.path()).unwrap();

        first.enqueue(tier(root.path(), "a"), 0, bitmap(1));
        second.flush();
        assert_eq!(second.stats().written, 1);
        assert_eq!(other.stats().written, 0);
        assert!(Arc::ptr_eq(&first.shared, &second.shared));
    }
}
