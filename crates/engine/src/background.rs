//! Background task pool
//!
//! A small fixed pool of named worker threads for deferred work such as
//! assemblage warm-up and log compaction. Warm-up runs ahead of maintenance;
//! within one class tasks run in submission order.

use chronicle_core::{Error, Result};
use parking_lot::{Condvar, Mutex};
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{debug, error};

/// Scheduling class of a background task
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TaskClass {
    /// Log compaction
    Maintenance = 0,
    /// Bulk loads that callers are waiting to benefit from
    WarmUp = 1,
}

/// Pool metrics snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolStats {
    /// Tasks waiting in the queue
    pub queued: usize,
    /// Tasks currently running
    pub running: usize,
    /// Tasks finished since the pool started, panicked ones included
    pub completed: u64,
    /// Worker threads
    pub workers: usize,
}

struct Task {
    class: TaskClass,
    sequence: u64,
    name: &'static str,
    work: Box<dyn FnOnce() + Send>,
}

impl Eq for Task {}

impl PartialEq for Task {
    fn eq(&self, other: &Self) -> bool {
        self.class == other.class && self.sequence == other.sequence
    }
}

// Higher class first, then older first
impl Ord for Task {
    fn cmp(&self, other: &Self) -> Ordering {
        self.class
            .cmp(&other.class)
            .then(other.sequence.cmp(&self.sequence))
    }
}

impl PartialOrd for Task {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

struct PoolShared {
    queue: Mutex<BinaryHeap<Task>>,
    work_ready: Condvar,
    idle: Condvar,
    shutdown: AtomicBool,
    sequence: AtomicU64,
    queued: AtomicUsize,
    running: AtomicUsize,
    completed: AtomicU64,
    max_queued: usize,
}

/// Fixed-size background worker pool
pub struct BackgroundPool {
    shared: Arc<PoolShared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    worker_count: usize,
}

impl BackgroundPool {
    /// Start `threads` workers (minimum 1) named `chronicle-bg-N`
    pub fn new(threads: usize, max_queued: usize) -> Result<Self> {
        let threads = threads.max(1);
        let shared = Arc::new(PoolShared {
            queue: Mutex::new(BinaryHeap::new()),
            work_ready: Condvar::new(),
            idle: Condvar::new(),
            shutdown: AtomicBool::new(false),
            sequence: AtomicU64::new(0),
            queued: AtomicUsize::new(0),
            running: AtomicUsize::new(0),
            completed: AtomicU64::new(0),
            max_queued,
        });

        let mut workers = Vec::with_capacity(threads);
        for i in 0..threads {
            let worker_shared = Arc::clone(&shared);
            let handle = std::thread::Builder::new()
                .name(format!("chronicle-bg-{}", i))
                .spawn(move || worker_loop(&worker_shared))?;
            workers.push(handle);
        }

        Ok(Self {
            shared,
            workers: Mutex::new(workers),
            worker_count: threads,
        })
    }

    /// Queue `work`
    ///
    /// Fails with [`Error::Backpressure`] when the queue is full or the pool
    /// has shut down.
    pub fn submit(
        &self,
        class: TaskClass,
        name: &'static str,
        work: impl FnOnce() + Send + 'static,
    ) -> Result<()> {
        if self.shared.shutdown.load(AtomicOrdering::Acquire) {
            return Err(Error::Backpressure(format!("pool shut down, dropped {}", name)));
        }
        if self.shared.queued.load(AtomicOrdering::Acquire) >= self.shared.max_queued {
            return Err(Error::Backpressure(format!("queue full, dropped {}", name)));
        }

        let task = Task {
            class,
            sequence: self.shared.sequence.fetch_add(1, AtomicOrdering::Relaxed),
            name,
            work: Box::new(work),
        };
        {
            let mut queue = self.shared.queue.lock();
            queue.push(task);
            self.shared.queued.fetch_add(1, AtomicOrdering::Release);
        }
        self.shared.work_ready.notify_one();
        debug!(target: "chronicle::background", task = name, ?class, "Queued background task");
        Ok(())
    }

    /// Block until the queue is empty and no task is running
    ///
    /// Workers keep running afterwards.
    pub fn drain(&self) {
        let mut queue = self.shared.queue.lock();
        while self.shared.queued.load(AtomicOrdering::Acquire) > 0
            || self.shared.running.load(AtomicOrdering::Acquire) > 0
        {
            self.shared.idle.wait(&mut queue);
        }
    }

    /// Stop accepting work, run what is queued, and join the workers
    pub fn shutdown(&self) {
        self.shared.shutdown.store(true, AtomicOrdering::Release);
        // Notify under the queue lock so a worker about to wait cannot miss it
        {
            let _queue = self.shared.queue.lock();
            self.shared.work_ready.notify_all();
        }
        let mut workers = self.workers.lock();
        for handle in workers.drain(..) {
            let _ = handle.join();
        }
    }

    /// Snapshot of pool metrics
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            queued: self.shared.queued.load(AtomicOrdering::Relaxed),
            running: self.shared.running.load(AtomicOrdering::Relaxed),
            completed: self.shared.completed.load(AtomicOrdering::Relaxed),
            workers: self.worker_count,
        }
    }
}

impl Drop for BackgroundPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Keeps `running` accurate even when a task panics
struct RunningGuard<'a> {
    shared: &'a PoolShared,
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        let previous = self.shared.running.fetch_sub(1, AtomicOrdering::Release);
        self.shared.completed.fetch_add(1, AtomicOrdering::Relaxed);
        if previous == 1 && self.shared.queued.load(AtomicOrdering::Acquire) == 0 {
            let _queue = self.shared.queue.lock();
            self.shared.idle.notify_all();
        }
    }
}

fn worker_loop(shared: &PoolShared) {
    loop {
        let task = {
            let mut queue = shared.queue.lock();
            loop {
                if let Some(task) = queue.pop() {
                    shared.queued.fetch_sub(1, AtomicOrdering::Release);
                    shared.running.fetch_add(1, AtomicOrdering::Release);
                    break task;
                }
                if shared.shutdown.load(AtomicOrdering::Acquire) {
                    return;
                }
                shared.work_ready.wait(&mut queue);
            }
        };

        let _guard = RunningGuard { shared };
        let name = task.name;
        if let Err(e) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(task.work)) {
            let message = e
                .downcast_ref::<&str>()
                .copied()
                .or_else(|| e.downcast_ref::<String>().map(String::as_str))
                .unwrap_or("(non-string panic)");
            error!(target: "chronicle::background", task = name, panic = message, "Background task panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;
    use std::time::Duration;

    #[test]
    fn test_submit_and_drain() {
        let pool = BackgroundPool::new(2, 64).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..10 {
            let c = Arc::clone(&counter);
            pool.submit(TaskClass::WarmUp, "count", move || {
                c.fetch_add(1, AtomicOrdering::Relaxed);
            })
            .unwrap();
        }
        pool.drain();
        assert_eq!(counter.load(AtomicOrdering::Relaxed), 10);
        assert_eq!(pool.stats().completed, 10);
    }

    #[test]
    fn test_warm_up_runs_before_maintenance() {
        let pool = BackgroundPool::new(1, 64).unwrap();
        let barrier = Arc::new(Barrier::new(2));
        let b = Arc::clone(&barrier);
        pool.submit(TaskClass::Maintenance, "block", move || {
            b.wait();
        })
        .unwrap();
        std::thread::sleep(Duration::from_millis(50));

        let order = Arc::new(Mutex::new(Vec::new()));
        for (class, label) in [
            (TaskClass::Maintenance, "compact"),
            (TaskClass::WarmUp, "warm-1"),
            (TaskClass::WarmUp, "warm-2"),
        ] {
            let o = Arc::clone(&order);
            pool.submit(class, label, move || o.lock().push(label)).unwrap();
        }
        barrier.wait();
        pool.drain();
        assert_eq!(*order.lock(), vec!["warm-1", "warm-2", "compact"]);
    }

    #[test]
    fn test_full_queue_is_backpressure() {
        let pool = BackgroundPool::new(1, 1).unwrap();
        let barrier = Arc::new(Barrier::new(2));
        let b = Arc::clone(&barrier);
        pool.submit(TaskClass::WarmUp, "block", move || {
            b.wait();
        })
        .unwrap();
        std::thread::sleep(Duration::from_millis(50));

        pool.submit(TaskClass::WarmUp, "queued", || {}).unwrap();
        assert!(matches!(
            pool.submit(TaskClass::WarmUp, "rejected", || {}),
            Err(Error::Backpressure(_))
        ));
        barrier.wait();
        pool.drain();
    }

    #[test]
    fn test_panicking_task_does_not_hang_drain() {
        let pool = BackgroundPool::new(1, 64).unwrap();
        pool.submit(TaskClass::WarmUp, "boom", || panic!("warm-up failed"))
            .unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&counter);
        pool.submit(TaskClass::WarmUp, "after", move || {
            c.fetch_add(1, AtomicOrdering::Relaxed);
        })
        .unwrap();
        pool.drain();
        assert_eq!(counter.load(AtomicOrdering::Relaxed), 1);
        assert_eq!(pool.stats().completed, 2);
    }

    #[test]
    fn test_shutdown_runs_queued_then_rejects() {
        let pool = BackgroundPool::new(1, 64).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..5 {
            let c = Arc::clone(&counter);
            pool.submit(TaskClass::Maintenance, "count", move || {
                c.fetch_add(1, AtomicOrdering::Relaxed);
            })
            .unwrap();
        }
        pool.shutdown();
        assert_eq!(counter.load(AtomicOrdering::Relaxed), 5);
        assert!(pool.submit(TaskClass::WarmUp, "late", || {}).is_err());
        pool.shutdown();
    }
}
