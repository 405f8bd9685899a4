//! Fixed-size thread pool and the process-wide system executor.
//!
//! The pool is a FIFO job queue behind a mutex/condvar pair and N
//! worker OS threads. Jobs run outside the queue lock, so a job may
//! itself post new jobs without deadlocking.
//!
//! `stop()` is best-effort: workers exit on the flag without draining
//! jobs still queued (see DESIGN.md). Jobs posted after `stop()` are
//! refused.

use crate::config::IoConfig;
use crate::context::ExecutionContext;

use proact_core::rt_debug;

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, OnceLock};
use std::thread::{self, JoinHandle};

/// A queued unit of deferred work.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Error: the pool has stopped and no longer accepts jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStopped;

impl fmt::Display for PoolStopped {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "thread pool stopped")
    }
}

impl std::error::Error for PoolStopped {}

/// Shared state between posters and workers.
struct PoolInner {
    jobs: Mutex<VecDeque<Job>>,
    cond: Condvar,
    stopped: AtomicBool,
}

/// Fixed pool of worker threads draining a FIFO job queue.
pub struct ThreadPool {
    inner: Arc<PoolInner>,
    handles: Vec<JoinHandle<()>>,
    size: usize,
}

impl ThreadPool {
    /// Create a pool with `size` workers (not yet started).
    pub fn new(size: usize) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                jobs: Mutex::new(VecDeque::new()),
                cond: Condvar::new(),
                stopped: AtomicBool::new(false),
            }),
            handles: Vec::new(),
            size: size.max(1),
        }
    }

    /// Create a pool sized to the hardware thread count.
    pub fn with_default_size() -> Self {
        let cpus = thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Self::new(cpus)
    }

    /// Spawn all workers. Jobs posted before `start` run once the
    /// workers come up, in post order.
    pub fn start(&mut self) {
        if !self.handles.is_empty() {
            return;
        }
        for worker_id in 0..self.size {
            let inner = Arc::clone(&self.inner);
            let handle = thread::Builder::new()
                .name(format!("proact-pool-{}", worker_id))
                .spawn(move || worker_loop(inner, worker_id))
                .expect("failed to spawn pool worker thread");
            self.handles.push(handle);
        }
    }

    /// Append a job to the queue and wake one waiting worker.
    /// FIFO: among queued jobs, the earliest-posted runs first.
    pub fn post<F>(&self, job: F) -> Result<(), PoolStopped>
    where
        F: FnOnce() + Send + 'static,
    {
        if self.inner.stopped.load(Ordering::Acquire) {
            return Err(PoolStopped);
        }
        {
            let mut jobs = self.inner.jobs.lock().unwrap();
            jobs.push_back(Box::new(job));
        }
        self.inner.cond.notify_one();
        Ok(())
    }

    /// Signal all workers to exit. Idempotent.
    pub fn stop(&self) {
        if !self.inner.stopped.swap(true, Ordering::AcqRel) {
            self.inner.cond.notify_all();
        }
    }

    pub fn stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::Acquire)
    }

    /// Wait for every worker to exit. Only meaningful after `stop`.
    pub fn join(&mut self) {
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.stop();
        self.join();
    }
}

/// Worker thread main loop: park while the queue is empty, run one job
/// at a time outside the lock, exit on the stop flag.
fn worker_loop(inner: Arc<PoolInner>, worker_id: usize) {
    rt_debug!("pool worker {} started", worker_id);
    loop {
        let job = {
            let mut jobs = inner.jobs.lock().unwrap();
            loop {
                if inner.stopped.load(Ordering::Acquire) {
                    rt_debug!("pool worker {} exiting", worker_id);
                    return;
                }
                if let Some(job) = jobs.pop_front() {
                    break job;
                }
                jobs = inner.cond.wait(jobs).unwrap();
            }
        };
        job();
    }
}

/// A started thread pool plus the execution context it serves: the
/// default place to run arbitrary deferred work.
pub struct SystemContext {
    context: ExecutionContext,
    pool: ThreadPool,
}

impl SystemContext {
    /// Pool sized from the environment (`PROACT_POOL_WORKERS`,
    /// defaulting to the hardware thread count).
    pub fn new() -> Self {
        Self::with_workers(IoConfig::from_env().pool_workers)
    }

    pub fn with_workers(workers: usize) -> Self {
        let mut pool = ThreadPool::new(workers);
        pool.start();
        Self {
            context: ExecutionContext::new(),
            pool,
        }
    }

    pub fn execution_context(&self) -> &ExecutionContext {
        &self.context
    }

    /// Run `job` on the pool.
    pub fn post<F>(&self, job: F) -> Result<(), PoolStopped>
    where
        F: FnOnce() + Send + 'static,
    {
        self.pool.post(job)
    }

    /// Stop accepting work and signal the workers. The workers are
    /// joined when the context drops.
    pub fn stop(&self) {
        self.pool.stop();
    }

    pub fn stopped(&self) -> bool {
        self.pool.stopped()
    }
}

impl Default for SystemContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Cheap handle to the process-wide [`SystemContext`].
///
/// The shared context is created exactly once, on first use, regardless
/// of how many threads race the initialization. Callers that prefer an
/// explicit dependency can construct their own `SystemContext` instead.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemExecutor;

impl SystemExecutor {
    /// The process-wide system context.
    pub fn context() -> &'static SystemContext {
        static SYSTEM_CONTEXT: OnceLock<SystemContext> = OnceLock::new();
        SYSTEM_CONTEXT.get_or_init(SystemContext::new)
    }

    /// Run `job` on the shared pool.
    pub fn post<F>(&self, job: F) -> Result<(), PoolStopped>
    where
        F: FnOnce() + Send + 'static,
    {
        Self::context().post(job)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::time::Duration;

    #[test]
    fn test_fifo_order_with_one_worker() {
        let mut pool = ThreadPool::new(1);
        let (tx, rx) = mpsc::channel();

        // Queue before any worker exists, then start.
        for id in [1u32, 2, 3] {
            let tx = tx.clone();
            pool.post(move || tx.send(id).unwrap()).unwrap();
        }
        pool.start();

        let mut seen = Vec::new();
        for _ in 0..3 {
            seen.push(rx.recv_timeout(Duration::from_secs(2)).unwrap());
        }
        assert_eq!(seen, vec![1, 2, 3]);
    }

    #[test]
    fn test_job_may_post_from_inside_job() {
        let mut pool = ThreadPool::new(1);
        pool.start();
        let pool = Arc::new(pool);
        let (tx, rx) = mpsc::channel();

        {
            let pool2 = Arc::clone(&pool);
            let tx = tx.clone();
            pool.post(move || {
                let tx2 = tx.clone();
                pool2.post(move || tx2.send("inner").unwrap()).unwrap();
                tx.send("outer").unwrap();
            })
            .unwrap();
        }

        let mut seen = vec![
            rx.recv_timeout(Duration::from_secs(2)).unwrap(),
            rx.recv_timeout(Duration::from_secs(2)).unwrap(),
        ];
        seen.sort();
        assert_eq!(seen, vec!["inner", "outer"]);
    }

    #[test]
    fn test_post_after_stop_is_refused() {
        let mut pool = ThreadPool::new(2);
        pool.start();
        pool.stop();
        assert_eq!(pool.post(|| {}), Err(PoolStopped));
    }

    #[test]
    fn test_stop_and_join_terminate_workers() {
        let mut pool = ThreadPool::new(4);
        pool.start();
        pool.stop();
        pool.join();
        assert!(pool.stopped());
    }

    #[test]
    fn test_parallel_posters() {
        let mut pool = ThreadPool::new(4);
        pool.start();
        let pool = Arc::new(pool);
        let (tx, rx) = mpsc::channel();

        let posters: Vec<_> = (0..4)
            .map(|_| {
                let pool = Arc::clone(&pool);
                let tx = tx.clone();
                thread::spawn(move || {
                    for _ in 0..25 {
                        let tx = tx.clone();
                        pool.post(move || tx.send(()).unwrap()).unwrap();
                    }
                })
            })
            .collect();
        for p in posters {
            p.join().unwrap();
        }

        for _ in 0..100 {
            rx.recv_timeout(Duration::from_secs(2)).unwrap();
        }
    }

    #[test]
    fn test_system_executor_runs_jobs() {
        let (tx, rx) = mpsc::channel();
        SystemExecutor.post(move || tx.send(7u32).unwrap()).unwrap();
        assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), 7);
    }

    #[test]
    fn test_system_executor_context_is_shared() {
        let a = SystemExecutor::context() as *const SystemContext;
        let b = SystemExecutor::context() as *const SystemContext;
        assert_eq!(a, b);
    }

    #[test]
    fn test_explicit_system_context() {
        let ctx = SystemContext::with_workers(2);
        let (tx, rx) = mpsc::channel();
        ctx.post(move || tx.send(1u8).unwrap()).unwrap();
        assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), 1);
        ctx.stop();
        assert!(ctx.stopped());
    }
}
