//! The worker pool: the only place continuations run.
//!
//! A fixed-size set of background threads drains an unbounded FIFO queue of
//! `(action, context)` pairs. Promises hand their continuations to this pool;
//! nothing in the engine ever runs a continuation inline on the thread that
//! completed a promise.
//!
//! # Design
//!
//! - **Fixed size**: the thread count is chosen at construction (usually the
//!   platform parallelism hint) and never changes. Workers park on a condvar
//!   when the queue is empty and never exit during normal operation.
//! - **Unbounded queue, no backpressure**: `queue_work` always succeeds. This
//!   is a documented limitation, not an oversight — producers that need flow
//!   control must build it above this layer.
//! - **No error handling**: the pool catches nothing. Producers are required
//!   to wrap their actions so failures become a `fail` call on some promise;
//!   a panic that reaches the worker loop takes that worker down and is a
//!   programming defect, not a runtime condition this pool recovers from.
//! - **Injectable**: pools are ordinary values. Tests construct as many
//!   independent pools as they like and shut them down cleanly; there is no
//!   process-wide singleton.
//!
//! # Example
//!
//! ```
//! use promisecell::WorkerPool;
//!
//! let pool = WorkerPool::new(2);
//! let handle = pool.handle();
//! handle.queue(|| {
//!     // runs on a worker thread
//! });
//! ```

use crossbeam_queue::SegQueue;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::context::AmbientContext;
use crate::tracing_compat::{debug, trace};

/// One queued unit of work: an action and the ambient context to run it under.
struct WorkItem {
    action: Box<dyn FnOnce() + Send>,
    context: Option<AmbientContext>,
}

/// A fixed-size pool of worker threads.
///
/// Owning value; dropping it shuts the pool down and waits briefly for the
/// workers to drain. Cheap shared access goes through [`WorkerPool::handle`].
pub struct WorkerPool {
    inner: Arc<PoolInner>,
}

/// A cloneable, shareable handle to a [`WorkerPool`].
#[derive(Clone)]
pub struct WorkerPoolHandle {
    inner: Arc<PoolInner>,
}

/// Configuration for a [`WorkerPool`].
#[derive(Clone)]
pub struct WorkerPoolOptions {
    /// Prefix for worker thread names.
    pub thread_name_prefix: String,
    /// Callback invoked on each worker thread as it starts.
    pub on_thread_start: Option<Arc<dyn Fn() + Send + Sync>>,
    /// Callback invoked on each worker thread as it stops.
    pub on_thread_stop: Option<Arc<dyn Fn() + Send + Sync>>,
}

impl Default for WorkerPoolOptions {
    fn default() -> Self {
        Self {
            thread_name_prefix: "promisecell".to_string(),
            on_thread_start: None,
            on_thread_stop: None,
        }
    }
}

impl fmt::Debug for WorkerPoolOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerPoolOptions")
            .field("thread_name_prefix", &self.thread_name_prefix)
            .field("on_thread_start", &self.on_thread_start.is_some())
            .field("on_thread_stop", &self.on_thread_stop.is_some())
            .finish()
    }
}

struct PoolInner {
    thread_count: usize,
    pending_count: AtomicUsize,
    queue: SegQueue<WorkItem>,
    shutdown: AtomicBool,
    live_threads: AtomicUsize,
    condvar: Condvar,
    mutex: Mutex<()>,
    on_thread_stop: Option<Arc<dyn Fn() + Send + Sync>>,
    thread_handles: Mutex<Vec<JoinHandle<()>>>,
}

fn lock(mutex: &Mutex<()>) -> MutexGuard<'_, ()> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl WorkerPool {
    /// Creates a pool with `threads` workers.
    ///
    /// # Panics
    ///
    /// Panics if `threads` is 0.
    #[must_use]
    pub fn new(threads: usize) -> Self {
        Self::with_options(threads, WorkerPoolOptions::default())
    }

    /// Creates a pool sized to the platform's parallelism hint.
    #[must_use]
    pub fn with_default_parallelism() -> Self {
        let threads = thread::available_parallelism().map_or(1, usize::from);
        Self::new(threads)
    }

    /// Creates a pool with custom options.
    ///
    /// # Panics
    ///
    /// Panics if `threads` is 0.
    #[must_use]
    pub fn with_options(threads: usize, options: WorkerPoolOptions) -> Self {
        assert!(threads > 0, "a worker pool needs at least one thread");

        let inner = Arc::new(PoolInner {
            thread_count: threads,
            pending_count: AtomicUsize::new(0),
            queue: SegQueue::new(),
            shutdown: AtomicBool::new(false),
            live_threads: AtomicUsize::new(0),
            condvar: Condvar::new(),
            mutex: Mutex::new(()),
            on_thread_stop: options.on_thread_stop.clone(),
            thread_handles: Mutex::new(Vec::with_capacity(threads)),
        });

        for index in 0..threads {
            let worker = Arc::clone(&inner);
            let on_start = options.on_thread_start.clone();
            let name = format!("{}-worker-{index}", options.thread_name_prefix);
            inner.live_threads.fetch_add(1, Ordering::Relaxed);

            let handle = thread::Builder::new()
                .name(name)
                .spawn(move || {
                    if let Some(callback) = on_start {
                        callback();
                    }
                    worker_loop(&worker);
                    if let Some(callback) = &worker.on_thread_stop {
                        callback();
                    }
                    worker.live_threads.fetch_sub(1, Ordering::Release);
                })
                .unwrap_or_else(|error| panic!("failed to spawn worker thread: {error}"));

            inner
                .thread_handles
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(handle);
        }

        debug!(threads, "worker pool started");
        Self { inner }
    }

    /// Returns a cloneable handle to this pool.
    #[must_use]
    pub fn handle(&self) -> WorkerPoolHandle {
        WorkerPoolHandle {
            inner: Arc::clone(&self.inner),
        }
    }

    /// Enqueues an action with an explicit context (or none).
    pub fn queue_work<F>(&self, action: F, context: Option<AmbientContext>)
    where
        F: FnOnce() + Send + 'static,
    {
        enqueue(&self.inner, action, context);
    }

    /// Enqueues an action, capturing the caller's ambient context.
    pub fn queue<F>(&self, action: F)
    where
        F: FnOnce() + Send + 'static,
    {
        enqueue(&self.inner, action, Some(AmbientContext::capture()));
    }

    /// Returns the number of worker threads.
    #[must_use]
    pub fn thread_count(&self) -> usize {
        self.inner.thread_count
    }

    /// Returns the number of queued, not-yet-started work items.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.inner.pending_count.load(Ordering::Relaxed)
    }

    /// Returns true if shutdown has been requested.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.inner.shutdown.load(Ordering::Acquire)
    }

    /// Requests shutdown. Workers finish the queued backlog and exit.
    pub fn shutdown(&self) {
        self.inner.shutdown.store(true, Ordering::Release);
        let _guard = lock(&self.inner.mutex);
        self.inner.condvar.notify_all();
    }

    /// Shuts down and waits for every worker to exit.
    ///
    /// Returns true if all workers exited within `timeout`.
    pub fn shutdown_and_wait(&self, timeout: Duration) -> bool {
        self.shutdown();
        let deadline = Instant::now() + timeout;

        while self.inner.live_threads.load(Ordering::Acquire) > 0 {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return false;
            }
            {
                let _guard = lock(&self.inner.mutex);
                self.inner.condvar.notify_all();
            }
            thread::sleep(Duration::from_millis(5).min(remaining));
        }

        let mut handles = self
            .inner
            .thread_handles
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        for handle in handles.drain(..) {
            let _ = handle.join();
        }
        true
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
        let _ = self.shutdown_and_wait(Duration::from_secs(5));
    }
}

impl fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerPool")
            .field("thread_count", &self.inner.thread_count)
            .field("pending", &self.pending_count())
            .field("shutdown", &self.is_shutdown())
            .finish()
    }
}

impl WorkerPoolHandle {
    /// Enqueues an action with an explicit context (or none).
    pub fn queue_work<F>(&self, action: F, context: Option<AmbientContext>)
    where
        F: FnOnce() + Send + 'static,
    {
        enqueue(&self.inner, action, context);
    }

    /// Enqueues an action, capturing the caller's ambient context.
    pub fn queue<F>(&self, action: F)
    where
        F: FnOnce() + Send + 'static,
    {
        enqueue(&self.inner, action, Some(AmbientContext::capture()));
    }

    /// Returns the number of worker threads.
    #[must_use]
    pub fn thread_count(&self) -> usize {
        self.inner.thread_count
    }

    /// Returns the number of queued, not-yet-started work items.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.inner.pending_count.load(Ordering::Relaxed)
    }

    /// Returns true if shutdown has been requested.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.inner.shutdown.load(Ordering::Acquire)
    }
}

impl fmt::Debug for WorkerPoolHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerPoolHandle")
            .field("thread_count", &self.inner.thread_count)
            .field("pending", &self.pending_count())
            .finish()
    }
}

fn enqueue<F>(inner: &PoolInner, action: F, context: Option<AmbientContext>)
where
    F: FnOnce() + Send + 'static,
{
    inner.queue.push(WorkItem {
        action: Box::new(action),
        context,
    });
    inner.pending_count.fetch_add(1, Ordering::Relaxed);
    trace!(pending = inner.pending_count.load(Ordering::Relaxed), "work queued");

    let _guard = lock(&inner.mutex);
    inner.condvar.notify_one();
}

fn worker_loop(inner: &PoolInner) {
    loop {
        if let Some(item) = inner.queue.pop() {
            inner.pending_count.fetch_sub(1, Ordering::Relaxed);
            match item.context {
                Some(context) => context.run(item.action),
                None => (item.action)(),
            }
            continue;
        }

        if inner.shutdown.load(Ordering::Acquire) {
            break;
        }

        // Park until new work arrives. The queue is re-checked under the
        // mutex: enqueue notifies under the same mutex, so a push between
        // our empty pop above and the wait below cannot be missed.
        let guard = lock(&inner.mutex);
        if inner.queue.is_empty() && !inner.shutdown.load(Ordering::Acquire) {
            drop(
                inner
                    .condvar
                    .wait(guard)
                    .unwrap_or_else(PoisonError::into_inner),
            );
        }
    }
}
