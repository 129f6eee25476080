//! One-shot timer driver backing the delay combinator.
//!
//! A [`TimerDriver`] owns a single background thread and a min-heap of armed
//! timers ordered by deadline. The thread sleeps until the earliest deadline,
//! completes every promise that has come due, and goes back to sleep. Armed
//! entries leave the heap when they fire, so firing leaks nothing; the whole
//! driver is an ordinary value that shuts its thread down on drop.
//!
//! Drivers are injectable like worker pools: tests construct their own and
//! tear them down; there is no process-wide timer.

use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::fmt;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::pool::WorkerPoolHandle;
use crate::promise::Promise;
use crate::tracing_compat::trace;

/// An armed one-shot timer.
struct TimerEntry {
    deadline: Instant,
    /// Arming order, to break deadline ties deterministically.
    sequence: u64,
    promise: Promise<()>,
}

impl Eq for TimerEntry {}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.sequence == other.sequence
    }
}

impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        // Reverse ordering for a min-heap (earliest deadline first).
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

struct TimerState {
    heap: BinaryHeap<TimerEntry>,
    next_sequence: u64,
    shutdown: bool,
}

impl TimerState {
    /// Pops every entry with `deadline <= now`.
    fn pop_due(&mut self, now: Instant) -> Vec<Promise<()>> {
        let mut due = Vec::new();
        while let Some(entry) = self.heap.peek() {
            if entry.deadline > now {
                break;
            }
            if let Some(entry) = self.heap.pop() {
                due.push(entry.promise);
            }
        }
        due
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.heap.peek().map(|entry| entry.deadline)
    }
}

struct TimerInner {
    state: Mutex<TimerState>,
    condvar: Condvar,
}

fn lock(state: &Mutex<TimerState>) -> MutexGuard<'_, TimerState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// The owning side of a timer driver.
pub struct TimerDriver {
    inner: Arc<TimerInner>,
    thread: Option<JoinHandle<()>>,
}

/// A cloneable handle used to arm timers.
#[derive(Clone)]
pub struct TimerDriverHandle {
    inner: Arc<TimerInner>,
}

impl TimerDriver {
    /// Starts a timer driver with its background thread.
    #[must_use]
    pub fn new() -> Self {
        let inner = Arc::new(TimerInner {
            state: Mutex::new(TimerState {
                heap: BinaryHeap::new(),
                next_sequence: 0,
                shutdown: false,
            }),
            condvar: Condvar::new(),
        });

        let driver = Arc::clone(&inner);
        let thread = thread::Builder::new()
            .name("promisecell-timer".to_string())
            .spawn(move || driver_loop(&driver))
            .unwrap_or_else(|error| panic!("failed to spawn timer thread: {error}"));

        Self {
            inner,
            thread: Some(thread),
        }
    }

    /// Returns a cloneable handle to this driver.
    #[must_use]
    pub fn handle(&self) -> TimerDriverHandle {
        TimerDriverHandle {
            inner: Arc::clone(&self.inner),
        }
    }

    /// Stops the driver thread. Timers still armed never fire.
    pub fn shutdown(&self) {
        lock(&self.inner.state).shutdown = true;
        self.inner.condvar.notify_all();
    }

    /// Returns the number of armed, not-yet-fired timers.
    #[must_use]
    pub fn armed_count(&self) -> usize {
        lock(&self.inner.state).heap.len()
    }
}

impl Default for TimerDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for TimerDriver {
    fn drop(&mut self) {
        self.shutdown();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl fmt::Debug for TimerDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimerDriver")
            .field("armed", &self.armed_count())
            .finish()
    }
}

impl TimerDriverHandle {
    /// Arms a one-shot timer and returns its promise.
    ///
    /// The promise succeeds no earlier than `duration` from now; it
    /// dispatches continuations on `executor`.
    ///
    /// # Panics
    ///
    /// Panics if the driver has been shut down — such a timer would never
    /// fire.
    #[must_use]
    pub fn schedule(&self, executor: &WorkerPoolHandle, duration: Duration) -> Promise<()> {
        let promise = Promise::pending(executor);
        let deadline = Instant::now() + duration;
        {
            let mut state = lock(&self.inner.state);
            assert!(!state.shutdown, "timer driver is shut down");
            let sequence = state.next_sequence;
            state.next_sequence += 1;
            state.heap.push(TimerEntry {
                deadline,
                sequence,
                promise: promise.clone(),
            });
        }
        trace!(?duration, "timer armed");
        self.inner.condvar.notify_all();
        promise
    }
}

impl fmt::Debug for TimerDriverHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimerDriverHandle").finish()
    }
}

fn driver_loop(inner: &TimerInner) {
    let mut state = lock(&inner.state);
    loop {
        if state.shutdown {
            return;
        }

        let now = Instant::now();
        let due = state.pop_due(now);
        if !due.is_empty() {
            drop(state);
            trace!(fired = due.len(), "timers fired");
            for promise in due {
                // The armed promise may have been completed externally;
                // the deadline side loses that race quietly.
                let _ = promise.complete(());
            }
            state = lock(&inner.state);
            continue;
        }

        state = match state.next_deadline() {
            Some(deadline) => {
                let timeout = deadline.saturating_duration_since(now);
                inner
                    .condvar
                    .wait_timeout(state, timeout)
                    .unwrap_or_else(PoisonError::into_inner)
                    .0
            }
            None => inner
                .condvar
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner),
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::WorkerPool;

    fn entry(deadline: Instant, sequence: u64, promise: &Promise<()>) -> TimerEntry {
        TimerEntry {
            deadline,
            sequence,
            promise: promise.clone(),
        }
    }

    #[test]
    fn heap_pops_earliest_first() {
        let pool = WorkerPool::new(1);
        let handle = pool.handle();
        let base = Instant::now();
        let promises: Vec<Promise<()>> = (0..3).map(|_| Promise::pending(&handle)).collect();

        let mut state = TimerState {
            heap: BinaryHeap::new(),
            next_sequence: 3,
            shutdown: false,
        };
        state.heap.push(entry(base + Duration::from_millis(100), 0, &promises[0]));
        state.heap.push(entry(base + Duration::from_millis(50), 1, &promises[1]));
        state.heap.push(entry(base + Duration::from_millis(150), 2, &promises[2]));

        assert_eq!(state.next_deadline(), Some(base + Duration::from_millis(50)));

        let due = state.pop_due(base + Duration::from_millis(100));
        assert_eq!(due.len(), 2);
        assert_eq!(state.heap.len(), 1);
    }

    #[test]
    fn pop_due_ignores_future_entries() {
        let pool = WorkerPool::new(1);
        let promise = Promise::pending(&pool.handle());
        let base = Instant::now();

        let mut state = TimerState {
            heap: BinaryHeap::new(),
            next_sequence: 1,
            shutdown: false,
        };
        state.heap.push(entry(base + Duration::from_secs(60), 0, &promise));

        assert!(state.pop_due(base).is_empty());
        assert_eq!(state.heap.len(), 1);
    }

    #[test]
    fn fired_entry_leaves_the_heap() {
        let pool = WorkerPool::new(1);
        let driver = TimerDriver::new();
        let promise = driver
            .handle()
            .schedule(&pool.handle(), Duration::from_millis(10));

        promise.wait().expect("timer fired");
        // Firing removes the entry; nothing lingers past completion.
        assert_eq!(driver.armed_count(), 0);
    }

    #[test]
    #[should_panic(expected = "shut down")]
    fn scheduling_after_shutdown_is_rejected() {
        let pool = WorkerPool::new(1);
        let driver = TimerDriver::new();
        let handle = driver.handle();
        driver.shutdown();
        let _ = handle.schedule(&pool.handle(), Duration::from_millis(1));
    }
}
