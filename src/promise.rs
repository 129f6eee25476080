//! The completion cell: a single-writer, write-once promise.
//!
//! A [`Promise`] starts pending and is completed exactly once by its
//! producer, with either a value ([`complete`](Promise::complete)) or an
//! error ([`fail`](Promise::fail)). A consumer may attach at most one
//! continuation ([`on_completed`](Promise::on_completed)) or block for the
//! outcome ([`wait`](Promise::wait)); those two uses share the single
//! continuation slot and are mutually exclusive.
//!
//! # Dispatch
//!
//! Continuations never run inline on the completing thread — completion
//! queues them on the promise's worker pool, together with the ambient
//! context captured when they were registered. Long chains of
//! already-completed promises therefore cost queue hops, not stack frames,
//! and a producer holding its own locks while completing cannot reenter
//! consumer code.
//!
//! # Locking
//!
//! One `Mutex` per promise guards the outcome and the continuation slot.
//! No two promises share a lock; completion is published before dispatch is
//! queued, so a continuation always observes the completed state.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

use crate::context::AmbientContext;
use crate::error::{StateError, UserError};
use crate::pool::WorkerPoolHandle;
use crate::tracing_compat::trace;

/// A single-writer, write-once container for an eventual result or error.
///
/// Cheaply clonable; clones share the same cell. The producer holds one
/// clone and completes it, consumers hold others and observe it.
pub struct Promise<T> {
    inner: Arc<PromiseInner<T>>,
}

impl<T> Clone for Promise<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct PromiseInner<T> {
    executor: WorkerPoolHandle,
    slots: Mutex<Slots<T>>,
}

struct Slots<T> {
    /// `None` while pending; written exactly once.
    outcome: Option<Result<T, UserError>>,
    /// The stored continuation, present only while pending-and-registered.
    continuation: Option<Continuation>,
    /// Sticky: stays true after the continuation fires, so a second
    /// registration errors regardless of completion state.
    registered: bool,
}

struct Continuation {
    action: Box<dyn FnOnce() + Send>,
    context: AmbientContext,
}

fn lock<T>(slots: &Mutex<Slots<T>>) -> MutexGuard<'_, Slots<T>> {
    slots.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<T> Promise<T> {
    /// Creates a new pending promise dispatching on `executor`.
    #[must_use]
    pub fn pending(executor: &WorkerPoolHandle) -> Self {
        Self::with_outcome(executor, None)
    }

    /// Creates an already-succeeded promise.
    ///
    /// Registering a continuation on it still dispatches asynchronously.
    #[must_use]
    pub fn ready(executor: &WorkerPoolHandle, value: T) -> Self {
        Self::with_outcome(executor, Some(Ok(value)))
    }

    /// Creates an already-failed promise.
    #[must_use]
    pub fn failed(executor: &WorkerPoolHandle, error: UserError) -> Self {
        Self::with_outcome(executor, Some(Err(error)))
    }

    fn with_outcome(executor: &WorkerPoolHandle, outcome: Option<Result<T, UserError>>) -> Self {
        Self {
            inner: Arc::new(PromiseInner {
                executor: executor.clone(),
                slots: Mutex::new(Slots {
                    outcome,
                    continuation: None,
                    registered: false,
                }),
            }),
        }
    }

    /// Returns the pool this promise dispatches continuations on.
    #[must_use]
    pub fn executor(&self) -> &WorkerPoolHandle {
        &self.inner.executor
    }

    /// Returns true once the promise has succeeded or failed.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        lock(&self.inner.slots).outcome.is_some()
    }

    /// Completes the promise with a value.
    ///
    /// # Errors
    ///
    /// [`StateError::AlreadyCompleted`] if the promise is not pending.
    pub fn complete(&self, value: T) -> Result<(), StateError> {
        self.finish(Ok(value))
    }

    /// Completes the promise with an error.
    ///
    /// # Errors
    ///
    /// [`StateError::AlreadyCompleted`] if the promise is not pending.
    pub fn fail(&self, error: UserError) -> Result<(), StateError> {
        self.finish(Err(error))
    }

    fn finish(&self, outcome: Result<T, UserError>) -> Result<(), StateError> {
        let continuation = {
            let mut slots = lock(&self.inner.slots);
            if slots.outcome.is_some() {
                return Err(StateError::AlreadyCompleted);
            }
            slots.outcome = Some(outcome);
            slots.continuation.take()
        };

        if let Some(continuation) = continuation {
            trace!("promise completed, dispatching stored continuation");
            self.inner
                .executor
                .queue_work(continuation.action, Some(continuation.context));
        }
        Ok(())
    }

    /// Registers the continuation to run after completion.
    ///
    /// The caller's ambient context is captured here — before the completion
    /// state is examined — and restored around the callback, so behavior is
    /// identical whether the promise is already done or not. If it is done,
    /// the callback is queued immediately; it never runs on the calling
    /// thread and never before this call returns.
    ///
    /// # Errors
    ///
    /// [`StateError::AlreadyRegistered`] if a continuation was ever
    /// registered on this promise, fired or not.
    pub fn on_completed<F>(&self, callback: F) -> Result<(), StateError>
    where
        F: FnOnce() + Send + 'static,
    {
        let context = AmbientContext::capture();

        let mut slots = lock(&self.inner.slots);
        if slots.registered {
            return Err(StateError::AlreadyRegistered);
        }
        slots.registered = true;

        if slots.outcome.is_some() {
            drop(slots);
            trace!("continuation registered on completed promise, dispatching");
            self.inner.executor.queue_work(callback, Some(context));
        } else {
            slots.continuation = Some(Continuation {
                action: Box::new(callback),
                context,
            });
        }
        Ok(())
    }

    /// Returns a unit promise that succeeds when this promise completes
    /// with either outcome — a bare completion signal.
    ///
    /// This is how a typed promise is handed to type-agnostic drivers such
    /// as the sequence runner: the driver resumes on the signal, and the
    /// producer-side code observes the real outcome with
    /// [`result`](Promise::result). The signal consumes this promise's
    /// continuation slot.
    ///
    /// # Errors
    ///
    /// [`StateError::AlreadyRegistered`] if a continuation was already
    /// registered on this promise.
    pub fn completion_signal(&self) -> Result<Promise<()>, StateError> {
        let signal = Promise::pending(&self.inner.executor);
        let producer = signal.clone();
        self.on_completed(move || {
            // The signal has no other producer.
            let _ = producer.complete(());
        })?;
        Ok(signal)
    }

    /// Spawns `action` on the pool and returns a promise for its outcome.
    ///
    /// The action runs under the caller's ambient context. An `Ok` return
    /// completes the promise, an `Err` fails it; the promise is returned
    /// immediately without waiting.
    #[must_use]
    pub fn run<F>(executor: &WorkerPoolHandle, action: F) -> Self
    where
        F: FnOnce() -> Result<T, UserError> + Send + 'static,
        T: Send + 'static,
    {
        let promise = Self::pending(executor);
        let producer = promise.clone();
        executor.queue(move || {
            let spoken_for = match action() {
                Ok(value) => producer.complete(value),
                Err(error) => producer.fail(error),
            };
            if spoken_for.is_err() {
                trace!("spawned promise was completed externally before its action finished");
            }
        });
        promise
    }
}

impl<T: Clone> Promise<T> {
    /// Returns the stored outcome.
    ///
    /// An error outcome is returned as the original [`UserError`] — same
    /// underlying object, not a rewrapped message.
    ///
    /// # Panics
    ///
    /// Panics if the promise has not completed. Callers must only invoke
    /// this after observing completion.
    pub fn result(&self) -> Result<T, UserError> {
        match &lock(&self.inner.slots).outcome {
            Some(Ok(value)) => Ok(value.clone()),
            Some(Err(error)) => Err(error.clone()),
            None => panic!("Promise::result called before completion"),
        }
    }

    /// Returns the outcome if completed, without blocking.
    #[must_use]
    pub fn try_result(&self) -> Option<Result<T, UserError>> {
        match &lock(&self.inner.slots).outcome {
            Some(Ok(value)) => Some(Ok(value.clone())),
            Some(Err(error)) => Some(Err(error.clone())),
            None => None,
        }
    }

    /// Blocks the calling thread until the promise completes, then returns
    /// the outcome.
    ///
    /// If the promise is pending, this consumes the continuation slot with
    /// an internal continuation that releases the waiting thread.
    ///
    /// # Panics
    ///
    /// Panics if a continuation is already registered — blocking and a
    /// registered continuation are mutually exclusive uses of a promise.
    pub fn wait(&self) -> Result<T, UserError> {
        if !self.is_completed() {
            let signal = Arc::new(WaitSignal::new());
            let release = Arc::clone(&signal);
            // A completion racing ahead of this registration is fine: the
            // callback is then queued immediately and still sets the signal.
            if self.on_completed(move || release.set()).is_err() {
                panic!("Promise::wait requires the continuation slot, which is already taken");
            }
            signal.wait();
        }
        self.result()
    }
}

impl<T> fmt::Debug for Promise<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let slots = lock(&self.inner.slots);
        let state = match &slots.outcome {
            None => "pending",
            Some(Ok(_)) => "succeeded",
            Some(Err(_)) => "failed",
        };
        f.debug_struct("Promise")
            .field("state", &state)
            .field("registered", &slots.registered)
            .finish()
    }
}

/// One-shot done-flag a blocked waiter parks on.
struct WaitSignal {
    done: AtomicBool,
    mutex: Mutex<()>,
    condvar: Condvar,
}

impl WaitSignal {
    fn new() -> Self {
        Self {
            done: AtomicBool::new(false),
            mutex: Mutex::new(()),
            condvar: Condvar::new(),
        }
    }

    fn set(&self) {
        self.done.store(true, Ordering::Release);
        let _guard = self.mutex.lock().unwrap_or_else(PoisonError::into_inner);
        self.condvar.notify_all();
    }

    fn wait(&self) {
        let mut guard = self.mutex.lock().unwrap_or_else(PoisonError::into_inner);
        while !self.done.load(Ordering::Acquire) {
            guard = self
                .condvar
                .wait(guard)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }
}
