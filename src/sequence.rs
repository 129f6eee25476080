//! Sequence runner: drives a lazily produced chain of sub-operations to one
//! overall promise.
//!
//! This is the general mechanism for sequential asynchronous control flow
//! without coroutine syntax: the algorithm is expressed as an [`Iterator`]
//! of steps, pulled one at a time, where each pull either yields the promise
//! of the next sub-operation, raises an error, or signals exhaustion.
//!
//! # Step protocol
//!
//! `Item = Result<Promise<()>, UserError>`:
//!
//! - `Some(Ok(promise))` — one pending sub-operation; the runner resumes
//!   pulling once it completes.
//! - `Some(Err(error))` — pulling raised. The overall promise fails with
//!   that error and nothing further is pulled. Step iterators observe the
//!   outcome of previously yielded promises with
//!   [`result`](crate::promise::Promise::result) and surface failures this
//!   way, so an error inside a sub-operation also stops the sequence.
//! - `None` — exhausted; the overall promise succeeds.
//!
//! The sequence is consumed once and is not restartable.
//!
//! # Stack discipline
//!
//! Every resume is dispatched through the worker pool as the yielded
//! promise's continuation — never by calling back into the driver on the
//! current stack. A string of already-completed steps therefore costs queue
//! hops, not stack frames, no matter how long it is.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::error::UserError;
use crate::pool::WorkerPoolHandle;
use crate::promise::Promise;
use crate::tracing_compat::{debug, trace};

/// One step of a sequence: the next sub-operation, or the error raised
/// while producing it.
pub type Step = Result<Promise<()>, UserError>;

struct SequenceState<I> {
    steps: Mutex<I>,
    overall: Promise<()>,
}

fn lock<I>(steps: &Mutex<I>) -> MutexGuard<'_, I> {
    steps.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Runs a step sequence to completion, returning the overall promise.
///
/// The first step is pulled on the calling thread; every later step is
/// pulled on a worker after its predecessor completes. The first error —
/// whether raised by a pull or observed by the iterator in a completed
/// sub-operation — fails the overall promise, and no later step is pulled.
pub fn run_sequence<I>(executor: &WorkerPoolHandle, steps: I) -> Promise<()>
where
    I: Iterator<Item = Step> + Send + 'static,
{
    let overall = Promise::pending(executor);
    let state = Arc::new(SequenceState {
        steps: Mutex::new(steps),
        overall: overall.clone(),
    });
    drive(&state);
    overall
}

/// Pulls one step and re-arms itself as the yielded promise's continuation.
fn drive<I>(state: &Arc<SequenceState<I>>)
where
    I: Iterator<Item = Step> + Send + 'static,
{
    let step = lock(&state.steps).next();
    match step {
        None => {
            trace!("sequence exhausted");
            // The runner is the overall promise's sole producer.
            let completed = state.overall.complete(());
            debug_assert!(completed.is_ok());
        }
        Some(Err(error)) => {
            debug!(%error, "sequence step raised, failing overall promise");
            let failed = state.overall.fail(error);
            debug_assert!(failed.is_ok());
        }
        Some(Ok(promise)) => {
            let resume = Arc::clone(state);
            if promise.on_completed(move || drive(&resume)).is_err() {
                let failed = state
                    .overall
                    .fail(UserError::msg("sequence step already has a continuation"));
                debug_assert!(failed.is_ok());
            }
        }
    }
}
