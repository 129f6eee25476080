//! Join combinator: one promise that completes when all inputs have.
//!
//! # Semantics
//!
//! `when_all(inputs)`:
//! 1. Register one identical continuation on every input.
//! 2. Each firing decrements a shared remaining-count and records the first
//!    error it observes (set-if-empty; later errors are discarded).
//! 3. The last firing completes the joined promise — failure with the
//!    recorded error if any input failed, success otherwise.
//!
//! **Key property**: no short-circuiting. A failure on one input does not
//! cancel or skip the others; every input runs to completion and the joined
//! promise completes only after the last of them.
//!
//! **Lossy error policy**: only the first observed error survives; sibling
//! errors from other inputs are dropped. This is a documented limitation of
//! the join, not an aggregation mechanism.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

use crate::error::{StateError, UserError};
use crate::promise::Promise;
use crate::tracing_compat::trace;

/// Joins two or more unit promises into one.
///
/// The joined promise dispatches continuations on the first input's pool.
/// Sibling continuations may run concurrently on different workers; no
/// ordering is guaranteed between them.
///
/// # Errors
///
/// [`StateError::AlreadyRegistered`] if any input already holds a
/// continuation — composition must own every input's continuation slot.
/// Inputs registered before the failing one keep their (now harmless)
/// join continuations.
///
/// # Panics
///
/// Panics if fewer than two promises are supplied.
pub fn when_all(promises: Vec<Promise<()>>) -> Result<Promise<()>, StateError> {
    assert!(
        promises.len() >= 2,
        "when_all joins two or more promises"
    );

    let joined = Promise::pending(promises[0].executor());
    let remaining = Arc::new(AtomicUsize::new(promises.len()));
    let first_error: Arc<OnceLock<UserError>> = Arc::new(OnceLock::new());

    for promise in promises {
        let joined = joined.clone();
        let remaining = Arc::clone(&remaining);
        let first_error = Arc::clone(&first_error);
        let observed = promise.clone();

        promise.on_completed(move || {
            if let Err(error) = observed.result() {
                // Set-if-empty: the first error wins, siblings are dropped.
                let _ = first_error.set(error);
            }

            if remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
                trace!("all joined promises completed");
                let outcome = match first_error.get() {
                    Some(error) => joined.fail(error.clone()),
                    None => joined.complete(()),
                };
                // The join is the joined promise's sole producer.
                debug_assert!(outcome.is_ok());
            }
        })?;
    }

    Ok(joined)
}
