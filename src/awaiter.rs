//! The awaiter contract: the minimal surface a sequential-looking call site
//! needs from a future.
//!
//! Any driver of sequential asynchronous control flow — a hand-written loop,
//! the [`sequence`](crate::sequence) runner, or generated resumable state
//! machines — needs exactly three operations from the thing it suspends on:
//! a non-blocking completion query, a one-shot continuation hook, and an
//! outcome accessor. [`Awaitable`] pins those down; implementations are
//! interchangeable at call sites.

use crate::error::{StateError, UserError};
use crate::promise::Promise;

/// The three-operation awaiter contract.
pub trait Awaitable {
    /// The success value produced on completion.
    type Output;

    /// Non-blocking completion query.
    fn is_completed(&self) -> bool;

    /// Registers the continuation: invoked exactly once, with no arguments,
    /// strictly after completion and never on the registering thread.
    ///
    /// # Errors
    ///
    /// [`StateError::AlreadyRegistered`] if a continuation was already
    /// registered.
    fn on_completed(&self, callback: Box<dyn FnOnce() + Send>) -> Result<(), StateError>;

    /// Returns the success value or re-raises the stored error.
    ///
    /// Only valid after completion has been observed.
    fn result(&self) -> Result<Self::Output, UserError>;
}

impl<T: Clone> Awaitable for Promise<T> {
    type Output = T;

    fn is_completed(&self) -> bool {
        Self::is_completed(self)
    }

    fn on_completed(&self, callback: Box<dyn FnOnce() + Send>) -> Result<(), StateError> {
        Self::on_completed(self, callback)
    }

    fn result(&self) -> Result<T, UserError> {
        Self::result(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::WorkerPool;
    use std::sync::mpsc;
    use std::time::Duration;

    fn drive_to_completion<A>(awaitable: &A) -> Result<A::Output, UserError>
    where
        A: Awaitable,
    {
        // A call site written purely against the contract.
        if !awaitable.is_completed() {
            let (tx, rx) = mpsc::channel();
            awaitable
                .on_completed(Box::new(move || {
                    tx.send(()).expect("receiver alive");
                }))
                .expect("single registration");
            rx.recv_timeout(Duration::from_secs(5)).expect("completion");
        }
        awaitable.result()
    }

    #[test]
    fn promise_satisfies_the_contract() {
        let pool = WorkerPool::new(2);
        let promise = Promise::run(&pool.handle(), || Ok(21_u32));

        assert_eq!(drive_to_completion(&promise).expect("succeeded"), 21);
    }

    #[test]
    fn contract_observes_failure() {
        let pool = WorkerPool::new(1);
        let original = UserError::msg("contract failure");
        let promise: Promise<()> = Promise::failed(&pool.handle(), original.clone());

        assert!(promise.is_completed());
        let observed = drive_to_completion(&promise).expect_err("failed");
        assert!(observed.same_error(&original));
    }
}
