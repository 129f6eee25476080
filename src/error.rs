//! Error types for the promise engine.
//!
//! Two kinds of failure exist and they never mix:
//!
//! - [`StateError`]: a caller violated the single-writer / single-continuation
//!   protocol of a promise. These are programming errors surfaced as values so
//!   callers can assert on them.
//! - [`UserError`]: the error value a producer stored in a promise via
//!   [`fail`](crate::promise::Promise::fail), or returned from an action run
//!   through [`run`](crate::promise::Promise::run). A `UserError` is a shared
//!   handle to the original error object; cloning and re-raising it preserves
//!   identity rather than rewriting the message.

use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Protocol violations on a promise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum StateError {
    /// The promise was already completed; a promise completes exactly once.
    #[error("promise already completed")]
    AlreadyCompleted,

    /// A continuation was already registered; a promise holds at most one,
    /// even after it has fired.
    #[error("promise already has a continuation")]
    AlreadyRegistered,
}

/// A failure produced by user code, stored in a promise.
///
/// Internally an `Arc` around the original error object. Every clone taken
/// out of a promise — by [`result`](crate::promise::Promise::result), by
/// [`wait`](crate::promise::Promise::wait), or by the join combinator —
/// points at that same object, so [`UserError::same_error`] can verify that
/// an error observed downstream is *the* error raised at the source.
#[derive(Clone)]
pub struct UserError {
    inner: Arc<dyn StdError + Send + Sync>,
}

impl UserError {
    /// Wraps an error object.
    pub fn new<E>(error: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(error),
        }
    }

    /// Creates an error from a plain message.
    pub fn msg(text: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(MessageError(text.into())),
        }
    }

    /// Returns true if both handles refer to the same original error object.
    #[must_use]
    pub fn same_error(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Attempts to downcast the stored error to a concrete type.
    #[must_use]
    pub fn downcast_ref<E: StdError + 'static>(&self) -> Option<&E> {
        self.inner.downcast_ref()
    }
}

impl fmt::Debug for UserError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.inner, f)
    }
}

impl fmt::Display for UserError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.inner, f)
    }
}

impl StdError for UserError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        Some(self.inner.as_ref())
    }
}

/// Plain-text error used by [`UserError::msg`].
#[derive(Debug, Error)]
#[error("{0}")]
struct MessageError(String);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_error_display() {
        assert_eq!(
            StateError::AlreadyCompleted.to_string(),
            "promise already completed"
        );
        assert_eq!(
            StateError::AlreadyRegistered.to_string(),
            "promise already has a continuation"
        );
    }

    #[test]
    fn user_error_clones_share_identity() {
        let original = UserError::msg("boom");
        let observed = original.clone();

        assert!(original.same_error(&observed));
        assert_eq!(observed.to_string(), "boom");
    }

    #[test]
    fn distinct_errors_have_distinct_identity() {
        let a = UserError::msg("boom");
        let b = UserError::msg("boom");

        assert!(!a.same_error(&b));
    }

    #[test]
    fn downcast_recovers_concrete_type() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk gone");
        let error = UserError::new(io);

        let recovered = error.downcast_ref::<std::io::Error>();
        assert!(recovered.is_some());
        assert!(error.downcast_ref::<std::fmt::Error>().is_none());
    }
}
