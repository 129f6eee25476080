//! Ambient context: an explicit, immutable snapshot of cross-cutting state.
//!
//! Continuations often need to observe contextual state — a logical call
//! identifier, a tenant, a locale — that was in effect where the continuation
//! was *registered*, not where it happens to run. [`AmbientContext`] makes
//! that propagation explicit: it is a copyable value snapshot, captured
//! synchronously at registration time and reinstalled around the
//! continuation's execution on whatever worker thread picks it up.
//!
//! There is no hidden thread-local magic leaking across tasks: the only
//! thread-local here is the *current* snapshot, and the worker pool swaps it
//! in and out around each work item via [`AmbientContext::run`].
//!
//! # Example
//!
//! ```
//! use promisecell::AmbientContext;
//!
//! AmbientContext::set("request-id", 7_u64);
//! let snapshot = AmbientContext::capture();
//!
//! // Possibly on another thread:
//! snapshot.run(|| {
//!     assert_eq!(AmbientContext::get::<u64>("request-id").as_deref(), Some(&7));
//! });
//! ```

use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// A value stored in an ambient context.
type ContextValue = Arc<dyn Any + Send + Sync>;

thread_local! {
    static CURRENT: RefCell<AmbientContext> = RefCell::new(AmbientContext::empty());
}

/// An immutable, copyable snapshot of ambient state.
///
/// Snapshots share their backing map; mutation always produces a new
/// snapshot. A captured context therefore never observes later writes on the
/// capturing thread.
#[derive(Clone, Default)]
pub struct AmbientContext {
    values: Arc<HashMap<String, ContextValue>>,
}

impl AmbientContext {
    /// Returns the empty context.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Captures the calling thread's current ambient state.
    #[must_use]
    pub fn capture() -> Self {
        CURRENT.with(|current| current.borrow().clone())
    }

    /// Returns a value from the calling thread's current ambient state.
    #[must_use]
    pub fn get<T: Send + Sync + 'static>(key: &str) -> Option<Arc<T>> {
        Self::capture().value(key)
    }

    /// Stores a value into the calling thread's current ambient state.
    ///
    /// Snapshots captured before this call are unaffected.
    pub fn set<T: Send + Sync + 'static>(key: impl Into<String>, value: T) {
        CURRENT.with(|current| {
            let next = current.borrow().with_value(key, value);
            *current.borrow_mut() = next;
        });
    }

    /// Returns a value from this snapshot.
    #[must_use]
    pub fn value<T: Send + Sync + 'static>(&self, key: &str) -> Option<Arc<T>> {
        self.values
            .get(key)
            .and_then(|value| Arc::clone(value).downcast::<T>().ok())
    }

    /// Returns a new snapshot with `key` bound to `value`.
    #[must_use]
    pub fn with_value<T: Send + Sync + 'static>(&self, key: impl Into<String>, value: T) -> Self {
        let mut values: HashMap<String, ContextValue> = (*self.values).clone();
        values.insert(key.into(), Arc::new(value));
        Self {
            values: Arc::new(values),
        }
    }

    /// Returns the number of bound keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns true if no keys are bound.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Runs `f` with this snapshot installed as the thread's ambient state,
    /// restoring the previous state afterwards.
    ///
    /// The previous state is restored even if `f` unwinds.
    pub fn run<R>(&self, f: impl FnOnce() -> R) -> R {
        let prior = CURRENT.with(|current| current.replace(self.clone()));
        let _restore = Restore { prior: Some(prior) };
        f()
    }
}

impl fmt::Debug for AmbientContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<&str> = self.values.keys().map(String::as_str).collect();
        keys.sort_unstable();
        f.debug_struct("AmbientContext").field("keys", &keys).finish()
    }
}

/// Reinstalls the prior ambient state on drop.
struct Restore {
    prior: Option<AmbientContext>,
}

impl Drop for Restore {
    fn drop(&mut self) {
        if let Some(prior) = self.prior.take() {
            CURRENT.with(|current| {
                *current.borrow_mut() = prior;
            });
        }
    }
}
