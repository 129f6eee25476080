//! Shared helpers for unit and integration tests.
//!
//! - Logging initialization that is safe to call from every test
//! - Bounded waiting, so a broken dispatch path fails a test instead of
//!   hanging it

use std::time::{Duration, Instant};

use crate::error::UserError;
use crate::promise::Promise;

/// Default bound for test waits.
pub const TEST_WAIT: Duration = Duration::from_secs(5);

/// Initialize test logging once per process.
///
/// With the `tracing-integration` feature this installs a trace-level
/// subscriber writing through the test harness; without it, it is a no-op.
/// Safe to call from every test.
pub fn init_test_logging() {
    #[cfg(feature = "tracing-integration")]
    {
        use std::sync::Once;
        static INIT: Once = Once::new();
        INIT.call_once(|| {
            let _ = tracing_subscriber::fmt()
                .with_max_level(tracing::Level::TRACE)
                .with_test_writer()
                .with_thread_ids(true)
                .with_ansi(false)
                .try_init();
        });
    }
}

/// Waits for `promise` with a deadline, panicking if it does not complete.
///
/// Unlike [`Promise::wait`] this does not consume the continuation slot, so
/// a test can still assert on registration behavior afterwards.
///
/// # Panics
///
/// Panics if the promise is still pending after `timeout`.
pub fn wait_bounded<T: Clone>(promise: &Promise<T>, timeout: Duration) -> Result<T, UserError> {
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(outcome) = promise.try_result() {
            return outcome;
        }
        assert!(
            Instant::now() < deadline,
            "promise still pending after {timeout:?}"
        );
        std::thread::sleep(Duration::from_millis(1));
    }
}
