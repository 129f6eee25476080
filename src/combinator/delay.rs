//! Delay combinator: a promise gated on elapsed time.

use std::time::Duration;

use crate::pool::WorkerPoolHandle;
use crate::promise::Promise;
use crate::timer::TimerDriverHandle;

/// Returns a promise that succeeds no earlier than `duration` from now.
///
/// The timer is one-shot and not cancellable; the armed entry is removed
/// from the driver when it fires. Continuations dispatch on `executor`.
///
/// # Panics
///
/// Panics if the timer driver has been shut down.
#[must_use]
pub fn delay(
    timer: &TimerDriverHandle,
    executor: &WorkerPoolHandle,
    duration: Duration,
) -> Promise<()> {
    timer.schedule(executor, duration)
}
