//! Combinators: composing promises into new promises.
//!
//! A promise supports exactly one continuation, so fan-in and time-based
//! composition go through combinators rather than multiple registrations:
//!
//! - [`join`]: wait for all of several promises ([`when_all`])
//! - [`delay`](mod@delay): a promise gated on elapsed time ([`delay()`](delay::delay))

pub mod delay;
pub mod join;

pub use delay::delay;
pub use join::when_all;
