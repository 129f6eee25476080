//! Promisecell: a hand-built future/promise engine with explicit plumbing.
//!
//! # Overview
//!
//! This crate implements the asynchronous execution primitive usually hidden
//! inside a language runtime, with every moving part explicit: a
//! single-writer completion cell ([`Promise`]), the worker pool that is the
//! only place continuations run ([`WorkerPool`]), combinators for joining
//! and delaying ([`when_all`], [`delay`]), and a trampolined driver for
//! sequential asynchronous algorithms ([`run_sequence`]) — all without
//! coroutine syntax.
//!
//! # Core Guarantees
//!
//! - **Write-once**: a promise completes exactly once; later attempts error
//! - **Single continuation**: at most one registration, ever; fan-in goes
//!   through combinators
//! - **Never inline**: continuations are always dispatched on the pool,
//!   never run on the completing or registering thread
//! - **Context propagation**: the ambient context captured at registration
//!   is restored around the continuation, wherever it runs
//! - **First error wins**: joins keep the first observed error; sequences
//!   stop at the first error anywhere in the chain
//!
//! # Module Structure
//!
//! - [`promise`]: the completion cell
//! - [`pool`]: the worker-pool executor
//! - [`context`]: ambient-context snapshots
//! - [`awaiter`]: the three-operation awaiter contract
//! - [`combinator`]: join and delay
//! - [`timer`]: the one-shot timer driver behind delay
//! - [`sequence`]: the sequence runner
//! - [`io`]: byte-stream collaborator traits
//! - [`error`]: protocol and user error types
//!
//! # Example
//!
//! ```
//! use promisecell::{Promise, WorkerPool};
//!
//! let pool = WorkerPool::new(2);
//! let promise = Promise::run(&pool.handle(), || Ok((0..100_u64).sum::<u64>()));
//! assert_eq!(promise.wait().unwrap(), 4950);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::module_name_repetitions)]

pub mod awaiter;
pub mod combinator;
pub mod context;
pub mod error;
pub mod io;
pub mod pool;
pub mod promise;
pub mod sequence;
pub mod test_utils;
pub mod timer;
pub mod tracing_compat;

pub use awaiter::Awaitable;
pub use combinator::{delay, when_all};
pub use context::AmbientContext;
pub use error::{StateError, UserError};
pub use pool::{WorkerPool, WorkerPoolHandle, WorkerPoolOptions};
pub use promise::Promise;
pub use sequence::{run_sequence, Step};
pub use timer::{TimerDriver, TimerDriverHandle};
