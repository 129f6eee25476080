//! Byte-stream collaborator traits consumed by the sequence runner.
//!
//! These are the external seams a sequential asynchronous algorithm pulls
//! sub-operations from: a source whose `read` yields a promise of the byte
//! count (0 signals end of stream) and a sink whose `write` yields a unit
//! promise. The buffer is shared between the caller and the eventual
//! completion, so it travels as an `Arc`.
//!
//! In-memory implementations are provided for tests and examples; anything
//! honoring the trait contracts is interchangeable.

use std::sync::{Arc, Mutex, PoisonError};

use crate::error::UserError;
use crate::pool::WorkerPoolHandle;
use crate::promise::Promise;

/// A buffer shared between a caller and an in-flight operation.
pub type SharedBuffer = Arc<Mutex<Vec<u8>>>;

/// Creates a [`SharedBuffer`] of `size` zeroed bytes.
#[must_use]
pub fn shared_buffer(size: usize) -> SharedBuffer {
    Arc::new(Mutex::new(vec![0; size]))
}

/// An asynchronous byte source.
pub trait ByteSource: Send {
    /// Starts a read into `buffer`, returning a promise of the number of
    /// bytes read. 0 signals end of stream.
    fn read(&mut self, buffer: SharedBuffer) -> Promise<usize>;
}

/// An asynchronous byte sink.
pub trait ByteSink: Send {
    /// Starts a write of the first `len` bytes of `buffer`.
    fn write(&mut self, buffer: SharedBuffer, len: usize) -> Promise<()>;
}

/// An in-memory [`ByteSource`] serving a fixed payload in bounded chunks.
pub struct MemoryByteSource {
    executor: WorkerPoolHandle,
    data: Vec<u8>,
    position: usize,
    max_chunk: usize,
}

impl MemoryByteSource {
    /// Creates a source over `data`, serving at most `max_chunk` bytes per
    /// read.
    ///
    /// # Panics
    ///
    /// Panics if `max_chunk` is 0.
    #[must_use]
    pub fn new(executor: &WorkerPoolHandle, data: Vec<u8>, max_chunk: usize) -> Self {
        assert!(max_chunk > 0, "reads must make progress");
        Self {
            executor: executor.clone(),
            data,
            position: 0,
            max_chunk,
        }
    }
}

impl ByteSource for MemoryByteSource {
    fn read(&mut self, buffer: SharedBuffer) -> Promise<usize> {
        let mut guard = buffer.lock().unwrap_or_else(PoisonError::into_inner);
        let remaining = self.data.len() - self.position;
        let count = remaining.min(self.max_chunk).min(guard.len());

        guard[..count].copy_from_slice(&self.data[self.position..self.position + count]);
        self.position += count;
        drop(guard);

        Promise::ready(&self.executor, count)
    }
}

/// An in-memory [`ByteSink`] accumulating everything written to it.
pub struct MemoryByteSink {
    executor: WorkerPoolHandle,
    written: Arc<Mutex<Vec<u8>>>,
    fail_with: Option<UserError>,
}

impl MemoryByteSink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new(executor: &WorkerPoolHandle) -> Self {
        Self {
            executor: executor.clone(),
            written: Arc::new(Mutex::new(Vec::new())),
            fail_with: None,
        }
    }

    /// Makes every subsequent write fail with `error`.
    pub fn fail_writes_with(&mut self, error: UserError) {
        self.fail_with = Some(error);
    }

    /// Returns a handle to the accumulated bytes.
    #[must_use]
    pub fn contents(&self) -> Arc<Mutex<Vec<u8>>> {
        Arc::clone(&self.written)
    }
}

impl ByteSink for MemoryByteSink {
    fn write(&mut self, buffer: SharedBuffer, len: usize) -> Promise<()> {
        if let Some(error) = &self.fail_with {
            return Promise::failed(&self.executor, error.clone());
        }

        let guard = buffer.lock().unwrap_or_else(PoisonError::into_inner);
        self.written
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend_from_slice(&guard[..len]);

        Promise::ready(&self.executor, ())
    }
}
