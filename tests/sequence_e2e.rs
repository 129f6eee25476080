//! End-to-end sequence-runner scenarios: a resumable stream-copy state
//! machine driven over the byte-stream collaborator traits, and failure
//! propagation through a chain of real sub-operations.

use promisecell::io::{shared_buffer, ByteSink, ByteSource, MemoryByteSink, MemoryByteSource, SharedBuffer};
use promisecell::test_utils::{init_test_logging, TEST_WAIT};
use promisecell::{run_sequence, Promise, Step, UserError, WorkerPool, WorkerPoolHandle};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// The copy algorithm as an explicit resumable state object: captured
/// locals in fields, resume points encoded by which pending promise is set.
struct CopySteps<S, D> {
    source: S,
    sink: D,
    buffer: SharedBuffer,
    pending_read: Option<Promise<usize>>,
    pending_write: Option<Promise<()>>,
    finished: bool,
}

impl<S: ByteSource, D: ByteSink> CopySteps<S, D> {
    fn new(source: S, sink: D, buffer_size: usize) -> Self {
        Self {
            source,
            sink,
            buffer: shared_buffer(buffer_size),
            pending_read: None,
            pending_write: None,
            finished: false,
        }
    }
}

impl<S: ByteSource, D: ByteSink> Iterator for CopySteps<S, D> {
    type Item = Step;

    fn next(&mut self) -> Option<Step> {
        if self.finished {
            return None;
        }

        // Resume after a write: surface its outcome before reading again.
        if let Some(write) = self.pending_write.take() {
            if let Err(error) = write.result() {
                self.finished = true;
                return Some(Err(error));
            }
        }

        // Resume after a read: 0 is end of stream, otherwise write it out.
        if let Some(read) = self.pending_read.take() {
            return match read.result() {
                Err(error) => {
                    self.finished = true;
                    Some(Err(error))
                }
                Ok(0) => {
                    self.finished = true;
                    None
                }
                Ok(count) => {
                    let write = self.sink.write(Arc::clone(&self.buffer), count);
                    self.pending_write = Some(write.clone());
                    Some(Ok(write))
                }
            };
        }

        // Start the next read; the runner resumes us when it completes.
        let read = self.source.read(Arc::clone(&self.buffer));
        let step = read
            .completion_signal()
            .expect("runner owns the read promise's slot");
        self.pending_read = Some(read);
        Some(Ok(step))
    }
}

#[test]
fn copies_a_stream_through_the_runner() {
    init_test_logging();
    let pool = WorkerPool::new(2);
    let executor = pool.handle();

    let payload: Vec<u8> = (0..=255_u8).cycle().take(1000).collect();
    let source = MemoryByteSource::new(&executor, payload.clone(), 64);
    let sink = MemoryByteSink::new(&executor);
    let written = sink.contents();

    let overall = run_sequence(&executor, CopySteps::new(source, sink, 64));
    overall.wait().expect("copy succeeded");

    assert_eq!(*written.lock().expect("unpoisoned"), payload);
}

#[test]
fn empty_source_copies_nothing() {
    init_test_logging();
    let pool = WorkerPool::new(1);
    let executor = pool.handle();

    let source = MemoryByteSource::new(&executor, Vec::new(), 16);
    let sink = MemoryByteSink::new(&executor);
    let written = sink.contents();

    run_sequence(&executor, CopySteps::new(source, sink, 16))
        .wait()
        .expect("copy of nothing succeeds");
    assert!(written.lock().expect("unpoisoned").is_empty());
}

#[test]
fn sink_failure_stops_the_copy_with_the_original_error() {
    init_test_logging();
    let pool = WorkerPool::new(2);
    let executor = pool.handle();

    let source = MemoryByteSource::new(&executor, vec![7; 100], 10);
    let mut sink = MemoryByteSink::new(&executor);
    let original = UserError::msg("disk detached");
    sink.fail_writes_with(original.clone());

    let observed = run_sequence(&executor, CopySteps::new(source, sink, 10))
        .wait()
        .expect_err("copy failed");
    assert!(observed.same_error(&original));
}

/// Steps whose sub-operations run on the pool, failing at a chosen index;
/// counts pulls and completed side effects.
struct FailingChain {
    executor: WorkerPoolHandle,
    pulled: Arc<AtomicUsize>,
    completed: Arc<AtomicUsize>,
    fail_at: usize,
    total: usize,
    index: usize,
    last: Option<Promise<()>>,
}

impl Iterator for FailingChain {
    type Item = Step;

    fn next(&mut self) -> Option<Step> {
        if let Some(previous) = self.last.take() {
            if let Err(error) = previous.result() {
                return Some(Err(error));
            }
        }
        if self.index == self.total {
            return None;
        }

        self.index += 1;
        self.pulled.fetch_add(1, Ordering::Relaxed);
        let step_index = self.index;
        let fails = step_index == self.fail_at;
        let completed = Arc::clone(&self.completed);

        let step = Promise::run(&self.executor, move || {
            if fails {
                Err(UserError::msg(format!("step {step_index}")))
            } else {
                completed.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
        });
        self.last = Some(step.clone());
        Some(Ok(step))
    }
}

#[test]
fn later_steps_never_run_after_a_failure() {
    init_test_logging();
    let pool = WorkerPool::new(2);
    let executor = pool.handle();

    for fail_at in [1, 3, 7] {
        let pulled = Arc::new(AtomicUsize::new(0));
        let completed = Arc::new(AtomicUsize::new(0));
        let chain = FailingChain {
            executor: executor.clone(),
            pulled: Arc::clone(&pulled),
            completed: Arc::clone(&completed),
            fail_at,
            total: 10,
            index: 0,
            last: None,
        };

        let error = run_sequence(&executor, chain)
            .wait()
            .expect_err("chain failed");

        assert!(error.to_string().contains(&format!("step {fail_at}")));
        assert_eq!(pulled.load(Ordering::Relaxed), fail_at);
        assert_eq!(completed.load(Ordering::Relaxed), fail_at - 1);
    }
}

#[test]
fn sums_accumulated_across_steps() {
    init_test_logging();
    let pool = WorkerPool::new(2);
    let executor = pool.handle();
    let total = Arc::new(AtomicUsize::new(0));

    let per_step = Arc::clone(&total);
    let spawner = executor.clone();
    let steps = (1..=10_usize).map(move |k| {
        let total = Arc::clone(&per_step);
        Ok(Promise::run(&spawner, move || {
            total.fetch_add(k, Ordering::Relaxed);
            Ok(())
        }))
    });

    run_sequence(&executor, steps).wait().expect("succeeded");
    assert_eq!(total.load(Ordering::Relaxed), 55);
}

#[test]
fn overall_promise_is_returned_before_the_chain_finishes() {
    init_test_logging();
    let pool = WorkerPool::new(1);
    let executor = pool.handle();

    let gate: Promise<()> = Promise::pending(&executor);
    let overall = run_sequence(&executor, std::iter::once(Ok(gate.clone())));

    assert!(!overall.is_completed());
    gate.complete(()).expect("sole producer");
    promisecell::test_utils::wait_bounded(&overall, TEST_WAIT).expect("chain finished");
}
