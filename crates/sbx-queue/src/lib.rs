//! sbx-queue: a bounded task dispatcher with a fixed worker pool.
//!
//! Submission blocks when the pending queue is full (backpressure, no
//! silent drops). Completed work is reported over three streams — results,
//! errors, and a side-band tag stream for progress accounting — all of
//! which must have their consumers attached before the first submission.

pub mod counter;
pub mod queue;

pub use counter::AtomicCounter;
pub use queue::{QueueStreams, TaskError, WorkingQueue};
