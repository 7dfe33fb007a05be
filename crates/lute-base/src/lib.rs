// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Lute base concurrency primitives.
//!
//! OS threads only: no pool, no task queue, no cooperative scheduler.
//! Every blocking call waits to completion; there are no timeouts and no
//! cancellation.
//!
//! Components:
//! - current_thread: cached tid/name of the calling thread, fork-aware
//! - mutex/condition: non-reentrant lock with holder tracking, guard-only access
//! - latch: one-shot countdown barrier
//! - thread: managed worker thread with a synchronous startup handshake
//! - exception/fatal: crash containment at the thread boundary

macro_rules! thread_trace {
    ($($arg:tt)*) => {
        #[cfg(feature = "thread-debug")]
        tracing::trace!($($arg)*);
    };
}

pub mod condition;
pub mod current_thread;
pub mod exception;
pub mod fatal;
pub mod latch;
pub mod mutex;
pub mod thread;

pub use condition::Condition;
pub use exception::Exception;
pub use latch::CountDownLatch;
pub use mutex::{Mutex, MutexGuard};
pub use thread::{JoinError, Thread, ThreadBuilder};
