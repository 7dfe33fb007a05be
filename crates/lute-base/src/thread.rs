// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Managed threads (created -> started -> joined | detached).
//!
//! `start()` does not return until the new thread has cached its own tid and
//! published it, so the tid is usable right after `start()`. Whatever the
//! thread function does after that races freely with the caller.
//!
//! A panic or [`Exception`](crate::Exception) escaping the thread function
//! aborts the process. Only [`current_thread::exit`] unwinds through.

use std::sync::atomic::{AtomicI32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use libc::pid_t;
use thiserror::Error;

use crate::current_thread;
use crate::fatal;
use crate::latch::CountDownLatch;

/// The work a [`Thread`] runs.
pub type ThreadFunc = Box<dyn FnOnce() + Send + 'static>;

/// OS label used when a thread is started with an empty name.
pub const DEFAULT_THREAD_NAME: &str = "LuteThread";

/// Names a thread takes after its function returns or fails.
pub const FINISHED_THREAD_NAME: &str = "finished";
pub const CRASHED_THREAD_NAME: &str = "crashed";

/// Source of the `Thread<N>` default-name suffix.
static NUM_CREATED: AtomicUsize = AtomicUsize::new(0);

/// Outcome of [`Thread::join`] when the thread did not return normally.
///
/// Every other failure of the thread function aborts the process before
/// `join` could observe it.
#[derive(Debug, Error)]
pub enum JoinError {
    /// The thread left through [`current_thread::exit`].
    #[error("thread exited before its function returned")]
    Exited,
}

/// A named OS thread with a synchronous startup handshake.
///
/// Dropping a started, unjoined `Thread` detaches it.
pub struct Thread {
    func: Option<ThreadFunc>,
    name: String,
    stack_size: Option<usize>,
    started: bool,
    joined: bool,
    tid: pid_t,
    handle: Option<JoinHandle<()>>,
}

impl Thread {
    /// Create a thread running `func`. An empty `name` picks `Thread<N>`.
    pub fn new<F>(func: F, name: impl Into<String>) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self::with_options(Box::new(func), name.into(), None)
    }

    pub fn builder() -> ThreadBuilder {
        ThreadBuilder::new()
    }

    fn with_options(func: ThreadFunc, name: String, stack_size: Option<usize>) -> Self {
        let num = NUM_CREATED.fetch_add(1, Ordering::Relaxed);
        let name = if name.is_empty() {
            format!("Thread{num}")
        } else {
            name
        };
        Self {
            func: Some(func),
            name,
            stack_size,
            started: false,
            joined: false,
            tid: 0,
            handle: None,
        }
    }

    /// Spawn the thread and wait until it has published its tid.
    ///
    /// Panics if the thread was already started; the panic aborts only under
    /// `panic = "abort"` or inside a managed thread. Aborts the process if
    /// the OS refuses to create the thread.
    pub fn start(&mut self) {
        assert!(!self.started, "thread {} already started", self.name);
        self.started = true;

        let Some(func) = self.func.take() else {
            fatal::invariant("unstarted thread lost its function")
        };
        let latch = Arc::new(CountDownLatch::new(1));
        let tid = Arc::new(AtomicI32::new(0));
        let data = ThreadData {
            func,
            name: self.name.clone(),
            tid: Some(tid.clone()),
            latch: Some(latch.clone()),
        };

        let mut builder = std::thread::Builder::new().name(os_label(&self.name));
        if let Some(size) = self.stack_size {
            builder = builder.stack_size(size);
        }

        thread_trace!(thread = %self.name, "spawning managed thread");
        match builder.spawn(move || data.run()) {
            Ok(handle) => self.handle = Some(handle),
            Err(err) => fatal::spawn_failure(&self.name, err),
        }

        latch.wait();
        self.tid = tid.load(Ordering::Acquire);
        assert!(self.tid > 0, "thread {} published no tid", self.name);
        thread_trace!(thread = %self.name, tid = self.tid, "managed thread started");
    }

    /// Block until the thread finishes.
    ///
    /// Panics unless the thread was started and not yet joined, with the same
    /// abort behaviour as [`start`](Self::start).
    pub fn join(&mut self) -> Result<(), JoinError> {
        assert!(self.started, "thread {} joined before start", self.name);
        assert!(!self.joined, "thread {} already joined", self.name);
        self.joined = true;

        let Some(handle) = self.handle.take() else {
            fatal::invariant("started thread lost its handle")
        };
        thread_trace!(thread = %self.name, tid = self.tid, "joining managed thread");
        let Err(payload) = handle.join() else {
            return Ok(());
        };
        if fatal::classify(payload.as_ref()).is_fatal() {
            let reason = fatal::payload_message(payload.as_ref());
            let what = format!("{} unwound past containment: {reason}", self.name);
            fatal::invariant(&what);
        }
        Err(JoinError::Exited)
    }

    pub fn started(&self) -> bool {
        self.started
    }

    pub fn joined(&self) -> bool {
        self.joined
    }

    /// Kernel tid of the spawned thread; 0 before `start()`.
    pub fn tid(&self) -> pid_t {
        self.tid
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of `Thread`s constructed in this process.
    pub fn num_created() -> usize {
        NUM_CREATED.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for Thread {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Thread")
            .field("name", &self.name)
            .field("tid", &self.tid)
            .field("started", &self.started)
            .field("joined", &self.joined)
            .finish_non_exhaustive()
    }
}

impl Drop for Thread {
    fn drop(&mut self) {
        if self.started && !self.joined {
            thread_trace!(thread = %self.name, tid = self.tid, "detaching managed thread");
            // Dropping a JoinHandle detaches the thread.
            drop(self.handle.take());
        }
    }
}

/// Configuration for a [`Thread`].
#[derive(Debug, Default, Clone)]
pub struct ThreadBuilder {
    name: Option<String>,
    stack_size: Option<usize>,
}

impl ThreadBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Stack size in bytes. Defaults to std's (see `RUST_MIN_STACK`).
    pub fn stack_size(mut self, size: usize) -> Self {
        self.stack_size = Some(size);
        self
    }

    pub fn build<F>(self, func: F) -> Thread
    where
        F: FnOnce() + Send + 'static,
    {
        Thread::with_options(
            Box::new(func),
            self.name.unwrap_or_default(),
            self.stack_size,
        )
    }
}

/// State moved into the new thread.
struct ThreadData {
    func: ThreadFunc,
    name: String,
    tid: Option<Arc<AtomicI32>>,
    latch: Option<Arc<CountDownLatch>>,
}

impl ThreadData {
    fn run(mut self) {
        if let Some(tid) = self.tid.take() {
            tid.store(current_thread::tid(), Ordering::Release);
        }
        if let Some(latch) = self.latch.take() {
            latch.count_down();
        }

        let ThreadData { func, name, .. } = self;
        if name.is_empty() {
            current_thread::set_name(DEFAULT_THREAD_NAME);
        } else {
            current_thread::set_name(name.clone());
        }

        match std::panic::catch_unwind(std::panic::AssertUnwindSafe(func)) {
            Ok(()) => current_thread::set_name(FINISHED_THREAD_NAME),
            Err(payload) => {
                current_thread::set_name(CRASHED_THREAD_NAME);
                fatal::contain(&name, payload);
            }
        }
    }
}

/// OS-visible label: NUL bytes dropped, empty names replaced.
fn os_label(name: &str) -> String {
    let label: String = name.chars().filter(|&c| c != '\0').collect();
    if label.is_empty() {
        DEFAULT_THREAD_NAME.to_string()
    } else {
        label
    }
}
