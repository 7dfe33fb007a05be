// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Identity of the calling thread.
//!
//! The kernel tid is fetched with `gettid(2)` once per thread and cached in a
//! thread-local. The tid is a small positive integer, unique across the
//! system at any instant, and matches `/proc/<pid>/task/<tid>`, which makes it
//! the id of choice for log lines.
//!
//! After `fork(2)` the child inherits the forking thread's thread-locals, so a
//! `pthread_atfork` child handler clears the cache and recomputes it before
//! `fork` returns in the child.

use std::borrow::Cow;
use std::cell::{Cell, RefCell};
use std::fmt::Write as _;
use std::sync::Once;
use std::time::Duration;

use libc::pid_t;

use crate::fatal::ExitSignal;

/// Name reported for the process's initial thread.
pub const MAIN_THREAD_NAME: &str = "main";

/// Name reported for threads this crate did not name.
pub const UNKNOWN_THREAD_NAME: &str = "unknown";

thread_local! {
    static CACHED_TID: Cell<pid_t> = const { Cell::new(0) };
    static TID_STRING: RefCell<String> = const { RefCell::new(String::new()) };
    static THREAD_NAME: RefCell<Option<Cow<'static, str>>> = const { RefCell::new(None) };
}

static FORK_HOOK: Once = Once::new();

fn gettid() -> pid_t {
    // SAFETY: SYS_gettid takes no arguments and cannot fail.
    unsafe { libc::syscall(libc::SYS_gettid) as pid_t }
}

/// Register the fork hook. Runs once per process, on the first cache miss.
fn register_fork_hook() {
    FORK_HOOK.call_once(|| {
        // SAFETY: `after_fork` only touches thread-locals of the calling
        // thread, which is the only thread alive in the child.
        let ret = unsafe { libc::pthread_atfork(None, None, Some(after_fork)) };
        if ret != 0 {
            tracing::warn!(
                errno = ret,
                "pthread_atfork failed; forked children may report a stale tid"
            );
        }
    });
}

unsafe extern "C" fn after_fork() {
    let _ = CACHED_TID.try_with(|tid| tid.set(0));
    let _ = TID_STRING.try_with(|s| {
        if let Ok(mut s) = s.try_borrow_mut() {
            s.clear();
        }
    });
    let _ = THREAD_NAME.try_with(|name| {
        if let Ok(mut name) = name.try_borrow_mut() {
            *name = Some(Cow::Borrowed(MAIN_THREAD_NAME));
        }
    });
    tid();
}

#[cold]
fn cache_tid() -> pid_t {
    register_fork_hook();
    let tid = gettid();
    CACHED_TID.with(|cached| cached.set(tid));
    tid
}

/// Kernel thread id of the calling thread. One syscall per thread, then a
/// thread-local read.
#[inline]
pub fn tid() -> pid_t {
    let cached = CACHED_TID.with(Cell::get);
    if cached != 0 {
        cached
    } else {
        cache_tid()
    }
}

/// The tid as a right-aligned, 5-wide decimal followed by a space.
pub fn tid_string() -> String {
    let tid = tid();
    TID_STRING.with(|s| {
        let mut s = s.borrow_mut();
        if s.is_empty() {
            let _ = write!(s, "{tid:5} ");
        }
        s.clone()
    })
}

/// Name of the calling thread as tracked by this crate.
pub fn name() -> String {
    let assigned = THREAD_NAME.with(|name| name.borrow().clone());
    match assigned {
        Some(name) => name.into_owned(),
        None if is_main_thread() => MAIN_THREAD_NAME.to_string(),
        None => UNKNOWN_THREAD_NAME.to_string(),
    }
}

pub(crate) fn set_name(name: impl Into<Cow<'static, str>>) {
    let name = name.into();
    THREAD_NAME.with(|slot| *slot.borrow_mut() = Some(name));
}

/// True on the thread whose tid equals the process id.
pub fn is_main_thread() -> bool {
    // SAFETY: getpid cannot fail.
    tid() == unsafe { libc::getpid() }
}

/// Suspend the calling thread for at least `usec` microseconds. Negative
/// values return immediately.
pub fn sleep_usec(usec: i64) {
    if usec > 0 {
        std::thread::sleep(Duration::from_micros(usec as u64));
    }
}

/// Unwind the calling thread without tripping crash containment.
///
/// Inside a managed [`Thread`](crate::Thread) the unwind is let through the
/// thread boundary and `join()` reports [`JoinError::Exited`](crate::JoinError::Exited).
pub fn exit() -> ! {
    std::panic::resume_unwind(Box::new(ExitSignal))
}
