// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Fatal handler.
//!
//! Two entry points: OS primitive failures, which terminate the process, and
//! failures escaping a managed thread's function, which are classified here
//! and either terminate the process or continue unwinding.

use std::any::Any;
use std::borrow::Cow;
use std::io;
use std::panic;
use std::process;

use libc::c_int;

use crate::exception::Exception;

/// Unwind payload used by [`current_thread::exit`](crate::current_thread::exit).
///
/// This is the only payload the thread boundary lets through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitSignal;

/// What escaped a thread function.
#[derive(Debug)]
pub enum Failure<'a> {
    /// A raised [`Exception`].
    Exception(&'a Exception),
    /// A panic with a string message.
    Panic(Cow<'a, str>),
    /// A payload of a type this crate does not know.
    Unknown,
    /// [`ExitSignal`]; must keep unwinding.
    Exit,
}

impl Failure<'_> {
    /// Whether containment ends in `abort()`.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Failure::Exit)
    }
}

/// Classify an unwind payload.
pub fn classify(payload: &(dyn Any + Send)) -> Failure<'_> {
    if let Some(ex) = payload.downcast_ref::<Exception>() {
        Failure::Exception(ex)
    } else if payload.is::<ExitSignal>() {
        Failure::Exit
    } else if let Some(s) = payload.downcast_ref::<&str>() {
        Failure::Panic(Cow::Borrowed(*s))
    } else if let Some(s) = payload.downcast_ref::<String>() {
        Failure::Panic(Cow::Borrowed(s.as_str()))
    } else {
        Failure::Unknown
    }
}

/// Human-readable message for an unwind payload.
pub fn payload_message(payload: &(dyn Any + Send)) -> String {
    match classify(payload) {
        Failure::Exception(ex) => ex.what().to_string(),
        Failure::Panic(msg) => msg.into_owned(),
        Failure::Exit => "thread exited".to_string(),
        Failure::Unknown => "unknown panic".to_string(),
    }
}

/// Contain a failure that escaped the function of thread `thread`.
///
/// Reports and aborts, except for [`ExitSignal`], which is re-raised.
pub(crate) fn contain(thread: &str, payload: Box<dyn Any + Send>) {
    if !classify(payload.as_ref()).is_fatal() {
        thread_trace!(thread, "exit signal crossing thread boundary");
        panic::resume_unwind(payload)
    }
    report(thread, &classify(payload.as_ref()));
    process::abort()
}

fn report(thread: &str, failure: &Failure<'_>) {
    match failure {
        Failure::Exception(ex) => {
            tracing::error!(
                thread,
                reason = ex.what(),
                stack_trace = ex.stack_trace(),
                "exception caught in thread"
            );
            eprintln!("exception caught in Thread {thread}");
            eprintln!("reason: {}", ex.what());
            eprintln!("stack trace: {}", ex.stack_trace());
        }
        Failure::Panic(msg) => {
            tracing::error!(thread, reason = %msg, "panic caught in thread");
            eprintln!("exception caught in Thread {thread}");
            eprintln!("reason: {msg}");
        }
        Failure::Unknown => {
            tracing::error!(thread, "unknown failure caught in thread");
            eprintln!("unknown exception caught in Thread {thread}");
        }
        Failure::Exit => {}
    }
}

/// Abort unless a pthread call returned 0.
#[inline]
pub(crate) fn check(ret: c_int, op: &'static str) {
    if ret != 0 {
        os_failure(op, ret)
    }
}

/// Terminate after an OS primitive reported `errnum`.
#[cold]
pub(crate) fn os_failure(op: &'static str, errnum: c_int) -> ! {
    let err = io::Error::from_raw_os_error(errnum);
    tracing::error!(op, errno = errnum, %err, "OS primitive failed");
    eprintln!("Failed in {op}: {err}");
    process::abort()
}

/// Terminate after a thread could not be created.
#[cold]
pub(crate) fn spawn_failure(thread: &str, err: io::Error) -> ! {
    tracing::error!(thread, %err, "thread creation failed");
    eprintln!("Failed in pthread_create: {err}");
    process::abort()
}

/// Terminate on a broken invariant found where unwinding is not an option.
#[cold]
pub(crate) fn invariant(what: &str) -> ! {
    tracing::error!(what, "invariant violated");
    eprintln!("invariant violated: {what}");
    process::abort()
}
