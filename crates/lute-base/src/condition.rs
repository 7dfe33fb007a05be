// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Condition variable paired with [`Mutex`].

use std::cell::UnsafeCell;
use std::fmt;
use std::ptr;

use crate::fatal::check;
use crate::mutex::{MutexGuard, UnassignGuard};

/// A `pthread_cond_t`. Waits take the guard of the mutex that protects the
/// predicate; always re-check the predicate after waking.
pub struct Condition {
    raw: Box<UnsafeCell<libc::pthread_cond_t>>,
}

unsafe impl Send for Condition {}
unsafe impl Sync for Condition {}

impl Condition {
    pub fn new() -> Self {
        let raw = Box::new(UnsafeCell::new(libc::PTHREAD_COND_INITIALIZER));
        // SAFETY: raw is boxed and never moves after init.
        check(
            unsafe { libc::pthread_cond_init(raw.get(), ptr::null()) },
            "pthread_cond_init",
        );
        Self { raw }
    }

    /// Atomically release the guard's mutex and block until notified, then
    /// re-acquire. The mutex reports no holder while the thread is parked.
    pub fn wait<T>(&self, guard: &mut MutexGuard<'_, T>) {
        let mutex = guard.mutex();
        let _unassigned = UnassignGuard::new(mutex);
        // SAFETY: the guard proves this thread holds `mutex`.
        check(
            unsafe { libc::pthread_cond_wait(self.raw.get(), mutex.raw()) },
            "pthread_cond_wait",
        );
    }

    /// Wait until `condition` returns false.
    pub fn wait_while<T, F>(&self, guard: &mut MutexGuard<'_, T>, mut condition: F)
    where
        F: FnMut(&mut T) -> bool,
    {
        while condition(&mut **guard) {
            self.wait(guard);
        }
    }

    /// Wake one waiter.
    pub fn notify(&self) {
        check(
            unsafe { libc::pthread_cond_signal(self.raw.get()) },
            "pthread_cond_signal",
        );
    }

    /// Wake every waiter.
    pub fn notify_all(&self) {
        check(
            unsafe { libc::pthread_cond_broadcast(self.raw.get()) },
            "pthread_cond_broadcast",
        );
    }
}

impl Default for Condition {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Condition").finish_non_exhaustive()
    }
}

impl Drop for Condition {
    fn drop(&mut self) {
        check(
            unsafe { libc::pthread_cond_destroy(self.raw.get()) },
            "pthread_cond_destroy",
        );
    }
}
